//! Stream decorators for packed entries.
//!
//! Decoders mark an entry packed with a [`Codec`]; the default
//! [`ArchiveDecoder::open_entry`](crate::ArchiveDecoder::open_entry) then
//! routes the stored bytes through [`unpack`]. The codec implementations
//! live behind the `compression` Cargo feature (on by default):
//!
//! ```toml
//! [dependencies]
//! arcnav = { version = "0.1", default-features = false }
//! ```
//!
//! | Module | Algorithm | Result stream |
//! |--------|-----------|---------------|
//! | [`zstd`] | Zstandard frame | sequential, decoded on the fly |
//! | [`lz4`]  | size-prepended LZ4 block | seekable, decoded up front |
//!
//! Without the feature, packed entries fail with [`Error::Unsupported`].

#[cfg(feature = "compression")]
pub mod lz4;

#[cfg(feature = "compression")]
pub mod zstd;

use crate::archive::EntryStream;
use crate::entry::{Codec, PackedInfo};
use crate::view::ViewStream;
use crate::{Error, Result};

/// Wrap the stored bytes of a packed entry in the matching decoder.
#[cfg(feature = "compression")]
pub fn unpack(stream: ViewStream, packed: &PackedInfo) -> Result<EntryStream> {
    match &packed.codec {
        Codec::Zstd => Ok(EntryStream::Sequential(Box::new(zstd::decoder(stream)?))),
        Codec::Lz4 => Ok(lz4::unpack_stream(stream, packed.unpacked_size)?.into()),
        Codec::Custom(_) => Err(Error::Unsupported("custom codec without decoder support")),
    }
}

/// Wrap the stored bytes of a packed entry in the matching decoder.
#[cfg(not(feature = "compression"))]
pub fn unpack(_stream: ViewStream, packed: &PackedInfo) -> Result<EntryStream> {
    match &packed.codec {
        Codec::Custom(_) => Err(Error::Unsupported("custom codec without decoder support")),
        _ => Err(Error::Unsupported("built without the `compression` feature")),
    }
}

#[cfg(all(test, feature = "compression"))]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::view::MappedView;

    #[test]
    fn zstd_entry_is_sequential() {
        let packed = ::zstd::encode_all(&b"zstd payload"[..], 3).unwrap();
        let view = MappedView::from_bytes(packed, "z");
        let info = PackedInfo {
            unpacked_size: 12,
            codec: Codec::Zstd,
        };
        let mut stream = unpack(view.stream_all().unwrap(), &info).unwrap();
        assert!(!stream.is_seekable());
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"zstd payload");
    }

    #[test]
    fn lz4_entry_is_seekable() {
        let packed = lz4_flex::compress_prepend_size(b"lz4 lz4 lz4 lz4");
        let view = MappedView::from_bytes(packed, "l");
        let info = PackedInfo {
            unpacked_size: 15,
            codec: Codec::Lz4,
        };
        let mut stream = unpack(view.stream_all().unwrap(), &info).unwrap();
        assert!(stream.is_seekable());
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "lz4 lz4 lz4 lz4");
    }

    #[test]
    fn custom_codec_is_unsupported() {
        let view = MappedView::from_bytes(vec![0u8; 4], "c");
        let info = PackedInfo {
            unpacked_size: 4,
            codec: Codec::Custom("lzss".into()),
        };
        assert!(matches!(unpack(view.stream_all().unwrap(), &info), Err(Error::Unsupported(_))));
    }
}
