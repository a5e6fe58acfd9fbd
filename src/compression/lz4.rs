//! LZ4 decoding (requires the `compression` feature).
//!
//! Packed entries use the size-prepended block format: a little-endian
//! `u32` decompressed byte count followed by one raw LZ4 block, as produced
//! by [`lz4_flex::compress_prepend_size`]. Block data cannot be decoded
//! incrementally, so the whole entry is decoded into memory.

#![cfg(feature = "compression")]

use std::io::Read;

use tracing::warn;

use crate::{Error, Result};

/// Decompress an LZ4-compressed buffer.
///
/// Returns [`Error::Lz4`] on any decompression failure.
pub fn decompress_lz4(data: &[u8]) -> Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data).map_err(|_| Error::Lz4)
}

/// Read all of `input` and decompress it.
///
/// `expected_size` is the unpacked size recorded by the archive; a mismatch
/// with the block's own prefix is logged but not fatal.
pub fn unpack_stream<R: Read>(mut input: R, expected_size: u64) -> Result<Vec<u8>> {
    let mut packed = Vec::new();
    input.read_to_end(&mut packed)?;
    let data = decompress_lz4(&packed)?;
    if expected_size != 0 && data.len() as u64 != expected_size {
        warn!(expected_size, actual = data.len(), "lz4 entry size mismatch");
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_truncated_block() {
        // 4 bytes announced, token asks for 5 literals, only 2 follow
        let packed = [4, 0, 0, 0, 0x50, b'a', b'b'];
        assert!(matches!(decompress_lz4(&packed), Err(Error::Lz4)));
    }

    #[test]
    fn unpacks_stream() {
        let packed = lz4_flex::compress_prepend_size(b"abcabcabc");
        assert_eq!(unpack_stream(&packed[..], 9).unwrap(), b"abcabcabc");
    }
}
