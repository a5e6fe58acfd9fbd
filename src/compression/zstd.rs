//! Zstandard decoding (requires the `compression` feature).
//!
//! Packed entries hold one complete Zstandard frame. [`decoder`] wraps the
//! stored bytes in a streaming decoder so that large entries are never
//! fully buffered.

#![cfg(feature = "compression")]

use std::io::{BufReader, Read};

use crate::{Error, Result};

/// Streaming decoder over `input`.
///
/// Returns [`Error::Zstd`] if the decoder cannot be initialised. Corrupt
/// frames surface as I/O errors while reading.
pub fn decoder<R: Read>(input: R) -> Result<zstd::Decoder<'static, BufReader<R>>> {
    zstd::Decoder::new(input).map_err(|_| Error::Zstd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_in_small_reads() {
        let packed = zstd::encode_all(&[7u8; 1000][..], 1).unwrap();
        let mut dec = decoder(&packed[..]).unwrap();
        let mut chunk = [0u8; 64];
        let mut total = 0;
        loop {
            let n = dec.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            assert!(chunk[..n].iter().all(|&b| b == 7));
            total += n;
        }
        assert_eq!(total, 1000);
    }

    #[test]
    fn corrupt_frame_fails_on_read() {
        let mut dec = decoder(&b"not zstd at all"[..]).unwrap();
        let mut out = Vec::new();
        assert!(dec.read_to_end(&mut out).is_err());
    }
}
