//! ZIP central directory - hierarchic archive.
//!
//! Only the directory is interpreted; entry data is served verbatim
//! (method 0) or through the Zstandard decorator (method 93). Other methods
//! are listed but fail to open.
//!
//! ## End of central directory (0x16 bytes + comment)
//! ```text
//! [0x00] Magic "PK\x05\x06"   (4 bytes)
//! [0x0A] TotalEntries         (u16 LE)
//! [0x0C] DirectorySize        (u32 LE)
//! [0x10] DirectoryOffset      (u32 LE)
//! [0x14] CommentLength        (u16 LE)
//! ```
//!
//! ## Central directory record (0x2E bytes + name + extra + comment)
//! ```text
//! [0x00] Magic "PK\x01\x02"
//! [0x08] Flags (bit 0 encrypted, bit 11 UTF-8 names)
//! [0x0A] Method
//! [0x14] CompressedSize, [0x18] UncompressedSize
//! [0x1C] NameLength, [0x1E] ExtraLength, [0x20] CommentLength
//! [0x2A] LocalHeaderOffset
//! ```
//!
//! Data starts after the local header: `0x1E + NameLength + ExtraLength`
//! bytes from `LocalHeaderOffset`, with the lengths taken from the local
//! header itself.

use crate::archive::{ArchiveDecoder, ArchiveIndex, ProbeContext, is_valid_entry_name};
use crate::entry::Codec;
use crate::registry::{FormatDescriptor, signature};
use crate::text::Encoding;
use crate::view::{Frame, MappedView};
use crate::{Error, Result};

const EOCD_SIZE: u64 = 0x16;
const MAX_COMMENT: u64 = 0xFFFF;

const STORED: u16 = 0;
const DEFLATE: u16 = 8;
const ZSTD: u16 = 93;

/// Decoder for ZIP archives.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipDecoder;

impl ZipDecoder {
    pub fn descriptor() -> FormatDescriptor {
        FormatDescriptor::archive("ZIP", ZipDecoder)
            .with_description("ZIP archive")
            .with_signatures([signature(b"PK\x03\x04"), signature(b"PK\x05\x06")])
            .with_extensions(["zip", "pk3", "apk"])
            .hierarchic(true)
    }
}

/// Position of the end-of-central-directory record, scanning backwards
/// over a possible trailing comment.
fn find_eocd(frame: &mut Frame, len: u64) -> Result<Option<u64>> {
    if len < EOCD_SIZE {
        return Ok(None);
    }
    let start = len.saturating_sub(EOCD_SIZE + MAX_COMMENT);
    let tail = frame.read_bytes(start, (len - start) as usize)?;
    let found = tail
        .windows(4)
        .rposition(|w| w == b"PK\x05\x06")
        .filter(|&pos| pos as u64 + EOCD_SIZE <= tail.len() as u64);
    Ok(found.map(|pos| start + pos as u64))
}

fn codec(method: u16, flags: u16) -> Option<Codec> {
    if flags & 1 != 0 {
        return Some(Codec::Custom("encrypted".into()));
    }
    match method {
        STORED => None,
        ZSTD => Some(Codec::Zstd),
        DEFLATE => Some(Codec::Custom("deflate".into())),
        other => Some(Codec::Custom(format!("zip method {other}"))),
    }
}

impl ArchiveDecoder for ZipDecoder {
    fn try_open(&self, view: &MappedView, cx: &ProbeContext<'_>) -> Result<Option<ArchiveIndex>> {
        let mut frame = view.frame();
        if !frame.ascii_equal(0, "PK")? {
            return Ok(None);
        }
        let Some(eocd) = find_eocd(&mut frame, view.len())? else {
            return Ok(None);
        };
        // a bare end record is a valid, empty archive
        let count = frame.read_u16(eocd + 0x0A)? as u64;
        let mut at = frame.read_u32(eocd + 0x10)? as u64;

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            cx.check_canceled()?;
            if !frame.ascii_equal(at, "PK\x01\x02")? {
                return Err(Error::InvalidFormat("broken ZIP central directory"));
            }
            let flags = frame.read_u16(at + 0x08)?;
            let method = frame.read_u16(at + 0x0A)?;
            let packed_size = frame.read_u32(at + 0x14)? as u64;
            let unpacked_size = frame.read_u32(at + 0x18)? as u64;
            let name_len = frame.read_u16(at + 0x1C)? as usize;
            let extra_len = frame.read_u16(at + 0x1E)? as u64;
            let comment_len = frame.read_u16(at + 0x20)? as u64;
            let local = frame.read_u32(at + 0x2A)? as u64;

            let raw_name = frame.read_bytes(at + 0x2E, name_len)?;
            let encoding = if flags & 0x800 != 0 {
                Encoding::Utf8
            } else {
                cx.encoding()
            };
            let name = encoding.decode(&raw_name);
            at += 0x2E + name_len as u64 + extra_len + comment_len;

            if name.ends_with(['/', '\\']) {
                continue;
            }
            if !is_valid_entry_name(&name) {
                return Err(Error::InvalidFormat("invalid ZIP entry name"));
            }
            if !frame.ascii_equal(local, "PK\x03\x04")? {
                return Err(Error::InvalidFormat("missing ZIP local header"));
            }
            let data = local + 0x1E + frame.read_u16(local + 0x1A)? as u64 + frame.read_u16(local + 0x1C)? as u64;

            let mut entry = cx.create_entry(name).at(data, packed_size);
            if let Some(codec) = codec(method, flags) {
                entry = entry.packed(codec, unpacked_size);
            }
            entries.push(entry);
        }
        Ok(Some(ArchiveIndex::new(entries)))
    }
}

/// Build a ZIP image. `(name, method, stored bytes, unpacked size)`.
#[cfg(test)]
pub(crate) fn build_with(files: &[(&str, u16, &[u8], u32)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();
    for (name, method, data, unpacked) in files {
        let local = out.len() as u32;
        out.extend_from_slice(b"PK\x03\x04");
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0x800u16.to_le_bytes());
        out.extend_from_slice(&method.to_le_bytes());
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&unpacked.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(data);

        central.extend_from_slice(b"PK\x01\x02");
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&0x800u16.to_le_bytes());
        central.extend_from_slice(&method.to_le_bytes());
        central.extend_from_slice(&[0u8; 8]);
        central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        central.extend_from_slice(&unpacked.to_le_bytes());
        central.extend_from_slice(&(name.len() as u16).to_le_bytes());
        central.extend_from_slice(&[0u8; 12]);
        central.extend_from_slice(&local.to_le_bytes());
        central.extend_from_slice(name.as_bytes());
    }
    let directory = out.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(b"PK\x05\x06");
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&(files.len() as u16).to_le_bytes());
    out.extend_from_slice(&(files.len() as u16).to_le_bytes());
    out.extend_from_slice(&(central.len() as u32).to_le_bytes());
    out.extend_from_slice(&directory.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// Build a ZIP of stored files.
#[cfg(test)]
pub(crate) fn build(files: &[(&str, &[u8])]) -> Vec<u8> {
    let files: Vec<(&str, u16, &[u8], u32)> = files
        .iter()
        .map(|(name, data)| (*name, STORED, *data, data.len() as u32))
        .collect();
    build_with(&files)
}
