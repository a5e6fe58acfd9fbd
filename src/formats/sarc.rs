//! SARC (SEAD ARChive) - hierarchic asset archive.
//!
//! ## Layout
//! ```text
//! [0x00] SARC header  (0x14 bytes)
//! [0x14] SFAT header  (0x0C bytes) + FAT entries (FileCount × 0x10)
//! [...]  SFNT header  (0x08 bytes) + null-terminated filenames (4-byte aligned)
//! [...]  Data section (begins at offset given in SARC header)
//! ```
//!
//! ## Endianness
//! Determined by BOM: `0xFEFF` = Big Endian, `0xFFFE` = Little Endian.
//! The BOM itself and the section header sizes are read little-endian.
//!
//! ## SARC Header (0x14 bytes)
//! ```text
//! [0x00] Magic "SARC"       (4 bytes)
//! [0x04] HeaderSize (0x14)  (u16 LE)
//! [0x06] BOM                (u16 LE)
//! [0x08] TotalFileSize      (u32)
//! [0x0C] DataOffset         (u32)
//! [0x10] Version (0x0100)   (u16 LE)
//! [0x12] Padding
//! ```
//!
//! ## SFAT Entry (0x10 bytes)
//! ```text
//! [0x00] FilenameHash           (u32)
//! [0x04] FilenameAttrs          (u32) 0 = no name; else 0xAABBBBBB where
//!                                     BBBBBB = name-table word offset
//! [0x08] DataStart              (u32) relative to data section
//! [0x0C] DataEnd                (u32)
//! ```

use tracing::debug;

use crate::archive::{ArchiveDecoder, ArchiveIndex, ProbeContext, is_valid_entry_name};
use crate::registry::{FormatDescriptor, signature};
use crate::text::Encoding;
use crate::view::{Frame, MappedView};
use crate::{Error, Result};

const SFAT: u64 = 0x14;
const MAX_FILES: u64 = 0x3FFF;
const MAX_NAME: usize = 0x400;

/// Decoder for SARC archives of either byte order.
#[derive(Debug, Default, Clone, Copy)]
pub struct SarcDecoder;

impl SarcDecoder {
    pub fn descriptor() -> FormatDescriptor {
        FormatDescriptor::archive("SARC", SarcDecoder)
            .with_description("SEAD archive")
            .with_signature(signature(b"SARC"))
            .with_extensions(["sarc", "pack", "bars"])
            .hierarchic(true)
    }
}

/// Endian-aware reads over a frame.
struct Reader<'f> {
    frame: &'f mut Frame,
    le: bool,
}

impl Reader<'_> {
    fn u16(&mut self, offset: u64) -> Result<u16> {
        if self.le {
            self.frame.read_u16(offset)
        } else {
            self.frame.read_u16_be(offset)
        }
    }

    fn u32(&mut self, offset: u64) -> Result<u32> {
        if self.le {
            self.frame.read_u32(offset)
        } else {
            self.frame.read_u32_be(offset)
        }
    }
}

impl ArchiveDecoder for SarcDecoder {
    fn try_open(&self, view: &MappedView, cx: &ProbeContext<'_>) -> Result<Option<ArchiveIndex>> {
        let mut frame = view.frame();
        if !frame.ascii_equal(0, "SARC")? || frame.read_u16(4)? != 0x14 {
            return Ok(None);
        }
        let le = match frame.read_u16(6)? {
            0xFFFE => true,
            0xFEFF => false,
            _ => return Err(Error::InvalidFormat("invalid SARC BOM")),
        };
        let mut r = Reader { frame: &mut frame, le };
        let data_offset = r.u32(0x0C)? as u64;

        if !r.frame.ascii_equal(SFAT, "SFAT")? || r.frame.read_u16(SFAT + 4)? != 0x0C {
            return Err(Error::InvalidFormat("missing SFAT section"));
        }
        let count = r.u16(SFAT + 6)? as u64;
        let multiplier = r.u32(SFAT + 8)?;
        if count > MAX_FILES {
            return Err(Error::InvalidFormat("SARC file count exceeds maximum"));
        }

        let sfnt = SFAT + 0x0C + count * 0x10;
        if !r.frame.ascii_equal(sfnt, "SFNT")? || r.frame.read_u16(sfnt + 4)? != 8 {
            return Err(Error::InvalidFormat("missing SFNT section"));
        }
        let names = sfnt + 8;

        let mut entries = Vec::with_capacity(count as usize);
        for i in 0..count {
            cx.check_canceled()?;
            let at = SFAT + 0x0C + i * 0x10;
            let hash = r.u32(at)?;
            let attrs = r.u32(at + 4)?;
            let start = r.u32(at + 8)? as u64;
            let end = r.u32(at + 12)? as u64;
            if end < start {
                return Err(Error::InvalidFormat("SARC entry ends before it starts"));
            }
            let name = if attrs == 0 {
                format!("{hash:08X}.bin")
            } else {
                let at = names + (attrs & 0x00FF_FFFF) as u64 * 4;
                let name = r.frame.read_string(at, MAX_NAME, Encoding::Utf8)?;
                if sarc_hash(name.as_bytes(), multiplier) != hash {
                    debug!(%name, hash, "SARC name hash mismatch");
                }
                name
            };
            if !is_valid_entry_name(&name) {
                return Err(Error::InvalidFormat("invalid SARC entry name"));
            }
            entries.push(cx.create_entry(name).at(data_offset + start, end - start));
        }
        Ok(Some(ArchiveIndex::new(entries)))
    }
}

/// SARC filename hash.
///
/// Each byte is sign-extended (cast to `i8`) before accumulating.
pub fn sarc_hash(name: &[u8], multiplier: u32) -> u32 {
    let mut h: u32 = 0;
    for &b in name {
        h = h.wrapping_mul(multiplier).wrapping_add(b as i8 as u32);
    }
    h
}

/// Build a SARC image from `(name, data)` pairs.
#[cfg(test)]
pub(crate) fn build(files: &[(&str, &[u8])], le: bool) -> Vec<u8> {
    let u16b = |v: u16| if le { v.to_le_bytes() } else { v.to_be_bytes() };
    let u32b = |v: u32| if le { v.to_le_bytes() } else { v.to_be_bytes() };

    let mut names = Vec::new();
    let mut fat = Vec::new();
    let mut data = Vec::new();
    for (name, contents) in files {
        fat.extend_from_slice(&u32b(sarc_hash(name.as_bytes(), 101)));
        fat.extend_from_slice(&u32b(0x0100_0000 | (names.len() / 4) as u32));
        fat.extend_from_slice(&u32b(data.len() as u32));
        fat.extend_from_slice(&u32b((data.len() + contents.len()) as u32));
        names.extend_from_slice(name.as_bytes());
        names.push(0);
        while names.len() % 4 != 0 {
            names.push(0);
        }
        data.extend_from_slice(contents);
    }
    let data_offset = 0x14 + 0x0C + fat.len() + 8 + names.len();

    let mut out = b"SARC".to_vec();
    out.extend_from_slice(&0x14u16.to_le_bytes());
    out.extend_from_slice(&if le { [0xFE, 0xFF] } else { [0xFF, 0xFE] });
    out.extend_from_slice(&u32b((data_offset + data.len()) as u32));
    out.extend_from_slice(&u32b(data_offset as u32));
    out.extend_from_slice(&0x0100u16.to_le_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(b"SFAT");
    out.extend_from_slice(&0x0Cu16.to_le_bytes());
    out.extend_from_slice(&u16b(files.len() as u16));
    out.extend_from_slice(&u32b(101));
    out.extend_from_slice(&fat);
    out.extend_from_slice(b"SFNT");
    out.extend_from_slice(&8u16.to_le_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&names);
    out.extend_from_slice(&data);
    out
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::archive::ArchiveHandle;
    use crate::options::Options;
    use crate::registry::FormatRegistry;

    fn open(data: Vec<u8>) -> ArchiveHandle {
        let mut registry = FormatRegistry::new();
        registry.register(SarcDecoder::descriptor());
        ArchiveHandle::open(MappedView::from_bytes(data, "pack.sarc"), &registry, &Options::default()).unwrap()
    }

    #[test]
    fn both_byte_orders() {
        for le in [true, false] {
            let arc = open(build(&[("Layout/main.bflyt", b"layout"), ("Sound/se.bars", b"se")], le));
            assert!(arc.is_hierarchic());
            let names: Vec<&str> = arc.entries().iter().map(|e| e.name.as_str()).collect();
            assert_eq!(names, ["Layout/main.bflyt", "Sound/se.bars"]);

            let mut out = String::new();
            arc.open_entry(&arc.entries()[0]).unwrap().read_to_string(&mut out).unwrap();
            assert_eq!(out, "layout");
        }
    }

    #[test]
    fn hash_matches_reference() {
        assert_eq!(sarc_hash(b"", 101), 0);
        assert_eq!(sarc_hash(b"a", 101), 0x61);
        assert_eq!(sarc_hash(b"ab", 101), 0x61 * 101 + 0x62);
        // non-ASCII bytes are sign-extended
        assert_eq!(sarc_hash(&[0xFF], 101), u32::MAX);
    }
}
