//! PFS0 (PartitionFS) - flat archive container.
//!
//! ## Layout
//! ```text
//! [0x00] Magic "PFS0"              (4 bytes)
//! [0x04] FileCount                 (u32 LE)
//! [0x08] StringTableSize           (u32 LE)
//! [0x0C] Reserved                  (4 bytes)
//! [0x10] EntryTable                (FileCount × 0x18 bytes)
//! [0x10 + FileCount×0x18]
//!        StringTable               (StringTableSize bytes)
//! [0x10 + FileCount×0x18 + StringTableSize]
//!        FileData                  (remaining bytes)
//! ```
//!
//! ## File Entry (0x18 bytes)
//! ```text
//! [0x00] Offset     - relative to the data section start (u64 LE)
//! [0x08] Size       - in bytes (u64 LE)
//! [0x10] NameOffset - byte offset into the string table (u32 LE)
//! [0x14] Reserved   (u32)
//! ```

use super::{string_at, PartitionLayout};
use crate::archive::{ArchiveDecoder, ArchiveIndex, ProbeContext, is_valid_entry_name};
use crate::registry::{FormatDescriptor, signature};
use crate::view::MappedView;
use crate::{Error, Result};

/// Layout shared with [HFS0](super::hfs0), which only differs in entry size.
pub(super) const LAYOUT: PartitionLayout = PartitionLayout {
    magic: "PFS0",
    entry_size: 0x18,
};

/// Decoder for PFS0 / NSP containers.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pfs0Decoder;

impl Pfs0Decoder {
    pub fn descriptor() -> FormatDescriptor {
        FormatDescriptor::archive("PFS0", Pfs0Decoder)
            .with_description("PartitionFS container")
            .with_signature(signature(b"PFS0"))
            .with_extensions(["nsp", "pfs0"])
    }
}

impl ArchiveDecoder for Pfs0Decoder {
    fn try_open(&self, view: &MappedView, cx: &ProbeContext<'_>) -> Result<Option<ArchiveIndex>> {
        let mut frame = view.frame();
        let Some(header) = LAYOUT.read_header(&mut frame, view.len())? else {
            return Ok(None);
        };
        let names = frame.read_bytes(header.string_table, header.string_table_size as usize)?;

        let mut entries = Vec::with_capacity(header.count as usize);
        for i in 0..header.count {
            let at = 0x10 + i * LAYOUT.entry_size;
            let offset = frame.read_u64(at)?;
            let size = frame.read_u64(at + 8)?;
            let name = string_at(&names, frame.read_u32(at + 0x10)?)?;
            if !is_valid_entry_name(&name) {
                return Err(Error::InvalidFormat("invalid PFS0 entry name"));
            }
            let offset = header.data.checked_add(offset).ok_or(Error::Bounds)?;
            entries.push(cx.create_entry(name).at(offset, size));
        }
        Ok(Some(ArchiveIndex::new(entries)))
    }
}

/// Build a PFS0 image from `(name, data)` pairs.
#[cfg(test)]
pub(crate) fn build(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut strings = Vec::new();
    let mut table = Vec::new();
    let mut offset = 0u64;
    for (name, data) in files {
        table.extend_from_slice(&offset.to_le_bytes());
        table.extend_from_slice(&(data.len() as u64).to_le_bytes());
        table.extend_from_slice(&(strings.len() as u32).to_le_bytes());
        table.extend_from_slice(&0u32.to_le_bytes());
        strings.extend_from_slice(name.as_bytes());
        strings.push(0);
        offset += data.len() as u64;
    }
    let mut out = b"PFS0".to_vec();
    out.extend_from_slice(&(files.len() as u32).to_le_bytes());
    out.extend_from_slice(&(strings.len() as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&table);
    out.extend_from_slice(&strings);
    for (_, data) in files {
        out.extend_from_slice(data);
    }
    out
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::archive::ArchiveHandle;
    use crate::options::Options;
    use crate::registry::FormatRegistry;

    fn registry() -> FormatRegistry {
        let mut registry = FormatRegistry::new();
        registry.register(Pfs0Decoder::descriptor());
        registry
    }

    #[test]
    fn opens_and_reads_entries() {
        let data = build(&[("main", b"\x01\x02\x03"), ("icon.png", b"png!")]);
        let view = MappedView::from_bytes(data, "game.nsp");
        let arc = ArchiveHandle::open(view, &registry(), &Options::default()).unwrap();
        assert_eq!(arc.tag(), "PFS0");
        assert!(!arc.is_hierarchic());

        let names: Vec<&str> = arc.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["main", "icon.png"]);
        assert_eq!(arc.entries()[1].kind, "image");

        let mut out = Vec::new();
        arc.open_entry(&arc.entries()[1]).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"png!");
    }

    #[test]
    fn truncated_data_is_rejected() {
        let mut data = build(&[("main", b"0123456789")]);
        data.truncate(data.len() - 4);
        let view = MappedView::from_bytes(data, "cut.nsp");
        assert!(ArchiveHandle::try_open(view, &registry(), &Options::default()).unwrap().is_none());
    }

    #[test]
    fn empty_container_opens() {
        let view = MappedView::from_bytes(build(&[]), "empty.nsp");
        let arc = ArchiveHandle::open(view, &registry(), &Options::default()).unwrap();
        assert!(arc.is_empty());
    }
}
