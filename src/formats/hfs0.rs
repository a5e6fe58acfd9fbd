//! HFS0 (SHA-256 FileSystem) - hashed flat archive.
//!
//! Same header and string table as [PFS0](super::pfs0), with larger entries
//! that carry a hash of each file's leading bytes.
//!
//! ## File Entry (0x40 bytes)
//! ```text
//! [0x00] DataOffset - relative to the data section start (u64 LE)
//! [0x08] DataSize   - in bytes (u64 LE)
//! [0x10] NameOffset - byte offset into the string table (u32 LE)
//! [0x14] HashedRegionSize - number of leading bytes covered by the hash (u32 LE)
//! [0x18] Reserved   (8 bytes)
//! [0x20] SHA-256 hash of the first HashedRegionSize bytes (32 bytes)
//! ```

use super::{string_at, PartitionLayout};
use crate::archive::{ArchiveDecoder, ArchiveIndex, ProbeContext, is_valid_entry_name};
use crate::registry::{FormatDescriptor, signature};
use crate::view::MappedView;
use crate::{Error, Result};

const LAYOUT: PartitionLayout = PartitionLayout {
    magic: "HFS0",
    entry_size: 0x40,
};

/// Hash record of one entry, kept as the archive's state in entry order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedRegion {
    pub size: u32,
    pub sha256: [u8; 32],
}

/// Hash records of an opened HFS0, see [`ArchiveHandle::state`](crate::ArchiveHandle::state).
#[derive(Debug, Clone, Default)]
pub struct Hfs0Hashes(pub Vec<HashedRegion>);

/// Decoder for HFS0 partitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct Hfs0Decoder;

impl Hfs0Decoder {
    pub fn descriptor() -> FormatDescriptor {
        FormatDescriptor::archive("HFS0", Hfs0Decoder)
            .with_description("SHA-256 hashed partition")
            .with_signature(signature(b"HFS0"))
            .with_extension("hfs0")
            .with_contained(["PFS0"])
    }
}

impl ArchiveDecoder for Hfs0Decoder {
    fn try_open(&self, view: &MappedView, cx: &ProbeContext<'_>) -> Result<Option<ArchiveIndex>> {
        let mut frame = view.frame();
        let Some(header) = LAYOUT.read_header(&mut frame, view.len())? else {
            return Ok(None);
        };
        let names = frame.read_bytes(header.string_table, header.string_table_size as usize)?;

        let mut entries = Vec::with_capacity(header.count as usize);
        let mut hashes = Vec::with_capacity(header.count as usize);
        for i in 0..header.count {
            let at = 0x10 + i * LAYOUT.entry_size;
            let offset = frame.read_u64(at)?;
            let size = frame.read_u64(at + 8)?;
            let name = string_at(&names, frame.read_u32(at + 0x10)?)?;
            if !is_valid_entry_name(&name) {
                return Err(Error::InvalidFormat("invalid HFS0 entry name"));
            }
            let mut sha256 = [0u8; 32];
            if frame.read(at + 0x20, &mut sha256)? != sha256.len() {
                return Err(Error::EndOfStream);
            }
            hashes.push(HashedRegion {
                size: frame.read_u32(at + 0x14)?,
                sha256,
            });
            let offset = header.data.checked_add(offset).ok_or(Error::Bounds)?;
            entries.push(cx.create_entry(name).at(offset, size));
        }
        Ok(Some(ArchiveIndex::new(entries).with_state(Hfs0Hashes(hashes))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveHandle;
    use crate::options::Options;
    use crate::registry::FormatRegistry;

    fn build(files: &[(&str, &[u8], u8)]) -> Vec<u8> {
        let mut strings = Vec::new();
        let mut table = Vec::new();
        let mut offset = 0u64;
        for (name, data, fill) in files {
            table.extend_from_slice(&offset.to_le_bytes());
            table.extend_from_slice(&(data.len() as u64).to_le_bytes());
            table.extend_from_slice(&(strings.len() as u32).to_le_bytes());
            table.extend_from_slice(&(data.len() as u32).to_le_bytes());
            table.extend_from_slice(&[0u8; 8]);
            table.extend_from_slice(&[*fill; 32]);
            strings.extend_from_slice(name.as_bytes());
            strings.push(0);
            offset += data.len() as u64;
        }
        let mut out = b"HFS0".to_vec();
        out.extend_from_slice(&(files.len() as u32).to_le_bytes());
        out.extend_from_slice(&(strings.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&table);
        out.extend_from_slice(&strings);
        for (_, data, _) in files {
            out.extend_from_slice(data);
        }
        out
    }

    #[test]
    fn keeps_hashes_as_state() {
        let data = build(&[("secure", b"abcd", 0xAA), ("logo", b"xy", 0x55)]);
        let mut registry = FormatRegistry::new();
        registry.register(Hfs0Decoder::descriptor());
        let arc = ArchiveHandle::open(MappedView::from_bytes(data, "root.hfs0"), &registry, &Options::default()).unwrap();

        assert_eq!(arc.entries().len(), 2);
        assert_eq!(arc.contained_formats(), ["PFS0"]);
        let hashes = arc.state::<Hfs0Hashes>().unwrap();
        assert_eq!(hashes.0[0].size, 4);
        assert_eq!(hashes.0[1].sha256, [0x55; 32]);
        assert_eq!(arc.entries()[1].offset, arc.entries()[0].offset + 4);
    }

    #[test]
    fn bad_name_offset_declines() {
        let mut data = build(&[("a", b"1", 0)]);
        // point the name past the string table
        data[0x20] = 0x7F;
        let mut registry = FormatRegistry::new();
        registry.register(Hfs0Decoder::descriptor());
        let view = MappedView::from_bytes(data, "bad.hfs0");
        assert!(ArchiveHandle::try_open(view, &registry, &Options::default()).unwrap().is_none());
    }
}
