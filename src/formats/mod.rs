//! Built-in archive decoders.
//!
//! These go through the same [`ArchiveDecoder`](crate::ArchiveDecoder)
//! contract as any external plugin and are registered with
//! [`register_builtin`].
//!
//! ## Format overview
//!
//! | Module    | Tag    | Layer | Notes |
//! |-----------|--------|-------|-------|
//! | [`pfs0`]  | `PFS0` | flat  | NSP outer container |
//! | [`hfs0`]  | `HFS0` | flat  | per-entry SHA-256 records kept as archive state |
//! | [`sarc`]  | `SARC` | tree  | byte order chosen by BOM |
//! | [`zip`]   | `ZIP`  | tree  | stored and Zstandard entries |

pub mod hfs0;
pub mod pfs0;
pub mod sarc;
pub mod zip;

use crate::archive::MAX_SANE_COUNT;
use crate::registry::FormatRegistry;
use crate::text::Encoding;
use crate::view::Frame;
use crate::{Error, Result};

/// Register every built-in decoder.
pub fn register_builtin(registry: &mut FormatRegistry) {
    registry.register(pfs0::Pfs0Decoder::descriptor());
    registry.register(hfs0::Hfs0Decoder::descriptor());
    registry.register(sarc::SarcDecoder::descriptor());
    registry.register(zip::ZipDecoder::descriptor());
}

/// Header shape shared by PFS0 and HFS0: magic, count, string table size,
/// then fixed-size entries.
pub(crate) struct PartitionLayout {
    pub magic: &'static str,
    pub entry_size: u64,
}

pub(crate) struct PartitionHeader {
    pub count: u64,
    pub string_table: u64,
    pub string_table_size: u64,
    /// Start of the data section.
    pub data: u64,
}

impl PartitionLayout {
    /// Parse the fixed header, or `None` if `frame` does not hold this
    /// layout.
    pub fn read_header(&self, frame: &mut Frame, len: u64) -> Result<Option<PartitionHeader>> {
        if !frame.ascii_equal(0, self.magic)? {
            return Ok(None);
        }
        let count = frame.read_u32(4)? as u64;
        let string_table_size = frame.read_u32(8)? as u64;
        if count >= MAX_SANE_COUNT {
            return Ok(None);
        }
        let string_table = 0x10 + count * self.entry_size;
        let data = string_table + string_table_size;
        if data > len {
            return Ok(None);
        }
        Ok(Some(PartitionHeader {
            count,
            string_table,
            string_table_size,
            data,
        }))
    }
}

/// NUL-terminated UTF-8 name at `offset` of a string table.
pub(crate) fn string_at(table: &[u8], offset: u32) -> Result<String> {
    let tail = table
        .get(offset as usize..)
        .filter(|tail| !tail.is_empty())
        .ok_or(Error::InvalidFormat("name offset outside string table"))?;
    Ok(Encoding::Utf8.decode_cstring(tail))
}
