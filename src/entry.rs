//! Directory records produced by archive decoders.

use std::fmt;

/// Type tag of synthetic directory entries.
pub const DIRECTORY: &str = "directory";

/// Compression applied to a packed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Codec {
    /// One Zstandard frame.
    Zstd,
    /// LZ4 block prefixed with its decompressed size (u32 LE).
    Lz4,
    /// Decoder-specific scheme; the decoder must override
    /// [`ArchiveDecoder::open_entry`](crate::ArchiveDecoder::open_entry).
    Custom(String),
}

/// Size and codec of an entry stored compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PackedInfo {
    pub unpacked_size: u64,
    pub codec: Codec,
}

/// One file (or synthetic directory) inside an archive or directory.
///
/// `offset` and `size` locate the stored bytes inside the owning archive's
/// view; for packed entries `size` is the compressed size.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Entry {
    /// Path inside the archive, using `/` or `\` as separator.
    pub name: String,
    /// Type tag: `"image"`, `"audio"`, `"archive"`, `"directory"`, ... or
    /// empty when unknown.
    pub kind: String,
    pub offset: u64,
    pub size: u64,
    pub packed: Option<PackedInfo>,
}

impl Entry {
    /// Create an entry with no placement yet.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Create a zero-size entry standing for a sub-directory.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, DIRECTORY)
    }

    /// Builder-style placement.
    pub fn at(mut self, offset: u64, size: u64) -> Self {
        self.offset = offset;
        self.size = size;
        self
    }

    /// Builder-style packed marker.
    pub fn packed(mut self, codec: Codec, unpacked_size: u64) -> Self {
        self.packed = Some(PackedInfo {
            unpacked_size,
            codec,
        });
        self
    }

    pub fn is_directory(&self) -> bool {
        self.kind == DIRECTORY
    }

    pub fn is_packed(&self) -> bool {
        self.packed.is_some()
    }

    /// Size of the entry's contents once decompressed.
    pub fn unpacked_size(&self) -> u64 {
        self.packed
            .as_ref()
            .map_or(self.size, |packed| packed.unpacked_size)
    }

    /// Whether `[offset, offset + size)` lies within `max_offset` bytes.
    pub fn check_placement(&self, max_offset: u64) -> bool {
        self.size <= max_offset && self.offset <= max_offset - self.size
    }

    /// Final path component.
    pub fn file_name(&self) -> &str {
        crate::vfs::path::file_name(&self.name)
    }

    /// Extension of the final path component, without the dot.
    pub fn extension(&self) -> Option<&str> {
        crate::vfs::path::extension(&self.name)
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] @{:#x}+{:#x}", self.name, self.kind, self.offset, self.size)
    }
}
