//! Tunables shared by the view, registry and virtual filesystem.

use std::time::Duration;

use crate::text::Encoding;

/// Default frame window size; also the minimum a frame ever remaps to.
pub const PAGE_SIZE: u64 = 4096;

/// Files above this size prefer container/media decoders over images.
pub const ARCHIVE_PREFERENCE_THRESHOLD: u64 = 30 * 1024 * 1024;

/// Non-seekable sources above this size are spilled to a temp file.
pub const MATERIALIZE_THRESHOLD: u64 = 256 * 1024 * 1024;

/// Most bytes reserved up front for a length taken from untrusted input;
/// buffers grow past it as data actually arrives.
pub(crate) const INITIAL_CAPACITY: u64 = 64 * 1024;

/// Runtime configuration carried by a [`Context`](crate::Context).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Options {
    /// Initial window size of a new frame.
    pub frame_size: u64,
    /// Size above which [`FormatRegistry::find_formats`](crate::FormatRegistry::find_formats)
    /// ranks candidates by category.
    pub archive_preference_threshold: u64,
    /// Size above which non-seekable sources are copied to a temp file
    /// instead of memory.
    pub materialize_threshold: u64,
    /// Maximum number of cached entry lookups.
    pub entry_cache_capacity: u64,
    /// Cached entries idle this long are evicted.
    #[cfg_attr(feature = "serde", serde(with = "idle_secs"))]
    pub entry_cache_idle: Duration,
    /// Encoding used by string reads that do not name one.
    pub default_encoding: Encoding,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            frame_size: PAGE_SIZE,
            archive_preference_threshold: ARCHIVE_PREFERENCE_THRESHOLD,
            materialize_threshold: MATERIALIZE_THRESHOLD,
            entry_cache_capacity: 1024,
            entry_cache_idle: Duration::from_secs(60),
            default_encoding: Encoding::ShiftJis,
        }
    }
}

#[cfg(feature = "serde")]
mod idle_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
