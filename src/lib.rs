//! **arcnav** - navigation and format-resolution core for browsing nested
//! game archives.
//!
//! Any file may be a plain resource or an archive in one of many formats,
//! and archives may hold further archives. arcnav presents all of it as one
//! directory tree: it picks a decoder per file from magic number, extension
//! and size, turns opened archives into sub-directories, and streams entry
//! contents through movable memory-mapped windows instead of loading whole
//! archives.
//!
//! # Layers
//! | Module | Role |
//! |--------|------|
//! | [`view`] | [`MappedView`] and its movable [`Frame`] windows |
//! | [`reader`] | [`BinaryReader`], buffered typed reads over seekable sources and pipes |
//! | [`registry`] | [`FormatRegistry`], candidate decoders per probe |
//! | [`archive`] | [`ArchiveHandle`] and the [`ArchiveDecoder`] plugin contract |
//! | [`vfs`] | [`Vfs`], the stack of physical and archive layers |
//! | [`formats`] | built-in PFS0, HFS0, SARC and ZIP decoders |
//! | [`compression`] | Zstandard and LZ4 decorators for packed entries |
//!
//! # Example
//! ```no_run
//! use arcnav::{Context, Options};
//!
//! let cx = Context::with_root("/games/title", Options::default())?;
//! let vfs = cx.vfs();
//! let entry = vfs.locate("data.zip/textures/bg01.png")?;
//! let mut stream = vfs.open_stream(&entry)?;
//! # let _ = &mut stream;
//! # Ok::<(), arcnav::Error>(())
//! ```

pub mod archive;
pub mod compression;
pub mod context;
pub mod entry;
pub mod error;
pub mod formats;
pub mod options;
pub mod reader;
pub mod registry;
pub mod text;
pub mod vfs;
pub mod view;

pub use archive::{
    ArchiveDecoder, ArchiveHandle, ArchiveIndex, ArchiveOperation, CancelToken, EntryStream, ProbeContext,
};
pub use context::Context;
pub use entry::{Codec, Entry, PackedInfo};
pub use error::{Error, Result};
pub use options::Options;
pub use reader::{BinaryReader, ReadSeek};
pub use registry::{FormatDescriptor, FormatRegistry, Probe, ResourceKind};
pub use text::Encoding;
pub use vfs::{FileSystem, FileSystemStats, Vfs};
pub use view::{Frame, MappedView, ViewStream};
