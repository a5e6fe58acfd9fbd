//! Caller-owned root object.

use std::path::Path;
use std::sync::Arc;

use crate::archive::ArchiveHandle;
use crate::formats;
use crate::options::Options;
use crate::registry::FormatRegistry;
use crate::vfs::Vfs;
use crate::Result;

/// Owns the format registry and the virtual filesystem built on it.
///
/// Tests and embedders create as many independent contexts as they need.
#[derive(Debug)]
pub struct Context {
    registry: Arc<FormatRegistry>,
    vfs: Vfs,
}

impl Context {
    /// Built-in decoders, starting in the process's current directory.
    pub fn new(options: Options) -> Result<Self> {
        let root = std::env::current_dir()?;
        Self::with_root(root, options)
    }

    /// Built-in decoders, starting in `root`.
    pub fn with_root(root: impl AsRef<Path>, options: Options) -> Result<Self> {
        let mut registry = FormatRegistry::with_threshold(options.archive_preference_threshold);
        formats::register_builtin(&mut registry);
        Self::from_registry(registry, root, options)
    }

    /// Use a caller-populated registry.
    pub fn from_registry(registry: FormatRegistry, root: impl AsRef<Path>, options: Options) -> Result<Self> {
        let registry = Arc::new(registry);
        let vfs = Vfs::with_root(root, Arc::clone(&registry), options)?;
        Ok(Self { registry, vfs })
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    pub fn options(&self) -> &Options {
        self.vfs.options()
    }

    /// Open an archive file directly, outside the virtual filesystem.
    pub fn open_archive(&self, path: impl AsRef<Path>) -> Result<ArchiveHandle> {
        ArchiveHandle::open_path(path, &self.registry, self.vfs.options())
    }
}
