use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::archive::{ArchiveHandle, EntryStream};
use crate::entry::Entry;
use crate::reader::BinaryReader;
use crate::view::MappedView;
use crate::Result;

/// Totals for the current directory of a layer and everything below it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileSystemStats {
    pub total_files: u64,
    pub total_directories: u64,
    pub total_size: u64,
    /// Newest modification time, when the layer records one.
    pub last_modified: Option<SystemTime>,
}

/// One level of the virtual filesystem stack.
///
/// Names passed in are resolved against the layer's current directory
/// first where that makes sense; entries handed out carry names that can be
/// fed back into [`FileSystem::find_file`] and
/// [`FileSystem::set_current_directory`] from any directory of the layer.
pub trait FileSystem: Send + Sync + fmt::Debug {
    fn current_directory(&self) -> String;

    /// Change directory. `""` moves to the root of the layer.
    fn set_current_directory(&mut self, path: &str) -> Result<()>;

    fn combine_path(&self, base: &str, name: &str) -> String;

    fn directory_name(&self, path: &str) -> String;

    /// Look up a file or directory.
    ///
    /// Fails with [`Error::FileNotFound`](crate::Error::FileNotFound).
    fn find_file(&self, name: &str) -> Result<Entry>;

    fn file_exists(&self, name: &str) -> bool;

    fn directory_exists(&self, path: &str) -> bool;

    /// Contents of the current directory, sub-directories included as
    /// [`Entry::directory`] records.
    fn files(&self) -> Result<Vec<Entry>>;

    /// Files matching a wildcard; a directory part in `pattern` selects
    /// where to look.
    fn files_matching(&self, pattern: &str) -> Result<Vec<Entry>>;

    /// Every file below the current directory.
    fn files_recursive(&self) -> Result<Vec<Entry>>;

    fn stats(&self) -> Result<FileSystemStats>;

    /// Total size of the files below `path`; 0 for unknown paths.
    fn directory_size(&self, path: &str) -> Result<u64>;

    fn open_stream(&self, entry: &Entry) -> Result<EntryStream>;

    fn open_view(&self, entry: &Entry) -> Result<MappedView>;

    fn open_binary(&self, entry: &Entry) -> Result<BinaryReader>;

    /// Archive backing this layer, if any.
    fn archive(&self) -> Option<&Arc<ArchiveHandle>> {
        None
    }

    /// Release the layer's resources. Idempotent.
    fn dispose(&self) {}
}
