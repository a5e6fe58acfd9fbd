//! Layered virtual filesystem.
//!
//! A [`Vfs`] is a stack of [`FileSystem`] layers. The bottom layer is always
//! the host filesystem; entering an archive pushes a [`TreeArchiveFs`] or
//! [`FlatArchiveFs`] over it, so nested archives read as sub-directories.
//!
//! ## Navigation
//!
//! | Call | Effect |
//! |------|--------|
//! | [`Vfs::chdir`] with a directory entry | change directory inside the top layer |
//! | [`Vfs::chdir`] with `..` at the root of an archive | pop the layer, restore the directory that held the archive |
//! | [`Vfs::chdir`] with a file entry | open it as an archive and push a layer |
//! | [`Vfs::set_full_path`] | pop to the common prefix, then descend |
//! | [`Vfs::locate`] | resolve `outer.zip/inner.pak/image.png` layer by layer |
//!
//! The most recently left archive layer is kept (disposed, so its mapping is
//! released) and reused if the same archive is entered again right away; its
//! view is re-opened lazily on the first read. It is dropped when the host
//! directory changes or another archive is entered.
//!
//! Entry lookups through [`Vfs::find_file`] are cached until the next
//! navigation or [`Vfs::flush`].

mod archive_fs;
mod layer;
pub mod path;
mod physical;

pub use archive_fs::{FlatArchiveFs, TreeArchiveFs};
pub use layer::{FileSystem, FileSystemStats};
pub use physical::PhysicalFileSystem;

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use moka::sync::Cache;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::archive::{ArchiveHandle, CancelToken, EntryStream};
use crate::entry::Entry;
use crate::options::{INITIAL_CAPACITY, Options};
use crate::reader::BinaryReader;
use crate::registry::FormatRegistry;
use crate::view::MappedView;
use crate::{Error, Result};

struct Stack {
    /// Never empty; `layers[0]` is the host filesystem.
    layers: Vec<Box<dyn FileSystem>>,
    /// Name each archive layer was entered through, parallel to
    /// `layers[1..]`.
    paths: Vec<String>,
    last_visited: Option<(String, Box<dyn FileSystem>)>,
}

impl Stack {
    fn top(&self) -> &dyn FileSystem {
        self.layers[self.layers.len() - 1].as_ref()
    }

    fn top_mut(&mut self) -> &mut dyn FileSystem {
        let last = self.layers.len() - 1;
        self.layers[last].as_mut()
    }

    fn push(&mut self, path: String, layer: Box<dyn FileSystem>) {
        debug!(depth = self.layers.len(), %path, "entering archive");
        self.layers.push(layer);
        self.paths.push(path);
    }

    /// Leave the top archive layer, keeping it as the last visited one.
    fn pop(&mut self) -> bool {
        if self.layers.len() < 2 {
            return false;
        }
        let (Some(layer), Some(path)) = (self.layers.pop(), self.paths.pop()) else {
            return false;
        };
        debug!(depth = self.layers.len(), %path, "leaving archive");
        layer.dispose();
        if let Some((_, previous)) = self.last_visited.replace((path, layer)) {
            previous.dispose();
        }
        true
    }

    fn flush(&mut self) {
        if let Some((path, layer)) = self.last_visited.take() {
            trace!(%path, "dropping last visited archive");
            layer.dispose();
        }
    }

    /// Change directory in the top layer; moving around the host
    /// filesystem drops the last visited archive.
    fn set_directory(&mut self, path: &str) -> Result<()> {
        let before = (self.layers.len() == 1).then(|| self.top().current_directory());
        self.top_mut().set_current_directory(path)?;
        if before.is_some_and(|before| before != self.top().current_directory()) {
            self.flush();
        }
        Ok(())
    }
}

/// The virtual filesystem: a stack of layers with one current directory.
///
/// Read-only calls take a shared lock; navigation takes an exclusive one.
pub struct Vfs {
    stack: RwLock<Stack>,
    cache: Cache<String, Entry>,
    registry: Arc<FormatRegistry>,
    options: Options,
    cancel: CancelToken,
}

impl Vfs {
    /// Start in the process's current directory.
    pub fn new(registry: Arc<FormatRegistry>, options: Options) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Self::with_root(cwd, registry, options)
    }

    /// Start in `dir` of the host filesystem.
    pub fn with_root(dir: impl AsRef<Path>, registry: Arc<FormatRegistry>, options: Options) -> Result<Self> {
        let physical = PhysicalFileSystem::new(dir, Arc::clone(&registry), options.clone())?;
        let cache = Cache::builder()
            .max_capacity(options.entry_cache_capacity)
            .time_to_idle(options.entry_cache_idle)
            .build();
        Ok(Self {
            stack: RwLock::new(Stack {
                layers: vec![Box::new(physical)],
                paths: Vec::new(),
                last_visited: None,
            }),
            cache,
            registry,
            options,
            cancel: CancelToken::new(),
        })
    }

    pub fn registry(&self) -> &Arc<FormatRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Token that aborts archive probing started by navigation.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Number of layers; 1 when only the host filesystem is present.
    pub fn depth(&self) -> usize {
        self.stack.read().layers.len()
    }

    /// Whether the top layer is an archive.
    pub fn is_virtual(&self) -> bool {
        self.depth() > 1
    }

    pub fn current_directory(&self) -> String {
        self.stack.read().top().current_directory()
    }

    /// Archive behind the top layer.
    pub fn current_archive(&self) -> Option<Arc<ArchiveHandle>> {
        self.stack.read().top().archive().cloned()
    }

    /// Names the archive layers were entered through, outermost first.
    pub fn archive_stack(&self) -> Vec<String> {
        self.stack.read().paths.clone()
    }

    /// Archive layer names followed by the top layer's current directory.
    pub fn full_path(&self) -> Vec<String> {
        let stack = self.stack.read();
        let mut path = stack.paths.clone();
        path.push(stack.top().current_directory());
        path
    }

    /// Enter a directory, leave an archive via `..`, or enter an archive.
    pub fn chdir(&self, entry: &Entry) -> Result<()> {
        let mut stack = self.stack.write();
        let result = self.enter(&mut stack, entry);
        self.cache.invalidate_all();
        result
    }

    /// [`Vfs::chdir`] to the entry `name` resolves to.
    pub fn chdir_path(&self, name: &str) -> Result<()> {
        let entry = self.find_file(name)?;
        self.chdir(&entry)
    }

    fn enter(&self, stack: &mut Stack, entry: &Entry) -> Result<()> {
        if entry.is_directory() {
            if stack.layers.len() > 1 && entry.name == path::PARENT && stack.top().current_directory().is_empty() {
                stack.pop();
                if let Some((source, _)) = &stack.last_visited {
                    let dir = stack.top().directory_name(source);
                    stack.set_directory(&dir)?;
                }
                return Ok(());
            }
            return stack.set_directory(&entry.name);
        }

        if stack.last_visited.as_ref().is_some_and(|(path, _)| *path == entry.name) {
            if let Some((path, layer)) = stack.last_visited.take() {
                trace!(%path, "re-entering last visited archive");
                stack.push(path, layer);
            }
            return Ok(());
        }
        stack.flush();

        let handle = match stack.top().archive() {
            None => {
                let top = stack.top();
                let file = top.combine_path(&top.current_directory(), &entry.name);
                ArchiveHandle::open_path_with(file, &self.registry, &self.options, &self.cancel)?
            }
            Some(parent) => {
                let parent = Arc::clone(parent);
                let view = parent.open_view(entry)?;
                let mut handle = ArchiveHandle::open_with(
                    view,
                    &self.registry,
                    &self.options,
                    parent.contained_formats(),
                    &self.cancel,
                )?;
                handle.set_parent(&parent, entry.clone(), None)?;
                handle
            }
        };
        let handle = Arc::new(handle);
        let layer: Box<dyn FileSystem> = if handle.is_hierarchic() {
            Box::new(TreeArchiveFs::new(handle))
        } else {
            Box::new(FlatArchiveFs::new(handle))
        };
        stack.push(entry.name.clone(), layer);
        Ok(())
    }

    /// Navigate to `components` as returned by [`Vfs::full_path`].
    ///
    /// Only the last component may name a plain directory; a directory in
    /// the middle is [`Error::DirectoryNotFound`].
    pub fn set_full_path<S: AsRef<str>>(&self, components: &[S]) -> Result<()> {
        let desired: Vec<&str> = components.iter().map(AsRef::as_ref).collect();
        let Some((&last, archives)) = desired.split_last() else {
            return Ok(());
        };
        let mut stack = self.stack.write();
        let result = self.walk_to(&mut stack, &desired, last, archives);
        self.cache.invalidate_all();
        result
    }

    fn walk_to(
        &self,
        stack: &mut Stack,
        desired: &[&str],
        last: &str,
        archives: &[&str],
    ) -> Result<()> {
        let common = stack
            .paths
            .iter()
            .zip(archives)
            .take_while(|(have, want)| have.as_str() == **want)
            .count();
        while stack.layers.len() > common + 1 {
            stack.pop();
        }

        while stack.layers.len() < desired.len() {
            let name = desired[stack.layers.len() - 1];
            let is_last = stack.layers.len() == desired.len() - 1;
            match stack.top().find_file(name) {
                Ok(entry) if entry.is_directory() => {
                    if is_last {
                        return stack.set_directory(&entry.name);
                    }
                    return Err(Error::DirectoryNotFound(name.to_owned()));
                }
                Ok(entry) => self.enter(stack, &entry)?,
                Err(Error::FileNotFound(_)) if is_last => {
                    return stack
                        .set_directory(name)
                        .map_err(|_| Error::FileNotFound(name.to_owned()));
                }
                Err(e) => return Err(e),
            }
        }
        stack.set_directory(last)
    }

    /// [`Vfs::set_full_path`] reporting only success.
    pub fn try_set_full_path<S: AsRef<str>>(&self, components: &[S]) -> bool {
        match self.set_full_path(components) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "navigation failed");
                false
            }
        }
    }

    /// Resolve a `/`-separated path that may pass through archives, entering
    /// each archive on the way, and return the final entry.
    ///
    /// On failure the stack stays wherever resolution stopped.
    pub fn locate(&self, virtual_path: &str) -> Result<Entry> {
        let mut stack = self.stack.write();
        let result = self.resolve(&mut stack, virtual_path);
        self.cache.invalidate_all();
        result
    }

    fn resolve(&self, stack: &mut Stack, virtual_path: &str) -> Result<Entry> {
        let parts: Vec<&str> = virtual_path.split('/').filter(|p| !p.is_empty()).collect();
        let mut rooted = virtual_path.starts_with('/');
        let mut start = 0;
        for i in 0..parts.len() {
            let joined = parts[start..=i].join("/");
            let name = if rooted { format!("/{joined}") } else { joined };
            if i + 1 == parts.len() {
                return stack.top().find_file(&name);
            }
            match stack.top().find_file(&name) {
                Ok(entry) if !entry.is_directory() => {
                    self.enter(stack, &entry)?;
                    start = i + 1;
                    rooted = false;
                }
                Ok(_) | Err(Error::FileNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Err(Error::FileNotFound(virtual_path.to_owned()))
    }

    /// Look up `name` in the top layer.
    pub fn find_file(&self, name: &str) -> Result<Entry> {
        if name == path::PARENT {
            return Ok(Entry::directory(path::PARENT));
        }
        // navigation clears the cache under the write lock, so lookups and
        // inserts stay under one read guard
        let stack = self.stack.read();
        if let Some(entry) = self.cache.get(name) {
            trace!(name, "entry cache hit");
            return Ok(entry);
        }
        let entry = stack.top().find_file(name)?;
        self.cache.insert(name.to_owned(), entry.clone());
        Ok(entry)
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.stack.read().top().file_exists(name)
    }

    pub fn directory_exists(&self, path: &str) -> bool {
        self.stack.read().top().directory_exists(path)
    }

    pub fn files(&self) -> Result<Vec<Entry>> {
        self.stack.read().top().files()
    }

    pub fn files_matching(&self, pattern: &str) -> Result<Vec<Entry>> {
        self.stack.read().top().files_matching(pattern)
    }

    pub fn files_recursive(&self) -> Result<Vec<Entry>> {
        self.stack.read().top().files_recursive()
    }

    pub fn stats(&self) -> Result<FileSystemStats> {
        self.stack.read().top().stats()
    }

    pub fn directory_size(&self, path: &str) -> Result<u64> {
        self.stack.read().top().directory_size(path)
    }

    pub fn combine_path(&self, base: &str, name: &str) -> String {
        self.stack.read().top().combine_path(base, name)
    }

    pub fn directory_name(&self, path: &str) -> String {
        self.stack.read().top().directory_name(path)
    }

    pub fn open_stream(&self, entry: &Entry) -> Result<EntryStream> {
        self.stack.read().top().open_stream(entry)
    }

    pub fn open_view(&self, entry: &Entry) -> Result<MappedView> {
        self.stack.read().top().open_view(entry)
    }

    pub fn open_binary(&self, entry: &Entry) -> Result<BinaryReader> {
        self.stack.read().top().open_binary(entry)
    }

    /// Look up `name` in the top layer, then in every layer below it.
    pub fn find_file_in_hierarchy(&self, name: &str) -> Result<Entry> {
        match self.find_file(name) {
            Err(Error::FileNotFound(_)) => {}
            found => return found,
        }
        let stack = self.stack.read();
        for layer in stack.layers.iter().rev() {
            match layer.find_file(name) {
                Err(Error::FileNotFound(_)) => continue,
                found => return found,
            }
        }
        Err(Error::FileNotFound(name.to_owned()))
    }

    pub fn file_exists_in_hierarchy(&self, name: &str) -> bool {
        self.find_file_in_hierarchy(name).is_ok()
    }

    /// Open `name` from whichever layer has it, top first.
    pub fn open_stream_in_hierarchy(&self, name: &str) -> Result<EntryStream> {
        let entry = self.find_file_in_hierarchy(name)?;
        let stack = self.stack.read();
        for layer in stack.layers.iter().rev() {
            if !layer.file_exists(&entry.name) {
                continue;
            }
            match layer.open_stream(&entry) {
                Ok(stream) => return Ok(stream),
                Err(e) => trace!(name, error = %e, "layer failed to open entry"),
            }
        }
        Err(Error::FileNotFound(name.to_owned()))
    }

    /// Find a companion file next to the current archive.
    pub fn find_file_in_archive_directory(&self, name: &str) -> Result<Entry> {
        let archive = self
            .current_archive()
            .ok_or(Error::Unsupported("no archive is open"))?;
        let full = path::combine_path(path::directory_name(archive.name()), name);
        self.find_file_in_hierarchy(&full)
    }

    /// Clear the entry cache and drop the last visited archive.
    pub fn flush(&self) {
        let mut stack = self.stack.write();
        stack.flush();
        self.cache.invalidate_all();
    }
}

impl Drop for Vfs {
    fn drop(&mut self) {
        let stack = self.stack.get_mut();
        stack.flush();
        for layer in stack.layers.iter().rev() {
            layer.dispose();
        }
    }
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stack = self.stack.read();
        f.debug_struct("Vfs")
            .field("layers", &stack.layers)
            .field("paths", &stack.paths)
            .finish()
    }
}

/// Read `[offset, offset + size)` of a stream that may not be seekable.
///
/// Sequential streams are materialized up to the end of the range, in
/// memory or in a temp file depending on
/// [`Options::materialize_threshold`]. The result is shorter than `size`
/// when the stream ends first.
pub fn read_from_any_stream(input: EntryStream, offset: u64, size: u64, options: &Options) -> Result<Vec<u8>> {
    let count = usize::try_from(size).map_err(|_| Error::Bounds)?;
    match input {
        EntryStream::Seekable(mut stream) => {
            stream.seek(SeekFrom::Start(offset))?;
            let mut data = Vec::with_capacity(size.min(INITIAL_CAPACITY) as usize);
            stream.take(size).read_to_end(&mut data)?;
            Ok(data)
        }
        EntryStream::Sequential(stream) => {
            let end = offset.saturating_add(size);
            let view = MappedView::from_reader(stream, "stream", end, options)?;
            if offset >= view.len() {
                return Ok(Vec::new());
            }
            view.frame().read_bytes(offset, count)
        }
    }
}
