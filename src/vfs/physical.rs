use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;
use walkdir::WalkDir;

use super::layer::{FileSystem, FileSystemStats};
use super::path::FileNameGlob;
use crate::archive::EntryStream;
use crate::entry::Entry;
use crate::options::Options;
use crate::reader::BinaryReader;
use crate::registry::FormatRegistry;
use crate::view::MappedView;
use crate::{Error, Result};

/// Bottom layer: the host filesystem.
///
/// Keeps its own current directory instead of changing the process one.
/// Entry names are absolute paths.
pub struct PhysicalFileSystem {
    cwd: PathBuf,
    registry: Arc<FormatRegistry>,
    options: Options,
    stats: Mutex<HashMap<PathBuf, FileSystemStats>>,
}

impl PhysicalFileSystem {
    pub fn new(cwd: impl AsRef<Path>, registry: Arc<FormatRegistry>, options: Options) -> Result<Self> {
        let cwd = canonical_dir(cwd.as_ref(), &cwd.as_ref().to_string_lossy())?;
        Ok(Self {
            cwd,
            registry,
            options,
            stats: Mutex::new(HashMap::new()),
        })
    }

    /// Current directory as a path.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.cwd.join(name)
    }

    fn file_entry(&self, path: &Path, len: u64) -> Entry {
        let name = path.to_string_lossy().into_owned();
        let kind = self.registry.type_from_name(&name, &[], len);
        Entry::new(name, kind).at(0, len)
    }

    fn entry_for(&self, path: &Path, metadata: &fs::Metadata) -> Entry {
        if metadata.is_dir() {
            Entry::directory(path.to_string_lossy())
        } else {
            self.file_entry(path, metadata.len())
        }
    }

    fn collect_stats(path: &Path) -> FileSystemStats {
        let mut stats = FileSystemStats::default();
        for item in WalkDir::new(path).min_depth(1).into_iter().filter_map(|e| e.ok()) {
            let Ok(metadata) = item.metadata() else {
                continue;
            };
            if metadata.is_dir() {
                stats.total_directories += 1;
            } else {
                stats.total_files += 1;
                stats.total_size += metadata.len();
            }
            if let Ok(modified) = metadata.modified() {
                stats.last_modified = stats.last_modified.max(Some(modified));
            }
        }
        stats
    }
}

fn canonical_dir(path: &Path, shown: &str) -> Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(dir) if dir.is_dir() => Ok(dir),
        Ok(_) => Err(Error::DirectoryNotFound(shown.to_owned())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::DirectoryNotFound(shown.to_owned())),
        Err(e) => Err(e.into()),
    }
}

impl FileSystem for PhysicalFileSystem {
    fn current_directory(&self) -> String {
        self.cwd.to_string_lossy().into_owned()
    }

    fn set_current_directory(&mut self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Ok(());
        }
        self.cwd = canonical_dir(&self.resolve(path), path)?;
        trace!(cwd = %self.cwd.display(), "physical directory changed");
        Ok(())
    }

    fn combine_path(&self, base: &str, name: &str) -> String {
        Path::new(base).join(name).to_string_lossy().into_owned()
    }

    fn directory_name(&self, path: &str) -> String {
        Path::new(path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn find_file(&self, name: &str) -> Result<Entry> {
        let path = self.resolve(name);
        match fs::metadata(&path) {
            Ok(metadata) => Ok(self.entry_for(&path, &metadata)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::FileNotFound(name.to_owned())),
            Err(e) => Err(e.into()),
        }
    }

    fn file_exists(&self, name: &str) -> bool {
        self.resolve(name).is_file()
    }

    fn directory_exists(&self, path: &str) -> bool {
        self.resolve(path).is_dir()
    }

    fn files(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for item in fs::read_dir(&self.cwd)? {
            let item = item?;
            let Ok(metadata) = fs::metadata(item.path()) else {
                // dangling symlink
                continue;
            };
            entries.push(self.entry_for(&item.path(), &metadata));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn files_matching(&self, pattern: &str) -> Result<Vec<Entry>> {
        let dir = self.resolve(super::path::directory_name(pattern));
        let glob = FileNameGlob::new(super::path::file_name(pattern))?;
        let mut entries = Vec::new();
        for item in fs::read_dir(&dir)? {
            let item = item?;
            let metadata = item.metadata()?;
            if metadata.is_file() && glob.is_match(&item.file_name().to_string_lossy()) {
                entries.push(self.file_entry(&item.path(), metadata.len()));
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn files_recursive(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for item in WalkDir::new(&self.cwd).sort_by_file_name() {
            let item = item.map_err(io::Error::from)?;
            if item.file_type().is_file() {
                let len = item.metadata().map_err(io::Error::from)?.len();
                entries.push(self.file_entry(item.path(), len));
            }
        }
        Ok(entries)
    }

    fn stats(&self) -> Result<FileSystemStats> {
        if let Some(stats) = self.stats.lock().get(&self.cwd) {
            return Ok(*stats);
        }
        let stats = Self::collect_stats(&self.cwd);
        self.stats.lock().insert(self.cwd.clone(), stats);
        Ok(stats)
    }

    fn directory_size(&self, path: &str) -> Result<u64> {
        let dir = self.resolve(path);
        if !dir.is_dir() {
            return Ok(0);
        }
        Ok(WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum())
    }

    fn open_stream(&self, entry: &Entry) -> Result<EntryStream> {
        Ok(EntryStream::Seekable(Box::new(File::open(&entry.name)?)))
    }

    fn open_view(&self, entry: &Entry) -> Result<MappedView> {
        let view = MappedView::open(&entry.name)?;
        view.set_frame_size(self.options.frame_size);
        Ok(view)
    }

    fn open_binary(&self, entry: &Entry) -> Result<BinaryReader> {
        let file = File::open(&entry.name)?;
        Ok(BinaryReader::new(file, entry.name.clone())?.with_encoding(self.options.default_encoding))
    }
}

impl std::fmt::Debug for PhysicalFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalFileSystem").field("cwd", &self.cwd).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(dir: &Path) -> PhysicalFileSystem {
        PhysicalFileSystem::new(dir, Arc::new(FormatRegistry::new()), Options::default()).unwrap()
    }

    #[test]
    fn lists_and_finds() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("b.png"), b"png").unwrap();
        fs::write(tmp.path().join("a.txt"), b"text!").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub").join("c.ogg"), b"ogg").unwrap();

        let fs_layer = layer(tmp.path());
        let names: Vec<String> = fs_layer
            .files()
            .unwrap()
            .iter()
            .map(|e| e.file_name().to_owned())
            .collect();
        assert_eq!(names, ["a.txt", "b.png", "sub"]);

        let png = fs_layer.find_file("b.png").unwrap();
        assert_eq!(png.kind, "image");
        assert_eq!(png.size, 3);
        assert!(fs_layer.find_file("sub").unwrap().is_directory());
        assert!(matches!(fs_layer.find_file("nope"), Err(Error::FileNotFound(_))));

        assert_eq!(fs_layer.files_recursive().unwrap().len(), 3);
        assert_eq!(fs_layer.files_matching("*.PNG").unwrap().len(), 1);
        assert_eq!(fs_layer.files_matching("sub/*.*").unwrap().len(), 1);
        assert_eq!(fs_layer.directory_size("sub").unwrap(), 3);
        assert_eq!(fs_layer.directory_size("missing").unwrap(), 0);
    }

    #[test]
    fn own_directory_and_stats() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("x").join("y")).unwrap();
        fs::write(tmp.path().join("x").join("y").join("f.bin"), [0u8; 10]).unwrap();

        let mut fs_layer = layer(tmp.path());
        let stats = fs_layer.stats().unwrap();
        assert_eq!((stats.total_files, stats.total_directories, stats.total_size), (1, 2, 10));

        fs_layer.set_current_directory("x").unwrap();
        assert!(fs_layer.current_directory().ends_with("x"));
        assert!(fs_layer.file_exists("y/f.bin"));
        assert!(matches!(
            fs_layer.set_current_directory("missing"),
            Err(Error::DirectoryNotFound(_))
        ));
        fs_layer.set_current_directory("..").unwrap();
        assert_eq!(Path::new(&fs_layer.current_directory()), fs::canonicalize(tmp.path()).unwrap());
    }
}
