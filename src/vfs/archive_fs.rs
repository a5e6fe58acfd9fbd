//! Layers backed by an opened archive.
//!
//! | Layer | Used for | Directories |
//! |-------|----------|-------------|
//! | [`TreeArchiveFs`] | hierarchic formats | derived from `/` or `\` in entry names |
//! | [`FlatArchiveFs`] | flat formats | none; the root is the only directory |
//!
//! Lookups ignore ASCII case and treat `/` and `\` alike, whatever mix of
//! separators the archive itself uses.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::layer::{FileSystem, FileSystemStats};
use super::path::{self, FileNameGlob};
use crate::archive::{ArchiveHandle, EntryStream};
use crate::entry::Entry;
use crate::reader::BinaryReader;
use crate::view::MappedView;
use crate::{Error, Result};

/// Comparison form of a name: ASCII-lowercased with `/` separators.
///
/// Byte offsets in the key match those in the original name.
fn key(name: &str) -> String {
    name.chars()
        .map(|c| if c == '\\' { '/' } else { c.to_ascii_lowercase() })
        .collect()
}

/// Archive entries indexed by [`key`].
struct Directory {
    arc: Arc<ArchiveHandle>,
    keys: Vec<String>,
    index: HashMap<String, usize>,
}

impl Directory {
    fn new(arc: Arc<ArchiveHandle>) -> Self {
        let keys: Vec<String> = arc.entries().iter().map(|e| key(&e.name)).collect();
        let mut index = HashMap::with_capacity(keys.len());
        for (i, k) in keys.iter().enumerate() {
            // first entry wins on duplicate names
            index.entry(k.clone()).or_insert(i);
        }
        Self { arc, keys, index }
    }

    fn entries(&self) -> &[Entry] {
        self.arc.entries()
    }

    fn get(&self, name: &str) -> Option<&Entry> {
        let k = key(name);
        self.index
            .get(k.trim_start_matches('/'))
            .map(|&i| &self.entries()[i])
    }

    /// Entries whose key starts with `prefix` (already a key).
    fn under<'s>(&'s self, prefix: &'s str) -> impl Iterator<Item = (&'s str, &'s Entry)> + 's {
        self.keys
            .iter()
            .zip(self.entries())
            .filter(move |(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.as_str(), e))
    }

    fn is_directory(&self, name: &str) -> bool {
        let mut prefix = key(name).trim_matches('/').to_owned();
        if prefix.is_empty() {
            return true;
        }
        prefix.push('/');
        self.under(&prefix).next().is_some()
    }

    fn open_stream(&self, entry: &Entry) -> Result<EntryStream> {
        self.arc.open_entry(entry)
    }

    fn open_view(&self, entry: &Entry) -> Result<MappedView> {
        self.arc.open_view(entry)
    }

    fn open_binary(&self, entry: &Entry) -> Result<BinaryReader> {
        self.arc.open_binary_entry(entry)
    }

    fn dispose(&self) {
        self.arc.dispose();
    }
}

/// Layer over a hierarchic archive.
pub struct TreeArchiveFs {
    dir: Directory,
    cwd: String,
    /// Separator used when building directory names, taken from the first
    /// entry name that has one.
    delimiter: char,
    stats: Mutex<HashMap<String, FileSystemStats>>,
}

impl TreeArchiveFs {
    pub fn new(arc: Arc<ArchiveHandle>) -> Self {
        let delimiter = arc
            .entries()
            .iter()
            .find_map(|e| e.name.chars().find(|&c| c == '/' || c == '\\'))
            .unwrap_or(path::DELIMITER);
        Self {
            dir: Directory::new(arc),
            cwd: String::new(),
            delimiter,
            stats: Mutex::new(HashMap::new()),
        }
    }

    fn join(&self, base: &str, name: &str) -> String {
        match (base.is_empty(), name.is_empty()) {
            (true, _) => name.to_owned(),
            (_, true) => base.to_owned(),
            _ if base.ends_with(['/', '\\']) => format!("{base}{name}"),
            _ => format!("{base}{}{name}", self.delimiter),
        }
    }

    /// Key prefix selecting everything below `path`, or `""` for the root.
    fn prefix_of(path: &str) -> String {
        let mut prefix = key(path).trim_matches('/').to_owned();
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix
    }

    fn collect_stats(&self, path: &str) -> FileSystemStats {
        let prefix = Self::prefix_of(path);
        let mut dirs = HashSet::new();
        let mut stats = FileSystemStats::default();
        for (k, entry) in self.dir.under(&prefix) {
            stats.total_files += 1;
            stats.total_size += entry.size;
            let rest = &k[prefix.len()..];
            for (sep, _) in rest.match_indices('/') {
                if sep > 0 {
                    dirs.insert(&rest[..sep]);
                }
            }
        }
        stats.total_directories = dirs.len() as u64;
        stats
    }
}

impl FileSystem for TreeArchiveFs {
    fn current_directory(&self) -> String {
        self.cwd.clone()
    }

    /// Names are taken from the archive root unless they start with `.` or
    /// `..`, which are relative to the current directory.
    fn set_current_directory(&mut self, path: &str) -> Result<()> {
        if path.is_empty() {
            self.cwd.clear();
            return Ok(());
        }
        let relative = path == path::PARENT
            || path == path::CURRENT
            || path.starts_with("./")
            || path.starts_with("../")
            || path.starts_with(".\\")
            || path.starts_with("..\\");
        let mut parts: Vec<&str> = Vec::new();
        if relative {
            parts.extend(self.cwd.split(['/', '\\']).filter(|p| !p.is_empty()));
        }
        for part in path.split(['/', '\\']) {
            match part {
                "" | path::CURRENT => {}
                path::PARENT => {
                    parts.pop();
                }
                part => parts.push(part),
            }
        }
        let mut buf = [0u8; 4];
        let delimiter: &str = self.delimiter.encode_utf8(&mut buf);
        let target = parts.join(delimiter);
        if !self.dir.is_directory(&target) {
            return Err(Error::DirectoryNotFound(path.to_owned()));
        }
        self.cwd = target;
        Ok(())
    }

    fn combine_path(&self, base: &str, name: &str) -> String {
        self.join(base, name)
    }

    fn directory_name(&self, path: &str) -> String {
        path::directory_name(path).to_owned()
    }

    fn find_file(&self, name: &str) -> Result<Entry> {
        let combined = self.join(&self.cwd, name);
        if let Some(entry) = self.dir.get(name).or_else(|| self.dir.get(&combined)) {
            return Ok(entry.clone());
        }
        if !name.is_empty() && self.dir.is_directory(name) {
            return Ok(Entry::directory(name.trim_matches(['/', '\\'])));
        }
        if !name.is_empty() && self.dir.is_directory(&combined) {
            return Ok(Entry::directory(combined));
        }
        Err(Error::FileNotFound(name.to_owned()))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.dir.get(name).is_some() || (!self.cwd.is_empty() && self.dir.get(&self.join(&self.cwd, name)).is_some())
    }

    fn directory_exists(&self, path: &str) -> bool {
        self.dir.is_directory(path)
    }

    fn files(&self) -> Result<Vec<Entry>> {
        let prefix = Self::prefix_of(&self.cwd);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (k, entry) in self.dir.under(&prefix) {
            let rest = &k[prefix.len()..];
            let skip = rest.len() - rest.trim_start_matches('/').len();
            match rest[skip..].find('/') {
                Some(sep) => {
                    let start = prefix.len() + skip;
                    let sub = &entry.name[start..start + sep];
                    if seen.insert(&rest[skip..skip + sep]) {
                        out.push(Entry::directory(self.join(&self.cwd, sub)));
                    }
                }
                None => out.push(entry.clone()),
            }
        }
        Ok(out)
    }

    fn files_matching(&self, pattern: &str) -> Result<Vec<Entry>> {
        let dir = match path::directory_name(pattern) {
            "" => self.cwd.as_str(),
            dir => dir,
        };
        let glob = FileNameGlob::new(path::file_name(pattern))?;
        let prefix = Self::prefix_of(dir);
        Ok(self
            .dir
            .under(&prefix)
            .filter(|(_, e)| glob.is_match(e.file_name()))
            .map(|(_, e)| e.clone())
            .collect())
    }

    fn files_recursive(&self) -> Result<Vec<Entry>> {
        let prefix = Self::prefix_of(&self.cwd);
        Ok(self.dir.under(&prefix).map(|(_, e)| e.clone()).collect())
    }

    fn stats(&self) -> Result<FileSystemStats> {
        let mut cache = self.stats.lock();
        let stats = *cache
            .entry(self.cwd.clone())
            .or_insert_with(|| self.collect_stats(&self.cwd));
        Ok(stats)
    }

    fn directory_size(&self, path: &str) -> Result<u64> {
        let prefix = Self::prefix_of(path);
        Ok(self.dir.under(&prefix).map(|(_, e)| e.size).sum())
    }

    fn open_stream(&self, entry: &Entry) -> Result<EntryStream> {
        self.dir.open_stream(entry)
    }

    fn open_view(&self, entry: &Entry) -> Result<MappedView> {
        self.dir.open_view(entry)
    }

    fn open_binary(&self, entry: &Entry) -> Result<BinaryReader> {
        self.dir.open_binary(entry)
    }

    fn archive(&self) -> Option<&Arc<ArchiveHandle>> {
        Some(&self.dir.arc)
    }

    fn dispose(&self) {
        self.stats.lock().clear();
        self.dir.dispose();
    }
}

impl fmt::Debug for TreeArchiveFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeArchiveFs")
            .field("archive", &self.dir.arc.name())
            .field("cwd", &self.cwd)
            .finish()
    }
}

/// Layer over an archive without directories.
pub struct FlatArchiveFs {
    dir: Directory,
}

impl FlatArchiveFs {
    pub fn new(arc: Arc<ArchiveHandle>) -> Self {
        Self {
            dir: Directory::new(arc),
        }
    }
}

impl FileSystem for FlatArchiveFs {
    fn current_directory(&self) -> String {
        String::new()
    }

    fn set_current_directory(&mut self, path: &str) -> Result<()> {
        match path {
            "" | path::CURRENT | path::PARENT | "/" | "\\" => Ok(()),
            _ => Err(Error::DirectoryNotFound(path.to_owned())),
        }
    }

    fn combine_path(&self, _base: &str, name: &str) -> String {
        name.to_owned()
    }

    fn directory_name(&self, _path: &str) -> String {
        String::new()
    }

    fn find_file(&self, name: &str) -> Result<Entry> {
        self.dir
            .get(name)
            .cloned()
            .ok_or_else(|| Error::FileNotFound(name.to_owned()))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.dir.get(name).is_some()
    }

    fn directory_exists(&self, path: &str) -> bool {
        matches!(path, "" | "/" | "\\")
    }

    fn files(&self) -> Result<Vec<Entry>> {
        Ok(self.dir.entries().to_vec())
    }

    fn files_matching(&self, pattern: &str) -> Result<Vec<Entry>> {
        let glob = FileNameGlob::new(pattern)?;
        Ok(self
            .dir
            .entries()
            .iter()
            .filter(|e| glob.is_match(&e.name))
            .cloned()
            .collect())
    }

    fn files_recursive(&self) -> Result<Vec<Entry>> {
        self.files()
    }

    fn stats(&self) -> Result<FileSystemStats> {
        let entries = self.dir.entries();
        Ok(FileSystemStats {
            total_files: entries.len() as u64,
            total_directories: 0,
            total_size: entries.iter().map(|e| e.size).sum(),
            last_modified: None,
        })
    }

    fn directory_size(&self, _path: &str) -> Result<u64> {
        Ok(0)
    }

    fn open_stream(&self, entry: &Entry) -> Result<EntryStream> {
        self.dir.open_stream(entry)
    }

    fn open_view(&self, entry: &Entry) -> Result<MappedView> {
        self.dir.open_view(entry)
    }

    fn open_binary(&self, entry: &Entry) -> Result<BinaryReader> {
        self.dir.open_binary(entry)
    }

    fn archive(&self) -> Option<&Arc<ArchiveHandle>> {
        Some(&self.dir.arc)
    }

    fn dispose(&self) {
        self.dir.dispose();
    }
}

impl fmt::Debug for FlatArchiveFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatArchiveFs")
            .field("archive", &self.dir.arc.name())
            .finish()
    }
}
