//! Opened archives and the decoder plugin contract.
//!
//! An [`ArchiveHandle`] is produced by probing the registry's candidate
//! decoders against a [`MappedView`]: the first [`ArchiveDecoder::try_open`]
//! returning an [`ArchiveIndex`] wins. The handle then owns the view, the
//! parsed entries and the decoder, and serves entry streams on demand.
//!
//! ## Provenance
//!
//! | Origin | Re-open after [`ArchiveHandle::dispose`] |
//! |--------|------------------------------------------|
//! | file on disk ([`ArchiveHandle::open_path`]) | map the file again |
//! | entry of another archive ([`ArchiveHandle::set_parent`]) | re-extract from the parent, if it is still alive |
//! | anything else | none; [`Error::Disposed`] |
//!
//! A nested handle holds only a [`Weak`] link to its parent, so dropping
//! the parent is never blocked by its children.

use std::any::Any;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::entry::Entry;
use crate::options::{INITIAL_CAPACITY, Options};
use crate::reader::{BinaryReader, ReadSeek};
use crate::registry::{FormatDescriptor, FormatRegistry, Probe};
use crate::text::Encoding;
use crate::vfs::path;
use crate::view::{Frame, MappedView, ViewStream};
use crate::{Error, Result, compression};

/// Upper bound (exclusive) used by [`is_sane_count`].
pub const MAX_SANE_COUNT: u64 = 0x40000;

/// Whether a decoded entry count is plausible.
pub fn is_sane_count(count: u64) -> bool {
    is_sane_count_max(count, MAX_SANE_COUNT)
}

/// Whether `count` is in `1..max`.
pub fn is_sane_count_max(count: u64, max: u64) -> bool {
    count > 0 && count < max
}

/// Whether `name` is usable as an entry name: not blank and not rooted.
pub fn is_valid_entry_name(name: &str) -> bool {
    !name.trim().is_empty() && !path::is_path_rooted(name)
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(Error::Canceled)` once [`CancelToken::cancel`] was called.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(Error::Canceled);
        }
        Ok(())
    }
}

/// Reply of an extraction callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOperation {
    Abort,
    Skip,
    Continue,
}

/// What a decoder hands back after recognizing an archive.
pub struct ArchiveIndex {
    pub entries: Vec<Entry>,
    /// Decoder-private data (keys, tables) needed later by `open_entry`.
    pub state: Option<Box<dyn Any + Send + Sync>>,
}

impl ArchiveIndex {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            state: None,
        }
    }

    pub fn with_state(mut self, state: impl Any + Send + Sync) -> Self {
        self.state = Some(Box::new(state));
        self
    }
}

impl fmt::Debug for ArchiveIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveIndex")
            .field("entries", &self.entries.len())
            .field("state", &self.state.is_some())
            .finish()
    }
}

/// Information available to a decoder while probing.
pub struct ProbeContext<'a> {
    name: &'a str,
    registry: &'a FormatRegistry,
    contained: &'a [String],
    cancel: &'a CancelToken,
    encoding: Encoding,
}

impl<'a> ProbeContext<'a> {
    /// Name of the file being probed.
    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn registry(&self) -> &'a FormatRegistry {
        self.registry
    }

    /// Encoding for names that do not declare one.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Fails with [`Error::Canceled`] if the user aborted.
    pub fn check_canceled(&self) -> Result<()> {
        self.cancel.check()
    }

    /// Entry named `name` with its type guessed from the extension.
    pub fn create_entry(&self, name: impl Into<String>) -> Entry {
        let name = name.into();
        let kind = self.registry.type_from_name(&name, self.contained, 0);
        Entry::new(name, kind)
    }
}

/// Byte stream of one entry.
pub enum EntryStream {
    Seekable(Box<dyn ReadSeek + Send>),
    Sequential(Box<dyn Read + Send>),
}

impl EntryStream {
    /// Stream with no bytes.
    pub fn empty() -> Self {
        EntryStream::Seekable(Box::new(Cursor::new(Vec::new())))
    }

    pub fn is_seekable(&self) -> bool {
        matches!(self, EntryStream::Seekable(_))
    }
}

impl From<ViewStream> for EntryStream {
    fn from(stream: ViewStream) -> Self {
        EntryStream::Seekable(Box::new(stream))
    }
}

impl From<Vec<u8>> for EntryStream {
    fn from(data: Vec<u8>) -> Self {
        EntryStream::Seekable(Box::new(Cursor::new(data)))
    }
}

impl Read for EntryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EntryStream::Seekable(s) => s.read(buf),
            EntryStream::Sequential(s) => s.read(buf),
        }
    }
}

impl fmt::Debug for EntryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryStream::Seekable(_) => "EntryStream::Seekable",
            EntryStream::Sequential(_) => "EntryStream::Sequential",
        })
    }
}

/// Format-specific archive reader.
///
/// Implementations are registered through
/// [`FormatDescriptor::with_decoder`](crate::FormatDescriptor::with_decoder)
/// and must be stateless; per-archive data goes into
/// [`ArchiveIndex::state`].
pub trait ArchiveDecoder: Send + Sync {
    /// Recognize and index `view`.
    ///
    /// `Ok(None)` and `Err(_)` both mean "not this format"; only
    /// [`Error::Canceled`] stops the probe loop.
    fn try_open(&self, view: &MappedView, cx: &ProbeContext<'_>) -> Result<Option<ArchiveIndex>>;

    /// Open the contents of `entry`.
    ///
    /// The default streams `[offset, offset + size)` and unpacks Zstandard
    /// and LZ4 entries.
    fn open_entry(&self, arc: &ArchiveHandle, entry: &Entry) -> Result<EntryStream> {
        open_stored_entry(arc, entry)
    }

    /// Whether `entry` is stored verbatim, so a sub-view of the archive is
    /// its exact contents.
    fn stores_plain(&self, entry: &Entry) -> bool {
        !entry.is_packed()
    }
}

/// Stream an entry stored at `[offset, offset + size)`, unpacking it if it
/// is marked packed.
pub fn open_stored_entry(arc: &ArchiveHandle, entry: &Entry) -> Result<EntryStream> {
    if entry.size == 0 {
        return Ok(EntryStream::empty());
    }
    let stream = arc.stream(entry.offset, entry.size)?;
    match &entry.packed {
        None => Ok(stream.into()),
        Some(packed) => compression::unpack(stream, packed),
    }
}

enum Origin {
    Detached,
    Physical(PathBuf),
    Nested {
        parent: Weak<ArchiveHandle>,
        entry: Entry,
    },
}

/// An opened archive.
pub struct ArchiveHandle {
    name: String,
    view: RwLock<MappedView>,
    entries: Vec<Entry>,
    state: Option<Box<dyn Any + Send + Sync>>,
    format: Arc<FormatDescriptor>,
    decoder: Arc<dyn ArchiveDecoder>,
    origin: Origin,
    options: Options,
}

impl ArchiveHandle {
    /// Open the file at `path`.
    pub fn open_path(path: impl AsRef<Path>, registry: &FormatRegistry, options: &Options) -> Result<Self> {
        Self::open_path_with(path, registry, options, &CancelToken::default())
    }

    /// Like [`ArchiveHandle::open_path`], giving up when `cancel` fires.
    pub fn open_path_with(
        path: impl AsRef<Path>,
        registry: &FormatRegistry,
        options: &Options,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let path = path.as_ref();
        let view = MappedView::open(path)?;
        view.set_frame_size(options.frame_size);
        let mut handle = Self::open_with(view, registry, options, &[], cancel)?;
        handle.origin = Origin::Physical(path.to_path_buf());
        Ok(handle)
    }

    /// Probe `view` against every candidate archive decoder.
    pub fn open(view: MappedView, registry: &FormatRegistry, options: &Options) -> Result<Self> {
        Self::open_with(view, registry, options, &[], &CancelToken::default())
    }

    /// Like [`ArchiveHandle::open`] but returns `Ok(None)` when no decoder
    /// recognizes the view.
    pub fn try_open(view: MappedView, registry: &FormatRegistry, options: &Options) -> Result<Option<Self>> {
        match Self::open(view, registry, options) {
            Ok(handle) => Ok(Some(handle)),
            Err(Error::UnknownFormat { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Probe with the enclosing archive's contained-formats `hint` and a
    /// cancellation token.
    pub fn open_with(
        view: MappedView,
        registry: &FormatRegistry,
        options: &Options,
        hint: &[String],
        cancel: &CancelToken,
    ) -> Result<Self> {
        let name = view.name().to_owned();
        if view.len() < 4 {
            return Err(Error::unknown_format(name));
        }
        let signature = view.signature()?;
        let probe = Probe::new(&name, signature, view.len()).with_hint(hint);
        let mut last_error = None;

        for format in registry.find_archive_formats(probe) {
            let Some(decoder) = format.decoder() else {
                continue;
            };
            cancel.check()?;
            let cx = ProbeContext {
                name: &name,
                registry,
                contained: format.contained_formats(),
                cancel,
                encoding: options.default_encoding,
            };
            let attempt = panic::catch_unwind(AssertUnwindSafe(|| decoder.try_open(&view, &cx)))
                .unwrap_or_else(|_| {
                    warn!(tag = format.tag(), %name, "decoder panicked while probing");
                    Err(Error::InvalidFormat("decoder panicked"))
                });
            match attempt {
                Ok(Some(index)) => {
                    if let Some(bad) = index.entries.iter().find(|e| !e.check_placement(view.len())) {
                        warn!(tag = format.tag(), %name, entry = %bad, "entry lies outside the archive");
                        last_error = Some(Error::InvalidFormat("entry lies outside the archive"));
                        continue;
                    }
                    debug!(tag = format.tag(), %name, entries = index.entries.len(), "archive opened");
                    return Ok(Self {
                        name: name.clone(),
                        view: RwLock::new(view),
                        entries: index.entries,
                        state: index.state,
                        format: Arc::clone(format),
                        decoder: Arc::clone(decoder),
                        origin: Origin::Detached,
                        options: options.clone(),
                    });
                }
                Ok(None) => {}
                Err(Error::Canceled) => return Err(Error::Canceled),
                Err(e) => {
                    debug!("[{}] {}: {}", format.tag(), name, e);
                    last_error = Some(e);
                }
            }
        }
        Err(Error::UnknownFormat {
            name,
            source: last_error.map(Box::new),
        })
    }

    /// Record that this archive was extracted from `entry` of `parent`.
    ///
    /// When `source` is given it is read into memory and becomes the
    /// handle's backing, so the archive stays usable after the parent is
    /// disposed.
    pub fn set_parent(&mut self, parent: &Arc<ArchiveHandle>, entry: Entry, source: Option<EntryStream>) -> Result<()> {
        if let Some(mut source) = source {
            let mut data = Vec::with_capacity(entry.unpacked_size().min(INITIAL_CAPACITY) as usize);
            source.read_to_end(&mut data)?;
            let view = MappedView::from_bytes(data, self.name.clone());
            view.set_frame_size(self.options.frame_size);
            *self.view.get_mut() = view;
        }
        self.origin = Origin::Nested {
            parent: Arc::downgrade(parent),
            entry,
        };
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entries in the order the decoder listed them.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn format(&self) -> &Arc<FormatDescriptor> {
        &self.format
    }

    pub fn tag(&self) -> &str {
        self.format.tag()
    }

    pub fn is_hierarchic(&self) -> bool {
        self.format.is_hierarchic()
    }

    pub fn contained_formats(&self) -> &[String] {
        self.format.contained_formats()
    }

    /// Decoder-private state of the given type.
    pub fn state<T: Any>(&self) -> Option<&T> {
        self.state.as_deref().and_then(|s| s.downcast_ref())
    }

    /// Length of the archive's view.
    pub fn len(&self) -> u64 {
        self.view.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_nested(&self) -> bool {
        matches!(self.origin, Origin::Nested { .. })
    }

    /// The parent archive, if this one is nested and the parent is alive.
    pub fn parent(&self) -> Option<Arc<ArchiveHandle>> {
        match &self.origin {
            Origin::Nested { parent, .. } => parent.upgrade(),
            _ => None,
        }
    }

    /// The parent entry this archive was opened from.
    pub fn source_entry(&self) -> Option<&Entry> {
        match &self.origin {
            Origin::Nested { entry, .. } => Some(entry),
            _ => None,
        }
    }

    /// Path of the file this archive was opened from, if it is on disk.
    pub fn source_path(&self) -> Option<&Path> {
        match &self.origin {
            Origin::Physical(path) => Some(path),
            _ => None,
        }
    }

    /// Fresh frame over the archive's view.
    pub fn frame(&self) -> Frame {
        self.view.read().frame()
    }

    /// Bounded stream over `[offset, offset + size)` of the archive's view.
    pub fn stream(&self, offset: u64, size: u64) -> Result<ViewStream> {
        self.view.read().stream(offset, size)
    }

    /// Open `entry`, re-opening the archive once if it was disposed.
    pub fn open_entry(&self, entry: &Entry) -> Result<EntryStream> {
        match self.decoder.open_entry(self, entry) {
            Err(e) if e.is_disposed() => {
                if !self.reopen()? {
                    return Err(e);
                }
                self.decoder.open_entry(self, entry)
            }
            result => result,
        }
    }

    /// Open `entry` as a view: a slice of the archive when the entry is
    /// stored verbatim, otherwise a materialized copy of its contents.
    pub fn open_view(&self, entry: &Entry) -> Result<MappedView> {
        if self.decoder.stores_plain(entry) {
            let slice = self.view.read().slice_named(entry.offset, entry.size, entry.name.clone());
            return match slice {
                Err(e) if e.is_disposed() => {
                    if !self.reopen()? {
                        return Err(e);
                    }
                    self.view.read().slice_named(entry.offset, entry.size, entry.name.clone())
                }
                result => result,
            };
        }
        let stream = self.open_entry(entry)?;
        let length = match &entry.packed {
            Some(packed) if packed.unpacked_size > 0 => packed.unpacked_size,
            Some(_) => u64::MAX,
            None => entry.size,
        };
        MappedView::from_reader(stream, entry.name.clone(), length, &self.options)
    }

    /// Open `entry` as a seekable stream, buffering it in memory if the
    /// decoder only produces a sequential one.
    pub fn open_seekable_entry(&self, entry: &Entry) -> Result<Box<dyn ReadSeek + Send>> {
        match self.open_entry(entry)? {
            EntryStream::Seekable(stream) => Ok(stream),
            EntryStream::Sequential(mut stream) => {
                let mut data = Vec::with_capacity(entry.unpacked_size().min(INITIAL_CAPACITY) as usize);
                stream.read_to_end(&mut data)?;
                Ok(Box::new(Cursor::new(data)))
            }
        }
    }

    /// Open `entry` as a [`BinaryReader`].
    pub fn open_binary_entry(&self, entry: &Entry) -> Result<BinaryReader> {
        let stream = self.open_seekable_entry(entry)?;
        Ok(BinaryReader::new(stream, entry.name.clone())?.with_encoding(self.options.default_encoding))
    }

    /// Replace a disposed view from the handle's origin.
    fn reopen(&self) -> Result<bool> {
        let view = match &self.origin {
            Origin::Detached => return Ok(false),
            Origin::Physical(path) => {
                debug!(name = %self.name, path = %path.display(), "re-mapping disposed archive");
                MappedView::open(path)?
            }
            Origin::Nested { parent, entry } => {
                let Some(parent) = parent.upgrade() else {
                    debug!(name = %self.name, "parent archive is gone, cannot re-open");
                    return Ok(false);
                };
                debug!(name = %self.name, parent = parent.name(), "re-extracting archive from parent");
                let mut stream = parent.open_entry(entry)?;
                let mut data = Vec::with_capacity(entry.unpacked_size().min(INITIAL_CAPACITY) as usize);
                stream.read_to_end(&mut data)?;
                MappedView::from_bytes(data, self.name.clone())
            }
        };
        view.set_frame_size(self.options.frame_size);
        *self.view.write() = view;
        Ok(true)
    }

    /// Release the view. Returns whether this call released it.
    pub fn dispose(&self) -> bool {
        let released = self.view.read().dispose();
        if released {
            trace!(name = %self.name, "archive disposed");
        }
        released
    }

    pub fn is_disposed(&self) -> bool {
        self.view.read().is_disposed()
    }

    /// Extract every entry under `target` in ascending offset order.
    ///
    /// `callback` receives the running index and the entry and decides
    /// whether to extract, skip, or stop. Returns the number of entries
    /// written.
    pub fn extract_all<F>(&self, target: &Path, mut callback: F) -> Result<usize>
    where
        F: FnMut(usize, &Entry) -> ArchiveOperation,
    {
        let mut ordered: Vec<&Entry> = self.entries.iter().collect();
        ordered.sort_by_key(|e| e.offset);
        let mut written = 0;
        for (i, entry) in ordered.into_iter().enumerate() {
            match callback(i, entry) {
                ArchiveOperation::Abort => break,
                ArchiveOperation::Skip => continue,
                ArchiveOperation::Continue => {}
            }
            self.extract(entry, target)?;
            written += 1;
        }
        Ok(written)
    }

    /// Extract one entry under `target`, returning the path written.
    ///
    /// Entry names are sanitized so the result never escapes `target`.
    pub fn extract(&self, entry: &Entry, target: &Path) -> Result<PathBuf> {
        let dest = target.join(path::sanitize_relative(&entry.name));
        if entry.is_directory() {
            fs::create_dir_all(&dest)?;
            return Ok(dest);
        }
        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut input = self.open_entry(entry)?;
        let mut output = File::create(&dest)?;
        io::copy(&mut input, &mut output)?;
        Ok(dest)
    }
}

impl fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("name", &self.name)
            .field("format", &self.format.tag())
            .field("entries", &self.entries.len())
            .field("nested", &self.is_nested())
            .finish()
    }
}
