//! Memory-mapped random access over files and buffers.
//!
//! A [`MappedView`] describes a byte range of a backing object (an on-disk
//! file, an anonymous temp file, or an in-memory buffer). It never maps the
//! whole range up front; instead callers create one or more [`Frame`]s, each a
//! small movable window that is remapped on demand. This keeps address-space
//! usage bounded no matter how large the archive is, and lets many threads
//! read the same view through independent frames without sharing a cursor.
//!
//! ## Reserve contract
//! * [`Frame::reserve`] makes the window cover `[offset, offset + size)` if
//!   the view has that many bytes, and reports how many bytes are actually
//!   available from `offset`. The window never shrinks below
//!   [`PAGE_SIZE`](crate::options::PAGE_SIZE) and never extends past the end
//!   of the view.
//! * Scalar reads (`read_u32`, `read_u16_be`, ...) reserve strictly and fail
//!   with [`Error::Bounds`] when the value would be truncated.
//! * Bulk reads (`read`, `read_bytes`, `read_string`, `bytes`) reserve
//!   leniently and silently return fewer bytes.
//!
//! ## Ownership
//! Exactly one owner holds a `MappedView` (it is not `Clone`); frames,
//! streams and sub-views keep the backing alive but become unusable once the
//! owner calls [`MappedView::dispose`]. Sub-views created with
//! [`MappedView::slice`] are owned separately and survive the disposal of the
//! view they were cut from.

mod frame;
mod stream;

pub use frame::Frame;
pub use stream::ViewStream;

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use memmap2::{Mmap, MmapOptions};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::options::{INITIAL_CAPACITY, Options, PAGE_SIZE};
use crate::{Error, Result};

/// Object a view maps from.
enum Backing {
    File(File),
    Memory(Arc<[u8]>),
}

/// State shared between a view and every frame/stream created from it.
pub(crate) struct ViewShared {
    name: String,
    /// Offset of this view inside the backing object.
    base: u64,
    len: u64,
    frame_size: AtomicU64,
    disposed: AtomicBool,
    backing: RwLock<Option<Arc<Backing>>>,
}

impl ViewShared {
    fn new(name: String, base: u64, len: u64, backing: Arc<Backing>) -> Arc<Self> {
        Arc::new(Self {
            name,
            base,
            len,
            frame_size: AtomicU64::new(PAGE_SIZE),
            disposed: AtomicBool::new(false),
            backing: RwLock::new(Some(backing)),
        })
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    pub(crate) fn frame_size(&self) -> u64 {
        self.frame_size.load(Ordering::Relaxed)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Map `[offset, offset + size)` of this view. `size` must already be
    /// clipped to the view length.
    pub(crate) fn map_window(&self, offset: u64, size: u64) -> Result<Window> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        let guard = self.backing.read();
        let backing = guard.as_ref().ok_or(Error::Disposed)?;
        if size == 0 {
            return Ok(Window::Empty);
        }
        match &**backing {
            Backing::File(file) => {
                let len = usize::try_from(size).map_err(|_| Error::Bounds)?;
                // SAFETY: the file is opened read-only and the mapping is
                // never handed out mutably. Concurrent truncation by another
                // process is the usual mmap caveat shared by every reader.
                let mmap = unsafe {
                    MmapOptions::new()
                        .offset(self.base + offset)
                        .len(len)
                        .map(file)?
                };
                Ok(Window::Mapped(mmap))
            }
            Backing::Memory(data) => {
                let start = usize::try_from(self.base + offset).map_err(|_| Error::Bounds)?;
                let end = start + size as usize;
                Ok(Window::Memory {
                    data: Arc::clone(data),
                    start,
                    end,
                })
            }
        }
    }
}

/// Currently mapped bytes of a frame.
pub(crate) enum Window {
    Empty,
    Mapped(Mmap),
    Memory {
        data: Arc<[u8]>,
        start: usize,
        end: usize,
    },
}

impl Window {
    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Window::Empty => &[],
            Window::Mapped(mmap) => mmap,
            Window::Memory { data, start, end } => &data[*start..*end],
        }
    }
}

/// Byte-addressable read-only view over a file or buffer.
pub struct MappedView {
    shared: Arc<ViewShared>,
}

impl MappedView {
    /// Open `path` for memory-mapped reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let name = path.to_string_lossy().into_owned();
        Ok(Self::from_file(file, name, len))
    }

    fn from_file(file: File, name: String, len: u64) -> Self {
        Self {
            shared: ViewShared::new(name, 0, len, Arc::new(Backing::File(file))),
        }
    }

    /// Wrap an in-memory buffer.
    pub fn from_bytes(data: impl Into<Arc<[u8]>>, name: impl Into<String>) -> Self {
        let data: Arc<[u8]> = data.into();
        let len = data.len() as u64;
        Self {
            shared: ViewShared::new(name.into(), 0, len, Arc::new(Backing::Memory(data))),
        }
    }

    /// Copy up to `length` bytes of a (possibly non-seekable) source into a
    /// new view.
    ///
    /// Sources larger than [`Options::materialize_threshold`] are spilled to
    /// an anonymous temp file which is then mapped; smaller ones are copied
    /// to memory. Pass `u64::MAX` when the length is unknown. The resulting
    /// view is as long as the number of bytes actually read.
    pub fn from_reader<R: Read>(
        reader: R,
        name: impl Into<String>,
        length: u64,
        options: &Options,
    ) -> Result<Self> {
        let name = name.into();
        let mut limited = reader.take(length);
        if length > options.materialize_threshold {
            debug!(%name, length, "materializing stream to temp file");
            let mut file = tempfile::tempfile()?;
            let copied = io::copy(&mut limited, &mut file)?;
            file.flush()?;
            let view = Self::from_file(file, name, copied);
            view.set_frame_size(options.frame_size);
            return Ok(view);
        }
        let mut data = Vec::with_capacity(length.min(INITIAL_CAPACITY) as usize);
        limited.read_to_end(&mut data)?;
        let view = Self::from_bytes(data, name);
        view.set_frame_size(options.frame_size);
        Ok(view)
    }

    /// Name of the file or entry this view was created from.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Length of the view in bytes.
    pub fn len(&self) -> u64 {
        self.shared.len
    }

    /// Whether the view has no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.shared.len == 0
    }

    /// Change the initial window size of frames created from now on.
    pub fn set_frame_size(&self, size: u64) {
        self.shared
            .frame_size
            .store(size.max(PAGE_SIZE), Ordering::Relaxed);
    }

    /// Create an independent movable window over this view.
    pub fn frame(&self) -> Frame {
        Frame::new(Arc::clone(&self.shared))
    }

    /// Create a sub-view of `[offset, offset + size)`, clipped to the view
    /// length.
    ///
    /// The sub-view shares the backing object but is disposed independently.
    pub fn slice(&self, offset: u64, size: u64) -> Result<MappedView> {
        self.slice_named(offset, size, self.shared.name.clone())
    }

    /// Like [`MappedView::slice`], giving the sub-view its own name.
    pub fn slice_named(&self, offset: u64, size: u64, name: impl Into<String>) -> Result<MappedView> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        if offset > self.len() {
            return Err(Error::Bounds);
        }
        let size = size.min(self.len() - offset);
        let backing = self.shared.backing.read().clone().ok_or(Error::Disposed)?;
        let shared = ViewShared::new(name.into(), self.shared.base + offset, size, backing);
        shared
            .frame_size
            .store(self.shared.frame_size(), Ordering::Relaxed);
        Ok(MappedView { shared })
    }

    /// Bounded `Read + Seek` stream over `[offset, offset + size)`.
    pub fn stream(&self, offset: u64, size: u64) -> Result<ViewStream> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        if offset > self.len() {
            return Err(Error::Bounds);
        }
        let size = size.min(self.len() - offset);
        Ok(ViewStream::new(self.frame(), offset, size))
    }

    /// Stream over the whole view.
    pub fn stream_all(&self) -> Result<ViewStream> {
        self.stream(0, self.len())
    }

    /// First four bytes as a little-endian `u32`, or 0 if the view is
    /// shorter than that.
    pub fn signature(&self) -> Result<u32> {
        if self.len() < 4 {
            return Ok(0);
        }
        self.frame().read_u32(0)
    }

    /// Copy the whole view into memory.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut frame = self.frame();
        let len = usize::try_from(self.len()).map_err(|_| Error::Bounds)?;
        let mut out = vec![0u8; len];
        let mut done = 0usize;
        while done < len {
            let n = frame.read(done as u64, &mut out[done..])?;
            if n == 0 {
                return Err(Error::EndOfStream);
            }
            done += n;
        }
        Ok(out)
    }

    /// Release the backing object.
    ///
    /// Returns `true` if this call released it and `false` if the view had
    /// already been disposed. Frames and streams created from the view fail
    /// with [`Error::Disposed`] afterwards.
    pub fn dispose(&self) -> bool {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shared.backing.write().take();
        trace!(name = %self.shared.name, "view disposed");
        true
    }

    /// Whether [`MappedView::dispose`] has been called.
    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }
}

impl fmt::Debug for MappedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedView")
            .field("name", &self.shared.name)
            .field("len", &self.shared.len)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn slice_is_clipped_and_independent() {
        let view = MappedView::from_bytes(numbered(100), "buf");
        let sub = view.slice(90, 50).unwrap();
        assert_eq!(sub.len(), 10);
        assert_eq!(sub.frame().read_u8(0).unwrap(), 90);

        assert!(view.dispose());
        assert!(view.frame().read_u8(0).unwrap_err().is_disposed());
        // The sub-view keeps its own reference to the backing.
        assert_eq!(sub.to_vec().unwrap(), numbered(100)[90..].to_vec());
        assert!(matches!(view.slice(0, 1), Err(Error::Disposed)));
    }

    #[test]
    fn slice_past_end_is_bounds_error() {
        let view = MappedView::from_bytes(numbered(8), "buf");
        assert!(matches!(view.slice(9, 1), Err(Error::Bounds)));
        assert_eq!(view.slice(8, 1).unwrap().len(), 0);
    }

    #[test]
    fn dispose_is_idempotent() {
        let view = MappedView::from_bytes(numbered(8), "buf");
        assert!(view.dispose());
        assert!(!view.dispose());
        assert!(view.is_disposed());
    }

    #[test]
    fn file_backed_view_reads_far_offsets() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data = numbered(3 * PAGE_SIZE as usize + 17);
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();

        let view = MappedView::open(tmp.path()).unwrap();
        assert_eq!(view.len(), data.len() as u64);
        let mut frame = view.frame();
        let far = 2 * PAGE_SIZE + 5;
        assert_eq!(frame.read_u8(far).unwrap(), data[far as usize]);
        assert_eq!(view.to_vec().unwrap(), data);
    }

    #[test]
    fn from_reader_spills_large_sources() {
        let options = Options {
            materialize_threshold: 16,
            ..Options::default()
        };
        let data = numbered(64);
        let view = MappedView::from_reader(&data[..], "pipe", u64::MAX, &options).unwrap();
        assert_eq!(view.len(), 64);
        assert_eq!(view.to_vec().unwrap(), data);

        let small = MappedView::from_reader(&data[..], "pipe", 10, &options).unwrap();
        assert_eq!(small.to_vec().unwrap(), data[..10].to_vec());
    }

    #[test]
    fn signature_of_short_view_is_zero() {
        assert_eq!(MappedView::from_bytes(vec![1, 2, 3], "x").signature().unwrap(), 0);
        assert_eq!(
            MappedView::from_bytes(b"PFS0xx".to_vec(), "x").signature().unwrap(),
            u32::from_le_bytes(*b"PFS0")
        );
    }
}
