use std::fmt;
use std::sync::Arc;

use super::{ViewShared, Window};
use crate::text::Encoding;
use crate::{Error, Result};

/// Movable window over a [`MappedView`](super::MappedView).
///
/// All offsets are absolute positions in the view. A frame starts unmapped
/// and maps the first range that is asked of it; later requests that fall
/// outside the current window remap it.
pub struct Frame {
    shared: Arc<ViewShared>,
    offset: u64,
    size: u64,
    window: Window,
}

macro_rules! scalar_reads {
    ($($ty:ty => $le:ident, $be:ident;)*) => {$(
        #[doc = concat!("Read a little-endian `", stringify!($ty), "` at `offset`.")]
        pub fn $le(&mut self, offset: u64) -> Result<$ty> {
            Ok(<$ty>::from_le_bytes(self.array(offset)?))
        }

        #[doc = concat!("Read a big-endian `", stringify!($ty), "` at `offset`.")]
        pub fn $be(&mut self, offset: u64) -> Result<$ty> {
            Ok(<$ty>::from_be_bytes(self.array(offset)?))
        }
    )*};
}

impl Frame {
    pub(crate) fn new(shared: Arc<ViewShared>) -> Self {
        Self {
            shared,
            offset: 0,
            size: 0,
            window: Window::Empty,
        }
    }

    /// Start of the currently mapped window.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of the currently mapped window.
    pub fn reserved(&self) -> u64 {
        self.size
    }

    /// Length of the underlying view.
    pub fn view_len(&self) -> u64 {
        self.shared.len()
    }

    /// Ensure `[offset, offset + size)` is mapped, as far as the view allows.
    ///
    /// Returns the number of bytes available in the window from `offset`,
    /// which may be more than `size` when the window already extends further
    /// and less when the view ends first. Fails with [`Error::Bounds`] when
    /// `offset` lies past the end of the view.
    pub fn reserve(&mut self, offset: u64, size: u64) -> Result<u64> {
        if self.shared.is_disposed() {
            return Err(Error::Disposed);
        }
        let end = self.offset + self.size;
        // a zero-size reserve at the window's end still moves on if the view
        // continues
        let at_edge = offset == end && offset < self.shared.len();
        if offset < self.offset || offset.saturating_add(size) > end || at_edge {
            self.remap(offset, size)?;
        }
        Ok(self.offset + self.size - offset)
    }

    /// Like [`Frame::reserve`], but fails with [`Error::Bounds`] unless the
    /// full `size` bytes are available.
    pub fn strict_reserve(&mut self, offset: u64, size: u64) -> Result<()> {
        if self.reserve(offset, size)? < size {
            return Err(Error::Bounds);
        }
        Ok(())
    }

    fn remap(&mut self, offset: u64, size: u64) -> Result<()> {
        let len = self.shared.len();
        if offset > len {
            return Err(Error::Bounds);
        }
        let size = size.max(self.shared.frame_size()).min(len - offset);
        // Drop the old mapping before creating the new one.
        self.window = Window::Empty;
        self.window = self.shared.map_window(offset, size)?;
        self.offset = offset;
        self.size = size;
        Ok(())
    }

    /// Slice of the window; the caller has reserved at least `len` bytes.
    fn window_slice(&self, offset: u64, len: usize) -> &[u8] {
        let start = (offset - self.offset) as usize;
        &self.window.as_slice()[start..start + len]
    }

    fn array<const N: usize>(&mut self, offset: u64) -> Result<[u8; N]> {
        self.strict_reserve(offset, N as u64)?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.window_slice(offset, N));
        Ok(buf)
    }

    /// Read one byte at `offset`.
    pub fn read_u8(&mut self, offset: u64) -> Result<u8> {
        Ok(self.array::<1>(offset)?[0])
    }

    /// Read one signed byte at `offset`.
    pub fn read_i8(&mut self, offset: u64) -> Result<i8> {
        Ok(self.array::<1>(offset)?[0] as i8)
    }

    scalar_reads! {
        u16 => read_u16, read_u16_be;
        i16 => read_i16, read_i16_be;
        u32 => read_u32, read_u32_be;
        i32 => read_i32, read_i32_be;
        u64 => read_u64, read_u64_be;
        i64 => read_i64, read_i64_be;
    }

    /// Borrow up to `count` bytes at `offset`; shorter near the end of the
    /// view.
    pub fn bytes(&mut self, offset: u64, count: usize) -> Result<&[u8]> {
        let available = self.reserve(offset, count as u64)?;
        let n = count.min(available as usize);
        Ok(self.window_slice(offset, n))
    }

    /// Copy up to `buf.len()` bytes at `offset` into `buf`, returning the
    /// number copied.
    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let src = self.bytes(offset, buf.len())?;
        let n = src.len();
        buf[..n].copy_from_slice(src);
        Ok(n)
    }

    /// Copy up to `count` bytes at `offset` into a new vector.
    pub fn read_bytes(&mut self, offset: u64, count: usize) -> Result<Vec<u8>> {
        Ok(self.bytes(offset, count)?.to_vec())
    }

    /// Decode a string of at most `max` bytes at `offset`, stopping at the
    /// first terminator (aligned to the encoding's code unit).
    pub fn read_string(&mut self, offset: u64, max: usize, encoding: Encoding) -> Result<String> {
        let src = self.bytes(offset, max)?;
        Ok(encoding.decode_cstring(src))
    }

    /// Whether the bytes at `offset` equal `expected`. A range that runs
    /// past the end of the view is never equal.
    pub fn bytes_equal(&mut self, offset: u64, expected: &[u8]) -> Result<bool> {
        if offset > self.view_len() {
            return Ok(false);
        }
        let src = self.bytes(offset, expected.len())?;
        Ok(src == expected)
    }

    /// Case-sensitive comparison against an ASCII string.
    pub fn ascii_equal(&mut self, offset: u64, expected: &str) -> Result<bool> {
        self.bytes_equal(offset, expected.as_bytes())
    }
}

impl Clone for Frame {
    /// The clone is an independent, initially unmapped window over the same
    /// view.
    fn clone(&self) -> Self {
        Frame::new(Arc::clone(&self.shared))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("view_len", &self.shared.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::options::PAGE_SIZE;
    use crate::view::MappedView;
    use crate::{Encoding, Error};

    fn numbered(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn reserve_reports_available_bytes() {
        let view = MappedView::from_bytes(numbered(10_000), "buf");
        let mut frame = view.frame();
        // The window is never smaller than a page.
        assert_eq!(frame.reserve(0, 4).unwrap(), PAGE_SIZE);
        // Already covered: report what remains of the window.
        assert_eq!(frame.reserve(100, 4).unwrap(), PAGE_SIZE - 100);
        // Near the end the window is clipped to the view.
        assert_eq!(frame.reserve(9_990, 64).unwrap(), 10);
        assert_eq!(frame.reserve(10_000, 1).unwrap(), 0);
        assert!(matches!(frame.reserve(10_001, 1), Err(Error::Bounds)));
    }

    #[test]
    fn empty_reserve_at_window_end_moves_on() {
        let data = numbered(10_000);
        let view = MappedView::from_bytes(data.clone(), "buf");
        let mut frame = view.frame();
        assert_eq!(frame.reserve(0, 4).unwrap(), PAGE_SIZE);
        let more = frame.reserve(PAGE_SIZE, 0).unwrap();
        assert!(more > 0);
        assert_eq!(frame.read_u8(PAGE_SIZE).unwrap(), data[PAGE_SIZE as usize]);
        assert_eq!(frame.reserve(10_000, 0).unwrap(), 0);
    }

    #[test]
    fn scalar_reads_are_strict() {
        let view = MappedView::from_bytes(vec![0x01, 0x02, 0x03, 0x04, 0x05], "buf");
        let mut frame = view.frame();
        assert_eq!(frame.read_u32(0).unwrap(), 0x0403_0201);
        assert_eq!(frame.read_u32_be(0).unwrap(), 0x0102_0304);
        assert_eq!(frame.read_u16(3).unwrap(), 0x0504);
        assert!(matches!(frame.read_u32(2), Err(Error::Bounds)));
        assert!(matches!(frame.read_u8(5), Err(Error::Bounds)));
        assert_eq!(frame.read_i8(4).unwrap(), 5);
    }

    #[test]
    fn bulk_reads_clip() {
        let view = MappedView::from_bytes(numbered(8), "buf");
        let mut frame = view.frame();
        assert_eq!(frame.read_bytes(6, 10).unwrap(), vec![6, 7]);
        let mut buf = [0xFFu8; 4];
        assert_eq!(frame.read(7, &mut buf).unwrap(), 1);
        assert_eq!(buf, [7, 0xFF, 0xFF, 0xFF]);
        assert_eq!(frame.read_bytes(8, 10).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn independent_frames_agree() {
        let data = numbered(3 * PAGE_SIZE as usize);
        let view = MappedView::from_bytes(data.clone(), "buf");
        let mut a = view.frame();
        let mut b = a.clone();
        for offset in [0u64, 4093, 5000, 2 * PAGE_SIZE + 1, 100] {
            let x = a.read_u32(offset).unwrap();
            let y = b.read_u32(offset).unwrap();
            assert_eq!(x, y);
            let i = offset as usize;
            assert_eq!(x, u32::from_le_bytes(data[i..i + 4].try_into().unwrap()));
        }
        // Reading across a window edge remaps instead of truncating.
        assert_eq!(a.offset(), 100);
    }

    #[test]
    fn strings_and_comparisons() {
        let mut data = b"HEAD\0\0\0\0".to_vec();
        data.extend_from_slice(&[b'a', 0, b'b', 0, 0, 0]);
        let view = MappedView::from_bytes(data, "buf");
        let mut frame = view.frame();
        assert!(frame.ascii_equal(0, "HEAD").unwrap());
        assert!(!frame.ascii_equal(0, "HEAT").unwrap());
        assert!(!frame.bytes_equal(12, b"abcdef").unwrap());
        assert!(!frame.bytes_equal(100, b"x").unwrap());
        assert_eq!(frame.read_string(0, 8, Encoding::Utf8).unwrap(), "HEAD");
        assert_eq!(frame.read_string(8, 6, Encoding::Utf16Le).unwrap(), "ab");
    }

    #[test]
    fn disposed_view_fails_frames() {
        let view = MappedView::from_bytes(numbered(16), "buf");
        let mut frame = view.frame();
        frame.read_u8(0).unwrap();
        view.dispose();
        assert!(frame.read_u8(0).unwrap_err().is_disposed());
    }
}
