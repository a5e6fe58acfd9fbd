//! Buffered binary reader over seekable and non-seekable sources.
//!
//! [`BinaryReader`] is what decoders see when they open an entry as a
//! stream. It keeps a small read-ahead buffer in front of the source so that
//! many tiny scalar reads do not each hit the underlying stream, while
//! [`BinaryReader::position`] always reports the logical cursor (the source
//! cursor minus whatever is still buffered).
//!
//! | Constructor | Source | `seek` / `read_header` |
//! |-------------|--------|------------------------|
//! | [`BinaryReader::new`] | `Read + Seek` | supported |
//! | [`BinaryReader::from_bytes`] | in-memory buffer | supported |
//! | [`BinaryReader::pipe`] | `Read` only | [`Error::Unsupported`] |
//!
//! Scalar reads fail with [`Error::EndOfStream`] on short input; bulk reads
//! ([`BinaryReader::read_bytes`], `io::Read::read`) return what is there.

use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom};

use crate::options::INITIAL_CAPACITY;
use crate::text::Encoding;
use crate::{Error, Result};

/// Minimum read-ahead buffer size.
const MIN_BUFFER: usize = 16;
/// Buffer size used for ordinary refills.
const DEFAULT_BUFFER: usize = 4096;

/// Object-safe `Read + Seek`.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek + ?Sized> ReadSeek for T {}

enum Source {
    Seekable(Box<dyn ReadSeek + Send>),
    Pipe(Box<dyn Read + Send>),
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::Seekable(s) => s.read(buf),
            Source::Pipe(s) => s.read(buf),
        }
    }
}

/// Endian- and encoding-aware reader with a read-ahead buffer.
pub struct BinaryReader {
    source: Source,
    name: String,
    encoding: Encoding,
    buf: Vec<u8>,
    /// Next unconsumed byte in `buf`.
    head: usize,
    /// End of valid data in `buf`.
    tail: usize,
    /// Cursor of the underlying source.
    source_pos: u64,
    signature: Option<u32>,
    header: Option<Vec<u8>>,
}

macro_rules! scalar_reads {
    ($($ty:ty => $le:ident, $be:ident;)*) => {$(
        #[doc = concat!("Read a little-endian `", stringify!($ty), "`.")]
        pub fn $le(&mut self) -> Result<$ty> {
            Ok(<$ty>::from_le_bytes(self.take_array()?))
        }

        #[doc = concat!("Read a big-endian `", stringify!($ty), "`.")]
        pub fn $be(&mut self) -> Result<$ty> {
            Ok(<$ty>::from_be_bytes(self.take_array()?))
        }
    )*};
}

impl BinaryReader {
    /// Wrap a seekable source. The reader starts at the source's current
    /// position.
    pub fn new<R>(mut source: R, name: impl Into<String>) -> Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        let pos = source.stream_position()?;
        Ok(Self::with_source(Source::Seekable(Box::new(source)), name.into(), pos))
    }

    /// Wrap a one-shot, non-seekable source.
    ///
    /// The signature is read eagerly because it cannot be revisited later;
    /// the bytes stay buffered so [`BinaryReader::position`] is still 0.
    pub fn pipe<R>(source: R, name: impl Into<String>) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let mut reader = Self::with_source(Source::Pipe(Box::new(source)), name.into(), 0);
        let available = reader.fill(4)?;
        let signature = if available >= 4 {
            let b = &reader.buf[reader.head..reader.head + 4];
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        } else {
            0
        };
        reader.signature = Some(signature);
        Ok(reader)
    }

    /// Read from an in-memory buffer.
    pub fn from_bytes(data: impl Into<Vec<u8>>, name: impl Into<String>) -> Self {
        let cursor = Cursor::new(data.into());
        Self::with_source(Source::Seekable(Box::new(cursor)), name.into(), 0)
    }

    fn with_source(source: Source, name: String, source_pos: u64) -> Self {
        Self {
            source,
            name,
            encoding: Encoding::default(),
            buf: vec![0; MIN_BUFFER],
            head: 0,
            tail: 0,
            source_pos,
            signature: None,
            header: None,
        }
    }

    /// Set the encoding used by [`BinaryReader::read_name`].
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default string encoding of this reader.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.encoding = encoding;
    }

    /// Whether the source supports seeking.
    pub fn is_seekable(&self) -> bool {
        matches!(self.source, Source::Seekable(_))
    }

    /// Logical read position.
    pub fn position(&self) -> u64 {
        self.source_pos - (self.tail - self.head) as u64
    }

    fn buffered(&self) -> usize {
        self.tail - self.head
    }

    /// Total length of a seekable source.
    pub fn len(&mut self) -> Result<u64> {
        let Source::Seekable(source) = &mut self.source else {
            return Err(Error::Unsupported("length of a non-seekable stream"));
        };
        let end = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(self.source_pos))?;
        Ok(end)
    }

    /// Ensure at least `min` unconsumed bytes are buffered, unless the
    /// source ends first. Returns the number of buffered bytes.
    fn fill(&mut self, min: usize) -> Result<usize> {
        if self.buffered() >= min {
            return Ok(self.buffered());
        }
        if self.head > 0 {
            self.buf.copy_within(self.head..self.tail, 0);
            self.tail -= self.head;
            self.head = 0;
        }
        if self.buf.len() < min {
            let grown = min.max(self.buf.len() * 2);
            self.buf.resize(grown, 0);
        } else if self.buf.len() < DEFAULT_BUFFER && self.tail == 0 {
            self.buf.resize(DEFAULT_BUFFER.max(min), 0);
        }
        while self.tail < min {
            let n = match self.source.read(&mut self.buf[self.tail..]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.tail += n;
            self.source_pos += n as u64;
        }
        Ok(self.buffered())
    }

    /// Forget buffered bytes before reading past them straight from the
    /// source, so the buffer never describes a stale range.
    fn discard_buffer(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.fill(N)? < N {
            return Err(Error::EndOfStream);
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.head..self.head + N]);
        self.head += N;
        Ok(out)
    }

    /// Move the logical cursor to `target`, reusing the buffer when the
    /// target falls inside it.
    fn seek_to(&mut self, target: u64) -> Result<()> {
        let buffer_start = self.source_pos - self.tail as u64;
        if target >= buffer_start && target <= self.source_pos {
            self.head = (target - buffer_start) as usize;
            return Ok(());
        }
        let Source::Seekable(source) = &mut self.source else {
            return Err(Error::Unsupported("seek on a non-seekable stream"));
        };
        self.source_pos = source.seek(SeekFrom::Start(target))?;
        self.head = 0;
        self.tail = 0;
        Ok(())
    }

    /// First four bytes of the source as a little-endian `u32`, or 0 when
    /// the source is shorter. Computed once.
    pub fn signature(&mut self) -> Result<u32> {
        if let Some(signature) = self.signature {
            return Ok(signature);
        }
        let saved = self.position();
        self.seek_to(0)?;
        let signature = match self.take_array::<4>() {
            Ok(bytes) => u32::from_le_bytes(bytes),
            Err(Error::EndOfStream) => 0,
            Err(e) => return Err(e),
        };
        self.seek_to(saved)?;
        self.signature = Some(signature);
        Ok(signature)
    }

    /// Return the first `size` bytes of the source and position the reader
    /// right after them.
    ///
    /// The header is cached, so candidate decoders probing the same entry
    /// share one read.
    pub fn read_header(&mut self, size: usize) -> Result<&[u8]> {
        if !self.is_seekable() {
            return Err(Error::Unsupported("read_header on a non-seekable stream"));
        }
        let cached = self.header.as_ref().is_some_and(|h| h.len() >= size);
        if !cached {
            self.seek_to(0)?;
            let bytes = self.read_bytes(size)?;
            if bytes.len() < size {
                return Err(Error::EndOfStream);
            }
            self.header = Some(bytes);
        }
        self.seek_to(size as u64)?;
        match &self.header {
            Some(header) => Ok(&header[..size]),
            None => Err(Error::EndOfStream),
        }
    }

    /// Next byte without consuming it, or `None` at end of stream.
    pub fn peek_byte(&mut self) -> Result<Option<u8>> {
        if self.fill(1)? == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf[self.head]))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.take_array::<1>()?[0] as i8)
    }

    scalar_reads! {
        u16 => read_u16, read_u16_be;
        i16 => read_i16, read_i16_be;
        u32 => read_u32, read_u32_be;
        i32 => read_i32, read_i32_be;
        u64 => read_u64, read_u64_be;
        i64 => read_i64, read_i64_be;
    }

    /// Read a sign-extended little-endian 24-bit integer.
    pub fn read_i24(&mut self) -> Result<i32> {
        let [a, b, c] = self.take_array::<3>()?;
        Ok(i32::from_le_bytes([a, b, c, 0]) << 8 >> 8)
    }

    /// Read a sign-extended big-endian 24-bit integer.
    pub fn read_i24_be(&mut self) -> Result<i32> {
        let [a, b, c] = self.take_array::<3>()?;
        Ok(i32::from_be_bytes([a, b, c, 0]) >> 8)
    }

    /// Read up to `count` bytes. The result is shorter only at end of
    /// stream.
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        let from_buffer = count.min(self.buffered());
        let mut out = Vec::with_capacity(count.min(INITIAL_CAPACITY as usize));
        out.extend_from_slice(&self.buf[self.head..self.head + from_buffer]);
        self.head += from_buffer;
        let remaining = (count - from_buffer) as u64;
        if remaining > 0 {
            self.discard_buffer();
            let n = (&mut self.source).take(remaining).read_to_end(&mut out)?;
            self.source_pos += n as u64;
        }
        Ok(out)
    }

    /// Skip `count` bytes, returning how many were actually skipped.
    pub fn skip(&mut self, count: u64) -> Result<u64> {
        if self.is_seekable() {
            let start = self.position();
            let end = self.len()?;
            let target = start.saturating_add(count).min(end.max(start));
            self.seek_to(target)?;
            return Ok(target - start);
        }
        let from_buffer = (count as usize).min(self.buffered());
        self.head += from_buffer;
        let rest = count - from_buffer as u64;
        if rest > 0 {
            self.discard_buffer();
        }
        let n = io::copy(&mut (&mut self.source).take(rest), &mut io::sink())?;
        self.source_pos += n;
        Ok(from_buffer as u64 + n)
    }

    /// Read a fixed-size string field.
    ///
    /// Always consumes `length` bytes (or up to end of stream); the returned
    /// string stops at the first terminator inside the field.
    pub fn read_cstring_fixed(&mut self, length: usize, encoding: Encoding) -> Result<String> {
        let bytes = self.read_bytes(length)?;
        Ok(encoding.decode_cstring(&bytes))
    }

    /// Read a terminated string, consuming the terminator. Stops quietly at
    /// end of stream.
    pub fn read_cstring(&mut self, encoding: Encoding) -> Result<String> {
        let unit = encoding.terminator_size();
        let mut bytes = Vec::new();
        loop {
            let available = self.fill(unit)?;
            if available < unit {
                bytes.extend_from_slice(&self.buf[self.head..self.tail]);
                self.head = self.tail;
                break;
            }
            let chunk = &self.buf[self.head..self.head + unit];
            self.head += unit;
            if chunk.iter().all(|&b| b == 0) {
                break;
            }
            bytes.extend_from_slice(chunk);
        }
        Ok(encoding.decode(&bytes))
    }

    /// [`BinaryReader::read_cstring_fixed`] with the reader's own encoding.
    pub fn read_name(&mut self, length: usize) -> Result<String> {
        self.read_cstring_fixed(length, self.encoding)
    }
}

impl Read for BinaryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.buffered() == 0 && buf.len() >= self.buf.len() {
            self.discard_buffer();
            let n = self.source.read(buf)?;
            self.source_pos += n as u64;
            return Ok(n);
        }
        let available = self.fill(1)?;
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.buf[self.head..self.head + n]);
        self.head += n;
        Ok(n)
    }
}

impl Seek for BinaryReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if !self.is_seekable() {
            return Err(Error::Unsupported("seek on a non-seekable stream").into());
        }
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::Current(d) => self.position().checked_add_signed(d),
            SeekFrom::End(d) => self.len()?.checked_add_signed(d),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "invalid seek to a negative position")
        })?;
        self.seek_to(target)?;
        Ok(target)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.position())
    }
}

impl fmt::Debug for BinaryReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryReader")
            .field("name", &self.name)
            .field("seekable", &self.is_seekable())
            .field("position", &self.position())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts reads so tests can check header caching.
    struct CountingReader {
        inner: Cursor<Vec<u8>>,
        reads: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Read for CountingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.inner.read(buf)
        }
    }

    impl Seek for CountingReader {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn short_pipe_scalar_is_end_of_stream() {
        let mut reader = BinaryReader::pipe(Cursor::new(vec![1u8, 2, 3]), "pipe").unwrap();
        assert_eq!(reader.signature().unwrap(), 0);
        assert!(matches!(reader.read_u32(), Err(Error::EndOfStream)));
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_bytes(4).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn position_accounts_for_buffer() {
        let mut reader = BinaryReader::from_bytes((0u8..64).collect::<Vec<_>>(), "mem");
        assert_eq!(reader.read_u16().unwrap(), 0x0100);
        assert_eq!(reader.position(), 2);
        assert_eq!(reader.read_u32_be().unwrap(), 0x0203_0405);
        assert_eq!(reader.position(), 6);
        reader.seek(SeekFrom::Current(-2)).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 4);
        reader.seek(SeekFrom::End(-1)).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 63);
        assert_eq!(reader.peek_byte().unwrap(), None);
    }

    #[test]
    fn signature_is_lazy_and_restores_position() {
        let mut reader = BinaryReader::from_bytes(b"SARC\x10\x00rest".to_vec(), "mem");
        reader.seek(SeekFrom::Start(4)).unwrap();
        assert_eq!(reader.signature().unwrap(), u32::from_le_bytes(*b"SARC"));
        assert_eq!(reader.position(), 4);
        assert_eq!(reader.read_u16().unwrap(), 0x10);
    }

    #[test]
    fn header_is_cached() {
        let reads = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let source = CountingReader {
            inner: Cursor::new(b"HDR0payload".to_vec()),
            reads: reads.clone(),
        };
        let mut reader = BinaryReader::new(source, "counted").unwrap();
        assert_eq!(reader.read_header(4).unwrap(), b"HDR0");
        reader.read_bytes(7).unwrap();
        let before = reads.load(std::sync::atomic::Ordering::Relaxed);
        assert_eq!(reader.read_header(4).unwrap(), b"HDR0");
        assert_eq!(reader.position(), 4);
        assert_eq!(reads.load(std::sync::atomic::Ordering::Relaxed), before);
        assert!(matches!(reader.read_header(64), Err(Error::EndOfStream)));
    }

    #[test]
    fn header_on_pipe_is_unsupported() {
        let mut reader = BinaryReader::pipe(io::repeat(0).take(32), "pipe").unwrap();
        assert!(matches!(reader.read_header(4), Err(Error::Unsupported(_))));
        assert!(reader.seek(SeekFrom::Start(0)).is_err());
    }

    #[test]
    fn i24_sign_extension() {
        let mut reader = BinaryReader::from_bytes(vec![0xFF, 0xFF, 0xFF, 0x01, 0x00, 0x80], "mem");
        assert_eq!(reader.read_i24().unwrap(), -1);
        assert_eq!(reader.read_i24_be().unwrap(), 0x0001_0080);
        let mut reader = BinaryReader::from_bytes(vec![0x80, 0x00, 0x00], "mem");
        assert_eq!(reader.read_i24_be().unwrap(), -0x80_0000);
    }

    #[test]
    fn cstrings() {
        let mut data = b"abc\0\0\0\0\0tail\0".to_vec();
        data.extend_from_slice(&[b'x', 0, b'y', 0, 0, 0, b'z']);
        let mut reader = BinaryReader::from_bytes(data, "mem");
        assert_eq!(reader.read_cstring_fixed(8, Encoding::Utf8).unwrap(), "abc");
        assert_eq!(reader.position(), 8);
        assert_eq!(reader.read_cstring(Encoding::Utf8).unwrap(), "tail");
        assert_eq!(reader.position(), 13);
        assert_eq!(reader.read_cstring(Encoding::Utf16Le).unwrap(), "xy");
        assert_eq!(reader.read_cstring(Encoding::Utf8).unwrap(), "z");
        assert_eq!(reader.peek_byte().unwrap(), None);
    }

    #[test]
    fn skip_on_pipe_reads_through() {
        let mut reader = BinaryReader::pipe(Cursor::new((0u8..10).collect::<Vec<_>>()), "pipe").unwrap();
        assert_eq!(reader.skip(3).unwrap(), 3);
        assert_eq!(reader.read_u8().unwrap(), 3);
        assert_eq!(reader.skip(100).unwrap(), 6);
        assert_eq!(reader.position(), 10);
    }

    fn numbered(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn seek_back_after_bulk_read() {
        let data = numbered(10_000);
        let mut reader = BinaryReader::from_bytes(data.clone(), "bulk");
        reader.read_u8().unwrap();
        reader.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(reader.read_bytes(5000).unwrap(), &data[..5000]);
        assert_eq!(reader.position(), 5000);
        reader.seek(SeekFrom::Start(4500)).unwrap();
        assert_eq!(reader.read_u8().unwrap(), data[4500]);
        reader.seek(SeekFrom::Start(10)).unwrap();
        assert_eq!(reader.read_u32().unwrap(), u32::from_le_bytes([10, 11, 12, 13]));
    }

    #[test]
    fn seek_back_after_direct_read() {
        let data = numbered(10_000);
        let mut reader = BinaryReader::from_bytes(data.clone(), "direct");
        let mut big = vec![0u8; 5000];
        reader.read_exact(&mut big).unwrap();
        assert_eq!(big, &data[..5000]);
        assert_eq!(reader.position(), 5000);
        reader.seek(SeekFrom::Start(4500)).unwrap();
        assert_eq!(reader.read_u8().unwrap(), data[4500]);
        reader.seek(SeekFrom::Current(-1)).unwrap();
        assert_eq!(reader.read_bytes(3).unwrap(), &data[4500..4503]);
    }
}
