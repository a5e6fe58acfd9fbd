use std::io::{self, Read, Seek, SeekFrom};

use super::Frame;

/// Bounded `Read + Seek` stream over a range of a view.
///
/// Positions are relative to the start of the range. Seeking past the end is
/// allowed and simply yields no data, matching `std::fs::File`.
#[derive(Debug)]
pub struct ViewStream {
    frame: Frame,
    start: u64,
    len: u64,
    pos: u64,
}

impl ViewStream {
    pub(crate) fn new(frame: Frame, start: u64, len: u64) -> Self {
        Self {
            frame,
            start,
            len,
            pos: 0,
        }
    }

    /// Length of the range in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Absolute offset of the range inside its view.
    pub fn start(&self) -> u64 {
        self.start
    }
}

impl Read for ViewStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min((self.len - self.pos) as usize);
        let n = self.frame.read(self.start + self.pos, &mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for ViewStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.len.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        match target {
            Some(p) => {
                self.pos = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom};

    use crate::view::MappedView;

    #[test]
    fn bounded_stream_reads_its_range() {
        let view = MappedView::from_bytes((0u8..32).collect::<Vec<_>>(), "buf");
        let mut stream = view.stream(4, 8).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, (4u8..12).collect::<Vec<_>>());

        stream.seek(SeekFrom::End(-2)).unwrap();
        let mut two = [0u8; 4];
        assert_eq!(stream.read(&mut two).unwrap(), 2);
        assert_eq!(&two[..2], &[10, 11]);

        assert!(stream.seek(SeekFrom::Current(-100)).is_err());
        stream.seek(SeekFrom::Start(100)).unwrap();
        assert_eq!(stream.read(&mut two).unwrap(), 0);
    }

    #[test]
    fn range_is_clipped_to_view() {
        let view = MappedView::from_bytes(vec![0u8; 10], "buf");
        assert_eq!(view.stream(6, 100).unwrap().len(), 4);
        assert!(view.stream(11, 1).is_err());
    }

    #[test]
    fn disposed_view_surfaces_as_io_error() {
        let view = MappedView::from_bytes(vec![1u8; 10], "buf");
        let mut stream = view.stream_all().unwrap();
        view.dispose();
        let err = stream.read(&mut [0u8; 4]).unwrap_err();
        assert!(crate::Error::from(err).is_disposed());
    }
}
