//! Library-wide error and result types.

use std::io;

use thiserror::Error;

/// Result alias used throughout arcnav.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the library can produce.
///
/// Decoders report structural problems with [`Error::InvalidFormat`] or
/// [`Error::BadMagic`]; the probe loop treats any error other than
/// [`Error::Canceled`] as "not this format". Navigation errors
/// ([`Error::FileNotFound`], [`Error::DirectoryNotFound`],
/// [`Error::UnknownFormat`]) reach the caller unchanged.
#[derive(Debug, Error)]
pub enum Error {
    /// A strict read asked for more bytes than the view has left.
    #[error("not enough bytes in the mapped view")]
    Bounds,
    /// A buffered scalar or header read hit the end of the stream.
    #[error("unexpected end of stream")]
    EndOfStream,
    /// An underlying I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Virtual filesystem lookup miss.
    #[error("file not found: {0}")]
    FileNotFound(String),
    /// Navigation into a virtual path that does not exist.
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),
    /// No registered decoder recognized the source.
    #[error("unknown archive format: {name}")]
    UnknownFormat {
        name: String,
        /// The last error reported by a declining decoder, if any.
        #[source]
        source: Option<Box<Error>>,
    },
    /// The operation was aborted by the user.
    #[error("operation canceled")]
    Canceled,
    /// Access to a view, frame or handle after it was released.
    #[error("object disposed")]
    Disposed,
    /// The source cannot perform the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    /// A magic/signature field did not match the expected value.
    #[error("bad magic value")]
    BadMagic,
    /// A structural constraint was violated (message describes which one).
    #[error("invalid format: {0}")]
    InvalidFormat(&'static str),
    /// Zstandard decompression failed.
    #[cfg(feature = "compression")]
    #[error("zstd decompression failed")]
    Zstd,
    /// LZ4 decompression failed.
    #[cfg(feature = "compression")]
    #[error("lz4 decompression failed")]
    Lz4,
}

impl Error {
    /// Build an [`Error::UnknownFormat`] without a recorded cause.
    pub fn unknown_format(name: impl Into<String>) -> Self {
        Error::UnknownFormat {
            name: name.into(),
            source: None,
        }
    }

    /// Whether this error is the distinguished cancellation signal.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    /// Whether this error reports use of a released resource.
    ///
    /// I/O errors produced by [`ViewStream`](crate::view::ViewStream) after
    /// disposal wrap [`Error::Disposed`] and are recognized too.
    pub fn is_disposed(&self) -> bool {
        match self {
            Error::Disposed => true,
            Error::Io(e) => e
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<Error>())
                .is_some_and(|inner| matches!(inner, Error::Disposed)),
            _ => false,
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(inner) => inner,
            Error::EndOfStream | Error::Bounds => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            Error::Unsupported(_) => io::Error::new(io::ErrorKind::Unsupported, e),
            Error::FileNotFound(_) => io::Error::new(io::ErrorKind::NotFound, e),
            other => io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposed_survives_io_round_trip() {
        let io_err: io::Error = Error::Disposed.into();
        let back = Error::from(io_err);
        assert!(back.is_disposed());
        assert!(!Error::Bounds.is_disposed());
    }

    #[test]
    fn end_of_stream_maps_to_unexpected_eof() {
        let io_err: io::Error = Error::EndOfStream.into();
        assert_eq!(io_err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
