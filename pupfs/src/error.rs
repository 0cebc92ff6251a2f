//! The crate-wide error type.

use std::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised from stream access, remote fetching, container decoding
/// or the filesystem adapter.
///
/// Use [`Error::kind`] to classify without matching on message text.
pub struct Error(Box<ErrorInner>);

/// The coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A seek or read outside a stream's valid range.
    Bounds,
    /// A magic mismatch or malformed header/table.
    Structural,
    /// The server lacks byte-range support or omits a length.
    Unsupported,
    /// A mutation attempt on the read-only filesystem.
    NotWritable,
    /// A path lookup miss.
    NotFound,
    /// A directory operation on a non-directory.
    NotADirectory,
    /// A file operation on a non-file.
    NotAFile,
    /// An HTTP transport failure or a violated range-request contract.
    Network,
    /// An underlying I/O failure.
    Io,
}

#[derive(Debug)]
pub(crate) enum ErrorInner {
    // Stream bounds.
    OutOfBoundsSeek { target: i128, size: u64 },
    OutOfBoundsRead { pos: u64, len: u64, size: u64 },
    OffsetOutOfRange { offset: u64, limit: u64 },
    OffsetOverflow,

    // Container structure.
    InvalidMagic([u8; 7]),
    InvalidCertMagic([u8; 4]),
    TruncatedHeader { declared: u64, need: u64 },
    HeaderOverrunsStream { declared: u64, stream_len: u64 },
    SegmentOutOfRange { index: usize, offset: u64, size: u64 },
    MissingOffset(String),

    // Remote resource.
    RangesUnsupported,
    MissingLength,
    RangeLength { block: u64, expect: u64, got: u64 },
    Http(Box<ureq::Error>),

    // Filesystem adapter.
    NotWritable(&'static str),
    NotFound(String),
    NotADirectory(String),
    NotAFile(String),

    Io(std::io::Error),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ErrorInner::OutOfBoundsSeek { target, size } => {
                write!(f, "seek target {target} is outside the stream of {size} bytes")
            }
            ErrorInner::OutOfBoundsRead { pos, len, size } => {
                write!(
                    f,
                    "read of {len} bytes at {pos} overruns the stream of {size} bytes"
                )
            }
            ErrorInner::OffsetOutOfRange { offset, limit } => {
                write!(f, "view offset {offset} is outside [0, {limit}]")
            }
            ErrorInner::OffsetOverflow => f.pad("stream offset overflow"),

            ErrorInner::InvalidMagic(magic) => {
                write!(f, "invalid container magic: b\"{}\"", magic.escape_ascii())
            }
            ErrorInner::InvalidCertMagic(magic) => {
                write!(
                    f,
                    "invalid certified-file magic: b\"{}\"",
                    magic.escape_ascii()
                )
            }
            ErrorInner::TruncatedHeader { declared, need } => {
                write!(
                    f,
                    "declared header length {declared}B cannot hold the {need}B of header and tables"
                )
            }
            ErrorInner::HeaderOverrunsStream { declared, stream_len } => {
                write!(
                    f,
                    "declared header length {declared}B exceeds the stream of {stream_len}B"
                )
            }
            ErrorInner::SegmentOutOfRange { index, offset, size } => {
                write!(
                    f,
                    "segment {index} at [{offset}, +{size}) lies outside the declared data region"
                )
            }
            ErrorInner::MissingOffset(path) => {
                write!(f, "node has no backing offset: {path}")
            }

            ErrorInner::RangesUnsupported => f.pad("server does not accept byte-range requests"),
            ErrorInner::MissingLength => f.pad("resource did not report its length"),
            ErrorInner::RangeLength { block, expect, got } => {
                write!(
                    f,
                    "range request for block {block} returned {got} bytes, expected {expect}"
                )
            }
            ErrorInner::Http(err) => write!(f, "http request failed: {err}"),

            ErrorInner::NotWritable(op) => {
                write!(f, "filesystem is read-only, cannot {op}")
            }
            ErrorInner::NotFound(path) => write!(f, "no such path: {path}"),
            ErrorInner::NotADirectory(path) => write!(f, "not a directory: {path}"),
            ErrorInner::NotAFile(path) => write!(f, "not a regular file: {path}"),

            ErrorInner::Io(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &*self.0 {
            ErrorInner::Http(err) => Some(err),
            ErrorInner::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl Error {
    /// Classify this error per the crate taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match &*self.0 {
            ErrorInner::OutOfBoundsSeek { .. }
            | ErrorInner::OutOfBoundsRead { .. }
            | ErrorInner::OffsetOutOfRange { .. }
            | ErrorInner::OffsetOverflow => ErrorKind::Bounds,

            ErrorInner::InvalidMagic(_)
            | ErrorInner::InvalidCertMagic(_)
            | ErrorInner::TruncatedHeader { .. }
            | ErrorInner::HeaderOverrunsStream { .. }
            | ErrorInner::SegmentOutOfRange { .. }
            | ErrorInner::MissingOffset(_) => ErrorKind::Structural,

            ErrorInner::RangesUnsupported | ErrorInner::MissingLength => ErrorKind::Unsupported,
            ErrorInner::RangeLength { .. } | ErrorInner::Http(_) => ErrorKind::Network,

            ErrorInner::NotWritable(_) => ErrorKind::NotWritable,
            ErrorInner::NotFound(_) => ErrorKind::NotFound,
            ErrorInner::NotADirectory(_) => ErrorKind::NotADirectory,
            ErrorInner::NotAFile(_) => ErrorKind::NotAFile,

            ErrorInner::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<ErrorInner> for Error {
    #[cold]
    fn from(err: ErrorInner) -> Self {
        Self(Box::new(err))
    }
}

impl From<std::io::Error> for Error {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        Self(Box::new(ErrorInner::Io(err)))
    }
}

impl From<ureq::Error> for Error {
    #[cold]
    fn from(err: ureq::Error) -> Self {
        Self(Box::new(ErrorInner::Http(Box::new(err))))
    }
}

// Needed for `Read` impls.
impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match *err.0 {
            ErrorInner::Io(err) => err,
            inner => std::io::Error::new(std::io::ErrorKind::InvalidData, Error(Box::new(inner))),
        }
    }
}
