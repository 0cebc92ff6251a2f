//! Read PS3 firmware update containers ("PUP" images) as a read-only
//! filesystem.
//!
//! A PUP container holds a fixed big-endian header, a segment table, a
//! digest table and the segment payloads. [`ContainerIndex`] decodes the
//! tables once and projects the segments onto a directory tree;
//! [`PupFs`] answers path queries against that tree and hands out
//! [`OffsetView`]s into the backing stream.
//!
//! The backing stream is anything implementing [`RangeStream`]: a local
//! file, an in-memory buffer, or a remote resource fetched lazily over
//! HTTP byte-range requests ([`CachedRangeFile`]). See [`StreamSource`]
//! and [`AnyStream`] for the uniform entry point.

#[cfg(feature = "log")]
#[macro_use(trace_time)]
extern crate measure_time;

#[cfg(feature = "log")]
#[macro_use(trace)]
extern crate log;

#[cfg(not(feature = "log"))]
#[macro_use]
mod macros {
    macro_rules! trace {
        ($($tt:tt)*) => {
            let _ = if false {
                let _ = ::std::format_args!($($tt)*);
            };
        };
    }

    macro_rules! trace_time {
        ($($tt:tt)*) => {
            trace!($($tt)*)
        };
    }
}

macro_rules! bail {
    ($err:expr $(,)?) => {
        return Err(Into::into($err))
    };
}

mod error;

pub mod certfile;
pub mod container;
pub mod fetch;
pub mod stream;
pub mod tree;
pub mod vfs;

pub use positioned_io;

pub use container::ContainerIndex;
pub use error::{Error, ErrorKind, Result};
pub use fetch::{CachedRangeFile, FetchConfig};
pub use stream::{
    AnyStream, MemStream, OffsetView, RangeStream, ReadAtStream, SharedStream, StreamSource,
};
pub use tree::{FsTree, NodeKind, NodeRef};
pub use vfs::{Info, PupFs};

/// The default block granularity for remote fetches and cache tracking,
/// 256 KiB.
pub const DEFAULT_BLOCK_SIZE: u64 = 256 * 1024;
