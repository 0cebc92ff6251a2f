//! The read-only virtual-filesystem adapter over a decoded container.
//!
//! [`PupFs`] parses the container once at construction and then answers
//! path queries purely against the projected tree. Opening a file hands
//! out an [`OffsetView`] scoped to the segment's bytes in the backing
//! stream; the stream may equally be local or a lazily-fetched remote
//! resource. Every mutating operation fails: the container format is
//! read-only by construction, not by omission.

use std::path::Path;

#[cfg(feature = "serialize")]
use serde::Serialize;

use crate::container::ContainerIndex;
use crate::error::ErrorInner;
use crate::stream::{AnyStream, OffsetView, RangeStream, SharedStream, StreamSource};
use crate::tree::{NodeKind, NodeRef};
use crate::{DEFAULT_BLOCK_SIZE, FetchConfig, Result};

/// Resource information returned by [`PupFs::getinfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Info {
    pub name: String,
    pub is_dir: bool,
    pub kind: NodeKind,
    pub size: u64,
}

/// A read-only filesystem over a firmware-update container.
#[derive(Debug)]
pub struct PupFs<S> {
    stream: SharedStream<S>,
    index: ContainerIndex,
    blksz: u64,
}

impl PupFs<AnyStream> {
    /// Open a container file on the local filesystem.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_source(StreamSource::LocalPath(path.as_ref().to_owned()))
    }

    /// Open a remote container over HTTP byte ranges.
    pub fn open_url(url: impl Into<String>) -> Result<Self> {
        Self::open_source(StreamSource::RemoteUrl(url.into()))
    }

    /// Open any [`StreamSource`] with the default fetch configuration.
    pub fn open_source(source: StreamSource) -> Result<Self> {
        Self::new(AnyStream::open(source)?)
    }

    /// Same as [`PupFs::open_source`] with an explicit [`FetchConfig`];
    /// its block size is also used for the views handed out by
    /// [`PupFs::openbin`].
    pub fn open_source_with_config(source: StreamSource, config: &FetchConfig) -> Result<Self> {
        let stream = AnyStream::open_with_config(source, config)?;
        let blksz = match &stream {
            AnyStream::Remote(remote) => remote.block_size(),
            _ => DEFAULT_BLOCK_SIZE,
        };
        Self::with_block_size(stream, blksz)
    }
}

impl<S: RangeStream> PupFs<S> {
    /// Parse the container in `stream` and build the filesystem.
    pub fn new(stream: S) -> Result<Self> {
        Self::with_block_size(stream, DEFAULT_BLOCK_SIZE)
    }

    /// Same as [`PupFs::new`] with an explicit block-size hint for the
    /// views handed out by [`PupFs::openbin`].
    pub fn with_block_size(mut stream: S, blksz: u64) -> Result<Self> {
        let index = ContainerIndex::parse(&mut stream)?;
        Ok(Self {
            stream: SharedStream::new(stream),
            index,
            blksz,
        })
    }

    /// The decoded container index.
    #[must_use]
    pub fn index(&self) -> &ContainerIndex {
        &self.index
    }

    fn node(&self, path: &str) -> Result<NodeRef<'_>> {
        self.index
            .lookup(path)
            .ok_or_else(|| ErrorInner::NotFound(path.to_owned()).into())
    }

    /// Information about the resource at `path`.
    pub fn getinfo(&self, path: &str) -> Result<Info> {
        let node = self.node(path)?;
        Ok(Info {
            name: node.name().to_owned(),
            is_dir: node.is_dir(),
            kind: node.kind(),
            size: node.size(),
        })
    }

    /// Child names of the directory at `path`, in segment-table order.
    pub fn listdir(&self, path: &str) -> Result<Vec<String>> {
        let node = self.node(path)?;
        if !node.is_dir() {
            bail!(ErrorInner::NotADirectory(path.to_owned()));
        }
        Ok(node.children().map(|c| c.name().to_owned()).collect())
    }

    /// Open the regular file at `path` for reading.
    ///
    /// The returned view covers exactly the segment's declared
    /// `(offset, size)` in the backing stream and is positioned at 0.
    /// Any writable `mode` (one containing `w`, `a`, `+` or `x`) fails
    /// with a not-writable error.
    pub fn openbin(&self, path: &str, mode: &str) -> Result<OffsetView<S>> {
        if mode.contains(['w', 'a', '+', 'x']) {
            bail!(ErrorInner::NotWritable("open for writing"));
        }
        let node = self.node(path)?;
        if node.is_dir() {
            bail!(ErrorInner::NotAFile(path.to_owned()));
        }
        let offset = node
            .offset()
            .ok_or_else(|| ErrorInner::MissingOffset(path.to_owned()))?;
        OffsetView::new(self.stream.clone(), offset, Some(node.size()), self.blksz)
    }

    /// Rejected: the filesystem is read-only.
    pub fn makedir(&self, _path: &str) -> Result<()> {
        Err(ErrorInner::NotWritable("make a directory").into())
    }

    /// Rejected: the filesystem is read-only.
    pub fn remove(&self, _path: &str) -> Result<()> {
        Err(ErrorInner::NotWritable("remove a file").into())
    }

    /// Rejected: the filesystem is read-only.
    pub fn removedir(&self, _path: &str) -> Result<()> {
        Err(ErrorInner::NotWritable("remove a directory").into())
    }

    /// Rejected: the filesystem is read-only.
    pub fn setinfo(&self, _path: &str) -> Result<()> {
        Err(ErrorInner::NotWritable("set resource info").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::tests::build_container;
    use crate::stream::MemStream;
    use crate::tree::NodeKind;
    use crate::ErrorKind;

    fn sample_fs() -> (PupFs<MemStream>, Vec<u8>) {
        let raw = build_container(&[
            (0x100, b"3.55\n".as_slice()),
            (0x200, b"SCE\0self-ish payload".as_slice()),
        ]);
        let fs = PupFs::new(MemStream::new(raw.clone())).unwrap();
        (fs, raw)
    }

    #[test]
    fn getinfo_and_listdir() {
        let (fs, _) = sample_fs();

        let root = fs.getinfo("/").unwrap();
        assert!(root.is_dir);
        assert_eq!(root.kind, NodeKind::Directory);

        let info = fs.getinfo("/ps3swu.self").unwrap();
        assert_eq!(info.name, "ps3swu.self");
        assert!(!info.is_dir);
        assert_eq!(info.size, 20);

        assert_eq!(fs.listdir("/").unwrap(), ["version.txt", "ps3swu.self"]);

        let err = fs.getinfo("/absent").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = fs.listdir("/version.txt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotADirectory);
    }

    #[test]
    fn openbin_views_segment_bytes() {
        let (fs, raw) = sample_fs();
        let seg = fs.index().segments()[1];

        let mut file = fs.openbin("/ps3swu.self", "r").unwrap();
        assert_eq!(file.tell(), 0);
        assert_eq!(file.size(), seg.size.get());

        let lead = file.read_vec(4).unwrap();
        let off = seg.offset.get() as usize;
        assert_eq!(lead, raw[off..off + 4]);
    }

    #[test]
    fn openbin_feeds_certfile() {
        let (fs, _) = sample_fs();
        let mut file = fs.openbin("/ps3swu.self", "rb").unwrap();
        let cert = crate::certfile::CertifiedFile::parse(&mut file).unwrap();
        assert_eq!(cert.header().magic, *b"SCE\0");
    }

    #[test]
    fn mutation_is_rejected() {
        let (fs, _) = sample_fs();
        for err in [
            fs.openbin("/ps3swu.self", "wb").unwrap_err(),
            fs.openbin("/ps3swu.self", "r+").unwrap_err(),
            // Rejected before the lookup: writing is refused even for
            // paths that do not exist.
            fs.openbin("/absent", "a").unwrap_err(),
            fs.makedir("/new").unwrap_err(),
            fs.remove("/version.txt").unwrap_err(),
            fs.removedir("/").unwrap_err(),
            fs.setinfo("/version.txt").unwrap_err(),
        ] {
            assert_eq!(err.kind(), ErrorKind::NotWritable);
        }

        let err = fs.openbin("/", "r").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAFile);
    }

    #[test]
    fn views_outlive_interleaving() {
        let (fs, _) = sample_fs();
        let mut a = fs.openbin("/version.txt", "r").unwrap();
        let mut b = fs.openbin("/ps3swu.self", "r").unwrap();
        assert_eq!(a.read_vec(2).unwrap(), b"3.");
        assert_eq!(b.read_vec(3).unwrap(), b"SCE");
        assert_eq!(a.read_remaining().unwrap(), b"55\n");
    }

    #[test]
    fn view_implements_std_read() {
        use std::io::Read;

        let (fs, _) = sample_fs();
        let mut file = fs.openbin("/version.txt", "r").unwrap();
        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        assert_eq!(out, "3.55\n");
    }
}
