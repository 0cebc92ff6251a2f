//! Bounded random-access streams and zero-based offset views.
//!
//! Everything that can back a container implements [`RangeStream`]: a
//! bounded, cursor-carrying byte source. The trait's provided methods add
//! the two capabilities every backing store shares, slice access without
//! disturbing the cursor ([`RangeStream::read_range`]) and scoped cursor
//! acquisition with guaranteed restoration ([`RangeStream::with_pos`]).
//!
//! [`OffsetView`] presents a contiguous sub-region of a parent stream as an
//! independent zero-based stream. Views over the same parent share it
//! through [`SharedStream`], which serializes cursor use behind a lock, so
//! holding several views at once is safe.

use std::{
    fs::File,
    io::SeekFrom,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use positioned_io::{ReadAt, Size};

use crate::error::ErrorInner;
use crate::fetch::CachedRangeFile;
use crate::{FetchConfig, Result};

/// A bounded byte stream with a cursor.
///
/// The cursor always satisfies `0 <= tell() <= size()`; operations that
/// would violate this fail instead of clamping. Reads are all-or-nothing:
/// [`read_exact`][Self::read_exact] either fills the whole buffer or fails
/// without a defined cursor advance.
pub trait RangeStream {
    /// Total size in bytes. Fixed after construction.
    fn size(&self) -> u64;

    /// The current cursor position.
    fn tell(&self) -> u64;

    /// Move the cursor. Fails if the result would leave `[0, size]`, in
    /// which case the cursor is unchanged.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Fill `buf` from the cursor and advance it by `buf.len()`.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Bytes between the cursor and the end of the stream.
    fn remaining(&self) -> u64 {
        self.size() - self.tell()
    }

    /// Read exactly `len` bytes from the cursor into a new buffer.
    fn read_vec(&mut self, len: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(len).map_err(|_| ErrorInner::OffsetOverflow)?;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read everything from the cursor to the end of the stream.
    fn read_remaining(&mut self) -> Result<Vec<u8>> {
        let len = self.remaining();
        self.read_vec(len)
    }

    /// Read `range` without disturbing the cursor.
    fn read_range(&mut self, range: std::ops::Range<u64>) -> Result<Vec<u8>>
    where
        Self: Sized,
    {
        let len = range
            .end
            .checked_sub(range.start)
            .ok_or(ErrorInner::OffsetOverflow)?;
        self.with_pos(SeekFrom::Start(range.start), |this| this.read_vec(len))
    }

    /// Run `f` with the cursor temporarily moved to `pos`.
    ///
    /// The previous position is restored on every exit path, including when
    /// `f` fails. An error from `f` wins over a restore failure.
    fn with_pos<T>(&mut self, pos: SeekFrom, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T>
    where
        Self: Sized,
    {
        let saved = self.tell();
        self.seek(pos)?;
        let ret = f(self);
        let restored = self.seek(SeekFrom::Start(saved));
        match ret {
            Ok(v) => restored.map(|_| v),
            Err(err) => Err(err),
        }
    }
}

/// Resolve `pos` against `cur` and `size`, failing outside `[0, size]`.
pub(crate) fn resolve_seek(pos: SeekFrom, cur: u64, size: u64) -> Result<u64> {
    let target = match pos {
        SeekFrom::Start(n) => i128::from(n),
        SeekFrom::Current(d) => i128::from(cur) + i128::from(d),
        SeekFrom::End(d) => i128::from(size) + i128::from(d),
    };
    if (0..=i128::from(size)).contains(&target) {
        Ok(target as u64)
    } else {
        Err(ErrorInner::OutOfBoundsSeek { target, size }.into())
    }
}

pub(crate) fn check_read(pos: u64, len: u64, size: u64) -> Result<u64> {
    let end = pos.checked_add(len).ok_or(ErrorInner::OffsetOverflow)?;
    if end > size {
        bail!(ErrorInner::OutOfBoundsRead { pos, len, size });
    }
    Ok(end)
}

/// An in-memory byte buffer as a [`RangeStream`].
#[derive(Debug)]
pub struct MemStream {
    buf: Vec<u8>,
    pos: u64,
}

impl MemStream {
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl RangeStream for MemStream {
    fn size(&self) -> u64 {
        self.buf.len() as u64
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.pos = resolve_seek(pos, self.pos, self.size())?;
        Ok(self.pos)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = check_read(self.pos, buf.len() as u64, self.size())?;
        buf.copy_from_slice(&self.buf[self.pos as usize..end as usize]);
        self.pos = end;
        Ok(())
    }
}

/// A cursor-carrying [`RangeStream`] over any [`ReadAt`] value, typically
/// [`std::fs::File`].
///
/// The size is probed once at construction via [`Size`]; the value must
/// report one.
#[derive(Debug)]
pub struct ReadAtStream<R> {
    rdr: R,
    size: u64,
    pos: u64,
}

impl<R: ReadAt + Size> ReadAtStream<R> {
    pub fn new(rdr: R) -> Result<Self> {
        let size = rdr.size()?.ok_or(ErrorInner::MissingLength)?;
        Ok(Self { rdr, size, pos: 0 })
    }
}

impl<R> ReadAtStream<R> {
    #[inline]
    #[must_use]
    pub fn get_ref(&self) -> &R {
        &self.rdr
    }

    #[inline]
    #[must_use]
    pub fn into_inner(self) -> R {
        self.rdr
    }
}

impl<R: ReadAt> RangeStream for ReadAtStream<R> {
    fn size(&self) -> u64 {
        self.size
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.pos = resolve_seek(pos, self.pos, self.size)?;
        Ok(self.pos)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = check_read(self.pos, buf.len() as u64, self.size)?;
        self.rdr.read_exact_at(self.pos, buf)?;
        self.pos = end;
        Ok(())
    }
}

/// Where the bytes of a container come from.
///
/// Each variant opens into exactly one concrete stream type; see
/// [`AnyStream::open`].
#[derive(Debug)]
pub enum StreamSource {
    /// A path on the local filesystem.
    LocalPath(PathBuf),
    /// An already-open file handle.
    OpenHandle(File),
    /// A byte buffer held in memory.
    InMemoryBuffer(Vec<u8>),
    /// A remote resource fetched lazily over HTTP byte ranges.
    RemoteUrl(String),
}

/// One concrete [`RangeStream`] per [`StreamSource`] variant.
#[derive(Debug)]
pub enum AnyStream {
    File(ReadAtStream<File>),
    Memory(MemStream),
    Remote(CachedRangeFile),
}

impl AnyStream {
    /// Open `source` with the default [`FetchConfig`] for remote URLs.
    pub fn open(source: StreamSource) -> Result<Self> {
        Self::open_with_config(source, &FetchConfig::default())
    }

    /// Same as [`AnyStream::open`], with an explicit fetch configuration
    /// for the [`StreamSource::RemoteUrl`] case.
    pub fn open_with_config(source: StreamSource, config: &FetchConfig) -> Result<Self> {
        match source {
            StreamSource::LocalPath(path) => Ok(Self::File(ReadAtStream::new(File::open(path)?)?)),
            StreamSource::OpenHandle(file) => Ok(Self::File(ReadAtStream::new(file)?)),
            StreamSource::InMemoryBuffer(buf) => Ok(Self::Memory(MemStream::new(buf))),
            StreamSource::RemoteUrl(url) => {
                Ok(Self::Remote(CachedRangeFile::open_with_config(url, config)?))
            }
        }
    }
}

impl RangeStream for AnyStream {
    fn size(&self) -> u64 {
        match self {
            Self::File(s) => s.size(),
            Self::Memory(s) => s.size(),
            Self::Remote(s) => s.size(),
        }
    }

    fn tell(&self) -> u64 {
        match self {
            Self::File(s) => s.tell(),
            Self::Memory(s) => s.tell(),
            Self::Remote(s) => s.tell(),
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        match self {
            Self::File(s) => s.seek(pos),
            Self::Memory(s) => s.seek(pos),
            Self::Remote(s) => s.seek(pos),
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self {
            Self::File(s) => s.read_exact(buf),
            Self::Memory(s) => s.read_exact(buf),
            Self::Remote(s) => s.read_exact(buf),
        }
    }
}

/// A parent stream shared by several views.
///
/// The stream has a single cursor, so all access goes through a lock and a
/// scoped seek: positions taken by one reader are restored before the lock
/// is released, which keeps interleaved readers correct.
#[derive(Debug)]
pub struct SharedStream<S> {
    inner: Arc<Mutex<S>>,
    size: u64,
}

impl<S> Clone for SharedStream<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            size: self.size,
        }
    }
}

impl<S: RangeStream> SharedStream<S> {
    pub fn new(stream: S) -> Self {
        let size = stream.size();
        Self {
            inner: Arc::new(Mutex::new(stream)),
            size,
        }
    }

    /// Total size of the underlying stream.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Fill `buf` from `offset`, leaving the underlying cursor where it was.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.with_pos(SeekFrom::Start(offset), |s| s.read_exact(buf))
    }

    /// Run `f` on the underlying stream while holding the lock.
    pub fn with_stream<T>(&self, f: impl FnOnce(&mut S) -> Result<T>) -> Result<T> {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }
}

/// A zero-based view of `[off, off + sz)` of a parent stream.
///
/// The view carries its own cursor; the parent cursor is only borrowed
/// transiently (and restored) during reads. Sub-views created with
/// [`OffsetView::subview`] always reference the original parent, never
/// another view, so offset translation stays a single addition.
#[derive(Debug)]
pub struct OffsetView<S> {
    parent: SharedStream<S>,
    off: u64,
    sz: u64,
    blksz: u64,
    end: u64,
    parent_end: u64,
    pos: u64,
}

impl<S: RangeStream> OffsetView<S> {
    /// Create a view of `[off, off + sz)` of `parent`.
    ///
    /// `sz` of `None` means "to the parent's end". Fails if `off` lies
    /// outside the parent.
    pub fn new(parent: SharedStream<S>, off: u64, sz: Option<u64>, blksz: u64) -> Result<Self> {
        let parent_end = parent.size();
        if off > parent_end {
            bail!(ErrorInner::OffsetOutOfRange {
                offset: off,
                limit: parent_end,
            });
        }
        let sz = sz.unwrap_or(parent_end - off);
        let end = off.checked_add(sz).ok_or(ErrorInner::OffsetOverflow)?;
        Ok(Self {
            parent,
            off,
            sz,
            blksz,
            end,
            parent_end,
            pos: 0,
        })
    }

    /// Create a view over a sub-range, composed against the original
    /// parent at absolute offset `self.off + offset`.
    ///
    /// `size` of `None` means "to this view's end"; `blksz` of `None`
    /// inherits this view's block size.
    pub fn subview(&self, offset: u64, size: Option<u64>, blksz: Option<u64>) -> Result<Self> {
        let suboff = self.off.checked_add(offset).ok_or(ErrorInner::OffsetOverflow)?;
        if suboff > self.sz {
            bail!(ErrorInner::OffsetOutOfRange {
                offset: suboff,
                limit: self.sz,
            });
        }
        let size = match size {
            Some(n) => n,
            None => self
                .sz
                .checked_sub(offset)
                .ok_or(ErrorInner::OffsetOverflow)?,
        };
        let end = suboff.checked_add(size).ok_or(ErrorInner::OffsetOverflow)?;
        Ok(Self {
            parent: self.parent.clone(),
            off: suboff,
            sz: size,
            blksz: blksz.unwrap_or(self.blksz),
            end,
            parent_end: self.parent_end,
            pos: 0,
        })
    }

    /// The view's offset within the parent stream.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.off
    }

    /// The block granularity hint carried by this view.
    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.blksz
    }

    /// The shared parent stream.
    #[must_use]
    pub fn parent(&self) -> &SharedStream<S> {
        &self.parent
    }
}

impl<S: RangeStream> RangeStream for OffsetView<S> {
    fn size(&self) -> u64 {
        self.sz
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        // Translation happens in parent coordinates: `Start` adds `off`,
        // `End` adds `parent_end - end` so the view's end lines up with the
        // parent's actual end even when the view does not reach it.
        let local = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(d) => i128::from(self.pos) + i128::from(d),
            SeekFrom::End(d) => {
                i128::from(d) + (i128::from(self.parent_end) - i128::from(self.end))
                    - i128::from(self.off)
            }
        };
        if !(0..=i128::from(self.sz)).contains(&local) {
            bail!(ErrorInner::OutOfBoundsSeek {
                target: local,
                size: self.sz,
            });
        }
        self.pos = local as u64;
        Ok(self.pos)
    }

    // Over-length reads fail rather than clamp.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = check_read(self.pos, buf.len() as u64, self.sz)?;
        let parent_pos = self
            .off
            .checked_add(self.pos)
            .ok_or(ErrorInner::OffsetOverflow)?;
        self.parent.read_at(parent_pos, buf)?;
        self.pos = end;
        Ok(())
    }
}

impl<S: RangeStream> std::io::Read for OffsetView<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        // `std::io::Read` permits partial reads, so clamp to the remainder
        // here; the strict contract lives in `RangeStream::read_exact`.
        let len = usize::try_from(self.remaining())
            .unwrap_or(usize::MAX)
            .min(buf.len());
        RangeStream::read_exact(self, &mut buf[..len])?;
        Ok(len)
    }
}

impl<S: RangeStream> std::io::Seek for OffsetView<S> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        Ok(RangeStream::seek(self, pos)?)
    }
}
