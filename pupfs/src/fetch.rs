//! Lazy block-granular fetching of remote resources over HTTP byte ranges.
//!
//! [`CachedRangeFile`] turns a URL into a random-access [`RangeStream`].
//! The whole resource is backed by one cache buffer; a bitmap records which
//! fixed-size blocks hold genuine server content. Each block is fetched at
//! most once and the bitmap only ever fills, never invalidates.
//!
//! The server must answer a HEAD probe with `Accept-Ranges: bytes` and a
//! `Content-Length`; construction fails otherwise.

use std::{io::Read, io::SeekFrom, time::Duration};

use crate::error::ErrorInner;
use crate::stream::{RangeStream, check_read, resolve_seek};
use crate::{DEFAULT_BLOCK_SIZE, Result};

/// Configuration for [`CachedRangeFile`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    block_size: u64,
    timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            timeout: Duration::from_secs(30),
        }
    }
}

impl FetchConfig {
    /// The fetch and cache granularity in bytes. Must be non-zero.
    pub fn block_size(mut self, n: u64) -> Self {
        assert!(n > 0, "block size must be non-zero");
        self.block_size = n;
        self
    }

    /// The timeout applied to the HEAD probe and to every range request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Per-block fetched/not-fetched tracking, one bit per block.
#[derive(Debug)]
struct BlockBitmap {
    words: Vec<u64>,
}

impl BlockBitmap {
    fn new(nblocks: u64) -> Self {
        let words = usize::try_from(nblocks.div_ceil(64)).expect("block count fits in memory");
        Self {
            words: vec![0; words],
        }
    }

    fn get(&self, blk: u64) -> bool {
        self.words[(blk / 64) as usize] & (1 << (blk % 64)) != 0
    }

    fn set(&mut self, blk: u64) {
        self.words[(blk / 64) as usize] |= 1 << (blk % 64);
    }
}

/// A remote resource as a random-access stream, fetched lazily in blocks.
pub struct CachedRangeFile {
    agent: ureq::Agent,
    url: String,
    blksz: u64,
    size: u64,
    pos: u64,
    cache: Vec<u8>,
    fetched: BlockBitmap,
}

impl std::fmt::Debug for CachedRangeFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedRangeFile")
            .field("url", &self.url)
            .field("blksz", &self.blksz)
            .field("size", &self.size)
            .field("pos", &self.pos)
            .finish_non_exhaustive()
    }
}

impl CachedRangeFile {
    /// Probe `url` and set up an empty cache, using the default
    /// [`FetchConfig`].
    pub fn open(url: impl Into<String>) -> Result<Self> {
        Self::open_with_config(url, &FetchConfig::default())
    }

    /// Same as [`CachedRangeFile::open`] with explicit configuration.
    ///
    /// Issues a single HEAD request. Fails with an unsupported error when
    /// the server does not advertise byte-range support or omits the
    /// content length.
    pub fn open_with_config(url: impl Into<String>, config: &FetchConfig) -> Result<Self> {
        let url = url.into();
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();

        trace_time!("probe {url}");
        let resp = agent.head(&url).call()?;
        let ranges_ok = resp
            .header("accept-ranges")
            .is_some_and(|v| v.contains("bytes"));
        if !ranges_ok {
            bail!(ErrorInner::RangesUnsupported);
        }
        let size = resp
            .header("content-length")
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or(ErrorInner::MissingLength)?;

        let blksz = config.block_size;
        let cache_len = usize::try_from(size).map_err(|_| ErrorInner::OffsetOverflow)?;
        Ok(Self {
            agent,
            url,
            blksz,
            size,
            pos: 0,
            cache: vec![0u8; cache_len],
            fetched: BlockBitmap::new(size.div_ceil(blksz)),
        })
    }

    /// The resource URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The fetch granularity in bytes.
    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.blksz
    }

    /// Make every block overlapping `[pos, pos + len)` cache-resident.
    ///
    /// Blocks are requested one by one; runs of missing blocks are not
    /// coalesced into a single request.
    fn ensure_blocks(&mut self, pos: u64, len: u64) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let blk_start = pos / self.blksz;
        let blk_end = (pos + len).div_ceil(self.blksz);
        for blk in blk_start..blk_end {
            if self.fetched.get(blk) {
                trace!("block {blk}: cache hit");
                continue;
            }
            self.fetch_block(blk)?;
        }
        Ok(())
    }

    fn fetch_block(&mut self, blk: u64) -> Result<()> {
        trace_time!("block {blk}: fetching");

        let start = blk * self.blksz;
        let end = start
            .checked_add(self.blksz)
            .ok_or(ErrorInner::OffsetOverflow)?;
        if end > self.size {
            // A resource whose length is not a multiple of the block size
            // has a short final block; the server cannot return a full one.
            bail!(ErrorInner::RangeLength {
                block: blk,
                expect: self.blksz,
                got: self.size - start,
            });
        }

        let range = format!("bytes={}-{}", start, end - 1);
        let resp = self.agent.get(&self.url).set("Range", &range).call()?;
        let mut body = Vec::with_capacity(self.blksz as usize);
        resp.into_reader()
            .take(self.blksz + 1)
            .read_to_end(&mut body)?;
        if body.len() as u64 != self.blksz {
            bail!(ErrorInner::RangeLength {
                block: blk,
                expect: self.blksz,
                got: body.len() as u64,
            });
        }

        self.cache[start as usize..end as usize].copy_from_slice(&body);
        self.fetched.set(blk);
        Ok(())
    }
}

impl RangeStream for CachedRangeFile {
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
        self.ensure_blocks(self.pos, buf.len() as u64)?;
        buf.copy_from_slice(&self.cache[self.pos as usize..end as usize]);
        self.pos = end;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_indexing_across_word_boundaries() {
        let mut map = BlockBitmap::new(130);
        assert_eq!(map.words.len(), 3);
        for blk in [0, 1, 63, 64, 65, 127, 128, 129] {
            assert!(!map.get(blk));
            map.set(blk);
            assert!(map.get(blk));
        }
        // Neighbors stay clear.
        assert!(!map.get(2));
        assert!(!map.get(62));
        assert!(!map.get(66));
        assert!(!map.get(126));
    }

    #[test]
    fn bitmap_is_monotone() {
        let mut map = BlockBitmap::new(10);
        map.set(3);
        map.set(3);
        assert!(map.get(3));
        assert!((0..10).filter(|&b| map.get(b)).eq([3]));
    }

    #[test]
    fn block_span_arithmetic() {
        // The span covering [pos, pos + len) in 4-byte blocks.
        let blksz = 4u64;
        let span = |pos: u64, len: u64| (pos / blksz, (pos + len).div_ceil(blksz));
        assert_eq!(span(0, 4), (0, 1));
        assert_eq!(span(3, 2), (0, 2));
        assert_eq!(span(4, 1), (1, 2));
        assert_eq!(span(7, 9), (1, 4));
    }
}
