//! Sector cache sitting between the FAT driver and its block device.
//!
//! Every sector the driver touches goes through [`SectorCache::fetch`], which keeps
//! a small set of recently used sectors around. Lines are recycled least recently used first.
use crate::{
    BlockDevice,
    fat::{FatError, FatResult},
};
use alloc::{vec, vec::Vec};
use hashbrown::HashMap;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
/// Hit/miss counters of a sector cache.
pub struct CacheStats {
    fetches: u64,
    misses: u64,
}

impl CacheStats {
    #[must_use]
    #[inline]
    /// Returns the number of sectors requested through the cache.
    pub const fn fetches(&self) -> u64 {
        self.fetches
    }

    #[must_use]
    #[inline]
    /// Returns the number of requests that went to the device.
    pub const fn misses(&self) -> u64 {
        self.misses
    }

    #[must_use]
    #[inline]
    /// Returns the number of requests served from memory.
    pub const fn hits(&self) -> u64 {
        self.fetches - self.misses
    }
}

#[derive(Debug, Clone, Copy)]
struct Line {
    sector: Option<u64>,
    stamp: u64,
}

impl Line {
    const EMPTY: Self = Self {
        sector: None,
        stamp: 0,
    };
}

pub struct SectorCache<D: BlockDevice> {
    device: D,
    sector_size: usize,
    /// Backing storage of all lines, `sector_size` bytes each.
    data: Vec<u8>,
    lines: Vec<Line>,
    index: HashMap<u64, usize>,
    clock: u64,
    stats: CacheStats,
}

impl<D: BlockDevice> SectorCache<D> {
    #[must_use]
    /// Creates a cache of `line_count` sectors in front of `device`.
    ///
    /// At least one line is always allocated.
    pub fn new(device: D, line_count: usize) -> Self {
        let sector_size = device.sector_size();
        let line_count = line_count.max(1);
        Self {
            device,
            sector_size,
            data: vec![0; line_count * sector_size],
            lines: vec![Line::EMPTY; line_count],
            index: HashMap::with_capacity(line_count),
            clock: 0,
            stats: CacheStats::default(),
        }
    }

    /// Returns the content of an absolute sector, reading it from the device if needed.
    ///
    /// The returned slice is exactly one sector long and stays valid until the next call.
    pub fn fetch(&mut self, sector: u64) -> FatResult<&[u8]> {
        self.stats.fetches += 1;
        self.clock += 1;

        let line = if let Some(&line) = self.index.get(&sector) {
            line
        } else {
            self.stats.misses += 1;
            let line = self.victim();
            if let Some(old) = self.lines[line].sector.take() {
                self.index.remove(&old);
            }

            let range = self.line_range(line);
            if let Err(err) = self.device.read(&mut self.data[range], sector) {
                log::debug!("Reading sector {sector} failed: {err}");
                return Err(FatError::from(err));
            }
            self.lines[line].sector = Some(sector);
            self.index.insert(sector, line);
            line
        };

        self.lines[line].stamp = self.clock;
        Ok(&self.data[self.line_range(line)])
    }

    /// Drops every cached sector.
    ///
    /// Statistics are reset as well.
    pub fn teardown(&mut self) {
        self.lines.fill(Line::EMPTY);
        self.index.clear();
        self.clock = 0;
        self.stats = CacheStats::default();
    }

    #[must_use]
    #[inline]
    pub const fn stats(&self) -> CacheStats {
        self.stats
    }

    #[must_use]
    #[inline]
    pub const fn sector_size(&self) -> usize {
        self.sector_size
    }

    #[must_use]
    #[inline]
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    #[inline]
    pub const fn device(&self) -> &D {
        &self.device
    }

    #[must_use]
    #[inline]
    pub const fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[must_use]
    #[inline]
    /// Consumes the cache and gives the device back.
    pub fn into_device(self) -> D {
        self.device
    }

    /// Empty lines first, then the least recently used one.
    fn victim(&self) -> usize {
        self.lines
            .iter()
            .enumerate()
            .min_by_key(|(_, line)| (line.sector.is_some(), line.stamp))
            .map_or(0, |(idx, _)| idx)
    }

    #[inline]
    const fn line_range(&self, line: usize) -> core::ops::Range<usize> {
        line * self.sector_size..(line + 1) * self.sector_size
    }
}
