//! Cluster chain resolution.
//!
//! Chains are resolved a segment at a time into a buffer owned by the volume.
//! A segment stops at the end-of-chain marker or when the buffer is full; callers
//! that need more resume from the last resolved cluster with `include_start` unset.
use super::{Cluster, FatResult, FatType, Volume, bs::Geometry};
use crate::{BlockDevice, cache::SectorCache};
use alloc::vec::Vec;

/// FAT12 entry handling
pub(crate) mod fat12 {
    use super::{Cluster, FatType};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Location of the 12-bit record of a cluster.
    pub enum Record {
        /// Both bytes live in `sector`, starting at `offset`.
        Single { sector: u64, offset: usize },
        /// The first byte is the last one of `sector`, the second one starts the next sector.
        Straddling { sector: u64 },
    }

    impl Record {
        #[must_use]
        pub fn locate(cluster: Cluster, fat_start: u64, sector_size: usize) -> Self {
            let cluster_val = cluster.value() as usize;
            let byte = cluster_val + (cluster_val / 2); // 3 bytes per 2 entries
            let sector = fat_start + (byte / sector_size) as u64;
            let offset = byte % sector_size;
            if offset == sector_size - 1 {
                Self::Straddling { sector }
            } else {
                Self::Single { sector, offset }
            }
        }

        #[must_use]
        #[inline]
        pub const fn sector(self) -> u64 {
            match self {
                Self::Single { sector, .. } | Self::Straddling { sector } => sector,
            }
        }
    }

    #[must_use]
    #[inline]
    pub const fn decode(bytes: [u8; 2], cluster: Cluster) -> Cluster {
        let value = u16::from_le_bytes(bytes);
        // For odd cluster numbers, take the high 12 bits
        let value = if cluster.value() & 1 != 0 {
            value >> 4
        } else {
            value
        };
        Cluster::new(value as u32 & FatType::Fat12.entry_mask())
    }
}

/// FAT16 entry handling
pub(crate) mod fat16 {
    use super::Cluster;

    pub const ENTRY_SIZE: usize = 2;

    #[must_use]
    #[inline]
    pub fn read_entry(sector: &[u8], offset: usize) -> Cluster {
        let value = u16::from_le_bytes([sector[offset], sector[offset + 1]]);
        Cluster::new(u32::from(value))
    }
}

/// FAT32 entry handling
pub(crate) mod fat32 {
    use super::{Cluster, FatType};

    pub const ENTRY_SIZE: usize = 4;

    #[must_use]
    #[inline]
    pub fn read_entry(sector: &[u8], offset: usize) -> Cluster {
        // Only the lower 28 bits are meaningful
        let value = u32::from_le_bytes([
            sector[offset],
            sector[offset + 1],
            sector[offset + 2],
            sector[offset + 3],
        ]);
        Cluster::new(value & FatType::Fat32.entry_mask())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChainMemo {
    start: Cluster,
    include_start: bool,
    len: usize,
}

impl ChainMemo {
    #[inline]
    const fn matches(&self, start: Cluster, include_start: bool) -> bool {
        self.start.value() == start.value() && self.include_start == include_start
    }
}

#[derive(Debug)]
/// Resolves cluster chains into a fixed-capacity buffer.
pub(crate) struct ChainWalker {
    buffer: Vec<Cluster>,
    capacity: usize,
    memo: Option<ChainMemo>,
    memoize: bool,
}

impl ChainWalker {
    #[must_use]
    pub fn new(capacity: usize, memoize: bool) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            memo: None,
            memoize,
        }
    }

    #[must_use]
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    #[inline]
    /// Returns the clusters resolved by the last walk.
    pub fn chain(&self) -> &[Cluster] {
        &self.buffer
    }

    #[inline]
    pub const fn invalidate(&mut self) {
        self.memo = None;
    }

    /// Resolves the chain following `start`.
    ///
    /// `start` itself is part of the result only if `include_start` is set.
    /// Returns the number of clusters now held by [`Self::chain`].
    pub fn walk<D: BlockDevice>(
        &mut self,
        cache: &mut SectorCache<D>,
        geometry: &Geometry,
        start: Cluster,
        include_start: bool,
    ) -> FatResult<usize> {
        if let Some(memo) = self.memo.filter(|memo| memo.matches(start, include_start)) {
            return Ok(memo.len);
        }

        self.memo = None;
        self.buffer.clear();
        if !start.has_chain() {
            return Ok(0);
        }
        if include_start {
            self.buffer.push(start);
        }

        match geometry.fat_type() {
            FatType::Fat12 => self.walk_fat12(cache, geometry, start)?,
            FatType::Fat16 | FatType::Fat32 => self.walk_wide(cache, geometry, start)?,
        }

        let len = self.buffer.len();
        if self.memoize {
            self.memo = Some(ChainMemo {
                start,
                include_start,
                len,
            });
        }
        log::debug!("Resolved {len} clusters after {start}");
        Ok(len)
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    /// Records `next` and returns true if the walk may continue past it.
    fn push(&mut self, geometry: &Geometry, current: Cluster, next: Cluster) -> bool {
        let fat_type = geometry.fat_type();
        if next.is_end_of_chain(fat_type) {
            return false;
        }
        if !geometry.is_data_cluster(next) {
            log::warn!("Cluster {current} links to {next}, cutting the chain short");
            return false;
        }
        self.buffer.push(next);
        !self.is_full()
    }

    fn walk_fat12<D: BlockDevice>(
        &mut self,
        cache: &mut SectorCache<D>,
        geometry: &Geometry,
        start: Cluster,
    ) -> FatResult<()> {
        let sector_size = geometry.sector_size();
        let fat_start = geometry.fat_start();
        let mut cluster = start;

        while !self.is_full() {
            match fat12::Record::locate(cluster, fat_start, sector_size) {
                fat12::Record::Straddling { sector } => {
                    let low = cache.fetch(sector)?[sector_size - 1];
                    let high = cache.fetch(sector + 1)?[0];
                    let next = fat12::decode([low, high], cluster);
                    if !self.push(geometry, cluster, next) {
                        return Ok(());
                    }
                    cluster = next;
                }
                fat12::Record::Single { sector, .. } => {
                    // Only fetch again once the chain leaves this sector
                    let data = cache.fetch(sector)?;
                    while let fat12::Record::Single { sector: s, offset } =
                        fat12::Record::locate(cluster, fat_start, sector_size)
                    {
                        if s != sector {
                            break;
                        }
                        let next = fat12::decode([data[offset], data[offset + 1]], cluster);
                        if !self.push(geometry, cluster, next) {
                            return Ok(());
                        }
                        cluster = next;
                    }
                }
            }
        }
        Ok(())
    }

    fn walk_wide<D: BlockDevice>(
        &mut self,
        cache: &mut SectorCache<D>,
        geometry: &Geometry,
        start: Cluster,
    ) -> FatResult<()> {
        let (entry_size, read_entry): (usize, fn(&[u8], usize) -> Cluster) =
            if geometry.fat_type() == FatType::Fat16 {
                (fat16::ENTRY_SIZE, fat16::read_entry)
            } else {
                (fat32::ENTRY_SIZE, fat32::read_entry)
            };
        let per_sector = geometry.sector_size() / entry_size;
        let sector_of = |cluster: Cluster| {
            geometry.fat_start() + (cluster.value() as usize / per_sector) as u64
        };
        let mut cluster = start;

        while !self.is_full() {
            let sector = sector_of(cluster);
            let data = cache.fetch(sector)?;
            loop {
                let offset = (cluster.value() as usize % per_sector) * entry_size;
                let next = read_entry(data, offset);
                if !self.push(geometry, cluster, next) {
                    return Ok(());
                }
                cluster = next;
                if sector_of(cluster) != sector {
                    break;
                }
            }
        }
        Ok(())
    }
}

impl<D: BlockDevice> Volume<D> {
    /// Resolves up to one buffer's worth of the chain following `start`.
    ///
    /// See [`Volume::is_chain_contiguous`] for a caller that walks whole chains segment by segment.
    pub fn chain_segment(&mut self, start: Cluster, include_start: bool) -> FatResult<&[Cluster]> {
        let len = self
            .walker
            .walk(&mut self.cache, &self.geometry, start, include_start)?;
        Ok(&self.walker.chain()[..len])
    }

    /// Forgets the memoized result of the last chain walk.
    pub const fn invalidate_chain_memo(&mut self) {
        self.walker.invalidate();
    }

    /// Returns true if every cluster of the chain starting at `start` directly follows its predecessor.
    ///
    /// A start cluster without a chain is never contiguous.
    pub fn is_chain_contiguous(&mut self, start: Cluster) -> FatResult<bool> {
        if !start.has_chain() {
            return Ok(false);
        }

        let capacity = self.walker.capacity();
        let limit = u64::from(self.geometry.cluster_count());
        let mut current = start;
        let mut include_start = true;
        let mut seen = 0u64;

        loop {
            let len = self
                .walker
                .walk(&mut self.cache, &self.geometry, current, include_start)?;
            let chain = self.walker.chain();

            let mut prev = if include_start { None } else { Some(current) };
            for &cluster in chain {
                if prev.is_some_and(|prev| prev.value() + 1 != cluster.value()) {
                    return Ok(false);
                }
                prev = Some(cluster);
            }

            seen += len as u64;
            if len < capacity || seen > limit {
                return Ok(true);
            }
            include_start = false;
            current = chain[len - 1];
        }
    }
}
