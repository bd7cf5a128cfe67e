use super::{
    Attributes, Cluster, FatResult, Volume,
    date::{Date, DateTime},
    dirent::{DirEntry, EntrySummary},
};
use crate::BlockDevice;
use alloc::{string::String, vec::Vec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A point of a cluster chain: the `index`-th cluster of the chain is `cluster`.
pub struct ChainSample {
    index: u32,
    cluster: Cluster,
}

impl ChainSample {
    #[must_use]
    #[inline]
    pub const fn index(&self) -> u32 {
        self.index
    }

    #[must_use]
    #[inline]
    pub const fn cluster(&self) -> Cluster {
        self.cluster
    }

    #[must_use]
    #[inline]
    /// Returns the byte offset at which this cluster begins.
    pub const fn offset(&self, bytes_per_cluster: u64) -> u64 {
        self.index as u64 * bytes_per_cluster
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Samples of a file's cluster chain, spread evenly over the file.
///
/// Reads start walking from the closest sample before their position
/// instead of from the first cluster.
pub struct ChainCache {
    samples: Vec<ChainSample>,
}

impl ChainCache {
    #[must_use]
    /// Creates a cache that only knows the first cluster.
    pub fn new(start: Cluster) -> Self {
        let mut samples = Vec::new();
        samples.push(ChainSample {
            index: 0,
            cluster: start,
        });
        Self { samples }
    }

    #[must_use]
    #[inline]
    pub fn samples(&self) -> &[ChainSample] {
        &self.samples
    }

    fn push(&mut self, index: u32, cluster: Cluster) {
        if self.samples.last().is_some_and(|last| last.index == index) {
            return;
        }
        self.samples.push(ChainSample { index, cluster });
    }

    #[must_use]
    /// Returns the last sample starting at or before `pos`.
    pub fn lookup(&self, pos: u64, bytes_per_cluster: u64) -> Option<ChainSample> {
        self.samples
            .iter()
            .rev()
            .find(|sample| sample.offset(bytes_per_cluster) <= pos)
            .copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Handle on a file or directory.
pub struct FatNode {
    name: String,
    short_name: String,
    attributes: Attributes,
    size: u32,
    created: DateTime,
    accessed: Date,
    modified: DateTime,
    parent_cluster: Cluster,
    start_cluster: Cluster,
    last_cluster: Option<Cluster>,
    chain: ChainCache,
}

/// Names are stored one byte per character, read as Latin-1.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

impl FatNode {
    #[must_use]
    /// Handle on the root directory.
    pub fn root() -> Self {
        Self {
            name: String::new(),
            short_name: String::new(),
            attributes: Attributes::new(Attributes::DIRECTORY),
            size: 0,
            created: DateTime::default(),
            accessed: Date::default(),
            modified: DateTime::default(),
            parent_cluster: Cluster::new(0),
            start_cluster: Cluster::new(0),
            last_cluster: None,
            chain: ChainCache::new(Cluster::new(0)),
        }
    }

    #[must_use]
    pub(crate) fn from_entry(summary: &EntrySummary, raw: &DirEntry, parent: Cluster) -> Self {
        Self {
            name: latin1(summary.name()),
            short_name: latin1(summary.short_name()),
            attributes: summary.attributes(),
            size: summary.size(),
            created: raw.creation_datetime(),
            accessed: raw.last_access_date(),
            modified: raw.last_write_datetime(),
            parent_cluster: parent,
            start_cluster: summary.cluster(),
            last_cluster: None,
            chain: ChainCache::new(summary.cluster()),
        }
    }

    #[must_use]
    #[inline]
    /// Returns the long name, or the 8.3 name when the entry has none
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    #[inline]
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    #[must_use]
    #[inline]
    pub const fn attributes(&self) -> Attributes {
        self.attributes
    }

    #[must_use]
    #[inline]
    pub const fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    #[must_use]
    #[inline]
    /// Returns the file size in bytes (zero for directories)
    pub const fn size(&self) -> u32 {
        self.size
    }

    #[must_use]
    #[inline]
    pub const fn start_cluster(&self) -> Cluster {
        self.start_cluster
    }

    #[must_use]
    #[inline]
    /// Returns the first cluster of the directory holding this entry
    pub const fn parent_cluster(&self) -> Cluster {
        self.parent_cluster
    }

    #[must_use]
    #[inline]
    /// Returns the last cluster of the chain, known once the chain cache is built
    pub const fn last_cluster(&self) -> Option<Cluster> {
        self.last_cluster
    }

    #[must_use]
    #[inline]
    pub const fn chain_cache(&self) -> &ChainCache {
        &self.chain
    }

    #[must_use]
    #[inline]
    pub const fn created(&self) -> DateTime {
        self.created
    }

    #[must_use]
    #[inline]
    pub const fn accessed(&self) -> Date {
        self.accessed
    }

    #[must_use]
    #[inline]
    pub const fn modified(&self) -> DateTime {
        self.modified
    }

    #[must_use]
    #[inline]
    pub const fn creation_date_quad(&self) -> [u8; 4] {
        self.created.date().to_quad()
    }

    #[must_use]
    #[inline]
    pub const fn creation_time_triple(&self) -> [u8; 3] {
        self.created.time().to_triple()
    }

    #[must_use]
    #[inline]
    pub const fn access_date_quad(&self) -> [u8; 4] {
        self.accessed.to_quad()
    }

    #[must_use]
    #[inline]
    pub const fn modify_date_quad(&self) -> [u8; 4] {
        self.modified.date().to_quad()
    }

    #[must_use]
    #[inline]
    pub const fn modify_time_triple(&self) -> [u8; 3] {
        self.modified.time().to_triple()
    }
}

impl<D: BlockDevice> Volume<D> {
    /// Samples the whole chain of `node` so that reads can start close to their position.
    ///
    /// Also records the last cluster of the chain.
    pub fn build_chain_cache(&mut self, node: &mut FatNode) -> FatResult<()> {
        let start = node.start_cluster;
        node.chain = ChainCache::new(start);
        node.last_cluster = None;
        if !start.has_chain() {
            return Ok(());
        }

        let slots = self.config.chain_cache_slots() as u64;
        let block = u64::from(node.size) / slots;
        let bytes_per_cluster = self.geometry.bytes_per_cluster();
        let capacity = self.walker.capacity();
        let limit = self.geometry.cluster_count();

        let mut covered = 0u64;
        let mut next_slot = 1u64;
        let mut index = 0u32;
        let mut current = start;
        let mut include_start = true;

        loop {
            let len = self
                .walker
                .walk(&mut self.cache, &self.geometry, current, include_start)?;
            let chain = self.walker.chain();

            for &cluster in chain {
                covered += bytes_per_cluster;
                while next_slot < slots && covered >= next_slot * block {
                    node.chain.push(index, cluster);
                    next_slot += 1;
                }
                index += 1;
                current = cluster;
            }

            if len < capacity {
                break;
            }
            if index > limit {
                log::warn!("Chain of {start} loops, sampling stopped after {index} clusters");
                break;
            }
            include_start = false;
        }

        node.last_cluster = Some(current);
        log::debug!(
            "Chain of {start}: {index} clusters, {} samples",
            node.chain.samples.len()
        );
        Ok(())
    }

    /// Reads up to `buf.len()` bytes of `node` starting at byte `pos`.
    ///
    /// Reads of files stop at the file size, reads of directories at the end of the chain or
    /// once more clusters than the volume holds were walked. Returns the number of bytes
    /// copied, which is short if a data sector cannot be read. A chain that cannot be resolved
    /// before any byte was copied is an I/O error.
    pub fn read_file(&mut self, node: &FatNode, pos: u64, buf: &mut [u8]) -> FatResult<usize> {
        let mut size = buf.len();
        if !node.is_directory() {
            let remaining = u64::from(node.size).saturating_sub(pos);
            size = size.min(usize::try_from(remaining).unwrap_or(usize::MAX));
        }
        if size == 0 {
            return Ok(0);
        }

        let bytes_per_cluster = self.geometry.bytes_per_cluster();
        let Some(sample) = node.chain.lookup(pos, bytes_per_cluster) else {
            return Ok(0);
        };
        if !sample.cluster.has_chain() {
            return Ok(0);
        }

        let sector_size = self.geometry.sector_size();
        let sectors_per_cluster = u64::from(self.geometry.sectors_per_cluster());
        let relative = pos - sample.offset(bytes_per_cluster);
        let mut cluster_skip = relative / bytes_per_cluster;
        let mut sector_skip = (relative % bytes_per_cluster) / sector_size as u64;
        #[expect(clippy::cast_possible_truncation, reason = "Smaller than the sector size")]
        let mut data_skip = (pos % sector_size as u64) as usize;

        let capacity = self.walker.capacity();
        let limit = u64::from(self.geometry.cluster_count());
        let mut walked = u64::from(sample.index);
        let mut copied = 0;
        let mut current = sample.cluster;
        let mut include_start = true;

        loop {
            let len = match self
                .walker
                .walk(&mut self.cache, &self.geometry, current, include_start)
            {
                Ok(len) => len,
                Err(err) if copied == 0 => return Err(err),
                Err(err) => {
                    log::warn!("Read of {} cut short: {err}", node.name);
                    return Ok(copied);
                }
            };
            include_start = false;
            if len == 0 {
                break;
            }
            walked += len as u64;
            if walked > limit {
                log::warn!("Chain of {} loops, read stopped after {walked} clusters", node.name);
                return Ok(copied);
            }
            let more = len >= capacity;
            current = self.walker.chain()[len - 1];

            if cluster_skip >= len as u64 {
                cluster_skip -= len as u64;
                if !more {
                    break;
                }
                continue;
            }

            #[expect(clippy::cast_possible_truncation, reason = "Bounded by the chain length")]
            let first = cluster_skip as usize;
            for i in first..len {
                let first_sector = self.geometry.cluster_to_sector(self.walker.chain()[i]);
                for s in sector_skip..sectors_per_cluster {
                    let data = match self.cache.fetch(first_sector + s) {
                        Ok(data) => data,
                        Err(err) => {
                            log::warn!("Read of {} cut short: {err}", node.name);
                            return Ok(copied);
                        }
                    };
                    let n = (sector_size - data_skip).min(size - copied);
                    buf[copied..copied + n].copy_from_slice(&data[data_skip..data_skip + n]);
                    copied += n;
                    data_skip = 0;
                    if copied == size {
                        return Ok(copied);
                    }
                }
                sector_skip = 0;
            }
            cluster_skip = 0;

            if !more {
                break;
            }
        }

        Ok(copied)
    }
}

impl From<&FatNode> for Attributes {
    fn from(node: &FatNode) -> Self {
        node.attributes
    }
}
