//! File Allocation Table (FAT) file system implementation.
use crate::{BlockDevice, BlockDeviceError, cache::SectorCache};
use alloc::boxed::Box;
use thiserror::Error;

pub mod bs;
pub mod date;
pub mod dir;
pub mod dirent;
#[expect(clippy::module_inception, reason = "FS is named after this table")]
pub mod fat;
pub mod file;

pub use bs::Geometry;
pub use dir::DirCursor;
pub use dirent::{Attributes, EntrySummary};
pub use file::{ChainCache, FatNode};

/// Longest name, terminator included, that the driver keeps for an entry.
pub const MAX_NAME_LEN: usize = 256;

/// Fat types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    /// Volumes with fewer data clusters than this are FAT12.
    pub const FAT12_MAX_CLUSTERS: u32 = 4085;
    /// Volumes with fewer data clusters than this (and not FAT12) are FAT16.
    pub const FAT16_MAX_CLUSTERS: u32 = 65525;

    #[must_use]
    #[inline]
    /// Determines the FAT type from the number of data clusters of a volume.
    pub const fn from_cluster_count(count: u32) -> Self {
        if count < Self::FAT12_MAX_CLUSTERS {
            Self::Fat12
        } else if count < Self::FAT16_MAX_CLUSTERS {
            Self::Fat16
        } else {
            Self::Fat32
        }
    }

    #[must_use]
    #[inline]
    /// Returns the mask applied to raw table entries.
    pub const fn entry_mask(self) -> u32 {
        match self {
            Self::Fat12 => 0x0FFF,
            Self::Fat16 => 0xFFFF,
            Self::Fat32 => 0x0FFF_FFFF,
        }
    }
}

impl core::fmt::Display for FatType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Fat12 => "FAT12",
            Self::Fat16 => "FAT16",
            Self::Fat32 => "FAT32",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Cluster(u32);

impl Cluster {
    /// First cluster of the data region.
    pub const FIRST_DATA: Self = Self(2);

    #[must_use]
    #[inline]
    pub const fn new(cluster: u32) -> Self {
        Self(cluster)
    }

    #[must_use]
    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }

    #[must_use]
    #[inline]
    /// Returns true if the cluster lives in the data region and has a table entry.
    ///
    /// Clusters 0 and 1 are reserved; a start cluster below 2 means "no chain".
    pub const fn has_chain(&self) -> bool {
        self.0 >= Self::FIRST_DATA.0
    }

    #[must_use]
    #[inline]
    pub const fn is_end_of_chain(&self, fat_type: FatType) -> bool {
        let value = self.0 & fat_type.entry_mask();
        match fat_type {
            FatType::Fat12 => value >= 0xFF8,
            FatType::Fat16 => value >= 0xFFF8,
            FatType::Fat32 => value >= 0x0FFF_FFF8,
        }
    }
}

impl core::fmt::Display for Cluster {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
/// Error type for FAT filesystem operations
pub enum FatError {
    #[error("Boot sector signature is missing")]
    InvalidSignature,
    #[error("Invalid boot sector")]
    InvalidBootSector,
    #[error("I/O error")]
    Io,
    #[error("Not found")]
    NotFound,
    #[error("Not a directory")]
    NotADirectory,
    #[error("Cluster chain does not fit the chain buffer")]
    ChainTooLarge,
    #[error("Invalid cluster")]
    InvalidCluster,
    #[error("No free volume slot")]
    OutOfResources,
    #[error("Volume is not mounted")]
    NotMounted,
    #[error("Directory cursor was never started")]
    InvalidCursor,
}

impl From<BlockDeviceError> for FatError {
    fn from(_: BlockDeviceError) -> Self {
        Self::Io
    }
}

pub type FatResult<T> = Result<T, FatError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Tunables of a mounted volume.
pub struct VolumeConfig {
    chain_capacity: usize,
    chain_cache_slots: usize,
    cache_lines: usize,
    memoize_chains: bool,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeConfig {
    /// Default number of clusters resolved per chain walk.
    pub const DEFAULT_CHAIN_CAPACITY: usize = 512;
    /// Default number of samples kept in a handle's chain cache.
    pub const DEFAULT_CHAIN_CACHE_SLOTS: usize = 16;
    /// Default number of sectors kept by the sector cache.
    pub const DEFAULT_CACHE_LINES: usize = 16;

    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self {
            chain_capacity: Self::DEFAULT_CHAIN_CAPACITY,
            chain_cache_slots: Self::DEFAULT_CHAIN_CACHE_SLOTS,
            cache_lines: Self::DEFAULT_CACHE_LINES,
            memoize_chains: true,
        }
    }

    #[must_use]
    #[inline]
    /// Sets the number of clusters resolved per chain walk.
    ///
    /// Values below 2 are raised to 2 so that a walk always makes progress.
    pub const fn with_chain_capacity(mut self, capacity: usize) -> Self {
        self.chain_capacity = if capacity < 2 { 2 } else { capacity };
        self
    }

    #[must_use]
    #[inline]
    pub const fn with_chain_cache_slots(mut self, slots: usize) -> Self {
        self.chain_cache_slots = if slots == 0 { 1 } else { slots };
        self
    }

    #[must_use]
    #[inline]
    pub const fn with_cache_lines(mut self, lines: usize) -> Self {
        self.cache_lines = if lines == 0 { 1 } else { lines };
        self
    }

    #[must_use]
    #[inline]
    /// Enables or disables the one-entry memo of the last chain walk.
    pub const fn with_chain_memo(mut self, enabled: bool) -> Self {
        self.memoize_chains = enabled;
        self
    }

    #[must_use]
    #[inline]
    pub const fn chain_capacity(&self) -> usize {
        self.chain_capacity
    }

    #[must_use]
    #[inline]
    pub const fn chain_cache_slots(&self) -> usize {
        self.chain_cache_slots
    }

    #[must_use]
    #[inline]
    pub const fn cache_lines(&self) -> usize {
        self.cache_lines
    }

    #[must_use]
    #[inline]
    pub const fn memoize_chains(&self) -> bool {
        self.memoize_chains
    }
}

/// A mounted FAT volume.
///
/// The volume owns its device (through the sector cache) and every scratch buffer
/// the driver needs: the chain buffer, its memo, and the entry summary used while scanning directories.
pub struct Volume<D: BlockDevice> {
    geometry: Geometry,
    config: VolumeConfig,
    cache: SectorCache<D>,
    walker: fat::ChainWalker,
    summary: Box<EntrySummary>,
}

impl<D: BlockDevice> Volume<D> {
    /// Mounts the volume whose boot sector lives at the device's sector offset.
    pub fn mount(mut device: D, config: VolumeConfig) -> FatResult<Self> {
        let sector_offset = device.sector_offset();
        let geometry = bs::parse_boot_sector(&mut device, sector_offset)?;

        log::info!(
            "Mounted {} volume on {} ({} clusters of {} bytes)",
            geometry.fat_type(),
            device.id(),
            geometry.cluster_count(),
            geometry.bytes_per_cluster()
        );

        Ok(Self {
            geometry,
            config,
            cache: SectorCache::new(device, config.cache_lines()),
            walker: fat::ChainWalker::new(config.chain_capacity(), config.memoize_chains()),
            summary: Box::new(EntrySummary::new()),
        })
    }

    /// Drops every cached sector and the chain memo, then gives the device back.
    #[must_use]
    pub fn unmount(mut self) -> D {
        self.teardown();
        log::debug!("Unmounted volume on {}", self.cache.device().id());
        self.cache.into_device()
    }

    /// Asks the underlying device to shut down.
    ///
    /// The volume stays mounted.
    pub fn stop(&mut self) -> FatResult<()> {
        self.cache.device_mut().stop().map_err(FatError::from)
    }

    pub(crate) fn teardown(&mut self) {
        self.cache.teardown();
        self.walker.invalidate();
    }

    #[must_use]
    #[inline]
    pub const fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[must_use]
    #[inline]
    pub const fn config(&self) -> &VolumeConfig {
        &self.config
    }

    #[must_use]
    #[inline]
    pub const fn fat_type(&self) -> FatType {
        self.geometry.fat_type()
    }

    #[must_use]
    #[inline]
    pub const fn cache(&self) -> &SectorCache<D> {
        &self.cache
    }

    #[must_use]
    #[inline]
    pub const fn device(&self) -> &D {
        self.cache.device()
    }
}
