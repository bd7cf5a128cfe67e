//! Boot sector and BIOS Parameter Block (BPB) parsing.
use super::{Cluster, FatError, FatResult, FatType, dirent::DIR_ENTRY_SIZE};
use crate::BlockDevice;
use alloc::vec;
use vfat_core::static_assert;

/// Last two bytes of a valid boot sector.
pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// BIOS Parameter Block (BPB) end.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
struct BootParamBlockEnd {
    /// Logical drive number.
    drive_number: u8,
    /// Reserved.
    _reserved: u8,
    /// Boot signature.
    boot_flag: u8,
    /// Volume serial number.
    volume_id: u32,
    /// Volume label.
    volume_label: [u8; 11],
    /// File system type string, such as `FAT16   `.
    fs_type: [u8; 8],
}

/// BIOS Parameter Block (BPB) start.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
struct BootParamBlockStart {
    /// Bytes per sector.
    bytes_per_sector: u16,
    /// Sectors per cluster.
    sectors_per_cluster: u8,
    /// Reserved sectors, boot sector included.
    reserved_sectors: u16,
    /// Number of FATs.
    fat_count: u8,
    /// Entries of the fixed root directory (zero on FAT32).
    root_entries: u16,
    /// Total sectors in the file system.
    ///
    /// If the total number of sectors exceeds `u16::MAX`, this field is set to 0
    /// and one should use `total_sectors_large` instead.
    total_sectors: u16,
    media_descriptor: u8,
    /// Sectors per FAT.
    ///
    /// Zero on FAT32 file systems.
    sectors_per_fat: u16,
    sectors_per_track: u16,
    heads: u16,
    hidden_sectors: u32,
    /// Total sectors in the file system.
    ///
    /// This field is used when `total_sectors` is set to 0.
    total_sectors_large: u32,
}

/// BIOS Parameter Block (BPB) for FAT12/16 file system.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BootParamBlock {
    bpb_start: BootParamBlockStart,
    bpb_end: BootParamBlockEnd,
}

impl BootParamBlock {
    #[must_use]
    #[inline]
    /// Returns the number of bytes per sector.
    pub const fn bytes_per_sector(&self) -> u16 {
        self.bpb_start.bytes_per_sector
    }

    #[must_use]
    #[inline]
    /// Returns the number of sectors per cluster.
    pub const fn sectors_per_cluster(&self) -> u8 {
        self.bpb_start.sectors_per_cluster
    }

    #[must_use]
    #[inline]
    /// Returns the number of reserved sectors.
    pub const fn reserved_sectors(&self) -> u16 {
        self.bpb_start.reserved_sectors
    }

    #[must_use]
    #[inline]
    /// Returns the number of FATs.
    pub const fn fat_count(&self) -> u8 {
        self.bpb_start.fat_count
    }

    #[must_use]
    #[inline]
    /// Returns the number of root directory entries.
    pub const fn root_entries(&self) -> u16 {
        self.bpb_start.root_entries
    }

    #[must_use]
    #[inline]
    /// Returns the number of sectors in the file system.
    pub fn total_sectors(&self) -> u32 {
        if self.bpb_start.total_sectors != 0 {
            u32::from(self.bpb_start.total_sectors)
        } else {
            self.bpb_start.total_sectors_large
        }
    }

    #[must_use]
    #[inline]
    /// Returns the number of sectors per FAT.
    ///
    /// This value is zero on FAT32 file systems,
    /// where [`ExtendedBootParamBlock::sectors_per_fat`] should be used instead.
    pub const fn sectors_per_fat(&self) -> u16 {
        self.bpb_start.sectors_per_fat
    }

    #[must_use]
    #[inline]
    /// Returns the volume serial number.
    pub const fn volume_id(&self) -> u32 {
        self.bpb_end.volume_id
    }

    #[must_use]
    #[inline]
    /// Returns the file system type string.
    pub const fn fs_type(&self) -> [u8; 8] {
        self.bpb_end.fs_type
    }

    #[must_use]
    pub fn validate(&self) -> bool {
        let bytes_per_sector = self.bytes_per_sector();
        if !bytes_per_sector.is_power_of_two() || !(512..=4096).contains(&bytes_per_sector) {
            return false;
        }

        let sectors_per_cluster = self.sectors_per_cluster();
        if !sectors_per_cluster.is_power_of_two() {
            return false;
        }

        self.reserved_sectors() != 0 && self.fat_count() != 0 && self.total_sectors() != 0
    }
}

/// BIOS Parameter Block (BPB) for FAT32 file system.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct ExtendedBootParamBlock {
    // Generic FAT BPB fields.
    bpb_start: BootParamBlockStart,

    // FAT32 specific fields.
    /// Sectors per FAT.
    sectors_per_fat_large: u32,
    /// Extended flags.
    ///
    /// Bit 7 set means mirroring is disabled and bits 0-3 name the active FAT.
    flags: u16,
    version_major: u8,
    version_minor: u8,
    /// Cluster number of the root directory.
    root_cluster: u32,
    fs_info_sector: u16,
    backup_boot_sector: u16,
    _reserved: [u8; 12],

    /// Generic FAT BPB fields.
    bpb_end: BootParamBlockEnd,
}

impl ExtendedBootParamBlock {
    const MIRRORING_DISABLED: u16 = 0x80;
    const ACTIVE_FAT_MASK: u16 = 0x0F;

    #[must_use]
    #[inline]
    /// Returns the number of sectors per FAT.
    pub const fn sectors_per_fat(&self) -> u32 {
        self.sectors_per_fat_large
    }

    #[must_use]
    #[inline]
    /// Returns the flags.
    pub const fn flags(&self) -> u16 {
        self.flags
    }

    #[must_use]
    #[inline]
    /// Returns the index of the FAT copy that is authoritative.
    ///
    /// When mirroring is enabled, every copy is identical and the first one is used.
    pub fn active_fat(&self) -> u32 {
        if self.flags & Self::MIRRORING_DISABLED != 0 {
            u32::from(self.flags & Self::ACTIVE_FAT_MASK)
        } else {
            0
        }
    }

    #[must_use]
    #[inline]
    /// Returns the cluster number of the root directory.
    pub const fn root_cluster(&self) -> u32 {
        self.root_cluster
    }

    #[must_use]
    #[inline]
    /// Returns the volume serial number.
    pub const fn volume_id(&self) -> u32 {
        self.bpb_end.volume_id
    }

    #[must_use]
    #[inline]
    /// Returns the file system type string.
    pub const fn fs_type(&self) -> [u8; 8] {
        self.bpb_end.fs_type
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BootSector {
    /// Jump instruction.
    boot_jump: [u8; 3],
    /// OEM name.
    oem_name: [u8; 8],
    /// Boot Parameter Block (BPB).
    bpb: BootParamBlock,
    boot_code: [u8; 448],
    /// Boot signature.
    boot_signature: [u8; 2],
}
static_assert!(
    size_of::<BootSector>() == 512,
    "BootSector size is not 512 bytes"
);

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct ExtendedBootSector {
    /// Jump instruction.
    boot_jump: [u8; 3],
    /// OEM name.
    oem_name: [u8; 8],
    /// Boot Parameter Block (BPB).
    bpb: ExtendedBootParamBlock,
    boot_code: [u8; 420],
    /// Boot signature.
    boot_signature: [u8; 2],
}
static_assert!(
    size_of::<ExtendedBootSector>() == 512,
    "ExtendedBootSector size is not 512 bytes"
);

impl BootSector {
    #[must_use]
    /// Reads a boot sector from the start of `raw`.
    ///
    /// Returns `None` if `raw` is shorter than 512 bytes.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < size_of::<Self>() {
            return None;
        }
        // Safety: the buffer is large enough and the structure only holds integers,
        // so every bit pattern is a valid value.
        Some(unsafe { raw.as_ptr().cast::<Self>().read_unaligned() })
    }

    #[must_use]
    #[inline]
    pub const fn bpb(&self) -> &BootParamBlock {
        &self.bpb
    }

    #[must_use]
    #[inline]
    pub fn has_signature(&self) -> bool {
        self.boot_signature == BOOT_SIGNATURE
    }
}

impl ExtendedBootSector {
    #[must_use]
    /// Reads a FAT32 boot sector from the start of `raw`.
    ///
    /// Returns `None` if `raw` is shorter than 512 bytes.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < size_of::<Self>() {
            return None;
        }
        // Safety: the buffer is large enough and the structure only holds integers,
        // so every bit pattern is a valid value.
        Some(unsafe { raw.as_ptr().cast::<Self>().read_unaligned() })
    }

    #[must_use]
    #[inline]
    pub const fn bpb(&self) -> &ExtendedBootParamBlock {
        &self.bpb
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Layout of a mounted volume, derived once from its boot sector.
///
/// All sector numbers are absolute on the device.
pub struct Geometry {
    fat_type: FatType,
    sector_size: u32,
    sectors_per_cluster: u32,
    reserved_sectors: u32,
    fat_count: u32,
    fat_size: u32,
    root_entries: u32,
    total_sectors: u32,
    part_start: u64,
    root_dir_start: u64,
    root_dir_cluster: Cluster,
    data_start: u64,
    cluster_count: u32,
    active_fat: u32,
    volume_id: [u8; 8],
}

impl Geometry {
    /// Derives the volume layout from a raw boot sector read at `part_start`.
    pub fn from_boot_sector(raw: &[u8], part_start: u64) -> FatResult<Self> {
        let boot_sector = BootSector::from_bytes(raw).ok_or(FatError::InvalidBootSector)?;
        if !boot_sector.has_signature() {
            return Err(FatError::InvalidSignature);
        }

        let bpb = boot_sector.bpb();
        if !bpb.validate() {
            log::warn!("Rejecting boot sector at {part_start}: inconsistent BPB");
            return Err(FatError::InvalidBootSector);
        }

        let sector_size = u32::from(bpb.bytes_per_sector());
        let sectors_per_cluster = u32::from(bpb.sectors_per_cluster());
        let reserved_sectors = u32::from(bpb.reserved_sectors());
        let fat_count = u32::from(bpb.fat_count());
        let root_entries = u32::from(bpb.root_entries());
        let total_sectors = bpb.total_sectors();

        #[expect(clippy::cast_possible_truncation, reason = "Sector size is at most 4096")]
        let root_dir_sectors = root_entries / (sector_size / DIR_ENTRY_SIZE as u32);

        // FAT32 keeps its FAT size in the extended block
        let extended = if bpb.sectors_per_fat() == 0 {
            ExtendedBootSector::from_bytes(raw).map(|bs| *bs.bpb())
        } else {
            None
        };
        let fat_size = extended.map_or(u32::from(bpb.sectors_per_fat()), |ext| {
            ext.sectors_per_fat()
        });

        let sectors_before_data = fat_count
            .checked_mul(fat_size)
            .and_then(|fats| fats.checked_add(reserved_sectors))
            .and_then(|meta| meta.checked_add(root_dir_sectors))
            .filter(|&meta| meta < total_sectors)
            .ok_or(FatError::InvalidBootSector)?;
        let cluster_count = (total_sectors - sectors_before_data) / sectors_per_cluster;
        let fat_type = FatType::from_cluster_count(cluster_count);

        let root_dir_start =
            part_start + u64::from(reserved_sectors) + u64::from(fat_count) * u64::from(fat_size);

        let (root_dir_cluster, data_start, active_fat, volume_id) = match (fat_type, extended) {
            (FatType::Fat32, Some(ext)) => {
                let active_fat = if ext.active_fat() < fat_count {
                    ext.active_fat()
                } else {
                    log::warn!("Active FAT {} does not exist, using FAT 0", ext.active_fat());
                    0
                };
                (
                    Cluster::new(ext.root_cluster()),
                    root_dir_start,
                    active_fat,
                    ext.fs_type(),
                )
            }
            (FatType::Fat12 | FatType::Fat16, None) => (
                Cluster::new(0),
                root_dir_start + u64::from(root_dir_sectors),
                0,
                bpb.fs_type(),
            ),
            (fat_type, _) => {
                log::warn!("{cluster_count} clusters do not match the {fat_type} BPB layout");
                return Err(FatError::InvalidBootSector);
            }
        };

        Ok(Self {
            fat_type,
            sector_size,
            sectors_per_cluster,
            reserved_sectors,
            fat_count,
            fat_size,
            root_entries,
            total_sectors,
            part_start,
            root_dir_start,
            root_dir_cluster,
            data_start,
            cluster_count,
            active_fat,
            volume_id,
        })
    }

    #[must_use]
    #[inline]
    pub const fn fat_type(&self) -> FatType {
        self.fat_type
    }

    #[must_use]
    #[inline]
    /// Returns the number of bytes per sector.
    pub const fn sector_size(&self) -> usize {
        self.sector_size as usize
    }

    #[must_use]
    #[inline]
    /// Returns the number of sectors per cluster.
    pub const fn sectors_per_cluster(&self) -> u32 {
        self.sectors_per_cluster
    }

    #[must_use]
    #[inline]
    /// Returns the number of bytes per cluster.
    pub const fn bytes_per_cluster(&self) -> u64 {
        self.sector_size as u64 * self.sectors_per_cluster as u64
    }

    #[must_use]
    #[inline]
    pub const fn reserved_sectors(&self) -> u32 {
        self.reserved_sectors
    }

    #[must_use]
    #[inline]
    pub const fn fat_count(&self) -> u32 {
        self.fat_count
    }

    #[must_use]
    #[inline]
    /// Returns the size of one FAT copy in sectors.
    pub const fn fat_size(&self) -> u32 {
        self.fat_size
    }

    #[must_use]
    #[inline]
    pub const fn active_fat(&self) -> u32 {
        self.active_fat
    }

    #[must_use]
    #[inline]
    /// Returns the first sector of the authoritative FAT copy.
    pub const fn fat_start(&self) -> u64 {
        self.part_start
            + self.reserved_sectors as u64
            + self.active_fat as u64 * self.fat_size as u64
    }

    #[must_use]
    #[inline]
    /// Returns the number of entries of the fixed root directory (FAT12/16).
    pub const fn root_entries(&self) -> u32 {
        self.root_entries
    }

    #[must_use]
    #[inline]
    /// Returns the number of sectors spanned by the fixed root directory.
    pub const fn root_dir_sectors(&self) -> u32 {
        self.root_entries / (self.sector_size / DIR_ENTRY_SIZE as u32)
    }

    #[must_use]
    #[inline]
    pub const fn root_dir_start(&self) -> u64 {
        self.root_dir_start
    }

    #[must_use]
    #[inline]
    /// Returns the first cluster of the root directory.
    ///
    /// FAT12/16 volumes have a fixed root region and report cluster 0.
    pub const fn root_dir_cluster(&self) -> Cluster {
        self.root_dir_cluster
    }

    #[must_use]
    #[inline]
    pub const fn data_start(&self) -> u64 {
        self.data_start
    }

    #[must_use]
    #[inline]
    pub const fn total_sectors(&self) -> u32 {
        self.total_sectors
    }

    #[must_use]
    #[inline]
    pub const fn part_start(&self) -> u64 {
        self.part_start
    }

    #[must_use]
    #[inline]
    /// Returns the number of clusters in the data region.
    pub const fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    #[must_use]
    #[inline]
    /// Returns the file system type string stored in the boot sector.
    pub const fn volume_id(&self) -> &[u8; 8] {
        &self.volume_id
    }

    #[must_use]
    #[inline]
    /// Returns true if `cluster` addresses the data region of this volume.
    pub const fn is_data_cluster(&self, cluster: Cluster) -> bool {
        cluster.has_chain() && cluster.value() - 2 < self.cluster_count
    }

    #[must_use]
    #[inline]
    /// Returns the first sector of a data cluster.
    pub const fn cluster_to_sector(&self, cluster: Cluster) -> u64 {
        self.data_start
            + cluster.value().saturating_sub(2) as u64 * self.sectors_per_cluster as u64
    }
}

/// Reads the boot sector at `sector_offset` and derives the volume layout.
pub fn parse_boot_sector<D: BlockDevice>(device: &mut D, sector_offset: u64) -> FatResult<Geometry> {
    let sector_size = device.sector_size();
    if sector_size < size_of::<BootSector>() {
        log::warn!("{sector_size}-byte sectors cannot hold a boot sector");
        return Err(FatError::InvalidBootSector);
    }

    let mut buffer = vec![0; sector_size];
    device.read(&mut buffer, sector_offset)?;

    let geometry = Geometry::from_boot_sector(&buffer, sector_offset)?;
    if geometry.sector_size() != sector_size {
        log::warn!(
            "BPB sector size {} does not match the device ({sector_size})",
            geometry.sector_size()
        );
        return Err(FatError::InvalidBootSector);
    }

    log::debug!(
        "{} geometry: fat_start={} root_dir_start={} data_start={}",
        geometry.fat_type(),
        geometry.fat_start(),
        geometry.root_dir_start(),
        geometry.data_start()
    );
    Ok(geometry)
}
