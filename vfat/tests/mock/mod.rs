#![allow(dead_code)]
//! In-memory block device and FAT image builder shared by the integration tests.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    rc::Rc,
};
use vfat::{BlockDevice, BlockDeviceError, DeviceId, fat::FatType};

pub const SECTOR_SIZE: usize = 512;

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;

/// 2024-03-15
pub const STAMP_DATE: u16 = (44 << 9) | (3 << 5) | 15;
/// 10:30:42
pub const STAMP_TIME: u16 = (10 << 11) | (30 << 5) | 21;

/// Deterministic file contents.
pub fn pattern(len: usize, seed: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + seed) % 251) as u8).collect()
}

#[derive(Default, Clone)]
/// Shared view on a [`MockDisk`] that outlives moving the disk into a volume.
pub struct DiskProbe {
    reads: Rc<Cell<u64>>,
    stops: Rc<Cell<u32>>,
    failing: Rc<RefCell<HashSet<u64>>>,
}

impl DiskProbe {
    /// Number of sectors read from the device so far.
    pub fn reads(&self) -> u64 {
        self.reads.get()
    }

    pub fn stops(&self) -> u32 {
        self.stops.get()
    }

    /// Makes every read touching `sector` fail.
    pub fn fail_sector(&self, sector: u64) {
        self.failing.borrow_mut().insert(sector);
    }

    pub fn heal(&self) {
        self.failing.borrow_mut().clear();
    }
}

/// Sparse disk: sectors that were never written read as zeros.
pub struct MockDisk {
    id: DeviceId,
    sector_offset: u64,
    sectors: HashMap<u64, Vec<u8>>,
    probe: DiskProbe,
}

impl MockDisk {
    pub fn new(id: u32, sector_offset: u64) -> Self {
        Self {
            id: DeviceId::new(id),
            sector_offset,
            sectors: HashMap::new(),
            probe: DiskProbe::default(),
        }
    }

    pub fn probe(&self) -> DiskProbe {
        self.probe.clone()
    }

    /// Replaces the device identity, to mount the same image as another medium.
    pub fn with_id(mut self, id: u32) -> Self {
        self.id = DeviceId::new(id);
        self
    }

    pub fn write(&mut self, sector: u64, offset: usize, data: &[u8]) {
        let mut sector = sector;
        let mut offset = offset;
        let mut data = data;
        while !data.is_empty() {
            let n = (SECTOR_SIZE - offset).min(data.len());
            let line = self
                .sectors
                .entry(sector)
                .or_insert_with(|| vec![0; SECTOR_SIZE]);
            line[offset..offset + n].copy_from_slice(&data[..n]);
            data = &data[n..];
            sector += 1;
            offset = 0;
        }
    }

    pub fn sector(&self, sector: u64) -> Vec<u8> {
        self.sectors
            .get(&sector)
            .cloned()
            .unwrap_or_else(|| vec![0; SECTOR_SIZE])
    }
}

impl BlockDevice for MockDisk {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn sector_size(&self) -> usize {
        SECTOR_SIZE
    }

    fn sector_offset(&self) -> u64 {
        self.sector_offset
    }

    fn read(&mut self, dst: &mut [u8], sector: u64) -> Result<(), BlockDeviceError> {
        let count = self.sectors_in(dst.len())?;
        for (i, chunk) in dst.chunks_exact_mut(SECTOR_SIZE).enumerate().take(count) {
            let sector = sector + i as u64;
            if self.probe.failing.borrow().contains(&sector) {
                return Err(BlockDeviceError::Io);
            }
            match self.sectors.get(&sector) {
                Some(data) => chunk.copy_from_slice(data),
                None => chunk.fill(0),
            }
            self.probe.reads.set(self.probe.reads.get() + 1);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BlockDeviceError> {
        self.probe.stops.set(self.probe.stops.get() + 1);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A directory of the image being built, known by its first cluster.
///
/// The FAT12/16 root directory is cluster 0.
pub struct Dir(pub u32);

struct DirState {
    clusters: Vec<u32>,
    fill: usize,
}

/// Formats a FAT image cluster by cluster.
pub struct ImageBuilder {
    kind: FatType,
    sectors_per_cluster: u32,
    reserved: u32,
    fat_count: u32,
    fat_size: u32,
    root_entries: u32,
    total: u32,
    part_start: u64,
    active_fat: Option<u32>,
    signature: bool,
    fat: Vec<u32>,
    next_free: u32,
    dirs: HashMap<u32, DirState>,
    tails: u32,
    disk: MockDisk,
}

impl ImageBuilder {
    /// 1.44MB floppy layout: 2847 clusters of one sector.
    pub fn fat12() -> Self {
        Self::new(FatType::Fat12, 1, 1, 9, 224, 2880)
    }

    /// 8143 clusters of two sectors.
    pub fn fat16() -> Self {
        Self::new(FatType::Fat16, 2, 1, 32, 512, 16384)
    }

    /// 68874 clusters of one sector, root directory at cluster 2.
    pub fn fat32() -> Self {
        Self::new(FatType::Fat32, 1, 32, 547, 0, 70000)
    }

    fn new(
        kind: FatType,
        sectors_per_cluster: u32,
        reserved: u32,
        fat_size: u32,
        root_entries: u32,
        total: u32,
    ) -> Self {
        let mut builder = Self {
            kind,
            sectors_per_cluster,
            reserved,
            fat_count: 2,
            fat_size,
            root_entries,
            total,
            part_start: 0,
            active_fat: None,
            signature: true,
            fat: Vec::new(),
            next_free: 2,
            dirs: HashMap::new(),
            tails: 0,
            disk: MockDisk::new(1, 0),
        };
        let (media, eoc) = (0x0FFF_FFF8 & builder.mask(), builder.end_of_chain());
        builder.fat = vec![0; builder.cluster_count() as usize + 2];
        builder.fat[0] = media;
        builder.fat[1] = eoc;

        if kind == FatType::Fat32 {
            let root = builder.alloc_contiguous(1);
            builder.dirs.insert(
                root[0],
                DirState {
                    clusters: root,
                    fill: 0,
                },
            );
        } else {
            builder.dirs.insert(
                0,
                DirState {
                    clusters: Vec::new(),
                    fill: 0,
                },
            );
        }
        builder
    }

    /// Places the volume at `sector` of the disk. Must be called before adding content.
    pub fn partition_start(mut self, sector: u64) -> Self {
        self.part_start = sector;
        self.disk.sector_offset = sector;
        self
    }

    pub fn device_id(mut self, id: u32) -> Self {
        self.disk.id = DeviceId::new(id);
        self
    }

    /// Disables FAT mirroring and makes `fat` the only valid copy (FAT32).
    pub fn active_fat(mut self, fat: u32) -> Self {
        self.active_fat = Some(fat);
        self
    }

    pub fn without_signature(mut self) -> Self {
        self.signature = false;
        self
    }

    pub fn kind(&self) -> FatType {
        self.kind
    }

    pub fn root(&self) -> Dir {
        if self.kind == FatType::Fat32 { Dir(2) } else { Dir(0) }
    }

    pub fn bytes_per_cluster(&self) -> usize {
        SECTOR_SIZE * self.sectors_per_cluster as usize
    }

    fn root_dir_sectors(&self) -> u32 {
        self.root_entries * 32 / SECTOR_SIZE as u32
    }

    pub fn cluster_count(&self) -> u32 {
        let meta = self.reserved + self.fat_count * self.fat_size + self.root_dir_sectors();
        (self.total - meta) / self.sectors_per_cluster
    }

    pub fn root_dir_start(&self) -> u64 {
        self.part_start + u64::from(self.reserved + self.fat_count * self.fat_size)
    }

    pub fn data_start(&self) -> u64 {
        self.root_dir_start() + u64::from(self.root_dir_sectors())
    }

    pub fn fat_start(&self, copy: u32) -> u64 {
        self.part_start + u64::from(self.reserved + copy * self.fat_size)
    }

    pub fn cluster_to_sector(&self, cluster: u32) -> u64 {
        self.data_start() + u64::from(cluster - 2) * u64::from(self.sectors_per_cluster)
    }

    fn mask(&self) -> u32 {
        self.kind.entry_mask()
    }

    pub fn end_of_chain(&self) -> u32 {
        self.mask()
    }

    /// Writes a raw FAT record.
    pub fn set_fat(&mut self, cluster: u32, value: u32) {
        self.fat[cluster as usize] = value;
    }

    /// Links `clusters` in order and terminates the chain.
    pub fn link(&mut self, clusters: &[u32]) {
        for pair in clusters.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        if let Some(&last) = clusters.last() {
            let eoc = self.end_of_chain();
            self.set_fat(last, eoc);
        }
        if let Some(&max) = clusters.iter().max() {
            self.next_free = self.next_free.max(max + 1);
        }
    }

    /// Allocates `count` consecutive free clusters as one chain.
    pub fn alloc_contiguous(&mut self, count: usize) -> Vec<u32> {
        let start = self.next_free;
        let clusters: Vec<u32> = (start..start + count as u32).collect();
        self.link(&clusters);
        clusters
    }

    fn write_cluster_data(&mut self, clusters: &[u32], data: &[u8]) {
        let bpc = self.bytes_per_cluster();
        for (chunk, &cluster) in data.chunks(bpc).zip(clusters) {
            let sector = self.cluster_to_sector(cluster);
            self.disk.write(sector, 0, chunk);
        }
    }

    fn push_entry(&mut self, dir: Dir, raw: &[u8; 32]) {
        let fixed_root = dir.0 == 0 && self.kind != FatType::Fat32;
        let bpc = self.bytes_per_cluster();
        let root_start = self.root_dir_start();
        let root_entries = self.root_entries as usize;

        let state = self.dirs.get_mut(&dir.0).expect("unknown directory");
        let byte = state.fill * 32;
        state.fill += 1;
        let cluster = if fixed_root {
            None
        } else {
            Some(*state.clusters.get(byte / bpc).expect("directory full"))
        };

        let sector = match cluster {
            None => {
                assert!(byte / 32 < root_entries, "root directory full");
                root_start + (byte / SECTOR_SIZE) as u64
            }
            Some(cluster) => self.cluster_to_sector(cluster) + ((byte % bpc) / SECTOR_SIZE) as u64,
        };
        self.disk.write(sector, byte % SECTOR_SIZE, raw);
    }

    /// Appends a raw short entry.
    pub fn add_short_entry(
        &mut self,
        dir: Dir,
        name: &[u8; 11],
        attr: u8,
        nt_flags: u8,
        cluster: u32,
        size: u32,
    ) {
        let raw = short_entry(name, attr, nt_flags, cluster, size);
        self.push_entry(dir, &raw);
    }

    /// Appends an entry, preceded by long name fragments unless `name` is a valid 8.3 name.
    pub fn add_entry(&mut self, dir: Dir, name: &str, attr: u8, cluster: u32, size: u32) {
        let short = if let Some(short) = short_name(name) {
            short
        } else {
            self.tails += 1;
            let short = generated_short_name(name, self.tails);
            for fragment in long_name_entries(name, checksum(&short)) {
                self.push_entry(dir, &fragment);
            }
            short
        };
        self.add_short_entry(dir, &short, attr, 0, cluster, size);
    }

    /// Leaves a deleted entry behind.
    pub fn add_deleted(&mut self, dir: Dir, name: &[u8; 11]) {
        let mut raw = short_entry(name, ATTR_ARCHIVE, 0, 0, 0);
        raw[0] = 0xE5;
        self.push_entry(dir, &raw);
    }

    pub fn add_volume_label(&mut self, label: &[u8; 11]) {
        let root = self.root();
        self.add_short_entry(root, label, ATTR_VOLUME_ID, 0, 0, 0);
    }

    /// Creates a directory of `clusters` consecutive clusters, with its dot entries.
    pub fn mkdir(&mut self, parent: Dir, name: &str, clusters: usize) -> Dir {
        let chain = self.alloc_contiguous(clusters);
        self.mkdir_at(parent, name, &chain)
    }

    /// Creates a directory over an explicit chain.
    pub fn mkdir_at(&mut self, parent: Dir, name: &str, chain: &[u32]) -> Dir {
        self.link(chain);
        let dir = Dir(chain[0]);
        self.add_entry(parent, name, ATTR_DIRECTORY, dir.0, 0);
        self.dirs.insert(
            dir.0,
            DirState {
                clusters: chain.to_vec(),
                fill: 0,
            },
        );
        let parent_cluster = if parent == self.root() { 0 } else { parent.0 };
        self.add_short_entry(dir, b".          ", ATTR_DIRECTORY, 0, dir.0, 0);
        self.add_short_entry(dir, b"..         ", ATTR_DIRECTORY, 0, parent_cluster, 0);
        dir
    }

    /// Adds a file stored on consecutive clusters and returns its chain.
    pub fn add_file(&mut self, dir: Dir, name: &str, data: &[u8]) -> Vec<u32> {
        let count = data.len().div_ceil(self.bytes_per_cluster());
        let chain = self.alloc_contiguous(count);
        self.add_file_at(dir, name, data, &chain);
        chain
    }

    /// Adds a file stored on an explicit chain.
    pub fn add_file_at(&mut self, dir: Dir, name: &str, data: &[u8], chain: &[u32]) {
        assert!(chain.len() * self.bytes_per_cluster() >= data.len());
        self.link(chain);
        self.write_cluster_data(chain, data);
        let start = chain.first().copied().unwrap_or(0);
        self.add_entry(dir, name, ATTR_ARCHIVE, start, data.len() as u32);
    }

    fn fat_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.fat_size as usize * SECTOR_SIZE];
        for (cluster, &value) in self.fat.iter().enumerate() {
            match self.kind {
                FatType::Fat12 => {
                    let offset = cluster + cluster / 2;
                    if cluster & 1 == 0 {
                        bytes[offset] = value as u8;
                        bytes[offset + 1] = (bytes[offset + 1] & 0xF0) | ((value >> 8) & 0x0F) as u8;
                    } else {
                        bytes[offset] = (bytes[offset] & 0x0F) | ((value << 4) & 0xF0) as u8;
                        bytes[offset + 1] = (value >> 4) as u8;
                    }
                }
                FatType::Fat16 => {
                    bytes[cluster * 2..cluster * 2 + 2].copy_from_slice(&(value as u16).to_le_bytes());
                }
                FatType::Fat32 => {
                    bytes[cluster * 4..cluster * 4 + 4].copy_from_slice(&value.to_le_bytes());
                }
            }
        }
        bytes
    }

    fn boot_sector(&self) -> [u8; SECTOR_SIZE] {
        let mut bs = [0u8; SECTOR_SIZE];
        bs[..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        bs[3..11].copy_from_slice(b"MSWIN4.1");
        bs[0x0B..0x0D].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
        bs[0x0D] = self.sectors_per_cluster as u8;
        bs[0x0E..0x10].copy_from_slice(&(self.reserved as u16).to_le_bytes());
        bs[0x10] = self.fat_count as u8;
        bs[0x11..0x13].copy_from_slice(&(self.root_entries as u16).to_le_bytes());
        bs[0x15] = 0xF8;
        bs[0x1C..0x20].copy_from_slice(&(self.part_start as u32).to_le_bytes());

        if self.kind == FatType::Fat32 {
            bs[0x20..0x24].copy_from_slice(&self.total.to_le_bytes());
            bs[0x24..0x28].copy_from_slice(&self.fat_size.to_le_bytes());
            let flags = self.active_fat.map_or(0u16, |fat| 0x80 | fat as u16);
            bs[0x28..0x2A].copy_from_slice(&flags.to_le_bytes());
            bs[0x2C..0x30].copy_from_slice(&2u32.to_le_bytes());
            bs[0x30..0x32].copy_from_slice(&1u16.to_le_bytes());
            bs[0x42] = 0x29;
            bs[0x43..0x47].copy_from_slice(&0x1234_5678u32.to_le_bytes());
            bs[0x47..0x52].copy_from_slice(b"NO NAME    ");
            bs[0x52..0x5A].copy_from_slice(b"FAT32   ");
        } else {
            if let Ok(total) = u16::try_from(self.total) {
                bs[0x13..0x15].copy_from_slice(&total.to_le_bytes());
            } else {
                bs[0x20..0x24].copy_from_slice(&self.total.to_le_bytes());
            }
            bs[0x16..0x18].copy_from_slice(&(self.fat_size as u16).to_le_bytes());
            bs[0x26] = 0x29;
            bs[0x27..0x2B].copy_from_slice(&0x1234_5678u32.to_le_bytes());
            bs[0x2B..0x36].copy_from_slice(b"NO NAME    ");
            let fs_type = if self.kind == FatType::Fat12 { b"FAT12   " } else { b"FAT16   " };
            bs[0x36..0x3E].copy_from_slice(fs_type);
        }

        if self.signature {
            bs[510] = 0x55;
            bs[511] = 0xAA;
        }
        bs
    }

    /// Writes the boot sector and every FAT copy, and hands the disk over.
    ///
    /// With mirroring disabled, copies other than the active one are left blank.
    pub fn finish(mut self) -> MockDisk {
        let boot_sector = self.boot_sector();
        self.disk.write(self.part_start, 0, &boot_sector);

        let fat = self.fat_bytes();
        for copy in 0..self.fat_count {
            if self.active_fat.is_some_and(|active| active != copy) {
                continue;
            }
            let start = self.fat_start(copy);
            for (i, sector) in fat.chunks(SECTOR_SIZE).enumerate() {
                if sector.iter().any(|&b| b != 0) {
                    self.disk.write(start + i as u64, 0, sector);
                }
            }
        }
        self.disk
    }
}

fn short_entry(name: &[u8; 11], attr: u8, nt_flags: u8, cluster: u32, size: u32) -> [u8; 32] {
    let mut raw = [0u8; 32];
    raw[..11].copy_from_slice(name);
    raw[11] = attr;
    raw[12] = nt_flags;
    raw[13] = 0;
    raw[14..16].copy_from_slice(&STAMP_TIME.to_le_bytes());
    raw[16..18].copy_from_slice(&STAMP_DATE.to_le_bytes());
    raw[18..20].copy_from_slice(&STAMP_DATE.to_le_bytes());
    raw[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
    raw[22..24].copy_from_slice(&STAMP_TIME.to_le_bytes());
    raw[24..26].copy_from_slice(&STAMP_DATE.to_le_bytes());
    raw[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
    raw[28..32].copy_from_slice(&size.to_le_bytes());
    raw
}

fn is_short_char(c: u8) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || c == b'_' || c == b'-'
}

/// Space padded 8.3 form of `name`, if it has one.
fn short_name(name: &str) -> Option<[u8; 11]> {
    let (base, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    if base.is_empty()
        || base.len() > 8
        || ext.len() > 3
        || !base.bytes().chain(ext.bytes()).all(is_short_char)
    {
        return None;
    }
    let mut short = [b' '; 11];
    short[..base.len()].copy_from_slice(base.as_bytes());
    short[8..8 + ext.len()].copy_from_slice(ext.as_bytes());
    Some(short)
}

fn generated_short_name(name: &str, tail: u32) -> [u8; 11] {
    let (base, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    let tail = format!("~{tail}");
    let clean = |s: &str, max: usize| -> Vec<u8> {
        s.bytes()
            .map(|b| b.to_ascii_uppercase())
            .filter(|&b| is_short_char(b))
            .take(max)
            .collect()
    };
    let mut base = clean(base, 8 - tail.len());
    if base.is_empty() {
        base.push(b'_');
    }
    base.extend_from_slice(tail.as_bytes());
    let ext = clean(ext, 3);

    let mut short = [b' '; 11];
    short[..base.len()].copy_from_slice(&base);
    short[8..8 + ext.len()].copy_from_slice(&ext);
    short
}

fn checksum(short: &[u8; 11]) -> u8 {
    short
        .iter()
        .fold(0u8, |sum, &b| ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(b))
}

/// Long name fragments in on-disk order, last fragment first.
fn long_name_entries(name: &str, checksum: u8) -> Vec<[u8; 32]> {
    const SLOTS: [usize; 13] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

    let units: Vec<u16> = name.encode_utf16().collect();
    let count = units.len().div_ceil(13);
    let mut entries = Vec::with_capacity(count);

    for seq in (1..=count).rev() {
        let mut raw = [0u8; 32];
        raw[0] = seq as u8 | if seq == count { 0x40 } else { 0 };
        raw[11] = 0x0F;
        raw[13] = checksum;
        for (i, &slot) in SLOTS.iter().enumerate() {
            let idx = (seq - 1) * 13 + i;
            let unit = match idx.cmp(&units.len()) {
                std::cmp::Ordering::Less => units[idx],
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 0xFFFF,
            };
            raw[slot..slot + 2].copy_from_slice(&unit.to_le_bytes());
        }
        entries.push(raw);
    }
    entries
}
