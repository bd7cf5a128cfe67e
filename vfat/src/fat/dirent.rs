use super::{
    Cluster, FatType, MAX_NAME_LEN,
    date::{Date, DateTime, DosDate, DosDateTime, DosTime},
};
use vfat_core::static_assert;

/// Size of a directory entry in bytes (always 32 bytes)
pub const DIR_ENTRY_SIZE: usize = 32;

/// Length of a decoded 8.3 name, dot and terminator included.
pub const SHORT_NAME_LEN: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Directory entry attributes
pub struct Attributes(u8);

impl Attributes {
    /// Read-only attribute
    pub const READ_ONLY: u8 = 0x01;
    /// Hidden attribute
    pub const HIDDEN: u8 = 0x02;
    /// System attribute
    pub const SYSTEM: u8 = 0x04;
    /// Volume ID attribute
    pub const VOLUME_ID: u8 = 0x08;
    /// Directory attribute
    pub const DIRECTORY: u8 = 0x10;
    /// Archive attribute
    pub const ARCHIVE: u8 = 0x20;
    /// Long file name attribute
    pub const LONG_NAME: u8 = Self::READ_ONLY | Self::HIDDEN | Self::SYSTEM | Self::VOLUME_ID;

    #[must_use]
    #[inline]
    /// Creates a new attribute set
    pub const fn new(attributes: u8) -> Self {
        Self(attributes)
    }

    #[must_use]
    #[inline]
    /// Returns the raw attribute byte
    pub const fn bits(&self) -> u8 {
        self.0
    }

    #[must_use]
    #[inline]
    /// Returns true if the entry is read-only
    pub const fn is_read_only(&self) -> bool {
        self.0 & Self::READ_ONLY != 0
    }

    #[must_use]
    #[inline]
    /// Returns true if the entry is hidden
    pub const fn is_hidden(&self) -> bool {
        self.0 & Self::HIDDEN != 0
    }

    #[must_use]
    #[inline]
    /// Returns true if the entry is a system file
    pub const fn is_system(&self) -> bool {
        self.0 & Self::SYSTEM != 0
    }

    #[must_use]
    #[inline]
    /// Returns true if the entry is a volume ID
    pub const fn is_volume_id(&self) -> bool {
        self.0 & Self::VOLUME_ID != 0
    }

    #[must_use]
    #[inline]
    /// Returns true if the entry is a directory
    pub const fn is_directory(&self) -> bool {
        self.0 & Self::DIRECTORY != 0
    }

    #[must_use]
    #[inline]
    /// Returns true if the entry is archived
    pub const fn is_archive(&self) -> bool {
        self.0 & Self::ARCHIVE != 0
    }

    #[must_use]
    #[inline]
    /// Returns true if the entry is a long file name fragment
    pub const fn is_long_name(&self) -> bool {
        self.0 == Self::LONG_NAME
    }
}

/// FAT directory entry
#[derive(Default, Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct DirEntry {
    /// Filename (8 bytes)
    name: [u8; 8],
    /// Extension (3 bytes)
    ext: [u8; 3],
    /// File attributes
    attr: u8,
    /// Reserved for Windows NT, holds the lowercase flags
    nt_res: u8,
    /// Creation time
    creation_time: DosTime,
    /// Creation date
    creation_date: DosDate,
    /// Last access date
    last_access_date: DosDate,
    /// High word of first cluster number for FAT32
    first_cluster_high: u16,
    /// Last modification time
    write_time: u16,
    /// Last modification date
    write_date: DosDate,
    /// Low word of first cluster number
    first_cluster_low: u16,
    /// File size in bytes
    file_size: u32,
}
static_assert!(size_of::<DirEntry>() == DIR_ENTRY_SIZE);

impl DirEntry {
    /// Deleted entry marker (first byte)
    pub const DELETED_ENTRY: u8 = 0xE5;
    /// End of directory marker (first byte)
    pub const END_OF_ENTRIES: u8 = 0x00;
    /// Stands for a leading 0xE5 byte in the name of a live entry
    pub const KANJI_ESCAPE: u8 = 0x05;
    /// The base name is stored uppercase but must be displayed lowercase
    pub const LOWERCASE_BASE: u8 = 0x08;
    /// The extension is stored uppercase but must be displayed lowercase
    pub const LOWERCASE_EXT: u8 = 0x10;

    #[must_use]
    #[inline]
    pub fn from_bytes(raw: &[u8; DIR_ENTRY_SIZE]) -> Self {
        // Safety: the structure is exactly 32 bytes of plain integers.
        unsafe { raw.as_ptr().cast::<Self>().read_unaligned() }
    }

    #[must_use]
    #[inline]
    /// Returns true if the entry marks the end of the directory
    pub const fn is_free(&self) -> bool {
        self.name[0] == Self::END_OF_ENTRIES
    }

    #[must_use]
    #[inline]
    /// Returns true if the entry is deleted
    pub const fn is_deleted(&self) -> bool {
        self.name[0] == Self::DELETED_ENTRY
    }

    #[must_use]
    #[inline]
    /// Returns the file attributes
    pub const fn attributes(&self) -> Attributes {
        Attributes::new(self.attr)
    }

    #[must_use]
    #[inline]
    /// Returns the name of the file (without extension)
    pub const fn name(&self) -> [u8; 8] {
        self.name
    }

    #[must_use]
    #[inline]
    /// Returns the extension of the file
    pub const fn extension(&self) -> [u8; 3] {
        self.ext
    }

    #[must_use]
    #[inline]
    pub const fn nt_flags(&self) -> u8 {
        self.nt_res
    }

    #[must_use]
    /// Returns the first cluster number
    pub fn first_cluster(&self, fat_type: FatType) -> Cluster {
        let low = u32::from(self.first_cluster_low);
        let high = match fat_type {
            FatType::Fat32 => u32::from(self.first_cluster_high) << 16,
            _ => 0,
        };
        Cluster::new(low | high)
    }

    #[must_use]
    #[inline]
    /// Returns the file size
    pub const fn file_size(&self) -> u32 {
        self.file_size
    }

    #[must_use]
    #[inline]
    /// Returns the creation date and time
    pub fn creation_datetime(&self) -> DateTime {
        DateTime::decode(DosDateTime::new(self.creation_date, self.creation_time))
    }

    #[must_use]
    #[inline]
    /// Returns the last access date
    pub fn last_access_date(&self) -> Date {
        Date::decode(self.last_access_date)
    }

    #[must_use]
    #[inline]
    /// Returns the last write date and time
    pub fn last_write_datetime(&self) -> DateTime {
        DateTime::decode(DosDateTime::new(
            self.write_date,
            DosTime::new(self.write_time, 0),
        ))
    }
}

/// Entry for long file name
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct LongNameEntry {
    /// Sequence number (1-based, bit 6 set for last entry)
    seq_num: u8,
    /// First 5 characters of long name (UTF-16)
    name1: [u8; 10],
    /// Attributes (always 0x0F for LFN)
    attr: u8,
    /// Entry type (always 0 for LFN)
    entry_type: u8,
    /// Checksum of short name
    checksum: u8,
    /// Next 6 characters of long name
    name2: [u8; 12],
    /// First cluster (always 0 for LFN)
    first_cluster: u16,
    /// Last 2 characters of long name
    name3: [u8; 4],
}
static_assert!(size_of::<LongNameEntry>() == DIR_ENTRY_SIZE);

impl LongNameEntry {
    /// Last entry marker in sequence number
    pub const LAST_ENTRY: u8 = 0x40;
    /// Mask of the sequence number itself
    pub const SEQ_MASK: u8 = 0x3F;
    /// Character count per LFN entry
    pub const CHARS_PER_ENTRY: usize = 13;

    #[must_use]
    #[inline]
    pub fn from_bytes(raw: &[u8; DIR_ENTRY_SIZE]) -> Self {
        // Safety: the structure is exactly 32 bytes of plain integers.
        unsafe { raw.as_ptr().cast::<Self>().read_unaligned() }
    }

    #[must_use]
    #[inline]
    /// Returns true if the reserved fields hold what a long name fragment requires
    pub const fn is_well_formed(&self) -> bool {
        Attributes::new(self.attr).is_long_name()
            && self.entry_type == 0
            && self.first_cluster.to_le_bytes()[0] == 0
    }

    #[must_use]
    #[inline]
    /// Returns true if this is the last entry in the long name sequence
    pub const fn is_last(&self) -> bool {
        self.seq_num & Self::LAST_ENTRY != 0
    }

    #[must_use]
    #[inline]
    /// Returns the sequence number
    pub const fn seq_num(&self) -> u8 {
        self.seq_num & Self::SEQ_MASK
    }

    #[must_use]
    #[inline]
    /// Returns the checksum
    pub const fn checksum(&self) -> u8 {
        self.checksum
    }

    #[must_use]
    /// Gets the name part at the given index (0-12)
    pub const fn get_name(&self, idx: usize) -> Option<u16> {
        if idx >= Self::CHARS_PER_ENTRY {
            return None;
        }

        let bytes = if idx < 5 {
            [self.name1[idx * 2], self.name1[idx * 2 + 1]]
        } else if idx < 11 {
            let idx = idx - 5;
            [self.name2[idx * 2], self.name2[idx * 2 + 1]]
        } else {
            let idx = idx - 11;
            [self.name3[idx * 2], self.name3[idx * 2 + 1]]
        };

        Some(u16::from_le_bytes(bytes))
    }

    /// Returns the 13 UTF-16 code units of this fragment, in name order
    pub fn units(&self) -> impl Iterator<Item = u16> + '_ {
        (0..Self::CHARS_PER_ENTRY).filter_map(|idx| self.get_name(idx))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Decoded form of a directory entry, reused across a directory scan.
///
/// Long name fragments write their characters at the position given by their
/// sequence number, so fragments may arrive in any order. Names are kept as
/// bytes; code units above 0xFF are stored as `?`.
pub struct EntrySummary {
    name: [u8; MAX_NAME_LEN],
    short_name: [u8; SHORT_NAME_LEN],
    attributes: Attributes,
    size: u32,
    cluster: Cluster,
}

impl Default for EntrySummary {
    fn default() -> Self {
        Self::new()
    }
}

impl EntrySummary {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            name: [0; MAX_NAME_LEN],
            short_name: [0; SHORT_NAME_LEN],
            attributes: Attributes::new(0),
            size: 0,
            cluster: Cluster::new(0),
        }
    }

    /// Forgets both names.
    pub const fn clear(&mut self) {
        self.name[0] = 0;
        self.short_name[0] = 0;
    }

    #[must_use]
    /// Returns the long name, or the short name if the entry has no long name
    pub fn name(&self) -> &[u8] {
        until_nul(&self.name)
    }

    #[must_use]
    /// Returns the 8.3 name, such as `README.TXT`
    pub fn short_name(&self) -> &[u8] {
        until_nul(&self.short_name)
    }

    #[must_use]
    #[inline]
    pub const fn attributes(&self) -> Attributes {
        self.attributes
    }

    #[must_use]
    #[inline]
    pub const fn size(&self) -> u32 {
        self.size
    }

    #[must_use]
    #[inline]
    pub const fn cluster(&self) -> Cluster {
        self.cluster
    }
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..len]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Kind of a raw directory entry.
pub enum DecodedEntry {
    /// End of the directory, nothing follows.
    Empty,
    /// A deleted entry, to be skipped.
    Deleted,
    /// An 8.3 entry; the summary now describes a complete entry.
    ShortName,
    /// A long name fragment; `terminal` is set on the fragment holding the end of the name.
    LongName { terminal: bool },
}

/// Decodes a raw entry into `summary`.
///
/// The summary keeps any long name gathered from earlier fragments, so the caller
/// clears it once a short entry has been consumed.
pub fn decode_entry(
    fat_type: FatType,
    raw: &[u8; DIR_ENTRY_SIZE],
    summary: &mut EntrySummary,
) -> DecodedEntry {
    match raw[0] {
        DirEntry::END_OF_ENTRIES => return DecodedEntry::Empty,
        DirEntry::DELETED_ENTRY => return DecodedEntry::Deleted,
        _ => {}
    }

    let lfn = LongNameEntry::from_bytes(raw);
    if lfn.is_well_formed() {
        decode_long_name(&lfn, summary);
        return DecodedEntry::LongName {
            terminal: lfn.is_last(),
        };
    }

    decode_short_name(fat_type, &DirEntry::from_bytes(raw), summary);
    DecodedEntry::ShortName
}

fn decode_long_name(lfn: &LongNameEntry, summary: &mut EntrySummary) {
    let seq = lfn.seq_num();
    if seq == 0 {
        log::warn!("Ignoring long name fragment with sequence number 0");
        return;
    }

    let last = MAX_NAME_LEN - 1;
    let mut offset = usize::from(seq - 1) * LongNameEntry::CHARS_PER_ENTRY;
    for unit in lfn.units() {
        if unit == 0 || offset >= last {
            summary.name[offset.min(last)] = 0;
            break;
        }
        summary.name[offset] = u8::try_from(unit).unwrap_or(b'?');
        offset += 1;
    }

    if lfn.is_last() {
        summary.name[offset.min(last)] = 0;
    }
}

fn decode_short_name(fat_type: FatType, entry: &DirEntry, summary: &mut EntrySummary) {
    let flags = entry.nt_flags();
    let fold = |b: u8, mask: u8| {
        if flags & mask != 0 {
            b.to_ascii_lowercase()
        } else {
            b
        }
    };

    let mut len = 0;
    for (idx, b) in entry.name().into_iter().enumerate() {
        if b == b' ' {
            break;
        }
        let b = if idx == 0 && b == DirEntry::KANJI_ESCAPE {
            DirEntry::DELETED_ENTRY
        } else {
            b
        };
        summary.short_name[len] = fold(b, DirEntry::LOWERCASE_BASE);
        len += 1;
    }
    for (idx, b) in entry.extension().into_iter().enumerate() {
        if b == b' ' {
            break;
        }
        if idx == 0 {
            summary.short_name[len] = b'.';
            len += 1;
        }
        summary.short_name[len] = fold(b, DirEntry::LOWERCASE_EXT);
        len += 1;
    }
    summary.short_name[len] = 0;

    if summary.name[0] == 0 {
        summary.name[..=len].copy_from_slice(&summary.short_name[..=len]);
    }

    summary.attributes = entry.attributes();
    summary.size = entry.file_size();
    summary.cluster = entry.first_cluster(fat_type);
}
