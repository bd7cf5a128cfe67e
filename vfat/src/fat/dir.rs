//! Directory scanning, path resolution and enumeration.
use super::{
    Attributes, Cluster, FatError, FatResult, FatType, Volume,
    bs::Geometry,
    dirent::{self, DIR_ENTRY_SIZE, DecodedEntry, DirEntry},
    file::FatNode,
};
use crate::BlockDevice;
use alloc::vec::Vec;

/// Path separator.
pub const SEPARATOR: char = '/';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Unstarted,
    Active { dir: Cluster, index: u64 },
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Resume point of a directory listing.
///
/// A cursor is started by [`Volume::first_entry`] and advanced by [`Volume::next_entry`].
/// Once the end of the directory is reached it stays exhausted.
pub struct DirCursor {
    state: CursorState,
}

impl Default for DirCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl DirCursor {
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self {
            state: CursorState::Unstarted,
        }
    }

    #[must_use]
    #[inline]
    const fn start(dir: Cluster) -> Self {
        Self {
            state: CursorState::Active { dir, index: 0 },
        }
    }

    #[must_use]
    #[inline]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self.state, CursorState::Exhausted)
    }

    #[must_use]
    #[inline]
    /// Returns the directory being listed and the index of the next raw entry to look at.
    pub const fn position(&self) -> Option<(Cluster, u64)> {
        match self.state {
            CursorState::Active { dir, index } => Some((dir, index)),
            CursorState::Unstarted | CursorState::Exhausted => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
/// Where the sectors of a directory live.
enum DirSpan {
    /// The FAT12/16 root region.
    Fixed { start: u64, sectors: u32 },
    /// A cluster chain, currently held by the chain buffer.
    Chained { clusters: usize },
}

impl DirSpan {
    fn sector_count(self, geometry: &Geometry) -> u64 {
        match self {
            Self::Fixed { sectors, .. } => u64::from(sectors),
            Self::Chained { clusters } => clusters as u64 * u64::from(geometry.sectors_per_cluster()),
        }
    }

    /// Absolute sector holding the `index`-th sector of the directory.
    fn sector(self, index: u64, chain: &[Cluster], geometry: &Geometry) -> u64 {
        match self {
            Self::Fixed { start, .. } => start + index,
            Self::Chained { .. } => {
                let per_cluster = u64::from(geometry.sectors_per_cluster());
                #[expect(clippy::cast_possible_truncation, reason = "Bounded by the chain length")]
                let cluster = chain[(index / per_cluster) as usize];
                geometry.cluster_to_sector(cluster) + index % per_cluster
            }
        }
    }
}

#[must_use]
/// Compares a path component against a stored name, ignoring ASCII case.
///
/// Stored names are single bytes, compared as the Latin-1 character they encode.
pub fn names_match(component: &str, name: &[u8]) -> bool {
    let mut chars = component.chars();
    for &b in name {
        match chars.next() {
            Some(c) if c.eq_ignore_ascii_case(&char::from(b)) => {}
            _ => return false,
        }
    }
    chars.next().is_none()
}

impl<D: BlockDevice> Volume<D> {
    /// Locates the sectors of the directory starting at `dir`.
    ///
    /// Returns the span and the cluster the directory is known by,
    /// which differs from `dir` for the FAT32 root.
    fn dir_span(&mut self, dir: Cluster) -> FatResult<(DirSpan, Cluster)> {
        let dir = if dir.has_chain() {
            dir
        } else if self.geometry.fat_type() == FatType::Fat32 {
            self.geometry.root_dir_cluster()
        } else {
            let span = DirSpan::Fixed {
                start: self.geometry.root_dir_start(),
                sectors: self.geometry.root_dir_sectors(),
            };
            return Ok((span, Cluster::new(0)));
        };

        let len = self
            .walker
            .walk(&mut self.cache, &self.geometry, dir, true)?;
        if len == 0 {
            log::warn!("Directory starts at reserved cluster {dir}");
            return Err(FatError::InvalidCluster);
        }
        if len >= self.walker.capacity() {
            log::warn!("Directory at {dir} spans more than {len} clusters");
            return Err(FatError::ChainTooLarge);
        }
        Ok((DirSpan::Chained { clusters: len }, dir))
    }

    /// Looks `name` up in the directory starting at `dir`.
    ///
    /// Both the long and the short name of each entry are compared, ignoring ASCII case.
    /// Volume labels never match. The returned handle has no chain cache yet.
    pub fn find_in_directory(&mut self, dir: Cluster, name: &str) -> FatResult<FatNode> {
        if name.is_empty() {
            return Err(FatError::NotFound);
        }

        let (span, parent) = self.dir_span(dir)?;
        let fat_type = self.geometry.fat_type();
        self.summary.clear();

        for index in 0..span.sector_count(&self.geometry) {
            let sector = span.sector(index, self.walker.chain(), &self.geometry);
            let data = self.cache.fetch(sector)?;
            for chunk in data.chunks_exact(DIR_ENTRY_SIZE) {
                let Some(raw) = chunk.first_chunk::<DIR_ENTRY_SIZE>() else {
                    continue;
                };
                match dirent::decode_entry(fat_type, raw, &mut self.summary) {
                    DecodedEntry::Empty => return Err(FatError::NotFound),
                    DecodedEntry::ShortName => {
                        let summary = &self.summary;
                        if !summary.attributes().is_volume_id()
                            && (names_match(name, summary.name())
                                || names_match(name, summary.short_name()))
                        {
                            log::debug!("Found {name} in directory {parent}");
                            return Ok(FatNode::from_entry(
                                summary,
                                &DirEntry::from_bytes(raw),
                                parent,
                            ));
                        }
                        self.summary.clear();
                    }
                    DecodedEntry::Deleted | DecodedEntry::LongName { .. } => {}
                }
            }
        }

        Err(FatError::NotFound)
    }

    /// Walks `path` from the root, one component at a time.
    ///
    /// A path ending with the separator (or the empty path) names the directory itself.
    fn lookup_path(&mut self, path: &str) -> FatResult<FatNode> {
        let path = path.strip_prefix(SEPARATOR).unwrap_or(path);
        let mut node = FatNode::root();

        let last = match path.rsplit_once(SEPARATOR) {
            Some((parents, last)) => {
                for component in parents.split(SEPARATOR) {
                    node = self.find_in_directory(node.start_cluster(), component)?;
                    if !node.attributes().is_directory() {
                        return Err(FatError::NotADirectory);
                    }
                }
                last
            }
            None => path,
        };

        if last.is_empty() {
            return Ok(node);
        }
        self.find_in_directory(node.start_cluster(), last)
    }

    /// Resolves an absolute path to its start cluster and attributes.
    ///
    /// The root directory resolves to cluster 0 on every FAT type.
    pub fn resolve_path(&mut self, path: &str) -> FatResult<(Cluster, Attributes)> {
        let node = self.lookup_path(path)?;
        Ok((node.start_cluster(), node.attributes()))
    }

    /// Resolves `path` into a handle ready for random-access reads.
    pub fn open(&mut self, path: &str) -> FatResult<FatNode> {
        let mut node = self.lookup_path(path)?;
        self.build_chain_cache(&mut node)?;
        Ok(node)
    }

    /// Starts listing the directory at `path` and returns its first entry.
    pub fn first_entry(&mut self, path: &str, cursor: &mut DirCursor) -> FatResult<Option<FatNode>> {
        let (cluster, attributes) = self.resolve_path(path)?;
        if !attributes.is_directory() {
            return Err(FatError::NotADirectory);
        }

        *cursor = DirCursor::start(cluster);
        self.next_entry(cursor)
    }

    /// Returns the next live entry of a listing, or `None` once the directory is exhausted.
    ///
    /// Deleted entries and long name fragments are consumed silently.
    pub fn next_entry(&mut self, cursor: &mut DirCursor) -> FatResult<Option<FatNode>> {
        let (dir, mut index) = match cursor.state {
            CursorState::Unstarted => return Err(FatError::InvalidCursor),
            CursorState::Exhausted => return Ok(None),
            CursorState::Active { dir, index } => (dir, index),
        };

        let (span, parent) = self.dir_span(dir)?;
        let fat_type = self.geometry.fat_type();
        let per_sector = (self.geometry.sector_size() / DIR_ENTRY_SIZE) as u64;
        let total = span.sector_count(&self.geometry) * per_sector;
        self.summary.clear();

        while index < total {
            let sector = span.sector(index / per_sector, self.walker.chain(), &self.geometry);
            let data = self.cache.fetch(sector)?;
            #[expect(clippy::cast_possible_truncation, reason = "Bounded by the sector size")]
            let start = (index % per_sector) as usize * DIR_ENTRY_SIZE;

            for chunk in data[start..].chunks_exact(DIR_ENTRY_SIZE) {
                index += 1;
                let Some(raw) = chunk.first_chunk::<DIR_ENTRY_SIZE>() else {
                    continue;
                };
                match dirent::decode_entry(fat_type, raw, &mut self.summary) {
                    DecodedEntry::Empty => {
                        cursor.state = CursorState::Exhausted;
                        return Ok(None);
                    }
                    DecodedEntry::ShortName => {
                        cursor.state = CursorState::Active { dir, index };
                        return Ok(Some(FatNode::from_entry(
                            &self.summary,
                            &DirEntry::from_bytes(raw),
                            parent,
                        )));
                    }
                    DecodedEntry::Deleted | DecodedEntry::LongName { .. } => {}
                }
            }
        }

        cursor.state = CursorState::Exhausted;
        Ok(None)
    }

    /// Collects every entry of the directory at `path`.
    pub fn read_dir(&mut self, path: &str) -> FatResult<Vec<FatNode>> {
        let mut cursor = DirCursor::new();
        let mut entries = Vec::new();
        let mut next = self.first_entry(path, &mut cursor)?;
        while let Some(entry) = next {
            entries.push(entry);
            next = self.next_entry(&mut cursor)?;
        }
        Ok(entries)
    }
}
