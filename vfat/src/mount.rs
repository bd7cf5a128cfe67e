//! Bounded table of mounted volumes.
use crate::{
    BlockDevice, DeviceId,
    fat::{FatError, FatResult, Volume, VolumeConfig},
};
use alloc::vec::Vec;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
/// Slot of a volume in a [`MountTable`].
pub struct VolumeId {
    id: usize,
}

impl VolumeId {
    #[must_use]
    #[inline]
    pub const fn id(&self) -> usize {
        self.id
    }
}

impl core::fmt::Display for VolumeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "vol{}", self.id)
    }
}

/// Fixed number of slots, each holding at most one mounted volume.
///
/// A device is mounted at most once: mounting it again replaces the previous mount.
pub struct MountTable<D: BlockDevice> {
    slots: Vec<Option<Volume<D>>>,
    config: VolumeConfig,
}

impl<D: BlockDevice> Default for MountTable<D> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl<D: BlockDevice> MountTable<D> {
    pub const DEFAULT_CAPACITY: usize = 10;

    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_config(capacity, VolumeConfig::default())
    }

    #[must_use]
    /// Creates a table whose volumes are all mounted with `config`.
    pub fn with_config(capacity: usize, config: VolumeConfig) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, config }
    }

    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    #[inline]
    pub fn mounted_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    #[must_use]
    #[inline]
    pub const fn config(&self) -> &VolumeConfig {
        &self.config
    }

    /// Mounts `device` in the first free slot.
    ///
    /// Any stale mount of the same device is torn down first. The device is dropped
    /// if its boot sector cannot be parsed.
    pub fn mount(&mut self, device: D) -> FatResult<VolumeId> {
        let device_id = device.id();
        let stale = self.force_unmount(device_id);
        if stale > 0 {
            log::warn!("{device_id} was already mounted, replaced {stale} stale volume(s)");
        }

        let id = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(FatError::OutOfResources)?;
        let volume = Volume::mount(device, self.config)?;
        self.slots[id] = Some(volume);

        let id = VolumeId { id };
        log::debug!("{device_id} mounted as {id}");
        Ok(id)
    }

    /// Unmounts the volume of `device` and gives the device back.
    pub fn unmount(&mut self, device: DeviceId) -> Option<D> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|vol| vol.device().id() == device))?;
        slot.take().map(Volume::unmount)
    }

    /// Tears down every volume mounted on `device` and frees their slots.
    ///
    /// Returns the number of volumes torn down.
    pub fn force_unmount(&mut self, device: DeviceId) -> usize {
        let mut count = 0;
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|vol| vol.device().id() == device)
                && let Some(mut volume) = slot.take()
            {
                volume.teardown();
                count += 1;
            }
        }
        count
    }

    /// Takes the volume out of slot `id`, leaving the slot free.
    pub fn release_slot(&mut self, id: VolumeId) -> Option<Volume<D>> {
        self.slots.get_mut(id.id)?.take()
    }

    pub fn get(&self, id: VolumeId) -> FatResult<&Volume<D>> {
        self.slots
            .get(id.id)
            .and_then(Option::as_ref)
            .ok_or(FatError::NotMounted)
    }

    pub fn get_mut(&mut self, id: VolumeId) -> FatResult<&mut Volume<D>> {
        self.slots
            .get_mut(id.id)
            .and_then(Option::as_mut)
            .ok_or(FatError::NotMounted)
    }

    /// Stops the device of a single volume.
    pub fn stop_unit(&mut self, id: VolumeId) -> FatResult<()> {
        self.get_mut(id)?.stop()
    }

    /// Stops the device of every mounted volume.
    ///
    /// Every device is asked to stop, the first failure is reported.
    pub fn stop_all(&mut self) -> FatResult<()> {
        let mut result = Ok(());
        for volume in self.slots.iter_mut().flatten() {
            if let Err(err) = volume.stop() {
                log::warn!("Failed to stop {}: {err}", volume.device().id());
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}
