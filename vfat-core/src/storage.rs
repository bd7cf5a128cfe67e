use alloc::boxed::Box;
use thiserror::Error;

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
/// An error that can occur when performing block device operations.
pub enum BlockDeviceError {
    #[error("I/O error")]
    Io,
    #[error("Out of bounds")]
    OutOfBounds,
    #[error("Unsupported operation")]
    Unsupported,
    #[error("Unaligned access")]
    UnalignedAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Identity of a physical device.
///
/// Two handles that report the same `DeviceId` are considered to be the same medium.
pub struct DeviceId(u32);

impl DeviceId {
    #[must_use]
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// A trait for sector-addressable block devices.
///
/// These are physical devices (such as hard drives and USB sticks), or partitions of them,
/// that can only be read in whole sectors.
pub trait BlockDevice {
    /// Returns the identity of the underlying medium.
    fn id(&self) -> DeviceId;

    /// Returns the size of a sector in bytes.
    fn sector_size(&self) -> usize;

    /// Returns the absolute sector at which the volume starts on the medium.
    fn sector_offset(&self) -> u64;

    /// Read sectors from the device into the given buffer.
    ///
    /// The `sector` parameter is an absolute sector number on the medium.
    ///
    /// ## Errors
    ///
    /// This function returns an error if the read operation failed
    /// or if `dst.len()` isn't a multiple of `self.sector_size()`.
    fn read(&mut self, dst: &mut [u8], sector: u64) -> Result<(), BlockDeviceError>;

    /// Shuts the device down.
    ///
    /// Devices that hold no state can rely on the default implementation.
    fn stop(&mut self) -> Result<(), BlockDeviceError> {
        Ok(())
    }

    /// Returns the number of whole sectors covered by `len` bytes.
    ///
    /// ## Errors
    ///
    /// Returns `UnalignedAccess` if `len` is not a multiple of the sector size.
    fn sectors_in(&self, len: usize) -> Result<usize, BlockDeviceError> {
        let sector_size = self.sector_size();
        if sector_size == 0 || len % sector_size != 0 {
            return Err(BlockDeviceError::UnalignedAccess);
        }
        Ok(len / sector_size)
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    #[inline]
    fn id(&self) -> DeviceId {
        (**self).id()
    }

    #[inline]
    fn sector_size(&self) -> usize {
        (**self).sector_size()
    }

    #[inline]
    fn sector_offset(&self) -> u64 {
        (**self).sector_offset()
    }

    #[inline]
    fn read(&mut self, dst: &mut [u8], sector: u64) -> Result<(), BlockDeviceError> {
        (**self).read(dst, sector)
    }

    #[inline]
    fn stop(&mut self) -> Result<(), BlockDeviceError> {
        (**self).stop()
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for Box<T> {
    #[inline]
    fn id(&self) -> DeviceId {
        (**self).id()
    }

    #[inline]
    fn sector_size(&self) -> usize {
        (**self).sector_size()
    }

    #[inline]
    fn sector_offset(&self) -> u64 {
        (**self).sector_offset()
    }

    #[inline]
    fn read(&mut self, dst: &mut [u8], sector: u64) -> Result<(), BlockDeviceError> {
        (**self).read(dst, sector)
    }

    #[inline]
    fn stop(&mut self) -> Result<(), BlockDeviceError> {
        (**self).stop()
    }
}
