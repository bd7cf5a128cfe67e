//! Read-only FAT12/16/32 file system driver.
//!
//! The driver sits on top of any [`BlockDevice`]: a volume is mounted from the
//! boot sector found at the device's sector offset, then paths can be resolved,
//! directories enumerated and files read at arbitrary offsets.
#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::doc_markdown
)]

extern crate alloc;

pub mod cache;
pub mod fat;
pub mod mount;

pub use vfat_core::storage::{BlockDevice, BlockDeviceError, DeviceId};
