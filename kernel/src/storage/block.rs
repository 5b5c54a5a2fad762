//! Drivers expose their disks as `BlockDevice`s so that partition scanning
//! and filesystems never need to know whether a sector came over AHCI DMA or
//! legacy PIO.

use alloc::{boxed::Box, vec::Vec};

use super::error::StorageError;
use crate::log::TaggedLogger;

const LOGGER: TaggedLogger = TaggedLogger::new("BLOCK");

pub const MAX_BLOCK_DEVICES: usize = 16;

pub trait BlockDevice: Send {
    fn name(&self) -> &str;

    fn sector_count(&self) -> u64;

    fn sector_size(&self) -> u32 {
        512
    }

    /// Read `count` sectors starting at `lba` into the front of `buffer`
    fn read(&mut self, lba: u64, count: u32, buffer: &mut [u8]) -> Result<(), StorageError>;

    fn write(&mut self, lba: u64, count: u32, buffer: &[u8]) -> Result<(), StorageError>;
}

/// Fixed-capacity table of every disk found at boot. Devices are never
/// removed.
pub struct BlockRegistry {
    devices: Vec<Box<dyn BlockDevice>>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        LOGGER.log(format_args!("subsystem initialized"));
        Self {
            devices: Vec::with_capacity(MAX_BLOCK_DEVICES),
        }
    }

    /// Add a device, returning its index in the table
    pub fn register(&mut self, device: Box<dyn BlockDevice>) -> Result<usize, StorageError> {
        if self.devices.len() >= MAX_BLOCK_DEVICES {
            LOGGER.warn(format_args!("no room for {}", device.name()));
            return Err(StorageError::RegistryFull);
        }
        LOGGER.log(format_args!(
            "registered device: {} ({} sectors)",
            device.name(),
            device.sector_count()
        ));
        self.devices.push(device);
        Ok(self.devices.len() - 1)
    }

    pub fn get(&self, name: &str) -> Option<&dyn BlockDevice> {
        self.devices
            .iter()
            .find(|device| device.name() == name)
            .map(|device| device.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn BlockDevice + 'static)> {
        self.devices
            .iter_mut()
            .find(|device| device.name() == name)
            .map(|device| device.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn BlockDevice> {
        self.devices.iter().map(|device| device.as_ref())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A disk held entirely in memory
pub struct RamDisk {
    name: &'static str,
    sectors: Vec<u8>,
}

impl RamDisk {
    pub fn new(name: &'static str, sector_count: usize) -> Self {
        Self {
            name,
            sectors: alloc::vec![0; sector_count * 512],
        }
    }

    fn range(&self, lba: u64, count: u32, len: usize) -> Result<core::ops::Range<usize>, StorageError> {
        let bytes = count as usize * 512;
        if len < bytes {
            return Err(StorageError::BufferSize);
        }
        let start = usize::try_from(lba)
            .ok()
            .and_then(|lba| lba.checked_mul(512))
            .ok_or(StorageError::OutOfRange)?;
        let end = start.checked_add(bytes).ok_or(StorageError::OutOfRange)?;
        if end > self.sectors.len() {
            return Err(StorageError::OutOfRange);
        }
        Ok(start..end)
    }
}

impl BlockDevice for RamDisk {
    fn name(&self) -> &str {
        self.name
    }

    fn sector_count(&self) -> u64 {
        (self.sectors.len() / 512) as u64
    }

    fn read(&mut self, lba: u64, count: u32, buffer: &mut [u8]) -> Result<(), StorageError> {
        let range = self.range(lba, count, buffer.len())?;
        let len = range.len();
        buffer[..len].copy_from_slice(&self.sectors[range]);
        Ok(())
    }

    fn write(&mut self, lba: u64, count: u32, buffer: &[u8]) -> Result<(), StorageError> {
        let range = self.range(lba, count, buffer.len())?;
        let len = range.len();
        self.sectors[range].copy_from_slice(&buffer[..len]);
        Ok(())
    }
}
