//! Legacy ATA PIO driver for the master drive on the primary channel. It is
//! the fallback when no AHCI controller is present, and moves one sector per
//! command through the data port.

use alloc::sync::Arc;

use super::block::BlockDevice;
use super::error::StorageError;
use super::protocol::{AtaCommand, IdentifyData, LBA28_LIMIT, SECTOR_SIZE};
use crate::arch::port::PortIo;
use crate::log::TaggedLogger;

const LOGGER: TaggedLogger = TaggedLogger::new("ATA");

pub const PRIMARY_IO: u16 = 0x1f0;
pub const PRIMARY_CONTROL: u16 = 0x3f6;

const REG_DATA: u16 = 0;
const REG_SECTOR_COUNT: u16 = 2;
const REG_LBA_LOW: u16 = 3;
const REG_LBA_MID: u16 = 4;
const REG_LBA_HIGH: u16 = 5;
const REG_DRIVE_SELECT: u16 = 6;
const REG_COMMAND: u16 = 7;
const REG_STATUS: u16 = 7;

const STATUS_ERR: u8 = 0x01;
const STATUS_DRQ: u8 = 0x08;
const STATUS_BSY: u8 = 0x80;

const SELECT_MASTER: u8 = 0xa0;
const SELECT_MASTER_LBA: u8 = 0xe0;

/// Status reads allowed before a command is declared hung
const STATUS_POLL_LIMIT: usize = 1_000_000;

pub struct AtaPio {
    io: Arc<dyn PortIo>,
    base_port: u16,
    control_port: u16,
    info: Option<IdentifyData>,
    allow_mbr_write: bool,
}

impl AtaPio {
    pub fn new(io: Arc<dyn PortIo>, base_port: u16, control_port: u16) -> Self {
        Self {
            io,
            base_port,
            control_port,
            info: None,
            allow_mbr_write: false,
        }
    }

    /// Probe the primary master. Returns the drive only if it answers
    /// IDENTIFY.
    pub fn init(io: Arc<dyn PortIo>) -> Option<Self> {
        LOGGER.log(format_args!("init"));
        let mut drive = Self::new(io, PRIMARY_IO, PRIMARY_CONTROL);
        match drive.identify() {
            Ok(info) => {
                LOGGER.log(format_args!("device detected: {}", info));
                Some(drive)
            }
            Err(err) => {
                LOGGER.log(format_args!("no device ({})", err));
                None
            }
        }
    }

    pub fn info(&self) -> Option<&IdentifyData> {
        self.info.as_ref()
    }

    /// Sector 0 holds the partition table and is refused by `write_sector`
    /// until this is enabled
    pub fn set_allow_mbr_write(&mut self, enabled: bool) {
        self.allow_mbr_write = enabled;
    }

    fn read_status(&self) -> u8 {
        self.io.read_u8(self.base_port + REG_STATUS)
    }

    /// Roughly 400ns: four reads of the alternate status register
    fn io_wait(&self) {
        for _ in 0..4 {
            self.io.read_u8(self.control_port);
        }
    }

    fn write_register(&self, register: u16, value: u8) {
        self.io.write_u8(self.base_port + register, value);
    }

    fn wait_not_busy(&self) -> Result<u8, StorageError> {
        for _ in 0..STATUS_POLL_LIMIT {
            let status = self.read_status();
            if status & STATUS_BSY == 0 {
                return Ok(status);
            }
        }
        Err(StorageError::Timeout)
    }

    /// Wait for the drive to finish and ask for data. An error bit at either
    /// stage fails the command.
    fn wait_for_data(&self) -> Result<(), StorageError> {
        let mut status = self.wait_not_busy()?;
        for _ in 0..STATUS_POLL_LIMIT {
            if status & STATUS_ERR != 0 {
                return Err(StorageError::DeviceError);
            }
            if status & STATUS_DRQ != 0 {
                return Ok(());
            }
            status = self.read_status();
        }
        Err(StorageError::Timeout)
    }

    pub fn identify(&mut self) -> Result<IdentifyData, StorageError> {
        self.write_register(REG_DRIVE_SELECT, SELECT_MASTER);
        self.io_wait();
        for register in [REG_SECTOR_COUNT, REG_LBA_LOW, REG_LBA_MID, REG_LBA_HIGH] {
            self.write_register(register, 0);
        }
        self.io_wait();

        self.write_register(REG_COMMAND, AtaCommand::Identify as u8);
        if self.read_status() == 0 {
            return Err(StorageError::NoDevice);
        }
        self.wait_for_data().map_err(|_| StorageError::IdentifyFailed)?;

        let mut words = [0u16; 256];
        for word in words.iter_mut() {
            *word = self.io.read_u16(self.base_port + REG_DATA);
        }
        let info = IdentifyData::from_words(&words);
        self.info = Some(info.clone());
        Ok(info)
    }

    fn select_lba(&self, lba: u32) {
        self.write_register(REG_DRIVE_SELECT, SELECT_MASTER);
        self.io_wait();
        self.write_register(REG_SECTOR_COUNT, 1);
        self.write_register(REG_LBA_LOW, lba as u8);
        self.write_register(REG_LBA_MID, (lba >> 8) as u8);
        self.write_register(REG_LBA_HIGH, (lba >> 16) as u8);
        self.write_register(REG_DRIVE_SELECT, SELECT_MASTER_LBA | ((lba >> 24) & 0x0f) as u8);
        self.io_wait();
    }

    fn check_lba(lba: u64) -> Result<u32, StorageError> {
        if lba >= LBA28_LIMIT {
            return Err(StorageError::OutOfRange);
        }
        Ok(lba as u32)
    }

    pub fn read_sector(&mut self, lba: u64, buffer: &mut [u8]) -> Result<(), StorageError> {
        let lba = Self::check_lba(lba)?;
        if buffer.len() < SECTOR_SIZE {
            return Err(StorageError::BufferSize);
        }
        self.select_lba(lba);
        self.write_register(REG_COMMAND, AtaCommand::ReadSectors as u8);
        self.wait_for_data()?;

        for pair in buffer[..SECTOR_SIZE].chunks_exact_mut(2) {
            let data = self.io.read_u16(self.base_port + REG_DATA);
            pair.copy_from_slice(&data.to_le_bytes());
        }
        self.io_wait();
        Ok(())
    }

    pub fn write_sector(&mut self, lba: u64, buffer: &[u8]) -> Result<(), StorageError> {
        let lba = Self::check_lba(lba)?;
        if lba == 0 && !self.allow_mbr_write {
            LOGGER.warn(format_args!("refusing to write sector 0"));
            return Err(StorageError::WriteProtected);
        }
        if buffer.len() < SECTOR_SIZE {
            return Err(StorageError::BufferSize);
        }
        self.select_lba(lba);
        self.write_register(REG_COMMAND, AtaCommand::WriteSectors as u8);
        self.wait_for_data()?;

        for pair in buffer[..SECTOR_SIZE].chunks_exact(2) {
            self.io
                .write_u16(self.base_port + REG_DATA, u16::from_le_bytes([pair[0], pair[1]]));
        }

        self.write_register(REG_COMMAND, AtaCommand::FlushCache as u8);
        let status = self.wait_not_busy()?;
        if status & STATUS_ERR != 0 {
            return Err(StorageError::DeviceError);
        }
        Ok(())
    }
}

impl BlockDevice for AtaPio {
    fn name(&self) -> &str {
        "ata0"
    }

    fn sector_count(&self) -> u64 {
        self.info.as_ref().map_or(0, |info| info.lba28_sectors as u64)
    }

    fn read(&mut self, lba: u64, count: u32, buffer: &mut [u8]) -> Result<(), StorageError> {
        if buffer.len() < count as usize * SECTOR_SIZE {
            return Err(StorageError::BufferSize);
        }
        for (i, sector) in buffer.chunks_exact_mut(SECTOR_SIZE).take(count as usize).enumerate() {
            self.read_sector(lba + i as u64, sector)?;
        }
        Ok(())
    }

    fn write(&mut self, lba: u64, count: u32, buffer: &[u8]) -> Result<(), StorageError> {
        if buffer.len() < count as usize * SECTOR_SIZE {
            return Err(StorageError::BufferSize);
        }
        for (i, sector) in buffer.chunks_exact(SECTOR_SIZE).take(count as usize).enumerate() {
            self.write_sector(lba + i as u64, sector)?;
        }
        Ok(())
    }
}
