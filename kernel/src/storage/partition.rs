//! Partition table discovery. A protective MBR (first entry of type 0xEE)
//! hands over to the GPT; anything else is read as a classic MBR.

use alloc::vec::Vec;

use super::block::BlockDevice;
use super::error::StorageError;
use super::protocol::SECTOR_SIZE;
use crate::log::TaggedLogger;

const LOGGER: TaggedLogger = TaggedLogger::new("PART");

pub const MBR_SIGNATURE: u16 = 0xaa55;
pub const MBR_TYPE_GPT_PROTECTIVE: u8 = 0xee;
pub const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
/// Partition type reported for every GPT entry
pub const GPT_GENERIC_TYPE: u8 = 0xff;
pub const MAX_PARTITIONS: usize = 128;

const MBR_TABLE_OFFSET: usize = 446;
const MBR_ENTRY_SIZE: usize = 16;
const MBR_SIGNATURE_OFFSET: usize = 510;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PartitionInfo {
    pub start_lba: u64,
    pub sector_count: u64,
    /// MBR system id, or `GPT_GENERIC_TYPE`
    pub kind: u8,
    pub is_gpt: bool,
}

impl core::fmt::Display for PartitionInfo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} type {:#04x}: start {}, {} sectors",
            if self.is_gpt { "GPT" } else { "MBR" },
            self.kind,
            self.start_lba,
            self.sector_count
        )
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    read_u32(bytes, offset) as u64 | ((read_u32(bytes, offset + 4) as u64) << 32)
}

/// List the partitions on `device`. A disk without a valid MBR signature
/// has no partitions.
pub fn scan(device: &mut dyn BlockDevice) -> Result<Vec<PartitionInfo>, StorageError> {
    let mut sector = [0u8; SECTOR_SIZE];
    device.read(0, 1, &mut sector)?;

    let signature = u16::from_le_bytes([sector[MBR_SIGNATURE_OFFSET], sector[MBR_SIGNATURE_OFFSET + 1]]);
    if signature != MBR_SIGNATURE {
        LOGGER.log(format_args!("{}: invalid MBR signature {:#06x}", device.name(), signature));
        return Ok(Vec::new());
    }

    if sector[MBR_TABLE_OFFSET + 4] == MBR_TYPE_GPT_PROTECTIVE {
        LOGGER.log(format_args!("{}: protective MBR, reading GPT", device.name()));
        return scan_gpt(device);
    }

    let partitions: Vec<PartitionInfo> = sector[MBR_TABLE_OFFSET..MBR_SIGNATURE_OFFSET]
        .chunks_exact(MBR_ENTRY_SIZE)
        .filter(|entry| entry[4] != 0)
        .map(|entry| PartitionInfo {
            start_lba: read_u32(entry, 8) as u64,
            sector_count: read_u32(entry, 12) as u64,
            kind: entry[4],
            is_gpt: false,
        })
        .collect();
    for partition in partitions.iter() {
        LOGGER.debug(format_args!("{}: {}", device.name(), partition));
    }
    Ok(partitions)
}

fn scan_gpt(device: &mut dyn BlockDevice) -> Result<Vec<PartitionInfo>, StorageError> {
    let mut header = [0u8; SECTOR_SIZE];
    device.read(1, 1, &mut header)?;
    if &header[0..8] != GPT_SIGNATURE {
        LOGGER.log(format_args!("{}: invalid GPT signature", device.name()));
        return Ok(Vec::new());
    }

    let entries_lba = read_u64(&header, 72);
    let entry_count = read_u32(&header, 80) as usize;
    let entry_size = read_u32(&header, 84) as usize;
    if entry_size < 128 || entry_size > SECTOR_SIZE || SECTOR_SIZE % entry_size != 0 {
        LOGGER.warn(format_args!("{}: unsupported GPT entry size {}", device.name(), entry_size));
        return Ok(Vec::new());
    }
    let per_sector = SECTOR_SIZE / entry_size;

    let mut partitions = Vec::new();
    let mut entries = [0u8; SECTOR_SIZE];
    for i in 0..entry_count {
        if partitions.len() >= MAX_PARTITIONS {
            break;
        }
        if i % per_sector == 0 {
            let lba = entries_lba + (i / per_sector) as u64;
            if let Err(err) = device.read(lba, 1, &mut entries) {
                LOGGER.warn(format_args!("{}: GPT entries at {} unreadable ({})", device.name(), lba, err));
                break;
            }
        }
        let offset = (i % per_sector) * entry_size;
        let entry = &entries[offset..offset + entry_size];
        if entry[..16].iter().all(|b| *b == 0) {
            continue;
        }
        let first = read_u64(entry, 32);
        let last = read_u64(entry, 40);
        partitions.push(PartitionInfo {
            start_lba: first,
            sector_count: last.wrapping_sub(first).wrapping_add(1),
            kind: GPT_GENERIC_TYPE,
            is_gpt: true,
        });
    }
    Ok(partitions)
}
