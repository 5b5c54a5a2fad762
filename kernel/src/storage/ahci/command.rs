//! Layouts of the structures an AHCI port reads from memory: the command
//! list of 32 headers, and the command table each header points at (a
//! command FIS followed by the PRDT). All of them are written field by field
//! into DMA memory.

use crate::memory::address::PhysicalAddress;
use crate::memory::dma::DmaRegion;
use crate::storage::protocol::AtaCommand;

pub const COMMAND_SLOTS: usize = 32;
pub const COMMAND_HEADER_SIZE: usize = 32;

pub const COMMAND_LIST_SIZE: usize = COMMAND_SLOTS * COMMAND_HEADER_SIZE;
pub const COMMAND_LIST_ALIGN: usize = 1024;
pub const RECEIVED_FIS_SIZE: usize = 256;
pub const RECEIVED_FIS_ALIGN: usize = 256;
/// Room for the command FIS, the ATAPI area and eight PRDT entries
pub const COMMAND_TABLE_SIZE: usize = 256;
pub const COMMAND_TABLE_ALIGN: usize = 128;

pub const PRDT_OFFSET: usize = 0x80;
pub const PRDT_ENTRY_SIZE: usize = 16;
/// A single PRDT entry describes at most 4 MiB
pub const PRDT_MAX_BYTES: usize = 4 * 1024 * 1024;

pub const FIS_TYPE_REG_H2D: u8 = 0x27;
pub const H2D_FIS_SIZE: usize = 20;

const HEADER_CFL_MASK: u16 = 0x1f;
const HEADER_WRITE: u16 = 1 << 6;
const FIS_COMMAND_BIT: u8 = 1 << 7;
const DEVICE_LBA_MODE: u8 = 1 << 6;
const DBC_MASK: u32 = 0x003f_ffff;

/// One entry of the command list
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CommandHeader {
    /// Direction is host to device
    pub write: bool,
    pub prdt_len: u16,
    pub table: PhysicalAddress,
}

impl CommandHeader {
    pub fn flags(&self) -> u16 {
        let fis_dwords = (H2D_FIS_SIZE / 4) as u16;
        if self.write {
            fis_dwords | HEADER_WRITE
        } else {
            fis_dwords
        }
    }

    pub fn write_to(&self, list: &mut DmaRegion, slot: usize) {
        let base = slot * COMMAND_HEADER_SIZE;
        list.as_mut_slice()[base..base + COMMAND_HEADER_SIZE].fill(0);
        list.write_u16(base, self.flags());
        list.write_u16(base + 2, self.prdt_len);
        // PRDBC, updated by the HBA as bytes move
        list.write_u32(base + 4, 0);
        list.write_u32(base + 8, self.table.as_u32());
        list.write_u32(base + 12, 0);
    }

    pub fn parse(raw: &[u8]) -> Option<Self> {
        let raw = raw.get(..COMMAND_HEADER_SIZE)?;
        let flags = u16::from_le_bytes([raw[0], raw[1]]);
        if flags & HEADER_CFL_MASK == 0 {
            return None;
        }
        Some(Self {
            write: flags & HEADER_WRITE != 0,
            prdt_len: u16::from_le_bytes([raw[2], raw[3]]),
            table: PhysicalAddress::new(u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]])),
        })
    }
}

/// A physical region descriptor: one contiguous chunk of the data buffer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PrdtEntry {
    pub base: PhysicalAddress,
    pub byte_count: usize,
}

impl PrdtEntry {
    /// The DBC field holds the byte count minus one. The interrupt on
    /// completion bit stays clear; completion is polled.
    pub fn dbc(&self) -> u32 {
        (self.byte_count as u32).wrapping_sub(1) & DBC_MASK
    }

    pub fn write_to(&self, table: &mut DmaRegion, index: usize) {
        let base = PRDT_OFFSET + index * PRDT_ENTRY_SIZE;
        table.write_u32(base, self.base.as_u32());
        table.write_u32(base + 4, 0);
        table.write_u32(base + 8, 0);
        table.write_u32(base + 12, self.dbc());
    }

    pub fn parse(raw: &[u8]) -> Option<Self> {
        let raw = raw.get(..PRDT_ENTRY_SIZE)?;
        let dba = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let dbc = u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]);
        Some(Self {
            base: PhysicalAddress::new(dba),
            byte_count: (dbc & DBC_MASK) as usize + 1,
        })
    }
}

/// Register FIS, host to device: carries one ATA command
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegisterH2dFis {
    pub command: u8,
    pub lba: u64,
    pub sectors: u32,
}

impl RegisterH2dFis {
    pub fn identify() -> Self {
        Self {
            command: AtaCommand::Identify as u8,
            lba: 0,
            sectors: 0,
        }
    }

    pub fn transfer(command: AtaCommand, lba: u64, sectors: u32) -> Self {
        Self {
            command: command as u8,
            lba,
            sectors,
        }
    }

    /// Commands that address the disk with 48 bits and a 16-bit count
    pub fn is_extended(&self) -> bool {
        self.command == AtaCommand::ReadDmaExt as u8 || self.command == AtaCommand::WriteDmaExt as u8
    }

    /// The device register. LBA28 commands carry LBA bits 24..27 in its low
    /// nibble.
    pub fn device(&self) -> u8 {
        if self.command == AtaCommand::Identify as u8 {
            0
        } else if self.is_extended() {
            DEVICE_LBA_MODE
        } else {
            DEVICE_LBA_MODE | ((self.lba >> 24) & 0x0f) as u8
        }
    }

    pub fn to_bytes(&self) -> [u8; H2D_FIS_SIZE] {
        let lba = self.lba.to_le_bytes();
        let mut fis = [0u8; H2D_FIS_SIZE];
        fis[0] = FIS_TYPE_REG_H2D;
        fis[1] = FIS_COMMAND_BIT;
        fis[2] = self.command;
        fis[4] = lba[0];
        fis[5] = lba[1];
        fis[6] = lba[2];
        fis[7] = self.device();
        if self.is_extended() {
            fis[8] = lba[3];
            fis[9] = lba[4];
            fis[10] = lba[5];
            fis[13] = (self.sectors >> 8) as u8;
        }
        fis[12] = self.sectors as u8;
        fis
    }

    pub fn write_to(&self, table: &mut DmaRegion) {
        table.as_mut_slice()[..H2D_FIS_SIZE].copy_from_slice(&self.to_bytes());
    }

    pub fn parse(raw: &[u8]) -> Option<Self> {
        let raw = raw.get(..H2D_FIS_SIZE)?;
        if raw[0] != FIS_TYPE_REG_H2D || raw[1] & FIS_COMMAND_BIT == 0 {
            return None;
        }
        let mut fis = Self {
            command: raw[2],
            lba: u32::from_le_bytes([raw[4], raw[5], raw[6], 0]) as u64,
            sectors: raw[12] as u32,
        };
        if fis.is_extended() {
            fis.lba |= u32::from_le_bytes([raw[8], raw[9], raw[10], 0]) as u64 * (1 << 24);
            fis.sectors |= (raw[13] as u32) << 8;
        } else if fis.command != AtaCommand::Identify as u8 {
            fis.lba |= ((raw[7] & 0x0f) as u64) << 24;
            if fis.sectors == 0 {
                fis.sectors = 256;
            }
        }
        Some(fis)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::{CommandHeader, PrdtEntry, RegisterH2dFis, PRDT_OFFSET};
    use crate::memory::address::PhysicalAddress;
    use crate::memory::dma::DmaRegion;
    use crate::storage::protocol::AtaCommand;

    #[test]
    fn byte_count_is_stored_minus_one() {
        for len in [1usize, 512, 4096, 4 * 1024 * 1024] {
            let entry = PrdtEntry {
                base: PhysicalAddress::new(0x8000),
                byte_count: len,
            };
            assert_eq!(entry.dbc() as usize, len - 1);
            assert_eq!(entry.dbc() & (1 << 31), 0);
        }

        let mut backing = vec![0u8; 256];
        let mut table = unsafe {
            DmaRegion::from_raw_parts(backing.as_mut_ptr(), PhysicalAddress::new(0x4000), 256)
        }
        .unwrap();
        let entry = PrdtEntry {
            base: PhysicalAddress::new(0x0012_3400),
            byte_count: 1024,
        };
        entry.write_to(&mut table, 0);
        assert_eq!(table.read_u32(PRDT_OFFSET), 0x0012_3400);
        assert_eq!(table.read_u32(PRDT_OFFSET + 12), 1023);
        assert_eq!(PrdtEntry::parse(&table.as_slice()[PRDT_OFFSET..]), Some(entry));
        drop(table);
    }

    #[test]
    fn header_flags() {
        let read = CommandHeader {
            write: false,
            prdt_len: 1,
            table: PhysicalAddress::new(0x1_0000),
        };
        assert_eq!(read.flags(), 5);
        let write = CommandHeader { write: true, ..read };
        assert_eq!(write.flags(), 5 | (1 << 6));

        let mut backing = vec![0xffu8; 1024];
        let mut list = unsafe {
            DmaRegion::from_raw_parts(backing.as_mut_ptr(), PhysicalAddress::new(0x2000), 1024)
        }
        .unwrap();
        write.write_to(&mut list, 3);
        let raw = &list.as_slice()[3 * 32..4 * 32];
        assert_eq!(&raw[..4], &[0x45, 0x00, 0x01, 0x00]);
        assert_eq!(&raw[4..8], &[0, 0, 0, 0]);
        assert_eq!(CommandHeader::parse(raw), Some(write));
        assert!(raw[16..].iter().all(|b| *b == 0));
        drop(list);
    }

    #[test]
    fn lba28_fis() {
        let fis = RegisterH2dFis::transfer(AtaCommand::ReadDma, 0x0abc_def1, 8);
        let raw = fis.to_bytes();
        assert_eq!(raw[0], 0x27);
        assert_eq!(raw[1], 0x80);
        assert_eq!(raw[2], 0xc8);
        assert_eq!(&raw[4..8], &[0xf1, 0xde, 0xbc, 0x4a]);
        assert_eq!(&raw[8..11], &[0, 0, 0]);
        assert_eq!(raw[12], 8);
        assert_eq!(RegisterH2dFis::parse(&raw), Some(fis));
    }

    #[test]
    fn lba48_fis() {
        let fis = RegisterH2dFis::transfer(AtaCommand::WriteDmaExt, 0x0001_2345_6789, 0x0102);
        let raw = fis.to_bytes();
        assert_eq!(raw[2], 0x35);
        assert_eq!(raw[7], 0x40);
        assert_eq!(&raw[4..7], &[0x89, 0x67, 0x45]);
        assert_eq!(&raw[8..11], &[0x23, 0x01, 0x00]);
        assert_eq!((raw[12], raw[13]), (0x02, 0x01));
        assert_eq!(RegisterH2dFis::parse(&raw), Some(fis));
    }

    #[test]
    fn identify_fis() {
        let raw = RegisterH2dFis::identify().to_bytes();
        assert_eq!(&raw[..4], &[0x27, 0x80, 0xec, 0x00]);
        assert!(raw[4..].iter().all(|b| *b == 0));
        assert_eq!(RegisterH2dFis::parse(&raw), Some(RegisterH2dFis::identify()));
    }
}
