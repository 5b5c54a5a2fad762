use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};

use super::command::{
    CommandHeader, PrdtEntry, RegisterH2dFis, COMMAND_LIST_ALIGN, COMMAND_LIST_SIZE, COMMAND_SLOTS,
    COMMAND_TABLE_ALIGN, COMMAND_TABLE_SIZE, PRDT_MAX_BYTES, RECEIVED_FIS_ALIGN, RECEIVED_FIS_SIZE,
};
use super::hba::{
    port_reg, PortRegisters, CMD_FIS_RECEIVE_ENABLE, CMD_FIS_RECEIVE_RUNNING, CMD_LIST_RUNNING,
    CMD_START, IS_TFES, TFD_BUSY, TFD_ERR,
};
use crate::log::TaggedLogger;
use crate::memory::address::PhysicalAddress;
use crate::memory::dma::{DmaAllocator, DmaRegion};
use crate::storage::error::StorageError;
use crate::storage::protocol::{IdentifyData, SECTOR_SIZE};
use crate::time::{Clock, Deadline};

const LOGGER: TaggedLogger = TaggedLogger::new("AHCI");

pub const ENGINE_STOP_TIMEOUT_MS: u64 = 500;
pub const COMMAND_TIMEOUT_MS: u64 = 5000;

/// Everything needed to issue one command on a port
#[derive(Copy, Clone, Debug)]
pub struct CommandRequest {
    pub fis: RegisterH2dFis,
    pub buffer: PhysicalAddress,
    pub byte_count: usize,
    pub write: bool,
}

/// DMA structures and identity of one initialized port. They are allocated
/// once and stay programmed into the HBA until the kernel shuts down.
pub struct AhciPort {
    index: usize,
    command_list: DmaRegion,
    received_fis: DmaRegion,
    tables: Vec<DmaRegion>,
    identify_buffer: DmaRegion,
    info: Option<IdentifyData>,
}

impl AhciPort {
    pub fn allocate(index: usize, dma: &dyn DmaAllocator) -> Result<Self, StorageError> {
        let allocate = |size: usize, align: usize| {
            dma.allocate(size, align).ok_or_else(|| {
                LOGGER.error(format_args!(
                    "port {}: cannot allocate {} bytes of DMA memory",
                    index, size
                ));
                StorageError::OutOfDmaMemory
            })
        };

        let command_list = allocate(COMMAND_LIST_SIZE, COMMAND_LIST_ALIGN)?;
        let received_fis = allocate(RECEIVED_FIS_SIZE, RECEIVED_FIS_ALIGN)?;
        let mut tables = Vec::with_capacity(COMMAND_SLOTS);
        for _ in 0..COMMAND_SLOTS {
            tables.push(allocate(COMMAND_TABLE_SIZE, COMMAND_TABLE_ALIGN)?);
        }
        let identify_buffer = allocate(SECTOR_SIZE, 2)?;

        Ok(Self {
            index,
            command_list,
            received_fis,
            tables,
            identify_buffer,
            info: None,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn info(&self) -> Option<&IdentifyData> {
        self.info.as_ref()
    }

    pub fn set_info(&mut self, info: IdentifyData) {
        self.info = Some(info);
    }

    /// Zero until IDENTIFY has succeeded
    pub fn sector_count(&self) -> u64 {
        self.info.as_ref().map_or(0, |info| info.sector_count())
    }

    pub fn supports_lba48(&self) -> bool {
        self.info.as_ref().map_or(false, |info| info.supports_lba48)
    }

    pub fn identify_buffer(&self) -> &DmaRegion {
        &self.identify_buffer
    }

    /// Clear ST, then FRE, and wait for the engines to report idle. A port
    /// that never idles is logged and used anyway.
    pub fn stop_engine(&self, regs: &mut PortRegisters, clock: &dyn Clock) {
        regs.clear_bits(port_reg::CMD, CMD_START);
        regs.clear_bits(port_reg::CMD, CMD_FIS_RECEIVE_ENABLE);

        let deadline = Deadline::after(clock, ENGINE_STOP_TIMEOUT_MS);
        while regs.read(port_reg::CMD) & (CMD_LIST_RUNNING | CMD_FIS_RECEIVE_RUNNING) != 0 {
            if deadline.has_passed(clock) {
                LOGGER.warn(format_args!(
                    "port {}: engine did not stop, CMD={:#010x}",
                    self.index,
                    regs.read(port_reg::CMD)
                ));
                return;
            }
            clock.wait_for_interrupt();
        }
    }

    /// Point the port at this port's command list and FIS area, and reset its
    /// error and interrupt state
    pub fn program(&self, regs: &mut PortRegisters) {
        regs.write(port_reg::CLB, self.command_list.phys_addr().as_u32());
        regs.write(port_reg::CLBU, 0);
        regs.write(port_reg::FB, self.received_fis.phys_addr().as_u32());
        regs.write(port_reg::FBU, 0);

        regs.write(port_reg::SERR, 0xffff_ffff);
        regs.write(port_reg::IS, 0xffff_ffff);
        regs.write(port_reg::IE, 0xffff_ffff);
    }

    pub fn start_engine(&self, regs: &mut PortRegisters) {
        regs.set_bits(port_reg::CMD, CMD_FIS_RECEIVE_ENABLE);
        regs.set_bits(port_reg::CMD, CMD_START);
    }

    /// First slot that is neither active nor issued
    pub fn find_slot(regs: &PortRegisters) -> Option<usize> {
        let busy = regs.read(port_reg::SACT) | regs.read(port_reg::CI);
        (0..COMMAND_SLOTS).find(|slot| busy & (1u32 << *slot) == 0)
    }

    /// Build the command in a free slot, issue it, and poll until the HBA
    /// clears the slot's CI bit
    pub fn issue(
        &mut self,
        regs: &mut PortRegisters,
        clock: &dyn Clock,
        request: &CommandRequest,
    ) -> Result<(), StorageError> {
        if request.byte_count == 0 || request.byte_count > PRDT_MAX_BYTES {
            return Err(StorageError::OutOfRange);
        }
        let slot = Self::find_slot(regs).ok_or(StorageError::NoFreeSlot)?;

        let table = &mut self.tables[slot];
        let header = CommandHeader {
            write: request.write,
            prdt_len: 1,
            table: table.phys_addr(),
        };
        header.write_to(&mut self.command_list, slot);

        table.zero();
        request.fis.write_to(table);
        PrdtEntry {
            base: request.buffer,
            byte_count: request.byte_count,
        }
        .write_to(table, 0);

        // the command structures must be in memory before the HBA is told
        fence(Ordering::SeqCst);
        regs.write(port_reg::IS, 0xffff_ffff);
        regs.write(port_reg::CI, 1 << slot);

        let deadline = Deadline::after(clock, COMMAND_TIMEOUT_MS);
        while regs.read(port_reg::CI) & (1 << slot) != 0 {
            if regs.read(port_reg::IS) & IS_TFES != 0 {
                LOGGER.warn(format_args!(
                    "port {}: task file error, TFD={:#010x}",
                    self.index,
                    regs.read(port_reg::TFD)
                ));
                return Err(StorageError::DeviceError);
            }
            if deadline.has_passed(clock) {
                LOGGER.warn(format_args!(
                    "port {}: command {:#04x} timed out in slot {}",
                    self.index, request.fis.command, slot
                ));
                return Err(StorageError::Timeout);
            }
            clock.wait_for_interrupt();
        }
        fence(Ordering::SeqCst);

        let tfd = regs.read(port_reg::TFD);
        if tfd & (TFD_ERR | TFD_BUSY) != 0 {
            LOGGER.warn(format_args!(
                "port {}: command {:#04x} failed, TFD={:#010x}",
                self.index, request.fis.command, tfd
            ));
            return Err(StorageError::DeviceError);
        }
        Ok(())
    }
}

impl core::fmt::Display for AhciPort {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.info {
            Some(info) => write!(f, "ahci{}: {}", self.index, info),
            None => write!(f, "ahci{}: not identified", self.index),
        }
    }
}
