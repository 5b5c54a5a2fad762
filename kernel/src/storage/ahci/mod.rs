//! AHCI SATA driver.
//!
//! `AhciController::init` walks the ports the HBA implements, brings up each
//! one with a SATA disk attached, and identifies the disk. Transfers are
//! single-PRDT DMA commands: the caller's buffer must be physically
//! contiguous, and its physical address comes from the `DmaAllocator`.
//! Completion is polled against a deadline; there is no retry at this layer.

pub mod command;
pub mod hba;
pub mod port;

use alloc::{
    boxed::Box,
    collections::BTreeMap,
    format,
    string::String,
    sync::Arc,
    vec::Vec,
};

use self::command::RegisterH2dFis;
use self::hba::{
    port_reg, HbaRegisters, PortRegisters, CAP, GHC, GHC_AHCI_ENABLE, MAX_PORTS, PI,
    SIG_ATAPI, SSTS_DET_MASK, SSTS_DET_PRESENT,
};
use self::port::{AhciPort, CommandRequest};
use super::block::BlockDevice;
use super::error::StorageError;
use super::protocol::{AtaCommand, IdentifyData, LBA28_LIMIT, LBA28_MAX_SECTORS, SECTOR_SIZE};
use crate::arch::port::PortIo;
use crate::hardware::pci::{find_by_class, PciDevice};
use crate::log::TaggedLogger;
use crate::memory::address::PhysicalAddress;
use crate::memory::dma::DmaAllocator;
use crate::time::Clock;

const LOGGER: TaggedLogger = TaggedLogger::new("AHCI");

pub const PCI_CLASS_STORAGE: u8 = 1;
pub const PCI_SUBCLASS_SATA: u8 = 6;
pub const PCI_PROG_IF_AHCI: u8 = 1;
/// ABAR lives in BAR5
pub const ABAR_INDEX: usize = 5;

/// Largest transfer one extended command may carry, bounded by the 4 MiB a
/// single PRDT entry can describe
pub const LBA48_MAX_SECTORS: u32 = (command::PRDT_MAX_BYTES / SECTOR_SIZE) as u32;

pub type AhciHandle = Arc<spin::Mutex<AhciController>>;

/// Find the first AHCI controller on the PCI bus, let it master the bus, and
/// return it with the physical address of its register block
pub fn find_controller(io: &dyn PortIo) -> Option<(PciDevice, PhysicalAddress)> {
    let device = find_by_class(io, PCI_CLASS_STORAGE, PCI_SUBCLASS_SATA, PCI_PROG_IF_AHCI)?;
    let bar = device.bar[ABAR_INDEX];
    if bar.is_empty() || bar.is_io() {
        LOGGER.warn(format_args!("controller has no memory BAR5 ({})", bar));
        return None;
    }
    device.enable_bus_master(io);
    let abar = PhysicalAddress::new(bar.get_address());
    LOGGER.log(format_args!("ABAR at {}", abar));
    Some((device, abar))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

pub struct AhciController {
    hba: Box<dyn HbaRegisters>,
    dma: Arc<dyn DmaAllocator>,
    clock: Arc<dyn Clock>,
    ports: BTreeMap<usize, AhciPort>,
}

impl AhciController {
    /// Bring up every implemented port that has an ATA disk behind it.
    /// Ports that fail are logged and left out.
    pub fn init(
        hba: Box<dyn HbaRegisters>,
        dma: Arc<dyn DmaAllocator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut controller = Self {
            hba,
            dma,
            clock,
            ports: BTreeMap::new(),
        };

        let cap = controller.hba.read(CAP);
        let ghc = controller.hba.read(GHC);
        if ghc & GHC_AHCI_ENABLE == 0 {
            controller.hba.write(GHC, ghc | GHC_AHCI_ENABLE);
        }
        let implemented = controller.hba.read(PI);
        LOGGER.log(format_args!(
            "HBA CAP={:#010x}, {} command slots, ports implemented {:#010x}",
            cap,
            ((cap >> 8) & 0x1f) + 1,
            implemented
        ));

        for index in 0..MAX_PORTS {
            if implemented & (1 << index) == 0 {
                continue;
            }
            let (ssts, signature) = {
                let regs = PortRegisters::new(&mut *controller.hba, index);
                (regs.read(port_reg::SSTS), regs.read(port_reg::SIG))
            };
            if ssts & SSTS_DET_MASK != SSTS_DET_PRESENT {
                LOGGER.debug(format_args!("port {}: no device", index));
                continue;
            }
            if signature == SIG_ATAPI {
                LOGGER.log(format_args!("port {}: ATAPI device, skipped", index));
                continue;
            }
            match controller.port_init(index) {
                Ok(()) => {
                    if let Some(port) = controller.ports.get(&index) {
                        LOGGER.log(format_args!("{}", port));
                    }
                }
                Err(err) => LOGGER.warn(format_args!("port {}: {}", index, err)),
            }
        }
        controller
    }

    pub fn into_handle(self) -> AhciHandle {
        Arc::new(spin::Mutex::new(self))
    }

    /// Stop the port's engines, give it fresh command structures, restart it
    /// and identify the attached disk. A port whose IDENTIFY fails stays
    /// programmed but is not reported as a disk.
    pub fn port_init(&mut self, index: usize) -> Result<(), StorageError> {
        if index >= MAX_PORTS {
            return Err(StorageError::PortNotInitialized);
        }
        let port = AhciPort::allocate(index, &*self.dma)?;
        {
            let mut regs = PortRegisters::new(&mut *self.hba, index);
            port.stop_engine(&mut regs, &*self.clock);
            port.program(&mut regs);
            port.start_engine(&mut regs);
        }
        self.ports.insert(index, port);

        self.identify(index).map(|_| ())
    }

    /// Issue IDENTIFY DEVICE and record the model and capacity
    pub fn identify(&mut self, index: usize) -> Result<IdentifyData, StorageError> {
        let clock = self.clock.clone();
        let port = self
            .ports
            .get_mut(&index)
            .ok_or(StorageError::PortNotInitialized)?;
        let request = CommandRequest {
            fis: RegisterH2dFis::identify(),
            buffer: port.identify_buffer().phys_addr(),
            byte_count: SECTOR_SIZE,
            write: false,
        };
        let mut regs = PortRegisters::new(&mut *self.hba, index);
        match port.issue(&mut regs, &*clock, &request) {
            Ok(()) => (),
            Err(StorageError::NoFreeSlot) => return Err(StorageError::NoFreeSlot),
            Err(err) => {
                LOGGER.warn(format_args!("port {}: IDENTIFY failed ({})", index, err));
                return Err(StorageError::IdentifyFailed);
            }
        }
        let info = IdentifyData::from_bytes(port.identify_buffer().as_slice())
            .ok_or(StorageError::IdentifyFailed)?;
        port.set_info(info.clone());
        Ok(info)
    }

    pub fn read_lba(
        &mut self,
        index: usize,
        lba: u64,
        count: u32,
        buffer: &mut [u8],
    ) -> Result<(), StorageError> {
        self.transfer(index, lba, count, buffer.as_ptr(), buffer.len(), Direction::Read)
    }

    pub fn write_lba(
        &mut self,
        index: usize,
        lba: u64,
        count: u32,
        buffer: &[u8],
    ) -> Result<(), StorageError> {
        self.transfer(index, lba, count, buffer.as_ptr(), buffer.len(), Direction::Write)
    }

    fn transfer(
        &mut self,
        index: usize,
        lba: u64,
        count: u32,
        buffer: *const u8,
        len: usize,
        direction: Direction,
    ) -> Result<(), StorageError> {
        let clock = self.clock.clone();
        let port = self
            .ports
            .get_mut(&index)
            .ok_or(StorageError::PortNotInitialized)?;
        if count == 0 {
            return Ok(());
        }
        let byte_count = count as usize * SECTOR_SIZE;
        if len < byte_count {
            return Err(StorageError::BufferSize);
        }
        let end = lba.checked_add(count as u64).ok_or(StorageError::OutOfRange)?;
        if port.info().is_some() && end > port.sector_count() {
            return Err(StorageError::OutOfRange);
        }

        let command = if end <= LBA28_LIMIT && count <= LBA28_MAX_SECTORS {
            match direction {
                Direction::Read => AtaCommand::ReadDma,
                Direction::Write => AtaCommand::WriteDma,
            }
        } else if port.supports_lba48() && count <= LBA48_MAX_SECTORS {
            match direction {
                Direction::Read => AtaCommand::ReadDmaExt,
                Direction::Write => AtaCommand::WriteDmaExt,
            }
        } else {
            return Err(StorageError::OutOfRange);
        };

        let physical = self
            .dma
            .virt_to_phys(buffer)
            .ok_or(StorageError::NotDmaAddressable)?;
        let request = CommandRequest {
            fis: RegisterH2dFis::transfer(command, lba, count),
            buffer: physical,
            byte_count,
            write: direction == Direction::Write,
        };
        let mut regs = PortRegisters::new(&mut *self.hba, index);
        port.issue(&mut regs, &*clock, &request).map_err(|err| {
            LOGGER.warn(format_args!(
                "{:?}: port {} lba {} count {} failed ({})",
                direction, index, lba, count, err
            ));
            err
        })
    }

    pub fn ports(&self) -> impl Iterator<Item = &AhciPort> {
        self.ports.values()
    }

    pub fn port(&self, index: usize) -> Option<&AhciPort> {
        self.ports.get(&index)
    }

    /// One block device per identified port, named `ahci{index}`
    pub fn block_devices(handle: &AhciHandle) -> Vec<AhciDisk> {
        handle
            .lock()
            .ports()
            .filter(|port| port.info().is_some())
            .map(|port| AhciDisk {
                controller: handle.clone(),
                port: port.index(),
                name: format!("ahci{}", port.index()),
                sector_count: port.sector_count(),
            })
            .collect()
    }
}

/// A disk on one AHCI port, shared with the rest of the controller
pub struct AhciDisk {
    controller: AhciHandle,
    port: usize,
    name: String,
    sector_count: u64,
}

impl AhciDisk {
    pub fn port(&self) -> usize {
        self.port
    }
}

impl BlockDevice for AhciDisk {
    fn name(&self) -> &str {
        &self.name
    }

    fn sector_count(&self) -> u64 {
        self.sector_count
    }

    fn read(&mut self, lba: u64, count: u32, buffer: &mut [u8]) -> Result<(), StorageError> {
        self.controller.lock().read_lba(self.port, lba, count, buffer)
    }

    fn write(&mut self, lba: u64, count: u32, buffer: &[u8]) -> Result<(), StorageError> {
        self.controller.lock().write_lba(self.port, lba, count, buffer)
    }
}
