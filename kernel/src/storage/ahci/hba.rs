//! The HBA register block ("ABAR") and the per-port register windows inside
//! it. Offsets are bytes from the start of ABAR.

use core::ptr::NonNull;

pub const CAP: usize = 0x00;
pub const GHC: usize = 0x04;
pub const IS: usize = 0x08;
pub const PI: usize = 0x0c;

pub const GHC_AHCI_ENABLE: u32 = 1 << 31;

pub const PORT_BASE: usize = 0x100;
pub const PORT_STRIDE: usize = 0x80;
pub const MAX_PORTS: usize = 32;

/// Register offsets within one port's window
pub mod port_reg {
    pub const CLB: usize = 0x00;
    pub const CLBU: usize = 0x04;
    pub const FB: usize = 0x08;
    pub const FBU: usize = 0x0c;
    pub const IS: usize = 0x10;
    pub const IE: usize = 0x14;
    pub const CMD: usize = 0x18;
    pub const TFD: usize = 0x20;
    pub const SIG: usize = 0x24;
    pub const SSTS: usize = 0x28;
    pub const SCTL: usize = 0x2c;
    pub const SERR: usize = 0x30;
    pub const SACT: usize = 0x34;
    pub const CI: usize = 0x38;
}

pub const CMD_START: u32 = 1 << 0;
pub const CMD_FIS_RECEIVE_ENABLE: u32 = 1 << 4;
pub const CMD_FIS_RECEIVE_RUNNING: u32 = 1 << 14;
pub const CMD_LIST_RUNNING: u32 = 1 << 15;

pub const SSTS_DET_MASK: u32 = 0x0f;
/// Device present and phy communication established
pub const SSTS_DET_PRESENT: u32 = 3;

pub const SIG_ATA: u32 = 0x0000_0101;
pub const SIG_ATAPI: u32 = 0xeb14_0101;

pub const TFD_ERR: u32 = 1 << 0;
pub const TFD_DRQ: u32 = 1 << 3;
pub const TFD_BUSY: u32 = 1 << 7;

/// Task file error status in PxIS
pub const IS_TFES: u32 = 1 << 30;

/// Access to the 32-bit registers of an HBA. The kernel maps ABAR and hands
/// the driver an `MmioRegisters`; tests substitute a simulated controller.
pub trait HbaRegisters: Send {
    fn read(&self, offset: usize) -> u32;
    fn write(&mut self, offset: usize, value: u32);
}

pub fn port_offset(port: usize, register: usize) -> usize {
    PORT_BASE + port * PORT_STRIDE + register
}

/// Volatile access to a mapped ABAR
pub struct MmioRegisters {
    base: NonNull<u32>,
}

// The mapping is owned by whoever holds the controller
unsafe impl Send for MmioRegisters {}

impl MmioRegisters {
    /// # Safety
    ///
    /// `base` must be the kernel-virtual address of a mapped, uncached ABAR
    /// that covers every implemented port, and nothing else may write to it.
    pub unsafe fn new(base: *mut u8) -> Option<Self> {
        NonNull::new(base as *mut u32).map(|base| Self { base })
    }
}

impl HbaRegisters for MmioRegisters {
    fn read(&self, offset: usize) -> u32 {
        unsafe { self.base.as_ptr().add(offset / 4).read_volatile() }
    }

    fn write(&mut self, offset: usize, value: u32) {
        unsafe { self.base.as_ptr().add(offset / 4).write_volatile(value) }
    }
}

/// One port's view of the HBA registers
pub struct PortRegisters<'a> {
    hba: &'a mut dyn HbaRegisters,
    port: usize,
}

impl<'a> PortRegisters<'a> {
    pub fn new(hba: &'a mut dyn HbaRegisters, port: usize) -> Self {
        Self { hba, port }
    }

    pub fn read(&self, register: usize) -> u32 {
        self.hba.read(port_offset(self.port, register))
    }

    pub fn write(&mut self, register: usize, value: u32) {
        self.hba.write(port_offset(self.port, register), value)
    }

    pub fn set_bits(&mut self, register: usize, bits: u32) {
        let value = self.read(register);
        self.write(register, value | bits);
    }

    pub fn clear_bits(&mut self, register: usize, bits: u32) {
        let value = self.read(register);
        self.write(register, value & !bits);
    }
}
