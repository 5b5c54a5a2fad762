//! PCI configuration space access through the legacy 0xCF8/0xCFC mechanism,
//! and enumeration of devices by class code.

use alloc::string::String;

use crate::arch::port::PortIo;
use crate::log::TaggedLogger;

const LOGGER: TaggedLogger = TaggedLogger::new("PCI");

const CONFIG_ADDRESS: u16 = 0xcf8;
const CONFIG_DATA: u16 = 0xcfc;

/// Command register bit allowing the device to master the bus (DMA)
const COMMAND_BUS_MASTER: u32 = 1 << 2;
/// Command register bit enabling memory-space decoding
const COMMAND_MEMORY_SPACE: u32 = 1 << 1;

fn config_address(bus: u8, device: u8, function: u8, offset: u8) -> u32 {
    0x80000000 | // enable bit
    ((bus as u32) << 16) |
    ((device as u32) << 11) |
    ((function as u32) << 8) |
    ((offset as u32) & 0xfc)
}

pub fn read_config_u32(io: &dyn PortIo, bus: u8, device: u8, function: u8, offset: u8) -> u32 {
    io.write_u32(CONFIG_ADDRESS, config_address(bus, device, function, offset));
    io.read_u32(CONFIG_DATA)
}

pub fn write_config_u32(
    io: &dyn PortIo,
    bus: u8,
    device: u8,
    function: u8,
    offset: u8,
    value: u32,
) {
    io.write_u32(CONFIG_ADDRESS, config_address(bus, device, function, offset));
    io.write_u32(CONFIG_DATA, value);
}

pub fn read_config_u16(io: &dyn PortIo, bus: u8, device: u8, function: u8, offset: u8) -> u16 {
    // The IO port returns 32 bits at a time, at offset multiples of 4
    // The actual value of offset selects the location of the 16 bits to read
    // from within the returned value.
    let config_value = read_config_u32(io, bus, device, function, offset);
    let shift = (offset as usize & 2) * 8;
    (config_value >> shift) as u16
}

pub fn get_vendor_id(io: &dyn PortIo, bus: u8, device: u8, function: u8) -> u16 {
    read_config_u16(io, bus, device, function, 0)
}

pub fn get_header_type(io: &dyn PortIo, bus: u8, device: u8, function: u8) -> u8 {
    read_config_u16(io, bus, device, function, 0xe) as u8
}

#[derive(Clone)]
pub struct PciDevice {
    pub bus: u8,
    pub device: u8,
    pub function: u8,

    pub vendor_id: u16,
    pub device_id: u16,
    pub programming_interface: u8,
    pub subclass: u8,
    pub class_code: u8,
    pub bar: [BaseAddressRegister; 6],
    pub irq: Option<u8>,
}

impl PciDevice {
    pub fn read_from_bus(io: &dyn PortIo, bus: u8, device: u8, function: u8) -> Self {
        let id = read_config_u32(io, bus, device, function, 0);
        let codes = read_config_u32(io, bus, device, function, 8);

        let mut bar = [BaseAddressRegister(0); 6];
        for (i, entry) in bar.iter_mut().enumerate() {
            let offset = 0x10 + (i as u8) * 4;
            *entry = BaseAddressRegister(read_config_u32(io, bus, device, function, offset));
        }

        let interrupt = read_config_u32(io, bus, device, function, 0x3c) as u16;
        let interrupt_line = interrupt as u8;
        let interrupt_pin = (interrupt >> 8) as u8;
        let irq = if interrupt_line == 0xff || interrupt_pin == 0 {
            None
        } else {
            Some(interrupt_line)
        };

        Self {
            bus,
            device,
            function,

            vendor_id: id as u16,
            device_id: (id >> 16) as u16,
            programming_interface: (codes >> 8) as u8,
            subclass: (codes >> 16) as u8,
            class_code: (codes >> 24) as u8,
            bar,
            irq,
        }
    }

    pub fn get_name(&self) -> String {
        let name = match (self.class_code, self.subclass) {
            (1, 1) => "IDE Bus",
            (1, 6) => "SATA Controller",
            (2, 0) => "Ethernet",
            (3, 0) => "VGA",
            (6, 0) => "PCI Bridge",
            (6, 1) => "ISA Bridge",
            _ => "Device",
        };
        String::from(name)
    }

    pub fn matches_class(&self, class_code: u8, subclass: u8, programming_interface: u8) -> bool {
        self.class_code == class_code
            && self.subclass == subclass
            && self.programming_interface == programming_interface
    }

    /// Allow the device to perform DMA, and to respond to its memory BARs
    pub fn enable_bus_master(&self, io: &dyn PortIo) {
        let command_status = read_config_u32(io, self.bus, self.device, self.function, 4);
        write_config_u32(
            io,
            self.bus,
            self.device,
            self.function,
            4,
            command_status | COMMAND_BUS_MASTER | COMMAND_MEMORY_SPACE,
        );
    }
}

impl core::fmt::Display for PciDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} ({:X}:{:X}:{:X}): {:04X}-{:04X}",
            self.get_name(),
            self.bus,
            self.device,
            self.function,
            self.vendor_id,
            self.device_id,
        )
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BaseAddressRegister(pub u32);

impl BaseAddressRegister {
    pub fn get_address(&self) -> u32 {
        if self.is_io() {
            self.0 & 0xfffffffc
        } else {
            self.0 & 0xfffffff0
        }
    }

    pub fn is_io(&self) -> bool {
        self.0 & 1 == 1
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0 || self.0 == 0xffffffff
    }
}

impl core::fmt::Display for BaseAddressRegister {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let bar_type = if self.is_io() { "I/O" } else { "Memory" };
        write!(f, "{} at {:#010X}", bar_type, self.get_address())
    }
}

/// Walk every bus/device/function and return the first function whose class
/// triple matches
pub fn find_by_class(
    io: &dyn PortIo,
    class_code: u8,
    subclass: u8,
    programming_interface: u8,
) -> Option<PciDevice> {
    for bus in 0..=255u8 {
        for device in 0..32u8 {
            if get_vendor_id(io, bus, device, 0) == 0xffff {
                continue;
            }
            let functions = if get_header_type(io, bus, device, 0) & 0x80 != 0 {
                8
            } else {
                1
            };
            for function in 0..functions {
                if get_vendor_id(io, bus, device, function) == 0xffff {
                    continue;
                }
                let found = PciDevice::read_from_bus(io, bus, device, function);
                if found.matches_class(class_code, subclass, programming_interface) {
                    LOGGER.log(format_args!("found {}", found));
                    return Some(found);
                }
            }
        }
    }
    None
}
