//! Simulated hardware shared by the scenario tests: a NIC with a scripted
//! peer, a clock that moves on its own, DMA memory with fake physical
//! addresses, an AHCI controller that executes command lists against an
//! in-memory disk, and a PCI config space.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrysalis_kernel::arch::port::PortIo;
use chrysalis_kernel::memory::address::PhysicalAddress;
use chrysalis_kernel::memory::dma::{DmaAllocator, DmaRegion};
use chrysalis_kernel::net::device::{NetDevice, NetDriver};
use chrysalis_kernel::net::error::NetError;
use chrysalis_kernel::net::hardware::HardwareAddress;
use chrysalis_kernel::net::protocol::arp::ArpPacket;
use chrysalis_kernel::net::protocol::ethernet::EthernetFrameHeader;
use chrysalis_kernel::net::protocol::ipv4::{IpProtocolType, Ipv4Address, Ipv4Header};
use chrysalis_kernel::net::protocol::packet::PacketHeader;
use chrysalis_kernel::storage::ahci::command::{CommandHeader, PrdtEntry, RegisterH2dFis, PRDT_OFFSET};
use chrysalis_kernel::storage::ahci::hba::{port_offset, port_reg, HbaRegisters, PI};
use chrysalis_kernel::storage::protocol::AtaCommand;
use chrysalis_kernel::time::Clock;

pub const LOCAL_MAC: HardwareAddress = HardwareAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
pub const PEER_MAC: HardwareAddress = HardwareAddress([0x52, 0x55, 0x0a, 0x00, 0x02, 0x02]);
pub const LOCAL_IP: Ipv4Address = Ipv4Address([10, 0, 2, 15]);
pub const GATEWAY_IP: Ipv4Address = Ipv4Address([10, 0, 2, 2]);
pub const DNS_IP: Ipv4Address = Ipv4Address([10, 0, 2, 3]);
pub const NETMASK: Ipv4Address = Ipv4Address([255, 255, 255, 0]);

// Clock

/// Advances one millisecond every time it is read, so every deadline is
/// eventually reached without real time passing
#[derive(Default)]
pub struct StepClock(AtomicU64);

impl StepClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(1)))
    }

    pub fn peek(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl Clock for StepClock {
    fn now_ms(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

// NIC

pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
pub struct Wire {
    pub sent: Vec<Vec<u8>>,
    pub inbound: VecDeque<Vec<u8>>,
}

/// A NIC whose peer is a closure: every transmitted frame is recorded and
/// handed to the responder, whose answers are queued for receive
pub struct MockNic {
    wire: Arc<Mutex<Wire>>,
    responder: Responder,
}

impl MockNic {
    pub fn new(responder: Responder) -> (Self, Arc<Mutex<Wire>>) {
        let wire = Arc::new(Mutex::new(Wire::default()));
        (
            Self {
                wire: wire.clone(),
                responder,
            },
            wire,
        )
    }

    pub fn silent() -> (Self, Arc<Mutex<Wire>>) {
        Self::new(Box::new(|_: &[u8]| Vec::new()))
    }
}

impl NetDriver for MockNic {
    fn send(&mut self, frame: &[u8]) -> Result<(), NetError> {
        let replies = (self.responder)(frame);
        let mut wire = self.wire.lock().unwrap();
        wire.sent.push(frame.to_vec());
        wire.inbound.extend(replies);
        Ok(())
    }

    fn receive(&mut self) -> Option<Vec<u8>> {
        self.wire.lock().unwrap().inbound.pop_front()
    }
}

/// A device with the usual QEMU user-network addressing
pub fn configured_device(driver: MockNic) -> NetDevice {
    let mut device = NetDevice::new("eth0", LOCAL_MAC, Box::new(driver));
    device.ip = LOCAL_IP;
    device.subnet = NETMASK;
    device.gateway = GATEWAY_IP;
    device.dns_server = DNS_IP;
    device
}

pub fn ethertype(frame: &[u8]) -> Option<u16> {
    EthernetFrameHeader::try_from_u8_buffer(frame).map(|header| header.ethertype)
}

pub fn parse_arp(frame: &[u8]) -> Option<ArpPacket> {
    if ethertype(frame)? != EthernetFrameHeader::ETHERTYPE_ARP {
        return None;
    }
    ArpPacket::try_from_u8_buffer(&frame[EthernetFrameHeader::SIZE..])
}

/// The peer answers every ARP request with its own MAC
pub fn arp_reply(frame: &[u8]) -> Option<Vec<u8>> {
    let request = parse_arp(frame)?;
    let reply = ArpPacket::respond_to(&request, PEER_MAC, request.dest_protocol_addr)?;
    Some(EthernetFrameHeader::new(PEER_MAC, request.source_hardware_addr, EthernetFrameHeader::ETHERTYPE_ARP).build_frame(&reply.to_vec()))
}

/// IPv4 header and payload of a frame, with Ethernet padding removed
pub fn parse_ipv4(frame: &[u8]) -> Option<(Ipv4Header, Vec<u8>)> {
    if ethertype(frame)? != EthernetFrameHeader::ETHERTYPE_IP {
        return None;
    }
    let packet = &frame[EthernetFrameHeader::SIZE..];
    let header = Ipv4Header::try_from_u8_buffer(packet)?;
    let end = (header.total_length as usize).min(packet.len());
    let payload = packet.get(header.header_len()..end)?.to_vec();
    Some((header, payload))
}

pub fn ipv4_frame(
    src_ip: Ipv4Address,
    dst_ip: Ipv4Address,
    protocol: IpProtocolType,
    payload: &[u8],
) -> Vec<u8> {
    let header = Ipv4Header::new(src_ip, dst_ip, payload.len() as u16, Ipv4Header::DEFAULT_TTL, protocol);
    let mut packet = header.to_vec();
    packet.extend_from_slice(payload);
    EthernetFrameHeader::new_ipv4(PEER_MAC, LOCAL_MAC).build_frame(&packet)
}

// DMA

/// A block of host memory posing as physical RAM starting at `PHYS_BASE`.
/// Allocation only ever moves forward.
pub struct DmaArena {
    base: usize,
    size: usize,
    next: Mutex<usize>,
}

impl DmaArena {
    pub const PHYS_BASE: u32 = 0x0010_0000;

    pub fn new(size: usize) -> Arc<Self> {
        let memory: &'static mut [u8] = Box::leak(vec![0u8; size].into_boxed_slice());
        Arc::new(Self {
            base: memory.as_mut_ptr() as usize,
            size,
            next: Mutex::new(0),
        })
    }

    fn offset_of(&self, phys: PhysicalAddress, len: usize) -> usize {
        let offset = phys
            .as_u32()
            .checked_sub(Self::PHYS_BASE)
            .expect("physical address below the arena") as usize;
        assert!(offset + len <= self.size, "physical range outside the arena");
        offset
    }

    pub fn read(&self, phys: PhysicalAddress, len: usize) -> Vec<u8> {
        let offset = self.offset_of(phys, len);
        unsafe { std::slice::from_raw_parts((self.base + offset) as *const u8, len).to_vec() }
    }

    pub fn write(&self, phys: PhysicalAddress, data: &[u8]) {
        let offset = self.offset_of(phys, data.len());
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), (self.base + offset) as *mut u8, data.len());
        }
    }

    pub fn used(&self) -> usize {
        *self.next.lock().unwrap()
    }
}

impl DmaAllocator for DmaArena {
    fn allocate(&self, size: usize, align: usize) -> Option<DmaRegion> {
        let mut next = self.next.lock().unwrap();
        let phys_start = (Self::PHYS_BASE as usize + *next).next_multiple_of(align.max(1));
        let offset = phys_start - Self::PHYS_BASE as usize;
        if offset + size > self.size {
            return None;
        }
        *next = offset + size;
        unsafe {
            DmaRegion::from_raw_parts(
                (self.base + offset) as *mut u8,
                PhysicalAddress::new(phys_start as u32),
                size,
            )
        }
    }

    fn virt_to_phys(&self, addr: *const u8) -> Option<PhysicalAddress> {
        let addr = addr as usize;
        if addr < self.base || addr >= self.base + self.size {
            return None;
        }
        Some(PhysicalAddress::new(Self::PHYS_BASE + (addr - self.base) as u32))
    }
}

// AHCI

pub const REGISTER_SPACE: usize = 0x1100;

#[derive(Clone, Debug)]
pub struct ExecutedCommand {
    pub port: usize,
    pub slot: usize,
    pub header: CommandHeader,
    pub fis: RegisterH2dFis,
    pub prdt: PrdtEntry,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    None,
    /// Commands are accepted but never complete
    Hang,
    /// Commands complete with the error bit set in the task file
    TaskFileError,
}

pub struct HbaState {
    pub registers: Vec<u32>,
    pub disks: BTreeMap<usize, Vec<u8>>,
    pub executed: Vec<ExecutedCommand>,
    pub fault: Fault,
}

/// An HBA whose ports complete commands the moment CI is written
#[derive(Clone)]
pub struct MockHba {
    pub state: Arc<Mutex<HbaState>>,
    arena: Arc<DmaArena>,
}

impl MockHba {
    pub fn new(arena: Arc<DmaArena>) -> Self {
        let mut registers = vec![0u32; REGISTER_SPACE / 4];
        // 32 command slots, 64-bit addressing
        registers[0] = 0x8000_1f00 | 0x1f;
        Self {
            state: Arc::new(Mutex::new(HbaState {
                registers,
                disks: BTreeMap::new(),
                executed: Vec::new(),
                fault: Fault::None,
            })),
            arena,
        }
    }

    fn implement(&self, port: usize, ssts: u32, signature: u32) {
        let mut state = self.state.lock().unwrap();
        state.registers[PI / 4] |= 1 << port;
        state.registers[port_offset(port, port_reg::SSTS) / 4] = ssts;
        state.registers[port_offset(port, port_reg::SIG) / 4] = signature;
        // the engines start out running, as firmware leaves them
        state.registers[port_offset(port, port_reg::CMD) / 4] = 0x0000_c011;
    }

    pub fn attach_disk(&self, port: usize, sectors: usize) {
        self.implement(port, 0x113, 0x0000_0101);
        self.state.lock().unwrap().disks.insert(port, vec![0u8; sectors * 512]);
    }

    pub fn attach_atapi(&self, port: usize) {
        self.implement(port, 0x113, 0xeb14_0101);
    }

    /// Implemented, but nothing is plugged in
    pub fn leave_empty(&self, port: usize) {
        self.implement(port, 0, 0xffff_ffff);
    }

    pub fn set_fault(&self, fault: Fault) {
        self.state.lock().unwrap().fault = fault;
    }

    pub fn disk(&self, port: usize) -> Vec<u8> {
        self.state.lock().unwrap().disks.get(&port).cloned().unwrap_or_default()
    }

    pub fn executed(&self) -> Vec<ExecutedCommand> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn port_register(&self, port: usize, register: usize) -> u32 {
        self.state.lock().unwrap().registers[port_offset(port, register) / 4]
    }

    fn identify_block(sectors: u64) -> Vec<u8> {
        let mut words = [0u16; 256];
        let model = b"MOCK SATA DISK                          ";
        for i in 0..20 {
            words[27 + i] = u16::from_be_bytes([model[i * 2], model[i * 2 + 1]]);
        }
        words[60] = sectors.min(0x0fff_ffff) as u16;
        words[61] = (sectors.min(0x0fff_ffff) >> 16) as u16;
        words[83] = 1 << 10;
        for i in 0..4 {
            words[100 + i] = (sectors >> (16 * i)) as u16;
        }
        words.iter().flat_map(|word| word.to_le_bytes()).collect()
    }

    fn execute(&self, state: &mut HbaState, port: usize, slot: usize) {
        let clb = PhysicalAddress::new(state.registers[port_offset(port, port_reg::CLB) / 4]);
        let raw_header = self.arena.read(clb + (slot as u32 * 32), 32);
        let header = CommandHeader::parse(&raw_header).expect("command header");
        let raw_table = self.arena.read(header.table, PRDT_OFFSET + 16);
        let fis = RegisterH2dFis::parse(&raw_table).expect("register FIS");
        let prdt = PrdtEntry::parse(&raw_table[PRDT_OFFSET..]).expect("PRDT entry");
        state.executed.push(ExecutedCommand {
            port,
            slot,
            header,
            fis,
            prdt,
        });

        let disk = state.disks.entry(port).or_default();
        let start = fis.lba as usize * 512;
        let len = fis.sectors as usize * 512;
        let mut status = 0x50;
        match fis.command {
            c if c == AtaCommand::Identify as u8 => {
                let block = Self::identify_block((disk.len() / 512) as u64);
                self.arena.write(prdt.base, &block[..prdt.byte_count.min(512)]);
            }
            c if c == AtaCommand::ReadDma as u8 || c == AtaCommand::ReadDmaExt as u8 => {
                if start + len <= disk.len() {
                    self.arena.write(prdt.base, &disk[start..start + len]);
                } else {
                    status |= 0x01;
                }
            }
            c if c == AtaCommand::WriteDma as u8 || c == AtaCommand::WriteDmaExt as u8 => {
                if start + len <= disk.len() {
                    let data = self.arena.read(prdt.base, len);
                    disk[start..start + len].copy_from_slice(&data);
                } else {
                    status |= 0x01;
                }
            }
            _ => status |= 0x01,
        }
        state.registers[port_offset(port, port_reg::TFD) / 4] = status;
    }
}

impl HbaRegisters for MockHba {
    fn read(&self, offset: usize) -> u32 {
        self.state.lock().unwrap().registers[offset / 4]
    }

    fn write(&mut self, offset: usize, value: u32) {
        let mut state = self.state.lock().unwrap();
        if offset < port_offset(0, 0) {
            state.registers[offset / 4] = value;
            return;
        }
        let port = (offset - port_offset(0, 0)) / 0x80;
        let register = (offset - port_offset(0, 0)) % 0x80;
        match register {
            port_reg::IS | port_reg::SERR => state.registers[offset / 4] &= !value,
            port_reg::CMD => {
                // the engines follow their enable bits
                let mut cmd = value & !(0x0000_c000);
                if value & 0x01 != 0 {
                    cmd |= 1 << 15;
                }
                if value & 0x10 != 0 {
                    cmd |= 1 << 14;
                }
                state.registers[offset / 4] = cmd;
            }
            port_reg::CI => match state.fault {
                Fault::Hang => state.registers[offset / 4] |= value,
                fault => {
                    for slot in (0..32usize).filter(|slot| value & (1u32 << *slot) != 0) {
                        self.execute(&mut state, port, slot);
                    }
                    if fault == Fault::TaskFileError {
                        state.registers[port_offset(port, port_reg::TFD) / 4] |= 0x01;
                    }
                }
            },
            _ => state.registers[offset / 4] = value,
        }
    }
}

// PCI

/// Configuration space with one AHCI controller at 0:31.2, BAR5 = `abar`.
/// Every other port reads as a floating bus.
pub struct PciBus {
    selected: Mutex<u32>,
    dwords: Mutex<BTreeMap<u32, u32>>,
}

impl PciBus {
    pub fn with_ahci(abar: u32) -> Arc<Self> {
        let bus = Self {
            selected: Mutex::new(0),
            dwords: Mutex::new(BTreeMap::new()),
        };
        let function = 0x8000_0000 | (31 << 11) | (2 << 8);
        {
            let mut dwords = bus.dwords.lock().unwrap();
            dwords.insert(0x8000_0000 | (31 << 11), 0x2918_8086);
            dwords.insert(0x8000_0000 | (31 << 11) | 0x0c, 0x0080_0000);
            dwords.insert(0x8000_0000 | (31 << 11) | 0x08, 0x0601_0000);
            dwords.insert(function, 0x2922_8086);
            dwords.insert(function | 0x04, 0x0010_0000);
            dwords.insert(function | 0x08, 0x0106_0102);
            dwords.insert(function | 0x24, abar);
        }
        Arc::new(bus)
    }

    pub fn command_register(&self) -> u32 {
        let function = 0x8000_0000 | (31 << 11) | (2 << 8) | 0x04;
        self.dwords.lock().unwrap().get(&function).copied().unwrap_or(0)
    }
}

impl PortIo for PciBus {
    fn read_u8(&self, _port: u16) -> u8 {
        0
    }

    fn write_u8(&self, _port: u16, _value: u8) {}

    fn read_u16(&self, _port: u16) -> u16 {
        0
    }

    fn write_u16(&self, _port: u16, _value: u16) {}

    fn read_u32(&self, port: u16) -> u32 {
        if port != 0xcfc {
            return 0xffff_ffff;
        }
        let selected = *self.selected.lock().unwrap();
        self.dwords.lock().unwrap().get(&selected).copied().unwrap_or(0xffff_ffff)
    }

    fn write_u32(&self, port: u16, value: u32) {
        match port {
            0xcf8 => *self.selected.lock().unwrap() = value,
            0xcfc => {
                let selected = *self.selected.lock().unwrap();
                self.dwords.lock().unwrap().insert(selected, value);
            }
            _ => (),
        }
    }
}
