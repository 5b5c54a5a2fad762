use alloc::vec::Vec;

use super::super::hardware::HardwareAddress;
use super::packet::{read_u16_be, write_u16_be, PacketHeader};

/// Ethernet frames shorter than this (excluding the FCS) must be padded
pub const MIN_FRAME_SIZE: usize = 60;

/// Header for a raw ethernet frame, the lowest layer of the network stack that
/// the OS deals with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EthernetFrameHeader {
    pub dest_mac: HardwareAddress,
    pub src_mac: HardwareAddress,
    pub ethertype: u16,
}

impl EthernetFrameHeader {
    pub const ETHERTYPE_IP: u16 = 0x0800;
    pub const ETHERTYPE_ARP: u16 = 0x0806;

    /// Create a new ethernet frame with the given source, destination, and type
    pub fn new(src: HardwareAddress, dest: HardwareAddress, ethertype: u16) -> Self {
        Self {
            src_mac: src,
            dest_mac: dest,
            ethertype,
        }
    }

    pub fn get_ethertype(&self) -> u16 {
        self.ethertype
    }

    /// Create an ARP broadcast header from a given source MAC address
    pub fn broadcast_arp(src: HardwareAddress) -> Self {
        Self::new(src, HardwareAddress::broadcast(), Self::ETHERTYPE_ARP)
    }

    /// Create an IPv4 header with a given source and destination MAC
    pub fn new_ipv4(src: HardwareAddress, dest: HardwareAddress) -> Self {
        Self::new(src, dest, Self::ETHERTYPE_IP)
    }

    /// Assemble a complete frame, zero-padded up to the Ethernet minimum
    pub fn build_frame(&self, payload: &[u8]) -> Vec<u8> {
        let length = (Self::SIZE + payload.len()).max(MIN_FRAME_SIZE);
        let mut frame = Vec::with_capacity(length);
        frame.resize(Self::SIZE, 0);
        self.write_to(&mut frame);
        frame.extend_from_slice(payload);
        frame.resize(length, 0);
        frame
    }
}

impl PacketHeader for EthernetFrameHeader {
    const SIZE: usize = 14;

    fn write_to(&self, buffer: &mut [u8]) {
        buffer[0..6].copy_from_slice(&self.dest_mac.0);
        buffer[6..12].copy_from_slice(&self.src_mac.0);
        write_u16_be(buffer, 12, self.ethertype);
    }

    fn try_from_u8_buffer(buffer: &[u8]) -> Option<Self> {
        if buffer.len() < Self::SIZE {
            return None;
        }
        let mut dest_mac = HardwareAddress::ZERO;
        let mut src_mac = HardwareAddress::ZERO;
        dest_mac.0.copy_from_slice(&buffer[0..6]);
        src_mac.0.copy_from_slice(&buffer[6..12]);
        Some(Self {
            dest_mac,
            src_mac,
            ethertype: read_u16_be(buffer, 12),
        })
    }
}
