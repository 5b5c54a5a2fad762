//! Address Resolution Protocol (ARP) is the network protocol used to discover
//! the hardware address (MAC, etc) of devices on the network.
//! ARP Packets are sent at the data link layer, and are independent of the
//! networking protocol being used.
//! The underlying protocol allows sending probe requests, where a single host
//! looks for a specific device. It also supports broadcast requests, where a
//! device can tell all interested parties that it is available at a specific
//! location.

use crate::net::hardware::HardwareAddress;

use super::{
    ipv4::Ipv4Address,
    packet::{read_u16_be, write_u16_be, PacketHeader},
};

pub const OPCODE_REQUEST: u16 = 1;
pub const OPCODE_REPLY: u16 = 2;

/// The ARP Packet contains just enough data for the hardware and protocol
/// address for both the source and destination devices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArpPacket {
    /// Network link type; 1 for Ethernet
    pub hardware_type: u16,
    /// Network protocol type, using the same values as EtherType; 0x0800 for IPv4
    pub protocol_type: u16,
    /// Length of hardware address in octets; 6 for Ethernet
    pub hardware_addr_length: u8,
    /// Length of protocol address in octets; 4 for IPv4
    pub protocol_addr_length: u8,
    /// ARP operation; 1 for request, 2 for response
    pub opcode: u16,

    // Since we only support Ethernet and IPv4, the address fields are fixed
    // at 6 and 4 octets respectively.
    pub source_hardware_addr: HardwareAddress,
    pub source_protocol_addr: Ipv4Address,
    pub dest_hardware_addr: HardwareAddress,
    pub dest_protocol_addr: Ipv4Address,
}

impl ArpPacket {
    fn ethernet_ipv4(
        opcode: u16,
        src_mac: HardwareAddress,
        src_ip: Ipv4Address,
        dest_mac: HardwareAddress,
        dest_ip: Ipv4Address,
    ) -> Self {
        Self {
            hardware_type: 1,
            protocol_type: 0x0800,
            hardware_addr_length: 6,
            protocol_addr_length: 4,
            opcode,
            source_hardware_addr: src_mac,
            source_protocol_addr: src_ip,
            dest_hardware_addr: dest_mac,
            dest_protocol_addr: dest_ip,
        }
    }

    /// Construct an ARP request packet, used for searching for a specific
    /// device. The target hardware address is filled with the broadcast MAC.
    pub fn request(src_mac: HardwareAddress, src_ip: Ipv4Address, lookup: Ipv4Address) -> Self {
        Self::ethernet_ipv4(
            OPCODE_REQUEST,
            src_mac,
            src_ip,
            HardwareAddress::BROADCAST,
            lookup,
        )
    }

    /// Construct an ARP response packet, used for responding to a request
    pub fn response(
        src_mac: HardwareAddress,
        src_ip: Ipv4Address,
        dest_mac: HardwareAddress,
        dest_ip: Ipv4Address,
    ) -> Self {
        Self::ethernet_ipv4(OPCODE_REPLY, src_mac, src_ip, dest_mac, dest_ip)
    }

    /// Construct a response to a specific incoming ARP request
    pub fn respond_to(request: &Self, mac: HardwareAddress, ip: Ipv4Address) -> Option<Self> {
        if !request.is_request() {
            return None;
        }
        Some(Self::response(
            mac,
            ip,
            request.source_hardware_addr,
            request.source_protocol_addr,
        ))
    }

    pub fn is_request(&self) -> bool {
        self.opcode == OPCODE_REQUEST
    }

    pub fn is_reply(&self) -> bool {
        self.opcode == OPCODE_REPLY
    }
}

impl PacketHeader for ArpPacket {
    const SIZE: usize = 28;

    fn write_to(&self, buffer: &mut [u8]) {
        write_u16_be(buffer, 0, self.hardware_type);
        write_u16_be(buffer, 2, self.protocol_type);
        buffer[4] = self.hardware_addr_length;
        buffer[5] = self.protocol_addr_length;
        write_u16_be(buffer, 6, self.opcode);
        buffer[8..14].copy_from_slice(&self.source_hardware_addr.0);
        buffer[14..18].copy_from_slice(&self.source_protocol_addr.0);
        buffer[18..24].copy_from_slice(&self.dest_hardware_addr.0);
        buffer[24..28].copy_from_slice(&self.dest_protocol_addr.0);
    }

    fn try_from_u8_buffer(buffer: &[u8]) -> Option<Self> {
        if buffer.len() < Self::SIZE {
            return None;
        }
        let mut src_mac = [0u8; 6];
        let mut src_ip = [0u8; 4];
        let mut dest_mac = [0u8; 6];
        let mut dest_ip = [0u8; 4];
        src_mac.copy_from_slice(&buffer[8..14]);
        src_ip.copy_from_slice(&buffer[14..18]);
        dest_mac.copy_from_slice(&buffer[18..24]);
        dest_ip.copy_from_slice(&buffer[24..28]);
        Some(Self {
            hardware_type: read_u16_be(buffer, 0),
            protocol_type: read_u16_be(buffer, 2),
            hardware_addr_length: buffer[4],
            protocol_addr_length: buffer[5],
            opcode: read_u16_be(buffer, 6),
            source_hardware_addr: HardwareAddress(src_mac),
            source_protocol_addr: Ipv4Address(src_ip),
            dest_hardware_addr: HardwareAddress(dest_mac),
            dest_protocol_addr: Ipv4Address(dest_ip),
        })
    }
}
