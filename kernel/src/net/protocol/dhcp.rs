//! BOOTP/DHCP message layout. The fixed part of the message is followed by
//! the magic cookie and a list of type-length-value options.

use alloc::vec::Vec;

use super::super::hardware::HardwareAddress;
use super::ipv4::Ipv4Address;
use super::packet::{read_u16_be, read_u32_be, write_u16_be, write_u32_be, PacketHeader};

pub const CLIENT_PORT: u16 = 68;
pub const SERVER_PORT: u16 = 67;
pub const MAGIC_COOKIE: u32 = 0x63825363;

/// Ask the server to broadcast its replies, since we have no address yet
pub const FLAG_BROADCAST: u16 = 0x8000;

pub const OPTION_PAD: u8 = 0;
pub const OPTION_SUBNET_MASK: u8 = 1;
pub const OPTION_ROUTER: u8 = 3;
pub const OPTION_DNS: u8 = 6;
pub const OPTION_REQUESTED_IP: u8 = 50;
pub const OPTION_LEASE_TIME: u8 = 51;
pub const OPTION_MESSAGE_TYPE: u8 = 53;
pub const OPTION_SERVER_ID: u8 = 54;
pub const OPTION_END: u8 = 255;

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
}

impl TryFrom<u8> for DhcpMessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            other => Err(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DhcpPacket {
    /// DHCP message type; 1 for request, 2 for reply
    pub op: u8,
    /// Hardware address type; almost always 1 for Ethernet
    pub htype: u8,
    /// Hardware address length; 6 for Ethernet
    pub hlen: u8,
    /// Hops; used for relay
    pub hops: u8,
    /// Transaction ID; used to match requests and replies, should be unique
    pub xid: u32,
    /// Seconds elapsed since the client started the DHCP process, filled by client
    pub secs: u16,
    /// Flags; used for broadcast requests and nothing else
    pub flags: u16,
    /// Client IP address; filled by client if it is already bound
    pub ciaddr: Ipv4Address,
    /// Your IP address; filled by server in reply
    pub yiaddr: Ipv4Address,
    /// Server IP address; filled by server in reply
    pub siaddr: Ipv4Address,
    /// Gateway IP address; filled by server in reply if used
    pub giaddr: Ipv4Address,
    /// Client hardware address; filled by client, used to identify the client
    pub chaddr: [u8; 16],
    pub magic: u32,
}

impl DhcpPacket {
    pub const REQUEST_OP: u8 = 1;
    pub const REPLY_OP: u8 = 2;

    /// Offset of the magic cookie; sname and file are always left empty
    const COOKIE_OFFSET: usize = 236;

    pub fn boot_request(mac: HardwareAddress, xid: u32) -> Self {
        let mut chaddr = [0; 16];
        chaddr[0..6].copy_from_slice(&*mac);
        Self {
            op: Self::REQUEST_OP,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid,
            secs: 0,
            flags: FLAG_BROADCAST,
            ciaddr: Ipv4Address::UNSPECIFIED,
            yiaddr: Ipv4Address::UNSPECIFIED,
            siaddr: Ipv4Address::UNSPECIFIED,
            giaddr: Ipv4Address::UNSPECIFIED,
            chaddr,
            magic: MAGIC_COOKIE,
        }
    }
}

impl PacketHeader for DhcpPacket {
    const SIZE: usize = 240;

    fn write_to(&self, buffer: &mut [u8]) {
        buffer[..Self::SIZE].fill(0);
        buffer[0] = self.op;
        buffer[1] = self.htype;
        buffer[2] = self.hlen;
        buffer[3] = self.hops;
        write_u32_be(buffer, 4, self.xid);
        write_u16_be(buffer, 8, self.secs);
        write_u16_be(buffer, 10, self.flags);
        buffer[12..16].copy_from_slice(&self.ciaddr.0);
        buffer[16..20].copy_from_slice(&self.yiaddr.0);
        buffer[20..24].copy_from_slice(&self.siaddr.0);
        buffer[24..28].copy_from_slice(&self.giaddr.0);
        buffer[28..44].copy_from_slice(&self.chaddr);
        write_u32_be(buffer, Self::COOKIE_OFFSET, self.magic);
    }

    fn try_from_u8_buffer(buffer: &[u8]) -> Option<Self> {
        if buffer.len() < Self::SIZE {
            return None;
        }
        let ip_at = |offset: usize| {
            Ipv4Address([
                buffer[offset],
                buffer[offset + 1],
                buffer[offset + 2],
                buffer[offset + 3],
            ])
        };
        let mut chaddr = [0; 16];
        chaddr.copy_from_slice(&buffer[28..44]);
        Some(Self {
            op: buffer[0],
            htype: buffer[1],
            hlen: buffer[2],
            hops: buffer[3],
            xid: read_u32_be(buffer, 4),
            secs: read_u16_be(buffer, 8),
            flags: read_u16_be(buffer, 10),
            ciaddr: ip_at(12),
            yiaddr: ip_at(16),
            siaddr: ip_at(20),
            giaddr: ip_at(24),
            chaddr,
            magic: read_u32_be(buffer, Self::COOKIE_OFFSET),
        })
    }
}

/// Options the client cares about, pulled from a server reply
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DhcpOptions {
    pub message_type: Option<DhcpMessageType>,
    pub server_id: Option<Ipv4Address>,
    pub subnet_mask: Option<Ipv4Address>,
    pub router: Option<Ipv4Address>,
    pub dns: Option<Ipv4Address>,
    pub lease_time: Option<u32>,
}

fn option_ip(value: &[u8]) -> Option<Ipv4Address> {
    match value {
        [a, b, c, d, ..] => Some(Ipv4Address([*a, *b, *c, *d])),
        _ => None,
    }
}

impl DhcpOptions {
    /// Walk the TLV list. Parsing stops at the end marker or at the first
    /// option whose length runs past the buffer.
    pub fn parse(mut options: &[u8]) -> Self {
        let mut parsed = Self::default();
        loop {
            match options {
                [] | [OPTION_END, ..] => break,
                [OPTION_PAD, rest @ ..] => options = rest,
                [tag, len, rest @ ..] => {
                    let len = *len as usize;
                    if rest.len() < len {
                        break;
                    }
                    let value = &rest[..len];
                    match (*tag, len) {
                        (OPTION_MESSAGE_TYPE, 1) => {
                            parsed.message_type = DhcpMessageType::try_from(value[0]).ok();
                        }
                        (OPTION_SERVER_ID, 4) => parsed.server_id = option_ip(value),
                        (OPTION_SUBNET_MASK, 4) => parsed.subnet_mask = option_ip(value),
                        // only the first router and name server are used
                        (OPTION_ROUTER, _) => parsed.router = option_ip(value),
                        (OPTION_DNS, _) => parsed.dns = option_ip(value),
                        (OPTION_LEASE_TIME, 4) => parsed.lease_time = Some(read_u32_be(value, 0)),
                        _ => (),
                    }
                    options = &rest[len..];
                }
                [_] => break,
            }
        }
        parsed
    }
}

/// Build a DISCOVER or REQUEST message. REQUEST carries the requested
/// address (option 50) followed by the server identifier (option 54).
pub fn build_message(
    mac: HardwareAddress,
    xid: u32,
    message_type: DhcpMessageType,
    requested: Option<(Ipv4Address, Ipv4Address)>,
) -> Vec<u8> {
    let packet = DhcpPacket::boot_request(mac, xid);
    let mut message = packet.to_vec();
    message.extend_from_slice(&[OPTION_MESSAGE_TYPE, 1, message_type as u8]);
    if let Some((requested_ip, server_ip)) = requested {
        message.extend_from_slice(&[OPTION_REQUESTED_IP, 4]);
        message.extend_from_slice(&requested_ip.0);
        message.extend_from_slice(&[OPTION_SERVER_ID, 4]);
        message.extend_from_slice(&server_ip.0);
    }
    message.push(OPTION_END);
    message
}

/// Parse a reply into its fixed part and options. Messages with the wrong
/// cookie are rejected.
pub fn parse_message(data: &[u8]) -> Option<(DhcpPacket, DhcpOptions)> {
    let packet = DhcpPacket::try_from_u8_buffer(data)?;
    if packet.magic != MAGIC_COOKIE {
        return None;
    }
    let options = DhcpOptions::parse(&data[DhcpPacket::SIZE..]);
    Some((packet, options))
}
