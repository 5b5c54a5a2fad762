use super::checksum::checksum_bytes;
use super::packet::{read_u16_be, write_u16_be, PacketHeader};

/// Transparent wrapper for an IPV4 address, used for type safety. The octets
/// are stored in network order, so `Ipv4Address([10, 0, 2, 15])` is 10.0.2.15.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Ipv4Address(pub [u8; 4]);

impl Ipv4Address {
    pub const UNSPECIFIED: Self = Self([0; 4]);
    pub const BROADCAST: Self = Self([255; 4]);

    pub fn parse(addr: &str) -> Option<Self> {
        let mut octets = [0u8; 4];
        let mut parts = addr.split('.');
        for octet in octets.iter_mut() {
            *octet = parse_octet(parts.next()?)?;
        }
        if parts.next().is_some() {
            return None; // Extra characters
        }
        Some(Self(octets))
    }

    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }

    /// 255.255.255.255 and 0.0.0.0 are delivered to every host on the link
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST || self.is_unspecified()
    }

    /// The address as a big-endian number, e.g. 10.0.2.15 -> 0x0a00020f
    pub fn to_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    pub fn from_u32(value: u32) -> Self {
        Self(value.to_be_bytes())
    }

    /// The four network-order octets read as one native word, the way a
    /// little-endian C stack stores an `in_addr`
    pub fn to_network_u32(&self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

fn parse_octet(digits: &str) -> Option<u8> {
    if digits.is_empty() || digits.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None; // Leading zero in octet
    }
    let value: u16 = digits.parse().ok()?;
    u8::try_from(value).ok()
}

impl core::ops::Deref for Ipv4Address {
    type Target = [u8; 4];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}.{}", self[0], self[1], self[2], self[3])
    }
}

impl core::ops::BitAnd for Ipv4Address {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        let mut result = self;
        for (octet, mask) in result.0.iter_mut().zip(rhs.0.iter()) {
            *octet &= mask;
        }
        result
    }
}

/// Enum for supported IP protocol types
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IpProtocolType {
    Icmp = 0x01,
    Tcp = 0x06,
    Udp = 0x11,
}

impl TryFrom<u8> for IpProtocolType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Icmp),
            0x06 => Ok(Self::Tcp),
            0x11 => Ok(Self::Udp),
            other => Err(other),
        }
    }
}

/// Header for sending and receiving IPV4 packets
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv4Header {
    /// 4-bit version (high nibble), 4-bit header length in words (low nibble)
    pub version_header_len: u8,
    /// differentiated services and congested network notification
    pub diff_services: u8,
    /// total length of the packet, including header and data
    pub total_length: u16,
    /// unique identifier for the packet, can be used for grouping fragments
    /// into a single packet
    pub identification: u16,
    /// fragmentation information. The highest 3 bits are flags marking if
    /// a packet can or has been fragmented. The remaining 13 bits are the
    /// packet's offset in the original packet, used for reassembling
    pub fragment: u16,
    /// time to live, decremented by each router that processes the packet
    pub ttl: u8,
    /// protocol number of the payload
    pub protocol: u8,
    /// checksum of the header
    pub checksum: u16,
    /// IP address of the sender
    pub source: Ipv4Address,
    /// IP address of the destination, used for routing to the final node
    pub dest: Ipv4Address,
}

impl Ipv4Header {
    pub const DEFAULT_TTL: u8 = 64;
    pub const DEFAULT_IDENTIFICATION: u16 = 0x1234;
    /// Largest payload whose total length still fits the 16-bit field
    pub const MAX_PAYLOAD: usize = u16::MAX as usize - Self::SIZE;

    pub fn new(
        source: Ipv4Address,
        dest: Ipv4Address,
        content_len: u16,
        ttl: u8,
        protocol: IpProtocolType,
    ) -> Self {
        let mut header = Self {
            version_header_len: 0x45, // Version 4, header length 5 (20 bytes)
            diff_services: 0,
            total_length: Self::SIZE as u16 + content_len,
            identification: Self::DEFAULT_IDENTIFICATION,
            fragment: 0,
            ttl,
            protocol: protocol as u8,
            checksum: 0,
            source,
            dest,
        };
        // Once the header is constructed, we can compute the checksum
        header.checksum = header.compute_checksum();
        header
    }

    pub fn version(&self) -> u8 {
        self.version_header_len >> 4
    }

    /// Header length in bytes, including any options
    pub fn header_len(&self) -> usize {
        (self.version_header_len & 0x0f) as usize * 4
    }

    pub fn protocol_type(&self) -> Option<IpProtocolType> {
        IpProtocolType::try_from(self.protocol).ok()
    }

    /// Computes the checksum for the header, treating the checksum field as 0
    pub fn compute_checksum(&self) -> u16 {
        let mut copy = self.clone();
        copy.checksum = 0;
        checksum_bytes(&copy.to_vec())
    }
}

impl PacketHeader for Ipv4Header {
    const SIZE: usize = 20;

    fn write_to(&self, buffer: &mut [u8]) {
        buffer[0] = self.version_header_len;
        buffer[1] = self.diff_services;
        write_u16_be(buffer, 2, self.total_length);
        write_u16_be(buffer, 4, self.identification);
        write_u16_be(buffer, 6, self.fragment);
        buffer[8] = self.ttl;
        buffer[9] = self.protocol;
        write_u16_be(buffer, 10, self.checksum);
        buffer[12..16].copy_from_slice(&self.source.0);
        buffer[16..20].copy_from_slice(&self.dest.0);
    }

    fn try_from_u8_buffer(buffer: &[u8]) -> Option<Self> {
        if buffer.len() < Self::SIZE {
            return None;
        }
        let header = Self {
            version_header_len: buffer[0],
            diff_services: buffer[1],
            total_length: read_u16_be(buffer, 2),
            identification: read_u16_be(buffer, 4),
            fragment: read_u16_be(buffer, 6),
            ttl: buffer[8],
            protocol: buffer[9],
            checksum: read_u16_be(buffer, 10),
            source: Ipv4Address([buffer[12], buffer[13], buffer[14], buffer[15]]),
            dest: Ipv4Address([buffer[16], buffer[17], buffer[18], buffer[19]]),
        };
        if header.version() != 4 || header.header_len() < Self::SIZE {
            return None;
        }
        Some(header)
    }
}

#[cfg(test)]
mod tests {
    use super::{IpProtocolType, Ipv4Address, Ipv4Header, PacketHeader};
    use crate::net::protocol::checksum::is_valid;

    #[test]
    fn test_address_parse() {
        assert_eq!(
            Ipv4Address::parse("192.168.0.1"),
            Some(Ipv4Address([192, 168, 0, 1]))
        );
        assert_eq!(
            Ipv4Address::parse("127.0.0.1"),
            Some(Ipv4Address([127, 0, 0, 1]))
        );

        assert_eq!(
            Ipv4Address::parse("0.0.0.0"),
            Some(Ipv4Address([0, 0, 0, 0]))
        );

        assert_eq!(Ipv4Address::parse("127.0.0.01"), None);
        assert_eq!(Ipv4Address::parse("www.example.net"), None);
        assert_eq!(Ipv4Address::parse("12.0.0.256"), None);
        assert_eq!(Ipv4Address::parse("192.168.1"), None);
        assert_eq!(Ipv4Address::parse("192.168.1."), None);
        assert_eq!(Ipv4Address::parse("192.168.1.1.1"), None);
        assert_eq!(Ipv4Address::parse(".127.0.0.1"), None);
        assert_eq!(Ipv4Address::parse("10.0..23"), None);
        assert_eq!(Ipv4Address::parse("10"), None);
        assert_eq!(Ipv4Address::parse(""), None);
    }

    #[test]
    fn numeric_views() {
        let ip = Ipv4Address([93, 184, 216, 34]);
        assert_eq!(ip.to_u32(), 0x5DB8_D822);
        assert_eq!(ip.to_network_u32(), 0x22D8_B85D);
        assert_eq!(Ipv4Address::from_u32(0x0a00_020f), Ipv4Address([10, 0, 2, 15]));
        assert!(Ipv4Address::UNSPECIFIED.is_broadcast());
        assert!(Ipv4Address::BROADCAST.is_broadcast());
        assert!(!ip.is_broadcast());
        let mask = Ipv4Address([255, 255, 255, 0]);
        assert_eq!(ip & mask, Ipv4Address([93, 184, 216, 0]));
    }

    #[test]
    fn header_layout() {
        let header = Ipv4Header::new(
            Ipv4Address([10, 0, 2, 15]),
            Ipv4Address([10, 0, 2, 2]),
            8,
            Ipv4Header::DEFAULT_TTL,
            IpProtocolType::Udp,
        );
        let bytes = header.to_vec();
        // version nibble first, IHL second, regardless of host bitfield order
        assert_eq!(bytes[0], 0x45);
        assert_eq!(&bytes[2..4], &[0, 28]);
        assert_eq!(&bytes[4..6], &[0x12, 0x34]);
        assert_eq!(bytes[8], 64);
        assert_eq!(bytes[9], 17);
        assert!(is_valid(&bytes));

        let parsed = Ipv4Header::try_from_u8_buffer(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.protocol_type(), Some(IpProtocolType::Udp));
    }

    #[test]
    fn checksum_holds_for_any_ttl() {
        for ttl in 0..=255u8 {
            let header = Ipv4Header::new(
                Ipv4Address([192, 168, 1, ttl]),
                Ipv4Address([8, 8, 8, 8]),
                ttl as u16 * 3,
                ttl,
                IpProtocolType::Tcp,
            );
            assert!(is_valid(&header.to_vec()), "ttl {}", ttl);
        }
    }

    #[test]
    fn rejects_non_ipv4() {
        let mut bytes = [0u8; 20];
        bytes[0] = 0x65;
        assert!(Ipv4Header::try_from_u8_buffer(&bytes).is_none());
        bytes[0] = 0x44;
        assert!(Ipv4Header::try_from_u8_buffer(&bytes).is_none());
        assert!(Ipv4Header::try_from_u8_buffer(&bytes[..19]).is_none());
    }
}
