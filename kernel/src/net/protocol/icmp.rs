use alloc::vec::Vec;

use super::checksum::checksum_bytes;
use super::packet::{read_u16_be, write_u16_be, PacketHeader};

pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_ECHO_REQUEST: u8 = 8;

/// Echo request/reply header. Other ICMP types share the first four bytes
/// and are only logged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IcmpEchoHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
}

impl IcmpEchoHeader {
    pub fn request(identifier: u16, sequence: u16) -> Self {
        Self {
            icmp_type: TYPE_ECHO_REQUEST,
            code: 0,
            checksum: 0,
            identifier,
            sequence,
        }
    }

    pub fn is_echo_request(&self) -> bool {
        self.icmp_type == TYPE_ECHO_REQUEST
    }

    pub fn is_echo_reply(&self) -> bool {
        self.icmp_type == TYPE_ECHO_REPLY
    }

    /// Build a full ICMP message with the checksum covering header and data
    pub fn create_message(&self, data: &[u8]) -> Vec<u8> {
        let mut message = Vec::with_capacity(Self::SIZE + data.len());
        message.resize(Self::SIZE, 0);
        let mut header = self.clone();
        header.checksum = 0;
        header.write_to(&mut message);
        message.extend_from_slice(data);
        let checksum = checksum_bytes(&message);
        write_u16_be(&mut message, 2, checksum);
        message
    }
}

impl PacketHeader for IcmpEchoHeader {
    const SIZE: usize = 8;

    fn write_to(&self, buffer: &mut [u8]) {
        buffer[0] = self.icmp_type;
        buffer[1] = self.code;
        write_u16_be(buffer, 2, self.checksum);
        write_u16_be(buffer, 4, self.identifier);
        write_u16_be(buffer, 6, self.sequence);
    }

    fn try_from_u8_buffer(buffer: &[u8]) -> Option<Self> {
        if buffer.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            icmp_type: buffer[0],
            code: buffer[1],
            checksum: read_u16_be(buffer, 2),
            identifier: read_u16_be(buffer, 4),
            sequence: read_u16_be(buffer, 6),
        })
    }
}

/// Turn an inbound echo request into the matching reply, echoing the data
pub fn echo_reply_for(request: &[u8]) -> Option<Vec<u8>> {
    let header = IcmpEchoHeader::try_from_u8_buffer(request)?;
    if !header.is_echo_request() {
        return None;
    }
    let reply = IcmpEchoHeader {
        icmp_type: TYPE_ECHO_REPLY,
        ..header
    };
    Some(reply.create_message(&request[IcmpEchoHeader::SIZE..]))
}

#[cfg(test)]
mod tests {
    use super::{echo_reply_for, IcmpEchoHeader, PacketHeader};
    use crate::net::protocol::checksum::is_valid;

    #[test]
    fn echo_request_checksum() {
        let data: alloc::vec::Vec<u8> = (0..32u8).collect();
        let message = IcmpEchoHeader::request(1, 1).create_message(&data);
        assert_eq!(message.len(), 40);
        assert_eq!(&message[..2], &[8, 0]);
        assert_eq!(&message[4..8], &[0, 1, 0, 1]);
        assert!(is_valid(&message));
    }

    #[test]
    fn reply_mirrors_request() {
        let message = IcmpEchoHeader::request(0x4242, 7).create_message(b"abc");
        let reply = echo_reply_for(&message).unwrap();
        let header = IcmpEchoHeader::try_from_u8_buffer(&reply).unwrap();
        assert!(header.is_echo_reply());
        assert_eq!((header.identifier, header.sequence), (0x4242, 7));
        assert_eq!(&reply[8..], b"abc");
        assert!(is_valid(&reply));
        assert!(echo_reply_for(&reply).is_none());
    }
}
