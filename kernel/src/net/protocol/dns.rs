use alloc::{
    string::{String, ToString},
    vec::Vec,
};

use super::super::error::DnsError;
use super::{
    ipv4::Ipv4Address,
    packet::{read_u16_be, write_u16_be, PacketHeader},
};

pub const DNS_PORT: u16 = 53;
pub const RECORD_TYPE_A: u16 = 1;
pub const RECORD_TYPE_CNAME: u16 = 5;
pub const CLASS_IN: u16 = 1;

/// Labels longer than this cannot be encoded in a single length byte
const MAX_LABEL_LEN: usize = 63;
/// Bound on compression pointers followed while decoding one name
const MAX_POINTER_JUMPS: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,
    pub question_count: u16,
    pub answer_count: u16,
    pub authority_count: u16,
    pub additional_count: u16,
}

impl DnsHeader {
    pub const FLAG_RESPONSE: u16 = 0x8000; // Query/Response
    pub const FLAG_AA: u16 = 0x0400; // Authoritative answer
    pub const FLAG_TC: u16 = 0x0200; // Truncated response
    pub const FLAG_RD: u16 = 0x0100; // Recursion desired
    pub const FLAG_RA: u16 = 0x0080; // Recursion available

    pub fn is_response(&self) -> bool {
        self.flags & Self::FLAG_RESPONSE != 0
    }

    pub fn build_query_header(id: u16, question_count: u16) -> Self {
        Self {
            id,
            flags: Self::FLAG_RD,
            question_count,
            answer_count: 0,
            authority_count: 0,
            additional_count: 0,
        }
    }
}

impl PacketHeader for DnsHeader {
    const SIZE: usize = 12;

    fn write_to(&self, buffer: &mut [u8]) {
        write_u16_be(buffer, 0, self.id);
        write_u16_be(buffer, 2, self.flags);
        write_u16_be(buffer, 4, self.question_count);
        write_u16_be(buffer, 6, self.answer_count);
        write_u16_be(buffer, 8, self.authority_count);
        write_u16_be(buffer, 10, self.additional_count);
    }

    fn try_from_u8_buffer(buffer: &[u8]) -> Option<Self> {
        if buffer.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            id: read_u16_be(buffer, 0),
            flags: read_u16_be(buffer, 2),
            question_count: read_u16_be(buffer, 4),
            answer_count: read_u16_be(buffer, 6),
            authority_count: read_u16_be(buffer, 8),
            additional_count: read_u16_be(buffer, 10),
        })
    }
}

/// Convert a dotted domain name to length-prefixed labels with the
/// terminating zero. A single trailing dot is accepted.
pub fn encode_name(name: &str) -> Result<Vec<u8>, DnsError> {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() {
        return Err(DnsError::InvalidName);
    }
    let mut encoded = Vec::with_capacity(name.len() + 2);
    for label in name.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(DnsError::InvalidName);
        }
        encoded.push(label.len() as u8);
        encoded.extend_from_slice(label.as_bytes());
    }
    encoded.push(0);
    Ok(encoded)
}

/// Build a recursive query for the A record of `name`
pub fn build_query(id: u16, name: &str) -> Result<Vec<u8>, DnsError> {
    let encoded_name = encode_name(name)?;
    let mut packet = DnsHeader::build_query_header(id, 1).to_vec();
    packet.extend_from_slice(&encoded_name);
    packet.extend_from_slice(&RECORD_TYPE_A.to_be_bytes());
    packet.extend_from_slice(&CLASS_IN.to_be_bytes());
    Ok(packet)
}

pub struct DnsRecord<'a> {
    pub name: String,
    pub record_type: u16,
    pub class: u16,
    pub ttl: u32,
    pub data: &'a [u8],
}

/// Cursor over a whole DNS message. Compression pointers are offsets from
/// the start of the message.
pub struct DnsParser<'a> {
    packet: &'a [u8],
    pos: usize,
}

impl<'a> DnsParser<'a> {
    pub fn new(packet: &'a [u8]) -> Self {
        Self {
            packet,
            pos: DnsHeader::SIZE,
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, DnsError> {
        let value = *self.packet.get(self.pos).ok_or(DnsError::Malformed)?;
        self.pos += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16, DnsError> {
        let bytes = self.read_n_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, DnsError> {
        let bytes = self.read_n_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_n_bytes(&mut self, n: usize) -> Result<&'a [u8], DnsError> {
        let end = self.pos.checked_add(n).ok_or(DnsError::Malformed)?;
        let bytes = self.packet.get(self.pos..end).ok_or(DnsError::Malformed)?;
        self.pos = end;
        Ok(bytes)
    }

    /// Move past a name without decoding it. A compression pointer always
    /// ends the name.
    pub fn skip_name(&mut self) -> Result<(), DnsError> {
        loop {
            let label_len = self.read_u8()?;
            if label_len == 0 {
                return Ok(());
            }
            if label_len & 0xc0 == 0xc0 {
                self.read_u8()?;
                return Ok(());
            }
            self.read_n_bytes(label_len as usize)?;
        }
    }

    pub fn parse_name(&mut self) -> Result<String, DnsError> {
        let mut name = String::new();
        let mut cursor = self.pos;
        let mut resume_at = None;
        let mut jumps = 0;

        loop {
            let label_len = *self.packet.get(cursor).ok_or(DnsError::Malformed)?;
            cursor += 1;
            if label_len == 0 {
                break;
            }
            if label_len & 0xc0 == 0xc0 {
                let low = *self.packet.get(cursor).ok_or(DnsError::Malformed)?;
                if resume_at.is_none() {
                    resume_at = Some(cursor + 1);
                }
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(DnsError::Malformed);
                }
                cursor = (((label_len & 0x3f) as usize) << 8) | low as usize;
                continue;
            }
            if label_len & 0xc0 != 0 {
                return Err(DnsError::Malformed);
            }
            let label = self
                .packet
                .get(cursor..cursor + label_len as usize)
                .ok_or(DnsError::Malformed)?;
            if !name.is_empty() {
                name.push('.');
            }
            name.push_str(&String::from_utf8_lossy(label).to_string());
            cursor += label_len as usize;
        }

        self.pos = resume_at.unwrap_or(cursor);
        Ok(name)
    }

    pub fn skip_question(&mut self) -> Result<(), DnsError> {
        self.skip_name()?;
        self.read_n_bytes(4)?; // type and class
        Ok(())
    }

    pub fn parse_answer(&mut self) -> Result<DnsRecord<'a>, DnsError> {
        let name = self.parse_name()?;
        let record_type = self.read_u16()?;
        let class = self.read_u16()?;
        let ttl = self.read_u32()?;
        let data_length = self.read_u16()? as usize;
        let data = self.read_n_bytes(data_length)?;
        Ok(DnsRecord {
            name,
            record_type,
            class,
            ttl,
            data,
        })
    }
}

/// Extract the address from the first A record of class IN in a response
pub fn parse_response(packet: &[u8]) -> Result<Ipv4Address, DnsError> {
    let header = DnsHeader::try_from_u8_buffer(packet).ok_or(DnsError::Malformed)?;
    if !header.is_response() {
        return Err(DnsError::Malformed);
    }
    let mut parser = DnsParser::new(packet);
    for _ in 0..header.question_count {
        parser.skip_question()?;
    }
    for _ in 0..header.answer_count {
        let record = parser.parse_answer()?;
        if record.record_type == RECORD_TYPE_A && record.class == CLASS_IN {
            if let [a, b, c, d] = record.data {
                return Ok(Ipv4Address([*a, *b, *c, *d]));
            }
        }
    }
    Err(DnsError::NoAnswer)
}
