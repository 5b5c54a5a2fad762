use alloc::vec::Vec;

use crate::net::error::NetError;

use bitflags::bitflags;

use super::{
    checksum::IpChecksumHeader,
    ipv4::{IpProtocolType, Ipv4Address, Ipv4Header},
    packet::{read_u16_be, read_u32_be, write_u16_be, write_u32_be, PacketHeader},
};

bitflags! {
    /// Control bits in the 14th byte of the TCP header
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

/// Receive window advertised on every outgoing segment
pub const DEFAULT_WINDOW: u16 = 8192;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpHeader {
    pub source_port: u16,
    pub dest_port: u16,
    pub sequence_number: u32,
    pub ack_number: u32,
    /// Header length in 32-bit words in the high nibble
    pub data_offset: u8,
    pub flags: TcpFlags,
    pub window_size: u16,
    pub checksum: u16,
    pub urgent_pointer: u16,
}

impl TcpHeader {
    pub fn new(
        source_port: u16,
        dest_port: u16,
        sequence_number: u32,
        ack_number: u32,
        flags: TcpFlags,
    ) -> Self {
        Self {
            source_port,
            dest_port,
            sequence_number,
            ack_number,
            // no options are ever sent
            data_offset: ((Self::SIZE / 4) as u8) << 4,
            flags,
            window_size: DEFAULT_WINDOW,
            checksum: 0,
            urgent_pointer: 0,
        }
    }

    /// Header length in bytes, including any options the sender attached
    pub fn header_len(&self) -> usize {
        (self.data_offset >> 4) as usize * 4
    }
}

impl PacketHeader for TcpHeader {
    const SIZE: usize = 20;

    fn write_to(&self, buffer: &mut [u8]) {
        write_u16_be(buffer, 0, self.source_port);
        write_u16_be(buffer, 2, self.dest_port);
        write_u32_be(buffer, 4, self.sequence_number);
        write_u32_be(buffer, 8, self.ack_number);
        buffer[12] = self.data_offset;
        buffer[13] = self.flags.bits();
        write_u16_be(buffer, 14, self.window_size);
        write_u16_be(buffer, 16, self.checksum);
        write_u16_be(buffer, 18, self.urgent_pointer);
    }

    fn try_from_u8_buffer(buffer: &[u8]) -> Option<Self> {
        if buffer.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            source_port: read_u16_be(buffer, 0),
            dest_port: read_u16_be(buffer, 2),
            sequence_number: read_u32_be(buffer, 4),
            ack_number: read_u32_be(buffer, 8),
            data_offset: buffer[12],
            flags: TcpFlags::from_bits_truncate(buffer[13]),
            window_size: read_u16_be(buffer, 14),
            checksum: read_u16_be(buffer, 16),
            urgent_pointer: read_u16_be(buffer, 18),
        })
    }
}

/// Build a TCP segment with a checksum computed over the pseudo-header,
/// the header and the data
pub fn create_segment(
    source_ip: Ipv4Address,
    dest_ip: Ipv4Address,
    header: &TcpHeader,
    data: &[u8],
) -> Result<Vec<u8>, NetError> {
    if data.len() > Ipv4Header::MAX_PAYLOAD - TcpHeader::SIZE {
        return Err(NetError::PayloadTooLarge);
    }
    let mut segment = Vec::with_capacity(TcpHeader::SIZE + data.len());
    segment.resize(TcpHeader::SIZE, 0);
    let mut header = header.clone();
    header.checksum = 0;
    header.write_to(&mut segment);
    segment.extend_from_slice(data);

    let pseudo_header = IpChecksumHeader {
        source_ip,
        dest_ip,
        protocol: IpProtocolType::Tcp,
        segment_length: segment.len() as u16,
    };
    let checksum = pseudo_header.checksum_segment(&segment).compute();
    write_u16_be(&mut segment, 16, checksum);
    Ok(segment)
}

/// Split an inbound segment at its data offset. Returns `None` when the
/// offset points outside the segment.
pub fn parse_segment(segment: &[u8]) -> Option<(TcpHeader, &[u8])> {
    let header = TcpHeader::try_from_u8_buffer(segment)?;
    let header_len = header.header_len();
    if header_len < TcpHeader::SIZE || header_len > segment.len() {
        return None;
    }
    Some((header, &segment[header_len..]))
}
