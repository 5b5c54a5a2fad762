use alloc::vec::Vec;

use crate::net::error::NetError;

use super::{
    checksum::IpChecksumHeader,
    ipv4::{IpProtocolType, Ipv4Address, Ipv4Header},
    packet::{read_u16_be, write_u16_be, PacketHeader},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdpHeader {
    pub source_port: u16,
    pub dest_port: u16,
    /// Length of header and data in bytes
    pub length: u16,
    pub checksum: u16,
}

impl UdpHeader {
    pub fn new(source_port: u16, dest_port: u16, data_size: usize) -> Self {
        Self {
            source_port,
            dest_port,
            length: (Self::SIZE + data_size) as u16,
            checksum: 0,
        }
    }

    /// Bytes of payload announced by the header
    pub fn payload_len(&self) -> usize {
        (self.length as usize).saturating_sub(Self::SIZE)
    }

    pub fn compute_checksum(
        &self,
        source_ip: Ipv4Address,
        dest_ip: Ipv4Address,
        data: &[u8],
    ) -> u16 {
        let mut segment = Vec::with_capacity(Self::SIZE + data.len());
        segment.resize(Self::SIZE, 0);
        let mut header = self.clone();
        header.checksum = 0;
        header.write_to(&mut segment);
        segment.extend_from_slice(data);

        let pseudo_header = IpChecksumHeader {
            source_ip,
            dest_ip,
            protocol: IpProtocolType::Udp,
            segment_length: segment.len() as u16,
        };
        match pseudo_header.checksum_segment(&segment).compute() {
            // zero means "no checksum" for UDP, so it is transmitted as all ones
            0 => 0xffff,
            value => value,
        }
    }
}

impl PacketHeader for UdpHeader {
    const SIZE: usize = 8;

    fn write_to(&self, buffer: &mut [u8]) {
        write_u16_be(buffer, 0, self.source_port);
        write_u16_be(buffer, 2, self.dest_port);
        write_u16_be(buffer, 4, self.length);
        write_u16_be(buffer, 6, self.checksum);
    }

    fn try_from_u8_buffer(buffer: &[u8]) -> Option<Self> {
        if buffer.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            source_port: read_u16_be(buffer, 0),
            dest_port: read_u16_be(buffer, 2),
            length: read_u16_be(buffer, 4),
            checksum: read_u16_be(buffer, 6),
        })
    }
}

/// Build the UDP segment (header and payload) that goes inside an IPV4 packet
pub fn create_segment(
    source_ip: Ipv4Address,
    source_port: u16,
    dest_ip: Ipv4Address,
    dest_port: u16,
    data: &[u8],
) -> Result<Vec<u8>, NetError> {
    if data.len() > Ipv4Header::MAX_PAYLOAD - UdpHeader::SIZE {
        return Err(NetError::PayloadTooLarge);
    }
    let mut header = UdpHeader::new(source_port, dest_port, data.len());
    header.checksum = header.compute_checksum(source_ip, dest_ip, data);

    let mut segment = Vec::with_capacity(UdpHeader::SIZE + data.len());
    segment.resize(UdpHeader::SIZE, 0);
    header.write_to(&mut segment);
    segment.extend_from_slice(data);
    Ok(segment)
}

/// Split an inbound segment into its header and payload. The payload is
/// clamped to the bytes actually present.
pub fn parse_segment(segment: &[u8]) -> Option<(UdpHeader, &[u8])> {
    let header = UdpHeader::try_from_u8_buffer(segment)?;
    let available = segment.len() - UdpHeader::SIZE;
    let length = header.payload_len().min(available);
    let payload = &segment[UdpHeader::SIZE..UdpHeader::SIZE + length];
    Some((header, payload))
}

#[cfg(test)]
mod tests {
    use super::{create_segment, parse_segment, UdpHeader};
    use crate::net::error::NetError;
    use crate::net::protocol::{
        checksum::IpChecksumHeader,
        ipv4::{IpProtocolType, Ipv4Address, Ipv4Header},
        packet::PacketHeader,
    };

    #[test]
    fn checksum_validates_for_any_port() {
        let src = Ipv4Address([10, 0, 2, 15]);
        let dst = Ipv4Address([10, 0, 2, 3]);
        for port in (0..=u16::MAX).step_by(257) {
            let segment = create_segment(src, port, dst, 53, b"odd").unwrap();
            let pseudo = IpChecksumHeader {
                source_ip: src,
                dest_ip: dst,
                protocol: IpProtocolType::Udp,
                segment_length: segment.len() as u16,
            };
            assert_eq!(pseudo.checksum_segment(&segment).sum(), 0xffff);
        }
    }

    #[test]
    fn parse_clamps_payload() {
        let segment = create_segment(
            Ipv4Address([1, 2, 3, 4]),
            68,
            Ipv4Address::BROADCAST,
            67,
            b"hello",
        )
        .unwrap();
        let (header, payload) = parse_segment(&segment).unwrap();
        assert_eq!((header.source_port, header.dest_port, header.length), (68, 67, 13));
        assert_eq!(payload, b"hello");
        // truncated on the wire
        let (_, payload) = parse_segment(&segment[..10]).unwrap();
        assert_eq!(payload, b"he");
        assert!(parse_segment(&segment[..7]).is_none());
    }

    #[test]
    fn oversized_payload_rejected() {
        let src = Ipv4Address([10, 0, 2, 15]);
        let largest = vec![0u8; Ipv4Header::MAX_PAYLOAD - UdpHeader::SIZE];
        let segment = create_segment(src, 1234, Ipv4Address::BROADCAST, 9, &largest).unwrap();
        assert_eq!(segment.len(), Ipv4Header::MAX_PAYLOAD);
        assert_eq!(&segment[4..6], &[0xff, 0xeb]);

        let too_big = vec![0u8; largest.len() + 1];
        assert_eq!(
            create_segment(src, 1234, Ipv4Address::BROADCAST, 9, &too_big),
            Err(NetError::PayloadTooLarge)
        );
    }
}
