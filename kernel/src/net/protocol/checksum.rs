//! IPV4, UDP, ICMP, and TCP headers all have checksum fields that are computed
//! in the same manner. The relevant data is split into 16-bit big-endian
//! segments which are summed, with the carry being folded back in. The sum is
//! inverted, revealing the checksum.
//! To compute a running checksum, create a new Checksum struct and add all the
//! fields. When everything has been added, call `.compute()` to return the
//! 16-bit checksum number.
//!
//! Because the ones'-complement sum is independent of byte order as long as
//! every word is treated the same way, a receiver can validate a packet by
//! summing it with the checksum field in place: the folded sum of an intact
//! packet is always 0xffff.

use super::ipv4::{IpProtocolType, Ipv4Address};

/// Represents a running computation of a network header checksum
#[derive(Clone, Copy, Default)]
pub struct Checksum(u32);

impl Checksum {
    pub fn new() -> Self {
        Self(0)
    }

    /// Add another 16-bit field to the checksum total
    pub fn add_u16(&mut self, value: u16) {
        self.0 += value as u32;
        if self.0 > 0xffff {
            self.0 = (self.0 & 0xffff) + (self.0 >> 16);
        }
    }

    pub fn add_u32(&mut self, value: u32) {
        self.add_u16((value >> 16) as u16);
        self.add_u16(value as u16);
    }

    /// Add a run of bytes as big-endian words. An odd trailing byte is padded
    /// with a zero.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        let mut chunks = bytes.chunks_exact(2);
        for pair in &mut chunks {
            self.add_u16(u16::from_be_bytes([pair[0], pair[1]]));
        }
        if let [last] = chunks.remainder() {
            self.add_u16(u16::from_be_bytes([*last, 0]));
        }
    }

    /// The folded ones'-complement sum, before inversion
    pub fn sum(&self) -> u16 {
        let mut running_sum = self.0;
        while running_sum > 0xffff {
            running_sum = (running_sum & 0xffff) + (running_sum >> 16);
        }
        running_sum as u16
    }

    /// Compute the final checksum value
    pub fn compute(&self) -> u16 {
        !self.sum()
    }
}

/// Checksum of a contiguous byte range
pub fn checksum_bytes(bytes: &[u8]) -> u16 {
    let mut checksum = Checksum::new();
    checksum.add_bytes(bytes);
    checksum.compute()
}

/// A byte range with its checksum field filled in sums to 0xffff
pub fn is_valid(bytes: &[u8]) -> bool {
    let mut checksum = Checksum::new();
    checksum.add_bytes(bytes);
    checksum.sum() == 0xffff
}

/// UDP and TCP packets build their checksum with a pseudo-IPV4 header formed
/// from a subset of fields: both addresses, a zero byte, the protocol number,
/// and the length of the transport segment.
pub struct IpChecksumHeader {
    pub source_ip: Ipv4Address,
    pub dest_ip: Ipv4Address,
    pub protocol: IpProtocolType,
    pub segment_length: u16,
}

impl IpChecksumHeader {
    pub fn add_to(&self, checksum: &mut Checksum) {
        checksum.add_bytes(&self.source_ip.0);
        checksum.add_bytes(&self.dest_ip.0);
        checksum.add_u16(self.protocol as u16);
        checksum.add_u16(self.segment_length);
    }

    /// Checksum over the pseudo-header followed by the whole segment. The
    /// segment's own checksum field must be zero when computing, or in place
    /// when validating.
    pub fn checksum_segment(&self, segment: &[u8]) -> Checksum {
        let mut checksum = Checksum::new();
        self.add_to(&mut checksum);
        checksum.add_bytes(segment);
        checksum
    }
}

#[cfg(test)]
mod tests {
    use super::{checksum_bytes, is_valid, Checksum};

    #[test]
    fn rfc1071_example() {
        // Example from RFC 1071 section 3
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        let mut checksum = Checksum::new();
        checksum.add_bytes(&data);
        assert_eq!(checksum.sum(), 0xddf2);
        assert_eq!(checksum.compute(), !0xddf2);
    }

    #[test]
    fn known_ip_header() {
        // Wikipedia's IPv4 header checksum example
        let mut header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        let value = checksum_bytes(&header);
        assert_eq!(value, 0xb861);
        header[10..12].copy_from_slice(&value.to_be_bytes());
        assert!(is_valid(&header));
        header[8] = 0x3f;
        assert!(!is_valid(&header));
    }

    #[test]
    fn odd_length_is_padded() {
        let mut odd = Checksum::new();
        odd.add_bytes(&[0x12, 0x34, 0x56]);
        let mut even = Checksum::new();
        even.add_bytes(&[0x12, 0x34, 0x56, 0x00]);
        assert_eq!(odd.compute(), even.compute());
    }

    #[test]
    fn carries_fold_repeatedly() {
        let mut checksum = Checksum::new();
        for _ in 0..100_000 {
            checksum.add_u16(0xffff);
        }
        assert_eq!(checksum.sum(), 0xffff);
        checksum.add_u32(0x0001_0001);
        assert_eq!(checksum.sum(), 0x0002);
    }
}
