use alloc::vec;
use alloc::vec::Vec;

/// Every wire header knows its encoded size and how to move itself in and out
/// of a byte buffer. Multi-byte fields are always converted explicitly, so the
/// in-memory layout of the struct never matters.
pub trait PacketHeader: Sized {
    /// Size of the encoded header in bytes
    const SIZE: usize;

    fn get_size() -> usize {
        Self::SIZE
    }

    /// Encode the header into the first `SIZE` bytes of `buffer`
    fn write_to(&self, buffer: &mut [u8]);

    /// Decode a header from the start of `buffer`, if it is long enough and
    /// well-formed
    fn try_from_u8_buffer(buffer: &[u8]) -> Option<Self>;

    /// Copies the header to the end of the provided u8 slice, returning the
    /// offset where it starts. Packets are assembled back to front this way.
    fn copy_to_u8_buffer(&self, buffer: &mut [u8]) -> usize {
        let location = buffer.len() - Self::SIZE;
        self.write_to(&mut buffer[location..]);
        location
    }

    fn to_vec(&self) -> Vec<u8> {
        let mut buffer = vec![0; Self::SIZE];
        self.write_to(&mut buffer);
        buffer
    }
}

pub fn read_u16_be(buffer: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buffer[offset], buffer[offset + 1]])
}

pub fn read_u32_be(buffer: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buffer[offset],
        buffer[offset + 1],
        buffer[offset + 2],
        buffer[offset + 3],
    ])
}

pub fn write_u16_be(buffer: &mut [u8], offset: usize, value: u16) {
    buffer[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

pub fn write_u32_be(buffer: &mut [u8], offset: usize, value: u32) {
    buffer[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}
