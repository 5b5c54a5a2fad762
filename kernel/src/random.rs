//! Random number generation
//!
//! The network stack needs cheap, non-cryptographic randomness for ephemeral
//! ports, initial sequence numbers, and the TLS client random. A 32-bit
//! xorshift generator is plenty for that.

const DEFAULT_SEED: u32 = 0xDEADBEEF;

#[derive(Clone, Debug)]
pub struct Xorshift32 {
    state: u32,
}

impl Xorshift32 {
    pub const fn new(seed: u32) -> Self {
        Self {
            state: Self::sanitize(seed),
        }
    }

    /// Xorshift gets stuck at zero forever, so a zero seed is replaced
    const fn sanitize(seed: u32) -> u32 {
        if seed == 0 {
            DEFAULT_SEED
        } else {
            seed
        }
    }

    pub fn seed(&mut self, seed: u32) {
        self.state = Self::sanitize(seed);
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    pub fn fill_bytes(&mut self, bytes: &mut [u8]) {
        for chunk in bytes.chunks_mut(4) {
            let value = self.next_u32().to_be_bytes();
            chunk.copy_from_slice(&value[..chunk.len()]);
        }
    }
}

impl Default for Xorshift32 {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}
