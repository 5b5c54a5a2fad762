use core::ops::Add;

/// A 32-bit physical address, as programmed into device registers
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct PhysicalAddress(u32);

impl PhysicalAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn is_aligned(&self, align: u32) -> bool {
        align != 0 && self.0 % align == 0
    }
}

impl From<PhysicalAddress> for u32 {
    fn from(addr: PhysicalAddress) -> Self {
        addr.as_u32()
    }
}

impl From<u32> for PhysicalAddress {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Add<u32> for PhysicalAddress {
    type Output = PhysicalAddress;

    fn add(self, rhs: u32) -> Self::Output {
        Self::new(self.0.wrapping_add(rhs))
    }
}

impl core::fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PhysicalAddress({:#010X})", self.0)
    }
}

impl core::fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#010X}", self.0)
    }
}
