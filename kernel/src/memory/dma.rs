use core::ptr::NonNull;

use super::address::PhysicalAddress;

/// Source of memory that devices can reach by bus-master DMA.
///
/// Regions must be physically contiguous for their whole length, zeroed, and
/// start at a physical address that is a multiple of the requested alignment.
/// They stay valid for as long as the region object lives; the storage
/// drivers keep theirs for the lifetime of the kernel.
pub trait DmaAllocator: Send + Sync {
    fn allocate(&self, size: usize, align: usize) -> Option<DmaRegion>;

    /// Translate a kernel-virtual pointer into the physical address a device
    /// must be given. Returns `None` if the memory is not DMA-addressable.
    fn virt_to_phys(&self, addr: *const u8) -> Option<PhysicalAddress>;
}

/// An owned block of DMA memory. Hardware structures are written into it
/// field by field in little-endian order, never by casting packed structs.
pub struct DmaRegion {
    virt: NonNull<u8>,
    phys: PhysicalAddress,
    len: usize,
}

// The region is a plain block of memory; all access goes through &self/&mut self
unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

impl DmaRegion {
    /// # Safety
    ///
    /// `virt` must point to `len` bytes that remain mapped, are not referenced
    /// anywhere else, and are backed by physical memory starting at `phys`.
    pub unsafe fn from_raw_parts(virt: *mut u8, phys: PhysicalAddress, len: usize) -> Option<Self> {
        NonNull::new(virt).map(|virt| Self { virt, phys, len })
    }

    pub fn phys_addr(&self) -> PhysicalAddress {
        self.phys
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.virt.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.virt.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.virt.as_ptr(), self.len) }
    }

    pub fn zero(&mut self) {
        self.as_mut_slice().fill(0);
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        let bytes = &self.as_slice()[offset..offset + 2];
        u16::from_le_bytes([bytes[0], bytes[1]])
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        let bytes = &self.as_slice()[offset..offset + 4];
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.as_mut_slice()[offset] = value;
    }

    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.as_mut_slice()[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.as_mut_slice()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

impl core::fmt::Debug for DmaRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DmaRegion")
            .field("phys", &self.phys)
            .field("len", &self.len)
            .finish()
    }
}
