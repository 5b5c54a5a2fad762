//! The storage drivers never allocate memory on their own. Anything a device
//! reads or writes by bus-master DMA comes from a `DmaAllocator` supplied by
//! the kernel, and is handed to hardware by its physical address.

pub mod address;
pub mod dma;
