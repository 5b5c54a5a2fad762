//! Storage and networking core of the Chrysalis kernel.
//!
//! The crate is freestanding: it depends only on `core` and `alloc`, and
//! reaches hardware through a handful of small traits (port I/O, MMIO
//! register blocks, DMA memory, a millisecond clock, NIC drivers). The kernel
//! proper supplies the real implementations; the host test suite supplies
//! mocks.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod executor;
pub mod hardware;
pub mod log;
pub mod memory;
pub mod net;
pub mod random;
pub mod storage;
pub mod time;
