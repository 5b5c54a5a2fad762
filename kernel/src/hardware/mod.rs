pub mod pci;
pub mod serial;
