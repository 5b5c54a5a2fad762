use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageError {
    /// The port was never brought up, or has no device behind it
    PortNotInitialized,
    /// Every command slot on the port is busy
    NoFreeSlot,
    CommandFailed,
    /// The device did not finish a command before its deadline
    Timeout,
    /// The task file reported an error after completion
    DeviceError,
    /// A buffer has no physical address the device could reach
    NotDmaAddressable,
    OutOfDmaMemory,
    IdentifyFailed,
    RegistryFull,
    QueueFull,
    /// The request starts or ends beyond the last sector, or asks for more
    /// sectors than one command can move
    OutOfRange,
    /// Sector 0 is protected against writes
    WriteProtected,
    NoDevice,
    /// The buffer is smaller than the requested sector count
    BufferSize,
}

impl StorageError {
    /// The negative status the legacy block API returned for this failure
    pub fn status_code(&self) -> i32 {
        match self {
            Self::PortNotInitialized
            | Self::NoDevice
            | Self::NotDmaAddressable
            | Self::OutOfRange
            | Self::BufferSize
            | Self::WriteProtected
            | Self::RegistryFull
            | Self::QueueFull => -1,
            Self::NoFreeSlot | Self::IdentifyFailed | Self::OutOfDmaMemory => -2,
            Self::CommandFailed | Self::Timeout | Self::DeviceError => -3,
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::PortNotInitialized => "port not initialized",
            Self::NoFreeSlot => "no free command slot",
            Self::CommandFailed => "command failed",
            Self::Timeout => "command timed out",
            Self::DeviceError => "device reported an error",
            Self::NotDmaAddressable => "buffer is not DMA addressable",
            Self::OutOfDmaMemory => "out of DMA memory",
            Self::IdentifyFailed => "IDENTIFY failed",
            Self::RegistryFull => "block device registry is full",
            Self::QueueFull => "I/O queue is full",
            Self::OutOfRange => "sector out of range",
            Self::WriteProtected => "sector is write protected",
            Self::NoDevice => "no device",
            Self::BufferSize => "buffer too small for transfer",
        };
        f.write_str(message)
    }
}
