/// The x86 processor family has two address spaces: memory and IO.
/// IO addresses are called Ports, and are used to interface directly with
/// low-level hardware such as the PCI configuration mechanism, the legacy ATA
/// channels, and the serial UART.
///
/// Drivers never touch the instructions directly; they go through `PortIo`
/// so that the same driver code can be exercised against a simulated bus.
pub trait PortIo: Send + Sync {
    fn read_u8(&self, port: u16) -> u8;
    fn write_u8(&self, port: u16, value: u8);
    fn read_u16(&self, port: u16) -> u16;
    fn write_u16(&self, port: u16, value: u16);
    fn read_u32(&self, port: u16) -> u32;
    fn write_u32(&self, port: u16, value: u32);
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use self::x86::{Port, X86PortIo};

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod x86 {
    use core::arch::asm;

    use super::PortIo;

    #[derive(Copy, Clone)]
    #[repr(transparent)]
    pub struct Port(u16);

    impl Port {
        pub const fn new(number: u16) -> Self {
            Self(number)
        }

        pub fn write_u8(&self, value: u8) {
            unsafe {
                // writing to a variable port is only possible through the DX
                // and AL registers
                asm!(
                    "out dx, al",
                    in("dx") self.0,
                    in("al") value,
                    options(nomem, nostack, preserves_flags),
                );
            }
        }

        pub fn read_u8(&self) -> u8 {
            let value: u8;
            unsafe {
                asm!(
                    "in al, dx",
                    out("al") value,
                    in("dx") self.0,
                    options(nomem, nostack, preserves_flags),
                );
            }
            value
        }

        pub fn write_u16(&self, value: u16) {
            unsafe {
                asm!(
                    "out dx, ax",
                    in("dx") self.0,
                    in("ax") value,
                    options(nomem, nostack, preserves_flags),
                );
            }
        }

        pub fn read_u16(&self) -> u16 {
            let value: u16;
            unsafe {
                asm!(
                    "in ax, dx",
                    out("ax") value,
                    in("dx") self.0,
                    options(nomem, nostack, preserves_flags),
                );
            }
            value
        }

        pub fn write_u32(&self, value: u32) {
            unsafe {
                asm!(
                    "out dx, eax",
                    in("dx") self.0,
                    in("eax") value,
                    options(nomem, nostack, preserves_flags),
                );
            }
        }

        pub fn read_u32(&self) -> u32 {
            let value: u32;
            unsafe {
                asm!(
                    "in eax, dx",
                    out("eax") value,
                    in("dx") self.0,
                    options(nomem, nostack, preserves_flags),
                );
            }
            value
        }
    }

    /// Port I/O straight to the CPU's IO address space
    #[derive(Copy, Clone, Default)]
    pub struct X86PortIo;

    impl PortIo for X86PortIo {
        fn read_u8(&self, port: u16) -> u8 {
            Port::new(port).read_u8()
        }

        fn write_u8(&self, port: u16, value: u8) {
            Port::new(port).write_u8(value)
        }

        fn read_u16(&self, port: u16) -> u16 {
            Port::new(port).read_u16()
        }

        fn write_u16(&self, port: u16, value: u16) {
            Port::new(port).write_u16(value)
        }

        fn read_u32(&self, port: u16) -> u32 {
            Port::new(port).read_u32()
        }

        fn write_u32(&self, port: u16, value: u32) {
            Port::new(port).write_u32(value)
        }
    }
}
