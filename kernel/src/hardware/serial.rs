//! 16550 UART driver, used as the sink for kernel log output

use crate::arch::port::PortIo;

pub const COM1: u16 = 0x3f8;

const STATUS_TRANSMIT_BUFFER_EMPTY: u8 = 1 << 5;
const STATUS_DATA_READY: u8 = 1;

/// Register offsets from the port base
const DATA: u16 = 0;
const INTERRUPT_ENABLE: u16 = 1;
const FIFO_CONTROL: u16 = 2;
const LINE_CONTROL: u16 = 3;
const MODEM_CONTROL: u16 = 4;
const LINE_STATUS: u16 = 5;

pub struct SerialPort<'io> {
    io: &'io dyn PortIo,
    base: u16,
}

impl<'io> SerialPort<'io> {
    pub fn new(io: &'io dyn PortIo, base: u16) -> Self {
        Self { io, base }
    }

    pub fn init(&self) {
        // disable interrupts; output is polled
        self.io.write_u8(self.base + INTERRUPT_ENABLE, 0);

        // Enable divisor latch access, allowing the baud rate to be changed
        self.io.write_u8(self.base + LINE_CONTROL, 0x80);
        // With DLAB enabled, the data register accesses the low 8 bits of the
        // internal divisor, and the interrupt register accesses the high bits
        self.io.write_u8(self.base + DATA, 0x03); // 115200 / 3 = 38,400 baud
        self.io.write_u8(self.base + INTERRUPT_ENABLE, 0);

        // 8n1: 8 bits, no parity, 1 stop bit
        self.io.write_u8(self.base + LINE_CONTROL, 0x03);
        // Enable and clear the FIFOs, with the largest trigger level
        self.io.write_u8(self.base + FIFO_CONTROL, 0xc7);
        self.io.write_u8(self.base + MODEM_CONTROL, 0x08);
    }

    pub fn is_transmitting(&self) -> bool {
        (self.io.read_u8(self.base + LINE_STATUS) & STATUS_TRANSMIT_BUFFER_EMPTY) == 0
    }

    pub fn send_byte(&self, byte: u8) {
        while self.is_transmitting() {}
        self.io.write_u8(self.base + DATA, byte);
    }

    pub fn read_byte(&self) -> Option<u8> {
        if self.io.read_u8(self.base + LINE_STATUS) & STATUS_DATA_READY != 0 {
            Some(self.io.read_u8(self.base + DATA))
        } else {
            None
        }
    }
}

impl core::fmt::Write for SerialPort<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            self.send_byte(byte);
        }
        Ok(())
    }
}
