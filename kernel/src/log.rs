//! Kernel logging.
//!
//! Subsystems log through a `TaggedLogger`, which forwards to the `log`
//! facade with the subsystem tag as the record target. `init` installs
//! `KernelLogger` as the facade backend; it renders each record as a colored
//! tag followed by the message and hands the line to a sink, normally the
//! serial port.

use core::fmt;

use ::log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

pub type LogSink = fn(fmt::Arguments);

pub struct TaggedLogger {
    tag: &'static str,
}

impl TaggedLogger {
    pub const fn new(tag: &'static str) -> Self {
        TaggedLogger { tag }
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    pub fn log(&self, args: fmt::Arguments) {
        ::log::info!(target: self.tag, "{}", args);
    }

    pub fn warn(&self, args: fmt::Arguments) {
        ::log::warn!(target: self.tag, "{}", args);
    }

    pub fn error(&self, args: fmt::Arguments) {
        ::log::error!(target: self.tag, "{}", args);
    }

    pub fn debug(&self, args: fmt::Arguments) {
        ::log::debug!(target: self.tag, "{}", args);
    }
}

pub struct KernelLogger {
    sink: Mutex<Option<LogSink>>,
}

impl KernelLogger {
    pub const fn new() -> Self {
        Self {
            sink: Mutex::new(None),
        }
    }

    pub fn set_sink(&self, sink: LogSink) {
        *self.sink.lock() = Some(sink);
    }

    fn color(level: Level) -> u8 {
        match level {
            Level::Error => 31,
            Level::Warn => 33,
            Level::Info => 32,
            Level::Debug => 36,
            Level::Trace => 90,
        }
    }
}

impl Default for KernelLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= ::log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // copy the sink out so a sink that logs cannot deadlock
        let sink = *self.sink.lock();
        if let Some(sink) = sink {
            sink(format_args!(
                "\x1b[{}m{:<8}\x1b[0m: {}\n",
                Self::color(record.level()),
                record.target(),
                record.args(),
            ));
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger::new();

/// Install the kernel logger as the global `log` backend
pub fn init(sink: LogSink, level: LevelFilter) -> Result<(), SetLoggerError> {
    LOGGER.set_sink(sink);
    ::log::set_logger(&LOGGER)?;
    ::log::set_max_level(level);
    Ok(())
}

/// Change the level after boot, e.g. once the config file has been read
pub fn set_level(level: LevelFilter) {
    ::log::set_max_level(level);
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn serial_sink(args: fmt::Arguments) {
    use core::fmt::Write;

    use crate::arch::port::X86PortIo;
    use crate::hardware::serial::{SerialPort, COM1};

    let io = X86PortIo;
    let mut serial = SerialPort::new(&io, COM1);
    let _ = serial.write_fmt(args);
}
