//! Blocking serial port over a [`CharDevice`].

use alloc::string::String;
use core::fmt::{self, Write};

use crate::device::CharDevice;
use crate::error::DiagError;

/// Formatted output up to this many bytes is built on the stack; longer
/// output goes through a heap buffer.
pub const STRING_STACK_LIMIT: usize = 120;

/// Blocking byte and string I/O on a character device.
///
/// There is no internal locking. Sharing a port between threads requires
/// external synchronization, for example a `spin::Mutex` as in
/// [`SerialLogger`](crate::SerialLogger).
#[derive(Debug)]
pub struct RawSerial<D> {
    device: D,
}

impl<D: CharDevice> RawSerial<D> {
    pub const fn new(device: D) -> Self {
        Self { device }
    }

    /// Writes one byte, waiting while the device is busy.
    pub fn putc(&mut self, byte: u8) -> Result<(), D::Error> {
        nb::block!(self.device.write_byte(byte))
    }

    /// Reads one byte, waiting until one arrives.
    pub fn getc(&mut self) -> Result<u8, D::Error> {
        nb::block!(self.device.read_byte())
    }

    /// Writes `s` without a trailing newline.
    pub fn puts(&mut self, s: &str) -> Result<(), D::Error> {
        s.bytes().try_for_each(|byte| self.putc(byte))
    }

    pub fn flush(&mut self) -> Result<(), D::Error> {
        nb::block!(self.device.flush())
    }

    /// Formats `args` and writes the result. Returns the number of bytes
    /// written.
    pub fn printf(&mut self, args: fmt::Arguments<'_>) -> Result<usize, DiagError> {
        let mut short: heapless::String<STRING_STACK_LIMIT> = heapless::String::new();
        let written = if short.write_fmt(args).is_ok() {
            self.puts(&short).map(|()| short.len())
        } else {
            let mut long = String::new();
            long.write_fmt(args).map_err(|_| DiagError::Format)?;
            self.puts(&long).map(|()| long.len())
        };
        // Must not log: `SerialLogger` writes through this call.
        written.map_err(|_| DiagError::Device)
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_inner(self) -> D {
        self.device
    }
}

impl<D: CharDevice> Write for RawSerial<D> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.puts(s).map_err(|_| fmt::Error)
    }
}

/// Formatted print to a [`RawSerial`].
///
/// ```ignore
/// rtos_diag::printf!(serial, "tick {}\r\n", count)?;
/// ```
#[macro_export]
macro_rules! printf {
    ($serial:expr, $($arg:tt)*) => {
        $serial.printf(::core::format_args!($($arg)*))
    };
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloc::collections::VecDeque;
    use alloc::vec::Vec;

    /// In-memory device that reports busy every other call.
    #[derive(Debug, Default)]
    pub(crate) struct MemoryDevice {
        pub(crate) output: Vec<u8>,
        pub(crate) input: VecDeque<u8>,
        busy: bool,
    }

    impl CharDevice for MemoryDevice {
        type Error = ();

        fn write_byte(&mut self, byte: u8) -> nb::Result<(), ()> {
            self.busy = !self.busy;
            if self.busy {
                return Err(nb::Error::WouldBlock);
            }
            self.output.push(byte);
            Ok(())
        }

        fn read_byte(&mut self) -> nb::Result<u8, ()> {
            self.input.pop_front().ok_or(nb::Error::Other(()))
        }
    }

    #[test]
    fn puts_writes_every_byte() {
        let mut serial = RawSerial::new(MemoryDevice::default());
        serial.puts("hello").unwrap();
        serial.putc(b'!').unwrap();
        assert_eq!(serial.into_inner().output, b"hello!");
    }

    #[test]
    fn getc_reads_in_order() {
        let mut device = MemoryDevice::default();
        device.input.extend(b"ok");
        let mut serial = RawSerial::new(device);
        assert_eq!(serial.getc(), Ok(b'o'));
        assert_eq!(serial.getc(), Ok(b'k'));
        assert_eq!(serial.getc(), Err(()));
    }

    #[test]
    fn printf_short_and_long_output() {
        let mut serial = RawSerial::new(MemoryDevice::default());
        let len = printf!(serial, "{}-{:04}", "id", 7).unwrap();
        assert_eq!(len, 7);
        assert_eq!(serial.device_mut().output, b"id-0007");

        serial.device_mut().output.clear();
        let long = "x".repeat(STRING_STACK_LIMIT * 2);
        let len = serial.printf(format_args!("<{long}>")).unwrap();
        assert_eq!(len, STRING_STACK_LIMIT * 2 + 2);
        assert_eq!(serial.device_mut().output.len(), len);
    }

    #[test]
    fn fmt_write_goes_to_device() {
        let mut serial = RawSerial::new(MemoryDevice::default());
        write!(serial, "{:x}", 0xBEEFu32).unwrap();
        assert_eq!(serial.into_inner().output, b"beef");
    }
}
