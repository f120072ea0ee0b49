//! Character devices a [`RawSerial`](crate::RawSerial) drives.

use core::fmt::Debug;

/// A byte-at-a-time, non-blocking character device such as a UART.
///
/// Operations return [`nb::Error::WouldBlock`] while the hardware is busy;
/// callers that want to block spin on them with [`nb::block!`].
pub trait CharDevice {
    type Error: Debug;

    fn write_byte(&mut self, byte: u8) -> nb::Result<(), Self::Error>;

    fn read_byte(&mut self) -> nb::Result<u8, Self::Error>;

    /// Waits until written bytes have left the device.
    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(feature = "std")]
pub use self::io::{ReaderDevice, WriterDevice};

#[cfg(feature = "std")]
mod io {
    use std::io::{self, ErrorKind, Read, Write};

    use super::CharDevice;

    fn would_block(err: io::Error) -> nb::Error<io::Error> {
        match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::Interrupted => nb::Error::WouldBlock,
            _ => nb::Error::Other(err),
        }
    }

    /// Output-only device over any [`Write`] sink.
    #[derive(Debug)]
    pub struct WriterDevice<W: Write> {
        writer: W,
    }

    impl<W: Write> WriterDevice<W> {
        pub fn new(writer: W) -> Self {
            Self { writer }
        }

        pub fn into_inner(self) -> W {
            self.writer
        }
    }

    impl<W: Write> CharDevice for WriterDevice<W> {
        type Error = io::Error;

        fn write_byte(&mut self, byte: u8) -> nb::Result<(), io::Error> {
            match self.writer.write(&[byte]) {
                Ok(0) => Err(nb::Error::Other(ErrorKind::WriteZero.into())),
                Ok(_) => Ok(()),
                Err(err) => Err(would_block(err)),
            }
        }

        fn read_byte(&mut self) -> nb::Result<u8, io::Error> {
            Err(nb::Error::Other(ErrorKind::Unsupported.into()))
        }

        fn flush(&mut self) -> nb::Result<(), io::Error> {
            self.writer.flush().map_err(would_block)
        }
    }

    /// Input-only device over any [`Read`] source.
    #[derive(Debug)]
    pub struct ReaderDevice<R: Read> {
        reader: R,
    }

    impl<R: Read> ReaderDevice<R> {
        pub fn new(reader: R) -> Self {
            Self { reader }
        }
    }

    impl<R: Read> CharDevice for ReaderDevice<R> {
        type Error = io::Error;

        fn write_byte(&mut self, _byte: u8) -> nb::Result<(), io::Error> {
            Err(nb::Error::Other(ErrorKind::Unsupported.into()))
        }

        fn read_byte(&mut self) -> nb::Result<u8, io::Error> {
            let mut byte = [0u8; 1];
            match self.reader.read(&mut byte) {
                Ok(0) => Err(nb::Error::Other(ErrorKind::UnexpectedEof.into())),
                Ok(_) => Ok(byte[0]),
                Err(err) => Err(would_block(err)),
            }
        }
    }
}
