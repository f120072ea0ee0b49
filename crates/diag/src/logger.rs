//! `log` backend that writes records to a serial port.

use log::{LevelFilter, Log, Metadata, Record};

use crate::device::CharDevice;
use crate::error::DiagError;
use crate::serial::RawSerial;

/// Writes each log record as one `[LEVEL target] message` line.
pub struct SerialLogger<D> {
    serial: spin::Mutex<RawSerial<D>>,
    level: LevelFilter,
}

impl<D: CharDevice> SerialLogger<D> {
    pub const fn new(serial: RawSerial<D>, level: LevelFilter) -> Self {
        Self {
            serial: spin::Mutex::new(serial),
            level,
        }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// Runs `f` with exclusive access to the underlying port.
    pub fn with_serial<R>(&self, f: impl FnOnce(&mut RawSerial<D>) -> R) -> R {
        f(&mut self.serial.lock())
    }
}

impl<D: CharDevice + Send> Log for SerialLogger<D> {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut serial = self.serial.lock();
        // Nowhere to report a failing log device.
        let _ = serial.printf(format_args!(
            "[{} {}] {}\r\n",
            record.level(),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {
        let _ = self.serial.lock().flush();
    }
}

/// Installs `logger` as the process-wide `log` backend.
pub fn init<D: CharDevice + Send>(logger: &'static SerialLogger<D>) -> Result<(), DiagError> {
    log::set_logger(logger).map_err(|_| DiagError::LoggerInstalled)?;
    log::set_max_level(logger.level);
    Ok(())
}
