//! Shared setup for the demo binaries.

use std::io::{self, Stdout};

use log::LevelFilter;
use rtos_diag::{DiagError, RawSerial, SerialLogger, WriterDevice};
use rtos_port::hosted::{self, HostedKernel};

/// Routes `log` output through a serial port on stdout.
pub fn init_logging(level: LevelFilter) -> Result<(), DiagError> {
    let serial = RawSerial::new(WriterDevice::new(io::stdout()));
    let logger: &'static SerialLogger<WriterDevice<Stdout>> =
        Box::leak(Box::new(SerialLogger::new(serial, level)));
    rtos_diag::init(logger)
}

/// Brings up the hosted kernel and logging.
pub fn boot(level: LevelFilter) -> &'static HostedKernel {
    if let Err(err) = init_logging(level) {
        eprintln!("logging disabled: {err}");
    }
    match hosted::init() {
        Ok(kernel) => kernel,
        Err(err) => {
            eprintln!("failed to start the hosted kernel: {err}");
            std::process::exit(1);
        }
    }
}
