//! # rtos-diag - Serial Diagnostics
//!
//! A minimal diagnostics path for systems built on the `rtos` thread layer:
//!
//! - [`CharDevice`] - non-blocking byte device (UART and the like)
//! - [`RawSerial`] - blocking `putc`/`getc`/`puts`/`printf` on top of it
//! - [`SerialLogger`] - a `log` backend writing one line per record
//!
//! With the `std` feature, [`WriterDevice`] and [`ReaderDevice`] adapt
//! `std::io` streams so the same code runs on a development machine.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod device;
pub mod error;
pub mod logger;
pub mod serial;

pub use device::CharDevice;
#[cfg(feature = "std")]
pub use device::{ReaderDevice, WriterDevice};
pub use error::DiagError;
pub use logger::{init, SerialLogger};
pub use serial::{RawSerial, STRING_STACK_LIMIT};
