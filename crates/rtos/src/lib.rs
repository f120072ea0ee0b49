//! # rtos - Thread Lifecycle over a Preemptive Kernel
//!
//! Typed handles for creating, naming, prioritizing, signaling and joining
//! kernel threads. Raw kernel handles, stack memory and control blocks stay
//! hidden behind [`Thread`]; everything the kernel has to do is requested
//! through the [`rtos_port::KernelPort`] installed for the process.
//!
//! ## Architecture
//!
//! A [`Thread`] is created inactive from a [`ThreadConfig`]. Starting it with
//! a [`Task`] obtains a stack (caller-supplied or from a [`StackAllocator`]),
//! creates the kernel unit and leaves the rest to the scheduler. Joining or
//! dropping the handle reclaims the unit and frees the stack exactly once.
//!
//! Thread flags (`signal_*`) are sticky until consumed, so a flag set before
//! the target starts waiting is never lost.
//!
//! ## Module Overview
//!
//! - [`thread`] - Thread state machine and the static calling-thread API
//! - [`task`] - The unit of work a thread runs
//! - [`config`] - Construction parameters with a builder
//! - [`primitives`] - Semaphore and mutex over kernel primitives
//! - [`stack`] - Stack allocation contract
//! - [`error`] - Error taxonomy and status codes

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod primitives;
pub mod stack;
pub mod task;
pub mod thread;

pub use config::{ThreadConfig, ThreadConfigBuilder, DEFAULT_STACK_SIZE};
pub use error::{status_of, Status, ThreadError, ThreadResult};
pub use primitives::{Mutex, MutexGuard, Semaphore};
pub use rtos_port::{Priority, ThreadId, Timeout};
pub use stack::{HeapStackAllocator, StackAllocator, HEAP};
pub use task::{Task, TaskKind};
pub use thread::{SignalEvent, Thread, ThreadState};
