//! # rtos-port - Kernel Primitive Interface
//!
//! The thread layer in the `rtos` crate never talks to a scheduler directly.
//! Everything it needs from the kernel goes through the [`KernelPort`] trait:
//!
//! - creating, terminating and reclaiming a schedulable unit
//! - reading and writing its priority, state and stack usage
//! - per-unit thread flags (set from any context, waited on by the owner)
//! - counting semaphores and owner-tracked mutexes
//! - the identity of the currently executing unit
//!
//! Handles returned by the kernel are opaque tokens ([`ThreadId`],
//! [`SemaphoreId`], [`MutexId`]). Callers store and pass them back but never
//! interpret their bits.
//!
//! ## Module Overview
//!
//! - [`types`] - Tokens, priorities, timeouts and kernel states
//! - [`control`] - Control block, stack region and thread attributes
//! - [`port`] - The [`KernelPort`] trait and process-wide registration
//! - [`hooks`] - Idle and terminate hook slots
//! - [`hosted`] - Reference kernel on top of OS threads (feature `std`)

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod control;
pub mod error;
pub mod hooks;
pub mod port;
pub mod types;

#[cfg(feature = "std")]
pub mod hosted;

pub use control::{ControlBlock, EntryArg, StackRegion, StackUsage, ThreadAttr, ThreadEntry};
pub use error::{KernelError, KernelResult};
pub use port::{get, install, KernelPort};
pub use types::{
    FlagsOptions, KernelState, MutexId, Priority, SemaphoreId, ThreadId, Timeout, WaitReason,
    FLAGS_ANY, FLAGS_RESERVED,
};
