//! Status codes reported by kernel primitives.

use thiserror::Error;

/// Failure reported by a [`KernelPort`](crate::KernelPort) operation.
///
/// The variants mirror the small set of status codes a CMSIS-style kernel
/// returns. Callers above the port translate them into their own taxonomy.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KernelError {
    /// Unspecified failure (also used when no port is installed).
    #[error("kernel error")]
    Error,
    /// A wait with a non-zero timeout expired.
    #[error("operation timed out")]
    Timeout,
    /// The resource is not available right now.
    #[error("resource not available")]
    Resource,
    /// A parameter was rejected.
    #[error("invalid parameter")]
    Parameter,
    /// The kernel ran out of memory for its own objects.
    #[error("kernel out of memory")]
    NoMemory,
    /// The operation is not allowed from interrupt context.
    #[error("not allowed in interrupt context")]
    Isr,
}

pub type KernelResult<T> = Result<T, KernelError>;
