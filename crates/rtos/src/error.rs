//! Error taxonomy and status codes of the thread layer.

use rtos_port::KernelError;
use thiserror::Error;

/// Closed set of status codes callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    Ok,
    Error,
    /// Resource unavailable or timed out.
    Resource,
    Parameter,
    InvalidState,
}

/// Failure of a thread or synchronization operation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThreadError {
    #[error("thread already started")]
    AlreadyStarted,
    #[error("out of memory for thread stack")]
    OutOfMemory,
    #[error("kernel rejected the request: {0}")]
    KernelRejected(KernelError),
    #[error("operation not valid in the current thread state")]
    InvalidState,
    #[error("operation timed out")]
    Timeout,
    #[error("invalid parameter")]
    InvalidParameter,
}

impl ThreadError {
    pub fn status(self) -> Status {
        match self {
            Self::AlreadyStarted | Self::InvalidState => Status::InvalidState,
            Self::OutOfMemory | Self::Timeout => Status::Resource,
            Self::InvalidParameter => Status::Parameter,
            Self::KernelRejected(KernelError::Resource | KernelError::NoMemory) => Status::Resource,
            Self::KernelRejected(KernelError::Parameter) => Status::Parameter,
            Self::KernelRejected(_) => Status::Error,
        }
    }
}

impl From<KernelError> for ThreadError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Timeout | KernelError::Resource => Self::Timeout,
            KernelError::Parameter => Self::InvalidParameter,
            KernelError::NoMemory => Self::OutOfMemory,
            KernelError::Isr => Self::InvalidState,
            KernelError::Error => Self::KernelRejected(err),
        }
    }
}

/// Maps a result onto its status code.
pub fn status_of<T>(result: &Result<T, ThreadError>) -> Status {
    match result {
        Ok(_) => Status::Ok,
        Err(err) => err.status(),
    }
}

pub type ThreadResult<T> = Result<T, ThreadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_errors_map_onto_taxonomy() {
        assert_eq!(ThreadError::from(KernelError::Timeout), ThreadError::Timeout);
        assert_eq!(ThreadError::from(KernelError::Isr), ThreadError::InvalidState);
        assert_eq!(ThreadError::from(KernelError::Parameter), ThreadError::InvalidParameter);
        assert_eq!(
            ThreadError::from(KernelError::Error),
            ThreadError::KernelRejected(KernelError::Error)
        );
    }

    #[test]
    fn status_codes() {
        assert_eq!(ThreadError::AlreadyStarted.status(), Status::InvalidState);
        assert_eq!(ThreadError::Timeout.status(), Status::Resource);
        assert_eq!(
            ThreadError::KernelRejected(KernelError::Resource).status(),
            Status::Resource
        );
        assert_eq!(status_of::<()>(&Ok(())), Status::Ok);
        assert_eq!(status_of::<()>(&Err(ThreadError::InvalidParameter)), Status::Parameter);
    }
}
