use thiserror::Error;

/// Failure while emitting diagnostics.
#[derive(Error, Debug)]
pub enum DiagError {
    #[error("character device failed")]
    Device,
    #[error("formatting failed")]
    Format,
    #[error("a logger is already installed")]
    LoggerInstalled,
    #[cfg(feature = "std")]
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
