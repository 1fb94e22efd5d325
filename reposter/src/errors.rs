use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Failed to connect to backend: {0}")]
    ConnectError(String),

    #[error("Session transport error: {0}")]
    Transport(String),

    #[error("Backend is no longer running: {0}")]
    BackendGone(String),

    #[error("Wire protocol error: {0}")]
    Protocol(String),

    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
