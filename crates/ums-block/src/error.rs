use thiserror::Error;

pub type Result<T> = std::result::Result<T, UmsError>;

/// Status codes produced by the UMS block shim.
///
/// Transaction failures are not returned from the submitting call; they travel through the
/// transaction's completion handler (or the installed [`crate::BlockCallbacks`]) like any other
/// completion status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UmsError {
    /// Misaligned offset/length, or a memory range outside its region.
    #[error("invalid arguments")]
    InvalidArgs,

    /// The transaction pool is exhausted.
    #[error("transaction allocation failed")]
    NoMemory,

    #[error("reply buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("operation not supported")]
    NotSupported,

    /// Transfer failure reported by the executor (USB transport / SCSI layer).
    #[error("io error: {0}")]
    Io(String),

    /// The controller was shut down before the transaction could run.
    #[error("controller has been shut down")]
    PeerClosed,

    #[error("worker already started")]
    AlreadyStarted,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The host framework refused to create or publish a device.
    #[error("device registration failed: {0}")]
    Registration(String),
}
