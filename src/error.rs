//! Error taxonomy for the inference core
//!
//! Only setup-time problems (configuration, data shape, seed partition) and
//! I/O are errors. Numerical trouble during sampling is absorbed in log space
//! and invalid proposals are rejected, so a running chain never fails.

/// Errors raised by motif-core
#[derive(Debug, thiserror::Error)]
pub enum MotifError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    Data(String),

    #[error("Invalid partition: {0}")]
    Partition(String),

    #[error("Posterior trace contains no snapshots")]
    EmptyTrace,

    #[error("No candidate partition with at most {0} clusters")]
    NoCandidate(usize),

    #[error("Checkpoint integrity verification failed: {0}")]
    Integrity(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MotifError>;
