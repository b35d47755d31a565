//! Muxer error types.

use thiserror::Error;

/// Errors that can occur during MP4 muxing.
#[derive(Error, Debug)]
pub enum MuxError {
    /// I/O error while writing to the output target.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration (no track for the pushed chunk kind,
    /// zero tracks at finalize, missing decoder configuration).
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Timestamp violation: non-zero first timestamp in strict mode, or a
    /// timestamp earlier than the previous one on the same track.
    #[error("Timestamp error: {0}")]
    Timestamp(String),

    /// Operation attempted after `finalize()`.
    #[error("Invalid state: {0}")]
    State(String),

    /// A box or offset exceeded the addressable range of its size field.
    #[error("Capacity exceeded: {0}")]
    Capacity(String),
}

/// Convenience Result type for mux operations.
pub type MuxResult<T> = Result<T, MuxError>;
