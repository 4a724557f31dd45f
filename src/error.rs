//! Error types for blobstream.

use thiserror::Error;

/// Main error type for all blobstream operations.
#[derive(Debug, Error)]
pub enum BlobStreamError {
    /// I/O error while reading from or writing to the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Media type cannot be written as a single header line.
    #[error("Invalid media type {0:?}")]
    InvalidMediaType(String),

    /// Separator is empty or not a plain ASCII token.
    #[error("Invalid separator: {0}")]
    InvalidSeparator(String),

    /// Payload contains the separator byte sequence and would corrupt framing.
    #[error("Payload contains the frame separator at offset {offset}")]
    PayloadContainsSeparator { offset: usize },

    /// In-flight frame grew past the configured limit without a separator.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Stream ended with bytes that never saw a terminating separator.
    #[error("Stream truncated: {buffered} bytes of an incomplete frame at end of stream")]
    Truncated { buffered: usize },

    /// Job reported failure through the out-of-band status code.
    #[error("Job failed with status {status}")]
    JobFailed { status: u16 },

    /// Job exceeded its time budget (reported via the timeout status code).
    #[error("Job timed out (status {status})")]
    JobTimedOut { status: u16 },

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Writer task is gone.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using BlobStreamError.
pub type Result<T> = std::result::Result<T, BlobStreamError>;
