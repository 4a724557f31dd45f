//! Stream configuration.
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```
//! use blobstream::StreamConfig;
//!
//! let config = StreamConfig::from_json(r#"{ "separator": "--SEP--" }"#).unwrap();
//! assert_eq!(config.separator, "--SEP--");
//! assert_eq!(config.timeout_status, 504);
//! ```

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{BlobStreamError, Result};
use crate::protocol::{
    validate_separator, FrameBuffer, DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_SEPARATOR,
};
use crate::writer::{
    WriterConfig, DEFAULT_BACKPRESSURE_TIMEOUT, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_MAX_PENDING_FRAMES,
};

/// Default size of a single transport read (64KB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default status code meaning "job took too long".
pub const DEFAULT_TIMEOUT_STATUS: u16 = 504;

/// Settings shared by the encoder and decoder sides of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Separator written after every frame.
    pub separator: String,
    /// Maximum size of a single frame (header + payload).
    pub max_frame_size: usize,
    /// Initial capacity of the decoder buffer.
    pub initial_capacity: usize,
    /// Size of a single read from an `AsyncRead` transport.
    pub read_buffer_size: usize,
    /// Out-of-band status reporting a job timeout.
    pub timeout_status: u16,
    /// Writer task: pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Writer task: channel capacity.
    pub channel_capacity: usize,
    /// Writer task: backpressure timeout in milliseconds.
    pub backpressure_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            timeout_status: DEFAULT_TIMEOUT_STATUS,
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl StreamConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        validate_separator(self.separator.as_bytes())?;

        if self.max_frame_size == 0 {
            return Err(BlobStreamError::Config(
                "max_frame_size must be greater than 0".to_string(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(BlobStreamError::Config(
                "read_buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.channel_capacity == 0 || self.max_pending_frames == 0 {
            return Err(BlobStreamError::Config(
                "channel_capacity and max_pending_frames must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a fresh decoder for one stream.
    pub fn frame_buffer(&self) -> Result<FrameBuffer> {
        FrameBuffer::with_config(
            self.separator.as_bytes(),
            self.max_frame_size,
            self.initial_capacity,
        )
    }

    /// Writer task settings derived from this configuration.
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            separator: Bytes::copy_from_slice(self.separator.as_bytes()),
            max_pending_frames: self.max_pending_frames,
            channel_capacity: self.channel_capacity,
            backpressure_timeout: Duration::from_millis(self.backpressure_timeout_ms),
        }
    }
}
