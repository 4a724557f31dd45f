//! # blobstream
//!
//! Streams the binary results of a long-running job (e.g. a multi-image
//! rendering pipeline) over a single response body, so the caller can show
//! results before the job finishes.
//!
//! ## Architecture
//!
//! - **Encoder** ([`writer`]): writes each `(media type, payload)` result as a
//!   `Content-Type` header block, the payload and a fixed separator
//! - **Decoder** ([`protocol::FrameBuffer`]): rebuilds frames incrementally
//!   from arbitrarily-chunked input
//! - **Result Aggregator** ([`ResultAggregator`]): accumulates decoded blobs and
//!   delivers snapshot progress, completion and error callbacks to a
//!   caller-owned [`StreamSink`]
//!
//! ## Example
//!
//! ```
//! use blobstream::protocol::FrameBuffer;
//! use blobstream::writer::encode_frames;
//!
//! let bytes = encode_frames(
//!     [("image/png", b"A".as_slice()), ("text/plain", b"C".as_slice())],
//!     b"--SEP--",
//! )
//! .unwrap();
//!
//! let mut decoder = FrameBuffer::with_separator(b"--SEP--").unwrap();
//! let frames = decoder.push(&bytes).unwrap();
//! decoder.finish().unwrap();
//!
//! assert_eq!(frames.len(), 2);
//! assert_eq!(frames[1].media_type(), "text/plain");
//! ```

pub mod aggregator;
pub mod config;
pub mod consumer;
pub mod error;
pub mod protocol;
pub mod writer;

pub use aggregator::{Blob, FailureKind, ResultAggregator, StreamFailure, StreamSink};
pub use config::StreamConfig;
pub use consumer::{ConsumeOutcome, JobStatus, StreamConsumer, StreamConsumerBuilder};
pub use error::{BlobStreamError, Result};
pub use protocol::{DecoderStats, Frame, FrameBuffer};
pub use writer::{encode_frames, spawn_writer_task, FrameWriter, WriterConfig, WriterHandle};
