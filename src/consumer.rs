//! Consumer side: the per-stream consumption loop.
//!
//! A [`StreamConsumer`] reads chunks from the transport, feeds them to a fresh
//! [`FrameBuffer`] and hands every decoded frame to a [`ResultAggregator`]:
//! 1. Check the out-of-band job status (never decode a failed job's body)
//! 2. Await the next chunk (the only suspension point)
//! 3. Decode and deliver frames synchronously
//! 4. On end of stream, report completion or truncation
//!
//! Each call owns its own decoder state, so one consumer can drive many
//! streams concurrently.
//!
//! # Example
//!
//! ```ignore
//! use blobstream::{ResultAggregator, StreamConsumer};
//!
//! let consumer = StreamConsumer::builder().separator("--SEP--").build()?;
//! let mut aggregator = ResultAggregator::new(my_sink);
//!
//! let outcome = consumer
//!     .consume_response(response.status(), response_body, &mut aggregator)
//!     .await;
//! ```

use std::io;

use futures::{Stream, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::aggregator::{FailureKind, ResultAggregator, StreamSink};
use crate::config::StreamConfig;
use crate::error::{BlobStreamError, Result};
use crate::protocol::DecoderStats;

/// Job status reported out-of-band (e.g. the HTTP status code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// 2xx: the body carries the frame stream.
    Ok,
    /// The job exceeded its time budget.
    TimedOut { status: u16 },
    /// Any other non-success status.
    Failed { status: u16 },
}

impl JobStatus {
    /// Classify an HTTP status code.
    pub fn from_http(status: u16, timeout_status: u16) -> Self {
        match status {
            200..=299 => Self::Ok,
            s if s == timeout_status => Self::TimedOut { status },
            _ => Self::Failed { status },
        }
    }

    /// The error to report for a non-success status.
    pub fn into_error(self) -> Option<BlobStreamError> {
        match self {
            Self::Ok => None,
            Self::TimedOut { status } => Some(BlobStreamError::JobTimedOut { status }),
            Self::Failed { status } => Some(BlobStreamError::JobFailed { status }),
        }
    }
}

/// How a consumption loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Clean end of stream; `on_complete` was delivered.
    Completed { stats: DecoderStats },
    /// Terminal failure; `on_error` was delivered.
    Failed {
        kind: FailureKind,
        stats: DecoderStats,
    },
    /// Cancelled by the caller; no terminal callback was delivered.
    Cancelled { stats: DecoderStats },
}

impl ConsumeOutcome {
    /// Check if the stream ended cleanly.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Decoder counters at the time the loop ended.
    pub fn stats(&self) -> DecoderStats {
        match self {
            Self::Completed { stats } | Self::Failed { stats, .. } | Self::Cancelled { stats } => {
                *stats
            }
        }
    }
}

/// Builder for configuring a [`StreamConsumer`].
pub struct StreamConsumerBuilder {
    config: StreamConfig,
    cancel: Option<CancellationToken>,
}

impl StreamConsumerBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            config: StreamConfig::default(),
            cancel: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the frame separator.
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.config.separator = separator.into();
        self
    }

    /// Set the maximum size of a single frame.
    ///
    /// Default: 1GB
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the size of a single transport read.
    ///
    /// Default: 64KB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the status code that means "job took too long".
    ///
    /// Default: 504
    pub fn timeout_status(mut self, status: u16) -> Self {
        self.config.timeout_status = status;
        self
    }

    /// Use a caller-provided cancellation token.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Validate the configuration and build the consumer.
    pub fn build(self) -> Result<StreamConsumer> {
        self.config.validate()?;
        Ok(StreamConsumer {
            config: self.config,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

impl Default for StreamConsumerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives decoding of frame streams into result aggregators.
pub struct StreamConsumer {
    config: StreamConfig,
    cancel: CancellationToken,
}

impl StreamConsumer {
    /// Create a new consumer builder.
    pub fn builder() -> StreamConsumerBuilder {
        StreamConsumerBuilder::new()
    }

    /// Create a consumer from a configuration.
    pub fn new(config: StreamConfig) -> Result<Self> {
        StreamConsumerBuilder::new().config(config).build()
    }

    /// The active configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// A token that cancels every stream driven by this consumer.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel all streams driven by this consumer.
    ///
    /// Pending reads are released and no further callbacks are delivered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Consume a job response: check its status, then decode its body.
    ///
    /// A non-success status is reported through `on_error` as a job failure
    /// and the body is never read.
    pub async fn consume_response<R, S>(
        &self,
        status: u16,
        body: R,
        aggregator: &mut ResultAggregator<S>,
    ) -> ConsumeOutcome
    where
        R: AsyncRead + Unpin,
        S: StreamSink,
    {
        let job_status = JobStatus::from_http(status, self.config.timeout_status);
        if let Some(err) = job_status.into_error() {
            debug!(status, ?job_status, "job failed out-of-band, body not decoded");
            return fail(aggregator, err, DecoderStats::default());
        }

        self.consume_reader(body, aggregator).await
    }

    /// Decode a frame stream from an async reader.
    pub async fn consume_reader<R, S>(
        &self,
        reader: R,
        aggregator: &mut ResultAggregator<S>,
    ) -> ConsumeOutcome
    where
        R: AsyncRead + Unpin,
        S: StreamSink,
    {
        let chunks = ReaderStream::with_capacity(reader, self.config.read_buffer_size);
        self.consume_chunks(chunks, aggregator).await
    }

    /// Decode a frame stream from an async chunk iterator.
    ///
    /// Chunks may be split anywhere; frames are delivered in stream order as
    /// soon as their separator arrives.
    pub async fn consume_chunks<St, B, S>(
        &self,
        mut chunks: St,
        aggregator: &mut ResultAggregator<S>,
    ) -> ConsumeOutcome
    where
        St: Stream<Item = io::Result<B>> + Unpin,
        B: AsRef<[u8]>,
        S: StreamSink,
    {
        let mut decoder = match self.config.frame_buffer() {
            Ok(decoder) => decoder,
            Err(e) => return fail(aggregator, e, DecoderStats::default()),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return cancelled(decoder.stats(), decoder.len());
                }
                next = chunks.next() => next,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    error!("Transport read failed: {}", e);
                    return fail(aggregator, e.into(), decoder.stats());
                }
                None => break,
            };

            let frames = match decoder.push(chunk.as_ref()) {
                Ok(frames) => frames,
                Err(e) => return fail(aggregator, e, decoder.stats()),
            };

            for frame in frames {
                if self.cancel.is_cancelled() {
                    return cancelled(decoder.stats(), decoder.len());
                }
                aggregator.accept(frame);
            }

            if let Some(e) = decoder.take_error() {
                return fail(aggregator, e, decoder.stats());
            }
        }

        match decoder.finish() {
            Ok(()) => {
                aggregator.complete();
                ConsumeOutcome::Completed {
                    stats: decoder.stats(),
                }
            }
            Err(e) => {
                error!("Stream ended mid-frame: {}", e);
                fail(aggregator, e, decoder.stats())
            }
        }
    }
}

fn fail<S: StreamSink>(
    aggregator: &mut ResultAggregator<S>,
    error: BlobStreamError,
    stats: DecoderStats,
) -> ConsumeOutcome {
    let kind = FailureKind::classify(&error, aggregator.len());
    aggregator.fail(error);
    ConsumeOutcome::Failed { kind, stats }
}

fn cancelled(stats: DecoderStats, dropped: usize) -> ConsumeOutcome {
    debug!(dropped, "stream cancelled, discarding decoder state");
    ConsumeOutcome::Cancelled { stats }
}
