//! Result aggregation and caller-facing callbacks.
//!
//! The [`ResultAggregator`] owns the list of blobs decoded so far and drives a
//! caller-owned [`StreamSink`]:
//! - `on_blob` with each new blob (delta, optional)
//! - `on_progress` with the whole list after every blob (snapshot)
//! - `on_complete` once after a clean end of stream
//! - `on_error` at most once, terminal, with the partial list
//!
//! After a terminal callback nothing else is delivered until [`ResultAggregator::reset`].

use std::fmt;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::BlobStreamError;
use crate::protocol::Frame;

/// A decoded result: media type plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    media_type: String,
    data: Bytes,
}

impl Blob {
    /// Create a new blob.
    pub fn new(media_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            media_type: media_type.into(),
            data,
        }
    }

    /// Media type of the blob.
    #[inline]
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Blob contents.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Blob contents as `Bytes` (zero-copy clone).
    #[inline]
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// Payload length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Frame> for Blob {
    fn from(frame: Frame) -> Self {
        Self {
            media_type: frame.header.media_type,
            data: frame.payload,
        }
    }
}

/// What the caller is told went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Job failed before producing any output.
    JobFailedBeforeOutput,
    /// Job failed after producing some output; the partial list is still available.
    JobFailedAfterPartialOutput,
    /// Transport read failed mid-stream.
    ConnectionLost,
}

impl FailureKind {
    /// Classify an error given how many results were already delivered.
    pub fn classify(error: &BlobStreamError, delivered: usize) -> Self {
        match error {
            BlobStreamError::Io(_) => Self::ConnectionLost,
            BlobStreamError::JobFailed { .. } | BlobStreamError::JobTimedOut { .. } => {
                Self::JobFailedBeforeOutput
            }
            _ if delivered == 0 => Self::JobFailedBeforeOutput,
            _ => Self::JobFailedAfterPartialOutput,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::JobFailedBeforeOutput => "job failed before producing output",
            Self::JobFailedAfterPartialOutput => "job failed after producing partial output",
            Self::ConnectionLost => "connection lost mid-stream",
        };
        f.write_str(message)
    }
}

/// Terminal failure reported to [`StreamSink::on_error`].
#[derive(Debug)]
pub struct StreamFailure {
    pub kind: FailureKind,
    pub error: BlobStreamError,
}

impl fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.error)
    }
}

impl std::error::Error for StreamFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Per-stream event sink owned by the caller.
pub trait StreamSink {
    /// Called with each newly decoded blob, before `on_progress`.
    fn on_blob(&mut self, _blob: &Blob, _index: usize) {}

    /// Called with every blob decoded so far, once per new blob.
    fn on_progress(&mut self, results: &[Blob]);

    /// Called once after the stream ended cleanly.
    fn on_complete(&mut self);

    /// Called at most once when the stream fails.
    fn on_error(&mut self, failure: &StreamFailure, partial: &[Blob]);
}

impl<S: StreamSink + ?Sized> StreamSink for &mut S {
    fn on_blob(&mut self, blob: &Blob, index: usize) {
        (**self).on_blob(blob, index)
    }

    fn on_progress(&mut self, results: &[Blob]) {
        (**self).on_progress(results)
    }

    fn on_complete(&mut self) {
        (**self).on_complete()
    }

    fn on_error(&mut self, failure: &StreamFailure, partial: &[Blob]) {
        (**self).on_error(failure, partial)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Streaming,
    Completed,
    Failed(FailureKind),
}

/// Accumulates decoded blobs for one job and forwards them to a sink.
pub struct ResultAggregator<S> {
    sink: S,
    results: Vec<Blob>,
    state: State,
}

impl<S: StreamSink> ResultAggregator<S> {
    /// Create an aggregator delivering to `sink`.
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            results: Vec::new(),
            state: State::Streaming,
        }
    }

    /// Append a decoded frame and deliver the updated snapshot.
    ///
    /// Ignored once the aggregator has reached a terminal state.
    pub fn accept(&mut self, frame: Frame) {
        if self.state != State::Streaming {
            warn!(state = ?self.state, "dropping frame delivered after terminal state");
            return;
        }

        let index = self.results.len();
        self.results.push(Blob::from(frame));
        self.sink.on_blob(&self.results[index], index);
        self.sink.on_progress(&self.results);
    }

    /// Signal a clean end of stream.
    pub fn complete(&mut self) {
        if self.state != State::Streaming {
            return;
        }
        self.state = State::Completed;
        debug!(results = self.results.len(), "stream complete");
        self.sink.on_complete();
    }

    /// Signal a terminal failure, returning how it was classified.
    ///
    /// Returns `None` if a terminal callback was already delivered.
    pub fn fail(&mut self, error: BlobStreamError) -> Option<FailureKind> {
        if self.state != State::Streaming {
            return None;
        }

        let kind = FailureKind::classify(&error, self.results.len());
        self.state = State::Failed(kind);

        let failure = StreamFailure { kind, error };
        warn!(results = self.results.len(), "stream failed: {}", failure);
        self.sink.on_error(&failure, &self.results);
        Some(kind)
    }

    /// Start a new job: clear results and re-arm callbacks.
    pub fn reset(&mut self) {
        self.results.clear();
        self.state = State::Streaming;
    }

    /// Blobs decoded so far.
    pub fn results(&self) -> &[Blob] {
        &self.results
    }

    /// Number of blobs decoded so far.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if no blob has been decoded yet.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Whether `on_complete` or `on_error` has been delivered.
    pub fn is_finished(&self) -> bool {
        self.state != State::Streaming
    }

    /// Failure classification, if the stream failed.
    pub fn failure(&self) -> Option<FailureKind> {
        match self.state {
            State::Failed(kind) => Some(kind),
            _ => None,
        }
    }

    /// Get a reference to the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Get a mutable reference to the sink.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Consume the aggregator, returning the sink and the results.
    pub fn into_parts(self) -> (S, Vec<Blob>) {
        (self.sink, self.results)
    }
}
