//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management. Incoming chunks
//! are appended to a single buffer which is scanned for the separator:
//! - separator found: the bytes before it form a candidate frame, which is
//!   split into header block and payload and emitted (or skipped if the
//!   header terminator is missing)
//! - separator not found: everything stays buffered until the next chunk
//!
//! Scanning resumes from where the previous scan stopped, minus
//! `separator.len() - 1` bytes of overlap, so each byte is inspected a bounded
//! number of times no matter how the stream is chunked.
//!
//! # Example
//!
//! ```
//! use blobstream::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::with_separator(b"--SEP--").unwrap();
//!
//! let frames = buffer.push(b"Content-Type: text/plain\r\n\r\nhel").unwrap();
//! assert!(frames.is_empty());
//!
//! let frames = buffer.push(b"lo--SEP--").unwrap();
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].payload(), b"hello");
//!
//! buffer.finish().unwrap();
//! ```

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use super::wire_format::{
    find, split_header, validate_separator, Header, DEFAULT_MAX_FRAME_SIZE, DEFAULT_SEPARATOR,
};
use super::Frame;
use crate::error::{BlobStreamError, Result};

/// Default initial buffer capacity (64KB).
pub const DEFAULT_INITIAL_CAPACITY: usize = 64 * 1024;

/// Counters describing what the decoder has seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames fully decoded and emitted.
    pub frames_emitted: usize,
    /// Candidate frames dropped because their header was malformed.
    pub frames_skipped: usize,
    /// Bytes consumed from the stream (separators included).
    pub bytes_consumed: usize,
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Unconsumed bytes from transport reads.
    buffer: BytesMut,
    /// Separator terminating every frame.
    separator: Bytes,
    /// Offset in `buffer` where the next separator search starts.
    scan_from: usize,
    /// Maximum allowed size of a single frame (header + payload).
    max_frame_size: usize,
    /// Error hit after frames were already extracted in the same push.
    pending_error: Option<BlobStreamError>,
    stats: DecoderStats,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default separator: [`DEFAULT_SEPARATOR`], capacity: 64KB, max frame: 1GB.
    pub fn new() -> Self {
        Self::from_validated(
            Bytes::from_static(DEFAULT_SEPARATOR.as_bytes()),
            DEFAULT_MAX_FRAME_SIZE,
            DEFAULT_INITIAL_CAPACITY,
        )
    }

    /// Create a new frame buffer with a custom separator.
    pub fn with_separator(separator: &[u8]) -> Result<Self> {
        Self::with_config(separator, DEFAULT_MAX_FRAME_SIZE, DEFAULT_INITIAL_CAPACITY)
    }

    /// Create a new frame buffer with custom separator, max frame size and capacity.
    pub fn with_config(separator: &[u8], max_frame_size: usize, capacity: usize) -> Result<Self> {
        validate_separator(separator)?;
        Ok(Self::from_validated(
            Bytes::copy_from_slice(separator),
            max_frame_size,
            capacity,
        ))
    }

    fn from_validated(separator: Bytes, max_frame_size: usize, capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            separator,
            scan_from: 0,
            max_frame_size,
            pending_error: None,
            stats: DecoderStats::default(),
        }
    }

    /// Push a chunk into the buffer and extract all complete frames.
    ///
    /// Chunk boundaries carry no meaning: a frame or a separator may be split
    /// across any number of pushes. Malformed frames are skipped and counted
    /// in [`DecoderStats::frames_skipped`].
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` if a frame grows past the configured maximum.
    /// Frames completed earlier in the same push are returned first; the error
    /// is then held until [`take_error`](Self::take_error), the next `push` or
    /// [`finish`](Self::finish).
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }

        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();

        loop {
            match self.try_extract_one() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(err) if frames.is_empty() => return Err(err),
                Err(err) => {
                    self.pending_error = Some(err);
                    break;
                }
            }
        }

        Ok(frames)
    }

    /// Take the error held back by the last `push`, if any.
    pub fn take_error(&mut self) -> Option<BlobStreamError> {
        self.pending_error.take()
    }

    /// Try to extract a single well-formed frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if the in-flight frame is too large
    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        let sep_len = self.separator.len();

        loop {
            let Some(pos) = find(&self.buffer, &self.separator, self.scan_from) else {
                // A separator split across chunks starts within the last sep_len - 1 bytes.
                self.scan_from = self.buffer.len().saturating_sub(sep_len - 1);
                self.check_frame_size(self.scan_from)?;
                return Ok(None);
            };

            self.check_frame_size(pos)?;

            let candidate = self.buffer.split_to(pos).freeze();
            let _ = self.buffer.split_to(sep_len);
            self.scan_from = 0;
            self.stats.bytes_consumed += pos + sep_len;

            match parse_candidate(candidate) {
                Some(frame) => {
                    self.stats.frames_emitted += 1;
                    debug!(
                        index = self.stats.frames_emitted - 1,
                        media_type = frame.media_type(),
                        len = frame.payload_len(),
                        "decoded frame"
                    );
                    return Ok(Some(frame));
                }
                None => {
                    self.stats.frames_skipped += 1;
                    warn!(
                        len = pos,
                        skipped = self.stats.frames_skipped,
                        "skipping malformed frame without a valid header block"
                    );
                }
            }
        }
    }

    fn check_frame_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            return Err(BlobStreamError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }

    /// Signal end of stream.
    ///
    /// Any bytes still buffered belong to a frame whose separator never
    /// arrived; they are dropped and reported as `Truncated`. An error held
    /// back by `push` takes precedence.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(err) = self.pending_error.take() {
            self.clear();
            return Err(err);
        }

        if self.buffer.is_empty() {
            return Ok(());
        }

        let buffered = self.buffer.len();
        self.clear();
        Err(BlobStreamError::Truncated { buffered })
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get the decoder counters.
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Get the separator this buffer splits on.
    pub fn separator(&self) -> &[u8] {
        &self.separator
    }

    /// Clear the buffer, the scan offset and any held-back error.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scan_from = 0;
        self.pending_error = None;
    }

    #[cfg(test)]
    fn scan_offset(&self) -> usize {
        self.scan_from
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a candidate into header and payload; `None` if malformed.
fn parse_candidate(candidate: Bytes) -> Option<Frame> {
    let (block, payload_start) = split_header(&candidate)?;
    let header = Header::decode(block)?;
    Some(Frame {
        header,
        payload: candidate.slice(payload_start..),
    })
}
