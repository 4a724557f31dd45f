//! Frame struct and frame builders.
//!
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use blobstream::protocol::Frame;
//! use bytes::Bytes;
//!
//! let frame = Frame::new("image/png", Bytes::from_static(b"\x89PNG"));
//! assert_eq!(frame.media_type(), "image/png");
//! assert_eq!(frame.payload(), b"\x89PNG");
//! ```

use bytes::Bytes;

use super::wire_format::{find, validate_separator, Header};
use crate::error::{BlobStreamError, Result};

/// A complete, decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from a media type and payload.
    pub fn new(media_type: impl Into<String>, payload: Bytes) -> Self {
        Self {
            header: Header::new(media_type),
            payload,
        }
    }

    /// Create a frame from a media type and raw bytes (copies data).
    pub fn from_parts(media_type: impl Into<String>, payload: &[u8]) -> Self {
        Self::new(media_type, Bytes::copy_from_slice(payload))
    }

    /// Get the media type.
    #[inline]
    pub fn media_type(&self) -> &str {
        &self.header.media_type
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get a clone of the payload as Bytes (cheap, zero-copy).
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Size of this frame on the wire, separator included.
    #[inline]
    pub fn wire_len(&self, separator: &[u8]) -> usize {
        self.header.encoded_len() + self.payload.len() + separator.len()
    }
}

/// Check that a frame can be written without corrupting the stream.
///
/// The media type must form a valid header line and the first separator
/// match after the header must be the trailing one. Payloads are neither
/// escaped nor length-prefixed, so a payload that contains the separator, or
/// ends with a prefix of it, would split the frame early.
pub fn validate_frame(header: &Header, payload: &[u8], separator: &[u8]) -> Result<()> {
    validate_separator(separator)?;
    header.validate(separator)?;

    if let Some(offset) = find(payload, separator, 0) {
        return Err(BlobStreamError::PayloadContainsSeparator { offset });
    }

    // Payload tail followed by the trailing separator.
    let keep = payload.len().min(separator.len() - 1);
    let tail_start = payload.len() - keep;
    let mut boundary = Vec::with_capacity(keep + separator.len());
    boundary.extend_from_slice(&payload[tail_start..]);
    boundary.extend_from_slice(separator);

    match find(&boundary, separator, 0) {
        Some(pos) if pos < keep => Err(BlobStreamError::PayloadContainsSeparator {
            offset: tail_start + pos,
        }),
        _ => Ok(()),
    }
}

/// Build a complete frame (header, payload, separator) as a single byte vector.
///
/// Use `build_frame_parts` for scatter/gather I/O (writev).
///
/// # Example
///
/// ```
/// use blobstream::protocol::{build_frame, Header};
///
/// let bytes = build_frame(&Header::new("text/plain"), b"hi", b"--SEP--").unwrap();
/// assert_eq!(bytes, b"Content-Type: text/plain\r\n\r\nhi--SEP--");
/// ```
pub fn build_frame(header: &Header, payload: &[u8], separator: &[u8]) -> Result<Vec<u8>> {
    validate_frame(header, payload, separator)?;
    let mut buf = Vec::with_capacity(header.encoded_len() + payload.len() + separator.len());
    header.encode_into(&mut buf);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(separator);
    Ok(buf)
}

/// Build frame parts for scatter/gather I/O.
///
/// Returns the encoded header block and a reference to the payload; the
/// caller writes the separator after the payload.
pub fn build_frame_parts<'a>(
    header: &Header,
    payload: &'a [u8],
    separator: &[u8],
) -> Result<(Vec<u8>, &'a [u8])> {
    validate_frame(header, payload, separator)?;
    Ok((header.encode(), payload))
}
