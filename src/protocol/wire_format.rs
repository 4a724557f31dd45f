//! Wire format encoding and decoding.
//!
//! Every frame on the wire looks like:
//! ```text
//! Content-Type: <media-type>\r\n
//! \r\n
//! <payload bytes>
//! <separator>
//! ```
//!
//! The separator is written after every frame, including the last one, so a
//! frame is complete exactly when its separator has been seen. There is no
//! length prefix, frame count or checksum.

use crate::error::{BlobStreamError, Result};

/// Blank-line marker ending the header block.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Header line terminator.
const LINE_ENDING: &str = "\r\n";

/// Header key carrying the media type.
pub const CONTENT_TYPE: &str = "Content-Type";

/// Bytes every encoded header starts with.
const HEADER_PREFIX: &[u8] = b"Content-Type: ";

/// Default frame separator.
pub const DEFAULT_SEPARATOR: &str = "--blobstream-frame-boundary--";

/// Default maximum size of a single in-flight frame (1 GB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1_073_741_824;

/// Header block of a single frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Media type of the payload (e.g. `image/png`).
    pub media_type: String,
}

impl Header {
    /// Create a new header.
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
        }
    }

    /// Encode the header block, terminator included.
    ///
    /// # Example
    ///
    /// ```
    /// use blobstream::protocol::Header;
    ///
    /// let bytes = Header::new("image/png").encode();
    /// assert_eq!(bytes, b"Content-Type: image/png\r\n\r\n");
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Append the encoded header block to an existing buffer.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(HEADER_PREFIX);
        buf.extend_from_slice(self.media_type.as_bytes());
        buf.extend_from_slice(HEADER_TERMINATOR);
    }

    /// Length of the encoded header block in bytes.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_PREFIX.len() + self.media_type.len() + HEADER_TERMINATOR.len()
    }

    /// Decode a header block (terminator excluded).
    ///
    /// The block may carry several `Key: value` lines; only `Content-Type`
    /// is interpreted and the key match is case-insensitive. Returns `None`
    /// if the block is not UTF-8 or has no non-empty `Content-Type` line.
    ///
    /// # Example
    ///
    /// ```
    /// use blobstream::protocol::Header;
    ///
    /// let header = Header::decode(b"Content-Type: text/plain").unwrap();
    /// assert_eq!(header.media_type, "text/plain");
    /// assert!(Header::decode(b"X-Other: 1").is_none());
    /// ```
    pub fn decode(block: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(block).ok()?;
        text.split(LINE_ENDING).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            if !key.trim().eq_ignore_ascii_case(CONTENT_TYPE) {
                return None;
            }
            let value = value.trim();
            (!value.is_empty()).then(|| Self::new(value))
        })
    }

    /// Check that the media type can be written as a single header line.
    ///
    /// Rejects:
    /// - empty media types or surrounding whitespace
    /// - non-ASCII and control characters (CR/LF included)
    /// - header lines containing the separator, including matches that
    ///   start in the `Content-Type: ` prefix
    pub fn validate(&self, separator: &[u8]) -> Result<()> {
        let media_type = &self.media_type;
        let invalid = || BlobStreamError::InvalidMediaType(media_type.clone());

        if media_type.is_empty() || media_type.trim() != media_type {
            return Err(invalid());
        }

        if !media_type
            .bytes()
            .all(|b| b.is_ascii_graphic() || b == b' ')
        {
            return Err(invalid());
        }

        if find(&self.encode(), separator, 0).is_some() {
            return Err(invalid());
        }

        Ok(())
    }
}

/// Validate a separator: non-empty, printable ASCII only, and not part of
/// the fixed `Content-Type: ` prefix every header starts with.
pub fn validate_separator(separator: &[u8]) -> Result<()> {
    if separator.is_empty() {
        return Err(BlobStreamError::InvalidSeparator(
            "separator must not be empty".to_string(),
        ));
    }

    if !separator.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        return Err(BlobStreamError::InvalidSeparator(format!(
            "separator {:?} must be printable ASCII",
            String::from_utf8_lossy(separator)
        )));
    }

    if find(HEADER_PREFIX, separator, 0).is_some() {
        return Err(BlobStreamError::InvalidSeparator(format!(
            "separator {:?} occurs in the header prefix",
            String::from_utf8_lossy(separator)
        )));
    }

    Ok(())
}

/// Find the first occurrence of `needle` in `haystack` at or after `from`.
pub fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// Split a candidate frame into header block and payload offset.
///
/// Returns the header block (terminator excluded) and the index where the
/// payload starts, or `None` if the terminator is missing.
pub fn split_header(candidate: &[u8]) -> Option<(&[u8], usize)> {
    let end = find(candidate, HEADER_TERMINATOR, 0)?;
    Some((&candidate[..end], end + HEADER_TERMINATOR.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEP: &[u8] = b"--SEP--";

    #[test]
    fn test_header_encode_layout() {
        let header = Header::new("image/png");
        let bytes = header.encode();
        assert_eq!(bytes, b"Content-Type: image/png\r\n\r\n");
        assert_eq!(bytes.len(), header.encoded_len());
    }

    #[test]
    fn test_header_decode_extra_lines_and_case() {
        let header = Header::decode(b"X-Index: 3\r\ncontent-type:  image/webp ").unwrap();
        assert_eq!(header.media_type, "image/webp");
    }

    #[test]
    fn test_header_decode_rejects_missing_or_empty() {
        assert!(Header::decode(b"").is_none());
        assert!(Header::decode(b"Content-Type:").is_none());
        assert!(Header::decode(b"Content-Length: 4").is_none());
        assert!(Header::decode(&[0xFF, 0xFE]).is_none());
    }

    #[test]
    fn test_validate_accepts_mime_with_params() {
        assert!(Header::new("text/plain; charset=utf-8").validate(SEP).is_ok());
    }

    #[test]
    fn test_validate_rejects_crlf() {
        let result = Header::new("image/png\r\n\r\nX").validate(SEP);
        assert!(matches!(result, Err(BlobStreamError::InvalidMediaType(_))));
        assert!(Header::new("image/png\n").validate(SEP).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_and_padded() {
        assert!(Header::new("").validate(SEP).is_err());
        assert!(Header::new(" image/png").validate(SEP).is_err());
    }

    #[test]
    fn test_validate_rejects_non_ascii() {
        assert!(Header::new("image/pñg").validate(SEP).is_err());
    }

    #[test]
    fn test_validate_rejects_separator_in_media_type() {
        assert!(Header::new("image/--SEP--").validate(SEP).is_err());
    }

    #[test]
    fn test_validate_rejects_separator_spanning_prefix() {
        // Match starts in "Content-Type: " and ends in the media type.
        let result = Header::new("image/png").validate(b" im");
        assert!(matches!(result, Err(BlobStreamError::InvalidMediaType(_))));
        assert!(Header::new("image/png").validate(b": image").is_err());
        assert!(Header::new("image/png").validate(b"--SEP--").is_ok());
    }

    #[test]
    fn test_validate_separator() {
        assert!(validate_separator(b"--SEP--").is_ok());
        assert!(validate_separator(b"").is_err());
        assert!(validate_separator(b"--\r\n--").is_err());
        assert!(validate_separator(&[0x80, 0x81]).is_err());
    }

    #[test]
    fn test_validate_separator_rejects_header_prefix_substrings() {
        for separator in [&b"-"[..], b"Type", b"e", b": ", b"Content-Type: "] {
            let result = validate_separator(separator);
            assert!(
                matches!(result, Err(BlobStreamError::InvalidSeparator(_))),
                "{:?} accepted",
                String::from_utf8_lossy(separator)
            );
        }
        assert!(validate_separator(b"Type--").is_ok());
    }

    #[test]
    fn test_find() {
        assert_eq!(find(b"abc--SEP--def", SEP, 0), Some(3));
        assert_eq!(find(b"abc--SEP--def", SEP, 4), None);
        assert_eq!(find(b"--SEP", SEP, 0), None);
        assert_eq!(find(b"abc", SEP, 10), None);
    }

    #[test]
    fn test_split_header() {
        let (block, start) = split_header(b"Content-Type: a/b\r\n\r\npayload").unwrap();
        assert_eq!(block, b"Content-Type: a/b");
        assert_eq!(start, 21);
        assert!(split_header(b"Content-Type: a/b\r\npayload").is_none());
    }
}
