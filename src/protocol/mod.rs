//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the delimiter-framed stream format:
//! - `Content-Type` header block encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, build_frame_parts, validate_frame, Frame};
pub use frame_buffer::{DecoderStats, FrameBuffer, DEFAULT_INITIAL_CAPACITY};
pub use wire_format::{
    find, split_header, validate_separator, Header, CONTENT_TYPE, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_SEPARATOR, HEADER_TERMINATOR,
};
