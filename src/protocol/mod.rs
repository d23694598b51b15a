//! Protocol module - length-field framing.
//!
//! This module implements the framing layer of the wire protocol:
//! - Length header encoding/decoding (binary or ASCII decimal)
//! - Frame buffer for accumulating partial reads
//! - Frame codec tying geometry and size limit together

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{EncodedFrame, FrameCodec};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    FrameGeometry, DEFAULT_HEADER_LENGTH, DEFAULT_MAX_FRAME_LENGTH, MAX_BINARY_HEADER_LENGTH,
    MAX_STRING_HEADER_LENGTH,
};
