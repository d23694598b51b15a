//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need `header_offset + header_length` bytes
//! - `WaitingForBody`: Length decoded, need N more body bytes
//!
//! # Example
//!
//! ```
//! use iso8583_connector::protocol::{FrameBuffer, FrameGeometry};
//!
//! let mut buffer = FrameBuffer::new(FrameGeometry::string(4), 8192);
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(b"0007MES").unwrap().is_empty());
//! let frames = buffer.push(b"SAGE").unwrap();
//!
//! assert_eq!(&frames[0][..], b"MESSAGE");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::FrameGeometry;
use crate::error::{ConnectorError, Result};

/// Initial capacity of the accumulation buffer.
const INITIAL_CAPACITY: usize = 16 * 1024;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the complete prefix (offset + length field).
    WaitingForHeader,
    /// Length decoded and prefix consumed, waiting for body bytes.
    WaitingForBody { remaining: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frame
/// bodies.
///
/// Each connection owns exactly one buffer. After an error the buffer is
/// poisoned in the sense that the stream position is unknown; callers must
/// close the connection instead of pushing more data.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Frame layout.
    geometry: FrameGeometry,
    /// Maximum allowed body length.
    max_frame_length: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer for the given geometry.
    pub fn new(geometry: FrameGeometry, max_frame_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            state: State::WaitingForHeader,
            geometry,
            max_frame_length,
        }
    }

    /// Push data into the buffer and extract all complete frame bodies.
    ///
    /// Length prefixes are stripped; only bodies are returned. If data is
    /// fragmented, partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// - [`ConnectorError::FrameTooLarge`] if a decoded length exceeds the
    ///   maximum frame length
    /// - [`ConnectorError::InvalidFrameLength`] if a length field cannot be
    ///   interpreted
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        if !self.geometry.is_framed() {
            return self.take_raw();
        }

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Unframed mode: whatever arrived is one message.
    fn take_raw(&mut self) -> Result<Vec<Bytes>> {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }
        if self.buffer.len() > self.max_frame_length {
            return Err(ConnectorError::FrameTooLarge {
                length: self.buffer.len() as u64,
                max: self.max_frame_length,
            });
        }
        let len = self.buffer.len();
        Ok(vec![self.buffer.split_to(len).freeze()])
    }

    /// Try to extract a single frame body from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(body))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a length violation
    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    let prefix_length = self.geometry.prefix_length();
                    if self.buffer.len() < prefix_length {
                        return Ok(None);
                    }

                    let length = self.geometry.decode_body_length(&self.buffer[..prefix_length])?;
                    if length > self.max_frame_length as u64 {
                        return Err(ConnectorError::FrameTooLarge {
                            length,
                            max: self.max_frame_length,
                        });
                    }

                    let _ = self.buffer.split_to(prefix_length);
                    self.state = State::WaitingForBody {
                        remaining: length as usize,
                    };
                }

                State::WaitingForBody { remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let body = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForHeader;
                    return Ok(Some(body));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to create a framed body as bytes.
    fn make_frame_bytes(geometry: &FrameGeometry, body: &[u8]) -> Vec<u8> {
        let mut bytes = geometry.encode_prefix(body.len()).unwrap();
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn test_single_complete_frame() {
        let geometry = FrameGeometry::default();
        let mut buffer = FrameBuffer::new(geometry, 8192);

        let frames = buffer.push(&make_frame_bytes(&geometry, b"hello")).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_string_header_message() {
        let mut buffer = FrameBuffer::new(FrameGeometry::string(4), 8192);
        let frames = buffer.push(b"0007MESSAGE").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"MESSAGE");
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let geometry = FrameGeometry::binary(2);
        let mut buffer = FrameBuffer::new(geometry, 8192);

        let mut combined = Vec::new();
        combined.extend(make_frame_bytes(&geometry, b"first"));
        combined.extend(make_frame_bytes(&geometry, b"second"));
        combined.extend(make_frame_bytes(&geometry, b"third"));

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0][..], b"first");
        assert_eq!(&frames[1][..], b"second");
        assert_eq!(&frames[2][..], b"third");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_header() {
        let geometry = FrameGeometry::string(4);
        let mut buffer = FrameBuffer::new(geometry, 8192);
        let frame_bytes = make_frame_bytes(&geometry, b"test");

        let frames = buffer.push(&frame_bytes[..2]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");

        let frames = buffer.push(&frame_bytes[2..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"test");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_body() {
        let geometry = FrameGeometry::binary(2);
        let mut buffer = FrameBuffer::new(geometry, 8192);
        let body = b"0200B220000000000000000000000000";
        let frame_bytes = make_frame_bytes(&geometry, body);

        let partial_len = 2 + 10;
        let frames = buffer.push(&frame_bytes[..partial_len]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForBody");

        let frames = buffer.push(&frame_bytes[partial_len..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], body);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_empty_body() {
        let geometry = FrameGeometry::binary(2);
        let mut buffer = FrameBuffer::new(geometry, 8192);

        let frames = buffer.push(&[0x00, 0x00]).unwrap();

        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_empty());
    }

    #[test]
    fn test_max_frame_length_inclusive() {
        let geometry = FrameGeometry::binary(2);
        let mut buffer = FrameBuffer::new(geometry, 100);

        let body = vec![0xAB; 100];
        let frames = buffer.push(&make_frame_bytes(&geometry, &body)).unwrap();
        assert_eq!(frames[0].len(), 100);
    }

    #[test]
    fn test_frame_too_large() {
        let mut buffer = FrameBuffer::new(FrameGeometry::binary(2), 100);

        // Header claims 1000 bytes, nothing else needed to fail
        let result = buffer.push(&1000u16.to_be_bytes());

        assert!(matches!(
            result,
            Err(ConnectorError::FrameTooLarge { length: 1000, max: 100 })
        ));
    }

    #[test]
    fn test_header_offset_is_stripped() {
        let geometry = FrameGeometry::binary(2).with_offset(2);
        let mut buffer = FrameBuffer::new(geometry, 8192);

        let frames = buffer.push(&[0xAA, 0xBB, 0x00, 0x03, b'a', b'b', b'c']).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"abc");
    }

    #[test]
    fn test_length_adjustment() {
        // Length field also counts itself: 2 header bytes + 3 body bytes
        let geometry = FrameGeometry::binary(2).with_adjustment(-2);
        let mut buffer = FrameBuffer::new(geometry, 8192);

        let frames = buffer.push(&[0x00, 0x05, b'x', b'y', b'z']).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"xyz");
    }

    #[test]
    fn test_raw_mode_emits_buffered_bytes() {
        let mut buffer = FrameBuffer::new(FrameGeometry::raw(), 8192);
        let frames = buffer.push(b"08002220000000000000").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"08002220000000000000");
        assert!(buffer.push(b"").unwrap().is_empty());
    }

    #[test]
    fn test_raw_mode_too_large() {
        let mut buffer = FrameBuffer::new(FrameGeometry::raw(), 4);
        assert!(matches!(
            buffer.push(b"12345"),
            Err(ConnectorError::FrameTooLarge { length: 5, max: 4 })
        ));
    }

    #[test]
    fn test_clear_resets_state() {
        let geometry = FrameGeometry::binary(2);
        let mut buffer = FrameBuffer::new(geometry, 8192);
        let frame_bytes = make_frame_bytes(&geometry, b"test");

        buffer.push(&frame_bytes[..3]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForBody");
        assert_eq!(buffer.len(), 1);

        buffer.clear();

        assert_eq!(buffer.state_name(), "WaitingForHeader");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let geometry = FrameGeometry::string(4);
        let mut buffer = FrameBuffer::new(geometry, 8192);
        let frame_bytes = make_frame_bytes(&geometry, b"hi");

        let mut all_frames = Vec::new();
        for byte in &frame_bytes {
            all_frames.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all_frames.len(), 1);
        assert_eq!(&all_frames[0][..], b"hi");
    }
}
