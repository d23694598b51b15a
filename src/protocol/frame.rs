//! Frame codec combining geometry and size limit.
//!
//! Uses `bytes::Bytes` for zero-copy body sharing.
//!
//! # Example
//!
//! ```
//! use iso8583_connector::protocol::{FrameCodec, FrameGeometry};
//!
//! let codec = FrameCodec::new(FrameGeometry::string(4), 8192);
//! let frame = codec.build_frame(b"MESSAGE").unwrap();
//! assert_eq!(&frame[..], b"0007MESSAGE");
//!
//! let mut decoder = codec.decoder();
//! let bodies = decoder.push(&frame).unwrap();
//! assert_eq!(&bodies[0][..], b"MESSAGE");
//! ```

use bytes::Bytes;

use super::frame_buffer::FrameBuffer;
use super::wire_format::{FrameGeometry, DEFAULT_MAX_FRAME_LENGTH};
use crate::error::{ConnectorError, Result};

/// An encoded frame ready for the writer: prefix and body kept apart so
/// they can be written with a single vectored write.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Offset padding and length field (empty when unframed).
    pub prefix: Bytes,
    /// Message body.
    pub body: Bytes,
}

impl EncodedFrame {
    /// Total size of this frame (prefix + body).
    #[inline]
    pub fn size(&self) -> usize {
        self.prefix.len() + self.body.len()
    }
}

/// Encoder/decoder factory for one framing configuration.
///
/// Cheap to copy; every connection gets its own [`FrameBuffer`] from
/// [`decoder`](Self::decoder).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    geometry: FrameGeometry,
    max_frame_length: usize,
}

impl FrameCodec {
    /// Create a codec for the given geometry and maximum body length.
    pub fn new(geometry: FrameGeometry, max_frame_length: usize) -> Self {
        Self {
            geometry,
            max_frame_length,
        }
    }

    /// Frame geometry.
    #[inline]
    pub fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }

    /// Maximum body length.
    #[inline]
    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Fresh per-connection decode buffer.
    pub fn decoder(&self) -> FrameBuffer {
        FrameBuffer::new(self.geometry, self.max_frame_length)
    }

    /// Frame a body, keeping prefix and body as separate buffers.
    ///
    /// Bodies longer than the maximum frame length are rejected so the
    /// peer never receives a frame it would have to treat as fatal.
    pub fn encode(&self, body: Bytes) -> Result<EncodedFrame> {
        if body.len() > self.max_frame_length {
            return Err(ConnectorError::FrameTooLarge {
                length: body.len() as u64,
                max: self.max_frame_length,
            });
        }
        let prefix = self.geometry.encode_prefix(body.len())?;
        Ok(EncodedFrame {
            prefix: Bytes::from(prefix),
            body,
        })
    }

    /// Build a contiguous frame (prefix + body).
    pub fn build_frame(&self, body: &[u8]) -> Result<Vec<u8>> {
        let encoded = self.encode(Bytes::copy_from_slice(body))?;
        let mut frame = Vec::with_capacity(encoded.size());
        frame.extend_from_slice(&encoded.prefix);
        frame.extend_from_slice(&encoded.body);
        Ok(frame)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(FrameGeometry::default(), DEFAULT_MAX_FRAME_LENGTH)
    }
}
