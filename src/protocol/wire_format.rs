//! Length header encoding and decoding.
//!
//! A frame on the wire looks like:
//! ```text
//! ┌──────────────┬──────────────────┬──────────────┐
//! │ Offset bytes │ Length field     │ Message body │
//! │ header_offset│ header_length    │ N bytes      │
//! │ (ignored)    │ BE uint or ASCII │              │
//! └──────────────┴──────────────────┴──────────────┘
//! ```
//!
//! The length field counts body bytes only. `length_adjustment` is added
//! to the decoded value to get the body length, and subtracted when
//! encoding.

use crate::error::{ConnectorError, Result};

/// Default length of the frame length field, in bytes.
pub const DEFAULT_HEADER_LENGTH: usize = 2;

/// Default maximum body length.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8192;

/// Widest binary length field (a big-endian u64).
pub const MAX_BINARY_HEADER_LENGTH: usize = 8;

/// Widest string length field that still fits a u64 of decimal digits.
pub const MAX_STRING_HEADER_LENGTH: usize = 19;

/// Shape of the length-field framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Number of bytes of the length field; `0` disables framing.
    pub header_length: usize,
    /// Bytes preceding the length field.
    pub header_offset: usize,
    /// Value added to the decoded length to obtain the body length.
    pub length_adjustment: i32,
    /// Length field holds ASCII decimal digits instead of a binary integer.
    pub encode_as_string: bool,
}

impl FrameGeometry {
    /// Binary big-endian header of the given width.
    pub fn binary(header_length: usize) -> Self {
        Self {
            header_length,
            header_offset: 0,
            length_adjustment: 0,
            encode_as_string: false,
        }
    }

    /// ASCII zero-padded decimal header of the given width.
    pub fn string(header_length: usize) -> Self {
        Self {
            header_length,
            header_offset: 0,
            length_adjustment: 0,
            encode_as_string: true,
        }
    }

    /// Unframed mode: the transport keeps message boundaries.
    pub fn raw() -> Self {
        Self::binary(0)
    }

    /// Set the header offset.
    pub fn with_offset(mut self, header_offset: usize) -> Self {
        self.header_offset = header_offset;
        self
    }

    /// Set the length adjustment.
    pub fn with_adjustment(mut self, length_adjustment: i32) -> Self {
        self.length_adjustment = length_adjustment;
        self
    }

    /// Whether frames carry a length header at all.
    #[inline]
    pub fn is_framed(&self) -> bool {
        self.header_length > 0
    }

    /// Bytes before the body: offset plus length field.
    #[inline]
    pub fn prefix_length(&self) -> usize {
        if self.is_framed() {
            self.header_offset + self.header_length
        } else {
            0
        }
    }

    /// Check the geometry can be encoded and decoded.
    pub fn validate(&self) -> Result<()> {
        if self.encode_as_string {
            if self.header_length > MAX_STRING_HEADER_LENGTH {
                return Err(ConnectorError::InvalidConfig(format!(
                    "String length field of {} bytes exceeds {}",
                    self.header_length, MAX_STRING_HEADER_LENGTH
                )));
            }
        } else if self.header_length > MAX_BINARY_HEADER_LENGTH {
            return Err(ConnectorError::InvalidConfig(format!(
                "Binary length field of {} bytes exceeds {}",
                self.header_length, MAX_BINARY_HEADER_LENGTH
            )));
        }
        Ok(())
    }

    /// Decode the body length from a buffer holding at least
    /// [`prefix_length`](Self::prefix_length) bytes.
    ///
    /// The returned value already includes the length adjustment.
    pub fn decode_body_length(&self, buf: &[u8]) -> Result<u64> {
        debug_assert!(buf.len() >= self.prefix_length());
        let field = &buf[self.header_offset..self.header_offset + self.header_length];

        let raw = if self.encode_as_string {
            decode_ascii(field)?
        } else {
            decode_binary(field)
        };

        let adjusted = i128::from(raw) + i128::from(self.length_adjustment);
        if adjusted < 0 {
            return Err(ConnectorError::InvalidFrameLength(format!(
                "negative frame length {} (field value {}, adjustment {})",
                adjusted, raw, self.length_adjustment
            )));
        }
        u64::try_from(adjusted)
            .map_err(|_| ConnectorError::InvalidFrameLength(format!("frame length {} overflows", adjusted)))
    }

    /// Render the prefix (offset padding + length field) for a body of
    /// `body_length` bytes. Empty when unframed.
    pub fn encode_prefix(&self, body_length: usize) -> Result<Vec<u8>> {
        if !self.is_framed() {
            return Ok(Vec::new());
        }

        let value = body_length as i64 - i64::from(self.length_adjustment);
        if value < 0 {
            return Err(ConnectorError::InvalidFrameLength(format!(
                "body of {} bytes is shorter than adjustment {}",
                body_length, self.length_adjustment
            )));
        }

        let mut prefix = vec![0u8; self.header_offset];
        prefix.reserve(self.header_length);
        if self.encode_as_string {
            encode_ascii(value as u64, self.header_length, &mut prefix)?;
        } else {
            encode_binary(value as u64, self.header_length, &mut prefix)?;
        }
        Ok(prefix)
    }
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self::binary(DEFAULT_HEADER_LENGTH)
    }
}

/// Big-endian unsigned integer of 1..=8 bytes.
fn decode_binary(field: &[u8]) -> u64 {
    field
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// ASCII decimal digits, e.g. `b"0007"` → 7.
fn decode_ascii(field: &[u8]) -> Result<u64> {
    if field.is_empty() || !field.iter().all(u8::is_ascii_digit) {
        return Err(ConnectorError::InvalidFrameLength(format!(
            "length field {:?} is not a decimal number",
            String::from_utf8_lossy(field)
        )));
    }
    field.iter().try_fold(0u64, |acc, &b| {
        acc.checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(b - b'0')))
            .ok_or_else(|| ConnectorError::InvalidFrameLength("length field overflows".to_string()))
    })
}

fn encode_binary(value: u64, width: usize, out: &mut Vec<u8>) -> Result<()> {
    if width < MAX_BINARY_HEADER_LENGTH && value >> (8 * width) != 0 {
        return Err(ConnectorError::HeaderOverflow {
            value: value as i64,
            width,
        });
    }
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[MAX_BINARY_HEADER_LENGTH - width..]);
    Ok(())
}

fn encode_ascii(value: u64, width: usize, out: &mut Vec<u8>) -> Result<()> {
    let digits = format!("{:0width$}", value, width = width);
    if digits.len() > width {
        return Err(ConnectorError::HeaderOverflow {
            value: value as i64,
            width,
        });
    }
    out.extend_from_slice(digits.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry() {
        let geometry = FrameGeometry::default();
        assert_eq!(geometry.header_length, 2);
        assert_eq!(geometry.header_offset, 0);
        assert_eq!(geometry.length_adjustment, 0);
        assert!(!geometry.encode_as_string);
        assert_eq!(geometry.prefix_length(), 2);
    }

    #[test]
    fn test_ascii_header_message() {
        let geometry = FrameGeometry::string(4);
        let prefix = geometry.encode_prefix(7).unwrap();
        assert_eq!(prefix, b"0007");

        let mut frame = prefix.clone();
        frame.extend_from_slice(b"MESSAGE");
        assert_eq!(&frame[..], b"0007MESSAGE");
        assert_eq!(geometry.decode_body_length(&frame).unwrap(), 7);
    }

    #[test]
    fn test_binary_header_big_endian() {
        let geometry = FrameGeometry::binary(2);
        assert_eq!(geometry.encode_prefix(0x0102).unwrap(), vec![0x01, 0x02]);
        assert_eq!(geometry.decode_body_length(&[0x01, 0x02]).unwrap(), 0x0102);

        let geometry = FrameGeometry::binary(4);
        assert_eq!(
            geometry.encode_prefix(300).unwrap(),
            vec![0x00, 0x00, 0x01, 0x2C]
        );
    }

    #[test]
    fn test_binary_header_overflow() {
        let geometry = FrameGeometry::binary(1);
        assert!(geometry.encode_prefix(255).is_ok());
        let err = geometry.encode_prefix(256).unwrap_err();
        assert!(matches!(err, ConnectorError::HeaderOverflow { value: 256, width: 1 }));
    }

    #[test]
    fn test_ascii_header_overflow() {
        let geometry = FrameGeometry::string(2);
        assert_eq!(geometry.encode_prefix(99).unwrap(), b"99");
        let err = geometry.encode_prefix(100).unwrap_err();
        assert!(matches!(err, ConnectorError::HeaderOverflow { value: 100, width: 2 }));
    }

    #[test]
    fn test_ascii_header_rejects_non_digits() {
        let geometry = FrameGeometry::string(4);
        let err = geometry.decode_body_length(b"00x7").unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidFrameLength(_)));
        let err = geometry.decode_body_length(b" 007").unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidFrameLength(_)));
    }

    #[test]
    fn test_offset_and_adjustment() {
        let geometry = FrameGeometry::binary(2).with_offset(3).with_adjustment(-2);
        assert_eq!(geometry.prefix_length(), 5);

        // field value = body + 2
        let prefix = geometry.encode_prefix(10).unwrap();
        assert_eq!(prefix, vec![0, 0, 0, 0x00, 0x0C]);
        assert_eq!(geometry.decode_body_length(&prefix).unwrap(), 10);
    }

    #[test]
    fn test_negative_adjusted_length() {
        let geometry = FrameGeometry::binary(2).with_adjustment(-5);
        let err = geometry.decode_body_length(&[0x00, 0x02]).unwrap_err();
        assert!(err.to_string().contains("negative frame length"));
    }

    #[test]
    fn test_raw_geometry_has_no_prefix() {
        let geometry = FrameGeometry::raw();
        assert!(!geometry.is_framed());
        assert_eq!(geometry.prefix_length(), 0);
        assert!(geometry.encode_prefix(42).unwrap().is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(FrameGeometry::binary(8).validate().is_ok());
        assert!(FrameGeometry::binary(9).validate().is_err());
        assert!(FrameGeometry::string(19).validate().is_ok());
        assert!(FrameGeometry::string(20).validate().is_err());
    }

    #[test]
    fn test_eight_byte_binary_header() {
        let geometry = FrameGeometry::binary(8);
        let prefix = geometry.encode_prefix(1234).unwrap();
        assert_eq!(prefix.len(), 8);
        assert_eq!(geometry.decode_body_length(&prefix).unwrap(), 1234);
    }
}
