//! Response framing for outbound MSP messages.
//!
//! [`ResponseBuilder`] writes a framed response into a caller-provided
//! buffer, keeping the running XOR checksum as payload bytes are appended:
//!
//! ```text
//! $M> <size> <type> <payload...> <checksum>
//! ```
//!
//! # Example
//!
//! ```
//! use msp_proto::{message, ResponseBuilder};
//!
//! let mut buf = [0u8; 32];
//! let len = ResponseBuilder::new(&mut buf, message::ATTITUDE, 3)
//!     .unwrap()
//!     .f32(0.1)
//!     .f32(-0.2)
//!     .f32(1.57)
//!     .finish();
//!
//! assert_eq!(&buf[..3], b"$M>");
//! assert_eq!(buf[3], 12); // three 4-byte floats
//! assert_eq!(len, 18);    // header + payload + checksum
//! ```

use crate::codec::encode_scaled;

/// Frame bytes that are not payload: `$M>`, size, type, checksum.
const OVERHEAD: usize = 6;

/// Largest frame the builder will produce (payload capped at the parser's
/// limit on the other end).
pub const MAX_FRAME_SIZE: usize = crate::parser::MAX_PAYLOAD_SIZE + OVERHEAD;

/// Error type for response construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BuildError {
    /// The destination buffer cannot hold the declared frame.
    BufferTooSmall,
}

/// Incremental builder for one outbound frame.
///
/// Created with the payload size declared up front (it is part of the
/// header and the checksum); [`finish`](Self::finish) appends the checksum
/// and returns the total frame length.
pub struct ResponseBuilder<'a> {
    buf: &'a mut [u8],
    len: usize,
    checksum: u8,
}

impl<'a> ResponseBuilder<'a> {
    /// Start a response frame of `message_type` with `payload_len` bytes of
    /// payload to follow.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::BufferTooSmall`] if `buf` cannot hold the
    /// complete frame.
    pub fn new(buf: &'a mut [u8], message_type: u8, payload_len: u8) -> Result<Self, BuildError> {
        if buf.len() < payload_len as usize + OVERHEAD {
            return Err(BuildError::BufferTooSmall);
        }

        buf[0] = b'$';
        buf[1] = b'M';
        buf[2] = b'>';
        buf[3] = payload_len;
        buf[4] = message_type;

        Ok(Self {
            buf,
            len: 5,
            checksum: payload_len ^ message_type,
        })
    }

    /// Append one raw payload byte.
    #[must_use]
    pub fn u8(mut self, byte: u8) -> Self {
        self.buf[self.len] = byte;
        self.checksum ^= byte;
        self.len += 1;
        self
    }

    /// Append a float in the scaled transport encoding.
    #[must_use]
    pub fn f32(mut self, value: f32) -> Self {
        for byte in encode_scaled(value) {
            self = self.u8(byte);
        }
        self
    }

    /// Append the checksum and return the total frame length.
    #[must_use]
    pub fn finish(self) -> usize {
        self.buf[self.len] = self.checksum;
        self.len + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_scaled;
    use crate::parser::{MspParser, ParseEvent};

    #[test]
    fn test_empty_payload_frame() {
        let mut buf = [0u8; 8];
        let len = ResponseBuilder::new(&mut buf, 100, 0).unwrap().finish();
        assert_eq!(&buf[..len], &[b'$', b'M', b'>', 0, 100, 100]);
    }

    #[test]
    fn test_checksum_covers_size_type_payload() {
        let mut buf = [0u8; 16];
        let len = ResponseBuilder::new(&mut buf, 10, 2)
            .unwrap()
            .u8(0xAA)
            .u8(0x55)
            .finish();
        assert_eq!(buf[len - 1], 2 ^ 10 ^ 0xAA ^ 0x55);
    }

    #[test]
    fn test_buffer_too_small() {
        let mut buf = [0u8; 8];
        assert_eq!(
            ResponseBuilder::new(&mut buf, 122, 12).err(),
            Some(BuildError::BufferTooSmall)
        );
    }

    #[test]
    fn test_response_parses_back() {
        let mut buf = [0u8; 32];
        let len = ResponseBuilder::new(&mut buf, 122, 12)
            .unwrap()
            .f32(0.25)
            .f32(-0.5)
            .f32(3.0)
            .finish();

        let mut parser = MspParser::new();
        let mut request = None;
        for &b in &buf[..len] {
            if let ParseEvent::Request(req) = parser.parse(b) {
                request = Some(req);
            }
        }

        let req = request.expect("frame did not parse");
        assert_eq!(req.message_type, 122);
        assert_eq!(req.payload.len(), 12);
        let phi = decode_scaled(&req.payload[0..4]).unwrap();
        assert!((phi - 0.25).abs() < 0.001);
    }
}
