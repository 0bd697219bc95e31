//! Fixed-point float transport used in message payloads.
//!
//! Values cross the wire as `round((v + 2) * 1000)` packed into an unsigned
//! 32-bit little-endian integer. The +2 bias keeps small negative values
//! (attitude angles in radians, normalized sticks) positive; the scale
//! preserves three decimal places. Both ends of the link use this codec.

use libm::roundf;

/// Encode a float for transport.
#[inline]
#[must_use]
pub fn encode_scaled(value: f32) -> [u8; 4] {
    let scaled = roundf((value + 2.0) * 1000.0) as u32;
    scaled.to_le_bytes()
}

/// Decode a transported float.
///
/// Returns `None` if fewer than four bytes are available.
#[inline]
#[must_use]
pub fn decode_scaled(bytes: &[u8]) -> Option<f32> {
    let raw = u32::from_le_bytes(bytes.get(..4)?.try_into().ok()?);
    Some(raw as f32 / 1000.0 - 2.0)
}
