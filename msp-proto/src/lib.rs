//! MSP serial protocol framing for ground-station communication.
//!
//! This crate provides everything needed to speak the MSP request/response
//! protocol used between a flight controller and a ground station:
//!
//! - **Parsing**: [`MspParser`] - a streaming parser fed one byte at a time
//!   from a serial port, producing [`Request`] values when a complete,
//!   checksum-valid frame has arrived
//! - **Serialization**: [`ResponseBuilder`] - writes framed responses into a
//!   caller-provided buffer
//! - **Value transport**: [`encode_scaled`] / [`decode_scaled`] - the
//!   fixed-point float encoding used in message payloads
//!
//! # Frame Format
//!
//! Requests travel to the flight controller, responses back from it:
//!
//! ```text
//! request:  $M< <size> <type> <payload...> <checksum>
//! response: $M> <size> <type> <payload...> <checksum>
//! ```
//!
//! - `size` - payload length in bytes (0 for plain requests)
//! - `type` - message identifier (see [`message`])
//! - `checksum` - XOR of size, type, and every payload byte
//!
//! # Float Transport
//!
//! Floats are not sent as IEEE-754. Each value `v` travels as the unsigned
//! 32-bit little-endian integer `round((v + 2) * 1000)`. Both directions of
//! the link use the same encoding; see [`codec`].
//!
//! # Example
//!
//! ```
//! use msp_proto::{message, MspParser, ParseEvent};
//!
//! let mut parser = MspParser::new();
//!
//! // Feed an attitude request, byte by byte.
//! for &byte in b"$M<\x00\x7a\x7a" {
//!     match parser.parse(byte) {
//!         ParseEvent::Request(req) => {
//!             assert_eq!(req.message_type, message::ATTITUDE);
//!             assert!(req.payload.is_empty());
//!         }
//!         ParseEvent::None => {}
//!         ParseEvent::Error(_) => unreachable!(),
//!     }
//! }
//! ```
//!
//! # Features
//!
//! - **`std`**: Enable standard library support (for host testing)
//! - **`defmt`**: Enable defmt formatting (for embedded logging)
//!
//! # No-std Support
//!
//! This crate is `#![no_std]` by default and uses no heap allocations,
//! making it suitable for embedded systems with limited resources.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod builder;
pub mod codec;
pub mod parser;

pub use builder::{BuildError, ResponseBuilder, MAX_FRAME_SIZE};
pub use codec::{decode_scaled, encode_scaled};
pub use parser::{MspParser, ParseError, ParseEvent, Request, MAX_PAYLOAD_SIZE};

/// Message type identifiers handled by the flight controller.
pub mod message {
    /// Receiver stick values as six scaled floats:
    /// throttle, roll, pitch, yaw, aux1, aux2.
    pub const RC_CHANNELS: u8 = 121;

    /// Vehicle attitude as three scaled floats: phi, theta, psi (radians).
    pub const ATTITUDE: u8 = 122;

    /// Per-motor test override: two payload bytes, 1-based motor index and
    /// percent throttle. Only honored while disarmed.
    pub const SET_MOTOR: u8 = 215;
}
