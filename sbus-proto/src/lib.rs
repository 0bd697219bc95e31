//! SBUS receiver protocol parsing and channel mapping.
//!
//! This crate provides chip-agnostic SBUS frame parsing and conversion of
//! raw channel values to the microsecond pulse widths the rest of the
//! control pipeline works in. It is designed to be fed from any UART
//! implementation, one byte at a time.
//!
//! # Features
//!
//! - Streaming 25-byte frame parser with automatic resync
//! - 16 proportional channels (11-bit) plus two digital channels
//! - Failsafe and frame-lost flag decoding
//! - No chip-specific dependencies - works on any platform
//! - Fully testable on host
//!
//! # Example
//!
//! ```ignore
//! use sbus_proto::{sbus_to_pulse_us, SbusParser};
//!
//! let mut parser = SbusParser::new();
//!
//! // Feed bytes from UART
//! for byte in uart_bytes {
//!     if let Some(frame) = parser.push(byte) {
//!         let throttle_us = sbus_to_pulse_us(frame.channels[2]);
//!         if frame.flags.failsafe {
//!             // Receiver lost the transmitter...
//!         }
//!     }
//! }
//! ```
//!
//! # UART Configuration
//!
//! SBUS uses inverted UART at 100000 baud, 8E2:
//! - Baud rate: 100000
//! - Data bits: 8
//! - Parity: Even
//! - Stop bits: 2
//! - Signal: inverted (invert at the GPIO/UART level so the parser sees
//!   normal bytes)

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod mapping;
pub mod parser;

pub use mapping::{
    pulse_us_to_sbus, sbus_to_pulse_us, SBUS_CENTER, SBUS_MAX, SBUS_MIN,
};
pub use parser::{SbusFlags, SbusFrame, SbusParser, FRAME_SIZE, PROPORTIONAL_CHANNELS};

/// SBUS baud rate.
pub const SBUS_BAUDRATE: u32 = 100_000;
