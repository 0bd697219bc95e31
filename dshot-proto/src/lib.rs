//! DShot ESC protocol frame packing and command mapping.
//!
//! DShot is a digital one-wire ESC protocol. Each frame is 16 bits, sent
//! MSB first on the wire by the driver layer:
//!
//! ```text
//! [11-bit command] [1 telemetry-request bit] [4-bit checksum]
//! ```
//!
//! Commands 0-47 are reserved for special functions (motor stop, beeps,
//! settings); 48-2047 are throttle. This crate produces frame words and
//! maps normalized throttle values onto the command range; shifting the
//! bits onto a timer/DMA peripheral is the driver's job.
//!
//! # Example
//!
//! ```
//! use dshot_proto::{pack_frame, throttle_to_command, CMD_MOTOR_STOP};
//!
//! // Half throttle, no telemetry request.
//! let frame = pack_frame(throttle_to_command(0.5), false);
//! assert_eq!(frame >> 4 >> 1, throttle_to_command(0.5));
//!
//! // Stop frame.
//! let stop = pack_frame(CMD_MOTOR_STOP, false);
//! assert_eq!(stop, 0);
//! ```
//!
//! # Features
//!
//! - **`std`**: Enable standard library support (for host testing)
//! - **`defmt`**: Enable defmt formatting (for embedded logging)
//!
//! # No-std Support
//!
//! This crate is `#![no_std]` by default and uses no heap allocations.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

/// Motor stop command (command 0).
pub const CMD_MOTOR_STOP: u16 = 0;

/// Lowest throttle command; 0-47 are reserved special commands.
pub const MIN_THROTTLE_COMMAND: u16 = 48;

/// Highest throttle command (11-bit ceiling).
pub const MAX_THROTTLE_COMMAND: u16 = 2047;

/// DShot output rate variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DshotRate {
    Dshot150,
    Dshot300,
    Dshot600,
    Dshot1000,
}

impl DshotRate {
    /// Wire bit rate in bits per second.
    #[must_use]
    pub const fn bit_rate_bps(self) -> u32 {
        match self {
            DshotRate::Dshot150 => 150_000,
            DshotRate::Dshot300 => 300_000,
            DshotRate::Dshot600 => 600_000,
            DshotRate::Dshot1000 => 1_000_000,
        }
    }

    /// Duration of one wire bit in nanoseconds.
    #[must_use]
    pub const fn bit_period_ns(self) -> u32 {
        1_000_000_000 / self.bit_rate_bps()
    }

    /// Duration of one 16-bit frame in microseconds, rounded up.
    #[must_use]
    pub const fn frame_period_us(self) -> u32 {
        (16 * self.bit_period_ns()).div_ceil(1000)
    }
}

/// Pack a command into a 16-bit frame word.
///
/// The command is truncated to 11 bits; the checksum is the XOR of the
/// three nibbles of the command-plus-telemetry field.
#[inline]
#[must_use]
pub fn pack_frame(command: u16, telemetry: bool) -> u16 {
    let value = ((command & 0x07FF) << 1) | telemetry as u16;
    let crc = (value ^ (value >> 4) ^ (value >> 8)) & 0x0F;
    (value << 4) | crc
}

/// Extract the 11-bit command from a frame word.
#[inline]
#[must_use]
pub fn frame_command(frame: u16) -> u16 {
    frame >> 5
}

/// Verify a frame word's checksum nibble.
#[inline]
#[must_use]
pub fn frame_checksum_ok(frame: u16) -> bool {
    let value = frame >> 4;
    let crc = (value ^ (value >> 4) ^ (value >> 8)) & 0x0F;
    crc == frame & 0x0F
}

/// Map a normalized throttle value in [0, 1] onto the throttle command
/// range [48, 2047].
///
/// Values at or below zero produce [`MIN_THROTTLE_COMMAND`]; use
/// [`CMD_MOTOR_STOP`] explicitly to stop a motor.
#[inline]
#[must_use]
pub fn throttle_to_command(throttle: f32) -> u16 {
    let t = if throttle < 0.0 {
        0.0
    } else if throttle > 1.0 {
        1.0
    } else {
        throttle
    };
    let span = (MAX_THROTTLE_COMMAND - MIN_THROTTLE_COMMAND) as f32;
    MIN_THROTTLE_COMMAND + (t * span + 0.5) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_frame_is_zero() {
        assert_eq!(pack_frame(CMD_MOTOR_STOP, false), 0);
    }

    #[test]
    fn test_known_frame() {
        // Command 1046 with telemetry requested packs to 0x82D7:
        // value 0x82D, checksum 0x82D ^ 0x082 ^ 0x008 = nibble 0x7.
        let frame = pack_frame(1046, true);
        assert_eq!(frame, 0x82D7);
        assert_eq!(frame_command(frame), 1046);
        assert!(frame_checksum_ok(frame));
        assert_eq!(frame & 0x10, 0x10); // telemetry bit
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let frame = pack_frame(1000, false);
        assert!(frame_checksum_ok(frame));
        assert!(!frame_checksum_ok(frame ^ 0x0020));
    }

    #[test]
    fn test_command_roundtrip() {
        for command in [0u16, 48, 100, 1024, 2047] {
            for telemetry in [false, true] {
                let frame = pack_frame(command, telemetry);
                assert_eq!(frame_command(frame), command);
                assert!(frame_checksum_ok(frame));
            }
        }
    }

    #[test]
    fn test_throttle_endpoints() {
        assert_eq!(throttle_to_command(0.0), MIN_THROTTLE_COMMAND);
        assert_eq!(throttle_to_command(1.0), MAX_THROTTLE_COMMAND);
        assert_eq!(throttle_to_command(-0.5), MIN_THROTTLE_COMMAND);
        assert_eq!(throttle_to_command(2.0), MAX_THROTTLE_COMMAND);
    }

    #[test]
    fn test_throttle_monotonic() {
        let mut last = 0;
        for i in 0..=100 {
            let cmd = throttle_to_command(i as f32 / 100.0);
            assert!(cmd >= last);
            last = cmd;
        }
    }

    #[test]
    fn test_rates() {
        assert_eq!(DshotRate::Dshot600.bit_rate_bps(), 600_000);
        assert_eq!(DshotRate::Dshot600.bit_period_ns(), 1666);
        assert_eq!(DshotRate::Dshot150.frame_period_us(), 107);
        assert_eq!(DshotRate::Dshot1000.frame_period_us(), 16);
    }
}
