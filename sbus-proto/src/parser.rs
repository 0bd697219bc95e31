//! Streaming SBUS frame parser.
//!
//! An SBUS frame is exactly 25 bytes:
//!
//! ```text
//! [0x0F] [22 bytes: 16 channels x 11 bits, LSB first] [flags] [end]
//! ```
//!
//! The flags byte carries the two digital channels plus the receiver's own
//! link diagnosis (frame lost, failsafe engaged). The end byte is `0x00`
//! for plain SBUS; SBUS2 telemetry slots use `0x04`/`0x14`/`0x24`/`0x34`.

/// SBUS frame length in bytes.
pub const FRAME_SIZE: usize = 25;

/// Number of proportional (11-bit) channels per frame.
pub const PROPORTIONAL_CHANNELS: usize = 16;

const HEADER: u8 = 0x0F;

const FLAG_CH17: u8 = 1 << 0;
const FLAG_CH18: u8 = 1 << 1;
const FLAG_FRAME_LOST: u8 = 1 << 2;
const FLAG_FAILSAFE: u8 = 1 << 3;

/// Link and digital-channel flags from the frame's flags byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbusFlags {
    /// Digital channel 17.
    pub ch17: bool,
    /// Digital channel 18.
    pub ch18: bool,
    /// Receiver missed the previous frame.
    pub frame_lost: bool,
    /// Receiver has engaged its own failsafe (transmitter link lost).
    pub failsafe: bool,
}

impl SbusFlags {
    fn from_byte(byte: u8) -> Self {
        Self {
            ch17: byte & FLAG_CH17 != 0,
            ch18: byte & FLAG_CH18 != 0,
            frame_lost: byte & FLAG_FRAME_LOST != 0,
            failsafe: byte & FLAG_FAILSAFE != 0,
        }
    }
}

/// One decoded SBUS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbusFrame {
    /// Proportional channel values, 11-bit (0-2047, nominal 172-1811).
    pub channels: [u16; PROPORTIONAL_CHANNELS],
    /// Digital channels and link flags.
    pub flags: SbusFlags,
}

/// Streaming SBUS parser.
///
/// Feed UART bytes through [`push`](Self::push); a decoded frame is
/// returned for every complete, well-formed 25-byte sequence. A byte that
/// breaks the frame structure drops the partial frame and the parser hunts
/// for the next header byte.
#[derive(Debug)]
pub struct SbusParser {
    buf: [u8; FRAME_SIZE],
    len: usize,
}

impl SbusParser {
    /// Create a parser waiting for a frame header.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: [0; FRAME_SIZE],
            len: 0,
        }
    }

    /// Feed one byte; returns a frame when the 25th byte completes one.
    pub fn push(&mut self, byte: u8) -> Option<SbusFrame> {
        if self.len == 0 {
            if byte != HEADER {
                return None;
            }
            self.buf[0] = byte;
            self.len = 1;
            return None;
        }

        self.buf[self.len] = byte;
        self.len += 1;

        if self.len < FRAME_SIZE {
            return None;
        }
        self.len = 0;

        if !is_end_byte(self.buf[FRAME_SIZE - 1]) {
            // Out of sync; drop the frame and resync on the next header.
            return None;
        }

        Some(SbusFrame {
            channels: unpack_channels(&self.buf[1..23]),
            flags: SbusFlags::from_byte(self.buf[23]),
        })
    }

    /// Drop any partial frame (e.g. after a UART error).
    pub fn reset(&mut self) {
        self.len = 0;
    }
}

impl Default for SbusParser {
    fn default() -> Self {
        Self::new()
    }
}

fn is_end_byte(byte: u8) -> bool {
    byte == 0x00 || matches!(byte, 0x04 | 0x14 | 0x24 | 0x34)
}

/// Unpack 16 channels of 11 bits each from 22 data bytes, LSB first.
fn unpack_channels(data: &[u8]) -> [u16; PROPORTIONAL_CHANNELS] {
    debug_assert_eq!(data.len(), 22);

    let mut channels = [0u16; PROPORTIONAL_CHANNELS];
    let mut bit_offset = 0usize;

    for channel in channels.iter_mut() {
        let byte = bit_offset / 8;
        let shift = bit_offset % 8;

        let mut value = (data[byte] as u32) >> shift;
        value |= (data[byte + 1] as u32) << (8 - shift);
        if shift > 5 {
            value |= (data[byte + 2] as u32) << (16 - shift);
        }

        *channel = (value & 0x07FF) as u16;
        bit_offset += 11;
    }

    channels
}
