//! Streaming parser for inbound MSP frames.
//!
//! The parser is a small state machine fed one byte at a time. A frame that
//! fails its checksum, overruns the payload buffer, or breaks the preamble
//! is discarded and the parser returns to idle without side effect, so a
//! noisy serial line can never wedge it.

use heapless::Vec;

/// Maximum payload the parser will accept.
///
/// The largest inbound payload in use is two bytes (motor override); the
/// headroom covers future message types without inviting unbounded frames.
pub const MAX_PAYLOAD_SIZE: usize = 64;

/// A complete, checksum-verified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Message type identifier (see [`crate::message`]).
    pub message_type: u8,
    /// Raw payload bytes (empty for plain requests).
    pub payload: Vec<u8, MAX_PAYLOAD_SIZE>,
}

/// Error type for parse failures.
///
/// Every error also resets the parser to idle; the caller only needs to
/// keep feeding bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// Final checksum byte did not match the running XOR.
    Checksum,
    /// Declared payload length exceeds [`MAX_PAYLOAD_SIZE`].
    PayloadTooLong,
}

/// Outcome of feeding one byte to the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum ParseEvent {
    /// Byte consumed, frame still in progress (or byte was noise).
    None,
    /// A complete frame was accepted.
    Request(Request),
    /// The in-progress frame was discarded.
    Error(ParseError),
}

/// Parser states, one per frame position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Hunting for `$`.
    Idle,
    /// Got `$`, expecting `M`.
    Preamble,
    /// Got `M`, expecting the direction byte (`<` or `>`).
    Direction,
    /// Expecting the payload size byte.
    Size,
    /// Expecting the message type byte.
    Type,
    /// Consuming `size` payload bytes, then the checksum.
    Payload,
}

/// Streaming MSP frame parser.
///
/// Feed serial bytes through [`parse`](Self::parse); completed frames come
/// back as [`ParseEvent::Request`].
#[derive(Debug)]
pub struct MspParser {
    state: State,
    size: u8,
    message_type: u8,
    checksum: u8,
    payload: Vec<u8, MAX_PAYLOAD_SIZE>,
}

impl MspParser {
    /// Create a parser in the idle state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            size: 0,
            message_type: 0,
            checksum: 0,
            payload: Vec::new(),
        }
    }

    /// Feed one byte from the serial stream.
    pub fn parse(&mut self, byte: u8) -> ParseEvent {
        match self.state {
            State::Idle => {
                if byte == b'$' {
                    self.state = State::Preamble;
                }
                ParseEvent::None
            }
            State::Preamble => {
                self.state = if byte == b'M' { State::Direction } else { State::Idle };
                ParseEvent::None
            }
            State::Direction => {
                self.state = match byte {
                    b'<' | b'>' => State::Size,
                    _ => State::Idle,
                };
                ParseEvent::None
            }
            State::Size => {
                if byte as usize > MAX_PAYLOAD_SIZE {
                    self.reset();
                    return ParseEvent::Error(ParseError::PayloadTooLong);
                }
                self.size = byte;
                self.checksum = byte;
                self.payload.clear();
                self.state = State::Type;
                ParseEvent::None
            }
            State::Type => {
                self.message_type = byte;
                self.checksum ^= byte;
                self.state = State::Payload;
                ParseEvent::None
            }
            State::Payload => {
                if self.payload.len() < self.size as usize {
                    // Capacity was checked against the size byte already.
                    let _ = self.payload.push(byte);
                    self.checksum ^= byte;
                    return ParseEvent::None;
                }

                // Payload complete; this byte is the checksum.
                let expected = self.checksum;
                let message_type = self.message_type;
                let payload = core::mem::take(&mut self.payload);
                self.reset();

                if byte == expected {
                    ParseEvent::Request(Request {
                        message_type,
                        payload,
                    })
                } else {
                    ParseEvent::Error(ParseError::Checksum)
                }
            }
        }
    }

    /// Discard any in-progress frame and return to idle.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.size = 0;
        self.message_type = 0;
        self.checksum = 0;
        self.payload.clear();
    }
}

impl Default for MspParser {
    fn default() -> Self {
        Self::new()
    }
}
