//! Ground-station serial task.
//!
//! Parses inbound MSP requests and answers with receiver and attitude
//! snapshots. The one inbound command with a side effect is the per-motor
//! test override, which is buffered here and only ever reaches the ESC
//! while the vehicle is disarmed.

use msp_proto::{message, MspParser, ParseEvent, ResponseBuilder, MAX_FRAME_SIZE};

use crate::types::{StickValues, VehicleState, MAX_SUPPORTED_MOTORS};

/// Upper bound on bytes drained per task slot, keeping the task's
/// worst-case execution time bounded.
const MAX_BYTES_PER_RUN: usize = 128;

/// Two-method serial capability handed in by the platform.
pub trait SerialIo {
    /// Next inbound byte, if any.
    fn read_byte(&mut self) -> Option<u8>;

    /// Queue outbound bytes.
    fn write(&mut self, bytes: &[u8]);
}

/// MSP exchange task.
pub struct TelemetryTask<S: SerialIo> {
    port: S,
    parser: MspParser,
    motor_overrides: [f32; MAX_SUPPORTED_MOTORS],
}

impl<S: SerialIo> TelemetryTask<S> {
    #[must_use]
    pub fn new(port: S) -> Self {
        Self {
            port,
            parser: MspParser::new(),
            motor_overrides: [0.0; MAX_SUPPORTED_MOTORS],
        }
    }

    /// Drain inbound bytes and answer completed requests.
    pub fn run(&mut self, vstate: &VehicleState, sticks: &StickValues, armed: bool) {
        for _ in 0..MAX_BYTES_PER_RUN {
            let Some(byte) = self.port.read_byte() else {
                break;
            };

            match self.parser.parse(byte) {
                ParseEvent::Request(request) => {
                    self.dispatch(request.message_type, &request.payload, vstate, sticks, armed);
                }
                ParseEvent::Error(_) => {
                    // Frame discarded, parser already reset.
                }
                ParseEvent::None => {}
            }
        }
    }

    /// Motor test values commanded from the ground station, normalized
    /// [0, 1] per motor. Only meaningful while disarmed.
    #[must_use]
    pub fn motor_overrides(&self) -> &[f32; MAX_SUPPORTED_MOTORS] {
        &self.motor_overrides
    }

    fn dispatch(
        &mut self,
        message_type: u8,
        payload: &[u8],
        vstate: &VehicleState,
        sticks: &StickValues,
        armed: bool,
    ) {
        let mut buf = [0u8; MAX_FRAME_SIZE];

        match message_type {
            message::RC_CHANNELS => {
                if let Ok(builder) = ResponseBuilder::new(&mut buf, message::RC_CHANNELS, 24) {
                    let len = builder
                        .f32(sticks.throttle)
                        .f32(sticks.roll)
                        .f32(sticks.pitch)
                        .f32(sticks.yaw)
                        .f32(sticks.aux1)
                        .f32(sticks.aux2)
                        .finish();
                    self.port.write(&buf[..len]);
                }
            }
            message::ATTITUDE => {
                if let Ok(builder) = ResponseBuilder::new(&mut buf, message::ATTITUDE, 12) {
                    let len = builder
                        .f32(vstate.phi)
                        .f32(vstate.theta)
                        .f32(vstate.psi)
                        .finish();
                    self.port.write(&buf[..len]);
                }
            }
            message::SET_MOTOR => {
                if armed {
                    return;
                }
                if let [index, percent] = payload {
                    let index = *index as usize;
                    if (1..=MAX_SUPPORTED_MOTORS).contains(&index) {
                        self.motor_overrides[index - 1] = (*percent).min(100) as f32 / 100.0;
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use super::*;
    use msp_proto::decode_scaled;

    struct LoopbackPort {
        inbound: Vec<u8>,
        cursor: usize,
        outbound: Vec<u8>,
    }

    impl LoopbackPort {
        fn with(frame: &[u8]) -> Self {
            Self {
                inbound: frame.into(),
                cursor: 0,
                outbound: Vec::new(),
            }
        }
    }

    impl SerialIo for &mut LoopbackPort {
        fn read_byte(&mut self) -> Option<u8> {
            let byte = *self.inbound.get(self.cursor)?;
            self.cursor += 1;
            Some(byte)
        }

        fn write(&mut self, bytes: &[u8]) {
            self.outbound.extend_from_slice(bytes);
        }
    }

    fn request(message_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = std::vec![b'$', b'M', b'<', payload.len() as u8, message_type];
        out.extend_from_slice(payload);
        let crc = payload
            .iter()
            .fold(payload.len() as u8 ^ message_type, |acc, &b| acc ^ b);
        out.push(crc);
        out
    }

    #[test]
    fn test_attitude_request_answered() {
        let mut port = LoopbackPort::with(&request(122, &[]));
        let mut task = TelemetryTask::new(&mut port);

        let vstate = VehicleState {
            phi: 0.25,
            theta: -0.5,
            psi: 1.0,
            ..Default::default()
        };
        task.run(&vstate, &StickValues::default(), false);

        let reply = &port.outbound;
        assert_eq!(&reply[..3], b"$M>");
        assert_eq!(reply[3], 12);
        assert_eq!(reply[4], 122);
        assert_eq!(reply.len(), 18);

        let phi = decode_scaled(&reply[5..9]).unwrap();
        let theta = decode_scaled(&reply[9..13]).unwrap();
        assert!((phi - 0.25).abs() < 0.001);
        assert!((theta + 0.5).abs() < 0.001);

        // Checksum covers size, type, payload.
        let crc = reply[5..17].iter().fold(12u8 ^ 122, |acc, &b| acc ^ b);
        assert_eq!(*reply.last().unwrap(), crc);
    }

    #[test]
    fn test_rc_channels_request_answered() {
        let mut port = LoopbackPort::with(&request(121, &[]));
        let mut task = TelemetryTask::new(&mut port);

        let sticks = StickValues {
            throttle: 1000.0,
            roll: 1500.0,
            pitch: 1500.0,
            yaw: 1500.0,
            aux1: 1000.0,
            aux2: 1500.0,
        };
        task.run(&VehicleState::default(), &sticks, false);

        let reply = &port.outbound;
        assert_eq!(reply[3], 24);
        assert_eq!(reply[4], 121);
        let throttle = decode_scaled(&reply[5..9]).unwrap();
        assert!((throttle - 1000.0).abs() < 0.001);
    }

    #[test]
    fn test_motor_override_while_disarmed() {
        let mut port = LoopbackPort::with(&request(215, &[2, 50]));
        let mut task = TelemetryTask::new(&mut port);
        task.run(&VehicleState::default(), &StickValues::default(), false);

        assert_eq!(task.motor_overrides()[1], 0.5);
        assert!(port.outbound.is_empty(), "no response expected");
    }

    #[test]
    fn test_motor_override_ignored_while_armed() {
        let mut port = LoopbackPort::with(&request(215, &[2, 50]));
        let mut task = TelemetryTask::new(&mut port);
        task.run(&VehicleState::default(), &StickValues::default(), true);

        assert_eq!(task.motor_overrides()[1], 0.0);
    }

    #[test]
    fn test_motor_override_bad_index_ignored() {
        let mut frame = request(215, &[0, 50]);
        frame.extend_from_slice(&request(215, &[9, 50]));
        let mut port = LoopbackPort::with(&frame);
        let mut task = TelemetryTask::new(&mut port);
        task.run(&VehicleState::default(), &StickValues::default(), false);

        assert_eq!(task.motor_overrides(), &[0.0; MAX_SUPPORTED_MOTORS]);
    }

    #[test]
    fn test_corrupt_frame_no_side_effect() {
        let mut frame = request(122, &[]);
        *frame.last_mut().unwrap() ^= 0xFF;
        let mut port = LoopbackPort::with(&frame);
        let mut task = TelemetryTask::new(&mut port);
        task.run(&VehicleState::default(), &StickValues::default(), false);

        assert!(port.outbound.is_empty());
    }

    #[test]
    fn test_unknown_request_ignored() {
        let mut port = LoopbackPort::with(&request(99, &[]));
        let mut task = TelemetryTask::new(&mut port);
        task.run(&VehicleState::default(), &StickValues::default(), false);
        assert!(port.outbound.is_empty());
    }
}
