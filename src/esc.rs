//! Electronic speed controller seam and protocol-backed implementations.
//!
//! The core hands every motor value through [`Esc::motor_value`] (clamping
//! and failsafe zeroing), then issues one [`Esc::write`] per inner tick.
//! The conversion from values to wire frames lives here; pushing bits onto
//! timers/DMA is behind the small sink capabilities the orchestrator
//! injects at construction.

use dshot_proto::{pack_frame, throttle_to_command, DshotRate, CMD_MOTOR_STOP};

use crate::types::MAX_SUPPORTED_MOTORS;

/// Default digital idle: fraction of the throttle range added to every
/// spinning motor so props never fully stop while armed.
pub const DEFAULT_DIGITAL_IDLE: f32 = 0.045;

/// Time after [`Esc::begin`] during which the ESC refuses arming.
const WARMUP_US: u32 = 500_000;

/// Electronic speed controller abstraction.
pub trait Esc {
    /// Enable outputs. Called once at boot.
    fn begin(&mut self, now_us: u32);

    /// True once the protocol's post-enable warmup has elapsed; arming is
    /// denied while false.
    fn is_ready(&self, now_us: u32) -> bool;

    /// Clamp a mixer output into the commandable range, forcing zero while
    /// failsafed.
    fn motor_value(&self, value: f32, failsafe_active: bool) -> f32;

    /// Issue one output frame for all motors. `values` are normalized
    /// [0, 1]; zero means stopped.
    fn write(&mut self, values: &[f32]);

    /// Immediately command every motor to stop.
    fn stop(&mut self);
}

/// Capability for pushing packed DShot frame words to the wire.
pub trait FrameSink {
    /// Write one frame word per motor, in motor order.
    fn write_frames(&mut self, frames: &[u16]);
}

/// Capability for pushing classic PWM pulse widths to the wire.
pub trait PulseSink {
    /// Write one pulse width in microseconds per motor, in motor order.
    fn write_pulses(&mut self, widths_us: &[u16]);
}

/// DShot-backed ESC bank.
pub struct DshotEsc<S: FrameSink> {
    sink: S,
    motor_count: usize,
    rate: DshotRate,
    idle: f32,
    enabled_at_us: Option<u32>,
}

impl<S: FrameSink> DshotEsc<S> {
    /// Create a bank of `motor_count` outputs with the default digital
    /// idle.
    #[must_use]
    pub fn new(sink: S, motor_count: usize, rate: DshotRate) -> Self {
        Self {
            sink,
            motor_count: motor_count.min(MAX_SUPPORTED_MOTORS),
            rate,
            idle: DEFAULT_DIGITAL_IDLE,
            enabled_at_us: None,
        }
    }

    /// Configured output rate, for the driver layer's timer setup.
    #[must_use]
    pub fn rate(&self) -> DshotRate {
        self.rate
    }

    /// Override the digital idle fraction.
    #[must_use]
    pub fn with_idle(mut self, idle: f32) -> Self {
        self.idle = idle.clamp(0.0, 0.2);
        self
    }

    fn command_for(&self, value: f32) -> u16 {
        if value <= 0.0 {
            CMD_MOTOR_STOP
        } else {
            throttle_to_command(self.idle + value.min(1.0) * (1.0 - self.idle))
        }
    }
}

impl<S: FrameSink> Esc for DshotEsc<S> {
    fn begin(&mut self, now_us: u32) {
        self.enabled_at_us = Some(now_us);
        self.stop();
    }

    fn is_ready(&self, now_us: u32) -> bool {
        match self.enabled_at_us {
            Some(at) => now_us.wrapping_sub(at) >= WARMUP_US,
            None => false,
        }
    }

    fn motor_value(&self, value: f32, failsafe_active: bool) -> f32 {
        if failsafe_active {
            0.0
        } else {
            value.clamp(0.0, 1.0)
        }
    }

    fn write(&mut self, values: &[f32]) {
        let mut frames = [0u16; MAX_SUPPORTED_MOTORS];
        let count = values.len().min(self.motor_count);
        for (frame, &value) in frames.iter_mut().zip(values[..count].iter()) {
            *frame = pack_frame(self.command_for(value), false);
        }
        self.sink.write_frames(&frames[..count]);
    }

    fn stop(&mut self) {
        let frames = [pack_frame(CMD_MOTOR_STOP, false); MAX_SUPPORTED_MOTORS];
        self.sink.write_frames(&frames[..self.motor_count]);
    }
}

/// Classic PWM-backed ESC bank: 1000-2000 us pulses.
pub struct PwmEsc<S: PulseSink> {
    sink: S,
    motor_count: usize,
    enabled: bool,
}

impl<S: PulseSink> PwmEsc<S> {
    #[must_use]
    pub fn new(sink: S, motor_count: usize) -> Self {
        Self {
            sink,
            motor_count: motor_count.min(MAX_SUPPORTED_MOTORS),
            enabled: false,
        }
    }
}

impl<S: PulseSink> Esc for PwmEsc<S> {
    fn begin(&mut self, _now_us: u32) {
        self.enabled = true;
        self.stop();
    }

    fn is_ready(&self, _now_us: u32) -> bool {
        self.enabled
    }

    fn motor_value(&self, value: f32, failsafe_active: bool) -> f32 {
        if failsafe_active {
            0.0
        } else {
            value.clamp(0.0, 1.0)
        }
    }

    fn write(&mut self, values: &[f32]) {
        let mut widths = [1000u16; MAX_SUPPORTED_MOTORS];
        let count = values.len().min(self.motor_count);
        for (width, &value) in widths.iter_mut().zip(values[..count].iter()) {
            *width = 1000 + (value.clamp(0.0, 1.0) * 1000.0) as u16;
        }
        self.sink.write_pulses(&widths[..count]);
    }

    fn stop(&mut self) {
        let widths = [1000u16; MAX_SUPPORTED_MOTORS];
        self.sink.write_pulses(&widths[..self.motor_count]);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use super::*;

    struct RecordingSink {
        frames: Vec<Vec<u16>>,
    }

    impl FrameSink for &mut RecordingSink {
        fn write_frames(&mut self, frames: &[u16]) {
            self.frames.push(frames.into());
        }
    }

    #[test]
    fn test_not_ready_until_warmup_elapses() {
        let mut sink = RecordingSink { frames: Vec::new() };
        let mut esc = DshotEsc::new(&mut sink, 4, DshotRate::Dshot600);
        assert!(!esc.is_ready(0));
        esc.begin(1_000);
        assert!(!esc.is_ready(1_000));
        assert!(!esc.is_ready(400_000));
        assert!(esc.is_ready(501_000));
    }

    #[test]
    fn test_begin_writes_stop_frames() {
        let mut sink = RecordingSink { frames: Vec::new() };
        let mut esc = DshotEsc::new(&mut sink, 4, DshotRate::Dshot600);
        esc.begin(0);
        assert_eq!(sink.frames.len(), 1);
        assert_eq!(sink.frames[0], std::vec![0u16; 4]);
    }

    #[test]
    fn test_failsafe_forces_zero_value() {
        let mut sink = RecordingSink { frames: Vec::new() };
        let esc = DshotEsc::new(&mut sink, 4, DshotRate::Dshot600);
        assert_eq!(esc.motor_value(0.7, true), 0.0);
        assert_eq!(esc.motor_value(0.7, false), 0.7);
        assert_eq!(esc.motor_value(1.5, false), 1.0);
        assert_eq!(esc.motor_value(-0.2, false), 0.0);
    }

    #[test]
    fn test_idle_offset_applied_to_spinning_motors() {
        let mut sink = RecordingSink { frames: Vec::new() };
        let mut esc = DshotEsc::new(&mut sink, 2, DshotRate::Dshot600);
        esc.write(&[0.0, 0.5]);

        let frames = &sink.frames[0];
        // Zero demand stays a stop frame, no idle applied.
        assert_eq!(frames[0], 0);
        // Half throttle sits above the plain mapping by the idle margin.
        let spinning = dshot_proto::frame_command(frames[1]);
        assert!(spinning > throttle_to_command(0.5));
        assert!(spinning < throttle_to_command(0.6));
    }

    #[test]
    fn test_pwm_write_pulse_range() {
        struct PulseRecorder {
            pulses: Vec<Vec<u16>>,
        }
        impl PulseSink for &mut PulseRecorder {
            fn write_pulses(&mut self, widths_us: &[u16]) {
                self.pulses.push(widths_us.into());
            }
        }

        let mut rec = PulseRecorder { pulses: Vec::new() };
        let mut esc = PwmEsc::new(&mut rec, 4);
        esc.begin(0);
        esc.write(&[0.0, 0.5, 1.0, 2.0]);
        assert_eq!(rec.pulses[1], std::vec![1000, 1500, 2000, 2000]);
    }
}
