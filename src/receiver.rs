//! Receiver processing pipeline.
//!
//! Raw protocol frames come in through a [`ReceiverDevice`]; what comes out
//! of [`Receiver::get_demands`] is a smoothed, rate-limited setpoint record
//! ready for the mixer. In between sit channel ranging, per-channel
//! signal-loss handling with a hold window, the failsafe overlay, stick
//! command shaping, and the adaptive smoothing bank.
//!
//! [`Receiver::check`] runs cheap and often (it drives the receiver task's
//! dynamic priority); [`Receiver::poll`] advances a four-phase state
//! machine so no single outer-task slot does all the work at once.

use crate::arming::THROTTLE_DOWN_US;
use crate::clock::wrapping_delta;
use crate::failsafe::{FailsafeMonitor, POWER_ON_DELAY_US};
use crate::smoothing::{SetpointSmoother, RATE_MAX_US, RATE_MIN_US};
use crate::types::{Demands, StickValues, RATE_LIMIT_DPS};

use libm::{fabsf, fminf, powf};
use sbus_proto::{sbus_to_pulse_us, SbusParser};

/// Channel slots carried through the pipeline.
pub const CHANNEL_COUNT: usize = 18;

/// Primary channel slots.
pub const THROTTLE: usize = 0;
pub const ROLL: usize = 1;
pub const PITCH: usize = 2;
pub const YAW: usize = 3;
/// Arm switch.
pub const AUX1: usize = 4;
pub const AUX2: usize = 5;

/// Pulse validity window; samples outside it are treated as signal loss.
const PULSE_VALID_MIN: f32 = 885.0;
const PULSE_VALID_MAX: f32 = 2115.0;

/// Wider ranging window applied to the primary channels before validity
/// analysis.
const PULSE_RANGE_MIN: f32 = 750.0;
const PULSE_RANGE_MAX: f32 = 2250.0;

/// How long an invalid channel holds its last valid value.
const MAX_INVALID_PULSE_MS: u32 = 300;

/// Without a complete frame for this long, the signal counts as lost.
const NEED_SIGNAL_MAX_DELAY_US: u32 = 1_000_000 / 10;

/// Forced processing floor when no frames arrive (data-driven otherwise).
const UPDATE_FLOOR_DELAY_US: u32 = 1_000_000 / 15;

/// Arm switch threshold.
const AUX1_SET_US: f32 = 1200.0;

/// Rate-shaping configuration (percent-style units).
const RC_RATE: f32 = 7.0;
const RATE: f32 = 67.0;
const RC_EXPO: f32 = 0.0;

const COMMAND_DIVIDER: f32 = 500.0;
const YAW_COMMAND_DIVIDER: f32 = 500.0;

/// Throttle expo table configuration.
const THR_MID: i32 = 50;
const THR_EXPO: i32 = 0;
const THROTTLE_LOOKUP_SIZE: usize = 12;

const PWM_MIN: f32 = 1000.0;
const PWM_MAX: f32 = 2000.0;

/// Frame status bits reported by a [`ReceiverDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameStatus(u8);

impl FrameStatus {
    /// No complete frame available.
    pub const PENDING: Self = Self(0);
    /// A frame completed since the last check.
    pub const COMPLETE: Self = Self(1 << 0);
    /// The protocol itself reports failsafe.
    pub const FAILSAFE: Self = Self(1 << 1);
    /// Out-of-band processing requested by the protocol.
    pub const PROCESSING_REQUIRED: Self = Self(1 << 2);
    /// The frame was corrupt or superseded.
    pub const DROPPED: Self = Self(1 << 3);

    /// Check whether all bits of `other` are set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Combine status bits.
    #[inline]
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Protocol decoder seam.
///
/// Implementations own frame assembly; the pipeline owns everything after.
pub trait ReceiverDevice {
    /// Feed one raw serial byte.
    fn parse_byte(&mut self, byte: u8, now_us: u32);

    /// If a frame has completed, copy its channels into `channels` (in
    /// protocol-native units), record its arrival time, and say so.
    fn check(&mut self, channels: &mut [u16; CHANNEL_COUNT], frame_time_us: &mut u32)
        -> FrameStatus;

    /// Convert one protocol-native channel value to a pulse width in
    /// microseconds.
    fn convert(&self, channels: &[u16; CHANNEL_COUNT], index: usize) -> f32;
}

/// Per-channel fallback policy once the hold window expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FailsafeChannelMode {
    /// Center the control surfaces, floor the throttle.
    Auto,
    /// Keep the last valid value.
    Hold,
    /// Step to `885 + 25 * step` microseconds.
    Set(u8),
    /// Unknown configuration; behaves as hold.
    Invalid,
}

/// Pipeline poll phases, advanced one per task slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    Check,
    Process,
    Modes,
    Update,
}

/// What one call to [`Receiver::poll`] accomplished.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollOutput {
    /// The process phase ran on fresh channel data.
    pub processed: bool,
    /// Commands were refreshed; the next `get_demands` sees new data.
    pub got_new_data: bool,
    /// Control-law integrator reset request (throttle down), reported when
    /// the process phase runs.
    pub pid_reset: Option<bool>,
    /// The failsafe monitor tripped during this poll.
    pub failsafe_tripped: bool,
}

/// Receiver pipeline over a protocol decoder.
pub struct Receiver<D: ReceiverDevice> {
    device: D,
    phase: Phase,

    channel_data: [u16; CHANNEL_COUNT],
    raw: [f32; CHANNEL_COUNT],
    invalid_pulse_deadline_ms: [u32; CHANNEL_COUNT],
    failsafe_modes: [FailsafeChannelMode; CHANNEL_COUNT],

    command: [f32; 3],
    command_throttle: f32,
    throttle_lookup: [i32; THROTTLE_LOOKUP_SIZE],
    throttle_lookup_ready: bool,

    signal_received: bool,
    in_failsafe_mode: bool,
    data_processing_required: bool,
    auxiliary_processing_required: bool,
    got_new_data: bool,

    need_signal_before_us: u32,
    next_update_at_us: u32,
    last_frame_time_us: u32,
    previous_frame_time_us: u32,
    frame_time_delta_us: i32,
    last_rx_time_us: u32,
    refresh_period_us: u32,
    rate_valid: bool,

    smoother: SetpointSmoother,
    data_to_smooth: Demands,
}

impl<D: ReceiverDevice> Receiver<D> {
    /// Create a pipeline around a protocol decoder; `loop_period_s` is the
    /// inner-loop period the smoothing filters run at.
    #[must_use]
    pub fn new(device: D, loop_period_s: f32) -> Self {
        let mut failsafe_modes = [FailsafeChannelMode::Hold; CHANNEL_COUNT];
        for mode in failsafe_modes.iter_mut().take(4) {
            *mode = FailsafeChannelMode::Auto;
        }

        Self {
            device,
            phase: Phase::Check,
            channel_data: [0; CHANNEL_COUNT],
            raw: [0.0; CHANNEL_COUNT],
            invalid_pulse_deadline_ms: [0; CHANNEL_COUNT],
            failsafe_modes,
            command: [0.0; 3],
            command_throttle: PWM_MIN,
            throttle_lookup: [0; THROTTLE_LOOKUP_SIZE],
            throttle_lookup_ready: false,
            signal_received: false,
            in_failsafe_mode: false,
            data_processing_required: false,
            auxiliary_processing_required: false,
            got_new_data: false,
            need_signal_before_us: 0,
            next_update_at_us: 0,
            last_frame_time_us: 0,
            previous_frame_time_us: 0,
            frame_time_delta_us: 0,
            last_rx_time_us: 0,
            refresh_period_us: 0,
            rate_valid: false,
            smoother: SetpointSmoother::new(loop_period_s),
            data_to_smooth: Demands::zero(),
        }
    }

    /// Feed one raw serial byte to the protocol decoder.
    pub fn parse_byte(&mut self, byte: u8, now_us: u32) {
        self.device.parse_byte(byte, now_us);
    }

    /// Cheap frame-status check; returns true when a poll is worthwhile.
    ///
    /// Runs from the task prioritizer on every scheduling round, so the
    /// receiver task's priority tracks actual frame arrival.
    pub fn check(&mut self, now_us: u32) -> bool {
        if self.phase != Phase::Check {
            return true;
        }

        let status = self
            .device
            .check(&mut self.channel_data, &mut self.last_frame_time_us);

        let mut signal_received = false;
        if status.contains(FrameStatus::COMPLETE) {
            self.in_failsafe_mode = status.contains(FrameStatus::FAILSAFE);
            let dropped = status.contains(FrameStatus::DROPPED);
            signal_received = !(self.in_failsafe_mode || dropped);
            if signal_received {
                self.need_signal_before_us = now_us.wrapping_add(NEED_SIGNAL_MAX_DELAY_US);
            }
        }

        if status.contains(FrameStatus::PROCESSING_REQUIRED) {
            self.auxiliary_processing_required = true;
        }

        if signal_received {
            self.signal_received = true;
        } else if wrapping_delta(now_us, self.need_signal_before_us) >= 0 {
            self.signal_received = false;
        }

        // Data driven, with a timer floor so failsafe analysis keeps
        // running when frames stop.
        if signal_received || wrapping_delta(now_us, self.next_update_at_us) > 0 {
            self.data_processing_required = true;
        }

        self.data_processing_required || self.auxiliary_processing_required
    }

    /// Advance one pipeline phase.
    pub fn poll(&mut self, now_us: u32, failsafe: &mut FailsafeMonitor) -> PollOutput {
        let mut out = PollOutput::default();

        match self.phase {
            Phase::Check => {
                self.phase = Phase::Process;
            }
            Phase::Process => {
                if self.calculate_channels(now_us, failsafe, &mut out) {
                    out.processed = true;
                    out.pid_reset = Some(self.process_data(now_us, failsafe));
                    self.phase = Phase::Modes;
                } else {
                    self.phase = Phase::Check;
                }
            }
            Phase::Modes => {
                // Arming decisions happen outside the pipeline while it
                // sits in this phase.
                self.phase = Phase::Update;
            }
            Phase::Update => {
                self.update_commands();
                self.got_new_data = true;
                out.got_new_data = true;
                self.phase = Phase::Check;
            }
        }

        out
    }

    /// Smoothed demands for the inner loop.
    ///
    /// Runs every core tick: new channel data is shaped into raw setpoints
    /// once, and the smoothing filters advance every call.
    pub fn get_demands(&mut self, now_us: u32) -> Demands {
        if self.got_new_data {
            self.smoother.on_frame(
                now_us / 1000,
                self.refresh_period_us,
                self.rate_valid,
                self.signal_received,
            );

            self.data_to_smooth = Demands {
                throttle: self.command_throttle,
                roll: raw_setpoint(self.command[0], COMMAND_DIVIDER),
                pitch: raw_setpoint(self.command[1], COMMAND_DIVIDER),
                yaw: raw_setpoint(self.command[2], YAW_COMMAND_DIVIDER),
            };

            self.got_new_data = false;
        }

        let smoothed = self.smoother.smooth(&self.data_to_smooth);

        Demands {
            throttle: ((smoothed.throttle - PWM_MIN) / (PWM_MAX - PWM_MIN)).clamp(0.0, 1.0),
            roll: smoothed.roll,
            pitch: smoothed.pitch,
            yaw: smoothed.yaw,
        }
    }

    /// Raw stick values after ranging and failsafe overlay, for telemetry.
    #[must_use]
    pub fn sticks(&self) -> StickValues {
        StickValues {
            throttle: self.raw[THROTTLE],
            roll: self.raw[ROLL],
            pitch: self.raw[PITCH],
            yaw: self.raw[YAW],
            aux1: self.raw[AUX1],
            aux2: self.raw[AUX2],
        }
    }

    /// Current pipeline phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Arm switch currently raised.
    #[must_use]
    pub fn aux1_is_set(&self) -> bool {
        self.raw[AUX1] > AUX1_SET_US
    }

    /// Throttle stick at its low position.
    #[must_use]
    pub fn throttle_is_down(&self) -> bool {
        self.raw[THROTTLE] < THROTTLE_DOWN_US
    }

    /// Frames are arriving and the protocol is not in failsafe.
    #[must_use]
    pub fn has_signal(&self) -> bool {
        self.signal_received
    }

    /// The overlay has fallen back to failsafe values.
    #[must_use]
    pub fn in_failsafe(&self) -> bool {
        self.in_failsafe_mode
    }

    /// Smoothing state, for diagnostics.
    #[must_use]
    pub fn smoother(&self) -> &SetpointSmoother {
        &self.smoother
    }

    fn calculate_channels(
        &mut self,
        now_us: u32,
        failsafe: &mut FailsafeMonitor,
        out: &mut PollOutput,
    ) -> bool {
        if self.auxiliary_processing_required {
            // Hook for protocols needing out-of-band work; nothing consumes
            // it today.
            self.auxiliary_processing_required = false;
        }

        if !self.data_processing_required {
            return false;
        }
        self.data_processing_required = false;
        self.next_update_at_us = now_us.wrapping_add(UPDATE_FLOOR_DELAY_US);

        self.read_channels_apply_ranges();
        self.apply_signal_loss_behaviour(now_us, failsafe, out);
        true
    }

    fn read_channels_apply_ranges(&mut self) {
        for channel in 0..CHANNEL_COUNT {
            let mut sample = self.device.convert(&self.channel_data, channel);
            if channel < 4 && sample != 0.0 {
                // A zero sample is a protocol timeout marker; leave it
                // alone so validity analysis sees it.
                sample = sample.clamp(PULSE_RANGE_MIN, PULSE_RANGE_MAX);
            }
            self.raw[channel] = sample;
        }
    }

    fn apply_signal_loss_behaviour(
        &mut self,
        now_us: u32,
        failsafe: &mut FailsafeMonitor,
        out: &mut PollOutput,
    ) {
        let now_ms = now_us / 1000;
        let use_value_from_rx = self.signal_received && !self.in_failsafe_mode;

        let mut flight_channels_valid = true;

        for channel in 0..CHANNEL_COUNT {
            let sample = self.raw[channel];
            let valid_pulse = use_value_from_rx && pulse_is_valid(sample);

            if valid_pulse {
                self.invalid_pulse_deadline_ms[channel] =
                    now_ms.wrapping_add(MAX_INVALID_PULSE_MS);
            } else if wrapping_delta(now_ms, self.invalid_pulse_deadline_ms[channel]) < 0 {
                // Inside the hold window: keep the previous value.
                continue;
            } else {
                self.raw[channel] = self.fail_value(channel);
                if channel < 4 {
                    flight_channels_valid = false;
                }
            }
        }

        if flight_channels_valid {
            failsafe.on_valid_data_received(now_us);
        } else {
            self.in_failsafe_mode = true;
            out.failsafe_tripped = failsafe.on_valid_data_failed(now_us);
            for channel in 0..CHANNEL_COUNT {
                self.raw[channel] = self.fail_value(channel);
            }
        }
    }

    fn fail_value(&self, channel: usize) -> f32 {
        match self.failsafe_modes[channel] {
            FailsafeChannelMode::Auto => {
                if channel == ROLL || channel == PITCH || channel == YAW {
                    1500.0
                } else {
                    885.0
                }
            }
            FailsafeChannelMode::Hold | FailsafeChannelMode::Invalid => self.raw[channel],
            FailsafeChannelMode::Set(step) => 885.0 + 25.0 * step as f32,
        }
    }

    fn process_data(&mut self, now_us: u32, failsafe: &mut FailsafeMonitor) -> bool {
        let (frame_delta, frame_age) = self.frame_delta(now_us);

        let mut refresh_period = frame_delta;
        if refresh_period == 0 || wrapping_delta(now_us, self.last_rx_time_us) <= frame_age {
            // The protocol supplied no usable timestamp delta; measure at
            // the poll boundary instead.
            refresh_period = wrapping_delta(now_us, self.last_rx_time_us);
        }
        self.last_rx_time_us = now_us;

        self.rate_valid = (refresh_period as u32) >= RATE_MIN_US
            && (refresh_period as u32) <= RATE_MAX_US;
        self.refresh_period_us =
            refresh_period.clamp(RATE_MIN_US as i32, RATE_MAX_US as i32) as u32;

        if now_us > POWER_ON_DELAY_US && !failsafe.is_monitoring() {
            failsafe.start_monitoring(now_us);
        }

        self.throttle_is_down()
    }

    fn frame_delta(&mut self, now_us: u32) -> (i32, i32) {
        let frame_time = self.last_frame_time_us;
        let frame_age = wrapping_delta(now_us, frame_time);

        let delta = wrapping_delta(frame_time, self.previous_frame_time_us);
        if delta != 0 {
            self.frame_time_delta_us = delta;
            self.previous_frame_time_us = frame_time;
        }

        (self.frame_time_delta_us, frame_age)
    }

    fn update_commands(&mut self) {
        self.command[0] = stick_command(self.raw[ROLL], 1.0);
        self.command[1] = stick_command(self.raw[PITCH], 1.0);
        self.command[2] = stick_command(self.raw[YAW], -1.0);

        let constrained = self.raw[THROTTLE].clamp(THROTTLE_DOWN_US, PWM_MAX);
        let normalized =
            ((constrained - THROTTLE_DOWN_US) * (PWM_MIN / (PWM_MAX - THROTTLE_DOWN_US))) as i32;
        self.command_throttle = self.lookup_throttle(normalized) as f32;
    }

    /// Expo-table throttle mapping from [0, 1000] onto [PWM_MIN, PWM_MAX].
    fn lookup_throttle(&mut self, value: i32) -> i32 {
        if !self.throttle_lookup_ready {
            for i in 0..THROTTLE_LOOKUP_SIZE {
                let tmp = 10 * i as i32 - THR_MID;
                let y = if tmp > 0 {
                    100 - THR_MID
                } else if tmp < 0 {
                    THR_MID
                } else {
                    1
                };
                let expo = 10 * THR_MID + tmp * (100 - THR_EXPO + THR_EXPO * (tmp * tmp) / (y * y)) / 10;
                self.throttle_lookup[i] =
                    PWM_MIN as i32 + (PWM_MAX as i32 - PWM_MIN as i32) * expo / 1000;
            }
            self.throttle_lookup_ready = true;
        }

        let index = (value / 100).clamp(0, THROTTLE_LOOKUP_SIZE as i32 - 2) as usize;
        let base = self.throttle_lookup[index];
        base + (value - index as i32 * 100) * (self.throttle_lookup[index + 1] - base) / 100
    }
}

#[inline]
fn pulse_is_valid(sample: f32) -> bool {
    (PULSE_VALID_MIN..=PULSE_VALID_MAX).contains(&sample)
}

/// Symmetric stick command around the 1500 us center, capped at half the
/// stick range.
fn stick_command(raw: f32, sign: f32) -> f32 {
    let tmp = fminf(fabsf(raw - 1500.0), 500.0);
    let command = tmp * sign;
    if raw < 1500.0 {
        -command
    } else {
        command
    }
}

/// Apply the configured rates curve to a normalized command.
fn apply_rates(command: f32, command_abs: f32) -> f32 {
    let expo = RC_EXPO / 100.0;
    let expo_term = command_abs * (powf(command, 5.0) * expo + command * (1.0 - expo));

    let center_sensitivity = RC_RATE * 10.0;
    let stick_movement = (RATE * 10.0 - center_sensitivity).max(0.0);

    command * center_sensitivity + stick_movement * expo_term
}

/// Raw rate setpoint in degrees/second from a stick command.
fn raw_setpoint(command: f32, divider: f32) -> f32 {
    let normalized = command / divider;
    let angle_rate = apply_rates(normalized, fabsf(normalized));
    angle_rate.clamp(-RATE_LIMIT_DPS, RATE_LIMIT_DPS)
}

/// SBUS-backed protocol decoder.
///
/// Slots 0-15 carry the proportional channels; 16 and 17 mirror the two
/// digital channels.
pub struct SbusDevice {
    parser: SbusParser,
    channels: [u16; CHANNEL_COUNT],
    frame_time_us: u32,
    frame_available: bool,
    failsafe: bool,
    frame_lost: bool,
}

impl SbusDevice {
    #[must_use]
    pub fn new() -> Self {
        Self {
            parser: SbusParser::new(),
            channels: [0; CHANNEL_COUNT],
            frame_time_us: 0,
            frame_available: false,
            failsafe: false,
            frame_lost: false,
        }
    }
}

impl Default for SbusDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiverDevice for SbusDevice {
    fn parse_byte(&mut self, byte: u8, now_us: u32) {
        if let Some(frame) = self.parser.push(byte) {
            self.channels[..16].copy_from_slice(&frame.channels);
            self.channels[16] = frame.flags.ch17 as u16;
            self.channels[17] = frame.flags.ch18 as u16;
            self.failsafe = frame.flags.failsafe;
            self.frame_lost = frame.flags.frame_lost;
            self.frame_time_us = now_us;
            self.frame_available = true;
        }
    }

    fn check(
        &mut self,
        channels: &mut [u16; CHANNEL_COUNT],
        frame_time_us: &mut u32,
    ) -> FrameStatus {
        if !self.frame_available {
            return FrameStatus::PENDING;
        }
        self.frame_available = false;

        *channels = self.channels;
        *frame_time_us = self.frame_time_us;

        let mut status = FrameStatus::COMPLETE;
        if self.failsafe {
            status = status.with(FrameStatus::FAILSAFE);
        }
        if self.frame_lost {
            status = status.with(FrameStatus::DROPPED);
        }
        status
    }

    fn convert(&self, channels: &[u16; CHANNEL_COUNT], index: usize) -> f32 {
        if index < 16 {
            sbus_to_pulse_us(channels[index]) as f32
        } else {
            // Digital channels map to clean switch endpoints.
            if channels[index] != 0 {
                2000.0
            } else {
                1000.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted device: channels are plain microsecond values, frames are
    /// surfaced on demand.
    struct ScriptedDevice {
        channels: [u16; CHANNEL_COUNT],
        frame_time_us: u32,
        pending: bool,
        status_extra: FrameStatus,
    }

    impl ScriptedDevice {
        fn new() -> Self {
            Self {
                channels: [1500; CHANNEL_COUNT],
                frame_time_us: 0,
                pending: false,
                status_extra: FrameStatus::PENDING,
            }
        }

        fn deliver(&mut self, channels: &[u16], now_us: u32) {
            self.channels[..channels.len()].copy_from_slice(channels);
            self.frame_time_us = now_us;
            self.pending = true;
        }
    }

    impl ReceiverDevice for ScriptedDevice {
        fn parse_byte(&mut self, _byte: u8, _now_us: u32) {}

        fn check(
            &mut self,
            channels: &mut [u16; CHANNEL_COUNT],
            frame_time_us: &mut u32,
        ) -> FrameStatus {
            if !self.pending {
                return FrameStatus::PENDING;
            }
            self.pending = false;
            *channels = self.channels;
            *frame_time_us = self.frame_time_us;
            FrameStatus::COMPLETE.with(self.status_extra)
        }

        fn convert(&self, channels: &[u16; CHANNEL_COUNT], index: usize) -> f32 {
            channels[index] as f32
        }
    }

    fn pipeline() -> (Receiver<ScriptedDevice>, FailsafeMonitor) {
        (
            Receiver::new(ScriptedDevice::new(), 1.0 / 8000.0),
            FailsafeMonitor::new(),
        )
    }

    /// Deliver a frame and run the pipeline through one full cycle.
    fn run_cycle(
        rx: &mut Receiver<ScriptedDevice>,
        failsafe: &mut FailsafeMonitor,
        channels: &[u16],
        now_us: u32,
    ) -> PollOutput {
        rx.device.deliver(channels, now_us);
        run_cycle_no_frame(rx, failsafe, now_us)
    }

    /// Run one full poll cycle without delivering a frame.
    fn run_cycle_no_frame(
        rx: &mut Receiver<ScriptedDevice>,
        failsafe: &mut FailsafeMonitor,
        now_us: u32,
    ) -> PollOutput {
        rx.check(now_us);
        let mut merged = PollOutput::default();
        for _ in 0..4 {
            let out = rx.poll(now_us, failsafe);
            merged.processed |= out.processed;
            merged.got_new_data |= out.got_new_data;
            merged.failsafe_tripped |= out.failsafe_tripped;
            if out.pid_reset.is_some() {
                merged.pid_reset = out.pid_reset;
            }
        }
        merged
    }

    const CENTERED: [u16; 6] = [1000, 1500, 1500, 1500, 1000, 1500];

    #[test]
    fn test_centered_sticks_produce_zero_setpoints() {
        let (mut rx, mut failsafe) = pipeline();
        let out = run_cycle(&mut rx, &mut failsafe, &CENTERED, 20_000);
        assert!(out.processed);
        assert!(out.got_new_data);

        let demands = rx.get_demands(21_000);
        assert_eq!(demands.roll, 0.0);
        assert_eq!(demands.pitch, 0.0);
        assert_eq!(demands.yaw, 0.0);
        assert_eq!(demands.throttle, 0.0);
    }

    #[test]
    fn test_full_deflection_setpoint() {
        let (mut rx, mut failsafe) = pipeline();
        let mut channels = CENTERED;
        channels[ROLL] = 2000;
        run_cycle(&mut rx, &mut failsafe, &channels, 20_000);

        let demands = rx.get_demands(21_000);
        // Full stick: command 500/500 = 1, rates give 70 + 600 = 670 deg/s.
        assert!((demands.roll - 670.0).abs() < 1.0, "roll = {}", demands.roll);
        assert!(demands.roll <= RATE_LIMIT_DPS);
    }

    #[test]
    fn test_yaw_sign_inverted() {
        let (mut rx, mut failsafe) = pipeline();
        let mut channels = CENTERED;
        channels[YAW] = 2000;
        run_cycle(&mut rx, &mut failsafe, &channels, 20_000);

        let demands = rx.get_demands(21_000);
        assert!(demands.yaw < 0.0);
    }

    #[test]
    fn test_throttle_mapping() {
        let (mut rx, mut failsafe) = pipeline();

        let mut channels = CENTERED;
        channels[THROTTLE] = 2000;
        run_cycle(&mut rx, &mut failsafe, &channels, 20_000);
        assert!((rx.get_demands(21_000).throttle - 1.0).abs() < 1e-3);

        channels[THROTTLE] = 1050;
        run_cycle(&mut rx, &mut failsafe, &channels, 120_000);
        assert_eq!(rx.get_demands(121_000).throttle, 0.0);

        // Below the idle floor still reads zero.
        channels[THROTTLE] = 900;
        run_cycle(&mut rx, &mut failsafe, &channels, 220_000);
        assert_eq!(rx.get_demands(221_000).throttle, 0.0);
    }

    #[test]
    fn test_demands_always_within_limits() {
        let (mut rx, mut failsafe) = pipeline();
        let mut now = 20_000;
        for &(t, r, p, y) in &[
            (885u16, 885u16, 2115u16, 885u16),
            (2115, 2115, 885, 2115),
            (1500, 2250, 750, 2250),
        ] {
            let channels = [t, r, p, y, 1000, 1500];
            run_cycle(&mut rx, &mut failsafe, &channels, now);
            let demands = rx.get_demands(now + 1000);
            assert!((0.0..=1.0).contains(&demands.throttle));
            for axis in [demands.roll, demands.pitch, demands.yaw] {
                assert!(axis.abs() <= RATE_LIMIT_DPS);
            }
            now += 100_000;
        }
    }

    #[test]
    fn test_invalid_pulse_holds_then_falls_back() {
        let (mut rx, mut failsafe) = pipeline();

        let mut channels = CENTERED;
        channels[ROLL] = 1700;
        run_cycle(&mut rx, &mut failsafe, &channels, 1_000_000);
        assert_eq!(rx.sticks().roll, 1700.0);

        // Roll goes invalid (pulse below the validity window).
        channels[ROLL] = 800;
        run_cycle(&mut rx, &mut failsafe, &channels, 1_100_000);
        assert_eq!(rx.sticks().roll, 1700.0, "held inside the window");

        // Still held at 250 ms...
        run_cycle(&mut rx, &mut failsafe, &channels, 1_250_000);
        assert_eq!(rx.sticks().roll, 1700.0);

        // ...but past 300 ms the fallback applies and, being a flight
        // channel, the whole frame degrades.
        run_cycle(&mut rx, &mut failsafe, &channels, 1_350_000);
        assert_eq!(rx.sticks().roll, 1500.0);
        assert!(rx.in_failsafe());
    }

    #[test]
    fn test_aux_channel_fallback_holds() {
        let (mut rx, mut failsafe) = pipeline();

        let mut channels = CENTERED;
        channels[AUX2] = 1800;
        run_cycle(&mut rx, &mut failsafe, &channels, 1_000_000);
        assert_eq!(rx.sticks().aux2, 1800.0);

        // Invalid aux pulse: held forever (hold mode), frame stays valid.
        channels[AUX2] = 100;
        for i in 0..10 {
            run_cycle(&mut rx, &mut failsafe, &channels, 1_100_000 + i * 100_000);
        }
        assert_eq!(rx.sticks().aux2, 1800.0);
        assert!(!rx.in_failsafe());
    }

    #[test]
    fn test_signal_loss_times_out() {
        let (mut rx, mut failsafe) = pipeline();
        run_cycle(&mut rx, &mut failsafe, &CENTERED, 1_000_000);
        assert!(rx.has_signal());

        // No frames for 150 ms; the 15 Hz floor keeps processing alive and
        // the signal flag drops after the 100 ms deadline.
        run_cycle_no_frame(&mut rx, &mut failsafe, 1_150_000);
        assert!(!rx.has_signal());
    }

    #[test]
    fn test_switch_accessors() {
        let (mut rx, mut failsafe) = pipeline();
        let mut channels = CENTERED;
        channels[THROTTLE] = 1000;
        channels[AUX1] = 2000;
        run_cycle(&mut rx, &mut failsafe, &channels, 20_000);
        assert!(rx.aux1_is_set());
        assert!(rx.throttle_is_down());

        channels[AUX1] = 1000;
        channels[THROTTLE] = 1600;
        run_cycle(&mut rx, &mut failsafe, &channels, 120_000);
        assert!(!rx.aux1_is_set());
        assert!(!rx.throttle_is_down());
    }

    #[test]
    fn test_protocol_failsafe_flag_drops_signal() {
        let (mut rx, mut failsafe) = pipeline();
        run_cycle(&mut rx, &mut failsafe, &CENTERED, 1_000_000);
        assert!(rx.has_signal());

        rx.device.status_extra = FrameStatus::FAILSAFE;
        rx.device.deliver(&CENTERED, 1_120_000);
        rx.check(1_120_000);
        assert!(rx.in_failsafe());
    }

    #[test]
    fn test_sbus_device_maps_channels() {
        let mut device = SbusDevice::new();
        let mut channels = [0u16; CHANNEL_COUNT];
        channels[0] = sbus_proto::SBUS_CENTER;
        channels[16] = 1;
        assert_eq!(device.convert(&channels, 0), 1500.0);
        assert_eq!(device.convert(&channels, 16), 2000.0);
        assert_eq!(device.convert(&channels, 17), 1000.0);

        // No frame parsed yet.
        let mut out = [0u16; CHANNEL_COUNT];
        let mut t = 0;
        assert_eq!(device.check(&mut out, &mut t), FrameStatus::PENDING);
    }
}
