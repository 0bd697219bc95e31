//! Adaptive setpoint smoothing.
//!
//! Stick demands are low-passed with third-order filters whose cutoffs are
//! derived from the measured receiver frame rate. The frame rate is learned
//! in three phases:
//!
//! 1. a startup delay after power-on during which nothing is trained;
//! 2. initial training: average a block of frame intervals (discarding the
//!    min and max) to get `average_frame_time_us`;
//! 3. retraining: once running, a contiguous block of intervals diverging
//!    from the average by the rate-change threshold re-trains the average,
//!    guarded so it cannot re-trigger immediately.
//!
//! Intervals outside the plausible receiver range are excluded outright.

use libm::{fabsf, roundf};

use crate::filters::Pt3;
use crate::types::Demands;

/// Frame intervals to average during initial training.
pub const TRAINING_SAMPLES: u32 = 50;

/// Frame intervals to average when retraining after a rate change.
pub const RETRAINING_SAMPLES: u32 = 20;

/// Quiet period after power-on before any training.
pub const STARTUP_DELAY_MS: u32 = 5_000;

/// Additional wait after the first valid frame before initial training.
pub const TRAINING_DELAY_MS: u32 = 1_000;

/// Guard period before retraining may begin.
pub const RETRAINING_DELAY_MS: u32 = 2_000;

/// Interval divergence (percent of current average) that counts toward
/// retraining.
pub const RATE_CHANGE_PERCENT: f32 = 20.0;

/// Floor for every derived cutoff.
pub const CUTOFF_MIN_HZ: u16 = 15;

/// Feedforward cutoff assumed until the link rate is known.
pub const FEEDFORWARD_INITIAL_HZ: u16 = 100;

/// Default auto-smoothness factor (higher = smoother = lower cutoff).
pub const AUTO_SMOOTHNESS_DEFAULT: u8 = 30;

/// Shortest frame interval accepted for training (fits a 1 kHz link).
pub const RATE_MIN_US: u32 = 950;

/// Longest frame interval accepted for training (~15 Hz link).
pub const RATE_MAX_US: u32 = 65_500;

/// Setpoint smoothing filter bank with frame-rate training.
pub struct SetpointSmoother {
    auto_smoothness_setpoint: u8,
    auto_smoothness_throttle: u8,

    average_frame_time_us: u32,
    setpoint_cutoff_hz: u16,
    throttle_cutoff_hz: u16,
    feedforward_cutoff_hz: u16,

    filter_throttle: Pt3,
    filter_roll: Pt3,
    filter_pitch: Pt3,
    filter_yaw: Pt3,
    filter_deflection_roll: Pt3,
    filter_deflection_pitch: Pt3,

    initialized: bool,
    training_sum: f32,
    training_count: u32,
    training_min: u16,
    training_max: u16,

    /// Guard expiry; 0 means not yet set for the current phase.
    guard_deadline_ms: u32,

    /// Inner-loop period the filters run at.
    loop_period_s: f32,
}

impl SetpointSmoother {
    /// Create an untrained smoother for filters running at the given
    /// inner-loop period.
    #[must_use]
    pub fn new(loop_period_s: f32) -> Self {
        let cutoff_factor = 1.5 / (1.0 + AUTO_SMOOTHNESS_DEFAULT as f32 / 10.0);
        let initial_ff = roundf(FEEDFORWARD_INITIAL_HZ as f32 * cutoff_factor) as u16;

        Self {
            auto_smoothness_setpoint: AUTO_SMOOTHNESS_DEFAULT,
            auto_smoothness_throttle: AUTO_SMOOTHNESS_DEFAULT,
            average_frame_time_us: 0,
            setpoint_cutoff_hz: 0,
            throttle_cutoff_hz: 0,
            feedforward_cutoff_hz: initial_ff,
            filter_throttle: Pt3::default(),
            filter_roll: Pt3::default(),
            filter_pitch: Pt3::default(),
            filter_yaw: Pt3::default(),
            filter_deflection_roll: Pt3::default(),
            filter_deflection_pitch: Pt3::default(),
            initialized: false,
            training_sum: 0.0,
            training_count: 0,
            training_min: u16::MAX,
            training_max: 0,
            guard_deadline_ms: 0,
            loop_period_s,
        }
    }

    /// Learned average frame interval, 0 until initial training completes.
    #[must_use]
    pub fn average_frame_time_us(&self) -> u32 {
        self.average_frame_time_us
    }

    /// True once the filters are trained and active.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Current setpoint cutoff (0 before training).
    #[must_use]
    pub fn setpoint_cutoff_hz(&self) -> u16 {
        self.setpoint_cutoff_hz
    }

    /// Current throttle cutoff (0 before training).
    #[must_use]
    pub fn throttle_cutoff_hz(&self) -> u16 {
        self.throttle_cutoff_hz
    }

    /// Current feedforward cutoff for the control-law derivative path.
    #[must_use]
    pub fn feedforward_cutoff_hz(&self) -> u16 {
        self.feedforward_cutoff_hz
    }

    /// Account one receiver frame interval toward training.
    ///
    /// Called whenever the pipeline finishes processing a frame;
    /// `rate_valid` marks intervals inside the plausible receiver range.
    pub fn on_frame(
        &mut self,
        now_ms: u32,
        refresh_period_us: u32,
        rate_valid: bool,
        signal_received: bool,
    ) {
        // Skip while the whole system is still settling after power-on.
        if now_ms <= STARTUP_DELAY_MS {
            return;
        }

        if !(signal_received && rate_valid) {
            self.reset_training();
            return;
        }

        if self.guard_deadline_ms == 0 {
            self.guard_deadline_ms = now_ms
                + if self.initialized {
                    RETRAINING_DELAY_MS
                } else {
                    TRAINING_DELAY_MS
                };
            return;
        }

        if now_ms <= self.guard_deadline_ms {
            return;
        }

        if self.initialized {
            // Retraining needs a contiguous block of clearly divergent
            // intervals; a single conforming sample restarts the block.
            let average = self.average_frame_time_us as f32;
            let percent_change =
                fabsf((refresh_period_us as f32 - average) / average) * 100.0;
            if percent_change < RATE_CHANGE_PERCENT {
                self.reset_training();
                return;
            }
        }

        if self.accumulate(refresh_period_us) {
            let retrained = self.initialized;
            self.apply_cutoffs();
            self.initialized = true;
            self.guard_deadline_ms = 0;
            if retrained {
                info!(
                    "setpoint smoothing retrained: {} us frame interval",
                    self.average_frame_time_us
                );
            }
        }
    }

    /// Run the cached demands through the filter bank. Before training
    /// completes the data passes through unchanged.
    pub fn smooth(&mut self, data: &Demands) -> Demands {
        if !self.initialized {
            return *data;
        }
        Demands {
            throttle: self.filter_throttle.apply(data.throttle),
            roll: self.filter_roll.apply(data.roll),
            pitch: self.filter_pitch.apply(data.pitch),
            yaw: self.filter_yaw.apply(data.yaw),
        }
    }

    /// Smooth level-mode stick deflections for angle control laws.
    pub fn smooth_deflections(&mut self, roll: f32, pitch: f32) -> (f32, f32) {
        if !self.initialized {
            return (roll, pitch);
        }
        (
            self.filter_deflection_roll.apply(roll),
            self.filter_deflection_pitch.apply(pitch),
        )
    }

    fn reset_training(&mut self) {
        self.training_sum = 0.0;
        self.training_count = 0;
        self.training_min = u16::MAX;
        self.training_max = 0;
    }

    /// Returns true when a full training block has been averaged.
    fn accumulate(&mut self, frame_time_us: u32) -> bool {
        let sample = frame_time_us.min(u16::MAX as u32) as u16;
        self.training_sum += frame_time_us as f32;
        self.training_count += 1;
        self.training_min = self.training_min.min(sample);
        self.training_max = self.training_max.max(sample);

        let limit = if self.initialized {
            RETRAINING_SAMPLES
        } else {
            TRAINING_SAMPLES
        };

        if self.training_count >= limit {
            // Throw out the extremes before averaging.
            let sum = self.training_sum
                - self.training_min as f32
                - self.training_max as f32;
            self.average_frame_time_us =
                roundf(sum / (self.training_count - 2) as f32) as u32;
            self.reset_training();
            return true;
        }
        false
    }

    fn auto_cutoff(&self, smoothness: u8) -> u16 {
        if self.average_frame_time_us == 0 {
            return 0;
        }
        let cutoff_factor = 1.5 / (1.0 + smoothness as f32 / 10.0);
        let link_hz = 1.0 / (self.average_frame_time_us as f32 * 1e-6);
        roundf(link_hz * cutoff_factor) as u16
    }

    fn apply_cutoffs(&mut self) {
        let old_setpoint = self.setpoint_cutoff_hz;

        self.setpoint_cutoff_hz =
            CUTOFF_MIN_HZ.max(self.auto_cutoff(self.auto_smoothness_setpoint));
        self.throttle_cutoff_hz =
            CUTOFF_MIN_HZ.max(self.auto_cutoff(self.auto_smoothness_throttle));
        self.feedforward_cutoff_hz =
            CUTOFF_MIN_HZ.max(self.auto_cutoff(self.auto_smoothness_setpoint));

        if self.setpoint_cutoff_hz == old_setpoint && self.initialized {
            return;
        }

        let dt = self.loop_period_s;
        if self.initialized {
            // Retune in place, keeping filter state continuous.
            self.filter_throttle.set_cutoff(self.throttle_cutoff_hz as f32, dt);
            self.filter_roll.set_cutoff(self.setpoint_cutoff_hz as f32, dt);
            self.filter_pitch.set_cutoff(self.setpoint_cutoff_hz as f32, dt);
            self.filter_yaw.set_cutoff(self.setpoint_cutoff_hz as f32, dt);
            self.filter_deflection_roll
                .set_cutoff(self.setpoint_cutoff_hz as f32, dt);
            self.filter_deflection_pitch
                .set_cutoff(self.setpoint_cutoff_hz as f32, dt);
        } else {
            self.filter_throttle = Pt3::new(self.throttle_cutoff_hz as f32, dt);
            self.filter_roll = Pt3::new(self.setpoint_cutoff_hz as f32, dt);
            self.filter_pitch = Pt3::new(self.setpoint_cutoff_hz as f32, dt);
            self.filter_yaw = Pt3::new(self.setpoint_cutoff_hz as f32, dt);
            self.filter_deflection_roll = Pt3::new(self.setpoint_cutoff_hz as f32, dt);
            self.filter_deflection_pitch = Pt3::new(self.setpoint_cutoff_hz as f32, dt);
        }
    }
}
