//! Third-order low-pass filter for setpoint smoothing.
//!
//! Three cascaded first-order stages sharing one gain `k`, derived from the
//! cutoff frequency with an order-correction factor so the cascade's -3 dB
//! point lands on the requested cutoff:
//!
//! ```text
//! C  = 1 / sqrt(2^(1/3) - 1)      (~1.9615)
//! RC = 1 / (2 * pi * C * f_cut)
//! k  = dT / (RC + dT)
//! ```

use core::f32::consts::PI;

use libm::{powf, sqrtf};

/// Third-order low-pass filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pt3 {
    state: f32,
    state1: f32,
    state2: f32,
    k: f32,
}

impl Pt3 {
    /// Create a filter with the given cutoff for a fixed sample period.
    #[must_use]
    pub fn new(cutoff_hz: f32, sample_period_s: f32) -> Self {
        Self {
            state: 0.0,
            state1: 0.0,
            state2: 0.0,
            k: Self::gain(cutoff_hz, sample_period_s),
        }
    }

    /// Compute the per-stage gain for a cutoff and sample period.
    #[must_use]
    pub fn gain(cutoff_hz: f32, sample_period_s: f32) -> f32 {
        let order_cutoff_correction = 1.0 / sqrtf(powf(2.0, 1.0 / 3.0) - 1.0);
        let rc = 1.0 / (2.0 * order_cutoff_correction * PI * cutoff_hz);
        sample_period_s / (rc + sample_period_s)
    }

    /// Retune the cutoff without resetting filter state.
    pub fn set_cutoff(&mut self, cutoff_hz: f32, sample_period_s: f32) {
        self.k = Self::gain(cutoff_hz, sample_period_s);
    }

    /// Run one sample through the filter.
    pub fn apply(&mut self, input: f32) -> f32 {
        self.state1 += self.k * (input - self.state1);
        self.state2 += self.k * (self.state1 - self.state2);
        self.state += self.k * (self.state2 - self.state);
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_in_unit_range() {
        for cutoff in [15.0, 50.0, 100.0, 500.0] {
            let k = Pt3::gain(cutoff, 1.0 / 8000.0);
            assert!(k > 0.0 && k < 1.0, "cutoff {cutoff}: k = {k}");
        }
    }

    #[test]
    fn test_gain_grows_with_cutoff() {
        let dt = 1.0 / 8000.0;
        assert!(Pt3::gain(100.0, dt) > Pt3::gain(15.0, dt));
    }

    #[test]
    fn test_step_response_converges() {
        let mut filter = Pt3::new(50.0, 1.0 / 1000.0);
        let mut out = 0.0;
        for _ in 0..1000 {
            out = filter.apply(1.0);
        }
        assert!((out - 1.0).abs() < 1e-3, "settled at {out}");
    }

    #[test]
    fn test_output_lags_input() {
        let mut filter = Pt3::new(20.0, 1.0 / 1000.0);
        let first = filter.apply(1.0);
        assert!(first > 0.0 && first < 0.1);
    }

    #[test]
    fn test_retune_keeps_state() {
        let mut filter = Pt3::new(20.0, 1.0 / 1000.0);
        for _ in 0..100 {
            filter.apply(1.0);
        }
        let before = filter.apply(1.0);
        filter.set_cutoff(100.0, 1.0 / 1000.0);
        let after = filter.apply(1.0);
        assert!(after >= before);
    }
}
