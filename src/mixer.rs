//! Control-law seam and motor mixing.
//!
//! The pipeline treats control laws as opaque stages: each
//! [`PidController`] rewrites the demands in place, and stages chain by
//! composing tuples. The mixer then maps the final demands onto per-motor
//! values, clamped to [0, 1].

use crate::types::{Demands, VehicleState, MAX_SUPPORTED_MOTORS};

/// One stage of the control-law cascade.
pub trait PidController {
    /// Rewrite `demands` given the current vehicle state. `reset` asks the
    /// stage to dump accumulated state (integrators) this cycle.
    fn update(&mut self, demands: &mut Demands, vstate: &VehicleState, reset: bool, now_us: u32);
}

/// No control law; demands pass through untouched.
impl PidController for () {
    fn update(&mut self, _demands: &mut Demands, _vstate: &VehicleState, _reset: bool, _now_us: u32) {
    }
}

/// Cascade: run `self.0`, then `self.1` on its output. Nest tuples for
/// longer chains.
impl<A: PidController, B: PidController> PidController for (A, B) {
    fn update(&mut self, demands: &mut Demands, vstate: &VehicleState, reset: bool, now_us: u32) {
        self.0.update(demands, vstate, reset, now_us);
        self.1.update(demands, vstate, reset, now_us);
    }
}

/// Demands-to-motors mapping.
pub trait Mixer {
    /// Number of motors this mixer drives.
    fn motor_count(&self) -> usize;

    /// Map demands onto motor values in [0, 1]; entries past
    /// `motor_count()` are zero.
    fn mix(&self, demands: &Demands) -> [f32; MAX_SUPPORTED_MOTORS];
}

/// Quad-X layout: motors ordered right-rear, right-front, left-rear,
/// left-front.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuadXMixer;

impl Mixer for QuadXMixer {
    fn motor_count(&self) -> usize {
        4
    }

    fn mix(&self, demands: &Demands) -> [f32; MAX_SUPPORTED_MOTORS] {
        let t = demands.throttle;
        let r = demands.roll;
        let p = demands.pitch;
        let y = demands.yaw;

        let mut motors = [0.0; MAX_SUPPORTED_MOTORS];
        motors[0] = (t - r + p - y).clamp(0.0, 1.0);
        motors[1] = (t - r - p + y).clamp(0.0, 1.0);
        motors[2] = (t + r + p + y).clamp(0.0, 1.0);
        motors[3] = (t + r - p - y).clamp(0.0, 1.0);
        motors
    }
}
