//! Core data types shared across the control pipeline.

/// Maximum number of motors any mixer may drive.
pub const MAX_SUPPORTED_MOTORS: usize = 8;

/// Rate setpoint ceiling in degrees per second.
pub const RATE_LIMIT_DPS: f32 = 1998.0;

/// Vehicle state estimate.
///
/// Euler angles are written by the attitude task, angular velocities by the
/// inner loop's gyro read; the control law and telemetry only ever read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VehicleState {
    /// Roll angle, radians.
    pub phi: f32,
    /// Pitch angle, radians.
    pub theta: f32,
    /// Heading angle, radians.
    pub psi: f32,
    /// Roll rate, degrees/second.
    pub dphi: f32,
    /// Pitch rate, degrees/second.
    pub dtheta: f32,
    /// Yaw rate, degrees/second.
    pub dpsi: f32,
    /// Body-frame accelerations in g, when an accelerometer task runs.
    pub accel: Option<[f32; 3]>,
}

/// Pilot demands after shaping and smoothing.
///
/// Throttle is normalized to [0, 1]; the axes are rate setpoints in
/// degrees/second, each within ±[`RATE_LIMIT_DPS`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Demands {
    pub throttle: f32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl Demands {
    /// All-zero demands (motors at rest, sticks centered).
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            throttle: 0.0,
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
        }
    }
}

/// Raw stick values in microseconds, as floats, straight off the receiver
/// after ranging and failsafe overlay. Telemetry reports these.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StickValues {
    pub throttle: f32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub aux1: f32,
    pub aux2: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_demands() {
        let d = Demands::zero();
        assert_eq!(d, Demands::default());
        assert_eq!(d.throttle, 0.0);
    }

    #[test]
    fn test_vehicle_state_default_has_no_accel() {
        assert!(VehicleState::default().accel.is_none());
    }
}
