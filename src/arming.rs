//! Arming gate: the safety preconditions between pilot intent and spinning
//! motors.
//!
//! Arming goes through exactly one path, [`ArmingGate::attempt_arm`], and
//! only when every readiness flag is set. Disarming is unconditional:
//! switch lowered, signal lost while armed, or an explicit disarm all force
//! the motors off first and clear the armed flag after.

use libm::fabsf;

use crate::esc::Esc;

/// Maximum tilt at which arming is allowed, degrees.
pub const MAX_ARMING_ANGLE_DEGREES: f32 = 25.0;

/// Throttle pulse width below which the throttle counts as down.
pub const THROTTLE_DOWN_US: f32 = 1050.0;

/// Arming state and its preconditions.
///
/// The boolean flags are written by the attitude and receiver tasks; the
/// gate itself only transitions `is_armed`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArmingGate {
    /// Master armed flag; motors follow pilot demand only while set.
    pub is_armed: bool,

    have_signal: bool,
    got_failsafe: bool,
    throttle_is_down: bool,
    switch_okay: bool,
    angle_okay: bool,
    gyro_calibrated: bool,
    acc_calibrated: bool,

    /// One-shot latch: set the first time the gate evaluates ready while
    /// disarmed, never cleared. Consumed by nothing downstream.
    became_ready: bool,
}

impl ArmingGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All preconditions met; the next switch raise will arm.
    #[must_use]
    pub fn ready_to_arm(&self) -> bool {
        self.acc_calibrated
            && self.angle_okay
            && !self.got_failsafe
            && self.have_signal
            && self.gyro_calibrated
            && self.switch_okay
            && self.throttle_is_down
    }

    /// Failsafe has latched; arming stays blocked.
    #[must_use]
    pub fn got_failsafe(&self) -> bool {
        self.got_failsafe
    }

    /// Arm-switch precondition state (must have been seen off since boot).
    #[must_use]
    pub fn switch_okay(&self) -> bool {
        self.switch_okay
    }

    /// Latch the failsafe flag and drop out of armed if needed.
    pub fn set_got_failsafe<E: Esc>(&mut self, esc: &mut E) {
        self.got_failsafe = true;
        self.disarm(esc);
    }

    /// Attitude task report: vehicle level within the arming angle, and
    /// gyro calibration status.
    pub fn update_from_imu(&mut self, phi_rad: f32, theta_rad: f32, gyro_calibrating: bool) {
        let limit = MAX_ARMING_ANGLE_DEGREES.to_radians();
        self.angle_okay = fabsf(phi_rad) < limit && fabsf(theta_rad) < limit;
        self.gyro_calibrated = !gyro_calibrating;
    }

    /// Accelerometer task report.
    pub fn set_acc_calibrated(&mut self, calibrated: bool) {
        self.acc_calibrated = calibrated;
    }

    /// Receiver status applied every receiver check phase.
    ///
    /// While armed, a signal dropout latches the failsafe flag and disarms.
    /// While disarmed, tracks throttle and maintains the switch-seen-off
    /// precondition that blocks arm-at-boot-with-switch-on.
    pub fn update_from_receiver<E: Esc>(
        &mut self,
        esc: &mut E,
        throttle_is_down: bool,
        aux1_is_set: bool,
        have_signal: bool,
    ) {
        if self.is_armed {
            if !have_signal && self.have_signal {
                self.got_failsafe = true;
                self.disarm(esc);
            }
        } else {
            self.throttle_is_down = throttle_is_down;

            // The switch must be observed off at least once before arming
            // is allowed; seeing it on while not ready revokes the okay.
            if !self.ready_to_arm() && aux1_is_set {
                self.switch_okay = false;
            } else if !aux1_is_set {
                self.switch_okay = true;
            }
        }

        self.have_signal = have_signal;
    }

    /// Try to follow the arm switch. Runs on every completed receiver
    /// update cycle.
    pub fn attempt_arm<E: Esc>(&mut self, esc: &mut E, now_us: u32, aux1_is_set: bool) {
        if aux1_is_set {
            if self.ready_to_arm() && !self.is_armed {
                if !esc.is_ready(now_us) {
                    // Denied silently this cycle; retried next update.
                    return;
                }
                self.is_armed = true;
                info!("armed");
            }
        } else if self.is_armed {
            self.disarm(esc);
        }

        if !(self.is_armed || self.became_ready || !self.ready_to_arm()) {
            self.became_ready = true;
        }
    }

    /// Stop the motors and clear the armed flag, in that order.
    pub fn disarm<E: Esc>(&mut self, esc: &mut E) {
        if self.is_armed {
            esc.stop();
            info!("disarmed");
        }
        self.is_armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal ESC double: counts stops, ready after a settable time.
    struct TestEsc {
        stops: u32,
        ready_at: u32,
    }

    impl TestEsc {
        fn ready() -> Self {
            Self {
                stops: 0,
                ready_at: 0,
            }
        }
    }

    impl Esc for TestEsc {
        fn begin(&mut self, _now_us: u32) {}
        fn is_ready(&self, now_us: u32) -> bool {
            now_us >= self.ready_at
        }
        fn motor_value(&self, value: f32, failsafe_active: bool) -> f32 {
            if failsafe_active {
                0.0
            } else {
                value.clamp(0.0, 1.0)
            }
        }
        fn write(&mut self, _values: &[f32]) {}
        fn stop(&mut self) {
            self.stops += 1;
        }
    }

    fn ready_gate() -> ArmingGate {
        let mut gate = ArmingGate::new();
        gate.update_from_imu(0.0, 0.0, false);
        gate.set_acc_calibrated(true);
        gate
    }

    #[test]
    fn test_arms_only_when_every_flag_ready() {
        let mut esc = TestEsc::ready();
        let mut gate = ready_gate();

        // Switch off first, throttle down, signal present.
        gate.update_from_receiver(&mut esc, true, false, true);
        assert!(gate.ready_to_arm());

        gate.attempt_arm(&mut esc, 0, true);
        assert!(gate.is_armed);
    }

    #[test]
    fn test_switch_on_at_boot_blocks_arming() {
        let mut esc = TestEsc::ready();
        let mut gate = ready_gate();

        // Switch is already up the first time we hear from the receiver.
        gate.update_from_receiver(&mut esc, true, true, true);
        assert!(!gate.ready_to_arm());
        gate.attempt_arm(&mut esc, 0, true);
        assert!(!gate.is_armed);

        // Cycling it off then on arms.
        gate.update_from_receiver(&mut esc, true, false, true);
        gate.attempt_arm(&mut esc, 0, true);
        assert!(gate.is_armed);
    }

    #[test]
    fn test_esc_not_ready_denies_silently() {
        let mut esc = TestEsc {
            stops: 0,
            ready_at: 1_000_000,
        };
        let mut gate = ready_gate();
        gate.update_from_receiver(&mut esc, true, false, true);

        gate.attempt_arm(&mut esc, 0, true);
        assert!(!gate.is_armed);

        gate.attempt_arm(&mut esc, 1_000_000, true);
        assert!(gate.is_armed);
    }

    #[test]
    fn test_signal_loss_while_armed_latches_failsafe() {
        let mut esc = TestEsc::ready();
        let mut gate = ready_gate();
        gate.update_from_receiver(&mut esc, true, false, true);
        gate.attempt_arm(&mut esc, 0, true);
        assert!(gate.is_armed);

        gate.update_from_receiver(&mut esc, true, true, false);
        assert!(!gate.is_armed);
        assert!(gate.got_failsafe());
        assert_eq!(esc.stops, 1, "motors stopped before flag cleared");

        // Failsafe keeps the gate blocked even with everything else green.
        gate.update_from_receiver(&mut esc, true, false, true);
        gate.attempt_arm(&mut esc, 0, true);
        assert!(!gate.is_armed);
    }

    #[test]
    fn test_switch_lowered_disarms() {
        let mut esc = TestEsc::ready();
        let mut gate = ready_gate();
        gate.update_from_receiver(&mut esc, true, false, true);
        gate.attempt_arm(&mut esc, 0, true);
        assert!(gate.is_armed);

        gate.attempt_arm(&mut esc, 10, false);
        assert!(!gate.is_armed);
        assert_eq!(esc.stops, 1);
    }

    #[test]
    fn test_tilted_vehicle_blocks_arming() {
        let mut esc = TestEsc::ready();
        let mut gate = ArmingGate::new();
        gate.set_acc_calibrated(true);
        gate.update_from_imu(0.6, 0.0, false); // ~34 degrees of roll
        gate.update_from_receiver(&mut esc, true, false, true);

        gate.attempt_arm(&mut esc, 0, true);
        assert!(!gate.is_armed);
    }
}
