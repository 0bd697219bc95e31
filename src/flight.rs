//! Top-level orchestrator.
//!
//! [`FlightController`] owns every component and runs the dual-rate loop:
//! a phase-locked core tick (spin to the gyro deadline, read rates, mix,
//! write motors) and, in the slack between ticks, one age-prioritized outer
//! task at a time. It also closes the two timing loops that keep the core
//! tick glued to the gyro: period measurement over long windows and skew
//! correction over short ones.

use crate::arming::ArmingGate;
use crate::clock::{wrapping_delta, Clock};
use crate::esc::Esc;
use crate::failsafe::FailsafeMonitor;
use crate::imu::Imu;
use crate::mixer::{Mixer, PidController};
use crate::receiver::{Phase, Receiver, ReceiverDevice};
use crate::scheduler::Scheduler;
use crate::task::{prioritize, Task, TaskId};
use crate::telemetry::{SerialIo, TelemetryTask};
use crate::types::{VehicleState, MAX_SUPPORTED_MOTORS};

/// Gyro interrupts per loop-rate measurement window.
pub const CORE_RATE_COUNT: u32 = 25_000;

/// Gyro interrupts per skew-correction window.
pub const GYRO_LOCK_COUNT: u32 = 400;

/// Outer task periods, microseconds.
const ATTITUDE_PERIOD_US: u32 = 10_000;
/// One pipeline phase per slot; a full four-phase receiver cycle finishes
/// inside the fastest expected link interval.
const RECEIVER_PERIOD_US: u32 = 1_000;
const TELEMETRY_PERIOD_US: u32 = 10_000;
const ACCELEROMETER_PERIOD_US: u32 = 10_000;
const RANGER_PERIOD_US: u32 = 50_000;

/// Auxiliary ranging sensor seam. Use `()` when none is fitted; the task
/// slot then never does anything.
pub trait Ranger {
    fn update(&mut self, now_us: u32);
}

impl Ranger for () {
    fn update(&mut self, _now_us: u32) {}
}

/// The whole flight controller, generic over its hardware seams.
pub struct FlightController<C, I, D, E, M, P, S, R>
where
    C: Clock,
    I: Imu,
    D: ReceiverDevice,
    E: Esc,
    M: Mixer,
    P: PidController,
    S: SerialIo,
    R: Ranger,
{
    clock: C,
    imu: I,
    receiver: Receiver<D>,
    esc: E,
    mixer: M,
    pids: P,
    telemetry: TelemetryTask<S>,
    ranger: R,

    arming: ArmingGate,
    failsafe: FailsafeMonitor,
    scheduler: Scheduler,
    vstate: VehicleState,
    tasks: [Task; 5],

    cycles_per_us: u32,
    pid_reset: bool,

    // Loop-rate measurement window.
    terminal_gyro_rate_count: u32,
    sample_rate_start_cycles: u32,

    // Skew-correction window.
    terminal_gyro_lock_count: u32,
    gyro_skew_accum: i32,
}

impl<C, I, D, E, M, P, S, R> FlightController<C, I, D, E, M, P, S, R>
where
    C: Clock,
    I: Imu,
    D: ReceiverDevice,
    E: Esc,
    M: Mixer,
    P: PidController,
    S: SerialIo,
    R: Ranger,
{
    /// Wire up the controller. `gyro_period_us` is the nominal gyro sample
    /// period; the governor refines it from measurement once running.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: C,
        imu: I,
        device: D,
        esc: E,
        mixer: M,
        pids: P,
        serial: S,
        ranger: R,
        gyro_period_us: u32,
    ) -> Self {
        let cycles_per_us = clock.clock_speed_hz() / 1_000_000;
        let loop_period_s = gyro_period_us as f32 * 1e-6;

        Self {
            clock,
            imu,
            receiver: Receiver::new(device, loop_period_s),
            esc,
            mixer,
            pids,
            telemetry: TelemetryTask::new(serial),
            ranger,
            arming: ArmingGate::new(),
            failsafe: FailsafeMonitor::new(),
            scheduler: Scheduler::new(cycles_per_us, gyro_period_us),
            vstate: VehicleState::default(),
            tasks: [
                Task::new(TaskId::Attitude, ATTITUDE_PERIOD_US),
                Task::new(TaskId::Receiver, RECEIVER_PERIOD_US),
                Task::new(TaskId::Telemetry, TELEMETRY_PERIOD_US),
                Task::new(TaskId::Accelerometer, ACCELEROMETER_PERIOD_US),
                Task::new(TaskId::Ranger, RANGER_PERIOD_US),
            ],
            cycles_per_us,
            pid_reset: false,
            terminal_gyro_rate_count: 0,
            sample_rate_start_cycles: 0,
            terminal_gyro_lock_count: 0,
            gyro_skew_accum: 0,
        }
    }

    /// One-time startup: enable the ESC and seed the loop targets.
    pub fn begin(&mut self) {
        let now_us = self.clock.now_us();
        self.esc.begin(now_us);
        self.scheduler.start(self.clock.now_cycles());
        info!("flight core started");
    }

    /// Run one scheduling round. Call from the main loop, forever.
    pub fn step(&mut self) {
        let now_cycles = self.clock.now_cycles();
        if self.scheduler.is_core_ready(now_cycles) {
            self.run_core_tick(now_cycles);
        }

        if self.scheduler.is_dynamic_ready(self.clock.now_cycles()) {
            self.run_dynamic_task();
        }
    }

    /// Armed state, as the motors see it.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.arming.is_armed
    }

    /// Current arming gate (flags and readiness).
    #[must_use]
    pub fn arming(&self) -> &ArmingGate {
        &self.arming
    }

    /// Current state estimate.
    #[must_use]
    pub fn vehicle_state(&self) -> &VehicleState {
        &self.vstate
    }

    /// Receiver pipeline, read-only.
    #[must_use]
    pub fn receiver(&self) -> &Receiver<D> {
        &self.receiver
    }

    /// Measured gyro period in cycles, once the rate loop has locked.
    #[must_use]
    pub fn desired_period_cycles(&self) -> i32 {
        self.scheduler.desired_period_cycles
    }

    /// Feed one receiver-serial byte (normally called from the UART IRQ
    /// glue).
    pub fn on_receiver_byte(&mut self, byte: u8) {
        let now_us = self.clock.now_us();
        self.receiver.parse_byte(byte, now_us);
    }

    fn run_core_tick(&mut self, mut now_cycles: u32) {
        let now_us = self.clock.now_us();

        self.scheduler.core_pre_update();

        // Spin out the remaining cycles; this is the only busy-wait in the
        // system and typically lasts a few microseconds.
        let next_target_cycles = self.scheduler.next_target_cycles();
        while wrapping_delta(next_target_cycles, now_cycles) > 0 {
            now_cycles = self.clock.now_cycles();
        }

        if self.imu.gyro_ready() {
            let [dphi, dtheta, dpsi] = self.imu.read_gyro_dps();
            self.vstate.dphi = dphi;
            self.vstate.dtheta = dtheta;
            self.vstate.dpsi = dpsi;

            let mut demands = self.receiver.get_demands(now_us);
            self.pids
                .update(&mut demands, &self.vstate, self.pid_reset, now_us);

            let failsafe_active = self.failsafe.is_active();
            let mixed = self.mixer.mix(&demands);
            let count = self.mixer.motor_count();

            let mut values = [0.0f32; MAX_SUPPORTED_MOTORS];
            for (value, mixed) in values[..count].iter_mut().zip(mixed.iter()) {
                *value = self.esc.motor_value(*mixed, failsafe_active);
            }

            if self.arming.is_armed {
                self.esc.write(&values[..count]);
            } else {
                // Ground-station motor test path.
                let overrides = *self.telemetry.motor_overrides();
                self.esc.write(&overrides[..count]);
            }
        }
        // A missed sample skips the control law entirely; the skew
        // accumulator below records the gap.

        self.scheduler.core_post_update(self.clock.now_cycles());

        self.tune_loop_rate(now_cycles);
        self.correct_gyro_skew();
    }

    /// Measure the actual gyro rate over a long window and adopt it as the
    /// loop timebase.
    fn tune_loop_rate(&mut self, now_cycles: u32) {
        let interrupt_count = self.imu.gyro_interrupt_count();

        if self.terminal_gyro_rate_count == 0 {
            self.terminal_gyro_rate_count = interrupt_count.wrapping_add(CORE_RATE_COUNT);
            self.sample_rate_start_cycles = now_cycles;
        }

        if wrapping_delta(interrupt_count, self.terminal_gyro_rate_count) >= 0 {
            let sample_cycles = now_cycles.wrapping_sub(self.sample_rate_start_cycles);
            self.scheduler.desired_period_cycles = (sample_cycles / CORE_RATE_COUNT) as i32;
            self.sample_rate_start_cycles = now_cycles;
            self.terminal_gyro_rate_count =
                self.terminal_gyro_rate_count.wrapping_add(CORE_RATE_COUNT);
        }
    }

    /// Accumulate gyro skew over a short window and nudge the timing base
    /// to cancel the average.
    fn correct_gyro_skew(&mut self) {
        let skew = self.imu.gyro_skew(
            self.scheduler.next_target_cycles(),
            self.scheduler.desired_period_cycles,
        );
        self.gyro_skew_accum += skew;

        let interrupt_count = self.imu.gyro_interrupt_count();
        if self.terminal_gyro_lock_count == 0 {
            self.terminal_gyro_lock_count = interrupt_count.wrapping_add(GYRO_LOCK_COUNT);
        }

        if wrapping_delta(interrupt_count, self.terminal_gyro_lock_count) >= 0 {
            self.terminal_gyro_lock_count =
                self.terminal_gyro_lock_count.wrapping_add(GYRO_LOCK_COUNT);
            self.scheduler
                .apply_skew_correction(self.gyro_skew_accum / GYRO_LOCK_COUNT as i32);
            self.gyro_skew_accum = 0;
        }
    }

    fn run_dynamic_task(&mut self) {
        let now_us = self.clock.now_us();

        // Keep the receiver's data-driven state fresh so its task slot does
        // useful work when it wins.
        self.receiver.check(now_us);

        let Some(id) = prioritize(&self.tasks, now_us) else {
            return;
        };
        let index = self.tasks.iter().position(|t| t.id == id).unwrap_or(0);

        let now_cycles = self.clock.now_cycles();
        let required_cycles = self.tasks[index].check_ready(
            self.scheduler.next_target_cycles(),
            now_cycles,
            self.scheduler.task_guard_cycles(),
            self.cycles_per_us,
        );
        if required_cycles == 0 {
            // Not enough slack before the gyro deadline; retried next
            // round.
            return;
        }
        let anticipated_end_cycles = now_cycles.wrapping_add(required_cycles);

        let start_us = self.clock.now_us();
        self.run_task_body(id, start_us);
        let duration_us = self.clock.now_us().wrapping_sub(start_us);

        self.tasks[index].update(start_us, duration_us);
        self.scheduler
            .update_dynamic(self.clock.now_cycles(), anticipated_end_cycles);
    }

    fn run_task_body(&mut self, id: TaskId, now_us: u32) {
        match id {
            TaskId::Attitude => {
                let angles = self.imu.euler_angles(self.arming.is_armed, now_us);
                self.vstate.phi = angles.phi;
                self.vstate.theta = angles.theta;
                self.vstate.psi = angles.psi;

                self.arming
                    .update_from_imu(angles.phi, angles.theta, self.imu.gyro_is_calibrating());
            }
            TaskId::Receiver => {
                let out = self.receiver.poll(now_us, &mut self.failsafe);

                if let Some(reset) = out.pid_reset {
                    self.pid_reset = reset;
                }
                if out.failsafe_tripped {
                    self.arming.set_got_failsafe(&mut self.esc);
                }

                // Arming follows the pipeline's cadence: the attempt runs
                // right after commands update, the status refresh right
                // after a cycle completes.
                match self.receiver.phase() {
                    Phase::Update => {
                        let aux1 = self.receiver.aux1_is_set();
                        self.arming
                            .attempt_arm(&mut self.esc, self.clock.now_us(), aux1);
                    }
                    Phase::Check => {
                        let throttle_down = self.receiver.throttle_is_down();
                        let aux1 = self.receiver.aux1_is_set();
                        let have_signal = self.receiver.has_signal();
                        self.arming.update_from_receiver(
                            &mut self.esc,
                            throttle_down,
                            aux1,
                            have_signal,
                        );
                    }
                    _ => {}
                }
            }
            TaskId::Telemetry => {
                let sticks = self.receiver.sticks();
                self.telemetry
                    .run(&self.vstate, &sticks, self.arming.is_armed);
            }
            TaskId::Accelerometer => {
                if let Some(accel) = self.imu.read_accel_g() {
                    self.vstate.accel = Some(accel);
                }
                self.arming
                    .set_acc_calibrated(!self.imu.acc_is_calibrating());
            }
            TaskId::Ranger => {
                self.ranger.update(now_us);
            }
        }
    }
}
