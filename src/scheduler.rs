//! Dual-rate scheduler state.
//!
//! The scheduler owns the inner loop's timing targets (in CPU cycles) and
//! two adaptive safety windows:
//!
//! - the *loop-start window*: how far before the gyro deadline the core
//!   loop begins its spin-wait. Raised when a loop starts late, decayed
//!   slowly while loops run clean.
//! - the *task guard*: margin subtracted from the remaining slack before an
//!   outer task is admitted. Raised when a task overruns its estimate,
//!   decayed across clean executions.
//!
//! All comparisons use signed wrapping deltas; the cycle counter is free to
//! wrap mid-flight.

use crate::clock::wrapping_delta;

/// Loop-start window bounds and adaptation steps, microseconds.
const START_LOOP_MIN_US: u32 = 1;
const START_LOOP_MAX_US: u32 = 12;
/// Fraction of a microsecond the window shrinks per clean loop.
const START_LOOP_DOWN_DENOM: u32 = 50;
const START_LOOP_UP_US: u32 = 1;

/// Task guard bounds and adaptation steps, microseconds.
const TASK_GUARD_MIN_US: u32 = 3;
const TASK_GUARD_MAX_US: u32 = 6;
/// Fraction of a microsecond the guard shrinks per clean execution.
const TASK_GUARD_DOWN_DENOM: u32 = 50;
const TASK_GUARD_UP_US: u32 = 1;

/// Minimum slack for even considering outer tasks.
const CHECK_GUARD_MARGIN_US: u32 = 2;

/// Inner-loop timing state.
#[derive(Debug)]
pub struct Scheduler {
    /// Cycles between gyro interrupts; tuned by the governor's rate
    /// measurement.
    pub desired_period_cycles: i32,

    last_target_cycles: u32,
    next_target_cycles: u32,

    loop_start_cycles: i32,
    loop_start_min_cycles: i32,
    loop_start_max_cycles: i32,
    loop_start_delta_down: i32,
    loop_start_delta_up: i32,

    task_guard_cycles: i32,
    task_guard_min_cycles: i32,
    task_guard_max_cycles: i32,
    task_guard_delta_down: i32,
    task_guard_delta_up: i32,

    check_guard_cycles: i32,
}

impl Scheduler {
    /// Create a scheduler for a CPU running at `cycles_per_us` with the
    /// given nominal gyro period.
    #[must_use]
    pub fn new(cycles_per_us: u32, nominal_period_us: u32) -> Self {
        let us = |n: u32| (n * cycles_per_us) as i32;

        Self {
            desired_period_cycles: us(nominal_period_us),
            last_target_cycles: 0,
            next_target_cycles: 0,
            loop_start_cycles: us(START_LOOP_MIN_US),
            loop_start_min_cycles: us(START_LOOP_MIN_US),
            loop_start_max_cycles: us(START_LOOP_MAX_US),
            loop_start_delta_down: (us(1) / START_LOOP_DOWN_DENOM as i32).max(1),
            loop_start_delta_up: us(START_LOOP_UP_US),
            task_guard_cycles: us(TASK_GUARD_MIN_US),
            task_guard_min_cycles: us(TASK_GUARD_MIN_US),
            task_guard_max_cycles: us(TASK_GUARD_MAX_US),
            task_guard_delta_down: (us(1) / TASK_GUARD_DOWN_DENOM as i32).max(1),
            task_guard_delta_up: us(TASK_GUARD_UP_US),
            check_guard_cycles: us(CHECK_GUARD_MARGIN_US),
        }
    }

    /// Seed the timing targets from the current cycle counter at boot.
    pub fn start(&mut self, now_cycles: u32) {
        self.last_target_cycles = now_cycles;
        self.next_target_cycles = now_cycles.wrapping_add(self.desired_period_cycles as u32);
    }

    /// The cycle the core loop is aiming at.
    #[must_use]
    pub fn next_target_cycles(&self) -> u32 {
        self.next_target_cycles
    }

    /// Cycles left before the target (negative when past it).
    #[must_use]
    pub fn loop_remaining_cycles(&self, now_cycles: u32) -> i32 {
        wrapping_delta(self.next_target_cycles, now_cycles)
    }

    /// Current admission guard for outer tasks.
    #[must_use]
    pub fn task_guard_cycles(&self) -> i32 {
        self.task_guard_cycles
    }

    /// Should the core loop run now?
    ///
    /// Computes the next target and answers true once the remaining time is
    /// inside the loop-start window. A loop that slipped more than a full
    /// period re-bases forward instead of chasing missed targets.
    pub fn is_core_ready(&mut self, now_cycles: u32) -> bool {
        self.next_target_cycles = self
            .last_target_cycles
            .wrapping_add(self.desired_period_cycles as u32);

        let mut remaining = wrapping_delta(self.next_target_cycles, now_cycles);
        if remaining < -self.desired_period_cycles {
            let skipped = 1 + remaining / -self.desired_period_cycles;
            self.next_target_cycles = self
                .next_target_cycles
                .wrapping_add((self.desired_period_cycles * skipped) as u32);
            remaining = wrapping_delta(self.next_target_cycles, now_cycles);
        }

        remaining < self.loop_start_cycles
    }

    /// Is there enough slack to consider outer tasks?
    pub fn is_dynamic_ready(&self, now_cycles: u32) -> bool {
        self.loop_remaining_cycles(now_cycles) > self.check_guard_cycles
    }

    /// Called at the head of every core loop: decay the loop-start window.
    pub fn core_pre_update(&mut self) {
        if self.loop_start_cycles > self.loop_start_min_cycles {
            self.loop_start_cycles -= self.loop_start_delta_down;
        }
    }

    /// Called after the core loop's motor write: commit the target and
    /// widen the loop-start window if this loop ran late.
    pub fn core_post_update(&mut self, now_cycles: u32) {
        if wrapping_delta(now_cycles, self.next_target_cycles) > 0
            && self.loop_start_cycles < self.loop_start_max_cycles
        {
            self.loop_start_cycles += self.loop_start_delta_up;
        }
        self.last_target_cycles = self.next_target_cycles;
    }

    /// Pull the timing base by `correction_cycles` (positive values move
    /// the schedule earlier), as directed by the gyro skew accumulator.
    pub fn apply_skew_correction(&mut self, correction_cycles: i32) {
        self.last_target_cycles = self
            .last_target_cycles
            .wrapping_sub(correction_cycles as u32);
    }

    /// Account a finished outer task against its admission estimate and
    /// adapt the guard.
    pub fn update_dynamic(&mut self, now_cycles: u32, anticipated_end_cycles: u32) {
        let cycles_overdue = wrapping_delta(now_cycles, anticipated_end_cycles);

        if cycles_overdue > 0 || -cycles_overdue < self.task_guard_min_cycles {
            if self.task_guard_cycles < self.task_guard_max_cycles {
                self.task_guard_cycles += self.task_guard_delta_up;
            }
        } else if self.task_guard_cycles > self.task_guard_min_cycles {
            self.task_guard_cycles -= self.task_guard_delta_down;
        }
    }
}
