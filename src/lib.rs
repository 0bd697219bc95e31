//! Flight controller core: a hard real-time control loop for multirotor
//! and fixed-wing vehicles, with no operating system underneath.
//!
//! The crate is organized around three tightly coupled subsystems:
//!
//! - [`scheduler`] + [`flight`]: the dual-rate loop - a latency-critical
//!   inner tick phase-locked to the gyro interrupt (read rates, run the
//!   control law, write motors) interleaved with age-prioritized outer
//!   tasks in the slack between ticks
//! - [`receiver`] + [`smoothing`]: the receiver pipeline - raw RC frames
//!   in, smoothed and rate-limited setpoints out, with per-channel
//!   signal-loss handling
//! - [`arming`] + [`failsafe`]: the safety state machine deciding whether
//!   motor outputs follow pilot demand or forced shutdown
//!
//! Hardware stays behind four seams the platform implements:
//! [`Clock`](clock::Clock), [`Imu`](imu::Imu),
//! [`ReceiverDevice`](receiver::ReceiverDevice), and [`Esc`](esc::Esc),
//! plus the two-method serial capability for ground-station telemetry.
//! [`FlightController`](flight::FlightController) owns every component;
//! there is no global mutable state.
//!
//! # Concurrency Model
//!
//! Single-threaded cooperative, one hardware interrupt. The gyro IRQ only
//! timestamps samples and counts; everything else runs in the main context
//! by calling [`FlightController::step`](flight::FlightController::step)
//! in a loop. The only busy-wait is the calibrated spin at the head of the
//! inner tick. All 32-bit time comparisons use signed wrapping deltas.
//!
//! # Features
//!
//! - **`std`**: Enable standard library support (for host testing)
//! - **`defmt`**: Enable defmt formatting/logging (for embedded targets)
//! - **`log`**: Route core log macros to the `log` crate (host targets)
//!
//! # No-std Support
//!
//! This crate is `#![no_std]` by default and uses no heap allocations,
//! making it suitable for microcontrollers with limited resources.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

#[macro_use]
mod fmt;

pub mod arming;
pub mod clock;
pub mod esc;
pub mod failsafe;
pub mod filters;
pub mod flight;
pub mod imu;
pub mod mixer;
pub mod receiver;
pub mod scheduler;
pub mod smoothing;
pub mod task;
pub mod telemetry;
pub mod types;

// Re-export the main seams and the orchestrator at crate root
pub use arming::ArmingGate;
pub use clock::{wrapping_delta, Clock};
pub use esc::{DshotEsc, Esc, FrameSink, PulseSink, PwmEsc};
pub use failsafe::FailsafeMonitor;
pub use flight::{FlightController, Ranger};
pub use imu::{EulerAngles, Imu};
pub use mixer::{Mixer, PidController, QuadXMixer};
pub use receiver::{FrameStatus, Receiver, ReceiverDevice, SbusDevice};
pub use scheduler::Scheduler;
pub use telemetry::{SerialIo, TelemetryTask};
pub use types::{Demands, StickValues, VehicleState, MAX_SUPPORTED_MOTORS};
