//! Core state handling for the animal gate controller.
//!
//! This crate owns the canonical [`GateState`] and everything that mutates it:
//!
//! - [`Reconciler`]: applies decoded protocol messages to the state, records
//!   animal events and drives the auto-close timer
//! - [`AutoCloseTimer`]: the `Idle` / `CountingDown` state machine
//! - [`Simulator`]: a stand-in for the microcontroller that produces protocol
//!   lines, which go through the same parser and reconciler as hardware input
//!
//! Nothing here does I/O or reads the clock; callers pass the current time in.

pub mod error;
pub mod event_log;
pub mod reconciler;
pub mod simulator;
pub mod state;
pub mod timer;

pub use error::{CoreError, CoreResult};
pub use event_log::BoundedLog;
pub use reconciler::{reconcile_status, GateEvent, Reconciler, ReconcilerConfig};
pub use simulator::{full_status, Simulator, SimulatorConfig};
pub use state::{AnimalEvent, GateState, DEFAULT_BATTERY_LEVEL, DEFAULT_LOG_CAPACITY};
pub use timer::{AutoCloseTimer, TickOutcome, TimerState, DEFAULT_TIMEOUT_SECS};
