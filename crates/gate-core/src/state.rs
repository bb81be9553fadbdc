//! Gate state and animal event records.

use chrono::{DateTime, Utc};
use gate_protocol::{Direction, Trigger};
use serde::{Deserialize, Serialize};

/// Battery level reported before the first status arrives.
pub const DEFAULT_BATTERY_LEVEL: f32 = 85.0;

/// Capacity of the animal event log and the raw serial log.
pub const DEFAULT_LOG_CAPACITY: usize = 50;

/// Canonical state of the gate.
///
/// Invariants, maintained by the [`Reconciler`](crate::Reconciler):
/// - `time_remaining > 0` implies `is_open`
/// - `last_opened` changes only on a closed → open transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateState {
    pub is_open: bool,
    pub last_opened: Option<DateTime<Utc>>,
    /// Seconds until auto-close.
    pub time_remaining: u32,
    pub ir_sensor_state: bool,
    pub animal_detected: bool,
    /// Battery percentage, 0-100.
    pub battery_level: f32,
}

impl Default for GateState {
    fn default() -> Self {
        GateState::with_battery(DEFAULT_BATTERY_LEVEL)
    }
}

impl GateState {
    /// A closed gate with the given battery level.
    pub fn with_battery(battery_level: f32) -> Self {
        GateState {
            is_open: false,
            last_opened: None,
            time_remaining: 0,
            ir_sensor_state: false,
            animal_detected: false,
            battery_level: battery_level.clamp(0.0, 100.0),
        }
    }
}

/// An animal passing through the gate. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimalEvent {
    /// Monotonic identifier, unique within a reconciler.
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub sensor_triggered: Trigger,
}
