//! Simulated gate device.
//!
//! The simulator stands in for the microcontroller when no hardware is
//! attached. It never touches [`GateState`] itself: it produces protocol lines
//! exactly like the device would, and the caller feeds them through the
//! parser and the reconciler. Whatever the simulator exercises, the hardware
//! path exercises too.

use std::time::Duration;

use gate_protocol::{encode_event, Command, Direction, StatusFields, Trigger};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::state::GateState;

/// Simulator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Period of the simulation schedule in milliseconds.
    pub interval_ms: u64,
    /// Chance per tick that a closed gate is opened by a passing animal.
    pub open_probability: f64,
    /// Battery percentage lost on every tick.
    pub battery_decay: f32,
    /// Seed for reproducible runs. A random seed is drawn (and logged) if unset.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            interval_ms: 5000,
            open_probability: 0.3,
            battery_decay: 0.1,
            seed: None,
        }
    }
}

/// Generates the lines a gate device would send.
#[derive(Debug, Clone)]
pub struct Simulator {
    config: SimulatorConfig,
    rng: ChaCha8Rng,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        info!("simulator seeded with {}", seed);
        Simulator {
            rng: ChaCha8Rng::seed_from_u64(seed),
            config,
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Period between [`tick`](Self::tick) calls.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.config.interval_ms.max(1))
    }

    /// One step of the schedule.
    ///
    /// While the gate is closed there is a chance an animal opens it: an open
    /// status report plus an IR event. The battery drains on every tick.
    pub fn tick(&mut self, state: &GateState) -> Vec<String> {
        let mut lines = Vec::new();

        let probability = self.config.open_probability.clamp(0.0, 1.0);
        if !state.is_open && self.rng.gen_bool(probability) {
            let direction = self.random_direction();
            debug!("simulated animal approaching ({})", direction.as_str());
            lines.push(
                StatusFields {
                    gate_open: Some(true),
                    ir_sensor: Some(true),
                    animal_detected: Some(true),
                    ..Default::default()
                }
                .encode(),
            );
            lines.push(encode_event(direction, Trigger::Ir));
        }

        let battery = (state.battery_level - self.config.battery_decay.max(0.0)).max(0.0);
        lines.push(
            StatusFields {
                battery: Some(battery),
                ..Default::default()
            }
            .encode(),
        );

        lines
    }

    /// Lines the simulated device sends back in response to a host command.
    pub fn respond(&mut self, command: &Command, state: &GateState) -> Vec<String> {
        match command {
            Command::Open if !state.is_open => {
                let direction = self.random_direction();
                vec![
                    StatusFields {
                        gate_open: Some(true),
                        ..Default::default()
                    }
                    .encode(),
                    encode_event(direction, Trigger::Manual),
                ]
            }
            Command::Open => vec![StatusFields {
                gate_open: Some(true),
                ..Default::default()
            }
            .encode()],
            Command::Close => vec![StatusFields {
                gate_open: Some(false),
                time_remaining: Some(0),
                ..Default::default()
            }
            .encode()],
            Command::Status => vec![full_status(state).encode()],
            Command::SetTimeout { .. } | Command::SetSensitivity { .. } => {
                debug!("simulator acknowledged {}", command.to_command_string());
                Vec::new()
            }
        }
    }

    fn random_direction(&mut self) -> Direction {
        if self.rng.gen_bool(0.5) {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Every field of `state` as a status report.
pub fn full_status(state: &GateState) -> StatusFields {
    StatusFields {
        gate_open: Some(state.is_open),
        ir_sensor: Some(state.ir_sensor_state),
        animal_detected: Some(state.animal_detected),
        battery: Some(state.battery_level),
        time_remaining: Some(state.time_remaining),
        malformed: Vec::new(),
    }
}
