//! Session configuration.
//!
//! Loaded from YAML; every field has a default so an empty file (or no file)
//! is a valid configuration.
//!
//! ```yaml
//! timeout_secs: 15
//! simulator:
//!   interval_ms: 2000
//!   seed: 42
//! transport:
//!   kind: serial
//!   path: /dev/ttyUSB0
//!   baud_rate: 115200
//! ```

use std::path::Path;
use std::time::Duration;

use gate_core::{
    ReconcilerConfig, SimulatorConfig, DEFAULT_BATTERY_LEVEL, DEFAULT_LOG_CAPACITY,
    DEFAULT_TIMEOUT_SECS,
};
use serde::Deserialize;

use crate::error::{GateError, GateResult};
use crate::transport::TransportConfig;

/// Configuration for a gate session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Auto-close timeout in seconds.
    pub timeout_secs: u32,
    /// Period of the auto-close timer tick in milliseconds.
    pub tick_interval_ms: u64,
    /// Capacity of the animal event log.
    pub event_log_capacity: usize,
    /// Capacity of the raw serial line log.
    pub serial_log_capacity: usize,
    /// Battery level assumed before the first report.
    pub initial_battery: f32,
    pub simulator: SimulatorConfig,
    /// Device to connect to at startup. Simulation only if unset.
    pub transport: Option<TransportConfig>,
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            tick_interval_ms: 1000,
            event_log_capacity: DEFAULT_LOG_CAPACITY,
            serial_log_capacity: DEFAULT_LOG_CAPACITY,
            initial_battery: DEFAULT_BATTERY_LEVEL,
            simulator: SimulatorConfig::default(),
            transport: None,
        }
    }
}

impl GateConfig {
    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> GateResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GateError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Parse a configuration from YAML text.
    pub fn from_yaml_str(text: &str) -> GateResult<Self> {
        if text.trim().is_empty() {
            return Ok(GateConfig::default());
        }
        let config: GateConfig =
            serde_yaml::from_str(text).map_err(|e| GateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> GateResult<()> {
        if self.timeout_secs == 0 {
            return Err(GateError::Config("timeout_secs must be at least 1".to_string()));
        }
        if self.tick_interval_ms == 0 {
            return Err(GateError::Config("tick_interval_ms must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.simulator.open_probability) {
            return Err(GateError::Config(format!(
                "simulator.open_probability must be within 0..=1, got {}",
                self.simulator.open_probability
            )));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            timeout_secs: self.timeout_secs,
            event_log_capacity: self.event_log_capacity,
            initial_battery: self.initial_battery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GateConfig::default();
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.event_log_capacity, 50);
        assert_eq!(config.simulator.interval_ms, 5000);
        assert!(config.transport.is_none());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(GateConfig::from_yaml_str("").unwrap(), GateConfig::default());
    }

    #[test]
    fn test_partial_yaml() {
        let config = GateConfig::from_yaml_str(
            "timeout_secs: 20\nsimulator:\n  seed: 42\n  interval_ms: 100\n",
        )
        .unwrap();
        assert_eq!(config.timeout_secs, 20);
        assert_eq!(config.simulator.seed, Some(42));
        assert_eq!(config.simulator.interval_ms, 100);
        assert_eq!(config.simulator.open_probability, 0.3);
    }

    #[test]
    fn test_transport_yaml() {
        let config = GateConfig::from_yaml_str(
            "transport:\n  kind: serial\n  path: /dev/ttyUSB0\n",
        )
        .unwrap();
        assert_eq!(
            config.transport,
            Some(TransportConfig::Serial {
                path: "/dev/ttyUSB0".to_string(),
                baud_rate: 115200,
            })
        );

        let config =
            GateConfig::from_yaml_str("transport:\n  kind: tcp\n  address: 127.0.0.1:7000\n")
                .unwrap();
        assert!(matches!(config.transport, Some(TransportConfig::Tcp { .. })));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            GateConfig::from_yaml_str("timeout_secs: 0"),
            Err(GateError::Config(_))
        ));
        assert!(matches!(
            GateConfig::from_yaml_str("simulator:\n  open_probability: 2.0\n"),
            Err(GateError::Config(_))
        ));
        assert!(matches!(
            GateConfig::from_yaml_str("timeout_secs: [1, 2]"),
            Err(GateError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gate.yaml");
        std::fs::write(&path, "timeout_secs: 25\n").unwrap();
        assert_eq!(GateConfig::load(&path).unwrap().timeout_secs, 25);
        assert!(GateConfig::load(dir.path().join("missing.yaml")).is_err());
    }
}
