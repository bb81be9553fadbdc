//! Device emulator.
//!
//! Serves the device side of the gate protocol over TCP, so the hardware path
//! of a session can be driven end to end without a microcontroller. One host
//! is served at a time; the emulated gate keeps its state between hosts.

use std::net::SocketAddr;

use chrono::Utc;
use gate_core::{full_status, GateEvent, GateState, Reconciler, Simulator, TimerState};
use gate_protocol::{Command, DecodedMessage, StatusFields, SENSITIVITY_RANGE};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GateConfig;
use crate::error::{GateError, GateResult};
use crate::transport::{LineReader, LineWriter};

/// Prefix of the line sent back for a command the device rejects.
pub const ERROR_PREFIX: &str = "ERR:";

/// State of the emulated device.
pub struct EmulatedDevice {
    reconciler: Reconciler,
    simulator: Simulator,
    sensitivity: u32,
}

impl EmulatedDevice {
    pub fn new(config: &GateConfig) -> GateResult<Self> {
        Ok(EmulatedDevice {
            reconciler: Reconciler::new(&config.reconciler_config())?,
            simulator: Simulator::new(config.simulator.clone()),
            sensitivity: 5,
        })
    }

    pub fn state(&self) -> &GateState {
        self.reconciler.state()
    }

    pub fn timeout_secs(&self) -> u32 {
        self.reconciler.timeout_secs()
    }

    pub fn sensitivity(&self) -> u32 {
        self.sensitivity
    }

    /// Handle one command line from the host. Returns the lines to send back.
    pub fn handle_line(&mut self, line: &str) -> Vec<String> {
        if line.trim().is_empty() {
            return Vec::new();
        }

        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                warn!("rejected host command: {}", e);
                return vec![format!("{}{}", ERROR_PREFIX, e)];
            }
        };
        debug!("host command {}", command.to_command_string());

        match command {
            Command::SetTimeout { secs } => {
                if let Err(e) = self.reconciler.set_timeout(secs) {
                    return vec![format!("{}{}", ERROR_PREFIX, e)];
                }
                Vec::new()
            }
            Command::SetSensitivity { level } => {
                if !SENSITIVITY_RANGE.contains(&level) {
                    return vec![format!("{}sensitivity {} out of range", ERROR_PREFIX, level)];
                }
                self.sensitivity = level;
                Vec::new()
            }
            Command::Open => {
                let lines = self.simulator.respond(&command, self.reconciler.state());
                self.apply(&lines);
                // Report the countdown the device just started
                let mut lines = lines;
                if let TimerState::CountingDown { remaining } = self.reconciler.timer().state() {
                    lines.push(
                        StatusFields {
                            time_remaining: Some(remaining),
                            ..Default::default()
                        }
                        .encode(),
                    );
                }
                lines
            }
            Command::Close | Command::Status => {
                let lines = self.simulator.respond(&command, self.reconciler.state());
                self.apply(&lines);
                lines
            }
        }
    }

    /// One second of the device's own auto-close countdown.
    pub fn tick(&mut self) -> Vec<String> {
        let events = self.reconciler.tick(Utc::now());
        if events.iter().any(|e| matches!(e, GateEvent::AutoClosed)) {
            info!("emulated gate auto-closed");
            return vec![StatusFields::auto_close().encode()];
        }
        match self.reconciler.timer().state() {
            TimerState::CountingDown { remaining } if !events.is_empty() => vec![StatusFields {
                time_remaining: Some(remaining),
                ..Default::default()
            }
            .encode()],
            _ => Vec::new(),
        }
    }

    /// One step of the random activity schedule.
    pub fn step(&mut self) -> Vec<String> {
        let lines = self.simulator.tick(self.reconciler.state());
        self.apply(&lines);
        lines
    }

    /// The report sent when a host connects.
    pub fn greeting(&self) -> String {
        full_status(self.reconciler.state()).encode()
    }

    fn apply(&mut self, lines: &[String]) {
        let now = Utc::now();
        for line in lines {
            self.reconciler.apply(&DecodedMessage::parse(line), now);
        }
    }
}

/// TCP server for an [`EmulatedDevice`].
pub struct Emulator {
    listener: TcpListener,
    device: EmulatedDevice,
    config: GateConfig,
}

impl Emulator {
    pub async fn bind(address: &str, config: GateConfig) -> GateResult<Self> {
        let listener =
            TcpListener::bind(address)
                .await
                .map_err(|e| GateError::TransportUnavailable {
                    target: address.to_string(),
                    reason: e.to_string(),
                })?;
        let device = EmulatedDevice::new(&config)?;
        Ok(Emulator {
            listener,
            device,
            config,
        })
    }

    pub fn local_addr(&self) -> GateResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept hosts one after another until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) -> GateResult<()> {
        info!("device emulator listening on {}", self.local_addr()?);

        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                accepted = self.listener.accept() => accepted?,
            };
            info!("host connected from {}", peer);

            if let Err(e) = self.serve(stream, &cancel).await {
                warn!("connection from {} ended with error: {}", peer, e);
            } else {
                info!("host {} disconnected", peer);
            }
        }
    }

    async fn serve(
        &mut self,
        stream: TcpStream,
        cancel: &CancellationToken,
    ) -> std::io::Result<()> {
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = LineReader::new(read_half);
        let mut writer = LineWriter::new(write_half);

        let tick_period = self.config.tick_interval();
        let mut ticks = interval_at(Instant::now() + tick_period, tick_period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let schedule_period = self.device.simulator.interval();
        let mut schedule = interval_at(Instant::now() + schedule_period, schedule_period);
        schedule.set_missed_tick_behavior(MissedTickBehavior::Delay);

        writer.write_line(&self.device.greeting()).await?;

        loop {
            let lines = tokio::select! {
                _ = cancel.cancelled() => {
                    writer.close().await?;
                    return Ok(());
                }
                line = reader.read_line() => match line? {
                    Some(line) => self.device.handle_line(&line),
                    None => return Ok(()),
                },
                _ = ticks.tick() => self.device.tick(),
                _ = schedule.tick() => self.device.step(),
            };

            for line in lines {
                writer.write_line(&line).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_core::SimulatorConfig;

    fn device() -> EmulatedDevice {
        let config = GateConfig {
            timeout_secs: 3,
            simulator: SimulatorConfig {
                open_probability: 0.0,
                seed: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };
        EmulatedDevice::new(&config).unwrap()
    }

    #[test]
    fn test_open_reports_countdown() {
        let mut device = device();
        let lines = device.handle_line("OPEN");

        assert_eq!(lines[0], "STATUS:GATE:OPEN");
        assert!(lines[1].ends_with(",MANUAL"));
        assert_eq!(lines[2], "STATUS:TIME:3");
        assert!(device.state().is_open);
    }

    #[test]
    fn test_auto_close_after_timeout() {
        let mut device = device();
        device.handle_line("OPEN");

        assert_eq!(device.tick(), vec!["STATUS:TIME:2".to_string()]);
        assert_eq!(device.tick(), vec!["STATUS:TIME:1".to_string()]);
        assert_eq!(
            device.tick(),
            vec!["STATUS:GATE:CLOSED,IR:0,ANIMAL:0,TIME:0".to_string()]
        );
        assert!(!device.state().is_open);
        assert!(device.tick().is_empty());
    }

    #[test]
    fn test_settings_commands() {
        let mut device = device();
        assert!(device.handle_line("TIMEOUT:20").is_empty());
        assert_eq!(device.timeout_secs(), 20);

        assert!(device.handle_line("SENSITIVITY:7").is_empty());
        assert_eq!(device.sensitivity(), 7);

        let reply = device.handle_line("SENSITIVITY:11");
        assert!(reply[0].starts_with(ERROR_PREFIX));
        assert_eq!(device.sensitivity(), 7);

        let reply = device.handle_line("TIMEOUT:0");
        assert!(reply[0].starts_with(ERROR_PREFIX));
        assert_eq!(device.timeout_secs(), 20);
    }

    #[test]
    fn test_rejects_unknown_command() {
        let mut device = device();
        let reply = device.handle_line("JUMP");
        assert_eq!(reply.len(), 1);
        assert!(reply[0].starts_with(ERROR_PREFIX));
        assert!(device.handle_line("").is_empty());
    }

    #[test]
    fn test_status_and_greeting_match() {
        let mut device = device();
        assert_eq!(device.handle_line("STATUS"), vec![device.greeting()]);
    }
}
