//! The gate session: a single task that owns the gate state.
//!
//! Every input that can change [`GateState`] is serialized through one actor
//! loop: user requests, lines from the hardware reader, the one-second
//! auto-close tick and the simulator schedule. Nothing else holds the
//! [`Reconciler`], so no two inputs can race on `is_open` or `time_remaining`.
//!
//! Exactly one message source is active. Switching to hardware stops the
//! simulator schedule before the reader starts; leaving hardware cancels the
//! reader and writer tasks, waits for both to finish and closes the write half
//! before the simulator resumes. Lines that a cancelled reader had already
//! queued carry a stale generation number and are dropped.
//!
//! The actor never awaits the device. Commands go to a per-link writer task
//! through a bounded queue, and transports are opened in the caller's task.

use std::io;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gate_core::{AnimalEvent, BoundedLog, GateEvent, GateState, Reconciler, Simulator};
use gate_metrics::metric_defs;
use gate_protocol::{Command, DecodedMessage};
use serde::Serialize;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::GateConfig;
use crate::error::{GateError, GateResult};
use crate::transport::{self, BoxedIo, LineReader, LineWriter, TransportConfig};

const REQUEST_QUEUE: usize = 32;
const HARDWARE_QUEUE: usize = 256;
const EVENT_QUEUE: usize = 256;
/// Commands waiting for a device that is not reading.
pub const WRITE_QUEUE: usize = 16;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Types
// ============================================================================

/// Which source is feeding the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    Simulated,
    Hardware,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionMode::Simulated => "simulated",
            ConnectionMode::Hardware => "hardware",
        }
    }
}

/// Direction of a logged serial line, relative to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineDirection {
    Rx,
    Tx,
}

/// One line exchanged with the active source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerialLogEntry {
    pub direction: LineDirection,
    pub line: String,
    pub at: DateTime<Utc>,
}

/// Read-only view of the session for presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateSnapshot {
    pub mode: ConnectionMode,
    pub connected: bool,
    pub state: GateState,
    /// Animal events, newest first.
    pub events: Vec<AnimalEvent>,
    pub timeout_secs: u32,
    /// Raw serial traffic, oldest first.
    pub serial_log: Vec<SerialLogEntry>,
}

/// Notifications published by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Gate(GateEvent),
    ModeChanged(ConnectionMode),
    /// The hardware link failed and the session fell back to simulation.
    TransportFailure(String),
    CommandSent(String),
}

/// How a command was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Written to the device.
    Sent,
    /// Handled by the simulated device.
    Simulated,
    /// No device connected; nothing was sent.
    NotConnected,
}

enum Request {
    Intent {
        command: Command,
        reply: oneshot::Sender<GateResult<Dispatch>>,
    },
    SendToDevice {
        command: Command,
        reply: oneshot::Sender<GateResult<Dispatch>>,
    },
    Attach {
        io: BoxedIo,
        label: String,
        reply: oneshot::Sender<GateResult<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum HardwareLine {
    Line(String),
    /// End of the link, with the read or write error if there was one.
    Closed(Option<String>),
}

struct HardwareInput {
    generation: u64,
    line: HardwareLine,
}

struct HardwareLink {
    generation: u64,
    label: String,
    outbound: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

enum Source {
    Simulated { ticks: Interval },
    Hardware(HardwareLink),
    /// Between teardown and the next source starting.
    Detached,
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct GateHandle {
    requests: mpsc::Sender<Request>,
    snapshots: watch::Receiver<GateSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl GateHandle {
    /// Carry out a user intent in the current mode.
    ///
    /// In hardware mode the command is written to the device. In simulated
    /// mode the simulated device answers it. `SetTimeout` also changes the
    /// local auto-close duration in either mode.
    pub async fn intent(&self, command: Command) -> GateResult<Dispatch> {
        self.request(|reply| Request::Intent { command, reply }).await?
    }

    /// Write a command to the device, or report [`Dispatch::NotConnected`].
    pub async fn send_to_device(&self, command: Command) -> GateResult<Dispatch> {
        self.request(|reply| Request::SendToDevice { command, reply }).await?
    }

    /// Open a transport and switch to hardware mode.
    ///
    /// The transport is opened in the calling task, so the session keeps
    /// running while a slow port or host is being reached. On failure the
    /// session stays in its current mode.
    pub async fn connect(&self, config: TransportConfig) -> GateResult<()> {
        let io = match transport::open(&config).await {
            Ok(io) => io,
            Err(e) => {
                warn!("connect failed: {}", e);
                return Err(e);
            }
        };
        self.attach(io, config.to_string()).await
    }

    /// Switch to hardware mode on an already open byte stream.
    pub async fn attach(&self, io: BoxedIo, label: impl Into<String>) -> GateResult<()> {
        let label = label.into();
        self.request(|reply| Request::Attach { io, label, reply }).await?
    }

    /// Tear down the hardware link, if any, and resume simulation.
    pub async fn disconnect(&self) -> GateResult<()> {
        self.request(|reply| Request::Disconnect { reply }).await
    }

    /// Stop the session, releasing any hardware link.
    pub async fn shutdown(&self) -> GateResult<()> {
        self.request(|reply| Request::Shutdown { reply }).await
    }

    pub fn snapshot(&self) -> GateSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<GateSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> GateResult<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .await
            .map_err(|_| GateError::SessionClosed)?;
        response.await.map_err(|_| GateError::SessionClosed)
    }
}

// ============================================================================
// Session
// ============================================================================

/// Entry point for starting a session.
pub struct GateSession;

impl GateSession {
    /// Start a session in simulated mode. Must be called inside a Tokio runtime.
    pub fn spawn(config: GateConfig) -> GateResult<(GateHandle, JoinHandle<()>)> {
        config.validate()?;
        let reconciler = Reconciler::new(&config.reconciler_config())?;
        let simulator = Simulator::new(config.simulator.clone());

        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE);
        let (hardware_tx, hardware_rx) = mpsc::channel(HARDWARE_QUEUE);
        let (event_tx, _) = broadcast::channel(EVENT_QUEUE);

        let tick_period = config.tick_interval();
        let mut timer_ticks = interval_at(Instant::now() + tick_period, tick_period);
        timer_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (snapshot_tx, snapshot_rx) = watch::channel(GateSnapshot {
            mode: ConnectionMode::Simulated,
            connected: false,
            state: reconciler.state().clone(),
            events: Vec::new(),
            timeout_secs: reconciler.timeout_secs(),
            serial_log: Vec::new(),
        });

        let mut actor = SessionActor {
            serial_log: BoundedLog::new(config.serial_log_capacity),
            reconciler,
            simulator,
            source: Source::Detached,
            generation: 0,
            requests: request_rx,
            hardware_tx,
            hardware_rx,
            timer_ticks,
            snapshots: snapshot_tx,
            events: event_tx.clone(),
        };
        actor.source = Source::Simulated {
            ticks: actor.simulator_ticks(),
        };

        let task = tokio::spawn(actor.run());
        let handle = GateHandle {
            requests: request_tx,
            snapshots: snapshot_rx,
            events: event_tx,
        };
        Ok((handle, task))
    }
}

struct SessionActor {
    reconciler: Reconciler,
    simulator: Simulator,
    source: Source,
    generation: u64,
    serial_log: BoundedLog<SerialLogEntry>,
    requests: mpsc::Receiver<Request>,
    hardware_tx: mpsc::Sender<HardwareInput>,
    hardware_rx: mpsc::Receiver<HardwareInput>,
    timer_ticks: Interval,
    snapshots: watch::Sender<GateSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionActor {
    async fn run(mut self) {
        info!("gate session started in simulated mode");

        let shutdown_reply = loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(Request::Shutdown { reply }) => break Some(reply),
                    Some(request) => self.handle_request(request).await,
                    None => break None,
                },
                Some(input) = self.hardware_rx.recv() => self.handle_hardware(input).await,
                _ = self.timer_ticks.tick() => self.on_timer_tick(),
                _ = next_simulator_tick(&mut self.source) => self.on_simulator_tick(),
            }
        };

        self.teardown_hardware().await;
        self.source = Source::Detached;
        info!("gate session stopped");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Intent { command, reply } => {
                let result = self.handle_intent(command).await;
                self.publish_snapshot();
                let _ = reply.send(result);
            }
            Request::SendToDevice { command, reply } => {
                let result = self.send_to_device(command).await;
                self.publish_snapshot();
                let _ = reply.send(result);
            }
            Request::Attach { io, label, reply } => {
                let result = self.attach(io, label).await;
                self.publish_snapshot();
                let _ = reply.send(result);
            }
            Request::Disconnect { reply } => {
                if self.teardown_hardware().await {
                    info!("disconnected from hardware");
                    self.resume_simulation();
                }
                self.publish_snapshot();
                let _ = reply.send(());
            }
            Request::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn handle_intent(&mut self, command: Command) -> GateResult<Dispatch> {
        if let Command::SetTimeout { secs } = command {
            self.reconciler.set_timeout(secs)?;
        }

        if matches!(self.source, Source::Hardware(_)) {
            return self.send_to_device(command).await;
        }

        let now = Utc::now();
        self.log_serial(LineDirection::Tx, command.to_command_string(), now);
        let lines = self.simulator.respond(&command, self.reconciler.state());
        for line in lines {
            self.ingest_line(line);
        }
        Ok(Dispatch::Simulated)
    }

    /// Queue a command for the writer task. Never waits on the device.
    async fn send_to_device(&mut self, command: Command) -> GateResult<Dispatch> {
        let Source::Hardware(link) = &self.source else {
            debug!("not connected, dropping {}", command.to_command_string());
            return Ok(Dispatch::NotConnected);
        };

        let text = command.to_command_string();
        let error = match link.outbound.try_send(command.encode()) {
            Ok(()) => {
                debug!("queued {} for {}", text, link.label);
                metrics::counter!(metric_defs::COMMANDS_SENT.name).increment(1);
                self.log_serial(LineDirection::Tx, text.clone(), Utc::now());
                self.emit(SessionEvent::CommandSent(text));
                return Ok(Dispatch::Sent);
            }
            Err(TrySendError::Full(_)) => io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("device is not reading, {} commands pending", WRITE_QUEUE),
            ),
            Err(TrySendError::Closed(_)) => {
                io::Error::new(io::ErrorKind::BrokenPipe, "device writer stopped")
            }
        };

        self.fail_hardware(format!("write failed: {}", error)).await;
        Err(GateError::TransportFailure(error))
    }

    /// Make `io` the active source. Any previous hardware link is torn down
    /// and the simulator schedule stops before the reader starts.
    async fn attach(&mut self, io: BoxedIo, label: String) -> GateResult<()> {
        self.teardown_hardware().await;
        self.source = Source::Detached;

        let (read_half, write_half) = tokio::io::split(io);
        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();
        let reader = tokio::spawn(read_device(
            read_half,
            generation,
            self.hardware_tx.clone(),
            cancel.clone(),
        ));
        let (outbound, commands) = mpsc::channel(WRITE_QUEUE);
        let writer = tokio::spawn(write_device(
            write_half,
            generation,
            commands,
            self.hardware_tx.clone(),
            cancel.clone(),
        ));

        info!("connected to {} (generation {})", label, generation);
        self.source = Source::Hardware(HardwareLink {
            generation,
            label,
            outbound,
            cancel,
            reader,
            writer,
        });
        self.emit(SessionEvent::ModeChanged(ConnectionMode::Hardware));

        self.send_to_device(Command::Status).await.map(|_| ())
    }

    /// Cancel the reader and writer, and wait for both. The writer closes
    /// the write half on its way out. Returns whether there was a link to
    /// tear down.
    async fn teardown_hardware(&mut self) -> bool {
        let link = match std::mem::replace(&mut self.source, Source::Detached) {
            Source::Hardware(link) => link,
            other => {
                self.source = other;
                return false;
            }
        };

        let HardwareLink {
            generation,
            label,
            outbound,
            cancel,
            reader,
            writer,
        } = link;
        cancel.cancel();
        drop(outbound);
        if let Err(e) = reader.await {
            warn!("reader for {} ended abnormally: {}", label, e);
        }
        if let Err(e) = writer.await {
            warn!("writer for {} ended abnormally: {}", label, e);
        }
        debug!("released {} (generation {})", label, generation);
        true
    }

    fn resume_simulation(&mut self) {
        self.source = Source::Simulated {
            ticks: self.simulator_ticks(),
        };
        info!("simulation resumed");
        self.emit(SessionEvent::ModeChanged(ConnectionMode::Simulated));
    }

    async fn fail_hardware(&mut self, reason: String) {
        error!("hardware link failed: {}", reason);
        metrics::counter!(metric_defs::TRANSPORT_FAILURES.name).increment(1);
        self.teardown_hardware().await;
        self.emit(SessionEvent::TransportFailure(reason));
        self.resume_simulation();
    }

    async fn handle_hardware(&mut self, input: HardwareInput) {
        let current = matches!(
            &self.source,
            Source::Hardware(link) if link.generation == input.generation
        );
        if !current {
            trace!("dropping input from stale generation {}", input.generation);
            return;
        }

        match input.line {
            HardwareLine::Line(line) => self.ingest_line(line),
            HardwareLine::Closed(None) => {
                info!("device closed the connection");
                metrics::counter!(metric_defs::TRANSPORT_FAILURES.name).increment(1);
                self.teardown_hardware().await;
                self.emit(SessionEvent::TransportFailure("connection closed".to_string()));
                self.resume_simulation();
            }
            HardwareLine::Closed(Some(reason)) => self.fail_hardware(reason).await,
        }
        self.publish_snapshot();
    }

    fn on_timer_tick(&mut self) {
        let events = self.reconciler.tick(Utc::now());
        if events.is_empty() {
            return;
        }
        self.dispatch_events(events);
        self.publish_snapshot();
    }

    fn on_simulator_tick(&mut self) {
        let lines = self.simulator.tick(self.reconciler.state());
        for line in lines {
            self.ingest_line(line);
        }
        self.publish_snapshot();
    }

    /// Parse one line and apply it. Both sources come through here.
    fn ingest_line(&mut self, line: String) {
        let now = Utc::now();
        let mode = self.mode().as_str();
        trace!("rx [{}] {}", mode, line);
        metrics::counter!(metric_defs::LINES_RECEIVED.name, "mode" => mode).increment(1);

        let message = DecodedMessage::parse(&line);
        self.log_serial(LineDirection::Rx, line, now);
        let events = self.reconciler.apply(&message, now);
        self.dispatch_events(events);
    }

    fn dispatch_events(&mut self, events: Vec<GateEvent>) {
        let mode = self.mode().as_str();
        for event in events {
            match &event {
                GateEvent::StateChanged { current, .. } => {
                    let open = if current.is_open { 1.0 } else { 0.0 };
                    metrics::gauge!(metric_defs::GATE_OPEN.name).set(open);
                    metrics::gauge!(metric_defs::BATTERY_LEVEL.name)
                        .set(f64::from(current.battery_level));
                }
                GateEvent::AnimalRecorded(animal) => {
                    metrics::counter!(
                        metric_defs::ANIMAL_EVENTS.name,
                        "mode" => mode,
                        "direction" => animal.direction.as_str(),
                        "trigger" => animal.sensor_triggered.as_str()
                    )
                    .increment(1);
                }
                GateEvent::AutoClosed => {
                    info!("gate auto-closed after {}s", self.reconciler.timeout_secs());
                    metrics::counter!(metric_defs::AUTO_CLOSES.name).increment(1);
                }
                GateEvent::MalformedField(_) => {
                    metrics::counter!(metric_defs::FIELDS_MALFORMED.name, "mode" => mode)
                        .increment(1);
                }
                GateEvent::Unrecognized(_) => {
                    metrics::counter!(metric_defs::LINES_UNRECOGNIZED.name, "mode" => mode)
                        .increment(1);
                }
            }
            self.emit(SessionEvent::Gate(event));
        }
    }

    fn log_serial(&mut self, direction: LineDirection, line: String, at: DateTime<Utc>) {
        self.serial_log.push(SerialLogEntry { direction, line, at });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn mode(&self) -> ConnectionMode {
        match self.source {
            Source::Hardware(_) => ConnectionMode::Hardware,
            Source::Simulated { .. } | Source::Detached => ConnectionMode::Simulated,
        }
    }

    fn simulator_ticks(&self) -> Interval {
        let period = self.simulator.interval();
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticks
    }

    fn snapshot(&self) -> GateSnapshot {
        GateSnapshot {
            mode: self.mode(),
            connected: matches!(self.source, Source::Hardware(_)),
            state: self.reconciler.state().clone(),
            events: self.reconciler.events().newest_first(),
            timeout_secs: self.reconciler.timeout_secs(),
            serial_log: self.serial_log.iter().cloned().collect(),
        }
    }

    fn publish_snapshot(&self) {
        self.snapshots.send_replace(self.snapshot());
    }
}

async fn next_simulator_tick(source: &mut Source) {
    match source {
        Source::Simulated { ticks } => {
            ticks.tick().await;
        }
        Source::Hardware(_) | Source::Detached => std::future::pending::<()>().await,
    }
}

/// Read lines from the device until cancelled or the stream ends.
async fn read_device(
    read_half: ReadHalf<BoxedIo>,
    generation: u64,
    lines: mpsc::Sender<HardwareInput>,
    cancel: CancellationToken,
) {
    let mut reader = LineReader::new(read_half);

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = reader.read_line() => result,
        };

        let line = match result {
            Ok(Some(line)) => HardwareLine::Line(line),
            Ok(None) => HardwareLine::Closed(None),
            Err(e) => HardwareLine::Closed(Some(format!("read failed: {}", e))),
        };
        let finished = matches!(line, HardwareLine::Closed(_));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = lines.send(HardwareInput { generation, line }) => {
                if sent.is_err() {
                    return;
                }
            }
        }

        if finished {
            return;
        }
    }
}

/// Write queued commands until cancelled. A failed write is reported as the
/// end of the link. The write half is shut down on exit.
async fn write_device(
    write_half: WriteHalf<BoxedIo>,
    generation: u64,
    mut commands: mpsc::Receiver<Vec<u8>>,
    failures: mpsc::Sender<HardwareInput>,
    cancel: CancellationToken,
) {
    let mut writer = LineWriter::new(write_half);

    loop {
        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            bytes = commands.recv() => match bytes {
                Some(bytes) => bytes,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = writer.write_raw(&bytes) => result,
        };

        if let Err(e) = result {
            let line = HardwareLine::Closed(Some(format!("write failed: {}", e)));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = failures.send(HardwareInput { generation, line }) => {}
            }
            break;
        }
    }

    match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("closing write half: {}", e),
        Err(_) => debug!("closing write half timed out"),
    }
}
