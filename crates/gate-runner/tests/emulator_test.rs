//! End-to-end tests: a session connected over TCP to the device emulator.

use std::time::Duration;

use gate_core::SimulatorConfig;
use gate_protocol::{Command, Trigger};
use gate_runner::transport::{LineReader, LineWriter};
use gate_runner::{
    ConnectionMode, Dispatch, Emulator, GateConfig, GateHandle, GateSession, GateSnapshot,
    TransportConfig,
};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Device with a short countdown driven by a fast tick.
fn emulator_config() -> GateConfig {
    GateConfig {
        timeout_secs: 2,
        tick_interval_ms: 50,
        simulator: SimulatorConfig {
            open_probability: 0.0,
            interval_ms: 60_000,
            seed: Some(3),
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn start_emulator() -> (String, CancellationToken) {
    let emulator = Emulator::bind("127.0.0.1:0", emulator_config()).await.unwrap();
    let address = emulator.local_addr().unwrap().to_string();
    let cancel = CancellationToken::new();
    tokio::spawn(emulator.run(cancel.clone()));
    (address, cancel)
}

async fn wait_for(
    handle: &GateHandle,
    predicate: impl FnMut(&GateSnapshot) -> bool,
) -> GateSnapshot {
    let mut snapshots = handle.subscribe_snapshots();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), snapshots.wait_for(predicate))
        .await
        .expect("timed out waiting for snapshot")
        .expect("session closed");
    snapshot.clone()
}

#[tokio::test]
async fn test_session_drives_emulated_device() {
    let (address, cancel) = start_emulator().await;
    let (handle, _task) = GateSession::spawn(GateConfig {
        simulator: SimulatorConfig {
            open_probability: 0.0,
            ..Default::default()
        },
        ..Default::default()
    })
    .unwrap();

    handle.connect(TransportConfig::Tcp { address }).await.unwrap();
    assert_eq!(handle.snapshot().mode, ConnectionMode::Hardware);

    assert_eq!(handle.intent(Command::Open).await.unwrap(), Dispatch::Sent);
    let snapshot = wait_for(&handle, |s| !s.events.is_empty()).await;
    assert_eq!(snapshot.events[0].sensor_triggered, Trigger::Manual);
    assert!(snapshot.state.last_opened.is_some());

    // The device closes on its own countdown
    let snapshot = wait_for(&handle, |s| !s.state.is_open).await;
    assert_eq!(snapshot.state.time_remaining, 0);
    assert_eq!(snapshot.mode, ConnectionMode::Hardware);

    handle.disconnect().await.unwrap();
    cancel.cancel();
}

#[tokio::test]
async fn test_emulator_answers_raw_commands() {
    let (address, cancel) = start_emulator().await;
    let stream = TcpStream::connect(&address).await.unwrap();
    let (read_half, write_half) = stream.into_split();
    let mut reader = LineReader::new(read_half);
    let mut writer = LineWriter::new(write_half);

    let greeting = reader.read_line().await.unwrap().unwrap();
    assert!(greeting.starts_with("STATUS:GATE:CLOSED"));

    writer.write_line("TIMEOUT:abc").await.unwrap();
    let reply = reader.read_line().await.unwrap().unwrap();
    assert!(reply.starts_with("ERR:"));

    writer.write_line("STATUS").await.unwrap();
    let reply = reader.read_line().await.unwrap().unwrap();
    assert_eq!(reply, greeting);

    cancel.cancel();
    let end = tokio::time::timeout(Duration::from_secs(5), reader.read_line())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(end, None);
}

#[tokio::test]
async fn test_connect_failure_keeps_simulation() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let (handle, _task) = GateSession::spawn(GateConfig::default()).unwrap();
    assert!(handle.connect(TransportConfig::Tcp { address }).await.is_err());

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.mode, ConnectionMode::Simulated);
    assert!(!snapshot.connected);
}
