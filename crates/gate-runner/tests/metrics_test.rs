//! Session metrics scraped through the Prometheus exporter.
//!
//! Lives in its own test binary: the recorder is process-global.

#![cfg(feature = "prometheus")]

use std::net::SocketAddr;
use std::time::Duration;

use gate_core::SimulatorConfig;
use gate_protocol::Command;
use gate_runner::{GateConfig, GateSession};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn scrape(addr: SocketAddr) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut body = String::new();
    stream.read_to_string(&mut body).await.unwrap();
    body
}

#[tokio::test]
async fn test_session_metrics_are_exported() {
    let addr = free_addr().await;
    gate_metrics::install_prometheus(addr).unwrap();

    let (handle, _task) = GateSession::spawn(GateConfig {
        simulator: SimulatorConfig {
            open_probability: 0.0,
            seed: Some(5),
            ..Default::default()
        },
        ..Default::default()
    })
    .unwrap();

    handle.intent(Command::Open).await.unwrap();
    assert!(handle.snapshot().state.is_open);

    // The listener starts in the background
    let mut body = String::new();
    for _ in 0..50 {
        if TcpStream::connect(addr).await.is_ok() {
            body = scrape(addr).await;
            if body.contains("trigger=\"MANUAL\"") {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert!(body.contains("gate_lines_received"), "{}", body);
    assert!(body.contains("gate_animal_events"), "{}", body);
    assert!(body.contains("trigger=\"MANUAL\""), "{}", body);
    assert!(body.contains("gate_open"), "{}", body);

    handle.shutdown().await.unwrap();
}
