//! Runtime for the animal gate controller.
//!
//! A [`GateSession`] owns the gate state and feeds it from exactly one message
//! source at a time: the built-in simulator or a hardware transport (serial
//! port or TCP). Callers drive it through a [`GateHandle`] and observe it
//! through snapshots and session events.
//!
//! ```rust,ignore
//! let (handle, task) = GateSession::spawn(GateConfig::default())?;
//! handle.intent(Command::Open).await?;
//! println!("{:?}", handle.snapshot().state);
//! handle.shutdown().await?;
//! ```

pub mod config;
pub mod console;
pub mod emulator;
pub mod error;
pub mod session;
pub mod transport;

pub use config::GateConfig;
pub use emulator::{EmulatedDevice, Emulator};
pub use error::{GateError, GateResult};
pub use session::{
    ConnectionMode, Dispatch, GateHandle, GateSession, GateSnapshot, LineDirection, SerialLogEntry,
    SessionEvent, WRITE_QUEUE,
};
pub use transport::{BoxedIo, DeviceIo, TransportConfig, CONNECT_TIMEOUT, DEFAULT_BAUD_RATE};
