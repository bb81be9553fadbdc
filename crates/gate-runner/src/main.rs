//! `gatectl`: run a gate session or emulate a gate device.

#[cfg(feature = "prometheus")]
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use gate_core::GateEvent;
use gate_runner::console::{parse_input, ConsoleInput, HELP};
use gate_runner::{
    Emulator, GateConfig, GateError, GateHandle, GateResult, GateSession, GateSnapshot,
    SessionEvent, TransportConfig, DEFAULT_BAUD_RATE,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "gatectl", version, about = "Animal gate controller")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Serve Prometheus metrics on this address, e.g. 127.0.0.1:9100
    #[cfg(feature = "prometheus")]
    #[arg(long, global = true)]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session, reading commands from stdin
    Run {
        /// Serial port of the gate controller
        #[arg(long, conflicts_with = "tcp")]
        serial: Option<String>,

        /// Serial baud rate
        #[arg(long)]
        baud: Option<u32>,

        /// TCP address of the gate controller (or of `gatectl emulate`)
        #[arg(long)]
        tcp: Option<String>,

        /// Auto-close timeout in seconds
        #[arg(long)]
        timeout: Option<u32>,

        /// Simulator seed
        #[arg(long)]
        seed: Option<u64>,

        /// Print snapshots as JSON lines instead of event summaries
        #[arg(long)]
        json: bool,
    },
    /// Serve an emulated gate device over TCP
    Emulate {
        #[arg(long, default_value = "127.0.0.1:7000")]
        listen: String,

        /// Auto-close timeout in seconds
        #[arg(long)]
        timeout: Option<u32>,

        /// Activity seed
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> GateResult<()> {
    let mut config = load_config(cli.config.as_ref())?;

    #[cfg(feature = "prometheus")]
    if let Some(addr) = cli.metrics_addr {
        gate_metrics::install_prometheus(addr)
            .map_err(|e| GateError::Config(format!("metrics exporter on {}: {}", addr, e)))?;
        info!("serving metrics on http://{}/metrics", addr);
    }

    match cli.command {
        Commands::Run {
            serial,
            baud,
            tcp,
            timeout,
            seed,
            json,
        } => {
            if let Some(path) = serial {
                config.transport = Some(TransportConfig::Serial {
                    path,
                    baud_rate: baud.unwrap_or(DEFAULT_BAUD_RATE),
                });
            } else if let Some(address) = tcp {
                config.transport = Some(TransportConfig::Tcp { address });
            } else if let (Some(rate), Some(TransportConfig::Serial { baud_rate, .. })) =
                (baud, config.transport.as_mut())
            {
                *baud_rate = rate;
            }
            apply_overrides(&mut config, timeout, seed);
            run(config, json).await
        }
        Commands::Emulate { listen, timeout, seed } => {
            apply_overrides(&mut config, timeout, seed);
            emulate(config, &listen).await
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&PathBuf>) -> GateResult<GateConfig> {
    match path {
        Some(path) => {
            info!("loading configuration from {}", path.display());
            GateConfig::load(path)
        }
        None => Ok(GateConfig::default()),
    }
}

fn apply_overrides(config: &mut GateConfig, timeout: Option<u32>, seed: Option<u64>) {
    if let Some(timeout) = timeout {
        config.timeout_secs = timeout;
    }
    if seed.is_some() {
        config.simulator.seed = seed;
    }
}

async fn run(config: GateConfig, json: bool) -> GateResult<()> {
    let transport = config.transport.clone();
    let (handle, task) = GateSession::spawn(config)?;

    if let Some(transport) = &transport {
        if let Err(e) = handle.connect(transport.clone()).await {
            warn!("staying in simulated mode: {}", e);
        }
    }

    let printer = if json {
        tokio::spawn(print_snapshots(handle.clone()))
    } else {
        tokio::spawn(print_events(handle.clone()))
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };

        let input = match parse_input(&line) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{}", message);
                continue;
            }
        };

        match input {
            ConsoleInput::Intent(command) => match handle.intent(command).await {
                Ok(dispatch) => info!("{} -> {:?}", command.to_command_string(), dispatch),
                Err(GateError::SessionClosed) => break,
                Err(e) => warn!("{} failed: {}", command.to_command_string(), e),
            },
            ConsoleInput::Connect => match &transport {
                Some(transport) => {
                    if let Err(e) = handle.connect(transport.clone()).await {
                        warn!("{}", e);
                    }
                }
                None => eprintln!("no transport configured (use --serial or --tcp)"),
            },
            ConsoleInput::Disconnect => handle.disconnect().await?,
            ConsoleInput::Show => print_snapshot(&handle.snapshot()),
            ConsoleInput::Help => eprintln!("{}", HELP),
            ConsoleInput::Quit => break,
        }
    }

    // Already stopped if the session task failed
    let _ = handle.shutdown().await;
    printer.abort();
    if let Err(e) = task.await {
        error!("session task failed: {}", e);
    }
    Ok(())
}

async fn emulate(config: GateConfig, listen: &str) -> GateResult<()> {
    config.validate()?;
    let emulator = Emulator::bind(listen, config).await?;
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    emulator.run(cancel).await
}

async fn print_snapshots(handle: GateHandle) {
    let mut snapshots = handle.subscribe_snapshots();
    loop {
        let json = serde_json::to_string(&*snapshots.borrow_and_update());
        match json {
            Ok(json) => println!("{}", json),
            Err(e) => warn!("could not serialize snapshot: {}", e),
        }
        if snapshots.changed().await.is_err() {
            return;
        }
    }
}

async fn print_events(handle: GateHandle) {
    let mut events = handle.subscribe_events();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("skipped {} session events", skipped);
                continue;
            }
            Err(RecvError::Closed) => return,
        };

        match event {
            SessionEvent::Gate(GateEvent::StateChanged { previous, current }) => {
                if previous.is_open != current.is_open {
                    let status = if current.is_open { "OPEN" } else { "CLOSED" };
                    println!("gate {} (battery {:.1}%)", status, current.battery_level);
                }
            }
            SessionEvent::Gate(GateEvent::AnimalRecorded(animal)) => println!(
                "animal #{} {} via {} at {}",
                animal.id,
                animal.direction.as_str(),
                animal.sensor_triggered.as_str(),
                animal.timestamp.format("%H:%M:%S")
            ),
            SessionEvent::Gate(GateEvent::AutoClosed) => println!("auto-close fired"),
            SessionEvent::Gate(GateEvent::MalformedField(field)) => {
                println!("malformed field: {}", field)
            }
            SessionEvent::Gate(GateEvent::Unrecognized(_)) | SessionEvent::CommandSent(_) => {}
            SessionEvent::ModeChanged(mode) => println!("mode: {}", mode.as_str()),
            SessionEvent::TransportFailure(reason) => println!("hardware lost: {}", reason),
        }
    }
}

fn print_snapshot(snapshot: &GateSnapshot) {
    let state = &snapshot.state;
    println!(
        "mode {} | gate {} | {}s left | IR {} | animal {} | battery {:.1}% | timeout {}s",
        snapshot.mode.as_str(),
        if state.is_open { "OPEN" } else { "CLOSED" },
        state.time_remaining,
        state.ir_sensor_state as u8,
        state.animal_detected as u8,
        state.battery_level,
        snapshot.timeout_secs,
    );
    match state.last_opened {
        Some(at) => println!("last opened {}", at.format("%Y-%m-%d %H:%M:%S")),
        None => println!("last opened never"),
    }
    for animal in snapshot.events.iter().take(5) {
        println!(
            "  #{} {} {} {}",
            animal.id,
            animal.timestamp.format("%H:%M:%S"),
            animal.direction.as_str(),
            animal.sensor_triggered.as_str()
        );
    }
}
