//! Headless console front-end for the broadcaster.

mod commands;
mod config;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use broadcaster_capture::TestPatternSource;
use broadcaster_encoder::passthrough_factory;
use broadcaster_engine::{create_engine, spawn_engine};
use broadcaster_ipc::{command_channel, event_channel, EngineCommand, EngineEvent};
use broadcaster_transport::RtmpTransport;

pub use commands::{parse_command, HELP};
pub use config::{apply_overrides, load_config};

/// Initialize logging.
fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "broadcaster_lib=debug,broadcaster_engine=debug,broadcaster_capture=debug,broadcaster_encoder=debug,broadcaster_transport=debug".into()
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

pub fn run() -> anyhow::Result<()> {
    init_logging();
    info!("Broadcaster starting");

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = load_config(config_path.as_deref())?;
    let request_timeout = Duration::from_millis(config.request_timeout_ms);

    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();

    let engine = create_engine(
        config,
        Arc::new(TestPatternSource::new()),
        Arc::new(RtmpTransport::new(request_timeout)),
        passthrough_factory(),
        command_rx,
        event_tx,
    )
    .context("Failed to create engine")?;
    let engine_thread = spawn_engine(engine).context("Failed to spawn engine thread")?;

    let printer = thread::Builder::new()
        .name("broadcaster-events".to_string())
        .spawn(move || print_events(event_rx))
        .context("Failed to spawn event thread")?;

    println!("{}", HELP);
    read_commands(io::stdin().lock(), &command_tx);
    drop(command_tx);

    if engine_thread.join().is_err() {
        error!("Engine thread panicked");
    }
    if printer.join().is_err() {
        error!("Event thread panicked");
    }

    info!("Broadcaster stopped");
    Ok(())
}

/// Forward console commands until `quit` or end of input.
fn read_commands(input: impl BufRead, commands: &Sender<EngineCommand>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read input");
                break;
            }
        };

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{}", message);
                continue;
            }
        };

        let quit = matches!(command, EngineCommand::Shutdown);
        if let Err(e) = commands.send(command) {
            error!("Failed to send command: {}", e);
            break;
        }
        if quit {
            break;
        }
    }
}

/// Print engine events as JSON lines until the engine shuts down.
fn print_events(events: Receiver<EngineEvent>) {
    for event in events {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "Failed to serialize event"),
        }
        if matches!(event, EngineEvent::Shutdown) {
            break;
        }
    }
}
