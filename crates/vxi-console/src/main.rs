//! vxi-console - interactive VXI-11 device console
//!
//! Builds a device core over simulated instruments and drives one link
//! from stdin. SCPI lines are written to the instrument, `:`-prefixed
//! lines map to the other core channel procedures. Service requests
//! arrive through the interrupt channel and are printed as they come.
//!
//! Usage:
//!   vxi-console [OPTIONS]
//!
//! Examples:
//!   vxi-console --device inst0
//!   vxi-console --config console.toml --device gpib0,5 --lock

mod config;
mod session;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vxi_device::{ChannelSink, DeviceCore, InterruptDispatcher};
use vxi_instrument::SimulatedInstrumentFactory;

use crate::config::ConsoleConfig;
use crate::session::{ConsoleCommand, Session};

#[derive(Parser, Debug)]
#[command(name = "vxi-console")]
#[command(about = "Interactive console for a simulated VXI-11 device server")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<String>,

    /// Device name to link to
    #[arg(short, long, default_value = "inst0")]
    device: String,

    /// Client id used for create_link
    #[arg(long, default_value_t = 1)]
    client_id: u32,

    /// Lock the device when creating the link
    #[arg(long)]
    lock: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "vxi_console=debug,vxi_device=debug,vxi_instrument=debug"
    } else {
        "vxi_console=info,vxi_device=info,vxi_instrument=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &args.config {
        Some(path) => {
            info!("Loading config from: {}", path);
            ConsoleConfig::load(path)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?
        }
        None => ConsoleConfig::default(),
    };

    let factory = SimulatedInstrumentFactory::new(config.instruments.clone());
    info!(instruments = ?factory.names(), mode = ?config.server.mode, "Starting vxi-console");
    let core = Arc::new(DeviceCore::new(config.server.clone(), Arc::new(factory)));

    let (sink, mut srq_rx) = ChannelSink::channel(config.server.service_request_capacity);
    let dispatcher = InterruptDispatcher::spawn(core.subscribe_service_requests(), sink);

    let session = Session::open(core.clone(), args.client_id, &args.device, args.lock).await?;
    info!(link_id = %session.link_id(), device = %args.device, "Link ready");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    stdout.write_all(b"Type :help for console commands\n").await?;

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let command = match ConsoleCommand::parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        stdout.write_all(format!("{}\n", e).as_bytes()).await?;
                        continue;
                    }
                };
                if command == ConsoleCommand::Quit {
                    break;
                }
                let output = session.run(command).await;
                stdout.write_all(format!("{}\n", output).as_bytes()).await?;
            }
            Some(request) = srq_rx.recv() => {
                let message = format!(
                    "\nSRQ from {} (link {}, status {:#04x}, handle {})\n",
                    request.device,
                    request.link_id,
                    request.status,
                    String::from_utf8_lossy(&request.handle),
                );
                stdout.write_all(message.as_bytes()).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    session.close().await;
    dispatcher.stop();
    info!("vxi-console stopped");
    Ok(())
}
