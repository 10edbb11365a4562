//! Overlay worker process
//!
//! Tints one monitor with a translucent black window whose opacity follows
//! the value the daemon writes to the monitor's channel.

mod window;
mod worker;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use dimmer_core::smoothing::WORKER_FACTOR;
use dimmer_core::{ChannelReader, MonitorId, Smoother};
use tracing_subscriber::EnvFilter;

use crate::window::X11Overlay;
use crate::worker::OverlayWorker;

#[derive(Parser, Debug)]
#[command(name = "dimmer-overlay")]
#[command(about = "Per-monitor overlay worker for adaptive-dimmer")]
struct Args {
    /// Monitor to cover (1-based)
    monitor: MonitorId,

    /// Opacity channel to follow
    channel: PathBuf,

    /// Smoothing factor applied between channel updates
    #[arg(long, env = "ADAPTIVE_DIMMER_WORKER_SMOOTHING", default_value_t = WORKER_FACTOR)]
    smoothing: f64,

    /// Channel poll period in milliseconds
    #[arg(long, env = "ADAPTIVE_DIMMER_WORKER_POLL_MS", default_value_t = 50)]
    poll_ms: u64,

    /// X display to use instead of $DISPLAY
    #[arg(long)]
    display: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let args = Args::parse();

    let surface = X11Overlay::open(args.display.as_deref(), args.monitor)?;
    let reader = ChannelReader::new(args.channel);
    let worker = OverlayWorker::new(surface, reader, Smoother::worker(args.smoothing));

    tracing::info!(
        monitor = %args.monitor,
        "Overlay worker running (smoothing {}, poll {} ms)",
        args.smoothing,
        args.poll_ms
    );

    worker.run(Duration::from_millis(args.poll_ms.max(1))).await
}
