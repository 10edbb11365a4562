//! Adaptive screen dimming daemon
//!
//! Samples each active monitor's brightness and drives a per-monitor overlay
//! worker that darkens the screen when content gets too bright.

mod control;
mod control_loop;
mod coordinator;
mod error;
mod ipc;
mod process;
mod report;
mod sampler;
mod supervisor;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dimmer_config::Config;
use dimmer_core::paths::{
    default_channel_dir, default_socket_path, DEFAULT_CONFIG_PATH, WORKER_POLL_ENV,
    WORKER_SMOOTHING_ENV,
};
use dimmer_core::{DimmingCurve, MonitorId, Smoother};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::control::ControlSurface;
use crate::control_loop::{ControlLoop, Controls};
use crate::coordinator::MonitorSetCoordinator;
use crate::ipc::{handle_ipc_connection, IpcServer};
use crate::report::{BrightnessLog, Presenter, Reporter, StatusBoard};
use crate::sampler::X11Sampler;
use crate::supervisor::{SupervisorOptions, WorkerCommand, WorkerSupervisor};

/// Name of the worker executable looked up next to the daemon binary.
const WORKER_BINARY: &str = "dimmer-overlay";

#[derive(Parser, Debug)]
#[command(name = "dimmerd")]
#[command(about = "Adaptive screen dimming daemon")]
struct Args {
    /// Path to configuration file [default: ~/.config/adaptive-dimmer/config.kdl]
    #[arg(short, long)]
    config: Option<String>,

    /// Control socket path (overrides the config file)
    #[arg(long)]
    socket: Option<PathBuf>,
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Install the subscriber. Without `RUST_LOG` the returned handle lets the
/// config's log level replace the startup default.
fn init_tracing() -> Option<FilterHandle> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
        Err(_) => {
            let (filter, handle) = reload::Layer::new(EnvFilter::new("info"));
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            Some(handle)
        }
    }
}

fn resolve_worker_program(config: &Config) -> PathBuf {
    if let Some(program) = &config.worker.program {
        return program.clone();
    }

    match std::env::current_exe() {
        Ok(exe) => {
            let sibling = exe.with_file_name(WORKER_BINARY);
            if sibling.exists() {
                return sibling;
            }
        }
        Err(e) => tracing::debug!("Could not locate own executable: {}", e),
    }
    PathBuf::from(WORKER_BINARY)
}

fn supervisor_options(config: &Config) -> SupervisorOptions {
    let command = WorkerCommand {
        program: resolve_worker_program(config),
        args: config.worker.args.clone(),
        env: vec![
            (
                WORKER_SMOOTHING_ENV.to_string(),
                config.smoothing.worker.to_string(),
            ),
            (
                WORKER_POLL_ENV.to_string(),
                config.timing.worker_poll.as_millis().to_string(),
            ),
        ],
    };

    SupervisorOptions {
        command,
        channel_dir: config
            .worker
            .channel_dir
            .clone()
            .unwrap_or_else(default_channel_dir),
        spawn_grace: config.timing.spawn_grace,
        terminate_timeout: config.timing.terminate_timeout,
        smoother: Smoother::supervisor(config.smoothing.supervisor),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter_handle = init_tracing();
    let args = Args::parse();

    let required = args.config.is_some();
    let config_arg = args.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
    let config_path: PathBuf = shellexpand::tilde(config_arg).into_owned().into();

    tracing::info!("Loading configuration from {}", config_path.display());
    let config = dimmer_config::load_config(&config_path, required)?;

    if let Some(handle) = filter_handle {
        handle
            .reload(EnvFilter::new(config.global.log_level.as_filter()))
            .context("Failed to apply configured log level")?;
    }

    let options = supervisor_options(&config);
    tracing::info!(
        "Overlay worker: {} (channels in {})",
        options.command.program.display(),
        options.channel_dir.display()
    );

    let sampler = X11Sampler::connect(None, config.sampler.rows)
        .context("Failed to connect to the X server for brightness sampling")?;

    let coordinator = Arc::new(MonitorSetCoordinator::new(
        WorkerSupervisor::new(options),
        config.timing.settle,
        config.calibration,
    ));
    let controls = Arc::new(Controls::new(config.dim_strength));
    let board = Arc::new(StatusBoard::new());
    let shutdown = Arc::new(Notify::new());

    let brightness_log = match &config.global.brightness_log {
        Some(path) => Some(BrightnessLog::create(path).with_context(|| {
            format!("Failed to create brightness log {}", path.display())
        })?),
        None => None,
    };
    let presenter: Arc<dyn Presenter> = board.clone();
    let reporter = Reporter::new(
        presenter,
        brightness_log,
        config.timing.record_interval,
        config.timing.console_interval,
    );

    let curve = DimmingCurve::with_cap_fraction(
        config.curve.threshold_start,
        config.curve.threshold_max,
        config.curve.max_opacity,
        config.curve.cap_fraction,
    );
    let control_loop = ControlLoop::new(
        Arc::clone(&coordinator),
        Arc::new(sampler),
        Arc::clone(&controls),
        curve,
        reporter,
        config.timing.tick,
        config.timing.console_interval,
    );

    let surface = Arc::new(ControlSurface::new(
        Arc::clone(&coordinator),
        Arc::clone(&controls),
        Arc::clone(&board),
        Arc::clone(&shutdown),
    ));

    let socket_path = args
        .socket
        .or_else(|| config.global.socket_path.clone())
        .unwrap_or_else(default_socket_path);
    let server = IpcServer::bind(&socket_path)?;

    let initial: Vec<MonitorId> = config
        .monitors
        .iter()
        .filter_map(|id| MonitorId::new(*id))
        .collect();
    let change = surface.set_active_monitors(&initial).await;
    if change.active.is_empty() && !initial.is_empty() {
        tracing::warn!("No monitor could be activated at startup; waiting for control requests");
    }

    let loop_task = tokio::spawn(control_loop.run());

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    loop {
        tokio::select! {
            accepted = server.accept() => match accepted {
                Ok(stream) => {
                    let surface = Arc::clone(&surface);
                    tokio::spawn(async move {
                        let result = handle_ipc_connection(stream, |request| async move {
                            surface.handle(request).await
                        })
                        .await;
                        if let Err(e) = result {
                            tracing::warn!("IPC connection failed: {:#}", e);
                        }
                    });
                }
                Err(e) => tracing::warn!("{:#}", e),
            },
            _ = shutdown.notified() => {
                tracing::info!("Shutdown requested");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    controls.stop();
    if let Err(e) = loop_task.await {
        tracing::error!("Control loop task failed: {}", e);
    }
    coordinator.shutdown().await;
    drop(server);

    tracing::info!("Daemon stopped");
    Ok(())
}
