//! adaptive-dimmer CLI
//!
//! Control and configuration tool for the dimming daemon.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use dimmer_core::paths::{default_socket_path, DEFAULT_CONFIG_PATH};
use dimmer_core::protocol::{DaemonStatus, IpcRequest, IpcResponse};
use dimmer_core::MonitorId;
use miette::{IntoDiagnostic, WrapErr};

#[derive(Parser, Debug)]
#[command(name = "dimmer")]
#[command(about = "Control tool for the adaptive screen dimmer")]
#[command(version)]
struct Cli {
    /// Path to configuration file [default: ~/.config/adaptive-dimmer/config.kdl]
    #[arg(short, long)]
    config: Option<String>,

    /// Control socket path (overrides the config file)
    #[arg(long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file
    Validate,

    /// List monitors reported by the X server
    Monitors,

    /// Show current daemon status
    Status,

    /// Show recent daemon log lines
    Logs {
        /// Number of lines
        #[arg(short = 'n', long, default_value_t = 20)]
        lines: usize,
    },

    /// Set the monitors to dim (no ids deactivates all)
    Activate {
        /// Monitor ids, 1-based
        ids: Vec<MonitorId>,
    },

    /// Set the dim strength in percent
    Strength {
        percent: f64,
    },

    /// Suspend dimming and clear all overlays
    Pause,

    /// Resume dimming
    Resume,

    /// Stop the daemon
    Shutdown,
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let required = cli.config.is_some();
    let config_arg = cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
    let config_path: PathBuf = shellexpand::tilde(config_arg).into_owned().into();

    let request = match cli.command {
        Commands::Validate => return cmd_validate(&config_path),
        Commands::Monitors => return cmd_monitors(),
        Commands::Status => IpcRequest::Status,
        Commands::Logs { lines } => IpcRequest::Logs { limit: Some(lines) },
        Commands::Activate { ids } => IpcRequest::SetActiveMonitors { monitors: ids },
        Commands::Strength { percent } => IpcRequest::SetDimStrength { percent },
        Commands::Pause => IpcRequest::Pause,
        Commands::Resume => IpcRequest::Resume,
        Commands::Shutdown => IpcRequest::Shutdown,
    };

    let socket_path = resolve_socket_path(cli.socket, &config_path, required)?;
    let response = send_request(&socket_path, &request)?;
    print_response(response)
}

fn cmd_validate(config_path: &Path) -> miette::Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = dimmer_config::parse_config(config_path).map_err(miette::Report::new)?;

    println!("Configuration is valid!");
    println!(
        "  Curve: {} -> {} (cap {:.0})",
        config.curve.threshold_start,
        config.curve.threshold_max,
        config.curve.cap()
    );
    println!(
        "  Smoothing: supervisor {}, worker {}",
        config.smoothing.supervisor, config.smoothing.worker
    );
    println!("  Tick: {} ms", config.timing.tick.as_millis());
    println!(
        "  Monitors: {}",
        config
            .monitors
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Dim strength: {}%", config.dim_strength);
    Ok(())
}

fn cmd_monitors() -> miette::Result<()> {
    let display = dimmer_x11::Display::connect(None)
        .into_diagnostic()
        .wrap_err("Failed to connect to X server")?;
    let monitors = display.monitors().into_diagnostic()?;

    println!("Monitors:\n");
    for monitor in monitors {
        let g = monitor.geometry;
        println!(
            "  {}: {}{}",
            monitor.id,
            monitor.name,
            if monitor.primary { " (primary)" } else { "" }
        );
        println!("    Geometry: {}x{}+{}+{}", g.width, g.height, g.x, g.y);
    }
    Ok(())
}

fn resolve_socket_path(
    flag: Option<PathBuf>,
    config_path: &Path,
    required: bool,
) -> miette::Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path);
    }
    let config = dimmer_config::load_config(config_path, required).map_err(miette::Report::new)?;
    Ok(config.global.socket_path.unwrap_or_else(default_socket_path))
}

/// Send one request to the daemon and wait for its response.
fn send_request(socket_path: &Path, request: &IpcRequest) -> miette::Result<IpcResponse> {
    let mut stream = UnixStream::connect(socket_path)
        .into_diagnostic()
        .wrap_err_with(|| {
            format!(
                "Could not connect to {} (is dimmerd running?)",
                socket_path.display()
            )
        })?;

    let mut payload = serde_json::to_string(request).into_diagnostic()?;
    tracing::debug!("Sending request: {}", payload);
    payload.push('\n');
    stream.write_all(payload.as_bytes()).into_diagnostic()?;
    stream.flush().into_diagnostic()?;

    let mut line = String::new();
    BufReader::new(&stream)
        .read_line(&mut line)
        .into_diagnostic()
        .wrap_err("Failed to read daemon response")?;
    if line.trim().is_empty() {
        return Err(miette::miette!("Daemon closed the connection without a response"));
    }

    serde_json::from_str(line.trim())
        .into_diagnostic()
        .wrap_err("Malformed daemon response")
}

fn print_response(response: IpcResponse) -> miette::Result<()> {
    match response {
        IpcResponse::Success { message } => {
            if let Some(message) = message {
                println!("{}", message);
            }
            Ok(())
        }
        IpcResponse::Status(status) => {
            print!("{}", format_status(&status));
            Ok(())
        }
        IpcResponse::Logs { lines } => {
            for line in lines {
                println!("{}", line);
            }
            Ok(())
        }
        IpcResponse::Error { message } => Err(miette::miette!("{}", message)),
    }
}

fn format_status(status: &DaemonStatus) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Dimming: {} (strength {:.0}%)\n",
        if status.paused { "paused" } else { "active" },
        status.dim_strength
    ));

    if status.monitors.is_empty() {
        out.push_str("No overlay workers\n");
        return out;
    }

    for monitor in &status.monitors {
        let active = status.active_monitors.contains(&monitor.monitor);
        out.push_str(&format!(
            "Monitor {}{}: worker {}",
            monitor.monitor,
            if active { "" } else { " (inactive)" },
            monitor.worker
        ));
        if let Some(pid) = monitor.pid {
            out.push_str(&format!(" (pid {})", pid));
        }
        out.push('\n');
        out.push_str(&format!(
            "  opacity {:.1} -> {:.1}\n",
            monitor.opacity, monitor.target
        ));
        if let (Some(raw), Some(dimmed)) = (monitor.raw_brightness, monitor.dimmed_brightness) {
            out.push_str(&format!("  brightness {:.1} (seen {:.1})\n", raw, dimmed));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use dimmer_core::protocol::{MonitorStatus, WorkerState};
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    fn monitor(id: u32) -> MonitorId {
        MonitorId::new(id).unwrap()
    }

    #[test]
    fn test_cli_parses_activate_ids() {
        let cli = Cli::try_parse_from(["dimmer", "activate", "1", "2"]).unwrap();
        match cli.command {
            Commands::Activate { ids } => assert_eq!(ids, vec![monitor(1), monitor(2)]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_rejects_monitor_zero() {
        assert!(Cli::try_parse_from(["dimmer", "activate", "0"]).is_err());
    }

    #[test]
    fn test_cli_logs_default_count() {
        let cli = Cli::try_parse_from(["dimmer", "logs"]).unwrap();
        assert!(matches!(cli.command, Commands::Logs { lines: 20 }));
    }

    #[test]
    fn test_send_request_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("adaptive-dimmer.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let daemon = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut line = String::new();
            BufReader::new(&stream).read_line(&mut line).unwrap();
            let request: IpcRequest = serde_json::from_str(line.trim()).unwrap();
            assert_eq!(request, IpcRequest::SetDimStrength { percent: 60.0 });

            let mut writer = &stream;
            writer
                .write_all(b"{\"type\":\"success\",\"message\":\"ok\"}\n")
                .unwrap();
        });

        let response =
            send_request(&socket_path, &IpcRequest::SetDimStrength { percent: 60.0 }).unwrap();
        assert_eq!(response, IpcResponse::success("ok"));
        daemon.join().unwrap();
    }

    #[test]
    fn test_send_request_without_daemon() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("missing.sock");

        let err = send_request(&socket_path, &IpcRequest::Status).unwrap_err();
        assert!(err.to_string().contains("is dimmerd running?"));
    }

    #[test]
    fn test_error_response_is_failure() {
        assert!(print_response(IpcResponse::error("nope")).is_err());
        assert!(print_response(IpcResponse::success("fine")).is_ok());
    }

    #[test]
    fn test_resolve_socket_prefers_flag() {
        let temp_dir = TempDir::new().unwrap();
        let flag = temp_dir.path().join("flag.sock");
        let resolved =
            resolve_socket_path(Some(flag.clone()), &temp_dir.path().join("none.kdl"), true)
                .unwrap();
        assert_eq!(resolved, flag);
    }

    #[test]
    fn test_resolve_socket_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.kdl");
        std::fs::write(
            &config_path,
            "global {\n    socket-path \"/tmp/custom-dimmer.sock\"\n}\n",
        )
        .unwrap();

        let resolved = resolve_socket_path(None, &config_path, true).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/custom-dimmer.sock"));
    }

    #[test]
    fn test_format_status() {
        let status = DaemonStatus {
            paused: false,
            dim_strength: 80.0,
            active_monitors: vec![monitor(1)],
            monitors: vec![MonitorStatus {
                monitor: monitor(1),
                worker: WorkerState::Running,
                pid: Some(4242),
                opacity: 42.0,
                target: 90.0,
                raw_brightness: Some(150.0),
                dimmed_brightness: Some(125.3),
            }],
        };

        assert_eq!(
            format_status(&status),
            "Dimming: active (strength 80%)\n\
             Monitor 1: worker running (pid 4242)\n  \
             opacity 42.0 -> 90.0\n  \
             brightness 150.0 (seen 125.3)\n"
        );
    }
}
