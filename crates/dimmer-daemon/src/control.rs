//! Control surface for the presentation layer
//!
//! Every user action arrives here, either from the control socket or from
//! startup, and is turned into a request against the coordinator or the
//! shared [`Controls`]. Nothing here touches the active set directly.
//!
//! # Example Usage
//!
//! ```bash
//! # Dim monitors 1 and 2
//! echo '{"type":"set_active_monitors","monitors":[1,2]}' | \
//!   socat - UNIX-CONNECT:$XDG_RUNTIME_DIR/adaptive-dimmer.sock
//!
//! # Or use the CLI
//! dimmer activate 1 2
//! dimmer strength 60
//! ```

use std::sync::Arc;

use dimmer_core::protocol::{DaemonStatus, IpcRequest, IpcResponse, MonitorStatus, WorkerState};
use dimmer_core::MonitorId;
use tokio::sync::Notify;

use crate::control_loop::Controls;
use crate::coordinator::{MonitorSetCoordinator, SetChange};
use crate::report::{Presenter, StatusBoard};

/// Default number of lines returned by a `logs` request.
const DEFAULT_LOG_LIMIT: usize = 20;

pub struct ControlSurface {
    coordinator: Arc<MonitorSetCoordinator>,
    controls: Arc<Controls>,
    board: Arc<StatusBoard>,
    shutdown: Arc<Notify>,
}

impl ControlSurface {
    pub fn new(
        coordinator: Arc<MonitorSetCoordinator>,
        controls: Arc<Controls>,
        board: Arc<StatusBoard>,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            coordinator,
            controls,
            board,
            shutdown,
        }
    }

    /// Dispatch one control socket request.
    pub async fn handle(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::SetActiveMonitors { monitors } => {
                let change = self.set_active_monitors(&monitors).await;
                let summary = change.summary();
                if change.failed.is_empty() {
                    IpcResponse::success(summary)
                } else {
                    IpcResponse::error(summary)
                }
            }
            IpcRequest::SetDimStrength { percent } => {
                let stored = self.set_dim_strength(percent);
                IpcResponse::success(format!("Dim strength set to {:.0}%", stored))
            }
            IpcRequest::Pause => {
                let reset = self.pause().await;
                IpcResponse::success(format!("Paused, {} overlay(s) cleared", reset))
            }
            IpcRequest::Resume => {
                self.resume();
                IpcResponse::success("Resumed")
            }
            IpcRequest::Shutdown => {
                self.shutdown();
                IpcResponse::success("Shutting down")
            }
            IpcRequest::Status => IpcResponse::Status(self.status().await),
            IpcRequest::Logs { limit } => IpcResponse::Logs {
                lines: self
                    .board
                    .recent_logs(limit.unwrap_or(DEFAULT_LOG_LIMIT)),
            },
        }
    }

    pub async fn set_active_monitors(&self, monitors: &[MonitorId]) -> SetChange {
        let change = self.coordinator.set_active_monitors(monitors).await;
        for monitor in &change.removed {
            self.board.forget(*monitor);
        }
        self.board.add_log(change.summary());
        change
    }

    /// Store a new dim strength in percent, clamped to 0-100.
    pub fn set_dim_strength(&self, percent: f64) -> f64 {
        let stored = self.controls.set_dim_strength_percent(percent);
        tracing::info!("Dim strength set to {:.1}%", stored);
        self.board
            .add_log(format!("Dim strength set to {:.0}%", stored));
        stored
    }

    /// Suspend dimming and clear every overlay at once.
    ///
    /// The flag is raised before the reset so a tick that is already waiting
    /// for the lock backs off instead of re-dimming. Returns the number of
    /// overlays reset.
    pub async fn pause(&self) -> usize {
        self.controls.set_paused(true);
        let reset = self.coordinator.reset_all().await.len();
        tracing::info!("Dimming paused");
        self.board.add_log("Paused: all overlays cleared".to_string());
        reset
    }

    pub fn resume(&self) {
        self.controls.set_paused(false);
        tracing::info!("Dimming resumed");
        self.board.add_log("Resumed".to_string());
    }

    /// Ask the daemon's main task to begin shutdown.
    pub fn shutdown(&self) {
        tracing::info!("Shutdown requested over control socket");
        self.shutdown.notify_one();
    }

    pub async fn status(&self) -> DaemonStatus {
        let mut set = self.coordinator.lock().await;
        let active_monitors = set.monitors.clone();

        let mut monitors = Vec::new();
        for monitor in set.supervisor.monitors() {
            // Refresh liveness so status reflects workers that died since the last tick.
            set.supervisor.is_alive(monitor);
            let Some(snapshot) = set.supervisor.snapshot(monitor) else {
                continue;
            };
            let latest = self.board.latest(monitor);
            monitors.push(MonitorStatus {
                monitor,
                worker: snapshot.state,
                pid: snapshot.pid.filter(|_| snapshot.state != WorkerState::Dead),
                opacity: snapshot.opacity.current,
                target: snapshot.opacity.target,
                raw_brightness: latest.map(|(raw, _)| raw),
                dimmed_brightness: latest.map(|(_, dimmed)| dimmed),
            });
        }

        DaemonStatus {
            paused: self.controls.is_paused(),
            dim_strength: self.controls.dim_strength_percent(),
            active_monitors,
            monitors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::testing::{monitor, sleeper_options};
    use crate::supervisor::WorkerSupervisor;
    use dimmer_core::ChannelReader;
    use serial_test::serial;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        coordinator: Arc<MonitorSetCoordinator>,
        controls: Arc<Controls>,
        board: Arc<StatusBoard>,
        shutdown: Arc<Notify>,
        surface: ControlSurface,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let coordinator = Arc::new(MonitorSetCoordinator::new(
            WorkerSupervisor::new(sleeper_options(dir.path())),
            Duration::ZERO,
            true,
        ));
        let controls = Arc::new(Controls::new(100.0));
        let board = Arc::new(StatusBoard::new());
        let shutdown = Arc::new(Notify::new());
        let surface = ControlSurface::new(
            coordinator.clone(),
            controls.clone(),
            board.clone(),
            shutdown.clone(),
        );
        Fixture {
            _dir: dir,
            coordinator,
            controls,
            board,
            shutdown,
            surface,
        }
    }

    #[tokio::test]
    async fn test_set_dim_strength_clamps() {
        let f = fixture();
        let response = f
            .surface
            .handle(IpcRequest::SetDimStrength { percent: 140.0 })
            .await;
        assert_eq!(response, IpcResponse::success("Dim strength set to 100%"));

        f.surface
            .handle(IpcRequest::SetDimStrength { percent: 60.0 })
            .await;
        assert_eq!(f.controls.dim_strength_percent(), 60.0);
    }

    #[tokio::test]
    #[serial]
    async fn test_pause_forces_immediate_zero() {
        let f = fixture();
        f.surface.set_active_monitors(&[monitor(1)]).await;
        {
            let mut set = f.coordinator.lock().await;
            set.supervisor.push_opacity(monitor(1), 170.0, true).unwrap();
        }

        let response = f.surface.handle(IpcRequest::Pause).await;
        assert!(matches!(response, IpcResponse::Success { .. }));
        assert!(f.controls.is_paused());

        let set = f.coordinator.lock().await;
        let opacity = set.supervisor.opacity(monitor(1)).unwrap();
        assert_eq!(opacity.current, 0.0);
        assert_eq!(opacity.target, 0.0);
        let reader = ChannelReader::new(set.supervisor.channel_path(monitor(1)).unwrap());
        assert_eq!(reader.read(), Some(0));
        drop(set);

        f.surface.handle(IpcRequest::Resume).await;
        assert!(!f.controls.is_paused());

        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_status_reports_workers() {
        let f = fixture();
        f.surface
            .handle(IpcRequest::SetActiveMonitors {
                monitors: vec![monitor(1)],
            })
            .await;
        f.board.push_brightness(monitor(1), 150.0, 120.0);

        let status = f.surface.status().await;
        assert!(!status.paused);
        assert_eq!(status.dim_strength, 100.0);
        assert_eq!(status.active_monitors, vec![monitor(1)]);
        assert_eq!(status.monitors.len(), 1);

        let entry = &status.monitors[0];
        assert_eq!(entry.worker, WorkerState::Running);
        assert!(entry.pid.is_some());
        assert_eq!(entry.raw_brightness, Some(150.0));
        assert_eq!(entry.dimmed_brightness, Some(120.0));

        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_removed_monitor_forgotten_by_board() {
        let f = fixture();
        f.surface.set_active_monitors(&[monitor(1)]).await;
        f.board.push_brightness(monitor(1), 150.0, 120.0);

        let change = f.surface.set_active_monitors(&[]).await;
        assert_eq!(change.removed, vec![monitor(1)]);
        assert_eq!(f.board.latest(monitor(1)), None);
        assert!(f.surface.status().await.monitors.is_empty());

        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_logs_returns_recent_lines() {
        let f = fixture();
        f.surface.set_dim_strength(50.0);
        f.surface.resume();

        let response = f.surface.handle(IpcRequest::Logs { limit: Some(1) }).await;
        assert_eq!(
            response,
            IpcResponse::Logs {
                lines: vec!["Resumed".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_shutdown_notifies_main_task() {
        let f = fixture();
        let response = f.surface.handle(IpcRequest::Shutdown).await;
        assert_eq!(response, IpcResponse::success("Shutting down"));

        tokio::time::timeout(Duration::from_secs(1), f.shutdown.notified())
            .await
            .unwrap();
    }
}
