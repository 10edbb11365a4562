//! Overlay worker supervision
//!
//! The supervisor owns one worker process and one opacity channel per monitor.
//! It is the only writer to the channels and the only party that spawns or
//! terminates workers. Callers serialize access through the coordinator lock.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use dimmer_core::protocol::WorkerState;
use dimmer_core::{MonitorId, OpacityChannel, OpacityState, Smoother};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tokio::process::Command;

use crate::error::SupervisorError;
use crate::process::{SupervisedProcess, Termination};

/// How long to wait for a failed worker's output to drain.
const DIAGNOSTICS_TIMEOUT: Duration = Duration::from_millis(250);

/// How to launch an overlay worker.
///
/// The worker is invoked as `<program> [args...] <monitor> <channel>`.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl WorkerCommand {
    fn build(&self, monitor: MonitorId, channel: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(monitor.to_string())
            .arg(channel)
            .envs(self.env.iter().map(|(key, value)| (key, value)));
        command
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub command: WorkerCommand,
    /// Directory for the per-monitor channel slots
    pub channel_dir: PathBuf,
    /// A worker still alive after this long counts as started
    pub spawn_grace: Duration,
    /// How long a worker gets to exit after SIGTERM before it is killed
    pub terminate_timeout: Duration,
    /// Smoothing applied to non-immediate opacity pushes
    pub smoother: Smoother,
}

/// Point-in-time view of one worker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerSnapshot {
    pub state: WorkerState,
    pub pid: Option<u32>,
    pub opacity: OpacityState,
}

struct WorkerHandle {
    process: SupervisedProcess,
    channel: OpacityChannel,
    opacity: OpacityState,
}

pub struct WorkerSupervisor {
    options: SupervisorOptions,
    workers: HashMap<MonitorId, WorkerHandle>,
}

impl WorkerSupervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        Self {
            options,
            workers: HashMap::new(),
        }
    }

    /// Start a worker for `monitor`, replacing any existing one.
    ///
    /// The channel is created and initialized to 0 before the worker starts.
    /// The worker must survive the spawn grace period; otherwise its output is
    /// collected and returned in [`SupervisorError::StartupFailed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the channel cannot be created, the program cannot
    /// be executed, or the worker exits during startup. In all cases no worker
    /// and no channel is left behind.
    pub async fn create_worker(&mut self, monitor: MonitorId) -> Result<(), SupervisorError> {
        if self.workers.contains_key(&monitor) {
            tracing::debug!("Replacing existing worker for monitor {}", monitor);
            self.destroy_worker(monitor).await;
        }

        let mut channel = OpacityChannel::create(&self.options.channel_dir, monitor)?;
        let mut command = self.options.command.build(monitor, channel.path());

        let mut process = match SupervisedProcess::spawn(&mut command) {
            Ok(process) => process,
            Err(source) => {
                release_channel(&mut channel);
                return Err(SupervisorError::Spawn { monitor, source });
            }
        };

        tokio::time::sleep(self.options.spawn_grace).await;

        if process.poll() == WorkerState::Dead {
            let diagnostics = process.collect_output(DIAGNOSTICS_TIMEOUT).await;
            let status = process.describe_exit();
            tracing::error!(
                "Overlay worker for monitor {} exited during startup ({}): {}",
                monitor,
                status,
                diagnostics
            );
            release_channel(&mut channel);
            return Err(SupervisorError::StartupFailed {
                monitor,
                status,
                diagnostics: diagnostics.to_string(),
            });
        }

        process.mark_running();
        process.forward_output(monitor);
        tracing::info!(
            "Started overlay worker for monitor {} (pid {:?})",
            monitor,
            process.pid()
        );

        self.workers.insert(
            monitor,
            WorkerHandle {
                process,
                channel,
                opacity: OpacityState::default(),
            },
        );
        Ok(())
    }

    /// Non-blocking liveness check. Unknown monitors are not alive.
    pub fn is_alive(&mut self, monitor: MonitorId) -> bool {
        let Some(handle) = self.workers.get_mut(&monitor) else {
            return false;
        };

        let before = handle.process.state();
        let after = handle.process.poll();
        if before.is_alive() && after == WorkerState::Dead {
            tracing::warn!(
                "Overlay worker for monitor {} exited unexpectedly ({})",
                monitor,
                handle.process.describe_exit()
            );
        }
        after.is_alive()
    }

    /// Command a new opacity for `monitor` and write it to the channel.
    ///
    /// With `immediate` the value is applied as-is; otherwise `current` moves
    /// one smoothing step towards it. Returns the updated opacity state.
    pub fn push_opacity(
        &mut self,
        monitor: MonitorId,
        value: f64,
        immediate: bool,
    ) -> Result<OpacityState, SupervisorError> {
        if !self.is_alive(monitor) {
            return Err(if self.workers.contains_key(&monitor) {
                SupervisorError::WorkerUnavailable(monitor)
            } else {
                SupervisorError::UnknownMonitor(monitor)
            });
        }

        let smoother = self.options.smoother;
        let handle = self
            .workers
            .get_mut(&monitor)
            .ok_or(SupervisorError::UnknownMonitor(monitor))?;

        if immediate {
            handle.opacity.snap(value);
        } else {
            handle.opacity.advance(value, &smoother);
        }
        handle.channel.write(handle.opacity.wire_value())?;

        Ok(handle.opacity)
    }

    pub fn opacity(&self, monitor: MonitorId) -> Option<OpacityState> {
        self.workers.get(&monitor).map(|handle| handle.opacity)
    }

    pub fn snapshot(&self, monitor: MonitorId) -> Option<WorkerSnapshot> {
        self.workers.get(&monitor).map(|handle| WorkerSnapshot {
            state: handle.process.state(),
            pid: handle.process.pid(),
            opacity: handle.opacity,
        })
    }

    #[cfg(test)]
    pub fn channel_path(&self, monitor: MonitorId) -> Option<&Path> {
        self.workers.get(&monitor).map(|handle| handle.channel.path())
    }

    /// Monitors that currently have a worker handle, alive or not.
    pub fn monitors(&self) -> Vec<MonitorId> {
        let mut monitors: Vec<_> = self.workers.keys().copied().collect();
        monitors.sort();
        monitors
    }

    /// Stop the worker for `monitor` and release its channel.
    ///
    /// Returns false if there was no worker. Errors while stopping are logged,
    /// the handle is always dropped.
    pub async fn destroy_worker(&mut self, monitor: MonitorId) -> bool {
        let Some(mut handle) = self.workers.remove(&monitor) else {
            return false;
        };

        let outcome = handle
            .process
            .terminate(self.options.terminate_timeout)
            .await;
        match outcome {
            Termination::AlreadyExited => {
                tracing::debug!("Worker for monitor {} had already exited", monitor)
            }
            Termination::Graceful => {
                tracing::info!("Stopped overlay worker for monitor {}", monitor)
            }
            Termination::Killed => {
                tracing::warn!("Killed unresponsive overlay worker for monitor {}", monitor)
            }
        }

        release_channel(&mut handle.channel);
        true
    }

    /// Stop every worker. Returns how many were stopped.
    pub async fn destroy_all(&mut self) -> usize {
        let monitors = self.monitors();
        let mut stopped = 0;
        for monitor in monitors {
            if self.destroy_worker(monitor).await {
                stopped += 1;
            }
        }
        stopped
    }

    /// Kill any process that still descends from this daemon.
    ///
    /// Last line of defence on shutdown for workers that escaped supervision,
    /// e.g. grandchildren a wrapper script left behind. Returns the number of
    /// processes signalled.
    pub fn sweep_descendants() -> usize {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let own_pid = Pid::from_u32(std::process::id());
        let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
        for (pid, process) in system.processes() {
            // Threads show up as processes on Linux; signalling a thread id
            // would hit the whole daemon.
            if process.thread_kind().is_some() || *pid == own_pid {
                continue;
            }
            if let Some(parent) = process.parent() {
                children.entry(parent).or_default().push(*pid);
            }
        }

        let mut visited = HashSet::new();
        let mut frontier = vec![own_pid];
        let mut killed = 0;
        while let Some(parent) = frontier.pop() {
            let Some(descendants) = children.get(&parent) else {
                continue;
            };
            for pid in descendants {
                if !visited.insert(*pid) {
                    continue;
                }
                frontier.push(*pid);

                let Some(process) = system.process(*pid) else {
                    continue;
                };
                if process.status() == ProcessStatus::Zombie {
                    continue;
                }
                if process.kill() {
                    tracing::warn!(
                        "Killed leftover process {} ({})",
                        pid,
                        process.name().to_string_lossy()
                    );
                    killed += 1;
                }
            }
        }
        killed
    }
}

fn release_channel(channel: &mut OpacityChannel) {
    if let Err(e) = channel.release() {
        tracing::warn!("{}", e);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use dimmer_core::ChannelReader;
    use nix::sys::signal::kill;
    use serial_test::serial;
    use tempfile::TempDir;

    fn pid_exists(pid: u32) -> bool {
        kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
    }

    #[tokio::test]
    #[serial]
    async fn test_create_worker_initializes_channel() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = WorkerSupervisor::new(sleeper_options(dir.path()));

        supervisor.create_worker(monitor(1)).await.unwrap();
        assert!(supervisor.is_alive(monitor(1)));

        let snapshot = supervisor.snapshot(monitor(1)).unwrap();
        assert_eq!(snapshot.state, WorkerState::Running);
        assert_eq!(snapshot.opacity, OpacityState::default());

        let reader = ChannelReader::new(supervisor.channel_path(monitor(1)).unwrap());
        assert_eq!(reader.read(), Some(0));

        supervisor.destroy_all().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_worker_receives_monitor_and_channel_arguments() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("args");
        let script = format!("echo \"$1 $2\" > {}; exec sleep 30", out.display());
        let mut supervisor = WorkerSupervisor::new(shell_options(dir.path(), &script));

        supervisor.create_worker(monitor(2)).await.unwrap();
        let recorded = std::fs::read_to_string(&out).unwrap();
        let channel = supervisor.channel_path(monitor(2)).unwrap().display().to_string();
        assert_eq!(recorded.trim(), format!("2 {}", channel));

        supervisor.destroy_all().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_startup_failure_reports_diagnostics() {
        let dir = TempDir::new().unwrap();
        let mut supervisor =
            WorkerSupervisor::new(shell_options(dir.path(), "echo boom >&2; exit 3"));

        let err = supervisor.create_worker(monitor(1)).await.unwrap_err();
        match err {
            SupervisorError::StartupFailed { diagnostics, .. } => {
                assert!(diagnostics.contains("boom"), "got {diagnostics}");
            }
            other => panic!("expected StartupFailed, got {other:?}"),
        }

        assert!(!supervisor.is_alive(monitor(1)));
        assert!(supervisor.monitors().is_empty());
        assert!(!dimmer_core::channel::slot_path(dir.path(), monitor(1)).exists());
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_program_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let mut options = sleeper_options(dir.path());
        options.command.program = PathBuf::from("/nonexistent/dimmer-overlay");
        let mut supervisor = WorkerSupervisor::new(options);

        let err = supervisor.create_worker(monitor(1)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
        assert!(!dimmer_core::channel::slot_path(dir.path(), monitor(1)).exists());
    }

    #[tokio::test]
    #[serial]
    async fn test_push_opacity_smoothed_and_immediate() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = WorkerSupervisor::new(sleeper_options(dir.path()));
        supervisor.create_worker(monitor(1)).await.unwrap();
        let reader = ChannelReader::new(supervisor.channel_path(monitor(1)).unwrap());

        let state = supervisor.push_opacity(monitor(1), 100.0, false).unwrap();
        assert!((state.current - 15.0).abs() < 1e-9);
        assert_eq!(state.target, 100.0);
        assert_eq!(reader.read(), Some(15));

        let state = supervisor.push_opacity(monitor(1), 0.0, true).unwrap();
        assert_eq!(state.current, 0.0);
        assert_eq!(reader.read(), Some(0));

        let state = supervisor.push_opacity(monitor(1), 400.0, true).unwrap();
        assert_eq!(state.current, 255.0);
        assert_eq!(reader.read(), Some(255));

        supervisor.destroy_all().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_push_opacity_unknown_monitor() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = WorkerSupervisor::new(sleeper_options(dir.path()));

        let err = supervisor.push_opacity(monitor(7), 10.0, false).unwrap_err();
        assert!(matches!(err, SupervisorError::UnknownMonitor(_)));
    }

    #[tokio::test]
    #[serial]
    async fn test_dead_worker_is_detected() {
        let dir = TempDir::new().unwrap();
        let mut supervisor =
            WorkerSupervisor::new(shell_options(dir.path(), "sleep 0.3; exit 0"));
        supervisor.create_worker(monitor(1)).await.unwrap();
        assert!(supervisor.is_alive(monitor(1)));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!supervisor.is_alive(monitor(1)));
        assert_eq!(
            supervisor.snapshot(monitor(1)).unwrap().state,
            WorkerState::Dead
        );

        let err = supervisor.push_opacity(monitor(1), 10.0, false).unwrap_err();
        assert!(matches!(err, SupervisorError::WorkerUnavailable(_)));

        assert!(supervisor.destroy_worker(monitor(1)).await);
    }

    #[tokio::test]
    #[serial]
    async fn test_destroy_worker_reaps_process_and_releases_channel() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = WorkerSupervisor::new(sleeper_options(dir.path()));
        supervisor.create_worker(monitor(1)).await.unwrap();
        let pid = supervisor.snapshot(monitor(1)).unwrap().pid.unwrap();
        let channel = supervisor.channel_path(monitor(1)).unwrap().to_path_buf();

        assert!(supervisor.destroy_worker(monitor(1)).await);
        assert!(!pid_exists(pid));
        assert!(!channel.exists());
        assert!(supervisor.snapshot(monitor(1)).is_none());
        assert!(!supervisor.destroy_worker(monitor(1)).await);
    }

    #[tokio::test]
    #[serial]
    async fn test_recreate_replaces_worker() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = WorkerSupervisor::new(sleeper_options(dir.path()));
        supervisor.create_worker(monitor(1)).await.unwrap();
        let first = supervisor.snapshot(monitor(1)).unwrap().pid.unwrap();

        supervisor.create_worker(monitor(1)).await.unwrap();
        let second = supervisor.snapshot(monitor(1)).unwrap().pid.unwrap();

        assert_ne!(first, second);
        assert!(!pid_exists(first));
        assert_eq!(supervisor.monitors(), vec![monitor(1)]);

        supervisor.destroy_all().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_destroy_all_stops_every_worker() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = WorkerSupervisor::new(sleeper_options(dir.path()));
        supervisor.create_worker(monitor(1)).await.unwrap();
        supervisor.create_worker(monitor(2)).await.unwrap();
        let pids: Vec<u32> = [1, 2]
            .iter()
            .map(|id| supervisor.snapshot(monitor(*id)).unwrap().pid.unwrap())
            .collect();

        assert_eq!(supervisor.destroy_all().await, 2);
        assert!(supervisor.monitors().is_empty());
        for pid in pids {
            assert!(!pid_exists(pid));
        }
    }

    #[test]
    #[serial]
    fn test_sweep_kills_untracked_children() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();

        assert!(WorkerSupervisor::sweep_descendants() >= 1);

        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
