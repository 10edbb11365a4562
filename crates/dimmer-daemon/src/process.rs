//! Supervised child processes
//!
//! A [`SupervisedProcess`] wraps one overlay worker and tracks it through
//! `Spawning -> Running -> Terminating -> Dead`. Only the owning supervisor
//! drives the transitions.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use dimmer_core::protocol::WorkerState;
use dimmer_core::MonitorId;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};

/// How a termination request was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had already exited before it was asked to stop
    AlreadyExited,
    /// The process exited after SIGTERM within the timeout
    Graceful,
    /// The process had to be killed
    Killed,
}

/// Output captured from a worker that failed to start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub stdout: String,
    pub stderr: String,
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, true) => write!(f, "<no output>"),
            (false, true) => write!(f, "stdout: {}", self.stdout),
            (true, false) => write!(f, "stderr: {}", self.stderr),
            (false, false) => write!(f, "stdout: {}; stderr: {}", self.stdout, self.stderr),
        }
    }
}

pub struct SupervisedProcess {
    child: Child,
    pid: Option<u32>,
    state: WorkerState,
    exit_status: Option<ExitStatus>,
}

impl SupervisedProcess {
    /// Spawn `command` with piped output. The process starts in `Spawning`.
    pub fn spawn(command: &mut Command) -> std::io::Result<Self> {
        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let pid = child.id();

        Ok(Self {
            child,
            pid,
            state: WorkerState::Spawning,
            exit_status: None,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Human-readable exit status, or a placeholder if it is unknown.
    pub fn describe_exit(&self) -> String {
        self.exit_status()
            .map(|status| status.to_string())
            .unwrap_or_else(|| "exit status unknown".to_string())
    }

    /// Non-blocking liveness probe. Reaps the process if it has exited.
    pub fn poll(&mut self) -> WorkerState {
        if self.state == WorkerState::Dead {
            return self.state;
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit_status = Some(status);
                self.state = WorkerState::Dead;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Failed to poll worker process {:?}: {}", self.pid, e);
                self.state = WorkerState::Dead;
            }
        }

        self.state
    }

    /// Promote a process that survived its startup grace.
    pub fn mark_running(&mut self) {
        if self.state == WorkerState::Spawning {
            self.state = WorkerState::Running;
        }
    }

    /// Forward the worker's output into the daemon log, one line at a time.
    ///
    /// The pipes must be drained once the worker is running, otherwise a chatty
    /// worker would eventually block on a full pipe.
    pub fn forward_output(&mut self, monitor: MonitorId) {
        if let Some(stdout) = self.child.stdout.take() {
            tokio::spawn(forward_lines(stdout, monitor));
        }
        if let Some(stderr) = self.child.stderr.take() {
            tokio::spawn(forward_lines(stderr, monitor));
        }
    }

    /// Read everything the worker wrote. Only meaningful once it has exited.
    pub async fn collect_output(&mut self, limit: Duration) -> Diagnostics {
        let stdout = read_pipe(self.child.stdout.take(), limit).await;
        let stderr = read_pipe(self.child.stderr.take(), limit).await;
        Diagnostics { stdout, stderr }
    }

    /// Ask the process to exit with SIGTERM, and SIGKILL it if it is still
    /// around after `timeout`. The process is `Dead` afterwards either way.
    pub async fn terminate(&mut self, timeout: Duration) -> Termination {
        if self.poll() == WorkerState::Dead {
            return Termination::AlreadyExited;
        }

        self.state = WorkerState::Terminating;

        if let Some(pid) = self.pid {
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => tracing::warn!("Failed to send SIGTERM to worker {}: {}", pid, e),
            }
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exit_status = Some(status);
                self.state = WorkerState::Dead;
                return Termination::Graceful;
            }
            Ok(Err(e)) => {
                tracing::warn!("Failed to wait for worker {:?}: {}", self.pid, e);
            }
            Err(_) => {
                tracing::warn!(
                    "Worker {:?} did not exit within {:?}, killing it",
                    self.pid,
                    timeout
                );
            }
        }

        if let Err(e) = self.child.kill().await {
            tracing::warn!("Failed to kill worker {:?}: {}", self.pid, e);
        }
        self.exit_status = self.child.try_wait().ok().flatten();
        self.state = WorkerState::Dead;
        Termination::Killed
    }
}

async fn forward_lines<R>(pipe: R, monitor: MonitorId)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(monitor = %monitor, "worker: {}", line);
    }
}

async fn read_pipe<R>(pipe: Option<R>, limit: Duration) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return String::new();
    };

    let mut buf = Vec::new();
    if tokio::time::timeout(limit, pipe.read_to_end(&mut buf))
        .await
        .is_err()
    {
        tracing::debug!("Timed out reading worker output");
    }
    String::from_utf8_lossy(&buf).trim().to_string()
}
