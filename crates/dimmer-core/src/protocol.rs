//! Control socket protocol
//!
//! One JSON request per connection, one JSON response back, each terminated
//! by a newline. Messages carry a `type` field for discrimination:
//! - `{"type": "set_active_monitors", "monitors": [1, 2]}`
//! - `{"type": "set_dim_strength", "percent": 60}`
//! - `{"type": "pause"}` / `{"type": "resume"}` / `{"type": "shutdown"}`
//! - `{"type": "status"}`
//! - `{"type": "logs", "limit": 20}`

use serde::{Deserialize, Serialize};

use crate::monitor::MonitorId;

/// Requests sent from the presentation layer to the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Replace the set of dimmed monitors
    SetActiveMonitors {
        monitors: Vec<MonitorId>,
    },
    /// Set the dim strength in percent (0-100)
    SetDimStrength {
        percent: f64,
    },
    /// Suspend dimming and clear every overlay
    Pause,
    /// Resume dimming
    Resume,
    /// Stop the daemon and all overlay workers
    Shutdown,
    /// Query daemon status
    Status,
    /// Fetch recent human-readable log lines
    Logs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
}

/// Responses sent from the daemon back to the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Success {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Status(DaemonStatus),
    Logs {
        lines: Vec<String>,
    },
    Error {
        message: String,
    },
}

impl IpcResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self::Success {
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Lifecycle of a supervised overlay worker process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Spawning,
    Running,
    Terminating,
    Dead,
}

impl WorkerState {
    pub fn is_alive(self) -> bool {
        matches!(self, Self::Spawning | Self::Running)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::Terminating => "terminating",
            Self::Dead => "dead",
        };
        f.write_str(label)
    }
}

/// Snapshot of the daemon as seen by the presentation layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonStatus {
    pub paused: bool,
    /// Dim strength in percent
    pub dim_strength: f64,
    /// Active monitors in activation order
    pub active_monitors: Vec<MonitorId>,
    pub monitors: Vec<MonitorStatus>,
}

/// Per-monitor part of [`DaemonStatus`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorStatus {
    pub monitor: MonitorId,
    pub worker: WorkerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Smoothed opacity last written to the channel
    pub opacity: f64,
    /// Latest commanded opacity
    pub target: f64,
    /// Latest undimmed brightness estimate, if sampled yet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_brightness: Option<f64>,
    /// Latest perceived brightness estimate, if sampled yet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimmed_brightness: Option<f64>,
}
