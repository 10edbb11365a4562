//! Error types for worker supervision

use dimmer_core::{ChannelError, MonitorId};
use thiserror::Error;

/// Errors raised by the worker supervisor
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// No worker has been registered for this monitor
    #[error("No overlay worker for monitor {0}")]
    UnknownMonitor(MonitorId),

    /// The worker exists but its process is no longer alive
    #[error("Overlay worker for monitor {0} is not running")]
    WorkerUnavailable(MonitorId),

    /// The worker executable could not be started at all
    #[error("Failed to spawn overlay worker for monitor {monitor}: {source}")]
    Spawn {
        monitor: MonitorId,
        #[source]
        source: std::io::Error,
    },

    /// The worker started but exited during its startup grace period
    #[error("Overlay worker for monitor {monitor} exited during startup ({status})")]
    StartupFailed {
        monitor: MonitorId,
        status: String,
        diagnostics: String,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}
