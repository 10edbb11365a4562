use dimmer_core::MonitorId;
use thiserror::Error;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};

/// Errors talking to the X server
#[derive(Debug, Error)]
pub enum X11Error {
    #[error("Failed to connect to X display: {0}")]
    Connect(#[from] ConnectError),

    #[error("X connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("X request failed: {0}")]
    Reply(#[from] ReplyError),

    #[error("X request failed: {0}")]
    ReplyOrId(#[from] ReplyOrIdError),

    #[error("Monitor {monitor} not found ({available} monitor(s) connected)")]
    MonitorNotFound { monitor: MonitorId, available: usize },

    #[error("Unsupported pixel format: depth {depth}, {bits_per_pixel} bits per pixel")]
    UnsupportedFormat { depth: u8, bits_per_pixel: u8 },
}
