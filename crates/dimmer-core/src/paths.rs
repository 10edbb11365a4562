//! Runtime file locations

use std::path::PathBuf;

use nix::unistd::getuid;

const APP_NAME: &str = "adaptive-dimmer";

/// Control socket location.
///
/// Prefers `$XDG_RUNTIME_DIR/adaptive-dimmer.sock`, otherwise falls back to
/// `/tmp/adaptive-dimmer-$UID.sock`.
pub fn default_socket_path() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(runtime_dir) => PathBuf::from(runtime_dir).join(format!("{}.sock", APP_NAME)),
        None => {
            tracing::warn!("XDG_RUNTIME_DIR not set, using fallback socket path in /tmp");
            PathBuf::from(format!("/tmp/{}-{}.sock", APP_NAME, getuid()))
        }
    }
}

/// Directory holding the per-monitor opacity channel slots.
pub fn default_channel_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(runtime_dir) => PathBuf::from(runtime_dir).join(APP_NAME),
        None => PathBuf::from(format!("/tmp/{}-{}", APP_NAME, getuid())),
    }
}

/// Default configuration file, before tilde expansion.
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/adaptive-dimmer/config.kdl";

/// Environment variable carrying the worker-side smoothing factor.
pub const WORKER_SMOOTHING_ENV: &str = "ADAPTIVE_DIMMER_WORKER_SMOOTHING";

/// Environment variable carrying the worker channel poll period in milliseconds.
pub const WORKER_POLL_ENV: &str = "ADAPTIVE_DIMMER_WORKER_POLL_MS";
