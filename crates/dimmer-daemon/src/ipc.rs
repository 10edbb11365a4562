//! Control socket server
//!
//! Serves the [`IpcRequest`]/[`IpcResponse`] protocol from `dimmer_core` over
//! a Unix domain socket: one request line in, one response line out.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dimmer_core::protocol::{IpcRequest, IpcResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

// ============================================================================
// IPC Server
// ============================================================================

/// Unix domain socket listener for the control surface
///
/// The socket file is removed when the server is dropped.
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Bind the control socket at `socket_path`
    ///
    /// A stale socket file left by an earlier run is removed first, and the
    /// parent directory is created if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the stale file cannot be removed or the socket
    /// cannot be bound.
    pub fn bind(socket_path: &Path) -> Result<Self> {
        tracing::info!("IPC socket path: {}", socket_path.display());

        if let Some(parent) = socket_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create socket directory {}", parent.display())
                })?;
            }
        }

        if socket_path.exists() {
            tracing::debug!("Removing stale socket file: {}", socket_path.display());
            std::fs::remove_file(socket_path).with_context(|| {
                format!(
                    "Failed to remove stale socket file: {}",
                    socket_path.display()
                )
            })?;
        }

        let listener = UnixListener::bind(socket_path).with_context(|| {
            format!("Failed to create IPC socket at {}", socket_path.display())
        })?;

        tracing::info!("IPC server listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    /// Wait for the next client
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .context("Failed to accept IPC connection")?;

        tracing::debug!("Accepted IPC connection");

        Ok(stream)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::warn!("Failed to remove IPC socket file on shutdown: {}", e);
            } else {
                tracing::debug!("Removed IPC socket file: {}", self.socket_path.display());
            }
        }
    }
}

// ============================================================================
// IPC Connection Handler
// ============================================================================

/// Handle one client connection.
///
/// Reads a single JSON line, runs `handler` on the parsed request and writes
/// the JSON response followed by a newline. Unparsable requests are answered
/// with [`IpcResponse::Error`] without calling the handler.
///
/// # Errors
///
/// Returns an error if reading from or writing to the stream fails.
pub async fn handle_ipc_connection<F, Fut>(mut stream: UnixStream, handler: F) -> Result<()>
where
    F: FnOnce(IpcRequest) -> Fut,
    Fut: Future<Output = IpcResponse>,
{
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let mut line = String::new();
    let bytes_read = reader
        .read_line(&mut line)
        .await
        .context("Failed to read IPC request")?;

    if bytes_read == 0 {
        tracing::debug!("IPC connection closed without data");
        return Ok(());
    }

    let line = line.trim();
    tracing::debug!("Received IPC request: {}", line);

    let response = match serde_json::from_str::<IpcRequest>(line) {
        Ok(request) => handler(request).await,
        Err(e) => {
            tracing::warn!("Failed to parse IPC request: {}", e);
            IpcResponse::error(format!("Invalid request: {}", e))
        }
    };

    let response_json =
        serde_json::to_string(&response).context("Failed to serialize IPC response")?;
    tracing::debug!("Sending IPC response: {}", response_json);

    writer
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write IPC response")?;
    writer
        .write_all(b"\n")
        .await
        .context("Failed to write newline")?;
    writer.flush().await.context("Failed to flush IPC response")?;

    Ok(())
}
