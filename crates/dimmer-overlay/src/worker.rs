//! Channel-driven overlay worker

use std::time::Duration;

use dimmer_core::{clamp_opacity, ChannelReader, Smoother};
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::MissedTickBehavior;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Whether the overlay window is still usable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceStatus {
    Open,
    Closed,
}

#[derive(Debug, Error)]
pub enum SurfaceError {
    /// The window system connection is gone. The worker stops.
    #[error("window system connection lost: {0}")]
    Disconnected(#[source] BoxError),

    /// A single request was rejected. The worker logs it and keeps polling.
    #[error("window request failed: {0}")]
    Request(#[source] BoxError),
}

/// Something the worker can tint.
pub trait OverlaySurface {
    /// Show the overlay at `alpha` (0 is fully transparent).
    fn set_alpha(&mut self, alpha: u8) -> Result<(), SurfaceError>;

    /// Handle pending window system events without blocking.
    fn pump(&mut self) -> Result<SurfaceStatus, SurfaceError>;

    /// Release the window. Called once when the worker stops.
    fn close(&mut self) -> Result<(), SurfaceError>;
}

pub struct OverlayWorker<S> {
    surface: S,
    reader: ChannelReader,
    smoother: Smoother,
    current: f64,
    target: f64,
    applied: Option<u8>,
}

impl<S: OverlaySurface> OverlayWorker<S> {
    pub fn new(surface: S, reader: ChannelReader, smoother: Smoother) -> Self {
        Self {
            surface,
            reader,
            smoother,
            current: 0.0,
            target: 0.0,
            applied: None,
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// One cycle: drain window events, read the channel, step towards the
    /// target and re-send the alpha if its integer value changed.
    ///
    /// A missing or unparsable channel keeps the previous target. A rejected
    /// request is logged and the alpha is re-sent on the next cycle. Only a
    /// lost connection is returned as an error.
    pub fn poll_once(&mut self) -> Result<SurfaceStatus, SurfaceError> {
        match self.surface.pump() {
            Ok(SurfaceStatus::Closed) => return Ok(SurfaceStatus::Closed),
            Ok(SurfaceStatus::Open) => {}
            Err(SurfaceError::Request(e)) => tracing::warn!("Window event handling failed: {}", e),
            Err(e) => return Err(e),
        }

        if let Some(value) = self.reader.read() {
            self.target = f64::from(value);
        }
        self.current = clamp_opacity(self.smoother.step(self.current, self.target));

        let alpha = self.current as u8;
        if self.applied != Some(alpha) {
            match self.surface.set_alpha(alpha) {
                Ok(()) => self.applied = Some(alpha),
                Err(SurfaceError::Request(e)) => {
                    tracing::warn!("Failed to apply alpha {}: {}", alpha, e)
                }
                Err(e) => return Err(e),
            }
        }

        Ok(SurfaceStatus::Open)
    }

    /// Poll every `period` until the window closes or a termination signal
    /// arrives, then release the window.
    pub async fn run(mut self, period: Duration) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.poll_once()? == SurfaceStatus::Closed {
                        tracing::info!("Overlay window closed");
                        break;
                    }
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received SIGINT");
                    break;
                }
            }
        }

        self.surface.close()?;
        Ok(())
    }
}
