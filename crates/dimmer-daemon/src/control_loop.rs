//! The periodic dimming loop
//!
//! Every tick, for each active monitor with a live worker: sample brightness,
//! compensate for the overlay, map through the dimming curve, smooth, and
//! write the result to the monitor's channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dimmer_core::calibration::dimmed_estimate;
use dimmer_core::{clamp_opacity, DimmingCurve, MonitorId};
use tokio::time::MissedTickBehavior;

use crate::coordinator::{ActiveSet, MonitorSetCoordinator};
use crate::error::SupervisorError;
use crate::report::{Cadence, MonitorReport, Reporter};
use crate::sampler::BrightnessSampler;

/// Flags shared between the control loop and the control surface
#[derive(Debug)]
pub struct Controls {
    running: AtomicBool,
    paused: AtomicBool,
    /// Dim strength in percent, stored as `f64` bits
    dim_strength: AtomicU64,
}

impl Controls {
    pub fn new(dim_strength_percent: f64) -> Self {
        let controls = Self {
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            dim_strength: AtomicU64::new(0),
        };
        controls.set_dim_strength_percent(dim_strength_percent);
        controls
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn dim_strength_percent(&self) -> f64 {
        f64::from_bits(self.dim_strength.load(Ordering::SeqCst))
    }

    /// Dim strength as a fraction in `[0, 1]`.
    pub fn dim_strength(&self) -> f64 {
        self.dim_strength_percent() / 100.0
    }

    /// Store a new strength, clamped to 0-100. Returns the stored value.
    pub fn set_dim_strength_percent(&self, percent: f64) -> f64 {
        let percent = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0)
        };
        self.dim_strength.store(percent.to_bits(), Ordering::SeqCst);
        percent
    }
}

/// What one tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Paused,
    Switching,
    Ran(Vec<MonitorReport>),
}

pub struct ControlLoop {
    coordinator: Arc<MonitorSetCoordinator>,
    sampler: Arc<dyn BrightnessSampler>,
    controls: Arc<Controls>,
    curve: DimmingCurve,
    reporter: Reporter,
    period: Duration,
    failure_interval: Duration,
    failure_logs: HashMap<MonitorId, Cadence>,
}

impl ControlLoop {
    pub fn new(
        coordinator: Arc<MonitorSetCoordinator>,
        sampler: Arc<dyn BrightnessSampler>,
        controls: Arc<Controls>,
        curve: DimmingCurve,
        reporter: Reporter,
        period: Duration,
        failure_interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            sampler,
            controls,
            curve,
            reporter,
            period,
            failure_interval,
            failure_logs: HashMap::new(),
        }
    }

    /// Tick until the running flag is cleared.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Control loop started ({:?} period)", self.period);

        while self.controls.is_running() {
            interval.tick().await;
            if !self.controls.is_running() {
                break;
            }

            if let TickOutcome::Ran(reports) = self.tick().await {
                self.reporter.publish(&reports, Instant::now());
            }
        }

        tracing::info!("Control loop stopped");
    }

    /// Process every active monitor once.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.controls.is_paused() {
            return TickOutcome::Paused;
        }
        if self.coordinator.is_switching() {
            return TickOutcome::Switching;
        }

        let coordinator = Arc::clone(&self.coordinator);
        let mut guard = coordinator.lock().await;
        // A pause that landed while we waited for the lock has already zeroed
        // the overlays.
        if self.controls.is_paused() {
            return TickOutcome::Paused;
        }

        let set = &mut *guard;
        let strength = self.controls.dim_strength();
        let mut reports = Vec::with_capacity(set.monitors.len());

        for monitor in set.monitors.clone() {
            if !set.supervisor.is_alive(monitor) {
                continue;
            }
            match self.process_monitor(set, monitor, strength).await {
                Ok(report) => reports.push(report),
                Err(e) => tracing::warn!(monitor = %monitor, "Dropped opacity update: {}", e),
            }
        }

        TickOutcome::Ran(reports)
    }

    async fn process_monitor(
        &mut self,
        set: &mut ActiveSet,
        monitor: MonitorId,
        strength: f64,
    ) -> Result<MonitorReport, SupervisorError> {
        let measured = self.sample(monitor).await;
        let current = set
            .supervisor
            .opacity(monitor)
            .map(|opacity| opacity.current)
            .unwrap_or(0.0);

        let raw = match set.calibration.get_mut(&monitor) {
            Some(calibration) => calibration.calibrate(measured, current),
            None => measured,
        };
        let raw = clamp_opacity(raw);

        let target = self.curve.target(raw, strength);
        let opacity = set.supervisor.push_opacity(monitor, target, false)?;

        Ok(MonitorReport {
            monitor,
            measured,
            raw,
            opacity: opacity.current,
            target: opacity.target,
            dimmed: dimmed_estimate(raw, opacity.current),
        })
    }

    /// Sample off the executor. Failures read as black.
    async fn sample(&mut self, monitor: MonitorId) -> f64 {
        let sampler = Arc::clone(&self.sampler);
        let result = tokio::task::spawn_blocking(move || sampler.sample(monitor)).await;

        let message = match result {
            Ok(Ok(value)) => return clamp_opacity(value),
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("sampler task failed: {}", e),
        };

        let interval = self.failure_interval;
        let cadence = self
            .failure_logs
            .entry(monitor)
            .or_insert_with(|| Cadence::new(interval));
        if cadence.due(Instant::now()) {
            tracing::warn!(monitor = %monitor, "Brightness sampling failed: {}", message);
        }
        0.0
    }
}
