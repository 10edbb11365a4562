//! Active monitor set coordination
//!
//! All reads and writes of the active set and of per-monitor runtime state go
//! through one lock. A set change holds the lock across worker termination,
//! settling and spawning, so the control loop never sees a half-applied set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dimmer_core::{CalibrationState, MonitorId};
use tokio::sync::{Mutex, MutexGuard};

use crate::supervisor::WorkerSupervisor;

/// State guarded by the coordinator lock
pub struct ActiveSet {
    /// Published monitors, in activation order
    pub monitors: Vec<MonitorId>,
    pub supervisor: WorkerSupervisor,
    /// Present only for monitors with calibration enabled
    pub calibration: HashMap<MonitorId, CalibrationState>,
    /// Set by `shutdown`; no worker is created afterwards
    pub closed: bool,
}

/// Result of one set change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetChange {
    pub removed: Vec<MonitorId>,
    pub added: Vec<MonitorId>,
    pub failed: Vec<(MonitorId, String)>,
    pub active: Vec<MonitorId>,
}

impl SetChange {
    pub fn summary(&self) -> String {
        let mut summary = format!("Active monitors: {}", join_ids(&self.active));
        if !self.added.is_empty() {
            summary.push_str(&format!("; added {}", join_ids(&self.added)));
        }
        if !self.removed.is_empty() {
            summary.push_str(&format!("; removed {}", join_ids(&self.removed)));
        }
        for (monitor, reason) in &self.failed {
            summary.push_str(&format!("; monitor {} failed: {}", monitor, reason));
        }
        summary
    }
}

fn join_ids(ids: &[MonitorId]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Raises the switching count for its lifetime.
struct SwitchingGuard<'a>(&'a AtomicUsize);

impl<'a> SwitchingGuard<'a> {
    fn engage(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for SwitchingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MonitorSetCoordinator {
    set: Mutex<ActiveSet>,
    switching: AtomicUsize,
    settle: Duration,
    calibrate: bool,
}

impl MonitorSetCoordinator {
    pub fn new(supervisor: WorkerSupervisor, settle: Duration, calibrate: bool) -> Self {
        Self {
            set: Mutex::new(ActiveSet {
                monitors: Vec::new(),
                supervisor,
                calibration: HashMap::new(),
                closed: false,
            }),
            switching: AtomicUsize::new(0),
            settle,
            calibrate,
        }
    }

    /// True while any set change is pending or in progress.
    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::SeqCst) > 0
    }

    pub async fn lock(&self) -> MutexGuard<'_, ActiveSet> {
        self.set.lock().await
    }

    /// Replace the active set with `requested`.
    ///
    /// Removed monitors are destroyed first, then after a settling delay the
    /// added ones are created, then the new set is published. Requested
    /// monitors whose worker died are re-created. Monitors that fail to start
    /// are left out of the published set.
    ///
    /// After `shutdown` every requested monitor is reported as failed.
    pub async fn set_active_monitors(&self, requested: &[MonitorId]) -> SetChange {
        let _switching = SwitchingGuard::engage(&self.switching);
        let mut guard = self.set.lock().await;
        let set = &mut *guard;

        let mut wanted: Vec<MonitorId> = Vec::with_capacity(requested.len());
        for monitor in requested {
            if !wanted.contains(monitor) {
                wanted.push(*monitor);
            }
        }

        if set.closed {
            let change = SetChange {
                failed: wanted
                    .into_iter()
                    .map(|monitor| (monitor, "shutting down".to_string()))
                    .collect(),
                ..SetChange::default()
            };
            tracing::debug!("Ignoring set change after shutdown: {}", change.summary());
            return change;
        }

        let removed: Vec<MonitorId> = set
            .monitors
            .iter()
            .filter(|monitor| !wanted.contains(monitor))
            .copied()
            .collect();

        let mut to_create = Vec::new();
        for monitor in &wanted {
            if !set.monitors.contains(monitor) || !set.supervisor.is_alive(*monitor) {
                to_create.push(*monitor);
            }
        }

        for monitor in &removed {
            set.supervisor.destroy_worker(*monitor).await;
            set.calibration.remove(monitor);
        }

        if !removed.is_empty() && !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        let mut added = Vec::new();
        let mut failed = Vec::new();
        for monitor in to_create {
            match set.supervisor.create_worker(monitor).await {
                Ok(()) => {
                    if self.calibrate {
                        set.calibration.insert(monitor, CalibrationState::default());
                    }
                    added.push(monitor);
                }
                Err(e) => {
                    tracing::warn!("Could not activate monitor {}: {}", monitor, e);
                    set.calibration.remove(&monitor);
                    failed.push((monitor, e.to_string()));
                }
            }
        }

        set.monitors = wanted
            .into_iter()
            .filter(|monitor| !failed.iter().any(|(id, _)| id == monitor))
            .collect();

        let change = SetChange {
            removed,
            added,
            failed,
            active: set.monitors.clone(),
        };
        tracing::info!("{}", change.summary());
        change
    }

    /// Force every active monitor's overlay to 0 with an immediate write.
    ///
    /// Returns the monitors whose overlay was reset.
    pub async fn reset_all(&self) -> Vec<MonitorId> {
        let mut guard = self.set.lock().await;
        let set = &mut *guard;
        if set.closed {
            return Vec::new();
        }
        let mut reset = Vec::with_capacity(set.monitors.len());
        for monitor in set.monitors.clone() {
            match set.supervisor.push_opacity(monitor, 0.0, true) {
                Ok(_) => reset.push(monitor),
                Err(e) => tracing::debug!("Skipping reset of monitor {}: {}", monitor, e),
            }
        }
        reset
    }

    /// Stop every worker, empty the set, and sweep leftover descendants.
    ///
    /// The set stays closed afterwards.
    pub async fn shutdown(&self) {
        let _switching = SwitchingGuard::engage(&self.switching);
        let mut guard = self.set.lock().await;
        let set = &mut *guard;
        set.closed = true;

        let stopped = set.supervisor.destroy_all().await;
        set.monitors.clear();
        set.calibration.clear();
        tracing::info!("Stopped {} overlay worker(s)", stopped);

        match tokio::task::spawn_blocking(WorkerSupervisor::sweep_descendants).await {
            Ok(0) => {}
            Ok(killed) => tracing::warn!("Swept {} leftover process(es)", killed),
            Err(e) => tracing::warn!("Process sweep failed: {}", e),
        }
    }
}
