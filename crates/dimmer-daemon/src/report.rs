//! Brightness reporting
//!
//! Every tick's per-monitor results go to the [`Presenter`]. On slower
//! cadences they are also written as structured records (tracing plus an
//! optional CSV file) and as human-readable console lines.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dimmer_core::MonitorId;

/// Number of human-readable lines kept for the `logs` request.
pub const LOG_RING_CAPACITY: usize = 200;

const CSV_HEADER: &str = "timestamp,monitor,raw_brightness,opacity,dimmed_brightness";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// One monitor's result for one control-loop tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorReport {
    pub monitor: MonitorId,
    /// Brightness as sampled, overlay included
    pub measured: f64,
    /// Undimmed brightness estimate
    pub raw: f64,
    /// Smoothed opacity written to the channel
    pub opacity: f64,
    /// Commanded opacity
    pub target: f64,
    /// Brightness the user perceives under the overlay
    pub dimmed: f64,
}

impl MonitorReport {
    pub fn console_line(&self) -> String {
        format!(
            "monitor={} measured={:.1} raw={:.1} alpha={:.1} target={:.1}",
            self.monitor, self.measured, self.raw, self.opacity, self.target
        )
    }
}

/// Diagnostics sink consumed by the presentation layer.
pub trait Presenter: Send + Sync {
    fn push_brightness(&self, monitor: MonitorId, raw: f64, dimmed: f64);
    fn add_log(&self, line: String);
}

#[derive(Default)]
struct BoardState {
    latest: HashMap<MonitorId, (f64, f64)>,
    logs: VecDeque<String>,
}

/// In-memory [`Presenter`] backing the control socket's `status` and
/// `logs` requests.
#[derive(Default)]
pub struct StatusBoard {
    state: Mutex<BoardState>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BoardState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Latest `(raw, dimmed)` pair pushed for `monitor`.
    pub fn latest(&self, monitor: MonitorId) -> Option<(f64, f64)> {
        self.lock().latest.get(&monitor).copied()
    }

    pub fn forget(&self, monitor: MonitorId) {
        self.lock().latest.remove(&monitor);
    }

    /// Newest log lines, oldest first, at most `limit` of them.
    pub fn recent_logs(&self, limit: usize) -> Vec<String> {
        let state = self.lock();
        let skip = state.logs.len().saturating_sub(limit);
        state.logs.iter().skip(skip).cloned().collect()
    }
}

impl Presenter for StatusBoard {
    fn push_brightness(&self, monitor: MonitorId, raw: f64, dimmed: f64) {
        self.lock().latest.insert(monitor, (raw, dimmed));
    }

    fn add_log(&self, line: String) {
        let mut state = self.lock();
        if state.logs.len() == LOG_RING_CAPACITY {
            state.logs.pop_front();
        }
        state.logs.push_back(line);
    }
}

/// Rate limiter for periodic output. The first check is always due.
#[derive(Debug, Clone)]
pub struct Cadence {
    interval: Duration,
    last: Option<Instant>,
}

impl Cadence {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn due(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Persistent per-second brightness records in CSV form.
pub struct BrightnessLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl BrightnessLog {
    /// Create (or truncate) the log at `path` and write the header.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{}", CSV_HEADER)?;
        writer.flush()?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, timestamp: &str, reports: &[MonitorReport]) -> std::io::Result<()> {
        for report in reports {
            writeln!(self.writer, "{}", csv_record(timestamp, report))?;
        }
        self.writer.flush()
    }
}

fn csv_record(timestamp: &str, report: &MonitorReport) -> String {
    format!(
        "{},{},{:.3},{:.1},{:.3}",
        timestamp, report.monitor, report.raw, report.opacity, report.dimmed
    )
}

fn local_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Fans tick results out to the presenter and the rate-limited logs.
pub struct Reporter {
    presenter: std::sync::Arc<dyn Presenter>,
    brightness_log: Option<BrightnessLog>,
    record: Cadence,
    console: Cadence,
}

impl Reporter {
    pub fn new(
        presenter: std::sync::Arc<dyn Presenter>,
        brightness_log: Option<BrightnessLog>,
        record_interval: Duration,
        console_interval: Duration,
    ) -> Self {
        Self {
            presenter,
            brightness_log,
            record: Cadence::new(record_interval),
            console: Cadence::new(console_interval),
        }
    }

    pub fn publish(&mut self, reports: &[MonitorReport], now: Instant) {
        for report in reports {
            self.presenter
                .push_brightness(report.monitor, report.raw, report.dimmed);
        }

        if reports.is_empty() {
            return;
        }

        if self.record.due(now) {
            for report in reports {
                tracing::debug!(
                    monitor = %report.monitor,
                    raw = report.raw,
                    opacity = report.opacity,
                    dimmed = report.dimmed,
                    "brightness record"
                );
            }
            if let Some(log) = self.brightness_log.as_mut() {
                if let Err(e) = log.append(&local_timestamp(), reports) {
                    tracing::warn!(
                        "Failed to write brightness log {}: {}",
                        log.path().display(),
                        e
                    );
                }
            }
        }

        if self.console.due(now) {
            for report in reports {
                let line = report.console_line();
                tracing::info!(monitor = %report.monitor, "{}", line);
                self.presenter.add_log(line);
            }
        }
    }
}
