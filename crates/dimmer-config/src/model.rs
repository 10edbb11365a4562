//! Configuration data model

use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone)]
pub struct Config {
    pub global: GlobalConfig,
    pub curve: CurveConfig,
    pub smoothing: SmoothingConfig,
    pub timing: TimingConfig,
    pub worker: WorkerConfig,
    pub sampler: SamplerConfig,
    /// Monitors dimmed at startup
    pub monitors: Vec<u32>,
    /// Initial dim strength in percent
    pub dim_strength: f64,
    /// Compensate brightness samples for the overlay's own attenuation
    pub calibration: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            curve: CurveConfig::default(),
            smoothing: SmoothingConfig::default(),
            timing: TimingConfig::default(),
            worker: WorkerConfig::default(),
            sampler: SamplerConfig::default(),
            monitors: vec![1],
            dim_strength: 100.0,
            calibration: true,
        }
    }
}

/// Global settings
#[derive(Debug, Clone, Default)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
    /// Control socket override
    pub socket_path: Option<PathBuf>,
    /// CSV file receiving the per-second brightness records
    pub brightness_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// Dimming curve parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CurveConfig {
    /// Brightness at which dimming begins
    pub threshold_start: f64,
    /// Brightness at which dimming reaches its ceiling
    pub threshold_max: f64,
    /// Absolute maximum overlay opacity
    pub max_opacity: f64,
    /// Fraction of `max_opacity` used as the ceiling at full strength
    pub cap_fraction: f64,
}

impl CurveConfig {
    /// Opacity ceiling at full dim strength
    pub fn cap(&self) -> f64 {
        self.max_opacity * self.cap_fraction
    }
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            threshold_start: 80.0,
            threshold_max: 200.0,
            max_opacity: 240.0,
            cap_fraction: 0.75,
        }
    }
}

/// Interpolation factors for the two smoothing stages
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingConfig {
    pub supervisor: f64,
    pub worker: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            supervisor: 0.15,
            worker: 0.8,
        }
    }
}

/// Periods and timeouts
#[derive(Debug, Clone, PartialEq)]
pub struct TimingConfig {
    /// Control loop period
    pub tick: Duration,
    /// Pause between removing and adding workers during a set change
    pub settle: Duration,
    /// How long a new worker must survive before it counts as started
    pub spawn_grace: Duration,
    /// Grace period between SIGTERM and SIGKILL
    pub terminate_timeout: Duration,
    /// Cadence of structured brightness records
    pub record_interval: Duration,
    /// Cadence of console status lines
    pub console_interval: Duration,
    /// Worker channel poll period
    pub worker_poll: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(50),
            settle: Duration::from_millis(100),
            spawn_grace: Duration::from_millis(200),
            terminate_timeout: Duration::from_millis(500),
            record_interval: Duration::from_secs(1),
            console_interval: Duration::from_secs(2),
            worker_poll: Duration::from_millis(50),
        }
    }
}

/// Overlay worker launch settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerConfig {
    /// Worker executable; defaults to `dimmer-overlay` next to the daemon
    pub program: Option<PathBuf>,
    /// Arguments placed before `<monitor> <channel>`
    pub args: Vec<String>,
    /// Directory for opacity channel slots
    pub channel_dir: Option<PathBuf>,
}

/// Brightness sampler settings
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Number of evenly spaced scanlines captured per sample
    pub rows: u16,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { rows: 48 }
    }
}
