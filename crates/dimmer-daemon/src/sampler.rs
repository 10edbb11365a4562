//! Brightness sampling

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dimmer_core::MonitorId;
use dimmer_x11::{Display, Geometry, X11Error};
use thiserror::Error;

/// How long a resolved monitor geometry is trusted before it is looked up again.
const GEOMETRY_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SampleError {
    #[error(transparent)]
    Display(#[from] X11Error),

    #[error("Sample for monitor {monitor} is not a finite number")]
    NotFinite { monitor: MonitorId },
}

/// Source of mean screen brightness in `[0, 255]`.
///
/// Implementations may block; the control loop calls them off the async
/// executor.
pub trait BrightnessSampler: Send + Sync + 'static {
    fn sample(&self, monitor: MonitorId) -> Result<f64, SampleError>;
}

/// Samples a monitor's screen contents over the X11 connection.
pub struct X11Sampler {
    display: Display,
    rows: u16,
    geometry: Mutex<HashMap<MonitorId, (Geometry, Instant)>>,
}

impl X11Sampler {
    pub fn connect(display_name: Option<&str>, rows: u16) -> Result<Self, X11Error> {
        let display = Display::connect(display_name)?;
        Ok(Self {
            display,
            rows,
            geometry: Mutex::new(HashMap::new()),
        })
    }

    fn geometry(&self, monitor: MonitorId) -> Result<Geometry, X11Error> {
        let mut cache = self
            .geometry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some((geometry, resolved_at)) = cache.get(&monitor) {
            if resolved_at.elapsed() < GEOMETRY_TTL {
                return Ok(*geometry);
            }
        }

        let geometry = self.display.monitor(monitor)?.geometry;
        cache.insert(monitor, (geometry, Instant::now()));
        Ok(geometry)
    }
}

impl BrightnessSampler for X11Sampler {
    fn sample(&self, monitor: MonitorId) -> Result<f64, SampleError> {
        let geometry = self.geometry(monitor)?;
        let value = self.display.sample_luminance(geometry, self.rows)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(SampleError::NotFinite { monitor })
        }
    }
}
