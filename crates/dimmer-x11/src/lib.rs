//! X11 display access for adaptive-dimmer
//!
//! Monitor enumeration goes through RandR's monitor list, and brightness is
//! estimated from evenly spaced scanlines of the root window.

mod capture;
mod display;
mod error;

pub use capture::{mean_luminance, scanline_offsets};
pub use display::{Display, Geometry, MonitorInfo};
pub use error::X11Error;
