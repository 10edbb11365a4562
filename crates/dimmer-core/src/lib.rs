//! Shared data model for adaptive-dimmer
//!
//! This crate holds everything both sides of the opacity channel need to agree
//! on: monitor identity, the dimming curve and smoothing math, the channel wire
//! format, and the control socket protocol.

pub mod calibration;
pub mod channel;
pub mod curve;
pub mod monitor;
pub mod opacity;
pub mod paths;
pub mod protocol;
pub mod smoothing;

pub use calibration::CalibrationState;
pub use channel::{ChannelError, ChannelReader, OpacityChannel};
pub use curve::DimmingCurve;
pub use monitor::MonitorId;
pub use opacity::{clamp_opacity, OpacityState};
pub use smoothing::Smoother;
