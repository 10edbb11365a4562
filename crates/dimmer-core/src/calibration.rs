//! Overlay attenuation compensation
//!
//! A brightness sample taken while the overlay is already dimming a monitor
//! reads darker than the content really is. Dividing by the attenuation
//! factor recovers an estimate of the undimmed brightness.

use serde::{Deserialize, Serialize};

use crate::opacity::{clamp_opacity, MAX_ALPHA};

/// Lower bound on the attenuation factor, keeps the correction finite as the
/// overlay approaches full opacity.
pub const ATTENUATION_FLOOR: f64 = 0.05;

/// Fraction of light that passes an overlay of the given opacity, floored at
/// [`ATTENUATION_FLOOR`].
pub fn attenuation(opacity: f64) -> f64 {
    (1.0 - clamp_opacity(opacity) / MAX_ALPHA).max(ATTENUATION_FLOOR)
}

/// Estimate undimmed brightness from a measurement taken under `opacity`.
pub fn estimate_undimmed(measured: f64, opacity: f64) -> f64 {
    measured / attenuation(opacity)
}

/// Brightness the user actually sees under an overlay of `opacity`.
pub fn dimmed_estimate(raw: f64, opacity: f64) -> f64 {
    raw * (1.0 - clamp_opacity(opacity) / MAX_ALPHA)
}

/// Last measurement fed through calibration for one monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    pub last_measured_brightness: f64,
    pub last_opacity_at_measurement: f64,
}

impl CalibrationState {
    /// Compensate `measured` for the overlay at `opacity` and remember both.
    pub fn calibrate(&mut self, measured: f64, opacity: f64) -> f64 {
        self.last_measured_brightness = measured;
        self.last_opacity_at_measurement = clamp_opacity(opacity);
        estimate_undimmed(measured, opacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_recovers_true_brightness() {
        let opacity: f64 = 120.0;
        let truth = 150.0;
        let measured = truth * (1.0 - opacity / 255.0);
        assert!((measured - 79.41).abs() < 0.01);
        assert!((estimate_undimmed(measured, opacity) - truth).abs() < 1e-9);
    }

    #[test]
    fn test_attenuation_floor_at_full_opacity() {
        assert_eq!(attenuation(255.0), ATTENUATION_FLOOR);
        assert!(estimate_undimmed(10.0, 255.0).is_finite());
        assert!((estimate_undimmed(10.0, 255.0) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_overlay_is_identity() {
        assert_eq!(estimate_undimmed(123.0, 0.0), 123.0);
        assert_eq!(dimmed_estimate(123.0, 0.0), 123.0);
    }

    #[test]
    fn test_calibrate_records_inputs() {
        let mut state = CalibrationState::default();
        let raw = state.calibrate(50.0, 300.0);
        assert_eq!(state.last_measured_brightness, 50.0);
        assert_eq!(state.last_opacity_at_measurement, 255.0);
        assert!((raw - 1000.0).abs() < 1e-9);
    }
}
