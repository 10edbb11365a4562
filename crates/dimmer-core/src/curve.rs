//! Brightness to opacity mapping

use crate::opacity::clamp_opacity;

pub const DEFAULT_THRESHOLD_START: f64 = 80.0;
pub const DEFAULT_THRESHOLD_MAX: f64 = 200.0;
pub const DEFAULT_MAX_OPACITY: f64 = 240.0;
pub const DEFAULT_CAP_FRACTION: f64 = 0.75;

/// Piecewise-linear dimming curve.
///
/// Below `threshold_start` nothing is dimmed, above `threshold_max` the overlay
/// sits at `cap`, and in between the opacity ramps linearly. The result is
/// scaled by the user's dim strength.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimmingCurve {
    threshold_start: f64,
    threshold_max: f64,
    cap: f64,
}

impl DimmingCurve {
    /// Build a curve. `cap` is clamped to a valid opacity; callers are expected
    /// to have validated `threshold_start < threshold_max`.
    pub fn new(threshold_start: f64, threshold_max: f64, cap: f64) -> Self {
        Self {
            threshold_start,
            threshold_max,
            cap: clamp_opacity(cap),
        }
    }

    /// Curve whose ceiling is `cap_fraction` of `max_opacity`.
    pub fn with_cap_fraction(
        threshold_start: f64,
        threshold_max: f64,
        max_opacity: f64,
        cap_fraction: f64,
    ) -> Self {
        Self::new(threshold_start, threshold_max, max_opacity * cap_fraction)
    }

    pub fn cap(&self) -> f64 {
        self.cap
    }

    pub fn threshold_start(&self) -> f64 {
        self.threshold_start
    }

    pub fn threshold_max(&self) -> f64 {
        self.threshold_max
    }

    /// Target opacity for an (undimmed) brightness estimate.
    pub fn target(&self, raw: f64, dim_strength: f64) -> f64 {
        let strength = if dim_strength.is_nan() {
            0.0
        } else {
            dim_strength.clamp(0.0, 1.0)
        };

        let target = if raw > self.threshold_max {
            self.cap * strength
        } else if raw > self.threshold_start {
            let ratio = (raw - self.threshold_start) / (self.threshold_max - self.threshold_start);
            ratio * self.cap * strength
        } else {
            0.0
        };

        clamp_opacity(target)
    }
}

impl Default for DimmingCurve {
    fn default() -> Self {
        Self::with_cap_fraction(
            DEFAULT_THRESHOLD_START,
            DEFAULT_THRESHOLD_MAX,
            DEFAULT_MAX_OPACITY,
            DEFAULT_CAP_FRACTION,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cap_is_three_quarters_of_max() {
        assert!((DimmingCurve::default().cap() - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_below_start_is_undimmed() {
        let curve = DimmingCurve::default();
        for raw in [0.0, 10.0, 79.9, 80.0] {
            assert_eq!(curve.target(raw, 1.0), 0.0, "raw={}", raw);
        }
    }

    #[test]
    fn test_at_or_above_max_hits_cap() {
        let curve = DimmingCurve::default();
        assert!((curve.target(200.0, 1.0) - 180.0).abs() < 1e-9);
        assert!((curve.target(250.0, 1.0) - 180.0).abs() < 1e-9);
        assert!((curve.target(255.0, 0.5) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_midpoint_is_half_of_cap() {
        let curve = DimmingCurve::default();
        assert!((curve.target(140.0, 1.0) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_ramp_is_strictly_increasing_and_linear() {
        let curve = DimmingCurve::default();
        let mut previous = curve.target(80.5, 1.0);
        let slope = 180.0 / 120.0;
        let mut raw = 81.0;
        while raw < 200.0 {
            let target = curve.target(raw, 1.0);
            assert!(target > previous, "not increasing at raw={}", raw);
            assert!((target - (raw - 80.0) * slope).abs() < 1e-9);
            previous = target;
            raw += 0.5;
        }
    }

    #[test]
    fn test_strength_is_clamped() {
        let curve = DimmingCurve::default();
        assert!((curve.target(250.0, 3.0) - 180.0).abs() < 1e-9);
        assert_eq!(curve.target(250.0, -1.0), 0.0);
        assert_eq!(curve.target(250.0, f64::NAN), 0.0);
    }
}
