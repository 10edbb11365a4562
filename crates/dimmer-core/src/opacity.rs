//! Per-monitor opacity bookkeeping

use serde::{Deserialize, Serialize};

use crate::smoothing::Smoother;

/// Largest alpha a channel value can carry.
pub const MAX_ALPHA: f64 = 255.0;

/// Clamp an opacity into `[0, 255]`.
///
/// NaN maps to 0 so a bad sample can never propagate into stored state.
pub fn clamp_opacity(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, MAX_ALPHA)
    }
}

/// Supervisor-side view of one monitor's overlay opacity.
///
/// Both fields stay within `[0, 255]`; every mutator clamps its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OpacityState {
    /// Smoothed value last written to the channel
    pub current: f64,
    /// Latest commanded value
    pub target: f64,
}

impl OpacityState {
    /// Record a new target and move `current` one smoothing step towards it.
    pub fn advance(&mut self, target: f64, smoother: &Smoother) {
        self.target = clamp_opacity(target);
        self.current = clamp_opacity(smoother.step(self.current, self.target));
    }

    /// Jump straight to `value`, bypassing smoothing.
    pub fn snap(&mut self, value: f64) {
        let value = clamp_opacity(value);
        self.target = value;
        self.current = value;
    }

    /// The integer written on the wire for `current`.
    pub fn wire_value(&self) -> u8 {
        // current is clamped, so truncation stays within u8
        clamp_opacity(self.current) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_opacity_bounds() {
        assert_eq!(clamp_opacity(-12.0), 0.0);
        assert_eq!(clamp_opacity(300.0), 255.0);
        assert_eq!(clamp_opacity(f64::NAN), 0.0);
        assert_eq!(clamp_opacity(f64::INFINITY), 255.0);
        assert_eq!(clamp_opacity(42.5), 42.5);
    }

    #[test]
    fn test_advance_clamps_out_of_range_target() {
        let smoother = Smoother::new(0.15, 1.0);
        let mut state = OpacityState::default();
        state.advance(1000.0, &smoother);
        assert_eq!(state.target, 255.0);
        assert!(state.current > 0.0 && state.current <= 255.0);
    }

    #[test]
    fn test_snap_sets_both_fields() {
        let mut state = OpacityState {
            current: 170.0,
            target: 180.0,
        };
        state.snap(0.0);
        assert_eq!(state, OpacityState::default());
    }

    #[test]
    fn test_wire_value_truncates() {
        let state = OpacityState {
            current: 89.9,
            target: 90.0,
        };
        assert_eq!(state.wire_value(), 89);
    }
}
