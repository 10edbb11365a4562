//! Exponential approach used by both smoothing stages

/// Default factor for the supervisor stage (slow, avoids visible stepping).
pub const SUPERVISOR_FACTOR: f64 = 0.15;
/// Snap distance for the supervisor stage.
pub const SUPERVISOR_SNAP: f64 = 1.0;
/// Default factor for the worker stage (fast, hides channel step values).
pub const WORKER_FACTOR: f64 = 0.8;
/// Snap distance for the worker stage.
pub const WORKER_SNAP: f64 = 2.0;

/// Moves a value a fixed fraction of the way to its target each step, and
/// snaps once it is within `snap` of the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoother {
    factor: f64,
    snap: f64,
}

impl Smoother {
    /// `factor` is clamped into `(0, 1]`; a factor of 0 would never converge.
    pub fn new(factor: f64, snap: f64) -> Self {
        let factor = if factor.is_finite() && factor > 0.0 {
            factor.min(1.0)
        } else {
            1.0
        };
        Self {
            factor,
            snap: snap.max(0.0),
        }
    }

    pub fn supervisor(factor: f64) -> Self {
        Self::new(factor, SUPERVISOR_SNAP)
    }

    pub fn worker(factor: f64) -> Self {
        Self::new(factor, WORKER_SNAP)
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn step(&self, current: f64, target: f64) -> f64 {
        let diff = target - current;
        if diff.abs() > self.snap {
            current + diff * self.factor
        } else {
            target
        }
    }
}

impl Default for Smoother {
    fn default() -> Self {
        Self::supervisor(SUPERVISOR_FACTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_step_moves_fraction_of_distance() {
        let smoother = Smoother::supervisor(0.15);
        let next = smoother.step(0.0, 100.0);
        assert!((next - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_snaps_within_threshold() {
        let smoother = Smoother::supervisor(0.15);
        assert_eq!(smoother.step(99.2, 100.0), 100.0);
        let worker = Smoother::worker(0.8);
        assert_eq!(worker.step(98.5, 100.0), 100.0);
    }

    #[test]
    fn test_supervisor_smoothing_converges_monotonically() {
        let smoother = Smoother::supervisor(0.15);
        for &(start, target) in &[(0.0, 180.0), (180.0, 0.0), (37.0, 38.5), (255.0, 90.0)] {
            let mut current: f64 = start;
            let mut distance = (target - current).abs();
            let mut ticks = 0;
            while current != target {
                current = smoother.step(current, target);
                let next = (target - current).abs();
                assert!(next <= distance, "distance grew from {} to {}", distance, next);
                distance = next;
                ticks += 1;
                assert!(ticks < 100, "did not converge from {} to {}", start, target);
            }
        }
    }

    #[test]
    fn test_worker_smoothing_reaches_step_quickly_without_overshoot() {
        let smoother = Smoother::worker(0.8);
        let mut current = 0.0;
        let mut polls = 0;
        while current != 180.0 {
            current = smoother.step(current, 180.0);
            assert!(current <= 180.0);
            polls += 1;
        }
        assert!(polls <= 5, "took {} polls", polls);
    }

    #[test]
    fn test_degenerate_factor_falls_back_to_immediate() {
        let smoother = Smoother::new(0.0, 1.0);
        assert_eq!(smoother.factor(), 1.0);
        assert_eq!(smoother.step(0.0, 50.0), 50.0);
    }
}
