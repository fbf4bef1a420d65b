//! Boundary-stepped parameter smoothing
//!
//! Each parameter holds a current value and a target. Once per buffer the
//! owning module calls [`SmoothedParam::step`], which moves current toward
//! target with a one-pole step:
//!
//! ```text
//! new = cur + α·(target − cur),  α = 1 / (1 + smoothing_samples / B)
//! ```
//!
//! A smoothing window of zero makes the parameter discrete (mode selectors,
//! gates): the target applies in full at the next boundary.

/// Snap-to-target threshold; below this the ramp is considered finished
const SNAP_THRESHOLD: f64 = 1e-6;

/// A parameter value with a smoothing target and a clamped range
#[derive(Debug, Clone, Copy)]
pub struct SmoothedParam {
    current: f64,
    target: f64,
    /// Ramp length in samples; 0 = discrete
    smoothing_samples: f64,
    min: f64,
    max: f64,
}

impl SmoothedParam {
    pub fn new(initial: f64, smoothing_samples: f64) -> Self {
        Self {
            current: initial,
            target: initial,
            smoothing_samples: smoothing_samples.max(0.0),
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    pub fn with_range(initial: f64, smoothing_samples: f64, min: f64, max: f64) -> Self {
        let mut param = Self::new(initial.clamp(min, max), smoothing_samples);
        param.min = min;
        param.max = max;
        param
    }

    /// Smoothing window from milliseconds at the given sample rate
    pub fn ms_to_samples(ms: f64, sample_rate: f64) -> f64 {
        (ms / 1000.0) * sample_rate
    }

    /// Set the ramp target (clamped). `immediate` also snaps the current
    /// value, bypassing the ramp.
    #[inline]
    pub fn set(&mut self, value: f64, immediate: bool) {
        let clamped = value.clamp(self.min, self.max);
        self.target = clamped;
        if immediate || self.smoothing_samples == 0.0 {
            self.current = clamped;
        }
    }

    /// Current (smoothed) value
    #[inline]
    pub fn value(&self) -> f64 {
        self.current
    }

    /// Ramp target
    #[inline]
    pub fn target(&self) -> f64 {
        self.target
    }

    #[inline]
    pub fn is_smoothing(&self) -> bool {
        (self.current - self.target).abs() > SNAP_THRESHOLD
    }

    /// One buffer-boundary smoothing step; returns the new current value.
    #[inline]
    pub fn step(&mut self, buffer_size: usize) -> f64 {
        if self.current == self.target {
            return self.current;
        }
        if self.smoothing_samples <= 0.0 {
            self.current = self.target;
            return self.current;
        }
        let alpha = 1.0 / (1.0 + self.smoothing_samples / buffer_size as f64);
        self.current += alpha * (self.target - self.current);
        if (self.current - self.target).abs() < SNAP_THRESHOLD {
            self.current = self.target;
        }
        self.current
    }

    /// Snap current to target (used by `prepare`)
    pub fn snap(&mut self) {
        self.current = self.target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_discrete_applies_at_boundary() {
        let mut p = SmoothedParam::new(0.0, 0.0);
        p.set(3.0, false);
        assert_eq!(p.value(), 3.0);
    }

    #[test]
    fn test_immediate_bypasses_ramp() {
        let mut p = SmoothedParam::new(0.0, 1000.0);
        p.set(1.0, true);
        assert_eq!(p.value(), 1.0);
        assert_eq!(p.target(), 1.0);
        assert!(!p.is_smoothing());
    }

    #[test]
    fn test_one_pole_step() {
        // smoothing = buffer size → α = 0.5, each step halves the distance
        let mut p = SmoothedParam::new(0.0, 256.0);
        p.set(1.0, false);
        assert_relative_eq!(p.step(256), 0.5);
        assert_relative_eq!(p.step(256), 0.75);
        assert_relative_eq!(p.step(256), 0.875);
    }

    #[test]
    fn test_ramp_converges_within_window() {
        // 5 ms window at 44.1 kHz, stepped per 256-sample buffer
        let smoothing = SmoothedParam::ms_to_samples(5.0, 44100.0);
        let mut p = SmoothedParam::new(0.0, smoothing);
        p.set(1.0, false);
        // Within a handful of buffers the ramp must be essentially done.
        for _ in 0..16 {
            p.step(256);
        }
        assert!(p.value() > 0.99);
    }

    #[test]
    fn test_range_clamp() {
        let mut p = SmoothedParam::with_range(0.5, 0.0, 0.0, 1.0);
        p.set(7.0, true);
        assert_eq!(p.value(), 1.0);
        p.set(-3.0, true);
        assert_eq!(p.value(), 0.0);
    }

    #[test]
    fn test_set_twice_same_target_idempotent() {
        let mut a = SmoothedParam::new(0.0, 512.0);
        let mut b = SmoothedParam::new(0.0, 512.0);
        a.set(1.0, false);
        b.set(1.0, false);
        b.set(1.0, false);
        for _ in 0..64 {
            a.step(256);
            b.step(256);
        }
        assert_eq!(a.value(), b.value());
    }
}
