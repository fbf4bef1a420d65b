//! Biquad filter
//!
//! Transposed Direct Form II with RBJ cookbook coefficients. TDF-II is
//! numerically well-behaved in floating point; coefficients are recomputed
//! only when {cutoff, q, mode} actually changed, and the state memory is
//! flushed to zero below the denormal threshold.

use std::f64::consts::TAU;

use pulse_core::Sample;

use crate::{Module, ModuleState, SmoothedParam};

/// Denormal flush threshold for the filter state
const DENORMAL_THRESHOLD: f64 = 1e-20;

/// Cutoff/Q smoothing window in milliseconds
const CUTOFF_SMOOTHING_MS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Lowpass = 0,
    Highpass = 1,
    Bandpass = 2,
}

impl FilterMode {
    fn from_f64(value: f64) -> Self {
        match value as i64 {
            1 => Self::Highpass,
            2 => Self::Bandpass,
            _ => Self::Lowpass,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Lowpass => "lowpass",
            Self::Highpass => "highpass",
            Self::Bandpass => "bandpass",
        }
    }
}

pub struct BiquadFilter {
    mode: FilterMode,
    cutoff: SmoothedParam,
    q: SmoothedParam,

    // TDF-II state (f64 for stability)
    z1: f64,
    z2: f64,

    // Normalized coefficients
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,

    // Recompute cache
    last_cutoff: f64,
    last_q: f64,
    last_mode: FilterMode,

    two_pi_over_sr: f64,
}

impl BiquadFilter {
    pub fn new(sample_rate: f64, _buffer_size: usize) -> Self {
        let nyquist = sample_rate * 0.5;
        let smoothing = SmoothedParam::ms_to_samples(CUTOFF_SMOOTHING_MS, sample_rate);
        let mut filter = Self {
            mode: FilterMode::Lowpass,
            cutoff: SmoothedParam::with_range(1000.0, smoothing, 10.0, nyquist - 10.0),
            q: SmoothedParam::with_range(0.707, smoothing, 0.1, 20.0),
            z1: 0.0,
            z2: 0.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            last_cutoff: -1.0,
            last_q: -1.0,
            last_mode: FilterMode::Lowpass,
            two_pi_over_sr: TAU / sample_rate,
        };
        filter.update_coefficients();
        filter
    }

    /// RBJ cookbook coefficients, recomputed only on parameter change
    fn update_coefficients(&mut self) {
        let cutoff = self.cutoff.value();
        let q = self.q.value();
        if cutoff == self.last_cutoff && q == self.last_q && self.mode == self.last_mode {
            return;
        }
        self.last_cutoff = cutoff;
        self.last_q = q;
        self.last_mode = self.mode;

        let w0 = self.two_pi_over_sr * cutoff;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        let (b0, b1, b2) = match self.mode {
            FilterMode::Lowpass => {
                let b1 = 1.0 - cos_w0;
                (b1 / 2.0, b1, b1 / 2.0)
            }
            FilterMode::Highpass => {
                let b1 = -(1.0 + cos_w0);
                (-b1 / 2.0, b1, -b1 / 2.0)
            }
            FilterMode::Bandpass => (alpha, 0.0, -alpha),
        };
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        let inv_a0 = 1.0 / a0;
        self.b0 = b0 * inv_a0;
        self.b1 = b1 * inv_a0;
        self.b2 = b2 * inv_a0;
        self.a1 = a1 * inv_a0;
        self.a2 = a2 * inv_a0;
    }
}

impl Module for BiquadFilter {
    fn set_param(&mut self, param: &str, value: f64, immediate: bool) {
        match param {
            "mode" => self.mode = FilterMode::from_f64(value),
            "cutoff" => self.cutoff.set(value, immediate),
            "q" => self.q.set(value, immediate),
            _ => {}
        }
    }

    fn prepare(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
        self.cutoff.snap();
        self.q.snap();
        self.update_coefficients();
    }

    fn process_buffer(&mut self, input: Option<&[Sample]>, output: &mut [Sample]) {
        self.cutoff.step(output.len());
        self.q.step(output.len());
        self.update_coefficients();

        for i in 0..output.len() {
            let x = match input {
                Some(buf) => buf[i] as f64,
                None => 0.0,
            };

            let y = self.b0 * x + self.z1;
            self.z1 = self.b1 * x - self.a1 * y + self.z2;
            self.z2 = self.b2 * x - self.a2 * y;

            if self.z1.abs() < DENORMAL_THRESHOLD {
                self.z1 = 0.0;
            }
            if self.z2.abs() < DENORMAL_THRESHOLD {
                self.z2 = 0.0;
            }

            output[i] = y as Sample;
        }
    }

    fn state(&self) -> ModuleState {
        ModuleState {
            params: vec![
                ("mode", self.mode as i64 as f64),
                ("cutoff", self.cutoff.value()),
                ("q", self.q.value()),
            ],
            stage: Some(self.mode.name()),
            ..Default::default()
        }
    }
}
