//! Sine oscillator
//!
//! Phase-accumulator generator with phase continuity across buffers and a
//! periodic 2π wrap to keep precision. Frequency is discrete (glide can be
//! layered on later); gain is smoothed to stay click-free.

use std::f64::consts::TAU;

use pulse_core::Sample;

use crate::{Module, ModuleState, SmoothedParam};

/// Default gain smoothing window in milliseconds
const GAIN_SMOOTHING_MS: f64 = 5.0;

pub struct SineOsc {
    freq: SmoothedParam,
    gain: SmoothedParam,
    phase: f64,
    two_pi_over_sr: f64,
}

impl SineOsc {
    pub fn new(sample_rate: f64, _buffer_size: usize) -> Self {
        let nyquist = sample_rate * 0.5;
        Self {
            freq: SmoothedParam::with_range(440.0, 0.0, 0.1, nyquist - 10.0),
            gain: SmoothedParam::with_range(
                0.5,
                SmoothedParam::ms_to_samples(GAIN_SMOOTHING_MS, sample_rate),
                0.0,
                1.0,
            ),
            phase: 0.0,
            two_pi_over_sr: TAU / sample_rate,
        }
    }
}

impl Module for SineOsc {
    fn set_param(&mut self, param: &str, value: f64, immediate: bool) {
        match param {
            "freq" => self.freq.set(value, immediate),
            "gain" => self.gain.set(value, immediate),
            _ => {}
        }
    }

    fn prepare(&mut self) {
        self.phase = 0.0;
        self.freq.snap();
        self.gain.snap();
    }

    fn process_buffer(&mut self, _input: Option<&[Sample]>, output: &mut [Sample]) {
        let freq = self.freq.step(output.len());
        let gain = self.gain.step(output.len());
        let phase_inc = self.two_pi_over_sr * freq;

        let mut phase = self.phase;
        for sample in output.iter_mut() {
            *sample = (phase.sin() * gain) as Sample;
            phase += phase_inc;
        }

        self.phase = phase;
        if self.phase > TAU {
            self.phase %= TAU;
        }
    }

    fn state(&self) -> ModuleState {
        ModuleState {
            params: vec![("freq", self.freq.value()), ("gain", self.gain.value())],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rms;

    const SR: f64 = 44100.0;
    const B: usize = 256;

    #[test]
    fn test_output_level_tracks_gain() {
        let mut osc = SineOsc::new(SR, B);
        osc.set_param("freq", 440.0, true);
        osc.set_param("gain", 0.5, true);

        let mut buf = vec![0.0; B];
        // A few buffers to settle, then a full-cycle RMS check:
        // sine RMS = gain / √2.
        for _ in 0..8 {
            osc.process_buffer(None, &mut buf);
        }
        let level = rms(&buf);
        assert!((level - 0.5 / 2.0_f32.sqrt()).abs() < 0.02, "rms={level}");
    }

    #[test]
    fn test_phase_continuity_across_buffers() {
        let mut osc = SineOsc::new(SR, B);
        osc.set_param("freq", 1000.0, true);
        osc.set_param("gain", 1.0, true);

        let mut a = vec![0.0; B];
        let mut b = vec![0.0; B];
        osc.process_buffer(None, &mut a);
        osc.process_buffer(None, &mut b);

        // The step across the buffer seam must be no larger than the biggest
        // step inside a buffer.
        let max_inner_step = a
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0f32, f32::max);
        let seam_step = (b[0] - a[B - 1]).abs();
        assert!(seam_step <= max_inner_step * 1.5, "seam discontinuity");
    }

    #[test]
    fn test_freq_clamped_below_nyquist() {
        let mut osc = SineOsc::new(SR, B);
        osc.set_param("freq", 1.0e6, true);
        assert!(osc.state().param("freq").unwrap() <= SR * 0.5 - 10.0);
        osc.set_param("freq", -5.0, true);
        assert!(osc.state().param("freq").unwrap() >= 0.1);
    }

    #[test]
    fn test_unknown_param_ignored() {
        let mut osc = SineOsc::new(SR, B);
        osc.set_param("cutoff", 123.0, true);
        assert_eq!(osc.state().param("freq").unwrap(), 440.0);
    }

    #[test]
    fn test_gain_ramps_over_multiple_buffers() {
        let mut osc = SineOsc::new(SR, B);
        osc.set_param("freq", 100.0, true);
        osc.set_param("gain", 0.0, true);
        let mut buf = vec![0.0; B];
        osc.process_buffer(None, &mut buf);

        // Jump the target; the one-pole boundary ramp must spread the change
        // across buffers instead of applying it in full at once.
        osc.set_param("gain", 1.0, false);
        osc.process_buffer(None, &mut buf);
        let first = osc.state().param("gain").unwrap();
        assert!(first > 0.1 && first < 0.8, "first step = {first}");

        for _ in 0..16 {
            osc.process_buffer(None, &mut buf);
        }
        assert!(osc.state().param("gain").unwrap() > 0.95);
    }
}
