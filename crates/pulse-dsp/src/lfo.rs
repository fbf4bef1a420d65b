//! Low-frequency oscillator
//!
//! Generator emitting `offset + depth·sin(phase)` for slow modulation buses.
//! Same phase-accumulator discipline as the audio oscillator.

use std::f64::consts::TAU;

use pulse_core::Sample;

use crate::{Module, ModuleState, SmoothedParam};

const DEPTH_SMOOTHING_MS: f64 = 5.0;

pub struct Lfo {
    rate: SmoothedParam,
    depth: SmoothedParam,
    offset: SmoothedParam,
    phase: f64,
    two_pi_over_sr: f64,
}

impl Lfo {
    pub fn new(sample_rate: f64, _buffer_size: usize) -> Self {
        let smoothing = SmoothedParam::ms_to_samples(DEPTH_SMOOTHING_MS, sample_rate);
        Self {
            rate: SmoothedParam::with_range(1.0, 0.0, 0.01, 50.0),
            depth: SmoothedParam::with_range(1.0, smoothing, 0.0, 1.0),
            offset: SmoothedParam::with_range(0.0, smoothing, -1.0, 1.0),
            phase: 0.0,
            two_pi_over_sr: TAU / sample_rate,
        }
    }
}

impl Module for Lfo {
    fn set_param(&mut self, param: &str, value: f64, immediate: bool) {
        match param {
            "rate" => self.rate.set(value, immediate),
            "depth" => self.depth.set(value, immediate),
            "offset" => self.offset.set(value, immediate),
            _ => {}
        }
    }

    fn prepare(&mut self) {
        self.phase = 0.0;
        self.rate.snap();
        self.depth.snap();
        self.offset.snap();
    }

    fn process_buffer(&mut self, _input: Option<&[Sample]>, output: &mut [Sample]) {
        let rate = self.rate.step(output.len());
        let depth = self.depth.step(output.len());
        let offset = self.offset.step(output.len());
        let phase_inc = self.two_pi_over_sr * rate;

        let mut phase = self.phase;
        for sample in output.iter_mut() {
            *sample = (offset + depth * phase.sin()) as Sample;
            phase += phase_inc;
        }

        self.phase = phase;
        if self.phase > TAU {
            self.phase %= TAU;
        }
    }

    fn state(&self) -> ModuleState {
        ModuleState {
            params: vec![
                ("rate", self.rate.value()),
                ("depth", self.depth.value()),
                ("offset", self.offset.value()),
            ],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 44100.0;
    const B: usize = 256;

    #[test]
    fn test_output_bounded_by_depth_and_offset() {
        let mut lfo = Lfo::new(SR, B);
        lfo.set_param("rate", 10.0, true);
        lfo.set_param("depth", 0.5, true);
        lfo.set_param("offset", 0.25, true);

        let mut buf = vec![0.0; B];
        for _ in 0..64 {
            lfo.process_buffer(None, &mut buf);
            for &s in &buf {
                assert!(s <= 0.76 && s >= -0.26, "out of range: {s}");
            }
        }
    }

    #[test]
    fn test_rate_clamped() {
        let mut lfo = Lfo::new(SR, B);
        lfo.set_param("rate", 500.0, true);
        assert!(lfo.state().param("rate").unwrap() <= 50.0);
    }
}
