//! ADSR envelope
//!
//! Gated processor with a sample-accurate linear state machine. Applied as a
//! multiplier on its input; with no input it emits the envelope itself.
//! Gate changes land at buffer boundaries like every other parameter.

use pulse_core::Sample;

use crate::{Module, ModuleState, SmoothedParam};

/// Envelope floor; below this the release snaps to idle (denormal guard)
const LEVEL_FLOOR: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Attack => "attack",
            Self::Decay => "decay",
            Self::Sustain => "sustain",
            Self::Release => "release",
        }
    }
}

pub struct AdsrEnvelope {
    // Times in milliseconds; they ARE the smoothing, so no extra window.
    attack: SmoothedParam,
    decay: SmoothedParam,
    sustain: SmoothedParam,
    release: SmoothedParam,

    stage: Stage,
    level: f64,
    gate: bool,
    next_gate: bool,
    gate_changed: bool,

    // Per-sample increments, recomputed at buffer boundaries
    attack_inc: f64,
    decay_inc: f64,
    release_inc: f64,

    ms_to_samples: f64,
}

impl AdsrEnvelope {
    pub fn new(sample_rate: f64, _buffer_size: usize) -> Self {
        Self {
            attack: SmoothedParam::with_range(10.0, 0.0, 0.1, 10_000.0),
            decay: SmoothedParam::with_range(100.0, 0.0, 0.1, 10_000.0),
            sustain: SmoothedParam::with_range(0.7, 0.0, 0.0, 1.0),
            release: SmoothedParam::with_range(200.0, 0.0, 0.1, 10_000.0),
            stage: Stage::Idle,
            level: 0.0,
            gate: false,
            next_gate: false,
            gate_changed: false,
            attack_inc: 0.0,
            decay_inc: 0.0,
            release_inc: 0.0,
            ms_to_samples: sample_rate / 1000.0,
        }
    }

    /// Current envelope level (test/diagnostic hook)
    pub fn level(&self) -> f64 {
        self.level
    }

    fn update_increments(&mut self) {
        let attack_samples = (self.attack.value() * self.ms_to_samples).max(1.0);
        let decay_samples = (self.decay.value() * self.ms_to_samples).max(1.0);
        self.attack_inc = 1.0 / attack_samples;
        self.decay_inc = (1.0 - self.sustain.value()) / decay_samples;
        // release_inc is recomputed from the live level on gate-off
    }

    fn apply_gate_change(&mut self) {
        if !self.gate_changed {
            return;
        }
        self.gate = self.next_gate;
        self.gate_changed = false;

        if self.gate {
            // Retrigger from the current level
            self.stage = Stage::Attack;
        } else if self.stage != Stage::Idle && self.stage != Stage::Release {
            self.stage = Stage::Release;
            // Release from the current level, not from sustain
            if self.level > LEVEL_FLOOR {
                let release_samples = (self.release.value() * self.ms_to_samples).max(1.0);
                self.release_inc = self.level / release_samples;
            }
        }
    }
}

impl Module for AdsrEnvelope {
    fn set_param(&mut self, param: &str, value: f64, immediate: bool) {
        match param {
            "attack" => self.attack.set(value, immediate),
            "decay" => self.decay.set(value, immediate),
            "sustain" => self.sustain.set(value, immediate),
            "release" => self.release.set(value, immediate),
            _ => {}
        }
    }

    fn set_gate(&mut self, on: bool) {
        self.next_gate = on;
        self.gate_changed = true;
    }

    fn prepare(&mut self) {
        self.stage = Stage::Idle;
        self.level = 0.0;
        self.gate = false;
        self.next_gate = false;
        self.gate_changed = false;
        self.update_increments();
    }

    fn process_buffer(&mut self, input: Option<&[Sample]>, output: &mut [Sample]) {
        let b = output.len();
        self.attack.step(b);
        self.decay.step(b);
        self.sustain.step(b);
        self.release.step(b);
        self.update_increments();
        self.apply_gate_change();

        let sustain = self.sustain.value();
        for i in 0..b {
            match self.stage {
                Stage::Attack => {
                    self.level += self.attack_inc;
                    if self.level >= 1.0 {
                        self.level = 1.0;
                        self.stage = Stage::Decay;
                    }
                }
                Stage::Decay => {
                    self.level -= self.decay_inc;
                    if self.level <= sustain {
                        self.level = sustain;
                        self.stage = Stage::Sustain;
                    }
                }
                Stage::Sustain => {
                    self.level = sustain;
                }
                Stage::Release => {
                    self.level -= self.release_inc;
                    if self.level <= LEVEL_FLOOR {
                        self.level = 0.0;
                        self.stage = Stage::Idle;
                    }
                }
                Stage::Idle => {
                    self.level = 0.0;
                }
            }

            output[i] = match input {
                Some(buf) => buf[i] * self.level as Sample,
                None => self.level as Sample,
            };
        }
    }

    fn state(&self) -> ModuleState {
        ModuleState {
            params: vec![
                ("attack", self.attack.value()),
                ("decay", self.decay.value()),
                ("sustain", self.sustain.value()),
                ("release", self.release.value()),
            ],
            gate: Some(self.gate),
            stage: Some(self.stage.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 44100.0;
    const B: usize = 256;

    fn env_with(attack_ms: f64, decay_ms: f64, sustain: f64, release_ms: f64) -> AdsrEnvelope {
        let mut env = AdsrEnvelope::new(SR, B);
        env.set_param("attack", attack_ms, true);
        env.set_param("decay", decay_ms, true);
        env.set_param("sustain", sustain, true);
        env.set_param("release", release_ms, true);
        env
    }

    fn run_buffers(env: &mut AdsrEnvelope, count: usize) -> Vec<Sample> {
        let mut buf = vec![0.0; B];
        for _ in 0..count {
            env.process_buffer(None, &mut buf);
        }
        buf
    }

    #[test]
    fn test_idle_outputs_silence() {
        let mut env = env_with(10.0, 100.0, 0.7, 200.0);
        let buf = run_buffers(&mut env, 4);
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_attack_reaches_peak_then_sustains() {
        // 1 ms attack = ~44 samples, well inside one buffer
        let mut env = env_with(1.0, 1.0, 0.6, 50.0);
        env.set_gate(true);
        run_buffers(&mut env, 1);
        // After attack+decay completes the envelope sits at sustain.
        run_buffers(&mut env, 4);
        assert_eq!(env.state().stage, Some("sustain"));
        assert!((env.level() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_release_decays_to_idle() {
        let mut env = env_with(1.0, 1.0, 0.8, 5.0);
        env.set_gate(true);
        run_buffers(&mut env, 8);
        env.set_gate(false);
        // 5 ms release = ~220 samples → one buffer into release, nearly done
        run_buffers(&mut env, 2);
        assert_eq!(env.state().stage, Some("idle"));
        assert_eq!(env.level(), 0.0);
    }

    #[test]
    fn test_gate_applies_at_boundary_not_midbuffer() {
        let mut env = env_with(1.0, 1.0, 0.5, 10.0);
        let mut buf = vec![0.0; B];
        env.process_buffer(None, &mut buf);
        env.set_gate(true);
        // The gate was queued after the boundary; the buffer already rendered
        // stays silent and the next one rises.
        assert!(buf.iter().all(|&s| s == 0.0));
        env.process_buffer(None, &mut buf);
        assert!(buf[B - 1] > 0.0);
    }

    #[test]
    fn test_envelope_multiplies_input() {
        let mut env = env_with(0.1, 0.1, 1.0, 10.0);
        env.set_gate(true);
        let input = vec![0.5; B];
        let mut out = vec![0.0; B];
        env.process_buffer(Some(&input), &mut out);
        run_buffers(&mut env, 2);
        // Sustain = 1.0, so the processor passes input through scaled by 1.
        let mut out2 = vec![0.0; B];
        env.process_buffer(Some(&input), &mut out2);
        assert!(out2.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_retrigger_from_release() {
        let mut env = env_with(5.0, 5.0, 0.7, 100.0);
        env.set_gate(true);
        run_buffers(&mut env, 8);
        env.set_gate(false);
        run_buffers(&mut env, 1);
        assert_eq!(env.state().stage, Some("release"));
        env.set_gate(true);
        run_buffers(&mut env, 1);
        let stage = env.state().stage.unwrap();
        assert!(stage == "attack" || stage == "decay" || stage == "sustain");
        assert!(env.level() > 0.0);
    }
}
