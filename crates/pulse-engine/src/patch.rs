//! Default patch
//!
//! Every worker boots the same subtractive voice so a fresh standby reaches
//! non-silent output within one gate: oscillator → envelope → filter.

use pulse_dsp::{AdsrEnvelope, BiquadFilter, SineOsc};

use crate::ModuleHost;

/// Module ids of the default chain, in processing order
pub const DEFAULT_CHAIN: [&str; 3] = ["osc", "env", "filter"];

/// Build the default oscillator → envelope → filter chain
pub fn build_default_patch(sample_rate: f64, buffer_size: usize) -> ModuleHost {
    let mut host = ModuleHost::new(sample_rate, buffer_size);
    host.add_module("osc", Box::new(SineOsc::new(sample_rate, buffer_size)));
    host.add_module("env", Box::new(AdsrEnvelope::new(sample_rate, buffer_size)));
    host.add_module("filter", Box::new(BiquadFilter::new(sample_rate, buffer_size)));
    host
}
