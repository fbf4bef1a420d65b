//! Engine configuration
//!
//! All tunables live here with the reference defaults. Every field can be
//! overridden from a `PULSE_*` environment variable; invalid values fall back
//! to the default with a warning rather than failing startup.

use std::time::Duration;

use crate::{BufferSize, SampleRate};

/// Full engine configuration shared by supervisor, workers and sequencer
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Stream sample rate (PULSE_SAMPLE_RATE)
    pub sample_rate: SampleRate,
    /// Samples per buffer (PULSE_BUFFER_SIZE)
    pub buffer_size: BufferSize,
    /// Audio ring depth in buffers (PULSE_RING_FRAMES)
    pub ring_frames: usize,
    /// Command ring depth in packets (PULSE_CMD_SLOTS)
    pub cmd_slots: usize,
    /// Heartbeat stall threshold (PULSE_HEARTBEAT_TIMEOUT_MS)
    pub heartbeat_timeout: Duration,
    /// Heartbeat checks suspended this long after worker spawn
    /// (PULSE_STARTUP_GRACE_MS)
    pub startup_grace: Duration,
    /// Monitor thread poll period (PULSE_MONITOR_PERIOD_MS)
    pub monitor_period: Duration,
    /// Target ring occupancy the worker leads the reader by
    /// (PULSE_LEAD_TARGET)
    pub lead_target: usize,
    /// Maximum extra buffers rendered per worker cycle when behind
    /// (PULSE_MAX_CATCHUP)
    pub max_catchup: usize,
    /// Buffers left in the ring after a latest-wins read
    /// (PULSE_KEEP_AFTER_READ)
    pub keep_after_read: usize,
    /// OSC listener bind address (PULSE_OSC_BIND)
    pub osc_bind: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz44100,
            buffer_size: BufferSize::Samples512,
            ring_frames: 16,
            cmd_slots: 32,
            heartbeat_timeout: Duration::from_millis(50),
            startup_grace: Duration::from_secs(1),
            monitor_period: Duration::from_millis(10),
            lead_target: 2,
            max_catchup: 2,
            keep_after_read: 2,
            osc_bind: "127.0.0.1:5005".to_string(),
        }
    }
}

impl EngineConfig {
    /// Build a config from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let sample_rate = env_u32("PULSE_SAMPLE_RATE")
            .and_then(|v| {
                let rate = SampleRate::from_u32(v);
                if rate.is_none() {
                    log::warn!("PULSE_SAMPLE_RATE={v} unsupported, using default");
                }
                rate
            })
            .unwrap_or(defaults.sample_rate);

        let buffer_size = env_u32("PULSE_BUFFER_SIZE")
            .and_then(|v| {
                let size = BufferSize::from_u32(v);
                if size.is_none() {
                    log::warn!("PULSE_BUFFER_SIZE={v} unsupported, using default");
                }
                size
            })
            .unwrap_or(defaults.buffer_size);

        Self {
            sample_rate,
            buffer_size,
            ring_frames: env_usize("PULSE_RING_FRAMES")
                .filter(|&n| n >= 2)
                .unwrap_or(defaults.ring_frames),
            cmd_slots: env_usize("PULSE_CMD_SLOTS")
                .filter(|&n| n >= 2)
                .unwrap_or(defaults.cmd_slots),
            heartbeat_timeout: env_millis("PULSE_HEARTBEAT_TIMEOUT_MS")
                .unwrap_or(defaults.heartbeat_timeout),
            startup_grace: env_millis("PULSE_STARTUP_GRACE_MS").unwrap_or(defaults.startup_grace),
            monitor_period: env_millis("PULSE_MONITOR_PERIOD_MS")
                .unwrap_or(defaults.monitor_period),
            lead_target: env_usize("PULSE_LEAD_TARGET").unwrap_or(defaults.lead_target),
            max_catchup: env_usize("PULSE_MAX_CATCHUP").unwrap_or(defaults.max_catchup),
            keep_after_read: env_usize("PULSE_KEEP_AFTER_READ").unwrap_or(defaults.keep_after_read),
            osc_bind: std::env::var("PULSE_OSC_BIND").unwrap_or(defaults.osc_bind),
        }
    }

    /// Nominal wall-clock spacing between successive buffers
    #[inline]
    pub fn buffer_period(&self) -> Duration {
        Duration::from_secs_f64(self.buffer_period_secs())
    }

    /// Buffer period in seconds
    #[inline]
    pub fn buffer_period_secs(&self) -> f64 {
        self.buffer_size.as_usize() as f64 / self.sample_rate.as_f64()
    }
}

fn env_u32(key: &str) -> Option<u32> {
    env_parse(key)
}

fn env_usize(key: &str) -> Option<usize> {
    env_parse(key)
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("{key}={raw} is not a valid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.sample_rate.as_u32(), 44100);
        assert_eq!(cfg.buffer_size.as_usize(), 512);
        assert_eq!(cfg.ring_frames, 16);
        assert_eq!(cfg.cmd_slots, 32);
        assert_eq!(cfg.heartbeat_timeout, Duration::from_millis(50));
        assert_eq!(cfg.startup_grace, Duration::from_secs(1));
    }

    #[test]
    fn test_buffer_period() {
        let cfg = EngineConfig::default();
        let period = cfg.buffer_period_secs();
        assert!((period - 512.0 / 44100.0).abs() < 1e-12);
    }
}
