//! Mono output stream
//!
//! Wraps a cpal output stream around a pull callback that renders one mono
//! block at a time. The driver may deliver callback sizes other than the
//! requested block, so the adapter pulls whole blocks into a pre-allocated
//! carry buffer and spreads them across device frames — no allocation, no
//! locks, once the stream is running.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{
    BufferSize as CpalBufferSize, Device, SampleFormat, Stream, StreamConfig,
    SupportedStreamConfig,
};

use pulse_core::{BufferSize, Sample, SampleRate};

use crate::{AudioError, AudioResult};

/// Pull callback: fill one mono block of the configured size
pub type MonoCallback = Box<dyn FnMut(&mut [Sample]) + Send + 'static>;

/// Mono output stream wrapper
pub struct OutputStream {
    stream: Stream,
    channels: usize,
    error_count: Arc<AtomicU64>,
}

impl OutputStream {
    /// Build an output stream that pulls fixed-size mono blocks from
    /// `callback` and duplicates them across the device's channels.
    pub fn new(
        device: &Device,
        sample_rate: SampleRate,
        block: BufferSize,
        mut callback: MonoCallback,
    ) -> AudioResult<Self> {
        let supported = pick_output_config(device, sample_rate)?;
        let channels = supported.channels() as usize;

        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: cpal::SampleRate(sample_rate.as_u32()),
            buffer_size: CpalBufferSize::Fixed(block.as_u32()),
        };

        let block_len = block.as_usize();
        let mut mono = vec![0.0f32; block_len];
        let mut cursor = block_len; // force a pull on the first frame

        let error_count = Arc::new(AtomicU64::new(0));
        let errors = Arc::clone(&error_count);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut i = 0;
                    while i < data.len() {
                        if cursor == block_len {
                            callback(&mut mono);
                            cursor = 0;
                        }
                        let sample = mono[cursor];
                        cursor += 1;
                        for c in 0..channels {
                            data[i + c] = sample;
                        }
                        i += channels;
                    }
                },
                move |_err| {
                    // Counted, not logged: this callback runs on the device
                    // thread.
                    errors.fetch_add(1, Ordering::Relaxed);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        Ok(Self {
            stream,
            channels,
            error_count,
        })
    }

    pub fn start(&self) -> AudioResult<()> {
        self.stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))
    }

    pub fn stop(&self) -> AudioResult<()> {
        self.stream
            .pause()
            .map_err(|e| AudioError::StreamError(e.to_string()))
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Stream-level error count (xruns, device errors)
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }
}

fn pick_output_config(
    device: &Device,
    sample_rate: SampleRate,
) -> AudioResult<SupportedStreamConfig> {
    let rate = cpal::SampleRate(sample_rate.as_u32());

    let configs = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;

    for supported in configs {
        if supported.channels() >= 1
            && supported.min_sample_rate() <= rate
            && supported.max_sample_rate() >= rate
            && supported.sample_format() == SampleFormat::F32
        {
            return Ok(supported.with_sample_rate(rate));
        }
    }

    Err(AudioError::ConfigError(format!(
        "no f32 output config @ {}Hz",
        sample_rate.as_u32()
    )))
}
