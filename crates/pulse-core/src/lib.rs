//! pulse-core: Shared types for the Pulse synthesizer
//!
//! This crate provides the foundational types used across all Pulse crates:
//! the audio sample type, stream geometry, the engine configuration, and the
//! 64-byte command packet that every control-plane mutation travels in.

mod command;
mod config;

pub use command::*;
pub use config::*;

/// Audio sample type (single precision, one channel per slot bus)
pub type Sample = f32;

/// Standard sample rate options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum SampleRate {
    Hz44100 = 44100,
    Hz48000 = 48000,
}

impl SampleRate {
    #[inline]
    pub fn as_f64(self) -> f64 {
        self as u32 as f64
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            44100 => Some(Self::Hz44100),
            48000 => Some(Self::Hz48000),
            _ => None,
        }
    }

    /// Nyquist frequency in Hz
    #[inline]
    pub fn nyquist(self) -> f64 {
        self.as_f64() * 0.5
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self::Hz44100
    }
}

/// Buffer size options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum BufferSize {
    Samples256 = 256,
    Samples512 = 512,
    Samples1024 = 1024,
}

impl BufferSize {
    #[inline]
    pub fn as_usize(self) -> usize {
        self as u32 as usize
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            256 => Some(Self::Samples256),
            512 => Some(Self::Samples512),
            1024 => Some(Self::Samples1024),
            _ => None,
        }
    }

    /// Buffer period in milliseconds at the given sample rate
    #[inline]
    pub fn period_ms(self, sample_rate: SampleRate) -> f64 {
        (self.as_usize() as f64 / sample_rate.as_f64()) * 1000.0
    }
}

impl Default for BufferSize {
    fn default() -> Self {
        Self::Samples512
    }
}

/// Slot identifier: a stable position owning a ring pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(usize)]
pub enum SlotId {
    Slot0 = 0,
    Slot1 = 1,
}

impl SlotId {
    pub const COUNT: usize = 2;

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Slot0),
            1 => Some(Self::Slot1),
            _ => None,
        }
    }

    /// The other slot (failover target)
    #[inline]
    pub fn other(self) -> Self {
        match self {
            Self::Slot0 => Self::Slot1,
            Self::Slot1 => Self::Slot0,
        }
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot{}", self.index())
    }
}
