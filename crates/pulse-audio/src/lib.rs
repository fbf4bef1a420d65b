//! pulse-audio: Sound-device output via cpal
//!
//! Provides output-device selection and a pull-style mono output stream.
//! The render bus is one channel; the stream duplicates it across however
//! many channels the device opens with.

mod device;
mod error;
mod stream;

pub use device::*;
pub use error::*;
pub use stream::*;
