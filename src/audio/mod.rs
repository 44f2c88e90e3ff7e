//! Audio subsystem module
//!
//! The session core only sees the device traits below: an input that
//! block-reads whole frames and an output that accepts frames without
//! blocking. [`device::CpalBackend`] provides both on top of cpal.

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use crate::config::AudioConfig;
use crate::error::AudioError;

pub use buffer::{SampleRing, SharedSampleRing};
pub use capture::CpalInput;
pub use device::{list_devices, AudioDeviceInfo, CpalBackend};
pub use playback::CpalOutput;

/// Microphone side of a session
pub trait AudioInput: Send + Sync {
    /// Block until `frame` is filled or the device stops.
    ///
    /// Returns the number of bytes written into `frame`; fewer than
    /// `frame.len()` means a short read. Once the device is stopped this
    /// returns [`AudioError::Closed`], which is how a blocked reader is
    /// released during teardown.
    fn read_frame(&self, frame: &mut [u8]) -> Result<usize, AudioError>;

    fn stop(&self) -> Result<(), AudioError>;

    fn release(&self) -> Result<(), AudioError>;
}

/// Speaker side of a session
pub trait AudioOutput: Send + Sync {
    /// Queue a frame without blocking; returns the bytes accepted.
    /// Whatever does not fit in the device buffer is dropped.
    fn write_frame(&self, frame: &[u8]) -> usize;

    fn stop(&self) -> Result<(), AudioError>;

    fn release(&self) -> Result<(), AudioError>;
}

/// Opens the device pair for a session
pub trait AudioBackend: Send + Sync {
    fn open_input(&self, config: &AudioConfig) -> Result<Arc<dyn AudioInput>, AudioError>;

    fn open_output(&self, config: &AudioConfig) -> Result<Arc<dyn AudioOutput>, AudioError>;
}

/// Native-endian 16-bit PCM bytes to samples; a trailing odd byte is ignored
pub fn bytes_to_samples(bytes: &[u8]) -> impl Iterator<Item = i16> + '_ {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]))
}

/// Float sample in [-1.0, 1.0] to 16-bit PCM, clipping out-of-range input
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// 16-bit PCM to a float sample in [-1.0, 1.0]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}
