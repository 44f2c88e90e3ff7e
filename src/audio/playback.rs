//! Audio playback to the output device

use cpal::traits::DeviceTrait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::buffer::{SampleRing, SharedSampleRing};
use crate::audio::device::{
    build_error, negotiate_format, stream_config, AudioDevice, StreamThread,
};
use crate::audio::{bytes_to_samples, i16_to_f32, AudioOutput};
use crate::config::AudioConfig;
use crate::constants::BYTES_PER_SAMPLE;
use crate::error::AudioError;

/// Playback side of the cpal backend.
///
/// Frames go into a fixed-size [`SampleRing`] that the cpal callback drains;
/// writes never wait for room.
pub struct CpalOutput {
    ring: SharedSampleRing,
    stream: StreamThread,
    released: AtomicBool,
}

impl CpalOutput {
    pub fn open(device: AudioDevice, config: &AudioConfig) -> Result<Self, AudioError> {
        let capacity = config.frame_bytes() * config.output_buffer_frames / BYTES_PER_SAMPLE;
        let ring = Arc::new(SampleRing::new(capacity));
        let ring_cb = ring.clone();
        let stream_config = stream_config(config);
        let name = device.name.clone();

        let format = negotiate_format(&device.supported_output_configs()?, config)?;

        let stream = StreamThread::spawn(format!("playback-{}", name), move || {
            let device = device.into_inner();
            let on_error = |err: cpal::StreamError| tracing::warn!("Output stream error: {}", err);
            let built = match format {
                cpal::SampleFormat::F32 => {
                    let mut scratch: Vec<i16> = Vec::new();
                    device.build_output_stream(
                        &stream_config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            scratch.resize(data.len(), 0);
                            ring_cb.pop_into(&mut scratch);
                            for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                                *dst = i16_to_f32(src);
                            }
                        },
                        on_error,
                        None,
                    )
                }
                _ => device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        ring_cb.pop_into(data);
                    },
                    on_error,
                    None,
                ),
            };
            built.map_err(build_error)
        })?;

        tracing::info!(
            "Playback started on {} ({:?}, {} samples buffered max)",
            name,
            format,
            ring.capacity()
        );

        Ok(Self {
            ring,
            stream,
            released: AtomicBool::new(false),
        })
    }

    pub fn ring(&self) -> &SharedSampleRing {
        &self.ring
    }
}

impl AudioOutput for CpalOutput {
    fn write_frame(&self, frame: &[u8]) -> usize {
        self.ring.push_samples(bytes_to_samples(frame)) * BYTES_PER_SAMPLE
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.stream.stop();
        self.ring.clear();
        Ok(())
    }

    fn release(&self) -> Result<(), AudioError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stream.stop();
        self.stream.join()?;
        tracing::debug!(
            "Output released ({} samples dropped, {} underruns)",
            self.ring.overflow_count(),
            self.ring.underrun_count()
        );
        Ok(())
    }
}
