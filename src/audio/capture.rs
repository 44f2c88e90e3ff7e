//! Audio capture from the input device
//!
//! The cpal callback hands sample chunks to a bounded channel; `read_frame`
//! drains that channel until one whole frame is assembled. When the stream
//! thread stops, the channel sender is dropped and any blocked reader wakes
//! with [`AudioError::Closed`].

use cpal::traits::DeviceTrait;
use crossbeam_channel::{bounded, Receiver, TrySendError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::device::{
    build_error, negotiate_format, stream_config, AudioDevice, StreamThread,
};
use crate::audio::{f32_to_i16, AudioInput};
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Capture side of the cpal backend
pub struct CpalInput {
    chunks: Receiver<Vec<i16>>,
    /// Bytes received but not yet handed out
    pending: Mutex<VecDeque<u8>>,
    stream: StreamThread,
    released: AtomicBool,
    /// Chunks dropped because the reader fell behind
    overruns: Arc<AtomicU64>,
}

impl CpalInput {
    pub fn open(device: AudioDevice, config: &AudioConfig) -> Result<Self, AudioError> {
        let stream_config = stream_config(config);
        // One chunk per callback; callbacks are roughly one device period long
        let (chunk_tx, chunk_rx) = bounded::<Vec<i16>>(config.input_buffer_frames);
        let overruns = Arc::new(AtomicU64::new(0));
        let overruns_cb = overruns.clone();
        let name = device.name.clone();

        let format = negotiate_format(&device.supported_input_configs()?, config)?;

        let stream = StreamThread::spawn(format!("capture-{}", name), move || {
            let device = device.into_inner();
            let on_error = |err: cpal::StreamError| tracing::warn!("Input stream error: {}", err);
            let push = move |chunk: Vec<i16>| {
                if let Err(TrySendError::Full(_)) = chunk_tx.try_send(chunk) {
                    overruns_cb.fetch_add(1, Ordering::Relaxed);
                }
            };
            let built = match format {
                cpal::SampleFormat::F32 => device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        push(data.iter().copied().map(f32_to_i16).collect())
                    },
                    on_error,
                    None,
                ),
                _ => device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| push(data.to_vec()),
                    on_error,
                    None,
                ),
            };
            built.map_err(build_error)
        })?;

        tracing::info!(
            "Capture started on {} ({} Hz, {} ch, {:?})",
            name,
            config.sample_rate,
            config.channels,
            format
        );

        Ok(Self {
            chunks: chunk_rx,
            pending: Mutex::new(VecDeque::new()),
            stream,
            released: AtomicBool::new(false),
            overruns,
        })
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

impl AudioInput for CpalInput {
    fn read_frame(&self, frame: &mut [u8]) -> Result<usize, AudioError> {
        let mut pending = self.pending.lock();
        while pending.len() < frame.len() {
            match self.chunks.recv() {
                Ok(chunk) => pending.extend(chunk.iter().flat_map(|s| s.to_ne_bytes())),
                Err(_) => {
                    // Stream gone: hand back what is left, then report closed
                    if pending.is_empty() {
                        return Err(AudioError::Closed);
                    }
                    let n = pending.len();
                    for (dst, src) in frame.iter_mut().zip(pending.drain(..)) {
                        *dst = src;
                    }
                    return Ok(n);
                }
            }
        }
        let len = frame.len();
        for (dst, src) in frame.iter_mut().zip(pending.drain(..len)) {
            *dst = src;
        }
        Ok(len)
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.stream.stop();
        Ok(())
    }

    fn release(&self) -> Result<(), AudioError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stream.stop();
        self.stream.join()?;
        let dropped = self.overruns();
        if dropped > 0 {
            tracing::debug!("Input released after {} overruns", dropped);
        }
        Ok(())
    }
}
