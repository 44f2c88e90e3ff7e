//! Audio device enumeration and the cpal-backed device pair

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::{AudioBackend, AudioInput, AudioOutput, CpalInput, CpalOutput};
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Device description for listings
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
        }
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Get supported input configurations
    pub fn supported_input_configs(
        &self,
    ) -> Result<Vec<cpal::SupportedStreamConfigRange>, AudioError> {
        self.inner
            .supported_input_configs()
            .map(|iter| iter.collect())
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))
    }

    /// Get supported output configurations
    pub fn supported_output_configs(
        &self,
    ) -> Result<Vec<cpal::SupportedStreamConfigRange>, AudioError> {
        self.inner
            .supported_output_configs()
            .map(|iter| iter.collect())
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device, true);
                devices.push(AudioDeviceInfo {
                    id: format!("input:{}", name),
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                    continue;
                }
                let (sample_rates, channels) = get_device_capabilities(&device, false);
                devices.push(AudioDeviceInfo {
                    id: format!("output:{}", name),
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

fn get_device_capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    for config in configs {
        for rate_val in [8000u32, 16000, 22050, 32000, 44100, 48000] {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate_val)
            {
                sample_rates.push(rate_val);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Get a device by the id printed in [`list_devices`]
pub fn get_device_by_id(id: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    let (is_input, name) = if let Some(name) = id.strip_prefix("input:") {
        (true, name)
    } else if let Some(name) = id.strip_prefix("output:") {
        (false, name)
    } else {
        return Err(AudioError::DeviceNotFound(id.to_string()));
    };

    let devices = if is_input {
        host.input_devices()
    } else {
        host.output_devices()
    }
    .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    devices
        .filter(|device| device.name().map(|n| n == name).unwrap_or(false))
        .map(AudioDevice::from_cpal)
        .next()
        .ok_or_else(|| AudioError::DeviceNotFound(id.to_string()))
}

pub fn get_default_input_device() -> Result<AudioDevice, AudioError> {
    cpal::default_host()
        .default_input_device()
        .map(AudioDevice::from_cpal)
        .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))
}

pub fn get_default_output_device() -> Result<AudioDevice, AudioError> {
    cpal::default_host()
        .default_output_device()
        .map(AudioDevice::from_cpal)
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}

/// cpal stream configuration for the session format
pub(crate) fn stream_config(config: &AudioConfig) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Sample format to open the device with for the session format.
///
/// Prefers native `i16`; falls back to `f32` with conversion at the callback.
/// The device must support the session rate and channel count as-is, since
/// frames are never resampled.
pub(crate) fn negotiate_format(
    supported: &[cpal::SupportedStreamConfigRange],
    config: &AudioConfig,
) -> Result<cpal::SampleFormat, AudioError> {
    let rate = cpal::SampleRate(config.sample_rate);
    let matching: Vec<cpal::SampleFormat> = supported
        .iter()
        .filter(|range| {
            range.channels() == config.channels
                && range.min_sample_rate() <= rate
                && rate <= range.max_sample_rate()
        })
        .map(|range| range.sample_format())
        .collect();

    [cpal::SampleFormat::I16, cpal::SampleFormat::F32]
        .into_iter()
        .find(|format| matching.contains(format))
        .ok_or_else(|| {
            AudioError::UnsupportedFormat(format!(
                "device offers no i16 or f32 stream at {} Hz with {} channel(s)",
                config.sample_rate, config.channels
            ))
        })
}

/// Map a stream build failure, keeping format rejections distinguishable
pub(crate) fn build_error(err: cpal::BuildStreamError) -> AudioError {
    match err {
        cpal::BuildStreamError::StreamConfigNotSupported => {
            AudioError::UnsupportedFormat("stream configuration rejected by device".into())
        }
        other => AudioError::CpalError(other.to_string()),
    }
}

/// Dedicated thread that owns a playing cpal stream.
///
/// cpal streams are not `Send` on every host, so the stream is built, played
/// and dropped on its own thread; the handle only carries a stop signal.
pub(crate) struct StreamThread {
    stop_tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StreamThread {
    pub(crate) fn spawn<F>(name: String, build: F) -> Result<Self, AudioError>
    where
        F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Returns once the stop sender is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop_tx: Mutex::new(Some(stop_tx)),
                handle: Mutex::new(Some(handle)),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::StreamError("stream thread exited during startup".into()))
            }
        }
    }

    /// Signal the thread to drop its stream
    pub(crate) fn stop(&self) {
        self.stop_tx.lock().take();
    }

    /// Wait for the stream to be dropped
    pub(crate) fn join(&self) -> Result<(), AudioError> {
        if let Some(handle) = self.handle.lock().take() {
            handle
                .join()
                .map_err(|_| AudioError::StreamError("stream thread panicked".into()))?;
        }
        Ok(())
    }
}

/// Device pair backed by the default cpal host
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    /// Input device id, or the host default
    pub input_device: Option<String>,
    /// Output device id, or the host default
    pub output_device: Option<String>,
}

impl AudioBackend for CpalBackend {
    fn open_input(&self, config: &AudioConfig) -> Result<Arc<dyn AudioInput>, AudioError> {
        let device = match &self.input_device {
            Some(id) => get_device_by_id(id)?,
            None => get_default_input_device()?,
        };
        tracing::debug!("Opening input device {}", device.name);
        Ok(Arc::new(CpalInput::open(device, config)?))
    }

    fn open_output(&self, config: &AudioConfig) -> Result<Arc<dyn AudioOutput>, AudioError> {
        let device = match &self.output_device {
            Some(id) => get_device_by_id(id)?,
            None => get_default_output_device()?,
        };
        tracing::debug!("Opening output device {}", device.name);
        Ok(Arc::new(CpalOutput::open(device, config)?))
    }
}
