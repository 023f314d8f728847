//! The reference `cpal`-backed `AudioBackend` implementation (§4.7.1).
//!
//! Deliberately thin: negotiates an F32 output stream, then forwards every
//! hardware callback straight into whatever closure the caller supplied
//! (in practice, `AudioEngine::process_graph`). Device-selection policy
//! beyond the host fallback chain and a default-device pick is left to the
//! caller, matching the teacher's stream-construction split between
//! `device.rs` (enumeration) and `stream.rs` (the live stream itself).

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat as CpalSampleFormat, Stream, StreamConfig};

use crate::device::get_default_output_device;
use crate::error::{AudioError, AudioResult};

/// Negotiated stream parameters handed to a starting callback.
#[derive(Debug, Clone, Copy)]
pub struct CallbackInfo {
    pub channels: u16,
    pub sample_rate: u32,
}

/// The interface the core's audio engine consumes to drive a real device,
/// without pulling device-selection policy into the specified core (§4.7.1).
pub trait AudioBackend: Send {
    fn start(&mut self, callback: Box<dyn FnMut(&mut [f32], CallbackInfo) + Send>) -> AudioResult<()>;
    fn stop(&mut self) -> AudioResult<()>;
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
}

/// A thin `cpal` output-only backend: negotiates F32, fixed buffer size,
/// default device.
pub struct CpalBackend {
    sample_rate: u32,
    channels: u16,
    buffer_frames: u32,
    stream: Option<Stream>,
}

// cpal's `Stream` is deliberately `!Send` on every platform (see
// `NotSendSyncAcrossAllPlatforms` in cpal::platform) even though the
// underlying platform streams are safe to move between threads. The
// `AudioBackend` trait requires `Send` so engine ownership can be handed to
// a dedicated audio thread; `stream` is only ever touched through `&mut
// self`, so moving the whole `CpalBackend` (stream included) is sound.
unsafe impl Send for CpalBackend {}

impl CpalBackend {
    /// Builds a backend against the default output device, preferring
    /// `preferred_sample_rate` but falling back to whatever the device's
    /// default config reports if that rate isn't supported as F32.
    pub fn new(preferred_sample_rate: u32, buffer_frames: u32) -> AudioResult<Self> {
        let device = get_default_output_device()?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .find(|c| {
                c.sample_format() == CpalSampleFormat::F32
                    && c.min_sample_rate().0 <= preferred_sample_rate
                    && c.max_sample_rate().0 >= preferred_sample_rate
            })
            .map(|c| c.with_sample_rate(cpal::SampleRate(preferred_sample_rate)))
            .or_else(|| {
                device
                    .default_output_config()
                    .ok()
                    .filter(|c| c.sample_format() == CpalSampleFormat::F32)
            })
            .ok_or_else(|| AudioError::ConfigError("no F32 output config available".to_string()))?;

        Ok(Self {
            sample_rate: supported.sample_rate().0,
            channels: supported.channels(),
            buffer_frames,
            stream: None,
        })
    }
}

impl AudioBackend for CpalBackend {
    fn start(&mut self, mut callback: Box<dyn FnMut(&mut [f32], CallbackInfo) + Send>) -> AudioResult<()> {
        let device = get_default_output_device()?;
        let channels = self.channels;
        let sample_rate = self.sample_rate;

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: CpalBufferSize::Fixed(self.buffer_frames),
        };

        let info = CallbackInfo { channels, sample_rate };
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    data.fill(0.0);
                    callback(data, info);
                },
                move |err| log::error!("output stream error: {err}"),
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        stream.play().map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) -> AudioResult<()> {
        if let Some(stream) = self.stream.take() {
            stream.pause().map_err(|e| AudioError::StreamError(e.to_string()))?;
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}
