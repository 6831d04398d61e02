//! Audio capture from microphone

use std::sync::Arc;

use cpal::Stream;
use cpal::traits::{DeviceTrait, StreamTrait};

use super::device::select_config;
use super::{AudioFormat, CaptureDevice, ChunkHandler, DeviceSelector, samples_to_pcm};
use crate::{Error, Result};

/// Captures fixed-size PCM chunks from an input device
pub struct MicCapture {
    format: AudioFormat,
    selector: DeviceSelector,
    stream: Option<Stream>,
}

impl MicCapture {
    /// Create a capture for the selected device; nothing is opened until start
    #[must_use]
    pub const fn new(format: AudioFormat, selector: DeviceSelector) -> Self {
        Self {
            format,
            selector,
            stream: None,
        }
    }
}

impl CaptureDevice for MicCapture {
    fn start(&mut self, mut handler: ChunkHandler) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = self.selector.resolve_input(&host)?;

        let ranges: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .collect();
        let config = select_config(&ranges, &self.format)
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let device_channels = usize::from(config.channels);
        let wanted_channels = usize::from(self.format.channels);
        let chunk_samples = self.format.chunk_samples();
        let mut pending: Vec<i16> = Vec::with_capacity(chunk_samples * 2);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = self.format.sample_rate,
            channels = config.channels,
            chunk_samples,
            "audio capture initialized"
        );

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if device_channels == wanted_channels {
                        pending.extend(data.iter().map(|&s| to_i16(s)));
                    } else {
                        // Downmix by keeping the first channels of each frame
                        for frame in data.chunks(device_channels) {
                            pending.extend(frame.iter().take(wanted_channels).map(|&s| to_i16(s)));
                        }
                    }

                    while pending.len() >= chunk_samples {
                        let pcm = samples_to_pcm(&pending[..chunk_samples]);
                        pending.drain(..chunk_samples);
                        handler(Arc::from(pcm));
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::info!(
            sample_rate = self.format.sample_rate,
            chunk_ms = self.format.chunk_ms,
            "audio capture started"
        );
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::info!("audio capture stopped");
        }
    }
}

/// Convert f32 [-1.0, 1.0] to i16
#[allow(clippy::cast_possible_truncation)]
pub(super) fn to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}
