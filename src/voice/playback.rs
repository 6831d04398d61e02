//! Audio playback to speakers

use std::sync::Arc;

use cpal::Stream;
use cpal::traits::{DeviceTrait, StreamTrait};

use super::device::select_config;
use super::{AudioFormat, BYTES_PER_SAMPLE, DeviceSelector, PlaybackBuffer, PlaybackDevice};
use crate::{Error, Result};

/// Plays a [`PlaybackBuffer`] on an output device
///
/// The output callback pulls exactly the requested number of frames; gaps in
/// the buffer are played as silence.
pub struct SpeakerOutput {
    format: AudioFormat,
    selector: DeviceSelector,
    stream: Option<Stream>,
    source: Option<Arc<PlaybackBuffer>>,
}

impl SpeakerOutput {
    /// Create an output for the selected device; nothing is opened until start
    #[must_use]
    pub const fn new(format: AudioFormat, selector: DeviceSelector) -> Self {
        Self {
            format,
            selector,
            stream: None,
            source: None,
        }
    }
}

impl PlaybackDevice for SpeakerOutput {
    fn start(&mut self, source: Arc<PlaybackBuffer>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = self.selector.resolve_output(&host)?;

        let ranges: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .collect();
        let config = select_config(&ranges, &self.format)
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let device_channels = usize::from(config.channels);
        let source_channels = usize::from(self.format.channels).max(1);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = self.format.sample_rate,
            channels = config.channels,
            "audio playback initialized"
        );

        let buffer = Arc::clone(&source);
        let mut scratch: Vec<u8> = Vec::new();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / device_channels.max(1);
                    scratch.resize(frames * source_channels * BYTES_PER_SAMPLE, 0);
                    buffer.fill_frame(&mut scratch);

                    for (f, frame) in data.chunks_mut(device_channels).enumerate() {
                        for (i, out) in frame.iter_mut().enumerate() {
                            // Repeat the last source channel when upmixing
                            let idx = (f * source_channels + i.min(source_channels - 1)) * BYTES_PER_SAMPLE;
                            *out = scratch
                                .get(idx..idx + BYTES_PER_SAMPLE)
                                .map_or(0.0, |b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0);
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);
        self.source = Some(source);

        tracing::info!(sample_rate = self.format.sample_rate, "audio playback started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::info!("audio playback stopped");
        }
        if let Some(source) = self.source.take() {
            source.clear();
        }
    }
}
