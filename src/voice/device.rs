//! Audio device selection

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{
    BufferSize, Device, Host, SampleRate, StreamConfig, SupportedBufferSize,
    SupportedStreamConfigRange,
};

use super::AudioFormat;
use crate::{Error, Result};

/// Which audio device to open
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceSelector {
    /// System default device
    #[default]
    Default,
    /// Device at this position in the host's device list
    Index(usize),
    /// First device whose name contains this string (case-insensitive)
    Name(String),
}

impl FromStr for DeviceSelector {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("default") {
            return Ok(Self::Default);
        }
        Ok(raw
            .parse::<usize>()
            .map_or_else(|_| Self::Name(raw.to_string()), Self::Index))
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Index(i) => write!(f, "#{i}"),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

impl DeviceSelector {
    /// Resolve an input device on `host`
    ///
    /// # Errors
    ///
    /// Returns error if no matching device exists
    pub fn resolve_input(&self, host: &Host) -> Result<Device> {
        match self {
            Self::Default => host
                .default_input_device()
                .ok_or_else(|| Error::Audio("no input device available".to_string())),
            _ => {
                let devices = host
                    .input_devices()
                    .map_err(|e| Error::Audio(e.to_string()))?;
                self.pick(devices)
                    .ok_or_else(|| Error::Audio(format!("input device {self} not found")))
            }
        }
    }

    /// Resolve an output device on `host`
    ///
    /// # Errors
    ///
    /// Returns error if no matching device exists
    pub fn resolve_output(&self, host: &Host) -> Result<Device> {
        match self {
            Self::Default => host
                .default_output_device()
                .ok_or_else(|| Error::Audio("no output device available".to_string())),
            _ => {
                let devices = host
                    .output_devices()
                    .map_err(|e| Error::Audio(e.to_string()))?;
                self.pick(devices)
                    .ok_or_else(|| Error::Audio(format!("output device {self} not found")))
            }
        }
    }

    fn pick(&self, mut devices: impl Iterator<Item = Device>) -> Option<Device> {
        match self {
            Self::Default => devices.next(),
            Self::Index(i) => devices.nth(*i),
            Self::Name(name) => {
                let needle = name.to_lowercase();
                devices.find(|d| {
                    d.name()
                        .is_ok_and(|n| n.to_lowercase().contains(&needle))
                })
            }
        }
    }
}

/// Input and output device names, in host order
#[derive(Debug, Clone, Default)]
pub struct DeviceListing {
    /// Capture devices
    pub inputs: Vec<String>,
    /// Playback devices
    pub outputs: Vec<String>,
}

/// Enumerate audio devices on the default host
///
/// # Errors
///
/// Returns error if the host cannot enumerate devices
pub fn list_devices() -> Result<DeviceListing> {
    let host = cpal::default_host();
    let name = |d: Device| d.name().unwrap_or_else(|_| "<unknown>".to_string());

    let inputs = host
        .input_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
        .map(name)
        .collect();
    let outputs = host
        .output_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
        .map(name)
        .collect();

    Ok(DeviceListing { inputs, outputs })
}

/// Pick a stream config for `format` from a device's supported ranges
///
/// Prefers the requested channel count, then the narrowest config with more
/// channels; configs with fewer channels than requested are never chosen.
/// Uses a fixed buffer of one chunk when the device allows it.
pub(super) fn select_config(
    ranges: &[SupportedStreamConfigRange],
    format: &AudioFormat,
) -> Option<StreamConfig> {
    let rate = SampleRate(format.sample_rate);
    let range = ranges
        .iter()
        .filter(|c| {
            c.channels() >= format.channels
                && c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
        })
        .min_by_key(|c| c.channels())?;

    let mut config = range.clone().with_sample_rate(rate).config();

    #[allow(clippy::cast_possible_truncation)]
    let frames = format.chunk_frames() as u32;
    if let SupportedBufferSize::Range { min, max } = range.buffer_size() {
        if (*min..=*max).contains(&frames) {
            config.buffer_size = BufferSize::Fixed(frames);
        }
    }

    Some(config)
}
