//! Configuration management for the voice call daemon

pub mod file;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::voice::{AudioFormat, ConfirmationPolicy, DeviceSelector};
use crate::{Error, Result};

use file::CallConfigFile;

/// Default realtime websocket endpoint
pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default realtime model
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-realtime";

/// Default assistant voice
pub const DEFAULT_REALTIME_VOICE: &str = "marin";

/// Default assistant instructions
pub const DEFAULT_INSTRUCTIONS: &str = "你是一个简洁的中文语音助手。回答尽量口语化、短句。";

/// Default speech model directory for wake phrase detection
pub const DEFAULT_MODEL_PATH: &str = "assets/vosk-model-cn";

/// Voice call daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Realtime service settings
    pub realtime: RealtimeConfig,

    /// Wake/exit phrase settings
    pub wake: WakeConfig,

    /// Audio device settings
    pub audio: AudioConfig,

    /// Base log level, overridden by `RUST_LOG`
    pub log_level: String,
}

/// Realtime service configuration
#[derive(Clone)]
pub struct RealtimeConfig {
    /// Websocket endpoint; the model is appended as a query parameter
    pub url: String,

    /// Bearer token (from `OPENAI_API_KEY`)
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// Output voice identifier
    pub voice: String,

    /// System instructions for the assistant
    pub instructions: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REALTIME_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            voice: DEFAULT_REALTIME_VOICE.to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }
}

impl fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("url", &self.url)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "[redacted]" })
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("instructions", &self.instructions)
            .finish()
    }
}

/// Wake/exit phrase configuration
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Phrase that starts a call
    pub wake_phrase: String,

    /// Phrase that ends a call
    pub exit_phrase: String,

    /// Speech model directory
    pub model_path: PathBuf,

    /// Quiet period after a trigger
    pub cooldown: Duration,

    /// Matching final transcripts required to trigger
    pub consecutive_finals: u32,
}

impl Default for WakeConfig {
    fn default() -> Self {
        let policy = ConfirmationPolicy::default();
        Self {
            wake_phrase: policy.wake_phrase,
            exit_phrase: policy.exit_phrase,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            cooldown: policy.cooldown,
            consecutive_finals: policy.consecutive_finals,
        }
    }
}

impl WakeConfig {
    /// Confirmation policy for the wake engine
    #[must_use]
    pub fn policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            wake_phrase: self.wake_phrase.clone(),
            exit_phrase: self.exit_phrase.clone(),
            cooldown: self.cooldown,
            consecutive_finals: self.consecutive_finals,
        }
    }
}

/// Audio device configuration
#[derive(Debug, Clone, Default)]
pub struct AudioConfig {
    /// Input device
    pub mic_device: DeviceSelector,

    /// Output device
    pub speaker_device: DeviceSelector,

    /// PCM stream format for capture, playback and the realtime session
    pub format: AudioFormat,
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// With `path` the file must exist and parse; otherwise the standard
    /// config path is used if present.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unusable or a setting is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = match path {
            Some(path) => file::read_config_file(path)?,
            None => file::load_config_file(),
        };

        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with an environment lookup
    ///
    /// Blank environment values fall through to the file, then the default.
    ///
    /// # Errors
    ///
    /// Returns error if a setting fails to parse or is out of range
    pub fn from_sources(fc: CallConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let default_realtime = RealtimeConfig::default();
        let realtime = RealtimeConfig {
            url: env("REALTIME_URL")
                .or(fc.realtime.url)
                .unwrap_or(default_realtime.url),
            api_key: env("OPENAI_API_KEY")
                .or(fc.realtime.api_key)
                .unwrap_or_default(),
            model: env("REALTIME_MODEL")
                .or(fc.realtime.model)
                .unwrap_or(default_realtime.model),
            voice: env("REALTIME_VOICE")
                .or(fc.realtime.voice)
                .unwrap_or(default_realtime.voice),
            instructions: env("ASSISTANT_INSTRUCTIONS")
                .or(fc.realtime.instructions)
                .unwrap_or(default_realtime.instructions),
        };

        let default_wake = WakeConfig::default();
        let wake = WakeConfig {
            wake_phrase: env("WAKE_PHRASE")
                .or(fc.wake.wake_phrase)
                .unwrap_or(default_wake.wake_phrase),
            exit_phrase: env("EXIT_PHRASE")
                .or(fc.wake.exit_phrase)
                .unwrap_or(default_wake.exit_phrase),
            model_path: env("VOSK_MODEL_PATH")
                .or(fc.wake.model_path)
                .map_or(default_wake.model_path, PathBuf::from),
            cooldown: parse_env::<u64>(env("WAKE_COOLDOWN_MS"), "WAKE_COOLDOWN_MS")?
                .or(fc.wake.cooldown_ms)
                .map_or(default_wake.cooldown, Duration::from_millis),
            consecutive_finals: parse_env(
                env("WAKE_CONSECUTIVE_FINALS"),
                "WAKE_CONSECUTIVE_FINALS",
            )?
            .or(fc.wake.consecutive_finals)
            .unwrap_or(default_wake.consecutive_finals)
            .max(1),
        };

        let default_format = AudioFormat::default();
        let selector = |raw: Option<String>| {
            raw.map(|s| s.parse::<DeviceSelector>().unwrap_or_default())
                .unwrap_or_default()
        };
        let audio = AudioConfig {
            mic_device: selector(env("MIC_DEVICE_INDEX").or(fc.audio.mic_device)),
            speaker_device: selector(env("SPK_DEVICE_INDEX").or(fc.audio.speaker_device)),
            format: AudioFormat {
                sample_rate: parse_env(env("SAMPLE_RATE"), "SAMPLE_RATE")?
                    .or(fc.audio.sample_rate)
                    .unwrap_or(default_format.sample_rate),
                channels: parse_env(env("CHANNELS"), "CHANNELS")?
                    .or(fc.audio.channels)
                    .unwrap_or(default_format.channels),
                chunk_ms: parse_env(env("CHUNK_MS"), "CHUNK_MS")?
                    .or(fc.audio.chunk_ms)
                    .unwrap_or(default_format.chunk_ms),
            },
        };

        let log_level = env("LOG_LEVEL")
            .or(fc.log_level)
            .unwrap_or_else(|| "info".to_string());

        let config = Self {
            realtime,
            wake,
            audio,
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let format = &self.audio.format;
        if format.sample_rate == 0 {
            return Err(Error::Config("sample rate must be positive".to_string()));
        }
        if format.channels == 0 {
            return Err(Error::Config("channel count must be positive".to_string()));
        }
        if format.chunk_frames() == 0 {
            return Err(Error::Config(format!(
                "chunk of {} ms at {} Hz holds no samples",
                format.chunk_ms, format.sample_rate
            )));
        }
        if self.wake.wake_phrase.trim().is_empty() || self.wake.exit_phrase.trim().is_empty() {
            return Err(Error::Config("wake and exit phrases must not be empty".to_string()));
        }
        Ok(())
    }

    /// Check that a realtime API key is configured
    ///
    /// # Errors
    ///
    /// Returns error if `OPENAI_API_KEY` is unset in both env and file
    pub fn require_api_key(&self) -> Result<&str> {
        if self.realtime.api_key.is_empty() {
            return Err(Error::Config(
                "OPENAI_API_KEY is not set (env or realtime.api_key)".to_string(),
            ));
        }
        Ok(&self.realtime.api_key)
    }
}

fn parse_env<T: FromStr>(raw: Option<String>, key: &str) -> Result<Option<T>>
where
    T::Err: fmt::Display,
{
    raw.map(|s| {
        s.parse::<T>()
            .map_err(|e| Error::Config(format!("invalid {key} '{s}': {e}")))
    })
    .transpose()
}
