//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon-call/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallConfigFile {
    /// Base log level (e.g. "info")
    pub log_level: Option<String>,

    /// Realtime service settings
    #[serde(default)]
    pub realtime: RealtimeFileConfig,

    /// Wake/exit phrase settings
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Audio device settings
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// Realtime service configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RealtimeFileConfig {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
}

/// Wake/exit phrase configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WakeFileConfig {
    pub wake_phrase: Option<String>,
    pub exit_phrase: Option<String>,

    /// Path to the speech model directory
    pub model_path: Option<String>,

    /// Quiet period after a trigger
    pub cooldown_ms: Option<u64>,

    /// Matching final transcripts required to trigger
    pub consecutive_finals: Option<u32>,
}

/// Audio device configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudioFileConfig {
    /// Input device: "default", an index, or part of a name
    pub mic_device: Option<String>,

    /// Output device: "default", an index, or part of a name
    pub speaker_device: Option<String>,

    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub chunk_ms: Option<u32>,
}

/// Load the TOML config file from the standard path
///
/// Returns `CallConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> CallConfigFile {
    let Some(path) = config_file_path() else {
        return CallConfigFile::default();
    };

    if !path.exists() {
        return CallConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            CallConfigFile::default()
        }
    }
}

/// Load a config file the user named explicitly
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn read_config_file(path: &Path) -> Result<CallConfigFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/omni/beacon-call/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon-call")
            .join("config.toml")
    })
}
