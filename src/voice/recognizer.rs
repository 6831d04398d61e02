//! Speech recognizer seam for wake/exit phrase detection
//!
//! The wake engine feeds raw PCM into a [`Recognizer`] and acts only on final
//! transcripts. Backends are created lazily through a [`RecognizerLoader`] so a
//! missing model disables phrase detection instead of aborting startup.

use crate::{Error, Result};

/// Output of one recognition step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcript {
    /// Hypothesis for the utterance in progress
    Partial(String),
    /// Completed utterance
    Final(String),
}

/// Streaming speech recognizer
pub trait Recognizer: Send {
    /// Feed one chunk of 16-bit little-endian PCM
    ///
    /// Returns `None` when the recognizer has nothing new to report.
    ///
    /// # Errors
    ///
    /// Returns error if the chunk cannot be decoded
    fn accept(&mut self, pcm: &[u8]) -> Result<Option<Transcript>>;
}

/// Creates a recognizer when the wake engine starts
pub trait RecognizerLoader: Send {
    /// Load the model and build a recognizer
    ///
    /// # Errors
    ///
    /// Returns error if the backend or its model is unavailable
    fn load(&self) -> Result<Box<dyn Recognizer>>;
}

/// Loader used when no recognition backend is compiled in
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableRecognizer;

impl RecognizerLoader for UnavailableRecognizer {
    fn load(&self) -> Result<Box<dyn Recognizer>> {
        Err(Error::Recognizer(
            "no speech recognition backend compiled in (enable the `vosk` feature)".to_string(),
        ))
    }
}

#[cfg(feature = "vosk")]
pub use self::vosk_backend::VoskLoader;

#[cfg(feature = "vosk")]
mod vosk_backend {
    use std::path::PathBuf;

    use vosk::{DecodingState, Model};

    use super::{Recognizer, RecognizerLoader, Transcript};
    use crate::voice::pcm_to_samples;
    use crate::{Error, Result};

    /// Loads a Vosk model from disk
    #[derive(Debug, Clone)]
    pub struct VoskLoader {
        model_path: PathBuf,
        sample_rate: u32,
    }

    impl VoskLoader {
        /// Create a loader for the model directory at `model_path`
        #[must_use]
        pub fn new(model_path: impl Into<PathBuf>, sample_rate: u32) -> Self {
            Self {
                model_path: model_path.into(),
                sample_rate,
            }
        }
    }

    impl RecognizerLoader for VoskLoader {
        fn load(&self) -> Result<Box<dyn Recognizer>> {
            if !self.model_path.exists() {
                return Err(Error::Recognizer(format!(
                    "vosk model not found at {}",
                    self.model_path.display()
                )));
            }

            vosk::set_log_level(vosk::LogLevel::Error);

            let path = self.model_path.to_string_lossy().into_owned();
            let model = Model::new(path)
                .ok_or_else(|| Error::Recognizer("failed to load vosk model".to_string()))?;

            #[allow(clippy::cast_precision_loss)]
            let mut recognizer = vosk::Recognizer::new(&model, self.sample_rate as f32)
                .ok_or_else(|| Error::Recognizer("failed to create vosk recognizer".to_string()))?;
            recognizer.set_words(false);

            tracing::info!(path = %self.model_path.display(), "vosk model loaded");

            Ok(Box::new(VoskRecognizer {
                _model: model,
                recognizer,
            }))
        }
    }

    struct VoskRecognizer {
        _model: Model,
        recognizer: vosk::Recognizer,
    }

    impl Recognizer for VoskRecognizer {
        fn accept(&mut self, pcm: &[u8]) -> Result<Option<Transcript>> {
            let samples = pcm_to_samples(pcm);
            let state = self
                .recognizer
                .accept_waveform(&samples)
                .map_err(|e| Error::Recognizer(e.to_string()))?;

            match state {
                DecodingState::Finalized => {
                    let text = self
                        .recognizer
                        .result()
                        .single()
                        .map(|r| r.text.to_string())
                        .unwrap_or_default();
                    Ok(Some(Transcript::Final(text)))
                }
                DecodingState::Running => {
                    let partial = self.recognizer.partial_result().partial.to_string();
                    Ok((!partial.is_empty()).then_some(Transcript::Partial(partial)))
                }
                DecodingState::Failed => Err(Error::Recognizer("vosk decoding failed".to_string())),
            }
        }
    }
}
