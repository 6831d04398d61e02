//! Realtime speech-to-speech wire protocol
//!
//! Client messages are serialized from typed structs; server events are read
//! loosely from JSON since only a handful of fields matter and the service adds
//! new event types over time.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::Value;

/// PCM format tag used for both directions
const PCM_FORMAT: &str = "audio/pcm";

/// Messages sent to the realtime service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Configure the session after it is created
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session settings
        session: SessionConfig,
    },
    /// Append base64 PCM to the input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend {
        /// Base64-encoded PCM
        audio: String,
    },
    /// Close the current input turn
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,
    /// Ask for a spoken reply
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Reply options
        response: ResponseOptions,
    },
}

impl ClientMessage {
    /// Build a `session.update` message
    #[must_use]
    pub fn session_update(model: &str, voice: &str, sample_rate: u32, instructions: &str) -> Self {
        Self::SessionUpdate {
            session: SessionConfig {
                kind: "realtime".to_string(),
                model: model.to_string(),
                output_modalities: vec!["audio".to_string()],
                audio: SessionAudio {
                    input: AudioInput {
                        format: AudioFormatSpec {
                            kind: PCM_FORMAT.to_string(),
                            rate: Some(sample_rate),
                        },
                        turn_detection: TurnDetection {
                            kind: "semantic_vad".to_string(),
                        },
                    },
                    output: AudioOutput {
                        format: AudioFormatSpec {
                            kind: PCM_FORMAT.to_string(),
                            rate: None,
                        },
                        voice: voice.to_string(),
                    },
                },
                instructions: instructions.to_string(),
            },
        }
    }

    /// Build an `input_audio_buffer.append` message for raw PCM
    #[must_use]
    pub fn audio_append(pcm: &[u8]) -> Self {
        Self::InputAudioAppend {
            audio: STANDARD.encode(pcm),
        }
    }

    /// Build a `response.create` message requesting audio
    #[must_use]
    pub fn response_create() -> Self {
        Self::ResponseCreate {
            response: ResponseOptions {
                modalities: vec!["audio".to_string()],
            },
        }
    }

    /// Wire type tag
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::InputAudioAppend { .. } => "input_audio_buffer.append",
            Self::InputAudioCommit => "input_audio_buffer.commit",
            Self::ResponseCreate { .. } => "response.create",
        }
    }
}

/// `session` object of `session.update`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionConfig {
    #[serde(rename = "type")]
    kind: String,
    model: String,
    output_modalities: Vec<String>,
    audio: SessionAudio,
    instructions: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct SessionAudio {
    input: AudioInput,
    output: AudioOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct AudioInput {
    format: AudioFormatSpec,
    turn_detection: TurnDetection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct AudioOutput {
    format: AudioFormatSpec,
    voice: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct AudioFormatSpec {
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    rate: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct TurnDetection {
    #[serde(rename = "type")]
    kind: String,
}

/// `response` object of `response.create`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseOptions {
    modalities: Vec<String>,
}

/// Server event relevant to the session client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Session exists and awaits configuration
    SessionCreated,
    /// Server VAD heard the user start speaking
    SpeechStarted,
    /// Server VAD heard the user stop speaking
    SpeechStopped,
    /// Base64 audio for playback
    AudioDelta(String),
    /// Any other `response.*` event
    Response(String),
    /// Anything else
    Other(String),
}

/// Keys that may carry base64 audio
const AUDIO_KEYS: [&str; 2] = ["audio", "audio_base64"];

impl ServerEvent {
    /// Classify a decoded server message
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();

        match kind {
            "session.created" => return Self::SessionCreated,
            "input_audio_buffer.speech_started" => return Self::SpeechStarted,
            "input_audio_buffer.speech_stopped" => return Self::SpeechStopped,
            _ => {}
        }

        if let Some(audio) = extract_audio(kind, value) {
            return Self::AudioDelta(audio.to_string());
        }

        if kind.starts_with("response.") {
            Self::Response(kind.to_string())
        } else {
            Self::Other(kind.to_string())
        }
    }

    /// Parse and classify a text frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame is not JSON
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(&value))
    }
}

/// Find base64 audio in one of the delta shapes the service emits
fn extract_audio<'a>(kind: &str, value: &'a Value) -> Option<&'a str> {
    if matches!(kind, "response.audio.delta" | "response.output_audio.delta") {
        return value.get("delta").and_then(Value::as_str);
    }

    if let Some(delta) = value.get("delta").filter(|d| d.is_object()) {
        if let Some(audio) = AUDIO_KEYS
            .iter()
            .find_map(|key| delta.get(key).and_then(Value::as_str))
        {
            return Some(audio);
        }
    }

    AUDIO_KEYS
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
}

/// Decode a base64 audio delta into PCM bytes
///
/// # Errors
///
/// Returns error if the payload is not valid base64
pub fn decode_audio(b64: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(b64)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_session_update_shape() {
        let msg = ClientMessage::session_update("gpt-realtime", "marin", 24000, "be brief");
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "session.update",
                "session": {
                    "type": "realtime",
                    "model": "gpt-realtime",
                    "output_modalities": ["audio"],
                    "audio": {
                        "input": {
                            "format": {"type": "audio/pcm", "rate": 24000},
                            "turn_detection": {"type": "semantic_vad"}
                        },
                        "output": {
                            "format": {"type": "audio/pcm"},
                            "voice": "marin"
                        }
                    },
                    "instructions": "be brief"
                }
            })
        );
    }

    #[test]
    fn test_turn_messages() {
        assert_eq!(
            serde_json::to_value(ClientMessage::audio_append(&[1, 2, 3])).unwrap(),
            json!({"type": "input_audio_buffer.append", "audio": "AQID"})
        );
        assert_eq!(
            serde_json::to_value(ClientMessage::InputAudioCommit).unwrap(),
            json!({"type": "input_audio_buffer.commit"})
        );
        assert_eq!(
            serde_json::to_value(ClientMessage::response_create()).unwrap(),
            json!({"type": "response.create", "response": {"modalities": ["audio"]}})
        );
    }

    #[test]
    fn test_classify_lifecycle_events() {
        assert_eq!(
            ServerEvent::parse(r#"{"type":"session.created","session":{}}"#).unwrap(),
            ServerEvent::SessionCreated
        );
        assert_eq!(
            ServerEvent::from_value(&json!({"type": "input_audio_buffer.speech_started"})),
            ServerEvent::SpeechStarted
        );
        assert_eq!(
            ServerEvent::from_value(&json!({"type": "input_audio_buffer.speech_stopped"})),
            ServerEvent::SpeechStopped
        );
    }

    #[test]
    fn test_audio_delta_shapes() {
        let expected = ServerEvent::AudioDelta("AQID".to_string());

        assert_eq!(
            ServerEvent::from_value(&json!({"type": "response.audio.delta", "delta": "AQID"})),
            expected
        );
        assert_eq!(
            ServerEvent::from_value(&json!({"type": "response.output_audio.delta", "delta": "AQID"})),
            expected
        );
        assert_eq!(
            ServerEvent::from_value(&json!({"type": "custom.delta", "delta": {"audio_base64": "AQID"}})),
            expected
        );
        assert_eq!(
            ServerEvent::from_value(&json!({"type": "custom.chunk", "audio": "AQID"})),
            expected
        );
    }

    #[test]
    fn test_other_events() {
        assert_eq!(
            ServerEvent::from_value(&json!({"type": "response.done"})),
            ServerEvent::Response("response.done".to_string())
        );
        assert_eq!(
            ServerEvent::from_value(&json!({"type": "rate_limits.updated"})),
            ServerEvent::Other("rate_limits.updated".to_string())
        );
        assert_eq!(
            ServerEvent::from_value(&json!({"type": "response.text.delta", "delta": "hi"})),
            ServerEvent::Response("response.text.delta".to_string())
        );
        assert!(ServerEvent::parse("not json").is_err());
    }

    #[test]
    fn test_decode_audio() {
        assert_eq!(decode_audio("AQID").unwrap(), vec![1, 2, 3]);
        assert!(decode_audio("***").is_err());
    }
}
