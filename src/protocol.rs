//! Live session wire messages.
//!
//! Only the fields this client sends or reads are modelled; everything else
//! in server frames is ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::EncodedFrame;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text.to_string()),
                inline_data: None,
            }],
        }
    }
}

// ======================== Client → server ========================

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    voice_config: VoiceConfig,
}

impl SpeechConfig {
    pub fn prebuilt(voice_name: &str) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice_name.to_string(),
                },
            },
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

/// Empty object used to switch on transcription.
#[derive(Serialize, Debug, Clone, Default)]
pub struct TranscriptionConfig {}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionConfig>,
}

/// First message on a new session.
#[derive(Serialize, Debug, Clone)]
pub struct SetupMessage {
    pub setup: Setup,
}

impl SetupMessage {
    pub fn audio(model: &str, voice: &str, system_instruction: &str) -> Self {
        let system_instruction = if system_instruction.is_empty() {
            None
        } else {
            Some(Content::text(None, system_instruction))
        };
        Self {
            setup: Setup {
                model: model.to_string(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: Some(SpeechConfig::prebuilt(voice)),
                },
                system_instruction,
                input_audio_transcription: Some(TranscriptionConfig::default()),
                output_audio_transcription: Some(TranscriptionConfig::default()),
            },
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

/// One captured audio frame.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

impl From<EncodedFrame> for RealtimeInputMessage {
    fn from(frame: EncodedFrame) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![Blob {
                    mime_type: frame.mime_type,
                    data: frame.data,
                }],
            },
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

/// A typed user turn.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClientContentMessage {
    pub client_content: ClientContent,
}

impl ClientContentMessage {
    pub fn user_text(text: &str) -> Self {
        Self {
            client_content: ClientContent {
                turns: vec![Content::text(Some("user"), text)],
                turn_complete: true,
            },
        }
    }
}

// ======================== Server → client ========================

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

/// Who produced a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Model,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Model => "model",
        }
    }
}

/// What a server frame means to the client, in the order it should be
/// handled.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    Audio(Blob),
    Interrupted,
    Transcript { speaker: Speaker, text: String },
    TurnComplete,
    GoAway(Option<String>),
}

impl ServerMessage {
    /// Audio parts come first so that an interruption carried in the same
    /// frame silences them too.
    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(ServerEvent::SetupComplete);
        }

        if let Some(content) = self.server_content {
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(blob) = part.inline_data {
                        if blob.mime_type.starts_with("audio/") {
                            events.push(ServerEvent::Audio(blob));
                        }
                    }
                }
            }
            if content.interrupted {
                events.push(ServerEvent::Interrupted);
            }
            let transcripts = [
                (Speaker::User, content.input_transcription),
                (Speaker::Model, content.output_transcription),
            ];
            for (speaker, transcription) in transcripts {
                if let Some(text) = transcription.and_then(|t| t.text) {
                    if !text.is_empty() {
                        events.push(ServerEvent::Transcript { speaker, text });
                    }
                }
            }
            if content.turn_complete {
                events.push(ServerEvent::TurnComplete);
            }
        }

        if let Some(go_away) = self.go_away {
            events.push(ServerEvent::GoAway(go_away.time_left));
        }

        events
    }
}

/// Parse a server frame. Frames that are not JSON yield `None`.
pub fn parse_server_frame(raw: &[u8]) -> Option<Vec<ServerEvent>> {
    serde_json::from_slice::<ServerMessage>(raw)
        .ok()
        .map(ServerMessage::into_events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm;
    use serde_json::json;

    #[test]
    fn setup_uses_camel_case_fields() {
        let msg = SetupMessage::audio("models/live", "Kore", "You are a musical AI tutor.");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["setup"]["model"], "models/live");
        assert_eq!(
            value["setup"]["generationConfig"]["responseModalities"],
            json!(["AUDIO"])
        );
        assert_eq!(
            value["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(
            value["setup"]["systemInstruction"]["parts"][0]["text"],
            "You are a musical AI tutor."
        );
        assert_eq!(value["setup"]["outputAudioTranscription"], json!({}));
    }

    #[test]
    fn empty_system_instruction_is_omitted() {
        let value = serde_json::to_value(SetupMessage::audio("m", "Kore", "")).unwrap();
        assert!(value["setup"].get("systemInstruction").is_none());
    }

    #[test]
    fn captured_frame_becomes_media_chunk() {
        let frame = pcm::encode_frame(&[0.5, -0.5], 16000);
        let data = frame.data.clone();
        let value = serde_json::to_value(RealtimeInputMessage::from(frame)).unwrap();
        assert_eq!(
            value,
            json!({"realtimeInput": {"mediaChunks": [
                {"mimeType": "audio/pcm;rate=16000", "data": data}
            ]}})
        );
    }

    #[test]
    fn typed_text_is_a_complete_user_turn() {
        let value = serde_json::to_value(ClientContentMessage::user_text("What is a fugue?")).unwrap();
        assert_eq!(
            value,
            json!({"clientContent": {
                "turns": [{"role": "user", "parts": [{"text": "What is a fugue?"}]}],
                "turnComplete": true
            }})
        );
    }

    #[test]
    fn audio_parts_precede_interruption() {
        let frame = json!({
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}},
                    {"text": "thinking"},
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQA="}}
                ]},
                "interrupted": true,
                "outputTranscription": {"text": "a minor"},
                "turnComplete": true
            }
        });
        let events = parse_server_frame(frame.to_string().as_bytes()).unwrap();
        assert_eq!(
            events,
            vec![
                ServerEvent::Audio(Blob {
                    mime_type: "audio/pcm;rate=24000".into(),
                    data: "AAA=".into()
                }),
                ServerEvent::Audio(Blob {
                    mime_type: "audio/pcm;rate=24000".into(),
                    data: "AQA=".into()
                }),
                ServerEvent::Interrupted,
                ServerEvent::Transcript {
                    speaker: Speaker::Model,
                    text: "a minor".into()
                },
                ServerEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn setup_complete_and_go_away_are_recognised() {
        let events = parse_server_frame(br#"{"setupComplete": {}}"#).unwrap();
        assert_eq!(events, vec![ServerEvent::SetupComplete]);

        let events = parse_server_frame(br#"{"goAway": {"timeLeft": "10s"}}"#).unwrap();
        assert_eq!(events, vec![ServerEvent::GoAway(Some("10s".into()))]);
    }

    #[test]
    fn unknown_and_invalid_frames() {
        assert_eq!(
            parse_server_frame(br#"{"usageMetadata": {}}"#),
            Some(Vec::new())
        );
        assert_eq!(parse_server_frame(b"\x00\x01garbage"), None);
    }
}
