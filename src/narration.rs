use crate::audio::pcm;
use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::protocol::SpeechConfig;
use reqwest::Client;
use serde_json::{json, Value};

/// Result of one narration request, tagged with the controller generation
/// it was issued in.
#[derive(Debug)]
pub struct NarrationOutcome {
    pub generation: u64,
    pub result: Result<Vec<f32>>,
}

/// One-shot text-to-speech through the REST `generateContent` endpoint.
///
/// The response audio is the same 24 kHz PCM16 the live session streams, so
/// it goes through the same playback path.
pub struct Narrator {
    client: Client,
    api_base_url: String,
    api_key: String,
    model: String,
    voice: String,
}

impl Narrator {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.narration_model.to_string(),
            voice: config.narration_voice.to_string(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base_url, self.model)
    }

    pub async fn synthesize(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": SpeechConfig::prebuilt(&self.voice),
            }
        });

        log::info!("Requesting narration ({} chars) from {}", text.len(), self.model);

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(BridgeError::Transport(format!(
                "narration HTTP Error: {}",
                resp.status()
            )));
        }

        let json = resp.json::<Value>().await?;
        pcm::decode_segment(extract_audio(&json)?)
    }
}

/// First inline audio part of the first candidate.
pub fn extract_audio(response: &Value) -> Result<&str> {
    response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find_map(|part| part.pointer("/inlineData/data").and_then(Value::as_str))
        .ok_or_else(|| BridgeError::Decode("no audio in narration response".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_is_taken_from_first_inline_part() {
        let response = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "ignored"},
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AEA="}}
                ]}
            }]
        });
        let data = extract_audio(&response).unwrap();
        assert_eq!(pcm::decode_segment(data).unwrap(), vec![0.5]);
    }

    #[test]
    fn missing_audio_is_a_decode_error() {
        let response = json!({"candidates": [{"content": {"parts": [{"text": "hi"}]}}]});
        assert!(matches!(
            extract_audio(&response),
            Err(BridgeError::Decode(_))
        ));
        assert!(extract_audio(&json!({})).is_err());
    }

    #[test]
    fn endpoint_joins_base_and_model() {
        let mut config = Config::new().unwrap();
        config.api_base_url = "https://api.example.com/v1beta/";
        config.narration_model = "tts-model";
        let narrator = Narrator::new(&config);
        assert_eq!(
            narrator.endpoint(),
            "https://api.example.com/v1beta/models/tts-model:generateContent"
        );
    }

    #[tokio::test]
    async fn blank_text_needs_no_request() {
        let narrator = Narrator::new(&Config::new().unwrap());
        assert!(narrator.synthesize("   ").await.unwrap().is_empty());
    }
}
