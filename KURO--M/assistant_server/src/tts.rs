use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::config::TtsConfig;

/// Speech synthesis failures.
#[derive(Debug, Error)]
pub enum TtsError {
    /// No API key configured.
    #[error("text-to-speech is not configured")]
    NotConfigured,
    /// Request never completed.
    #[error("speech transport failed: {0}")]
    Transport(String),
    /// Provider answered with an error status.
    #[error("speech backend returned {status}: {body}")]
    Backend {
        /// HTTP status.
        status: u16,
        /// Truncated body.
        body: String,
    },
}

/// Turns reply text into audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns encoded audio for `text`.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TtsError>;

    /// MIME type of the returned audio.
    fn content_type(&self) -> &'static str {
        "audio/wav"
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    response_format: &'a str,
    input: &'a str,
}

/// Groq OpenAI-compatible `audio/speech` client.
#[derive(Debug, Clone)]
pub struct GroqTts {
    client: Client,
    api_key: Option<String>,
    model: String,
    voice: String,
    response_format: String,
    base_url: String,
}

impl GroqTts {
    /// Creates the client; a missing key is reported on first use.
    pub fn new(config: &TtsConfig) -> Result<Self, TtsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| TtsError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
            model: config.model.clone(),
            voice: config.voice.clone(),
            response_format: config.response_format.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Whether an API key is present.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl SpeechSynthesizer for GroqTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TtsError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(TtsError::NotConfigured);
        };
        tracing::debug!(chars = text.chars().count(), voice = %self.voice, "synthesizing speech");
        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(api_key)
            .json(&SpeechRequest {
                model: &self.model,
                voice: &self.voice,
                response_format: &self.response_format,
                input: text,
            })
            .send()
            .await
            .map_err(|err| TtsError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::Backend {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        let audio = response
            .bytes()
            .await
            .map_err(|err| TtsError::Transport(err.to_string()))?;
        Ok(audio.to_vec())
    }

    fn content_type(&self) -> &'static str {
        match self.response_format.as_str() {
            "mp3" => "audio/mpeg",
            "flac" => "audio/flac",
            "ogg" | "opus" => "audio/ogg",
            _ => "audio/wav",
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        http::{HeaderMap, StatusCode},
        routing::post,
        Json, Router,
    };
    use serde_json::Value;
    use tokio::net::TcpListener;

    use super::*;

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config(base_url: String) -> TtsConfig {
        TtsConfig {
            api_key: Some("groq-key".into()),
            base_url,
            ..TtsConfig::default()
        }
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let tts = GroqTts::new(&TtsConfig::default()).unwrap();
        assert!(!tts.is_configured());
        assert!(matches!(tts.synthesize("hi").await, Err(TtsError::NotConfigured)));
    }

    #[tokio::test]
    async fn returns_audio_bytes() {
        let app = Router::new().route(
            "/audio/speech",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer groq-key");
                assert_eq!(body["voice"], "autumn");
                assert_eq!(body["model"], "canopylabs/orpheus-v1-english");
                assert_eq!(body["input"], "hello there");
                b"RIFF....WAVE".to_vec()
            }),
        );
        let tts = GroqTts::new(&config(serve(app).await)).unwrap();
        let audio = tts.synthesize("hello there").await.unwrap();
        assert_eq!(audio, b"RIFF....WAVE");
        assert_eq!(tts.content_type(), "audio/wav");
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let app = Router::new().route(
            "/audio/speech",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let tts = GroqTts::new(&config(serve(app).await)).unwrap();
        match tts.synthesize("hello").await {
            Err(TtsError::Backend { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
