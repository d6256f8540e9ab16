//! # Speech Service Capability Layer
//!
//! A narrow trait covering everything the REST surface needs from the
//! translation backend, with the Azure-backed implementation behind it.
//! Handlers depend on `Arc<dyn SpeechService>` only, so tests substitute a
//! fake without touching the network.

use crate::config::SpeechServiceConfig;
use crate::error::{AppError, AppResult};
use crate::language::{normalize_source_language, normalize_target_language};
use crate::registry::SessionRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Audio container formats accepted at session setup. Case-insensitive;
/// the stored value is lowercased.
pub const SUPPORTED_AUDIO_FORMATS: &[&str] = &["wav", "mp3", "ogg", "flac"];

/// Request body for synchronous text translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRequest {
    pub text: String,
    pub target_language: String,
    /// Optional; when empty the provider detects the source language.
    #[serde(default)]
    pub source_language: String,
}

/// Response body for synchronous text translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResponse {
    pub original_text: String,
    pub translated_text: String,
    pub source_language: String,
    pub target_language: String,
    pub confidence_score: f64,
}

/// Request body for starting a streaming session (also the first WebSocket
/// frame of a session).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingTranslationRequest {
    #[serde(default)]
    pub source_language: String,
    #[serde(default)]
    pub target_language: String,
    #[serde(default)]
    pub audio_format: String,
}

/// A successfully created streaming session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedSession {
    pub session_id: String,
    #[serde(rename = "webSocketURL")]
    pub web_socket_url: String,
    pub source_language: String,
    pub target_language: String,
}

/// One translated-text update pushed to a streaming client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingTranslationResponse {
    pub source_language: String,
    pub target_language: String,
    pub translated_text: String,
    pub original_text: String,
    pub is_final: bool,
    pub segment_id: String,
}

/// Outcome of a close request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Terminated,
    AlreadyTerminated,
}

/// A streaming request with its languages normalized and its audio format
/// checked. Stored codes never fail re-validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedStreamingRequest {
    pub source_language: String,
    pub target_language: String,
    pub audio_format: String,
}

/// Validate a streaming setup request. Error strings are exactly what the
/// client sees, over REST and over the WebSocket alike.
pub fn validate_streaming_request(
    request: &StreamingTranslationRequest,
) -> Result<ValidatedStreamingRequest, String> {
    if request.source_language.trim().is_empty() {
        return Err("source language is required".to_string());
    }
    if request.target_language.trim().is_empty() {
        return Err("target language is required".to_string());
    }
    if request.audio_format.trim().is_empty() {
        return Err("audio format is required".to_string());
    }

    let source_language = normalize_source_language(&request.source_language)
        .ok_or_else(|| "invalid source language code".to_string())?;
    let target_language = normalize_target_language(&request.target_language)
        .ok_or_else(|| "invalid target language code".to_string())?;

    let audio_format = request.audio_format.trim().to_lowercase();
    if !SUPPORTED_AUDIO_FORMATS.contains(&audio_format.as_str()) {
        return Err("unsupported audio format".to_string());
    }

    Ok(ValidatedStreamingRequest {
        source_language,
        target_language,
        audio_format,
    })
}

/// Capability interface over the translation backend.
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Translate a single piece of text synchronously.
    async fn translate_text(&self, request: TranslationRequest) -> AppResult<TranslationResponse>;

    /// Validate a streaming request and allocate a session id. The session
    /// itself comes alive when the client connects to the WebSocket path.
    async fn start_streaming_session(
        &self,
        request: StreamingTranslationRequest,
    ) -> AppResult<StartedSession>;

    /// Deprecated REST ingestion path: the chunk is validated against a live
    /// session, then discarded. The WebSocket flow is the canonical one.
    async fn process_audio_chunk(
        &self,
        session_id: &str,
        audio: Vec<u8>,
    ) -> AppResult<Vec<StreamingTranslationResponse>>;

    /// Tear a streaming session down.
    async fn close_streaming_session(&self, session_id: &str) -> AppResult<CloseOutcome>;
}

/// The Azure-backed implementation.
pub struct AzureSpeechService {
    http: reqwest::Client,
    config: SpeechServiceConfig,
    registry: Arc<SessionRegistry>,
}

impl AzureSpeechService {
    pub fn new(config: SpeechServiceConfig, registry: Arc<SessionRegistry>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            registry,
        }
    }
}

/// Response item of the translator REST API.
#[derive(Debug, Deserialize)]
struct TranslateResultItem {
    #[serde(rename = "detectedLanguage")]
    detected_language: Option<DetectedLanguage>,
    #[serde(default)]
    translations: Vec<TranslatedText>,
}

#[derive(Debug, Deserialize)]
struct DetectedLanguage {
    language: String,
    score: f64,
}

#[derive(Debug, Deserialize)]
struct TranslatedText {
    text: String,
}

#[async_trait]
impl SpeechService for AzureSpeechService {
    async fn translate_text(&self, request: TranslationRequest) -> AppResult<TranslationResponse> {
        if request.text.trim().is_empty() {
            return Err(AppError::ValidationError("text is required".to_string()));
        }
        let target_language = normalize_target_language(&request.target_language)
            .ok_or_else(|| AppError::ValidationError("invalid target language code".to_string()))?;

        let mut url = format!(
            "{}/translate?api-version=3.0&to={}",
            self.config.translator_endpoint, target_language
        );
        let source_language = if request.source_language.trim().is_empty() {
            None
        } else {
            let source = normalize_target_language(&request.source_language).ok_or_else(|| {
                AppError::ValidationError("invalid source language code".to_string())
            })?;
            url.push_str(&format!("&from={}", source));
            Some(source)
        };

        debug!(target = %target_language, "sending text translation request");
        let response = self
            .http
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
            .header("Ocp-Apim-Subscription-Region", &self.config.region)
            .json(&serde_json::json!([{ "Text": request.text }]))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::ServiceUnavailable(format!(
                "translation request failed with status {}",
                response.status()
            )));
        }

        let items: Vec<TranslateResultItem> = response.json().await?;
        let item = items
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ServiceUnavailable("empty translation result".to_string()))?;

        let translated_text = item
            .translations
            .into_iter()
            .next()
            .map(|t| t.text)
            .ok_or_else(|| AppError::ServiceUnavailable("no translation in result".to_string()))?;

        let (source_language, confidence_score) = match item.detected_language {
            Some(detected) => (detected.language, detected.score),
            None => (source_language.unwrap_or_default(), 1.0),
        };

        Ok(TranslationResponse {
            original_text: request.text,
            translated_text,
            source_language,
            target_language,
            confidence_score,
        })
    }

    async fn start_streaming_session(
        &self,
        request: StreamingTranslationRequest,
    ) -> AppResult<StartedSession> {
        let validated = validate_streaming_request(&request).map_err(AppError::ValidationError)?;

        let session_id = Uuid::new_v4().to_string();
        info!(
            session_id = %session_id,
            source = %validated.source_language,
            target = %validated.target_language,
            "allocated streaming session"
        );

        Ok(StartedSession {
            web_socket_url: format!("/api/v1/streaming/ws/{}", session_id),
            session_id,
            source_language: validated.source_language,
            target_language: validated.target_language,
        })
    }

    async fn process_audio_chunk(
        &self,
        session_id: &str,
        audio: Vec<u8>,
    ) -> AppResult<Vec<StreamingTranslationResponse>> {
        let session = self
            .registry
            .get(session_id)
            .ok_or_else(|| AppError::NotFound("invalid session ID".to_string()))?;

        session.touch();
        debug!(
            session_id = %session_id,
            bytes = audio.len(),
            "discarding audio chunk received on the deprecated REST path"
        );
        Ok(Vec::new())
    }

    async fn close_streaming_session(&self, session_id: &str) -> AppResult<CloseOutcome> {
        let Some(session) = self.registry.get(session_id) else {
            return Ok(CloseOutcome::AlreadyTerminated);
        };

        session.shutdown().await;
        self.registry.remove(session_id);
        info!(session_id = %session_id, "closed streaming session via REST");
        Ok(CloseOutcome::Terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming_request(source: &str, target: &str, format: &str) -> StreamingTranslationRequest {
        StreamingTranslationRequest {
            source_language: source.to_string(),
            target_language: target.to_string(),
            audio_format: format.to_string(),
        }
    }

    fn service() -> AzureSpeechService {
        AzureSpeechService::new(
            SpeechServiceConfig {
                subscription_key: "key".to_string(),
                region: "japaneast".to_string(),
                translator_endpoint: "https://example.invalid".to_string(),
                streaming_endpoint: None,
            },
            Arc::new(SessionRegistry::new()),
        )
    }

    #[test]
    fn test_validation_normalizes_languages_and_format() {
        let validated = validate_streaming_request(&streaming_request("ja", "en-US", "WAV")).unwrap();
        assert_eq!(
            validated,
            ValidatedStreamingRequest {
                source_language: "ja-JP".to_string(),
                target_language: "en".to_string(),
                audio_format: "wav".to_string(),
            }
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let cases = [
            (streaming_request("", "en", "wav"), "source language is required"),
            (streaming_request("ja", "", "wav"), "target language is required"),
            (streaming_request("ja", "en", ""), "audio format is required"),
            (streaming_request("xx", "en", "wav"), "invalid source language code"),
            (streaming_request("zh-Hans-CN", "en", "wav"), "invalid source language code"),
            (streaming_request("ja", "en", "mp4"), "unsupported audio format"),
        ];

        for (request, expected) in cases {
            assert_eq!(validate_streaming_request(&request).unwrap_err(), expected);
        }
    }

    #[test]
    fn test_mixed_case_audio_formats_are_accepted() {
        for format in ["wav", "Mp3", "OGG", "FlAc"] {
            let validated =
                validate_streaming_request(&streaming_request("ja", "en", format)).unwrap();
            assert_eq!(validated.audio_format, format.to_lowercase());
        }
    }

    #[tokio::test]
    async fn test_start_streaming_session_allocates_id_and_url() {
        let started = service()
            .start_streaming_session(streaming_request("ja-JP", "en", "wav"))
            .await
            .unwrap();

        assert!(!started.session_id.is_empty());
        assert_eq!(
            started.web_socket_url,
            format!("/api/v1/streaming/ws/{}", started.session_id)
        );
        assert_eq!(started.source_language, "ja-JP");
        assert_eq!(started.target_language, "en");
    }

    #[tokio::test]
    async fn test_process_audio_chunk_requires_live_session() {
        let err = service()
            .process_audio_chunk("missing", vec![0u8; 16])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_close_unknown_session_reports_already_terminated() {
        let outcome = service().close_streaming_session("missing").await.unwrap();
        assert_eq!(outcome, CloseOutcome::AlreadyTerminated);
    }

    #[test]
    fn test_streaming_response_uses_contract_field_names() {
        let response = StreamingTranslationResponse {
            source_language: "ja-JP".to_string(),
            target_language: "en".to_string(),
            translated_text: "hello".to_string(),
            original_text: "こんにちは".to_string(),
            is_final: true,
            segment_id: "seg-1".to_string(),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["sourceLanguage"], "ja-JP");
        assert_eq!(json["translatedText"], "hello");
        assert_eq!(json["originalText"], "こんにちは");
        assert_eq!(json["isFinal"], true);
        assert_eq!(json["segmentId"], "seg-1");
    }

    #[test]
    fn test_started_session_serializes_websocket_url_key() {
        let started = StartedSession {
            session_id: "s".to_string(),
            web_socket_url: "/api/v1/streaming/ws/s".to_string(),
            source_language: "ja-JP".to_string(),
            target_language: "en".to_string(),
        };
        let json = serde_json::to_value(&started).unwrap();
        assert_eq!(json["webSocketURL"], "/api/v1/streaming/ws/s");
        assert_eq!(json["sessionId"], "s");
    }
}
