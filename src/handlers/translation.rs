//! REST surface for translation: synchronous text translation plus the
//! streaming session lifecycle endpoints. The WebSocket flow in
//! `websocket.rs` is the canonical audio path; `/streaming/process` exists
//! for older clients and discards what it receives.

use crate::error::AppError;
use crate::service::{CloseOutcome, StreamingTranslationRequest, TranslationRequest};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// `POST /api/v1/translate`
pub async fn translate_text(
    state: web::Data<AppState>,
    body: web::Json<TranslationRequest>,
) -> Result<HttpResponse, AppError> {
    let response = state.speech().translate_text(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// `POST /api/v1/streaming/start`
///
/// Validates the request and allocates a session id; the session comes
/// alive when the client connects to the returned WebSocket path.
pub async fn start_streaming_session(
    state: web::Data<AppState>,
    body: web::Json<StreamingTranslationRequest>,
) -> Result<HttpResponse, AppError> {
    let started = state
        .speech()
        .start_streaming_session(body.into_inner())
        .await?;

    info!(session_id = %started.session_id, "streaming session allocated");
    Ok(HttpResponse::Ok().json(started))
}

/// Request body for the deprecated audio chunk endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunkRequest {
    #[serde(default)]
    pub session_id: String,
    /// Base64-encoded audio bytes.
    #[serde(default)]
    pub audio_chunk: String,
}

/// `POST /api/v1/streaming/process` (deprecated)
pub async fn process_audio_chunk(
    state: web::Data<AppState>,
    body: web::Json<AudioChunkRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    if body.session_id.is_empty() {
        return Err(AppError::ValidationError("session ID is required".to_string()));
    }
    if body.audio_chunk.is_empty() {
        return Err(AppError::ValidationError("audio chunk is required".to_string()));
    }

    let audio = BASE64
        .decode(&body.audio_chunk)
        .map_err(|e| AppError::BadRequest(format!("invalid audio data encoding: {}", e)))?;

    let responses = state
        .speech()
        .process_audio_chunk(&body.session_id, audio)
        .await?;
    Ok(HttpResponse::Ok().json(responses))
}

/// Request body carrying only a session id.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    #[serde(default)]
    pub session_id: String,
}

/// `POST /api/v1/streaming/close`
pub async fn close_streaming_session(
    state: web::Data<AppState>,
    body: web::Json<SessionRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    if body.session_id.is_empty() {
        return Err(AppError::ValidationError("session ID is required".to_string()));
    }

    let status = match state
        .speech()
        .close_streaming_session(&body.session_id)
        .await?
    {
        CloseOutcome::Terminated => "Session terminated",
        CloseOutcome::AlreadyTerminated => "Session is already terminated",
    };

    Ok(HttpResponse::Ok().json(json!({ "status": status })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::error::AppResult;
    use crate::registry::SessionRegistry;
    use crate::service::{
        SpeechService, StartedSession, StreamingTranslationResponse, TranslationResponse,
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Test double standing in for the cloud-backed service.
    struct FakeSpeechService {
        live_session: Option<String>,
    }

    #[async_trait]
    impl SpeechService for FakeSpeechService {
        async fn translate_text(
            &self,
            request: TranslationRequest,
        ) -> AppResult<TranslationResponse> {
            Ok(TranslationResponse {
                original_text: request.text,
                translated_text: "hello".to_string(),
                source_language: "ja".to_string(),
                target_language: request.target_language,
                confidence_score: 0.9,
            })
        }

        async fn start_streaming_session(
            &self,
            request: StreamingTranslationRequest,
        ) -> AppResult<StartedSession> {
            crate::service::validate_streaming_request(&request)
                .map_err(AppError::ValidationError)?;
            Ok(StartedSession {
                session_id: "fixed-id".to_string(),
                web_socket_url: "/api/v1/streaming/ws/fixed-id".to_string(),
                source_language: "ja-JP".to_string(),
                target_language: "en".to_string(),
            })
        }

        async fn process_audio_chunk(
            &self,
            session_id: &str,
            _audio: Vec<u8>,
        ) -> AppResult<Vec<StreamingTranslationResponse>> {
            if self.live_session.as_deref() != Some(session_id) {
                return Err(AppError::NotFound("invalid session ID".to_string()));
            }
            Ok(Vec::new())
        }

        async fn close_streaming_session(&self, session_id: &str) -> AppResult<CloseOutcome> {
            if self.live_session.as_deref() == Some(session_id) {
                Ok(CloseOutcome::Terminated)
            } else {
                Ok(CloseOutcome::AlreadyTerminated)
            }
        }
    }

    fn test_state(live_session: Option<&str>) -> web::Data<AppState> {
        let registry = Arc::new(SessionRegistry::new());
        let speech = Arc::new(FakeSpeechService {
            live_session: live_session.map(str::to_string),
        });
        web::Data::new(AppState::new(AppConfig::default(), registry, speech))
    }

    async fn body_json(response: HttpResponse) -> serde_json::Value {
        let bytes = actix_web::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[actix_web::test]
    async fn test_translate_text_returns_service_response() {
        let state = test_state(None);
        let request = TranslationRequest {
            text: "こんにちは".to_string(),
            target_language: "en".to_string(),
            source_language: String::new(),
        };

        let response = translate_text(state, web::Json(request)).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["translatedText"], "hello");
        assert_eq!(json["originalText"], "こんにちは");
    }

    #[actix_web::test]
    async fn test_start_rejects_invalid_language() {
        let state = test_state(None);
        let request = StreamingTranslationRequest {
            source_language: "xx".to_string(),
            target_language: "en".to_string(),
            audio_format: "wav".to_string(),
        };

        let err = start_streaming_session(state, web::Json(request))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid source language code"));
    }

    #[actix_web::test]
    async fn test_start_returns_websocket_url() {
        let state = test_state(None);
        let request = StreamingTranslationRequest {
            source_language: "ja-JP".to_string(),
            target_language: "en".to_string(),
            audio_format: "wav".to_string(),
        };

        let response = start_streaming_session(state, web::Json(request))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["webSocketURL"], "/api/v1/streaming/ws/fixed-id");
    }

    #[actix_web::test]
    async fn test_process_requires_session_and_payload() {
        let state = test_state(Some("live"));

        let err = process_audio_chunk(
            state.clone(),
            web::Json(AudioChunkRequest {
                session_id: String::new(),
                audio_chunk: "AAEC".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("session ID is required"));

        let err = process_audio_chunk(
            state.clone(),
            web::Json(AudioChunkRequest {
                session_id: "live".to_string(),
                audio_chunk: String::new(),
            }),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("audio chunk is required"));

        let err = process_audio_chunk(
            state,
            web::Json(AudioChunkRequest {
                session_id: "live".to_string(),
                audio_chunk: "not base64!!!".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("invalid audio data encoding"));
    }

    #[actix_web::test]
    async fn test_process_accepts_and_discards() {
        let state = test_state(Some("live"));
        let response = process_audio_chunk(
            state,
            web::Json(AudioChunkRequest {
                session_id: "live".to_string(),
                audio_chunk: "AAEC".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[actix_web::test]
    async fn test_close_reports_terminated_and_already_terminated() {
        let state = test_state(Some("live"));

        let response = close_streaming_session(
            state.clone(),
            web::Json(SessionRequest {
                session_id: "live".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(body_json(response).await["status"], "Session terminated");

        let response = close_streaming_session(
            state,
            web::Json(SessionRequest {
                session_id: "gone".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(body_json(response).await["status"], "Session is already terminated");
    }
}
