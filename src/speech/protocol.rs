//! # Upstream Protocol Codec
//!
//! The speech service speaks a framed protocol over its WebSocket: text
//! frames carry a CRLF-terminated header block (`Name: value` lines ended by
//! a blank line) followed by a JSON body; binary frames carry raw audio
//! bytes and must be announced by a preceding `Path: audio` text frame on
//! the same session.
//!
//! ## Outbound envelopes:
//! 1. `speech.config`: the per-session configuration handshake.
//! 2. `audio`: announces the request id under which subsequent binary
//!    audio frames travel.
//!
//! ## Inbound classification (by `Path`):
//! `turn.start`, `speech.hypothesis` (interim), `speech.phrase` (final or
//! interim depending on the body), `turn.end`, `error`. Anything else is
//! skipped and logged at debug.

use crate::speech::result::{CancellationErrorCode, RecognitionResult, ResultReason};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

pub const PATH_SPEECH_CONFIG: &str = "speech.config";
pub const PATH_AUDIO: &str = "audio";
pub const PATH_TURN_START: &str = "turn.start";
pub const PATH_SPEECH_HYPOTHESIS: &str = "speech.hypothesis";
pub const PATH_SPEECH_PHRASE: &str = "speech.phrase";
pub const PATH_TURN_END: &str = "turn.end";
pub const PATH_ERROR: &str = "error";

const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_AUDIO: &str = "audio/x-wav";

/// Errors produced while decoding an inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame has no blank-line separator between headers and body.
    MissingHeaderBlock,
    /// The header block carries no `Path` header.
    MissingPath,
    /// The JSON body failed to parse.
    InvalidBody(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::MissingHeaderBlock => {
                write!(f, "frame has no header/body separator")
            }
            ProtocolError::MissingPath => write!(f, "frame has no Path header"),
            ProtocolError::InvalidBody(err) => write!(f, "invalid frame body: {}", err),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// A decoded inbound frame, classified by `Path`.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// The service opened a recognition turn.
    TurnStarted,
    /// Interim recognition for the current turn.
    Hypothesis(RecognitionResult),
    /// Recognition phrase; final when `result.is_final()`.
    Phrase(RecognitionResult),
    /// The service closed the current turn.
    TurnEnded,
    /// The service reported a failure.
    ServiceError {
        code: CancellationErrorCode,
        message: String,
    },
}

/// Headers recognized on inbound frames.
#[derive(Debug, Clone, Default)]
pub struct FrameHeaders {
    pub path: String,
    pub request_id: Option<String>,
    pub timestamp: Option<String>,
    pub content_type: Option<String>,
}

fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn encode_headers(path: &str, request_id: &str, content_type: &str) -> String {
    format!(
        "Path: {}\r\nX-RequestId: {}\r\nX-Timestamp: {}\r\nContent-Type: {}\r\n\r\n",
        path,
        request_id,
        timestamp_now(),
        content_type,
    )
}

/// Encode the per-session `speech.config` envelope.
pub fn encode_speech_config(
    request_id: &str,
    source_language: &str,
    target_languages: &[String],
) -> String {
    let body = json!({
        "context": {
            "system": {
                "name": "SpeechSDK",
                "version": env!("CARGO_PKG_VERSION"),
                "build": "rust",
            }
        },
        "config": {
            "speechConfig": {
                "speechRecognitionLanguage": source_language,
                "translationLanguages": target_languages,
                "sourceLanguageForTranslation": source_language,
                "features": {
                    "enableTranslation": true,
                    "wordLevelTimestamps": true,
                    "punctuation": "explicit",
                },
                "profanity": "masked",
                "timeToDetectEndOfSpeech": "1500",
                "scenarios": ["conversation"],
            },
            "input": {
                "format": CONTENT_TYPE_AUDIO,
                "audioParameters": {
                    "sampleRate": 16000,
                }
            }
        }
    });

    format!(
        "{}{}",
        encode_headers(PATH_SPEECH_CONFIG, request_id, CONTENT_TYPE_JSON),
        body
    )
}

/// Encode the `audio` envelope that announces binary frames for
/// `request_id`. The body is empty; the audio bytes follow as a separate
/// binary frame.
pub fn encode_audio_header(request_id: &str) -> String {
    encode_headers(PATH_AUDIO, request_id, CONTENT_TYPE_AUDIO)
}

/// Split an inbound text frame into its header block and body.
pub fn parse_frame(frame: &str) -> Result<(FrameHeaders, &str), ProtocolError> {
    let (header_block, body) = frame
        .split_once("\r\n\r\n")
        .ok_or(ProtocolError::MissingHeaderBlock)?;

    let mut headers = FrameHeaders::default();
    for line in header_block.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim() {
            "Path" => headers.path = value.to_string(),
            "X-RequestId" => headers.request_id = Some(value.to_string()),
            "X-Timestamp" => headers.timestamp = Some(value.to_string()),
            "Content-Type" => headers.content_type = Some(value.to_string()),
            _ => {}
        }
    }

    if headers.path.is_empty() {
        return Err(ProtocolError::MissingPath);
    }

    Ok((headers, body))
}

/// Decode an inbound text frame into a typed event.
///
/// Returns `Ok(None)` for paths this gateway does not consume.
pub fn decode_text_frame(frame: &str) -> Result<Option<UpstreamEvent>, ProtocolError> {
    let (headers, body) = parse_frame(frame)?;

    let body: serde_json::Value = if body.trim().is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(body).map_err(|e| ProtocolError::InvalidBody(e.to_string()))?
    };

    // A failing Status field turns any frame into a service error.
    if let Some((code, message)) = failure_from_status(&body) {
        return Ok(Some(UpstreamEvent::ServiceError { code, message }));
    }

    match headers.path.as_str() {
        PATH_TURN_START => Ok(Some(UpstreamEvent::TurnStarted)),
        PATH_TURN_END => Ok(Some(UpstreamEvent::TurnEnded)),
        PATH_SPEECH_HYPOTHESIS => Ok(Some(UpstreamEvent::Hypothesis(decode_hypothesis(body)?))),
        PATH_SPEECH_PHRASE => Ok(Some(UpstreamEvent::Phrase(decode_phrase(body)?))),
        PATH_ERROR => Ok(Some(UpstreamEvent::ServiceError {
            code: CancellationErrorCode::ServiceError,
            message: body
                .get("Message")
                .and_then(|m| m.as_str())
                .unwrap_or("upstream reported an error")
                .to_string(),
        })),
        other => {
            debug!(path = other, "ignoring upstream frame with unhandled path");
            Ok(None)
        }
    }
}

/// Map a failing `Status` body field to an error code, if present.
fn failure_from_status(body: &serde_json::Value) -> Option<(CancellationErrorCode, String)> {
    let status = body.get("Status")?;
    let message = body
        .get("Message")
        .and_then(|m| m.as_str())
        .unwrap_or("upstream reported a failure")
        .to_string();

    if let Some(code) = status.as_u64() {
        if (200..300).contains(&code) {
            return None;
        }
        return Some((
            CancellationErrorCode::from_http_status(code as u16),
            format!("status {}: {}", code, message),
        ));
    }

    match status.as_str() {
        Some("Success") | Some("OK") | None => None,
        Some(other) => Some((
            CancellationErrorCode::ServiceError,
            format!("status {}: {}", other, message),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct HypothesisBody {
    #[serde(rename = "Text", default)]
    text: String,
    #[serde(rename = "Offset", default)]
    offset: i64,
    #[serde(rename = "Duration", default)]
    duration: i64,
    #[serde(rename = "Translations", default)]
    translations: HashMap<String, String>,
    #[serde(rename = "SegmentId")]
    segment_id: Option<String>,
}

fn decode_hypothesis(body: serde_json::Value) -> Result<RecognitionResult, ProtocolError> {
    let body: HypothesisBody =
        serde_json::from_value(body).map_err(|e| ProtocolError::InvalidBody(e.to_string()))?;

    Ok(RecognitionResult {
        result_id: Uuid::new_v4().to_string(),
        segment_id: body.segment_id.unwrap_or_default(),
        text: body.text,
        reason: ResultReason::Hypothesis,
        offset_nanos: body.offset,
        duration_nanos: body.duration,
        translations: body.translations,
    })
}

#[derive(Debug, Deserialize)]
struct PhraseBody {
    #[serde(rename = "RecognitionStatus", default)]
    recognition_status: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "NBest", default)]
    n_best: Vec<NBestEntry>,
    #[serde(rename = "Offset", default)]
    offset: i64,
    #[serde(rename = "Duration", default)]
    duration: i64,
    #[serde(rename = "Translations", default)]
    translations: HashMap<String, String>,
    #[serde(rename = "SegmentId")]
    segment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NBestEntry {
    #[serde(rename = "Display", default)]
    display: String,
}

fn decode_phrase(body: serde_json::Value) -> Result<RecognitionResult, ProtocolError> {
    let body: PhraseBody =
        serde_json::from_value(body).map_err(|e| ProtocolError::InvalidBody(e.to_string()))?;

    // Only a successful phrase explicitly marked final is final; every other
    // shape stays interim so a later phrase can supersede it.
    let reason = match body.recognition_status.as_str() {
        "NoMatch" => ResultReason::NoMatch,
        "Success" if body.kind.as_deref() == Some("final") => ResultReason::Recognized,
        _ => ResultReason::Hypothesis,
    };

    let text = body
        .n_best
        .first()
        .map(|entry| entry.display.clone())
        .unwrap_or_default();

    Ok(RecognitionResult {
        result_id: Uuid::new_v4().to_string(),
        segment_id: body.segment_id.unwrap_or_default(),
        text,
        reason,
        offset_nanos: body.offset,
        duration_nanos: body.duration,
        translations: body.translations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(path: &str, body: &str) -> String {
        format!(
            "Path: {}\r\nX-RequestId: abc123\r\nX-Timestamp: 2025-01-01T00:00:00.000Z\r\nContent-Type: application/json\r\n\r\n{}",
            path, body
        )
    }

    #[test]
    fn test_speech_config_envelope_shape() {
        let encoded = encode_speech_config("req-1", "ja-JP", &["en".to_string()]);

        let (headers, body) = encoded.split_once("\r\n\r\n").unwrap();
        assert!(headers.contains("Path: speech.config"));
        assert!(headers.contains("X-RequestId: req-1"));
        assert!(headers.contains("Content-Type: application/json"));
        assert!(headers.contains("X-Timestamp: "));

        let body: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(body["context"]["system"]["name"], "SpeechSDK");
        assert_eq!(
            body["config"]["speechConfig"]["speechRecognitionLanguage"],
            "ja-JP"
        );
        assert_eq!(
            body["config"]["speechConfig"]["translationLanguages"][0],
            "en"
        );
        assert_eq!(
            body["config"]["speechConfig"]["features"]["enableTranslation"],
            true
        );
        assert_eq!(body["config"]["input"]["audioParameters"]["sampleRate"], 16000);
    }

    #[test]
    fn test_audio_envelope_has_empty_body() {
        let encoded = encode_audio_header("req-2");
        let (headers, body) = encoded.split_once("\r\n\r\n").unwrap();
        assert!(headers.contains("Path: audio"));
        assert!(headers.contains("X-RequestId: req-2"));
        assert!(headers.contains("Content-Type: audio/x-wav"));
        assert!(body.is_empty());
    }

    #[test]
    fn test_parse_frame_extracts_known_headers() {
        let raw = frame("turn.start", "{}");
        let (headers, body) = parse_frame(&raw).unwrap();
        assert_eq!(headers.path, "turn.start");
        assert_eq!(headers.request_id.as_deref(), Some("abc123"));
        assert_eq!(headers.timestamp.as_deref(), Some("2025-01-01T00:00:00.000Z"));
        assert_eq!(headers.content_type.as_deref(), Some("application/json"));
        assert_eq!(body, "{}");
    }

    #[test]
    fn test_frame_without_separator_is_rejected() {
        assert_eq!(
            decode_text_frame("Path: turn.start"),
            Err(ProtocolError::MissingHeaderBlock)
        );
    }

    #[test]
    fn test_frame_without_path_is_rejected() {
        assert_eq!(
            decode_text_frame("X-RequestId: abc\r\n\r\n{}"),
            Err(ProtocolError::MissingPath)
        );
    }

    #[test]
    fn test_turn_markers_decode() {
        assert!(matches!(
            decode_text_frame(&frame("turn.start", "{}")).unwrap(),
            Some(UpstreamEvent::TurnStarted)
        ));
        assert!(matches!(
            decode_text_frame(&frame("turn.end", "{}")).unwrap(),
            Some(UpstreamEvent::TurnEnded)
        ));
    }

    #[test]
    fn test_hypothesis_decodes_to_interim_result() {
        let body = r#"{"Text":"konnichi","Offset":100,"Duration":200,"Translations":{"en":"hello"}}"#;
        let event = decode_text_frame(&frame("speech.hypothesis", body))
            .unwrap()
            .unwrap();

        let UpstreamEvent::Hypothesis(result) = event else {
            panic!("expected hypothesis event");
        };
        assert_eq!(result.reason, ResultReason::Hypothesis);
        assert_eq!(result.text, "konnichi");
        assert_eq!(result.offset_nanos, 100);
        assert_eq!(result.duration_nanos, 200);
        assert_eq!(result.translations["en"], "hello");
    }

    #[test]
    fn test_final_phrase_decodes_to_final_result() {
        let body = r#"{"RecognitionStatus":"Success","type":"final","NBest":[{"Display":"こんにちは"}],"Translations":{"en":"hello"},"Offset":5,"Duration":10}"#;
        let event = decode_text_frame(&frame("speech.phrase", body))
            .unwrap()
            .unwrap();

        let UpstreamEvent::Phrase(result) = event else {
            panic!("expected phrase event");
        };
        assert!(result.is_final());
        assert_eq!(result.text, "こんにちは");
        assert_eq!(result.translations["en"], "hello");
    }

    #[test]
    fn test_non_final_phrase_stays_interim() {
        let body = r#"{"RecognitionStatus":"Success","type":"partial","NBest":[{"Display":"こん"}]}"#;
        let event = decode_text_frame(&frame("speech.phrase", body))
            .unwrap()
            .unwrap();

        let UpstreamEvent::Phrase(result) = event else {
            panic!("expected phrase event");
        };
        assert_eq!(result.reason, ResultReason::Hypothesis);
    }

    #[test]
    fn test_no_match_phrase() {
        let body = r#"{"RecognitionStatus":"NoMatch","NBest":[]}"#;
        let event = decode_text_frame(&frame("speech.phrase", body))
            .unwrap()
            .unwrap();

        let UpstreamEvent::Phrase(result) = event else {
            panic!("expected phrase event");
        };
        assert_eq!(result.reason, ResultReason::NoMatch);
        assert!(result.text.is_empty());
    }

    #[test]
    fn test_error_path_decodes_to_service_error() {
        let event = decode_text_frame(&frame("error", r#"{"Message":"boom"}"#))
            .unwrap()
            .unwrap();

        let UpstreamEvent::ServiceError { code, message } = event else {
            panic!("expected service error");
        };
        assert_eq!(code, CancellationErrorCode::ServiceError);
        assert_eq!(message, "boom");
    }

    #[test]
    fn test_failing_status_field_wins_over_path() {
        let body = r#"{"Status":429,"Message":"slow down"}"#;
        let event = decode_text_frame(&frame("speech.phrase", body))
            .unwrap()
            .unwrap();

        let UpstreamEvent::ServiceError { code, .. } = event else {
            panic!("expected service error");
        };
        assert_eq!(code, CancellationErrorCode::TooManyRequests);
    }

    #[test]
    fn test_successful_status_field_is_not_an_error() {
        let body = r#"{"Status":200,"RecognitionStatus":"Success","type":"final","NBest":[{"Display":"ok"}]}"#;
        let event = decode_text_frame(&frame("speech.phrase", body))
            .unwrap()
            .unwrap();
        assert!(matches!(event, UpstreamEvent::Phrase(_)));
    }

    #[test]
    fn test_unknown_path_is_skipped() {
        let event = decode_text_frame(&frame("speech.keyword", "{}")).unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_invalid_json_body_is_rejected() {
        let raw = frame("speech.phrase", "{not json");
        assert!(matches!(
            decode_text_frame(&raw),
            Err(ProtocolError::InvalidBody(_))
        ));
    }
}
