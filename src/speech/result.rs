//! # Recognition Result and Cancellation Types
//!
//! Typed results and error classifications shared by the protocol codec,
//! the upstream connection, and the recognizer.

use std::collections::HashMap;
use std::fmt;

/// Why a recognition result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultReason {
    /// Final recognition for a segment; no further updates follow.
    Recognized,
    /// Interim recognition, superseded by a later result for the segment.
    Hypothesis,
    /// The session was canceled before a result could be produced.
    Canceled,
    /// The service recognized no speech in the segment.
    NoMatch,
}

impl fmt::Display for ResultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultReason::Recognized => "Recognized",
            ResultReason::Hypothesis => "Hypothesis",
            ResultReason::Canceled => "Canceled",
            ResultReason::NoMatch => "NoMatch",
        };
        write!(f, "{}", s)
    }
}

/// One recognition update for a speech segment, with its translations.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    /// Unique id of this result.
    pub result_id: String,
    /// Id of the speech segment this result belongs to. Hypotheses and the
    /// final result of one segment share the same id.
    pub segment_id: String,
    /// Recognized text in the source language.
    pub text: String,
    pub reason: ResultReason,
    /// Offset of the segment from the session start, in nanoseconds.
    pub offset_nanos: i64,
    /// Duration of the segment, in nanoseconds.
    pub duration_nanos: i64,
    /// Target language code → translated text.
    pub translations: HashMap<String, String>,
}

impl RecognitionResult {
    pub fn is_final(&self) -> bool {
        self.reason == ResultReason::Recognized
    }
}

/// Why a session was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    Error,
    EndOfStream,
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellationReason::Error => write!(f, "Error"),
            CancellationReason::EndOfStream => write!(f, "EndOfStream"),
        }
    }
}

/// Specific error classification for a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationErrorCode {
    NoError,
    AuthenticationFailure,
    BadRequest,
    TooManyRequests,
    Forbidden,
    ConnectionFailure,
    ServiceTimeout,
    ServiceError,
    ServiceUnavailable,
    RuntimeError,
}

impl CancellationErrorCode {
    /// Classify an HTTP status returned while dialing or by a service error
    /// frame.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 => CancellationErrorCode::AuthenticationFailure,
            400 => CancellationErrorCode::BadRequest,
            403 => CancellationErrorCode::Forbidden,
            429 => CancellationErrorCode::TooManyRequests,
            408 | 504 => CancellationErrorCode::ServiceTimeout,
            503 => CancellationErrorCode::ServiceUnavailable,
            500..=599 => CancellationErrorCode::ServiceError,
            _ => CancellationErrorCode::ConnectionFailure,
        }
    }
}

impl fmt::Display for CancellationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancellationErrorCode::NoError => "NoError",
            CancellationErrorCode::AuthenticationFailure => "AuthenticationFailure",
            CancellationErrorCode::BadRequest => "BadRequest",
            CancellationErrorCode::TooManyRequests => "TooManyRequests",
            CancellationErrorCode::Forbidden => "Forbidden",
            CancellationErrorCode::ConnectionFailure => "ConnectionFailure",
            CancellationErrorCode::ServiceTimeout => "ServiceTimeout",
            CancellationErrorCode::ServiceError => "ServiceError",
            CancellationErrorCode::ServiceUnavailable => "ServiceUnavailable",
            CancellationErrorCode::RuntimeError => "RuntimeError",
        };
        write!(f, "{}", s)
    }
}

/// Details attached to a `canceled` event.
#[derive(Debug, Clone)]
pub struct CancellationDetails {
    pub reason: CancellationReason,
    pub error_code: CancellationErrorCode,
    pub error_details: String,
}

impl CancellationDetails {
    pub fn error(code: CancellationErrorCode, details: impl Into<String>) -> Self {
        Self {
            reason: CancellationReason::Error,
            error_code: code,
            error_details: details.into(),
        }
    }

    pub fn end_of_stream(details: impl Into<String>) -> Self {
        Self {
            reason: CancellationReason::EndOfStream,
            error_code: CancellationErrorCode::NoError,
            error_details: details.into(),
        }
    }
}

impl fmt::Display for CancellationDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.reason, self.error_code, self.error_details)
    }
}
