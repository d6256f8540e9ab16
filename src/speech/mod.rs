//! # Upstream Speech Service Layer
//!
//! Everything needed to run a translation session against the cloud speech
//! service over its framed WebSocket protocol.
//!
//! ## Key Components:
//! - **Protocol codec**: encodes the configuration/audio envelopes and
//!   decodes inbound framed messages into typed events
//! - **Connection**: one outbound WebSocket per session, serialized writes,
//!   dedicated reader task
//! - **Recognizer**: the per-session state machine fanning events onto
//!   typed streams
//! - **Events**: typed callback streams (`recognizing`, `recognized`,
//!   `canceled`, session and speech-boundary events)

pub mod connection;
pub mod events;
pub mod protocol;
pub mod recognizer;
pub mod result;

pub use connection::{ConnectionSettings, UpstreamConnection, UpstreamError};
pub use events::{CanceledEvent, EventStream, SessionEvent, SpeechBoundaryEvent, TranslationEvent};
pub use recognizer::{RecognizerError, SpeechTranslationConfig, TranslationRecognizer};
pub use result::{
    CancellationDetails, CancellationErrorCode, CancellationReason, RecognitionResult, ResultReason,
};
