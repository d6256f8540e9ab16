//! # Translation Recognizer
//!
//! Per-session orchestrator. Owns the audio ingress buffer, the upstream
//! connection, and the event streams, and drives the session through its
//! lifecycle:
//!
//! ```text
//!   Idle ──start──▶ Connecting ──config sent──▶ Streaming ──stop/err/EOF──▶ Stopping ──▶ Closed
//!                        │                                                      ▲
//!                        └────────────connect failure─────────────────────────┘
//! ```
//!
//! One worker task runs the session: it connects, performs the
//! configuration handshake, spawns the audio pump, and fans decoded
//! upstream events onto the event streams in receive order. A single
//! `select!` over the stop signal, the pump outcome, and the upstream event
//! channel is the only termination point.

use crate::audio::{AudioIngressBuffer, StreamError};
use crate::speech::connection::{ConnectionSettings, UpstreamConnection, UpstreamError};
use crate::speech::events::{
    CanceledEvent, EventStream, SessionEvent, SpeechBoundaryEvent, TranslationEvent,
};
use crate::speech::protocol::UpstreamEvent;
use crate::speech::result::{
    CancellationDetails, CancellationErrorCode, RecognitionResult, ResultReason,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Upper bound on a single audio read forwarded upstream.
const AUDIO_CHUNK_BYTES: usize = 8192;

/// Yield applied when the audio source returns an empty read.
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(10);

/// How long a single-shot recognition waits for its final result.
const RECOGNIZE_ONCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Misuse of the recognizer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerError {
    AlreadyRunning,
    NotRunning,
    Closed,
}

impl fmt::Display for RecognizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognizerError::AlreadyRunning => write!(f, "continuous recognition is already running"),
            RecognizerError::NotRunning => write!(f, "continuous recognition is not running"),
            RecognizerError::Closed => write!(f, "recognizer is closed"),
        }
    }
}

impl std::error::Error for RecognizerError {}

/// Per-session upstream configuration: credentials plus the normalized
/// language pair.
#[derive(Debug, Clone)]
pub struct SpeechTranslationConfig {
    pub connection: ConnectionSettings,
    /// Normalized BCP-47 source language, e.g. `ja-JP`.
    pub source_language: String,
    /// Normalized ISO 639-1 target languages, e.g. `["en"]`.
    pub target_languages: Vec<String>,
}

/// How the audio pump ended.
enum AudioPumpExit {
    /// Stop was requested; nothing more to forward.
    Stopped,
    /// The audio source drained and closed.
    EndOfStream,
    /// An upstream write failed.
    Failed(UpstreamError),
}

/// Per-session speech translation state machine.
pub struct TranslationRecognizer {
    session_id: String,
    config: SpeechTranslationConfig,
    audio: Arc<AudioIngressBuffer>,

    pub recognizing: EventStream<TranslationEvent>,
    pub recognized: EventStream<TranslationEvent>,
    pub canceled: EventStream<CanceledEvent>,
    pub session_started: EventStream<SessionEvent>,
    pub session_stopped: EventStream<SessionEvent>,
    pub speech_start_detected: EventStream<SpeechBoundaryEvent>,
    pub speech_end_detected: EventStream<SpeechBoundaryEvent>,

    running: AtomicBool,
    closed: AtomicBool,
    created_at: Instant,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    connection: Mutex<Option<Arc<UpstreamConnection>>>,
}

impl TranslationRecognizer {
    pub fn new(
        session_id: String,
        config: SpeechTranslationConfig,
        audio: Arc<AudioIngressBuffer>,
    ) -> Self {
        Self {
            session_id,
            config,
            audio,
            recognizing: EventStream::new(),
            recognized: EventStream::new(),
            canceled: EventStream::new(),
            session_started: EventStream::new(),
            session_stopped: EventStream::new(),
            speech_start_detected: EventStream::new(),
            speech_end_detected: EventStream::new(),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
            stop_tx: Mutex::new(None),
            worker: Mutex::new(None),
            connection: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn audio(&self) -> &Arc<AudioIngressBuffer> {
        &self.audio
    }

    /// Start continuous recognition. Spawns the session worker; events are
    /// delivered through the event streams.
    pub fn start_continuous(self: &Arc<Self>) -> Result<(), RecognizerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RecognizerError::Closed);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RecognizerError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop_tx.lock().unwrap() = Some(stop_tx);

        let recognizer = Arc::clone(self);
        let handle = tokio::spawn(async move {
            recognizer.continuous_worker(stop_rx).await;
        });
        *self.worker.lock().unwrap() = Some(handle);

        Ok(())
    }

    /// Request the worker to stop. The worker observes the signal at its
    /// next loop iteration and winds the session down.
    pub fn stop_continuous(&self) -> Result<(), RecognizerError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RecognizerError::NotRunning);
        }
        self.signal_stop();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn signal_stop(&self) {
        if let Some(tx) = self.stop_tx.lock().unwrap().as_ref() {
            let _ = tx.send(true);
        }
    }

    /// Stop recognition, wait for the worker, disconnect every event stream,
    /// and close the audio source. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.signal_stop();

        // Closing the upstream socket first unblocks a worker stuck on a
        // write, so the join below cannot hang.
        let connection = self.connection.lock().unwrap().clone();
        if let Some(connection) = connection {
            connection.close().await;
        }

        let worker = self.worker.lock().unwrap().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    // The worker died before finish(); emit the terminal
                    // events it owed its listeners.
                    error!(session_id = %self.session_id, "session worker panicked during teardown");
                    self.running.store(false, Ordering::SeqCst);
                    self.raise_canceled(CancellationDetails::error(
                        CancellationErrorCode::RuntimeError,
                        "session worker terminated abnormally",
                    ));
                    self.raise_session_stopped();
                }
            }
        }

        self.recognizing.disconnect_all();
        self.recognized.disconnect_all();
        self.canceled.disconnect_all();
        self.session_started.disconnect_all();
        self.session_stopped.disconnect_all();
        self.speech_start_detected.disconnect_all();
        self.speech_end_detected.disconnect_all();

        self.audio.close();
    }

    /// Perform a single recognition: forward one audio chunk and wait for
    /// the first final result, bounded by a 30 second timeout.
    pub async fn recognize_once(self: &Arc<Self>) -> Result<RecognitionResult, CancellationDetails> {
        self.raise_session_started();

        let (connection, mut events) = match UpstreamConnection::connect(&self.config.connection).await
        {
            Ok(pair) => pair,
            Err(e) => {
                let details: CancellationDetails = e.into();
                self.raise_canceled(details.clone());
                self.raise_session_stopped();
                return Err(details);
            }
        };

        let request_id = Uuid::new_v4().to_string();
        let outcome = self.recognize_once_inner(&connection, &mut events, &request_id).await;
        connection.close().await;

        match outcome {
            Ok(result) => {
                self.raise_session_stopped();
                Ok(result)
            }
            Err(details) => {
                self.raise_canceled(details.clone());
                self.raise_session_stopped();
                Err(details)
            }
        }
    }

    async fn recognize_once_inner(
        self: &Arc<Self>,
        connection: &Arc<UpstreamConnection>,
        events: &mut mpsc::Receiver<Result<UpstreamEvent, UpstreamError>>,
        request_id: &str,
    ) -> Result<RecognitionResult, CancellationDetails> {
        connection
            .send_speech_config(
                request_id,
                &self.config.source_language,
                &self.config.target_languages,
            )
            .await
            .map_err(CancellationDetails::from)?;

        // One chunk only; empty reads back off the same way the pump does.
        let mut scratch = vec![0u8; AUDIO_CHUNK_BYTES];
        let n = loop {
            match self.audio.read(&mut scratch).await {
                Ok(0) => sleep(EMPTY_READ_BACKOFF).await,
                Ok(n) => break n,
                Err(_) => {
                    return Err(CancellationDetails::end_of_stream(
                        "no audio data available",
                    ))
                }
            }
        };

        self.raise_speech_start_detected();
        connection
            .send_audio_chunk(request_id, &scratch[..n])
            .await
            .map_err(CancellationDetails::from)?;

        let mut current_segment = None;
        let wait_for_final = async {
            loop {
                match events.recv().await {
                    Some(Ok(event)) => {
                        if let UpstreamEvent::Phrase(ref result) = event {
                            if result.is_final() {
                                let mut result = result.clone();
                                self.stamp_segment(&mut result, &mut current_segment);
                                return Ok(result);
                            }
                        }
                        if let Some(details) = self.dispatch_event(event, &mut current_segment) {
                            return Err(details);
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        return Err(CancellationDetails::end_of_stream(
                            "upstream closed the connection",
                        ))
                    }
                }
            }
        };

        let result = match timeout(RECOGNIZE_ONCE_TIMEOUT, wait_for_final).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(CancellationDetails::error(
                    CancellationErrorCode::ServiceTimeout,
                    "timed out waiting for a final recognition result",
                ))
            }
        };

        self.raise_speech_end_detected();
        self.recognized.signal(&TranslationEvent {
            session_id: self.session_id.clone(),
            result: result.clone(),
        });
        Ok(result)
    }

    /// The continuous-recognition worker: one per started session.
    async fn continuous_worker(self: Arc<Self>, stop_rx: watch::Receiver<bool>) {
        self.raise_session_started();

        let (connection, mut events) = match UpstreamConnection::connect(&self.config.connection).await
        {
            Ok(pair) => pair,
            Err(e) => {
                self.raise_canceled(e.into());
                self.finish();
                return;
            }
        };
        *self.connection.lock().unwrap() = Some(Arc::clone(&connection));

        let request_id = Uuid::new_v4().to_string();
        if let Err(e) = connection
            .send_speech_config(
                &request_id,
                &self.config.source_language,
                &self.config.target_languages,
            )
            .await
        {
            self.raise_canceled(e.into());
            connection.close().await;
            self.finish();
            return;
        }

        info!(session_id = %self.session_id, "streaming session configured upstream");

        let (pump_tx, mut pump_rx) = mpsc::channel(1);
        let pump_handle = tokio::spawn(audio_pump(
            Arc::clone(&self.audio),
            Arc::clone(&connection),
            request_id,
            stop_rx.clone(),
            pump_tx,
        ));

        let mut stop_rx = stop_rx;
        let mut current_segment = None;
        let mut failure: Option<CancellationDetails> = None;

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    debug!(session_id = %self.session_id, "stop requested");
                    break;
                }
                exit = pump_rx.recv() => {
                    match exit {
                        Some(AudioPumpExit::Stopped) | Some(AudioPumpExit::EndOfStream) => {}
                        Some(AudioPumpExit::Failed(e)) => failure = Some(e.into()),
                        None => {}
                    }
                    break;
                }
                event = events.recv() => {
                    match event {
                        Some(Ok(event)) => {
                            if let Some(details) = self.dispatch_event(event, &mut current_segment) {
                                failure = Some(details);
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            failure = Some(e.into());
                            break;
                        }
                        None => {
                            failure = Some(CancellationDetails::end_of_stream(
                                "upstream closed the connection",
                            ));
                            break;
                        }
                    }
                }
            }
        }

        // Stopping: stop the pump, close upstream, then join the pump so no
        // task outlives the session.
        self.signal_stop();
        connection.close().await;
        if let Err(e) = pump_handle.await {
            if e.is_panic() {
                error!(session_id = %self.session_id, "audio pump panicked");
                failure = Some(CancellationDetails::error(
                    CancellationErrorCode::RuntimeError,
                    "audio pump terminated abnormally",
                ));
            }
        }

        if let Some(details) = failure {
            self.raise_canceled(details);
        }
        self.finish();
    }

    /// Fan one decoded upstream event onto the event streams. Returns
    /// cancellation details when the event ends the session.
    fn dispatch_event(
        &self,
        event: UpstreamEvent,
        current_segment: &mut Option<String>,
    ) -> Option<CancellationDetails> {
        match event {
            UpstreamEvent::TurnStarted => {
                *current_segment = Some(Uuid::new_v4().to_string());
                self.raise_speech_start_detected();
                None
            }
            UpstreamEvent::TurnEnded => {
                self.raise_speech_end_detected();
                *current_segment = None;
                None
            }
            UpstreamEvent::Hypothesis(mut result) => {
                self.stamp_segment(&mut result, current_segment);
                self.recognizing.signal(&TranslationEvent {
                    session_id: self.session_id.clone(),
                    result,
                });
                None
            }
            UpstreamEvent::Phrase(mut result) => {
                self.stamp_segment(&mut result, current_segment);
                let event = TranslationEvent {
                    session_id: self.session_id.clone(),
                    result,
                };
                if event.result.reason == ResultReason::Hypothesis {
                    self.recognizing.signal(&event);
                } else {
                    self.recognized.signal(&event);
                }
                None
            }
            UpstreamEvent::ServiceError { code, message } => {
                Some(CancellationDetails::error(code, message))
            }
        }
    }

    /// Give a result the current turn's segment id unless the frame carried
    /// its own.
    fn stamp_segment(&self, result: &mut RecognitionResult, current_segment: &mut Option<String>) {
        if !result.segment_id.is_empty() {
            return;
        }
        let segment = current_segment
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        result.segment_id = segment;
    }

    fn finish(&self) {
        *self.connection.lock().unwrap() = None;
        self.running.store(false, Ordering::SeqCst);
        self.raise_session_stopped();
    }

    fn offset_nanos(&self) -> i64 {
        self.created_at.elapsed().as_nanos() as i64
    }

    fn raise_session_started(&self) {
        self.session_started.signal(&SessionEvent {
            session_id: self.session_id.clone(),
        });
    }

    fn raise_session_stopped(&self) {
        self.session_stopped.signal(&SessionEvent {
            session_id: self.session_id.clone(),
        });
    }

    fn raise_speech_start_detected(&self) {
        self.speech_start_detected.signal(&SpeechBoundaryEvent {
            session_id: self.session_id.clone(),
            offset_nanos: self.offset_nanos(),
        });
    }

    fn raise_speech_end_detected(&self) {
        self.speech_end_detected.signal(&SpeechBoundaryEvent {
            session_id: self.session_id.clone(),
            offset_nanos: self.offset_nanos(),
        });
    }

    fn raise_canceled(&self, details: CancellationDetails) {
        info!(session_id = %self.session_id, "session canceled: {}", details);
        self.canceled.signal(&CanceledEvent {
            session_id: self.session_id.clone(),
            details,
        });
    }
}

/// Pump audio chunks from the ingress buffer into the upstream connection
/// until stopped, drained, or failed.
async fn audio_pump(
    audio: Arc<AudioIngressBuffer>,
    connection: Arc<UpstreamConnection>,
    request_id: String,
    mut stop_rx: watch::Receiver<bool>,
    exit_tx: mpsc::Sender<AudioPumpExit>,
) {
    let mut scratch = vec![0u8; AUDIO_CHUNK_BYTES];

    let exit = loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break AudioPumpExit::Stopped,
            read = audio.read(&mut scratch) => match read {
                // Empty read without EOF: yield briefly, do not terminate.
                Ok(0) => sleep(EMPTY_READ_BACKOFF).await,
                Ok(n) => {
                    if let Err(e) = connection.send_audio_chunk(&request_id, &scratch[..n]).await {
                        break AudioPumpExit::Failed(e);
                    }
                }
                Err(StreamError::EndOfStream) | Err(StreamError::Closed) => {
                    break AudioPumpExit::EndOfStream;
                }
            },
        }
    };

    let _ = exit_tx.try_send(exit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    fn test_config(key: &str) -> SpeechTranslationConfig {
        SpeechTranslationConfig {
            connection: ConnectionSettings {
                region: "japaneast".to_string(),
                subscription_key: key.to_string(),
                authorization_token: None,
                endpoint: None,
            },
            source_language: "ja-JP".to_string(),
            target_languages: vec!["en".to_string()],
        }
    }

    fn test_recognizer(key: &str) -> Arc<TranslationRecognizer> {
        Arc::new(TranslationRecognizer::new(
            "session-1".to_string(),
            test_config(key),
            Arc::new(AudioIngressBuffer::new(8)),
        ))
    }

    fn hypothesis(text: &str) -> UpstreamEvent {
        UpstreamEvent::Hypothesis(RecognitionResult {
            result_id: "r1".to_string(),
            segment_id: String::new(),
            text: text.to_string(),
            reason: ResultReason::Hypothesis,
            offset_nanos: 0,
            duration_nanos: 0,
            translations: HashMap::new(),
        })
    }

    fn final_phrase(text: &str) -> UpstreamEvent {
        UpstreamEvent::Phrase(RecognitionResult {
            result_id: "r2".to_string(),
            segment_id: String::new(),
            text: text.to_string(),
            reason: ResultReason::Recognized,
            offset_nanos: 0,
            duration_nanos: 0,
            translations: HashMap::new(),
        })
    }

    #[tokio::test]
    async fn test_missing_credentials_cancel_with_auth_failure() {
        let recognizer = test_recognizer("");
        let log = Arc::new(StdMutex::new(Vec::new()));

        {
            let log = Arc::clone(&log);
            recognizer
                .session_started
                .connect(move |_| log.lock().unwrap().push("started".to_string()));
        }
        {
            let log = Arc::clone(&log);
            recognizer.canceled.connect(move |event| {
                log.lock()
                    .unwrap()
                    .push(format!("canceled:{}", event.details.error_code));
            });
        }
        {
            let log = Arc::clone(&log);
            recognizer
                .session_stopped
                .connect(move |_| log.lock().unwrap().push("stopped".to_string()));
        }

        recognizer.start_continuous().unwrap();
        recognizer.close().await;

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "started".to_string(),
                "canceled:AuthenticationFailure".to_string(),
                "stopped".to_string(),
            ]
        );
        assert!(!recognizer.is_running());
    }

    #[tokio::test]
    async fn test_recognize_once_without_credentials_cancels() {
        let recognizer = test_recognizer("");
        let err = recognizer.recognize_once().await.unwrap_err();
        assert_eq!(err.error_code, CancellationErrorCode::AuthenticationFailure);
    }

    #[tokio::test]
    async fn test_stop_without_start_errors() {
        let recognizer = test_recognizer("key");
        assert_eq!(
            recognizer.stop_continuous(),
            Err(RecognizerError::NotRunning)
        );
    }

    #[tokio::test]
    async fn test_start_after_close_errors() {
        let recognizer = test_recognizer("key");
        recognizer.close().await;
        assert_eq!(recognizer.start_continuous(), Err(RecognizerError::Closed));
    }

    #[tokio::test]
    async fn test_close_disconnects_streams_and_closes_audio() {
        let recognizer = test_recognizer("key");
        recognizer.recognizing.connect(|_| {});
        assert!(recognizer.recognizing.is_connected());

        recognizer.close().await;
        assert!(!recognizer.recognizing.is_connected());
        assert!(recognizer.audio().is_closed());
    }

    #[tokio::test]
    async fn test_hypotheses_share_the_segment_of_their_final() {
        let recognizer = test_recognizer("key");
        let segments = Arc::new(StdMutex::new(Vec::new()));

        {
            let segments = Arc::clone(&segments);
            recognizer.recognizing.connect(move |event| {
                segments
                    .lock()
                    .unwrap()
                    .push(("interim", event.result.segment_id.clone()));
            });
        }
        {
            let segments = Arc::clone(&segments);
            recognizer.recognized.connect(move |event| {
                segments
                    .lock()
                    .unwrap()
                    .push(("final", event.result.segment_id.clone()));
            });
        }

        let mut segment = None;
        assert!(recognizer
            .dispatch_event(UpstreamEvent::TurnStarted, &mut segment)
            .is_none());
        assert!(recognizer
            .dispatch_event(hypothesis("kon"), &mut segment)
            .is_none());
        assert!(recognizer
            .dispatch_event(hypothesis("konnichi"), &mut segment)
            .is_none());
        assert!(recognizer
            .dispatch_event(final_phrase("konnichiwa"), &mut segment)
            .is_none());
        assert!(recognizer
            .dispatch_event(UpstreamEvent::TurnEnded, &mut segment)
            .is_none());

        let segments = segments.lock().unwrap();
        assert_eq!(segments.len(), 3);
        let first = &segments[0].1;
        assert!(!first.is_empty());
        assert!(segments.iter().all(|(_, id)| id == first));
        assert_eq!(segments[2].0, "final");

        // The turn ended, so the next turn gets a fresh segment.
        assert!(segment.is_none());
    }

    #[tokio::test]
    async fn test_service_error_event_ends_the_session() {
        let recognizer = test_recognizer("key");
        let mut segment = None;
        let details = recognizer
            .dispatch_event(
                UpstreamEvent::ServiceError {
                    code: CancellationErrorCode::ServiceUnavailable,
                    message: "maintenance".to_string(),
                },
                &mut segment,
            )
            .expect("service error should end the session");
        assert_eq!(details.error_code, CancellationErrorCode::ServiceUnavailable);
        assert_eq!(details.reason, crate::speech::result::CancellationReason::Error);
    }

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite;

    fn upstream_frame(path: &str, body: &str) -> String {
        format!(
            "Path: {}\r\nX-RequestId: fake\r\nX-Timestamp: 2025-01-01T00:00:00.000Z\r\nContent-Type: application/json\r\n\r\n{}",
            path, body
        )
    }

    fn endpoint_recognizer(endpoint: String) -> Arc<TranslationRecognizer> {
        let mut config = test_config("key");
        config.connection.endpoint = Some(endpoint);
        Arc::new(TranslationRecognizer::new(
            "session-1".to_string(),
            config,
            Arc::new(AudioIngressBuffer::new(8)),
        ))
    }

    async fn next_event(rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>) -> String {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_continuous_recognition_against_fake_upstream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            // The configuration envelope must arrive before anything else.
            let config_frame = match ws.next().await.unwrap().unwrap() {
                tungstenite::Message::Text(text) => text,
                other => panic!("expected configuration frame, got {:?}", other),
            };
            assert!(config_frame.starts_with("Path: speech.config\r\n"));
            assert!(config_frame.contains("\"speechRecognitionLanguage\":\"ja-JP\""));

            // Then the audio announcement and its binary chunk, in order.
            let audio_header = match ws.next().await.unwrap().unwrap() {
                tungstenite::Message::Text(text) => text,
                other => panic!("expected audio header, got {:?}", other),
            };
            assert!(audio_header.starts_with("Path: audio\r\n"));

            let chunk = match ws.next().await.unwrap().unwrap() {
                tungstenite::Message::Binary(data) => data,
                other => panic!("expected audio bytes, got {:?}", other),
            };
            assert_eq!(chunk.len(), 4096);

            ws.send(tungstenite::Message::Text(upstream_frame("turn.start", "{}")))
                .await
                .unwrap();
            ws.send(tungstenite::Message::Text(upstream_frame(
                "speech.hypothesis",
                r#"{"Text":"konnichi","Translations":{"en":"hel"}}"#,
            )))
            .await
            .unwrap();
            ws.send(tungstenite::Message::Text(upstream_frame(
                "speech.phrase",
                r#"{"RecognitionStatus":"Success","type":"final","NBest":[{"Display":"konnichiwa"}],"Translations":{"en":"hello"}}"#,
            )))
            .await
            .unwrap();
            ws.send(tungstenite::Message::Text(upstream_frame("turn.end", "{}")))
                .await
                .unwrap();

            // Drain until the client closes its side.
            while let Some(Ok(message)) = ws.next().await {
                if matches!(message, tungstenite::Message::Close(_)) {
                    break;
                }
            }
        });

        let recognizer = endpoint_recognizer(endpoint);
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        {
            let tx = event_tx.clone();
            recognizer.session_started.connect(move |_| {
                let _ = tx.send("started".to_string());
            });
        }
        {
            let tx = event_tx.clone();
            recognizer.recognizing.connect(move |event| {
                let _ = tx.send(format!(
                    "interim:{}:{}",
                    event.result.text, event.result.translations["en"]
                ));
            });
        }
        {
            let tx = event_tx.clone();
            recognizer.recognized.connect(move |event| {
                let _ = tx.send(format!(
                    "final:{}:{}",
                    event.result.text, event.result.translations["en"]
                ));
            });
        }
        {
            let tx = event_tx.clone();
            recognizer.canceled.connect(move |event| {
                let _ = tx.send(format!("canceled:{}", event.details.error_code));
            });
        }
        {
            let tx = event_tx;
            recognizer.session_stopped.connect(move |_| {
                let _ = tx.send("stopped".to_string());
            });
        }

        recognizer.audio().write(&vec![0u8; 4096]).await.unwrap();
        recognizer.start_continuous().unwrap();

        assert_eq!(next_event(&mut event_rx).await, "started");
        assert_eq!(next_event(&mut event_rx).await, "interim:konnichi:hel");
        assert_eq!(next_event(&mut event_rx).await, "final:konnichiwa:hello");

        recognizer.stop_continuous().unwrap();
        assert_eq!(next_event(&mut event_rx).await, "stopped");

        recognizer.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_upstream_close_cancels_with_end_of_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            // Accept the configuration, then hang up mid-session.
            let _ = ws.next().await;
            ws.close(None).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let recognizer = endpoint_recognizer(endpoint);
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        {
            let tx = event_tx.clone();
            recognizer.session_started.connect(move |_| {
                let _ = tx.send("started".to_string());
            });
        }
        {
            let tx = event_tx.clone();
            recognizer.canceled.connect(move |event| {
                let _ = tx.send(format!("canceled:{}", event.details.reason));
            });
        }
        {
            let tx = event_tx;
            recognizer.session_stopped.connect(move |_| {
                let _ = tx.send("stopped".to_string());
            });
        }

        recognizer.start_continuous().unwrap();

        assert_eq!(next_event(&mut event_rx).await, "started");
        assert_eq!(next_event(&mut event_rx).await, "canceled:EndOfStream");
        assert_eq!(next_event(&mut event_rx).await, "stopped");

        recognizer.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_frame_provided_segment_id_wins() {
        let recognizer = test_recognizer("key");
        let mut segment = Some("turn-segment".to_string());
        let mut result = RecognitionResult {
            result_id: "r".to_string(),
            segment_id: "frame-segment".to_string(),
            text: String::new(),
            reason: ResultReason::Hypothesis,
            offset_nanos: 0,
            duration_nanos: 0,
            translations: HashMap::new(),
        };
        recognizer.stamp_segment(&mut result, &mut segment);
        assert_eq!(result.segment_id, "frame-segment");
    }
}
