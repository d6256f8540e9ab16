//! # Streaming Client Bridge
//!
//! WebSocket endpoint for streaming translation sessions
//! (`/api/v1/streaming/ws/{session_id}`). Each connection is one actor and
//! one session.
//!
//! ## Protocol:
//! 1. **Setup**: the first text frame is JSON
//!    `{sourceLanguage, targetLanguage, audioFormat}`; validation failures
//!    produce a single `{"error": …}` frame and a close.
//! 2. **Ready**: the server replies `{"status":"ready","sessionId":…}`.
//! 3. **Audio**: binary frames carry PCM (16kHz, 16-bit, mono) verbatim;
//!    the legacy text path `{"audio":{"data":<base64>}}` is also accepted.
//! 4. **Results**: the server pushes translated-text updates with
//!    `isFinal:false` (interim) or `isFinal:true` (final) per segment.
//! 5. **Control**: `{"type":"init"}` is answered with an init response;
//!    `{"type":"end"}` stops the session. Unknown messages are ignored.
//!
//! A session ends at most one way: client close, `end` control message,
//! recognizer cancellation, or idle eviction. All converge on the same
//! ordered teardown.

use crate::audio::AudioIngressBuffer;
use crate::registry::{CloseClient, StreamingSession};
use crate::service::{
    validate_streaming_request, StreamingTranslationRequest, StreamingTranslationResponse,
};
use crate::speech::{
    CancellationDetails, ConnectionSettings, RecognitionResult, SpeechTranslationConfig,
    TranslationRecognizer,
};
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often the server pings the client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Connections silent for longer than this are dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Delivers one recognition result to the client.
#[derive(Message)]
#[rtype(result = "()")]
struct ForwardResult {
    result: RecognitionResult,
    is_final: bool,
}

/// Delivers a cancellation to the client and starts teardown.
#[derive(Message)]
#[rtype(result = "()")]
struct SessionCanceled {
    details: CancellationDetails,
}

/// WebSocket actor bridging one client to one translation session.
pub struct TranslationWebSocket {
    /// Session id taken from the request path.
    session_id: String,

    state: web::Data<AppState>,

    /// Set once the setup frame has been accepted.
    session: Option<Arc<StreamingSession>>,

    configured: bool,
    tearing_down: bool,
    error_sent: bool,
    last_heartbeat: Instant,
}

impl TranslationWebSocket {
    pub fn new(session_id: String, state: web::Data<AppState>) -> Self {
        Self {
            session_id,
            state,
            session: None,
            configured: false,
            tearing_down: false,
            error_sent: false,
            last_heartbeat: Instant::now(),
        }
    }

    /// Handle the setup frame: validate, build the session, register it,
    /// reply ready, and start continuous recognition.
    fn handle_setup(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let setup: StreamingTranslationRequest = match serde_json::from_str(text) {
            Ok(setup) => setup,
            Err(e) => {
                self.fail(ctx, &format!("invalid setup message: {}", e));
                return;
            }
        };

        let validated = match validate_streaming_request(&setup) {
            Ok(validated) => validated,
            Err(message) => {
                self.fail(ctx, &message);
                return;
            }
        };

        let config = self.state.get_config();
        if self.state.registry().active_count() >= config.streaming.max_concurrent_sessions {
            self.fail(ctx, "maximum concurrent sessions reached");
            return;
        }

        let buffer = Arc::new(AudioIngressBuffer::new(config.streaming.ingress_capacity));
        let speech_config = SpeechTranslationConfig {
            connection: ConnectionSettings {
                region: config.speech.region.clone(),
                subscription_key: config.speech.subscription_key.clone(),
                authorization_token: None,
                endpoint: config.speech.streaming_endpoint.clone(),
            },
            source_language: validated.source_language.clone(),
            target_languages: vec![validated.target_language.clone()],
        };
        let recognizer = Arc::new(TranslationRecognizer::new(
            self.session_id.clone(),
            speech_config,
            buffer,
        ));

        let session = Arc::new(StreamingSession::new(
            self.session_id.clone(),
            validated.source_language,
            validated.target_language,
            validated.audio_format,
            Arc::clone(&recognizer),
        ));
        session.set_client(ctx.address().recipient());

        // Event callbacks capture only the actor address, never the
        // recognizer, so teardown owns no cycles. The actor mailbox
        // preserves the signal order of the session worker.
        let addr = ctx.address();
        {
            let addr = addr.clone();
            recognizer.recognizing.connect(move |event| {
                addr.do_send(ForwardResult {
                    result: event.result.clone(),
                    is_final: false,
                });
            });
        }
        {
            let addr = addr.clone();
            recognizer.recognized.connect(move |event| {
                addr.do_send(ForwardResult {
                    result: event.result.clone(),
                    is_final: true,
                });
            });
        }
        {
            let addr = addr.clone();
            recognizer.canceled.connect(move |event| {
                addr.do_send(SessionCanceled {
                    details: event.details.clone(),
                });
            });
        }
        {
            let addr = addr.clone();
            recognizer.session_stopped.connect(move |_| {
                addr.do_send(CloseClient);
            });
        }

        if let Err(e) = self.state.registry().insert(Arc::clone(&session)) {
            warn!(session_id = %self.session_id, "rejecting duplicate session: {}", e);
            self.fail(ctx, "session already active");
            return;
        }
        self.state.increment_active_sessions();
        self.session = Some(session);
        self.configured = true;

        ctx.text(
            json!({
                "status": "ready",
                "sessionId": self.session_id,
            })
            .to_string(),
        );

        if let Err(e) = recognizer.start_continuous() {
            error!(session_id = %self.session_id, "failed to start recognition: {}", e);
            self.fail(ctx, "failed to start continuous recognition");
            return;
        }

        info!(session_id = %self.session_id, "streaming session ready");
    }

    /// Handle a text frame after setup: control messages and the legacy
    /// base64 audio path.
    fn handle_control(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let message: serde_json::Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(session_id = %self.session_id, "ignoring unparseable text frame: {}", e);
                return;
            }
        };

        match message.get("type").and_then(|t| t.as_str()) {
            Some("init") => {
                ctx.text(
                    json!({
                        "type": "init_response",
                        "status": "ready",
                    })
                    .to_string(),
                );
            }
            Some("end") => {
                info!(session_id = %self.session_id, "client requested session end");
                self.begin_teardown(ctx, None);
            }
            _ => {
                let audio = message
                    .get("audio")
                    .and_then(|a| a.get("data"))
                    .and_then(|d| d.as_str());
                if let Some(encoded) = audio {
                    match BASE64.decode(encoded) {
                        Ok(bytes) => self.ingest_audio(bytes, ctx),
                        Err(e) => {
                            debug!(session_id = %self.session_id, "ignoring undecodable audio payload: {}", e);
                        }
                    }
                } else {
                    debug!(session_id = %self.session_id, "ignoring unknown control message");
                }
            }
        }
    }

    /// Feed one audio chunk into the session's ingress buffer.
    ///
    /// The write runs through `ctx.wait`, which pauses the mailbox until it
    /// completes: chunk order is preserved, and a full buffer stalls the
    /// client read loop, which is the backpressure contract.
    fn ingest_audio(&mut self, data: Vec<u8>, ctx: &mut ws::WebsocketContext<Self>) {
        if !self.configured {
            self.fail(ctx, "session not configured; send the setup frame first");
            return;
        }
        let Some(session) = self.session.clone() else {
            return;
        };

        session.touch();
        let write = async move { session.recognizer.audio().write(&data).await };
        ctx.wait(write.into_actor(self).map(|result, _act, _ctx| {
            if let Err(e) = result {
                // The buffer closes during teardown; late chunks are noise.
                debug!("dropped audio chunk: {}", e);
            }
        }));
    }

    /// Send the single error frame this session is allowed.
    fn send_error_frame(&mut self, ctx: &mut ws::WebsocketContext<Self>, message: &str) {
        if self.error_sent {
            return;
        }
        self.error_sent = true;
        ctx.text(json!({ "error": message }).to_string());
    }

    fn fail(&mut self, ctx: &mut ws::WebsocketContext<Self>, message: &str) {
        warn!(session_id = %self.session_id, "closing session: {}", message);
        self.begin_teardown(ctx, Some(message));
    }

    /// Idempotent, ordered teardown: error frame (at most one), stop and
    /// close the recognizer, remove the registry entry, close the socket.
    fn begin_teardown(&mut self, ctx: &mut ws::WebsocketContext<Self>, error: Option<&str>) {
        if let Some(message) = error {
            self.send_error_frame(ctx, message);
        }

        self.cleanup();
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Normal,
            description: None,
        }));
        ctx.stop();
    }

    /// Release the session exactly once; safe to call from every exit path.
    fn cleanup(&mut self) {
        if self.tearing_down {
            return;
        }
        self.tearing_down = true;

        let Some(session) = self.session.take() else {
            return;
        };
        let state = self.state.clone();

        // The upstream connection must be closed before the registry entry
        // disappears, so the removal happens after shutdown completes.
        tokio::spawn(async move {
            session.shutdown().await;
            state.registry().remove(&session.id);
            state.decrement_active_sessions();
        });
    }
}

impl Actor for TranslationWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "client websocket connected");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(session_id = %act.session_id, "client heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "client websocket closed");
        self.cleanup();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TranslationWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                if self.configured {
                    self.handle_control(&text, ctx);
                } else {
                    self.handle_setup(&text, ctx);
                }
            }
            Ok(ws::Message::Binary(data)) => {
                self.ingest_audio(data.to_vec(), ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, "client closed websocket: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.session_id, "unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                error!(session_id = %self.session_id, "websocket protocol error: {}", e);
                ctx.stop();
            }
        }
    }
}

impl Handler<ForwardResult> for TranslationWebSocket {
    type Result = ();

    fn handle(&mut self, msg: ForwardResult, ctx: &mut Self::Context) {
        let Some(session) = &self.session else {
            return;
        };

        // Results without a translation for the session's target (for
        // example no-match segments) are not forwarded.
        let Some(translated_text) = msg.result.translations.get(&session.target_language) else {
            debug!(
                session_id = %self.session_id,
                target = %session.target_language,
                "result carries no translation for the session target"
            );
            return;
        };

        let response = StreamingTranslationResponse {
            source_language: session.source_language.clone(),
            target_language: session.target_language.clone(),
            translated_text: translated_text.clone(),
            original_text: msg.result.text.clone(),
            is_final: msg.is_final,
            segment_id: msg.result.segment_id.clone(),
        };

        match serde_json::to_string(&response) {
            Ok(payload) => ctx.text(payload),
            Err(e) => error!(session_id = %self.session_id, "failed to serialize result: {}", e),
        }
    }
}

impl Handler<SessionCanceled> for TranslationWebSocket {
    type Result = ();

    fn handle(&mut self, msg: SessionCanceled, ctx: &mut Self::Context) {
        warn!(session_id = %self.session_id, "session canceled: {}", msg.details);
        self.begin_teardown(ctx, Some(&msg.details.error_details));
    }
}

impl Handler<CloseClient> for TranslationWebSocket {
    type Result = ();

    fn handle(&mut self, _msg: CloseClient, ctx: &mut Self::Context) {
        self.begin_teardown(ctx, None);
    }
}

/// HTTP entry point performing the WebSocket upgrade.
pub async fn streaming_websocket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let session_id = path.into_inner();
    info!(
        session_id = %session_id,
        peer = ?req.connection_info().realip_remote_addr(),
        "websocket upgrade requested"
    );

    ws::start(TranslationWebSocket::new(session_id, state), &req, stream)
}
