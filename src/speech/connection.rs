//! # Upstream Connection
//!
//! One outbound WebSocket to the speech service per session. Writes are
//! serialized through a single mutex-guarded sink so the configuration
//! envelope, each `audio` announcement frame, and each binary audio frame
//! arrive in strict order. A dedicated reader task decodes inbound frames
//! into typed events and pushes them onto a channel; the channel closing is
//! the end-of-stream signal.

use crate::speech::protocol::{self, UpstreamEvent};
use crate::speech::result::{CancellationDetails, CancellationErrorCode};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, tungstenite::Message>;

/// Capacity of the decoded-event channel between the reader task and the
/// recognizer.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Failure while dialing, writing to, or reading from the upstream socket.
#[derive(Debug, Clone)]
pub struct UpstreamError {
    pub code: CancellationErrorCode,
    pub details: String,
}

impl UpstreamError {
    pub fn connection(details: impl Into<String>) -> Self {
        Self {
            code: CancellationErrorCode::ConnectionFailure,
            details: details.into(),
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.details)
    }
}

impl std::error::Error for UpstreamError {}

impl From<UpstreamError> for CancellationDetails {
    fn from(err: UpstreamError) -> Self {
        CancellationDetails::error(err.code, err.details)
    }
}

/// Credentials and region for dialing the speech service.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub region: String,
    pub subscription_key: String,
    /// Bearer token, preferred over the subscription key when present.
    pub authorization_token: Option<String>,
    /// Full WebSocket URL overriding the region-derived endpoint, for
    /// sovereign clouds and tests.
    pub endpoint: Option<String>,
}

impl ConnectionSettings {
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!(
                "wss://{}.stt.speech.microsoft.com/speech/universal/v2",
                self.region
            ),
        }
    }

    /// The value carried in the `Authorization` header: the token when set,
    /// otherwise the subscription key.
    fn bearer(&self) -> &str {
        self.authorization_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.subscription_key)
    }
}

/// Build the upgrade request with the service's required headers.
fn build_ws_request(
    settings: &ConnectionSettings,
    connection_id: &str,
) -> Result<tungstenite::http::Request<()>, UpstreamError> {
    if settings.bearer().is_empty() {
        return Err(UpstreamError {
            code: CancellationErrorCode::AuthenticationFailure,
            details: "no subscription key or authorization token configured".to_string(),
        });
    }

    tungstenite::http::Request::builder()
        .uri(settings.endpoint_url())
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .header("Authorization", format!("Bearer {}", settings.bearer()))
        .header("Ocp-Apim-Subscription-Key", &settings.subscription_key)
        .header("X-ConnectionId", connection_id)
        .body(())
        .map_err(|e| UpstreamError::connection(format!("failed to build upgrade request: {}", e)))
}

/// A live upstream WebSocket with serialized writes and a running reader.
pub struct UpstreamConnection {
    sink: Mutex<WsSink>,
    closed: AtomicBool,
    connection_id: String,
}

impl UpstreamConnection {
    /// Dial the service. On success returns the connection and the channel
    /// of decoded events; the channel closes when the upstream stream ends.
    pub async fn connect(
        settings: &ConnectionSettings,
    ) -> Result<
        (
            Arc<UpstreamConnection>,
            mpsc::Receiver<Result<UpstreamEvent, UpstreamError>>,
        ),
        UpstreamError,
    > {
        let connection_id = Uuid::new_v4().to_string();
        let request = build_ws_request(settings, &connection_id)?;
        let url = settings.endpoint_url();

        debug!(url = %url, connection_id = %connection_id, "dialing upstream speech service");

        let ws_stream = match connect_async(request).await {
            Ok((stream, _response)) => stream,
            Err(tungstenite::Error::Http(response)) => {
                let status = response.status();
                return Err(UpstreamError {
                    code: CancellationErrorCode::from_http_status(status.as_u16()),
                    details: format!("upstream rejected connection with status {}", status),
                });
            }
            Err(e) => {
                return Err(UpstreamError::connection(format!(
                    "failed to connect to speech service: {}",
                    e
                )));
            }
        };

        let (sink, stream) = ws_stream.split();
        let connection = Arc::new(UpstreamConnection {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
            connection_id,
        });

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(read_loop(stream, event_tx, Arc::clone(&connection)));

        Ok((connection, event_rx))
    }

    /// Send the per-session configuration envelope.
    pub async fn send_speech_config(
        &self,
        request_id: &str,
        source_language: &str,
        target_languages: &[String],
    ) -> Result<(), UpstreamError> {
        let frame = protocol::encode_speech_config(request_id, source_language, target_languages);
        self.send_text(frame).await
    }

    /// Send one audio chunk: the `audio` announcement text frame followed by
    /// the binary frame, under one sink lock so no other write interleaves.
    pub async fn send_audio_chunk(
        &self,
        request_id: &str,
        data: &[u8],
    ) -> Result<(), UpstreamError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(UpstreamError::connection("connection is closed"));
        }

        let header = protocol::encode_audio_header(request_id);
        let mut sink = self.sink.lock().await;
        sink.send(tungstenite::Message::Text(header))
            .await
            .map_err(|e| UpstreamError::connection(format!("failed to send audio header: {}", e)))?;
        sink.send(tungstenite::Message::Binary(data.to_vec()))
            .await
            .map_err(|e| UpstreamError::connection(format!("failed to send audio data: {}", e)))
    }

    async fn send_text(&self, frame: String) -> Result<(), UpstreamError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(UpstreamError::connection("connection is closed"));
        }

        let mut sink = self.sink.lock().await;
        sink.send(tungstenite::Message::Text(frame))
            .await
            .map_err(|e| UpstreamError::connection(format!("failed to send frame: {}", e)))
    }

    /// Close the connection. Idempotent; subsequent writes fail and the
    /// reader task winds down with end-of-stream.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(connection_id = %self.connection_id, "error closing upstream sink: {}", e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Decode inbound frames until the stream ends. Decoded events go onto
/// `event_tx`; the channel closing signals end-of-stream to the consumer.
async fn read_loop(
    mut stream: SplitStream<WsStream>,
    event_tx: mpsc::Sender<Result<UpstreamEvent, UpstreamError>>,
    connection: Arc<UpstreamConnection>,
) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(tungstenite::Message::Text(text)) => match protocol::decode_text_frame(&text) {
                Ok(Some(event)) => {
                    if event_tx.send(Ok(event)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(connection_id = %connection.connection_id, "skipping malformed upstream frame: {}", e);
                }
            },
            Ok(tungstenite::Message::Binary(data)) => {
                debug!(
                    connection_id = %connection.connection_id,
                    "ignoring {} byte binary frame from upstream",
                    data.len()
                );
            }
            Ok(tungstenite::Message::Ping(_))
            | Ok(tungstenite::Message::Pong(_))
            | Ok(tungstenite::Message::Frame(_)) => {}
            Ok(tungstenite::Message::Close(frame)) => {
                debug!(connection_id = %connection.connection_id, "upstream closed the connection: {:?}", frame);
                break;
            }
            Err(e) => {
                // Errors after a local close are the expected teardown noise.
                if !connection.is_closed() {
                    let _ = event_tx
                        .send(Err(UpstreamError::connection(format!(
                            "upstream read error: {}",
                            e
                        ))))
                        .await;
                }
                break;
            }
        }
    }

    debug!(connection_id = %connection.connection_id, "upstream reader finished");
}
