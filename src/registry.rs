//! # Session Registry
//!
//! Process-global mapping from session id to live session record, shared by
//! the WebSocket bridge, the REST close handler, and the background idle
//! sweeper.
//!
//! ## Locking:
//! A reader-writer lock guards the map: `get` takes the read side,
//! `insert`/`remove` the write side. The sweeper uses the `try_` variants
//! so a contended lock or a slow teardown can never stall other sessions;
//! eviction work itself runs on spawned tasks.
//!
//! ## Teardown order:
//! stop recognition → close the recognizer (and with it the upstream
//! connection and audio source) → remove the registry entry → close the
//! client transport. A session id present in the map therefore always
//! refers to a recognizer that has not been closed.

use crate::speech::TranslationRecognizer;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Asks the owning client actor to close its WebSocket after the session
/// has been torn down.
#[derive(actix::Message)]
#[rtype(result = "()")]
pub struct CloseClient;

/// One live pairing of a client transport with an upstream transport.
pub struct StreamingSession {
    pub id: String,
    /// Normalized BCP-47 source language.
    pub source_language: String,
    /// Normalized ISO 639-1 target language.
    pub target_language: String,
    pub audio_format: String,
    pub recognizer: Arc<TranslationRecognizer>,
    client: Mutex<Option<actix::Recipient<CloseClient>>>,
    last_access: RwLock<Instant>,
}

impl StreamingSession {
    pub fn new(
        id: String,
        source_language: String,
        target_language: String,
        audio_format: String,
        recognizer: Arc<TranslationRecognizer>,
    ) -> Self {
        Self {
            id,
            source_language,
            target_language,
            audio_format,
            recognizer,
            client: Mutex::new(None),
            last_access: RwLock::new(Instant::now()),
        }
    }

    /// Attach the client actor so teardown can close its socket.
    pub fn set_client(&self, client: actix::Recipient<CloseClient>) {
        *self.client.lock().unwrap() = Some(client);
    }

    /// Record audio activity; sessions with recent activity are never
    /// idle-evicted.
    pub fn touch(&self) {
        *self.last_access.write().unwrap() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_access.read().unwrap().elapsed()
    }

    /// Stop and close the recognizer (which closes the upstream connection
    /// and the audio source), then tell the client actor to close.
    /// Idempotent through the recognizer's own close guard.
    pub async fn shutdown(&self) {
        let _ = self.recognizer.stop_continuous();
        self.recognizer.close().await;

        if let Some(client) = self.client.lock().unwrap().take() {
            client.do_send(CloseClient);
        }
    }
}

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    AlreadyExists(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AlreadyExists(id) => {
                write!(f, "session '{}' already exists", id)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Concurrent session id → session record map with idle eviction.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<StreamingSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a session. Fails if the id is already present, so a second
    /// client cannot hijack a running session.
    pub fn insert(&self, session: Arc<StreamingSession>) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.contains_key(&session.id) {
            return Err(RegistryError::AlreadyExists(session.id.clone()));
        }

        info!(session_id = %session.id, "registered streaming session");
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<StreamingSession>> {
        self.sessions.read().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<StreamingSession>> {
        let removed = self.sessions.write().unwrap().remove(id);
        if removed.is_some() {
            info!(session_id = %id, "removed streaming session");
        }
        removed
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Evict sessions idle for longer than `max_idle`. Best effort: a
    /// contended lock skips this round, and each eviction runs on its own
    /// task so one slow teardown cannot stall the rest. Returns the number
    /// of sessions scheduled for eviction.
    pub fn sweep(self: &Arc<Self>, max_idle: Duration) -> usize {
        let expired: Vec<Arc<StreamingSession>> = {
            let Ok(sessions) = self.sessions.try_read() else {
                debug!("session map contended, skipping sweep round");
                return 0;
            };
            sessions
                .values()
                .filter(|session| session.idle_for() > max_idle)
                .cloned()
                .collect()
        };

        for session in &expired {
            warn!(
                session_id = %session.id,
                idle_secs = session.idle_for().as_secs(),
                "evicting idle streaming session"
            );
            let registry = Arc::clone(self);
            let session = Arc::clone(session);
            tokio::spawn(async move {
                session.shutdown().await;
                registry.remove(&session.id);
            });
        }

        expired.len()
    }

    /// Run `sweep` every `interval` until the task is aborted.
    pub fn run_sweeper(self: &Arc<Self>, interval: Duration, max_idle: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a fresh process
            // never sweeps before sessions had a chance to start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = registry.sweep(max_idle);
                if evicted > 0 {
                    info!(evicted, "idle sweep finished");
                }
            }
        })
    }

    /// Tear down every session, in registry order, waiting for each. Used
    /// on graceful shutdown so every client sees its terminal event and a
    /// normal close.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<StreamingSession>> = {
            let mut map = self.sessions.write().unwrap();
            map.drain().map(|(_, session)| session).collect()
        };

        for session in sessions {
            info!(session_id = %session.id, "closing session for shutdown");
            session.shutdown().await;
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
