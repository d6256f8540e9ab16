//! # Typed Event Streams
//!
//! Each recognizer exposes one stream per event kind. A stream is an
//! unordered set of callbacks plus a synchronous `signal` that invokes every
//! registered callback on the caller's task, preserving dispatch order.
//! Streams are typed per event, so callbacks receive concrete argument
//! structs and never downcast.

use crate::speech::result::{CancellationDetails, RecognitionResult};
use std::sync::{Arc, RwLock};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A connectable set of callbacks for one event kind.
pub struct EventStream<T> {
    callbacks: RwLock<Vec<Callback<T>>>,
}

impl<T> EventStream<T> {
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Register a callback. Callbacks stay connected until
    /// [`EventStream::disconnect_all`].
    pub fn connect<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.callbacks.write().unwrap().push(Arc::new(callback));
    }

    /// Drop every registered callback atomically.
    pub fn disconnect_all(&self) {
        self.callbacks.write().unwrap().clear();
    }

    /// Invoke every registered callback synchronously with `args`.
    pub fn signal(&self, args: &T) {
        // Clone the list so a callback may connect/disconnect without
        // deadlocking on the stream's own lock.
        let callbacks: Vec<Callback<T>> = self.callbacks.read().unwrap().clone();
        for callback in callbacks {
            callback(args);
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.callbacks.read().unwrap().is_empty()
    }
}

impl<T> Default for EventStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Argument for `session_started` / `session_stopped`.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub session_id: String,
}

/// Argument for `speech_start_detected` / `speech_end_detected`.
#[derive(Debug, Clone)]
pub struct SpeechBoundaryEvent {
    pub session_id: String,
    pub offset_nanos: i64,
}

/// Argument for `recognizing` / `recognized`.
#[derive(Debug, Clone)]
pub struct TranslationEvent {
    pub session_id: String,
    pub result: RecognitionResult,
}

/// Argument for `canceled`.
#[derive(Debug, Clone)]
pub struct CanceledEvent {
    pub session_id: String,
    pub details: CancellationDetails,
}
