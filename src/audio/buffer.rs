//! # Audio Ingress Buffer
//!
//! Bounded FIFO of opaque PCM byte chunks sitting between the client-driven
//! ingress rate and the upstream-driven egress rate. The buffer neither
//! batches nor reorders: one `write` enqueues one chunk, one `read` dequeues
//! one chunk.
//!
//! ## Contract:
//! - **Single producer, single consumer**: the client read loop writes, the
//!   recognizer's audio pump reads.
//! - **Backpressure**: `write` awaits capacity when the queue is full, which
//!   in turn stalls the client read loop and throttles the client naturally.
//! - **Close semantics**: after `close`, writes fail with
//!   [`StreamError::Closed`]; the reader drains every chunk enqueued before
//!   the close and then observes [`StreamError::EndOfStream`].

use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Errors surfaced by buffer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// The buffer was closed before or during a `write`.
    Closed,
    /// The buffer was closed and all enqueued chunks have been read.
    EndOfStream,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Closed => write!(f, "audio stream is closed"),
            StreamError::EndOfStream => write!(f, "end of audio stream"),
        }
    }
}

impl std::error::Error for StreamError {}

/// Bounded producer/consumer queue of copied audio chunks.
///
/// Built on a `tokio::sync::mpsc` channel: the channel bound supplies the
/// backpressure, and dropping the sender on `close` gives the drain-then-EOF
/// behavior on the receiving side.
pub struct AudioIngressBuffer {
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl AudioIngressBuffer {
    /// Create a buffer bounded at `capacity` chunks.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Copy `data` and enqueue it, waiting for capacity if the buffer is
    /// full. Callers may reuse their byte buffer immediately.
    pub async fn write(&self, data: &[u8]) -> Result<(), StreamError> {
        // Clone the sender out of the lock so the await below happens
        // without holding it.
        let tx = match self.tx.lock().unwrap().as_ref() {
            Some(tx) => tx.clone(),
            None => return Err(StreamError::Closed),
        };

        tx.send(data.to_vec()).await.map_err(|_| StreamError::Closed)
    }

    /// Dequeue one chunk and copy up to `dst.len()` bytes of it into `dst`,
    /// returning the number of bytes copied. Bytes of a chunk beyond
    /// `dst.len()` are discarded. A zero-length chunk yields `Ok(0)` without
    /// meaning end of stream.
    pub async fn read(&self, dst: &mut [u8]) -> Result<usize, StreamError> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(chunk) => {
                let n = chunk.len().min(dst.len());
                dst[..n].copy_from_slice(&chunk[..n]);
                Ok(n)
            }
            None => Err(StreamError::EndOfStream),
        }
    }

    /// Close the buffer. Idempotent. Pending and future writes fail; the
    /// reader still drains chunks enqueued before the close.
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap().is_none()
    }
}
