//! # Audio Ingress Module
//!
//! Carries client audio toward the upstream speech service. The service
//! accepts one fixed PCM format (16kHz, 16-bit, mono, little-endian) and
//! forwards the bytes unchanged; the only component here is the bounded
//! ingress buffer that decouples the client's send rate from the upstream
//! write rate.

pub mod buffer;

pub use buffer::{AudioIngressBuffer, StreamError};
