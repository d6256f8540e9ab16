//! # Application State Management
//!
//! Shared state that every HTTP request handler and WebSocket actor can
//! reach: the configuration, the request/session metrics, the session
//! registry, and the speech service handle.
//!
//! ## Thread Safety Pattern:
//! Mutable data lives behind `Arc<RwLock<T>>`: many requests read
//! concurrently, one writer at a time. Everything else (registry, speech
//! service) is internally synchronized and shared by `Arc` alone. There is
//! no process-wide mutable state outside this struct.

use crate::config::AppConfig;
use crate::registry::SessionRegistry;
use crate::service::SpeechService;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration, set once at startup.
    config: Arc<RwLock<AppConfig>>,

    /// Performance metrics, updated by every request.
    metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started. `Instant` is `Copy`, no lock needed.
    start_time: Instant,

    /// Live streaming sessions.
    registry: Arc<SessionRegistry>,

    /// Capability handle for translation operations; swappable with a fake
    /// in tests.
    speech: Arc<dyn SpeechService>,
}

/// Performance metrics collected across all requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total HTTP requests processed since server start.
    pub request_count: u64,

    /// Total errors since server start.
    pub error_count: u64,

    /// Currently connected streaming sessions.
    pub active_sessions: u32,

    /// Per-endpoint statistics, keyed by "METHOD /path".
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Metrics for a single API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        registry: Arc<SessionRegistry>,
        speech: Arc<dyn SpeechService>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            registry,
            speech,
        }
    }

    /// Get a copy of the current configuration. Cloning releases the lock
    /// immediately; `AppConfig` is cheap to clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn speech(&self) -> &Arc<dyn SpeechService> {
        &self.speech
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for one request to `endpoint`.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Called when a streaming session is registered.
    pub fn increment_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_sessions += 1;
    }

    /// Called when a streaming session is torn down. Guarded against
    /// underflow so double teardown cannot panic the metrics path.
    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// A consistent snapshot of the metrics; cloned so no lock is held
    /// while the response serializes.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_sessions: metrics.active_sessions,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint, in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::AzureSpeechService;

    fn test_state() -> AppState {
        let registry = Arc::new(SessionRegistry::new());
        let config = AppConfig::default();
        let speech = Arc::new(AzureSpeechService::new(
            config.speech.clone(),
            Arc::clone(&registry),
        ));
        AppState::new(config, registry, speech)
    }

    #[test]
    fn test_request_and_error_counters() {
        let state = test_state();
        state.increment_request_count();
        state.increment_request_count();
        state.increment_error_count();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 1);
    }

    #[test]
    fn test_active_session_gauge_does_not_underflow() {
        let state = test_state();
        state.decrement_active_sessions();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);

        state.increment_active_sessions();
        state.increment_active_sessions();
        state.decrement_active_sessions();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 1);
    }

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = test_state();
        state.record_endpoint_request("POST /api/v1/translate", 20, false);
        state.record_endpoint_request("POST /api/v1/translate", 40, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["POST /api/v1/translate"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.error_count, 1);
        assert_eq!(metric.average_duration_ms(), 30.0);
        assert_eq!(metric.error_rate(), 0.5);
    }
}
