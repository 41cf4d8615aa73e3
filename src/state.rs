//! # Application State Management
//!
//! Shared state handed to every HTTP request handler and WebSocket actor.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Many handlers share ownership of the same data
//! - **Thread safety**: actix runs one App per worker thread, all pointing at the same state
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Many readers OR one writer at a time
//! - **Config**: read on every request, written only by `PUT /api/v1/config`
//!
//! ### Arc<dyn Trait>
//! - **Judge** and **store** are trait objects so tests can replace the
//!   language model and the database with in-process stand-ins

use crate::config::AppConfig;
use crate::judge::JudgeBackend;
use crate::store::GameSessionStore;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
///
/// ## Thread Safety Pattern:
/// Mutable data lives behind `Arc<RwLock<T>>`; collaborators are `Arc<dyn Trait>`
/// whose traits require `Send + Sync`. Cloning an `AppState` only clones the
/// `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and audio metrics, updated by middleware and WebSocket actors
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,

    /// Language model used by the judging endpoint
    pub judge: Arc<dyn JudgeBackend>,

    /// Pre-generated game content
    pub store: Arc<dyn GameSessionStore>,
}

/// Metrics collected across all HTTP requests and audio sessions.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since server start
    pub error_count: u64,

    /// Currently open audio WebSocket sessions
    pub active_sessions: u32,

    /// PCM frames produced by all finished audio sessions
    pub frames_emitted: u64,

    /// PCM frames dropped because the socket fell behind
    pub frames_dropped: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        judge: Arc<dyn JudgeBackend>,
        store: Arc<dyn GameSessionStore>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            judge,
            store,
        }
    }

    // Poisoned locks are recovered: metrics have no cross-field invariants.
    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
        Ok(())
    }

    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// The first request to an endpoint creates its entry with default values.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Reserve a slot for a new audio session.
    ///
    /// Returns `false` (and reserves nothing) when `max_concurrent_sessions`
    /// sessions are already open.
    pub fn try_open_session(&self) -> bool {
        let max_sessions = self.get_config().performance.max_concurrent_sessions;
        let mut metrics = self.write_metrics();
        if metrics.active_sessions as usize >= max_sessions {
            return false;
        }
        metrics.active_sessions += 1;
        true
    }

    /// Release an audio session slot and fold its frame counters into the totals.
    ///
    /// Guards against underflow in case a session is closed twice.
    pub fn close_session(&self, frames_emitted: u64, frames_dropped: u64) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
        metrics.frames_emitted += frames_emitted;
        metrics.frames_dropped += frames_dropped;
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average = Total Duration ÷ Number of Requests
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate from 0.0 (no errors) to 1.0 (every request failed).
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
    use super::test_support::default_state;

    #[test]
    fn test_session_limit() {
        let state = default_state();
        let mut config = state.get_config();
        config.performance.max_concurrent_sessions = 1;
        state.update_config(config).unwrap();

        assert!(state.try_open_session());
        assert!(!state.try_open_session());

        state.close_session(10, 2);
        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_sessions, 0);
        assert_eq!(metrics.frames_emitted, 10);
        assert_eq!(metrics.frames_dropped, 2);

        state.close_session(0, 0);
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = default_state();
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let metrics = state.get_metrics_snapshot();
        let health = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(health.request_count, 2);
        assert_eq!(health.average_duration_ms(), 20.0);
        assert_eq!(health.error_rate(), 0.5);
    }

    #[test]
    fn test_invalid_config_update_is_rejected() {
        let state = default_state();
        let mut config = state.get_config();
        config.audio.frame_size = 0;
        assert!(state.update_config(config).is_err());
        assert_eq!(state.get_config().audio.frame_size, 4096);
    }
}
