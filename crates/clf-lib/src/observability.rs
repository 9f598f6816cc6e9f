//! Observability infrastructure for the filter class predictor
//!
//! Provides:
//! - Prometheus metrics (prediction latency, retrain decisions, session errors, model generation)
//! - Structured JSON logging with tracing

use crate::policy::RetrainOutcome;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ClfMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct ClfMetricsInner {
    prediction_latency_seconds: Histogram,
    predictions: IntCounter,
    default_fallbacks: IntCounter,
    retrains: IntCounter,
    retrains_skipped: IntCounter,
    training_failures: IntCounter,
    session_errors: IntCounterVec,
    active_sessions: IntGauge,
    model_generation: IntGauge,
    last_relative_deviation: Gauge,
}

impl ClfMetricsInner {
    fn new() -> Self {
        Self {
            prediction_latency_seconds: register_histogram!(
                "filter_clf_prediction_latency_seconds",
                "Time spent predicting the filter class of one feature row",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            predictions: register_int_counter!(
                "filter_clf_predictions_total",
                "Total number of predict directives served"
            )
            .expect("Failed to register predictions_total"),

            default_fallbacks: register_int_counter!(
                "filter_clf_default_class_fallbacks_total",
                "Predictions answered with the default class because no model exists"
            )
            .expect("Failed to register default_class_fallbacks_total"),

            retrains: register_int_counter!(
                "filter_clf_retrains_total",
                "Number of model generations published"
            )
            .expect("Failed to register retrains_total"),

            retrains_skipped: register_int_counter!(
                "filter_clf_retrains_skipped_total",
                "Train directives where the active model was kept"
            )
            .expect("Failed to register retrains_skipped_total"),

            training_failures: register_int_counter!(
                "filter_clf_training_failures_total",
                "Retrain attempts that failed to fit, persist or reload a model"
            )
            .expect("Failed to register training_failures_total"),

            session_errors: register_int_counter_vec!(
                "filter_clf_session_errors_total",
                "Sessions terminated by an error, by error kind",
                &["kind"]
            )
            .expect("Failed to register session_errors_total"),

            active_sessions: register_int_gauge!(
                "filter_clf_active_sessions",
                "Number of currently open client sessions"
            )
            .expect("Failed to register active_sessions"),

            model_generation: register_int_gauge!(
                "filter_clf_model_generation",
                "Generation of the active model, 0 when none is trained"
            )
            .expect("Failed to register model_generation"),

            last_relative_deviation: register_gauge!(
                "filter_clf_last_relative_deviation",
                "Relative cost deviation measured by the latest evaluation"
            )
            .expect("Failed to register last_relative_deviation"),
        }
    }
}

/// Predictor metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ClfMetrics {
    _private: (),
}

impl Default for ClfMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ClfMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ClfMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ClfMetricsInner {
        GLOBAL_METRICS.get_or_init(ClfMetricsInner::new)
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        self.inner().prediction_latency_seconds.observe(duration_secs);
    }

    pub fn inc_predictions(&self) {
        self.inner().predictions.inc();
    }

    pub fn inc_default_fallbacks(&self) {
        self.inner().default_fallbacks.inc();
    }

    pub fn inc_retrains(&self) {
        self.inner().retrains.inc();
    }

    pub fn inc_retrains_skipped(&self) {
        self.inner().retrains_skipped.inc();
    }

    pub fn inc_training_failures(&self) {
        self.inner().training_failures.inc();
    }

    /// Count a session that ended with an error of the given kind
    pub fn inc_session_errors(&self, kind: &str) {
        self.inner().session_errors.with_label_values(&[kind]).inc();
    }

    pub fn session_opened(&self) {
        self.inner().active_sessions.inc();
    }

    pub fn session_closed(&self) {
        self.inner().active_sessions.dec();
    }

    pub fn set_model_generation(&self, generation: u64) {
        self.inner()
            .model_generation
            .set(i64::try_from(generation).unwrap_or(i64::MAX));
    }

    pub fn set_last_deviation(&self, deviation: f64) {
        self.inner().last_relative_deviation.set(deviation);
    }
}

/// Structured logger for predictor events
///
/// Provides consistent JSON-formatted logging for retrain decisions,
/// session lifecycle, and server start/stop.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log the result of a train directive
    pub fn log_retrain(&self, peer: &str, dataset: &str, outcome: &RetrainOutcome) {
        match outcome {
            RetrainOutcome::Trained {
                generation,
                evaluation,
            } => {
                info!(
                    event = "model_trained",
                    node = %self.node_name,
                    peer = %peer,
                    dataset = %dataset,
                    generation = generation,
                    relative_deviation = ?evaluation.map(|e| e.relative_deviation),
                    "Published new model generation"
                );
            }
            RetrainOutcome::Skipped {
                generation,
                evaluation,
            } => {
                info!(
                    event = "retrain_skipped",
                    node = %self.node_name,
                    peer = %peer,
                    dataset = %dataset,
                    generation = generation,
                    best_cost = evaluation.best_cost,
                    predicted_cost = evaluation.predicted_cost,
                    relative_deviation = evaluation.relative_deviation,
                    "Active model within drift threshold, retrain skipped"
                );
            }
        }
    }

    /// Log a session that ended, cleanly or not
    pub fn log_session_closed(&self, peer: &str, messages: u64, error: Option<&str>) {
        match error {
            None => {
                debug!(
                    event = "session_closed",
                    node = %self.node_name,
                    peer = %peer,
                    messages = messages,
                    "Session closed"
                );
            }
            Some(error) => {
                warn!(
                    event = "session_closed",
                    node = %self.node_name,
                    peer = %peer,
                    messages = messages,
                    error = %error,
                    "Session terminated by error"
                );
            }
        }
    }

    /// Log server startup
    pub fn log_startup(&self, version: &str, addr: &str, model_generation: Option<u64>) {
        info!(
            event = "server_started",
            node = %self.node_name,
            server_version = %version,
            addr = %addr,
            model_generation = ?model_generation,
            "Filter class predictor started"
        );
    }

    /// Log server shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "server_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Filter class predictor shutting down"
        );
    }
}
