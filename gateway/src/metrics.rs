//! Prometheus metrics for the accounting gateway

use crate::error::{GatewayError, Result};
use crate::resilience::CircuitState;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_histogram,
};
use std::sync::OnceLock;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// All gateway metrics
pub struct Metrics {
    /// Decoded packets (by action type)
    pub packets_received: CounterVec,

    /// Packets answered with silence (by reason)
    pub packets_dropped: CounterVec,

    /// Accounting-Response packets sent
    pub packets_acknowledged: Counter,

    /// Events accepted by the publisher
    pub events_published: Counter,

    /// Events placed in the failed-message store
    pub events_stored: Counter,

    /// Events handed to the dead-letter sink
    pub events_dead_lettered: Counter,

    /// Republish attempts (by outcome)
    pub retries: CounterVec,

    /// Current failed-message store size
    pub failed_store_size: Gauge,

    /// Circuit state (0 closed, 1 open, 2 half-open)
    pub circuit_state: Gauge,

    /// Publisher call latency
    pub publish_latency: Histogram,
}

impl Metrics {
    /// Initialize metrics (call once at startup)
    ///
    /// Returns error if metric registration fails.
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            packets_received: register_counter_vec!(
                "acct_packets_received_total",
                "Total accounting packets decoded",
                &["status"]
            )
            .map_err(|e| GatewayError::Metrics(format!("packets_received: {e}")))?,

            packets_dropped: register_counter_vec!(
                "acct_packets_dropped_total",
                "Total accounting packets dropped without a response",
                &["reason"]
            )
            .map_err(|e| GatewayError::Metrics(format!("packets_dropped: {e}")))?,

            packets_acknowledged: register_counter!(
                "acct_packets_acknowledged_total",
                "Total Accounting-Response packets sent"
            )
            .map_err(|e| GatewayError::Metrics(format!("packets_acknowledged: {e}")))?,

            events_published: register_counter!(
                "acct_events_published_total",
                "Total events accepted by the publisher"
            )
            .map_err(|e| GatewayError::Metrics(format!("events_published: {e}")))?,

            events_stored: register_counter!(
                "acct_events_stored_total",
                "Total events stored for retry"
            )
            .map_err(|e| GatewayError::Metrics(format!("events_stored: {e}")))?,

            events_dead_lettered: register_counter!(
                "acct_events_dead_lettered_total",
                "Total events sent to the dead-letter sink"
            )
            .map_err(|e| GatewayError::Metrics(format!("events_dead_lettered: {e}")))?,

            retries: register_counter_vec!(
                "acct_retries_total",
                "Total republish attempts",
                &["outcome"]
            )
            .map_err(|e| GatewayError::Metrics(format!("retries: {e}")))?,

            failed_store_size: register_gauge!(
                "acct_failed_store_size",
                "Current number of events awaiting retry"
            )
            .map_err(|e| GatewayError::Metrics(format!("failed_store_size: {e}")))?,

            circuit_state: register_gauge!(
                "acct_circuit_state",
                "Publish circuit state (0 = closed, 1 = open, 2 = half-open)"
            )
            .map_err(|e| GatewayError::Metrics(format!("circuit_state: {e}")))?,

            publish_latency: register_histogram!(
                "acct_publish_latency_seconds",
                "Publisher call latency",
                vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
            )
            .map_err(|e| GatewayError::Metrics(format!("publish_latency: {e}")))?,
        };

        // Set the metrics (only succeeds once)
        let _ = METRICS.set(metrics);

        METRICS
            .get()
            .ok_or_else(|| GatewayError::Metrics("Failed to initialize metrics".to_string()))
    }

    /// Get the global metrics instance
    ///
    /// Returns None if metrics haven't been initialized yet.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    pub fn record_received(&self, status: &str) {
        self.packets_received.with_label_values(&[status]).inc();
    }

    pub fn record_dropped(&self, reason: &str) {
        self.packets_dropped.with_label_values(&[reason]).inc();
    }

    pub fn record_retry(&self, outcome: &str) {
        self.retries.with_label_values(&[outcome]).inc();
    }

    pub fn set_circuit_state(&self, state: CircuitState) {
        self.circuit_state.set(f64::from(state.as_u8()));
    }
}

/// Gather all metrics and encode as Prometheus text format
///
/// Returns the metrics as a String, ready to be served via HTTP.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}

// Helpers below record if metrics are initialized, otherwise skip.

pub fn try_record_received(status: &str) {
    if let Some(m) = Metrics::get() {
        m.record_received(status);
    }
}

pub fn try_record_dropped(reason: &str) {
    if let Some(m) = Metrics::get() {
        m.record_dropped(reason);
    }
}

pub fn try_record_acknowledged() {
    if let Some(m) = Metrics::get() {
        m.packets_acknowledged.inc();
    }
}

pub fn try_record_published(seconds: f64) {
    if let Some(m) = Metrics::get() {
        m.events_published.inc();
        m.publish_latency.observe(seconds);
    }
}

pub fn try_record_publish_failed(seconds: f64) {
    if let Some(m) = Metrics::get() {
        m.publish_latency.observe(seconds);
    }
}

pub fn try_record_stored() {
    if let Some(m) = Metrics::get() {
        m.events_stored.inc();
    }
}

pub fn try_record_dead_lettered() {
    if let Some(m) = Metrics::get() {
        m.events_dead_lettered.inc();
    }
}

pub fn try_record_retry(outcome: &str) {
    if let Some(m) = Metrics::get() {
        m.record_retry(outcome);
    }
}

pub fn try_set_circuit_state(state: CircuitState) {
    if let Some(m) = Metrics::get() {
        m.set_circuit_state(state);
    }
}
