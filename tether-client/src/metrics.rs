//! Client metrics definitions
//!
//! OpenTelemetry instruments describing connection health and call traffic.
//! They are exported through whatever meter provider is installed globally,
//! normally the OTLP provider set up by `tether_core::init_observability`.
//!
//! # Metrics Collected
//!
//! - **connection.state**: current state (gauge, 0=offline, 1=connecting,
//!   2=setup, 3=connected, 4=error)
//! - **rpc.total** / **rpc.duration**: calls answered, by function and status
//! - **errors.total**: failures, by error code
//! - **reconnection.attempts** / **reconnection.success**: retry traffic
//! - **outbox.flushed**: calls released from the outbox per session
//! - **user_events.received**: server events, by name
//!
//! # Usage
//!
//! Metrics are recorded automatically when observability is enabled via
//! `ClientBuilder::with_observability()`.

use crate::connection_state::ConnectionState;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};

/// Client metrics for monitoring
pub struct ClientMetrics {
    pub connection_state: Gauge<i64>,
    pub rpc_total: Counter<u64>,
    /// Seconds from send to answer
    pub rpc_duration: Histogram<f64>,
    pub errors_total: Counter<u64>,
    pub reconnection_attempts: Counter<u64>,
    pub reconnection_success: Counter<u64>,
    pub outbox_flushed: Histogram<u64>,
    pub user_events_received: Counter<u64>,
}

impl ClientMetrics {
    /// Create instruments on the global meter named `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        // The global meter API only accepts static names
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        let meter = global::meter(name);
        Self::new_with_meter(&meter)
    }

    /// Create instruments on a specific meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("tether.client.connection.state")
                .with_description(
                    "Connection state (0=offline, 1=connecting, 2=setup, 3=connected, 4=error)",
                )
                .build(),
            rpc_total: meter
                .u64_counter("tether.client.rpc.total")
                .with_description("Total number of answered remote calls")
                .build(),
            rpc_duration: meter
                .f64_histogram("tether.client.rpc.duration")
                .with_description("Remote call duration in seconds")
                .build(),
            errors_total: meter
                .u64_counter("tether.client.errors.total")
                .with_description("Total number of errors encountered")
                .build(),
            reconnection_attempts: meter
                .u64_counter("tether.client.reconnection.attempts")
                .with_description("Total number of scheduled reconnection attempts")
                .build(),
            reconnection_success: meter
                .u64_counter("tether.client.reconnection.success")
                .with_description("Total number of sessions established after a retry")
                .build(),
            outbox_flushed: meter
                .u64_histogram("tether.client.outbox.flushed")
                .with_description("Buffered calls sent when a session was established")
                .build(),
            user_events_received: meter
                .u64_counter("tether.client.user_events.received")
                .with_description("Total number of server user events received")
                .build(),
        }
    }

    pub fn update_connection_state(&self, state: ConnectionState) {
        self.connection_state.record(state.metric_value(), &[]);
    }

    /// Record an answered call
    pub fn record_rpc(&self, function: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("function", function.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.rpc_total.add(1, attributes);
        self.rpc_duration.record(duration_secs, attributes);
    }

    pub fn record_error(&self, code: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("error_code", code.to_string())]);
    }

    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    pub fn record_reconnection_success(&self) {
        self.reconnection_success.add(1, &[]);
    }

    pub fn record_outbox_flush(&self, size: u64) {
        self.outbox_flushed.record(size, &[]);
    }

    pub fn record_user_event(&self, name: &str) {
        self.user_events_received
            .add(1, &[KeyValue::new("name", name.to_string())]);
    }
}
