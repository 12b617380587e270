// src/core/metrics.rs

//! Defines and registers Prometheus metrics for relay monitoring.
//!
//! This module uses `lazy_static` so that metrics are registered exactly once
//! in the global registry for the lifetime of the process.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Gauges ---
    /// Sockets currently held by a reader task, authenticated or not.
    pub static ref OPEN_CONNECTIONS: Gauge =
        register_gauge!("tokenrelay_open_connections", "Number of currently open connections.").unwrap();
    /// Clients currently in the client registry.
    pub static ref REGISTERED_CLIENTS: Gauge =
        register_gauge!("tokenrelay_registered_clients", "Number of clients admitted to the relay.").unwrap();
    /// Ban entries currently held by the ban registry.
    pub static ref ACTIVE_BANS: Gauge =
        register_gauge!("tokenrelay_active_bans", "Number of ban entries currently recorded.").unwrap();

    // --- Counters ---
    pub static ref CONNECTIONS_ACCEPTED_TOTAL: Counter =
        register_counter!("tokenrelay_connections_accepted_total", "Total number of connections accepted.").unwrap();
    pub static ref HANDSHAKE_FAILURES_TOTAL: Counter =
        register_counter!("tokenrelay_handshake_failures_total", "Total number of failed token handshakes.").unwrap();
    pub static ref MESSAGES_BROADCAST_TOTAL: Counter =
        register_counter!("tokenrelay_messages_broadcast_total", "Total number of messages accepted for fan-out.").unwrap();
    /// Deliveries skipped because a recipient's outbox was full.
    pub static ref DELIVERIES_DROPPED_TOTAL: Counter =
        register_counter!("tokenrelay_deliveries_dropped_total", "Total number of deliveries dropped for slow clients.").unwrap();
    /// Policy strikes, labeled by the violated rule.
    pub static ref STRIKES_TOTAL: CounterVec =
        register_counter_vec!("tokenrelay_strikes_total", "Total number of policy strikes, labeled by reason.", &["reason"]).unwrap();
    pub static ref BANS_TOTAL: Counter =
        register_counter!("tokenrelay_bans_total", "Total number of bans issued.").unwrap();

    // --- Histograms ---
    /// Time the event loop spends handling a single event.
    pub static ref EVENT_LATENCY_SECONDS: Histogram =
        register_histogram!("tokenrelay_event_latency_seconds", "Latency of event handling in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}
