// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the connection layer.
//!
//! Metrics are registered once, globally, through `lazy_static`.

use crate::connection::RemovalReason;
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, TextEncoder, register_counter, register_counter_vec,
    register_gauge,
};
use strum::IntoEnumIterator;

lazy_static! {
    /// The number of clients currently connected to the server.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("respconn_connected_clients", "Number of currently connected clients.").unwrap();
    /// The number of channels with at least one subscriber.
    pub static ref PUBSUB_CHANNELS: Gauge =
        register_gauge!("respconn_pubsub_channels", "Number of active Pub/Sub channels.").unwrap();

    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("respconn_connections_received_total", "Total number of connections received.").unwrap();
    /// Connections torn down, labeled by why they ended.
    pub static ref CONNECTIONS_CLOSED_TOTAL: CounterVec =
        register_counter_vec!("respconn_connections_closed_total", "Total number of connections closed, labeled by reason.", &["reason"]).unwrap();
    pub static ref COMMANDS_PROCESSED_TOTAL: Counter =
        register_counter!("respconn_commands_processed_total", "Total number of commands processed.").unwrap();
    pub static ref OUTBOUND_BYTES_TOTAL: Counter =
        register_counter!("respconn_outbound_bytes_total", "Total number of reply bytes queued for clients.").unwrap();
    pub static ref PUBSUB_MESSAGES_PUBLISHED_TOTAL: Counter =
        register_counter!("respconn_pubsub_messages_published_total", "Total number of PUBLISH operations.").unwrap();
    /// Pushed frames lost because the receiving connection fell behind.
    pub static ref PUBSUB_MESSAGES_DROPPED_TOTAL: Counter =
        register_counter!("respconn_pubsub_messages_dropped_total", "Total number of pushed messages dropped for slow subscribers.").unwrap();
}

/// Creates the closed-connection series for every removal reason, so each
/// label is exported at zero before its first occurrence.
pub fn init_removal_reason_labels() {
    for reason in RemovalReason::iter() {
        let label: &'static str = reason.into();
        CONNECTIONS_CLOSED_TOTAL.with_label_values(&[label]);
    }
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}
