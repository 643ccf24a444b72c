// src/server/worker.rs

//! The `Worker` owns every connection accepted by the server.

use crate::connection::{ConnectionId, ConnectionOwner};
use crate::core::metrics;
use crate::core::pubsub::Subscriber;
use crate::core::state::ServerState;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Bridges connections to the shared server state: the client table, the
/// pub/sub registry and the statistics counters.
#[derive(Debug, Clone)]
pub struct Worker {
    state: Arc<ServerState>,
}

impl Worker {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }
}

impl ConnectionOwner for Worker {
    fn remove_connection(&self, id: ConnectionId) {
        if self.state.remove_client(id) {
            debug!("Worker released connection {}.", id);
        }
    }

    /// Clients accepted by the server are never replication links.
    fn is_repl(&self) -> bool {
        false
    }

    fn subscribe_channel(&self, channel: &Bytes, subscriber: &Subscriber) {
        self.state.pubsub.subscribe_channel(channel, subscriber);
    }

    fn unsubscribe_channel(&self, channel: &Bytes, id: ConnectionId) {
        self.state.pubsub.unsubscribe_channel(channel, id);
    }

    fn psubscribe_channel(&self, pattern: &Bytes, subscriber: &Subscriber) {
        self.state.pubsub.psubscribe_channel(pattern, subscriber);
    }

    fn punsubscribe_channel(&self, pattern: &Bytes, id: ConnectionId) {
        self.state.pubsub.punsubscribe_channel(pattern, id);
    }

    fn add_monitor(&self, subscriber: &Subscriber) {
        self.state.pubsub.add_monitor(subscriber);
    }

    fn remove_monitor(&self, id: ConnectionId) {
        self.state.pubsub.remove_monitor(id);
    }

    fn incr_outbound_bytes(&self, n: u64) {
        self.state.stats.incr_outbound_bytes(n);
        metrics::OUTBOUND_BYTES_TOTAL.inc_by(n as f64);
    }
}
