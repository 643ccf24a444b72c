// src/core/state/core.rs

//! Defines the central `ServerState` struct, holding all shared server-wide state.

use super::client::{ClientEntry, ClientMap, KillReceiver};
use super::stats::StatsState;
use crate::config::Config;
use crate::connection::ConnectionId;
use crate::core::metrics;
use crate::core::pubsub::PubSubRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::debug;

/// Shared, server-wide state. Wrapped in an `Arc` and handed to every worker,
/// connection task and background task.
#[derive(Debug)]
pub struct ServerState {
    /// The configuration the server was started with.
    pub config: Config,
    /// Every live client connection, keyed by connection id.
    pub clients: ClientMap,
    /// The channel and pattern subscription registry.
    pub pubsub: PubSubRegistry,
    /// Server-wide counters.
    pub stats: StatsState,
    next_client_id: AtomicU64,
}

impl ServerState {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            clients: ClientMap::new(),
            pubsub: PubSubRegistry::new(),
            stats: StatsState::new(),
            next_client_id: AtomicU64::new(1),
        })
    }

    /// Allocates an id for a newly accepted socket and records it in the client table.
    ///
    /// The returned receiver fires when the connection is removed by someone
    /// other than its own task.
    pub fn register_client(&self, addr: SocketAddr) -> (ConnectionId, KillReceiver) {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (kill_tx, kill_rx) = broadcast::channel(1);
        self.clients.insert(
            id,
            ClientEntry {
                addr,
                connected_at: Instant::now(),
                kill_tx,
            },
        );
        self.stats.increment_total_connections();
        metrics::CONNECTIONS_RECEIVED_TOTAL.inc();
        metrics::CONNECTED_CLIENTS.inc();
        (id, kill_rx)
    }

    /// Removes a client from the table and signals its task to stop.
    ///
    /// Returns false if the client was already gone, so calling this more
    /// than once for the same id is harmless.
    pub fn remove_client(&self, id: ConnectionId) -> bool {
        let Some((_, entry)) = self.clients.remove(&id) else {
            return false;
        };
        metrics::CONNECTED_CLIENTS.dec();
        // The task may already be gone; that is the common case for self-removal.
        let _ = entry.kill_tx.send(());
        debug!("Removed client {} ({}) from the client table.", id, entry.addr);
        true
    }

    pub fn has_client(&self, id: ConnectionId) -> bool {
        self.clients.contains_key(&id)
    }
}
