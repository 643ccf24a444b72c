// src/core/state/client.rs

//! Contains state definitions related to client connections.

use crate::connection::ConnectionId;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::broadcast;

pub type KillSender = broadcast::Sender<()>;
pub type KillReceiver = broadcast::Receiver<()>;
pub type ClientMap = DashMap<ConnectionId, ClientEntry>;

/// What the server knows about a live connection outside of its own task.
#[derive(Debug)]
pub struct ClientEntry {
    pub addr: SocketAddr,
    pub connected_at: Instant,
    /// Tells the connection's task to stop when removal is initiated elsewhere.
    pub kill_tx: KillSender,
}
