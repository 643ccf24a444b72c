// src/connection/owner.rs

//! The contract between a connection and the component that owns it.

use crate::core::pubsub::Subscriber;
use bytes::Bytes;

/// Identifies a connection for the lifetime of the process.
pub type ConnectionId = u64;

/// Everything a `Connection` needs from the outside world.
///
/// The owner can remove the connection, holds the shared pub/sub registry and
/// the statistics sink. It is passed to every connection explicitly, so tests
/// can substitute a recording implementation.
pub trait ConnectionOwner: Send + Sync {
    /// Tears the connection down. Must tolerate repeated calls for the same id.
    fn remove_connection(&self, id: ConnectionId);

    /// True if the owner is the replication worker.
    fn is_repl(&self) -> bool {
        false
    }

    fn subscribe_channel(&self, channel: &Bytes, subscriber: &Subscriber);
    fn unsubscribe_channel(&self, channel: &Bytes, id: ConnectionId);
    fn psubscribe_channel(&self, pattern: &Bytes, subscriber: &Subscriber);
    fn punsubscribe_channel(&self, pattern: &Bytes, id: ConnectionId);

    fn add_monitor(&self, _subscriber: &Subscriber) {}
    fn remove_monitor(&self, _id: ConnectionId) {}

    /// Accounts `n` reply bytes. Fire-and-forget.
    fn incr_outbound_bytes(&self, n: u64);
}
