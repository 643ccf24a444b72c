// src/core/pubsub/mod.rs

//! The server-wide publish/subscribe registry.
//!
//! Connections mirror their local interest lists into this registry. Each
//! channel or pattern maps to the set of subscribing connections, keyed by
//! connection id, together with a push handle used for fan-out. Entries are
//! removed as soon as their last subscriber leaves, so a torn-down connection
//! leaves no trace behind.

use crate::connection::ConnectionId;
use crate::core::metrics;
use crate::core::protocol::RespFrame;
use bytes::Bytes;
use dashmap::DashMap;
use indexmap::IndexMap;
use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};
use wildmatch::WildMatch;

/// The number of pushed frames a connection may have waiting before new
/// ones are dropped.
pub const PUSH_CHANNEL_CAPACITY: usize = 128;

/// Pre-encoded frames pushed to a connection from outside its own task.
pub type PushSender = mpsc::Sender<Bytes>;
pub type PushReceiver = mpsc::Receiver<Bytes>;

/// Creates the bounded push queue of one connection.
pub fn push_channel() -> (PushSender, PushReceiver) {
    mpsc::channel(PUSH_CHANNEL_CAPACITY)
}

/// A connection as seen by the registry: its id and where to push messages.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: ConnectionId,
    tx: PushSender,
}

impl Subscriber {
    pub fn new(id: ConnectionId, tx: PushSender) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues `frame` for the subscriber without waiting.
    ///
    /// Returns false if the frame was not queued: the subscriber's task is
    /// gone, or it has fallen behind and its queue is full. A frame dropped
    /// for a slow subscriber is counted and lost.
    pub fn push(&self, frame: Bytes) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                metrics::PUBSUB_MESSAGES_DROPPED_TOTAL.inc();
                debug!(
                    "Push queue of connection {} is full, dropping message.",
                    self.id
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

type SubscriberSet = IndexMap<ConnectionId, Subscriber>;

struct PatternEntry {
    matcher: WildMatch,
    subscribers: SubscriberSet,
}

#[derive(Default)]
pub struct PubSubRegistry {
    channels: DashMap<Bytes, SubscriberSet>,
    patterns: DashMap<Bytes, PatternEntry>,
    monitors: DashMap<ConnectionId, Subscriber>,
}

impl fmt::Debug for PubSubRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSubRegistry")
            .field("channels", &self.channels.len())
            .field("patterns", &self.patterns.len())
            .field("monitors", &self.monitors.len())
            .finish()
    }
}

impl PubSubRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers `subscriber` under `channel`. Registering twice is a no-op.
    pub fn subscribe_channel(&self, channel: &Bytes, subscriber: &Subscriber) {
        self.channels
            .entry(channel.clone())
            .or_default()
            .entry(subscriber.id())
            .or_insert_with(|| subscriber.clone());
    }

    /// Drops connection `id` from `channel`, removing the channel when it empties.
    pub fn unsubscribe_channel(&self, channel: &Bytes, id: ConnectionId) {
        if let Some(mut subscribers) = self.channels.get_mut(channel) {
            subscribers.shift_remove(&id);
        }
        self.channels
            .remove_if(channel, |_, subscribers| subscribers.is_empty());
    }

    /// Registers `subscriber` under the glob `pattern`. Registering twice is a no-op.
    pub fn psubscribe_channel(&self, pattern: &Bytes, subscriber: &Subscriber) {
        self.patterns
            .entry(pattern.clone())
            .or_insert_with(|| PatternEntry {
                matcher: WildMatch::new(&String::from_utf8_lossy(pattern)),
                subscribers: SubscriberSet::new(),
            })
            .subscribers
            .entry(subscriber.id())
            .or_insert_with(|| subscriber.clone());
    }

    /// Drops connection `id` from `pattern`, removing the pattern when it empties.
    pub fn punsubscribe_channel(&self, pattern: &Bytes, id: ConnectionId) {
        if let Some(mut entry) = self.patterns.get_mut(pattern) {
            entry.subscribers.shift_remove(&id);
        }
        self.patterns
            .remove_if(pattern, |_, entry| entry.subscribers.is_empty());
    }

    /// Delivers `message` to direct subscribers of `channel` and to every
    /// pattern subscriber whose pattern matches it.
    ///
    /// Returns the number of deliveries made.
    pub fn publish(&self, channel: &Bytes, message: &Bytes) -> usize {
        let mut receivers = 0;

        if let Some(subscribers) = self.channels.get(channel) {
            let frame = RespFrame::Array(vec![
                RespFrame::bulk(Bytes::from_static(b"message")),
                RespFrame::BulkString(channel.clone()),
                RespFrame::BulkString(message.clone()),
            ])
            .to_bytes();
            receivers += subscribers
                .values()
                .filter(|s| s.push(frame.clone()))
                .count();
        }

        let channel_str = String::from_utf8_lossy(channel);
        for entry in self.patterns.iter() {
            if !entry.matcher.matches(&channel_str) {
                continue;
            }
            let frame = RespFrame::Array(vec![
                RespFrame::bulk(Bytes::from_static(b"pmessage")),
                RespFrame::BulkString(entry.key().clone()),
                RespFrame::BulkString(channel.clone()),
                RespFrame::BulkString(message.clone()),
            ])
            .to_bytes();
            receivers += entry
                .subscribers
                .values()
                .filter(|s| s.push(frame.clone()))
                .count();
        }

        metrics::PUBSUB_MESSAGES_PUBLISHED_TOTAL.inc();
        trace!(
            "Published to {:?}: {} receivers",
            String::from_utf8_lossy(channel),
            receivers
        );
        receivers
    }

    pub fn add_monitor(&self, subscriber: &Subscriber) {
        debug!("Connection {} entered monitor mode.", subscriber.id());
        self.monitors.insert(subscriber.id(), subscriber.clone());
    }

    pub fn remove_monitor(&self, id: ConnectionId) {
        self.monitors.remove(&id);
    }

    /// Sends a monitor line to every monitoring connection except `origin`.
    pub fn feed_monitors(&self, origin: ConnectionId, line: &Bytes) {
        for monitor in self.monitors.iter() {
            if *monitor.key() != origin {
                monitor.value().push(line.clone());
            }
        }
    }

    pub fn has_monitors(&self) -> bool {
        !self.monitors.is_empty()
    }

    /// Active channels, optionally filtered by a glob pattern.
    pub fn channels(&self, pattern: Option<&[u8]>) -> Vec<Bytes> {
        let matcher = pattern.map(|p| WildMatch::new(&String::from_utf8_lossy(p)));
        self.channels
            .iter()
            .map(|e| e.key().clone())
            .filter(|name| {
                matcher
                    .as_ref()
                    .is_none_or(|m| m.matches(&String::from_utf8_lossy(name)))
            })
            .collect()
    }

    /// Number of connections subscribed to exactly `channel`.
    pub fn numsub(&self, channel: &[u8]) -> usize {
        self.channels.get(channel).map_or(0, |s| s.len())
    }

    /// Number of distinct patterns with at least one subscriber.
    pub fn numpat(&self) -> usize {
        self.patterns.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_channel_subscriber(&self, channel: &[u8], id: ConnectionId) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|s| s.contains_key(&id))
    }

    pub fn is_pattern_subscriber(&self, pattern: &[u8], id: ConnectionId) -> bool {
        self.patterns
            .get(pattern)
            .is_some_and(|e| e.subscribers.contains_key(&id))
    }
}
