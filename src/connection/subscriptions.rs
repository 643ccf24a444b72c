// src/connection/subscriptions.rs

//! The connection-side half of pub/sub: one ordered, duplicate-free interest
//! list, mirrored into the owner's registry on every change.

use super::owner::{ConnectionId, ConnectionOwner};
use crate::core::pubsub::Subscriber;
use bytes::Bytes;
use indexmap::IndexSet;

/// Which registry table a list mirrors into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Channel,
    Pattern,
}

#[derive(Debug)]
pub struct SubscriptionList {
    kind: SubscriptionKind,
    entries: IndexSet<Bytes>,
}

impl SubscriptionList {
    pub fn new(kind: SubscriptionKind) -> Self {
        Self {
            kind,
            entries: IndexSet::new(),
        }
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    /// Adds `name` and registers it with the owner. Returns false if it was
    /// already present, in which case nothing happens.
    pub fn subscribe(
        &mut self,
        name: Bytes,
        owner: &dyn ConnectionOwner,
        subscriber: &Subscriber,
    ) -> bool {
        if self.entries.contains(&name) {
            return false;
        }
        match self.kind {
            SubscriptionKind::Channel => owner.subscribe_channel(&name, subscriber),
            SubscriptionKind::Pattern => owner.psubscribe_channel(&name, subscriber),
        }
        self.entries.insert(name);
        true
    }

    /// Removes `name` and unregisters it. Returns false if it was absent.
    pub fn unsubscribe(
        &mut self,
        name: &[u8],
        owner: &dyn ConnectionOwner,
        id: ConnectionId,
    ) -> bool {
        let Some(name) = self.entries.shift_take(name) else {
            return false;
        };
        self.unregister(&name, owner, id);
        true
    }

    /// Removes every entry, unregistering each, and returns them in
    /// subscription order. Empty lists return an empty vector.
    pub fn unsubscribe_all(&mut self, owner: &dyn ConnectionOwner, id: ConnectionId) -> Vec<Bytes> {
        let drained: Vec<Bytes> = self.entries.drain(..).collect();
        for name in &drained {
            self.unregister(name, owner, id);
        }
        drained
    }

    fn unregister(&self, name: &Bytes, owner: &dyn ConnectionOwner, id: ConnectionId) {
        match self.kind {
            SubscriptionKind::Channel => owner.unsubscribe_channel(name, id),
            SubscriptionKind::Pattern => owner.punsubscribe_channel(name, id),
        }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &[u8]) -> bool {
        self.entries.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.entries.iter()
    }
}
