// src/connection/session.rs

//! Defines `Connection`, the per-socket state object and its event callbacks.

use super::events::{ConnectionEvent, RemovalReason, Transition};
use super::flags::{ConnectionFlags, SocketEvents};
use super::lifecycle::{Clock, LifecycleTracker};
use super::output::OutboundQueue;
use super::owner::{ConnectionId, ConnectionOwner};
use super::subscriptions::{SubscriptionKind, SubscriptionList};
use crate::core::ConnError;
use crate::core::handler::RequestEngine;
use crate::core::protocol::RespFrame;
use crate::core::pubsub::{self, PushReceiver, PushSender, Subscriber};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The state of one client connection.
///
/// A `Connection` does no I/O itself. Its driver task reads into
/// [`Connection::input_mut`], writes out of [`Connection::output_mut`], and
/// reports what happened through the callbacks, which return the
/// [`Transition`] to take. Dropping a `Connection` unregisters all of its
/// subscriptions and, if nobody has yet, asks the owner to remove it.
pub struct Connection {
    id: ConnectionId,
    addr: SocketAddr,
    owner: Arc<dyn ConnectionOwner>,
    flags: ConnectionFlags,
    lifecycle: LifecycleTracker,
    channels: SubscriptionList,
    patterns: SubscriptionList,
    input: BytesMut,
    output: OutboundQueue,
    push_tx: PushSender,
    removal_requested: bool,
}

impl Connection {
    /// Creates a connection for a freshly accepted socket and timestamps it.
    ///
    /// The returned receiver carries frames pushed by other connections
    /// (published messages, monitor lines); the driver feeds them to
    /// [`Connection::reply`]. It is bounded, so a connection that stops
    /// draining its socket loses pushes rather than growing without limit.
    pub fn new(
        id: ConnectionId,
        addr: SocketAddr,
        owner: Arc<dyn ConnectionOwner>,
        clock: Arc<dyn Clock>,
    ) -> (Self, PushReceiver) {
        let (push_tx, push_rx) = pubsub::push_channel();
        let conn = Self {
            id,
            addr,
            owner,
            flags: ConnectionFlags::empty(),
            lifecycle: LifecycleTracker::new(clock),
            channels: SubscriptionList::new(SubscriptionKind::Channel),
            patterns: SubscriptionList::new(SubscriptionKind::Pattern),
            input: BytesMut::new(),
            output: OutboundQueue::new(),
            push_tx,
            removal_requested: false,
        };
        (conn, push_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn owner(&self) -> &Arc<dyn ConnectionOwner> {
        &self.owner
    }

    /// This connection as a registry subscriber.
    pub fn subscriber(&self) -> Subscriber {
        Subscriber::new(self.id, self.push_tx.clone())
    }

    pub fn input_mut(&mut self) -> &mut BytesMut {
        &mut self.input
    }

    pub fn output_mut(&mut self) -> &mut OutboundQueue {
        &mut self.output
    }

    pub fn has_pending_output(&self) -> bool {
        !self.output.is_empty()
    }

    pub fn is_removal_requested(&self) -> bool {
        self.removal_requested
    }

    // --- Event callbacks ---

    /// Dispatches a typed event to the matching callback.
    pub fn handle<E>(&mut self, event: ConnectionEvent, engine: &mut E) -> Transition
    where
        E: RequestEngine + ?Sized,
    {
        match event {
            ConnectionEvent::Readable => self.on_read(engine),
            ConnectionEvent::Writable => self.on_write(),
            ConnectionEvent::Error(e) => self.on_event(SocketEvents::ERROR, Some(&e)),
            ConnectionEvent::Eof => self.on_event(SocketEvents::EOF, None),
            ConnectionEvent::Timeout => self.on_event(SocketEvents::TIMEOUT, None),
        }
    }

    /// Handles new input: marks activity, tokenizes everything buffered and
    /// executes every complete request in arrival order.
    ///
    /// A malformed request is answered with a protocol error after the
    /// requests before it have run, and the connection closes once that
    /// error has been written.
    pub fn on_read<E>(&mut self, engine: &mut E) -> Transition
    where
        E: RequestEngine + ?Sized,
    {
        if self.removal_requested {
            return Transition::Remove(RemovalReason::Requested);
        }
        debug!("[connection] on read: {}", self.id);
        self.lifecycle.touch();

        let tokenized = engine.tokenize(&mut self.input);
        engine.execute_commands(self);

        if let Err(e) = tokenized {
            warn!("Protocol error from client {}: {}", self.addr, e);
            self.input.clear();
            self.reply(RespFrame::Error(e.to_reply_string()).to_bytes());
            self.enable_flag(ConnectionFlags::CLOSE_AFTER_REPLY);
        }

        if self.removal_requested {
            Transition::Remove(RemovalReason::Requested)
        } else {
            Transition::Continue
        }
    }

    /// Called once all queued output has been written.
    pub fn on_write(&mut self) -> Transition {
        if self.removal_requested {
            return Transition::Remove(RemovalReason::Requested);
        }
        if self.is_flag_enabled(ConnectionFlags::CLOSE_AFTER_REPLY) {
            debug!("[connection] closing {} after reply", self.addr);
            self.request_removal();
            return Transition::Remove(RemovalReason::CloseAfterReply);
        }
        Transition::Continue
    }

    /// Handles error, EOF and timeout notifications, checked in that order.
    ///
    /// Each is classified as a `Transport` error, `PeerClosed` or
    /// `IdleTimeout`. The first two remove the connection at once, whatever
    /// output is still queued. A timeout only re-arms the connection.
    pub fn on_event(&mut self, events: SocketEvents, cause: Option<&ConnError>) -> Transition {
        let condition = if events.contains(SocketEvents::ERROR) {
            cause.cloned().unwrap_or_else(|| {
                ConnError::from(std::io::Error::other("unknown socket error"))
            })
        } else if events.contains(SocketEvents::EOF) {
            ConnError::PeerClosed
        } else if events.contains(SocketEvents::TIMEOUT) {
            ConnError::IdleTimeout
        } else {
            return Transition::Continue;
        };

        match &condition {
            ConnError::IdleTimeout => {
                info!("[connection] The client: {} reached timeout", self.addr);
                Transition::Rearm
            }
            ConnError::PeerClosed => {
                debug!(
                    "[connection] Going to remove the client: {}, {}",
                    self.addr, condition
                );
                self.request_removal();
                Transition::Remove(RemovalReason::PeerClosed)
            }
            e => {
                error!(
                    "[connection] Going to remove the client: {}, while encounter error: {}",
                    self.addr, e
                );
                self.request_removal();
                Transition::Remove(RemovalReason::TransportError)
            }
        }
    }

    /// Asks the owner to remove this connection. Only the first call reaches the owner.
    pub fn request_removal(&mut self) {
        if self.removal_requested {
            return;
        }
        self.removal_requested = true;
        self.owner.remove_connection(self.id);
    }

    // --- Output ---

    /// Queues an encoded reply and accounts its size with the owner.
    pub fn reply(&mut self, message: Bytes) {
        self.owner.incr_outbound_bytes(message.len() as u64);
        self.output.push_bytes(message);
    }

    /// Queues a file for transmission. The output path owns and closes it.
    pub fn send_file(&mut self, file: std::fs::File) {
        self.output.push_file(tokio::fs::File::from_std(file));
    }

    // --- Flags ---

    /// Sets a flag. Turning on `MONITOR` registers the connection for the monitor feed.
    pub fn enable_flag(&mut self, flag: ConnectionFlags) {
        let newly_set = flag.difference(self.flags);
        self.flags.insert(flag);
        if newly_set.contains(ConnectionFlags::MONITOR) {
            self.owner.add_monitor(&self.subscriber());
        }
    }

    pub fn is_flag_enabled(&self, flag: ConnectionFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Renders the flag summary shown by `CLIENT LIST`: `S`, `c`, `M`, `P`
    /// in that fixed order, or `N` when none apply.
    pub fn get_flags(&self) -> String {
        let mut flags = String::new();
        if self.owner.is_repl() {
            flags.push('S');
        }
        if self.is_flag_enabled(ConnectionFlags::CLOSE_AFTER_REPLY) {
            flags.push('c');
        }
        if self.is_flag_enabled(ConnectionFlags::MONITOR) {
            flags.push('M');
        }
        if !self.channels.is_empty() {
            flags.push('P');
        }
        if flags.is_empty() {
            flags.push('N');
        }
        flags
    }

    // --- Subscriptions ---

    pub fn subscribe_channel(&mut self, channel: Bytes) -> bool {
        let subscriber = self.subscriber();
        self.channels.subscribe(channel, self.owner.as_ref(), &subscriber)
    }

    pub fn unsubscribe_channel(&mut self, channel: &[u8]) -> bool {
        self.channels.unsubscribe(channel, self.owner.as_ref(), self.id)
    }

    /// Drops every channel subscription, returning the names in subscription order.
    pub fn unsubscribe_all(&mut self) -> Vec<Bytes> {
        self.channels.unsubscribe_all(self.owner.as_ref(), self.id)
    }

    pub fn subscriptions_count(&self) -> usize {
        self.channels.count()
    }

    pub fn psubscribe_channel(&mut self, pattern: Bytes) -> bool {
        let subscriber = self.subscriber();
        self.patterns.subscribe(pattern, self.owner.as_ref(), &subscriber)
    }

    pub fn punsubscribe_channel(&mut self, pattern: &[u8]) -> bool {
        self.patterns.unsubscribe(pattern, self.owner.as_ref(), self.id)
    }

    /// Drops every pattern subscription, returning the patterns in subscription order.
    pub fn punsubscribe_all(&mut self) -> Vec<Bytes> {
        self.patterns.unsubscribe_all(self.owner.as_ref(), self.id)
    }

    pub fn psubscriptions_count(&self) -> usize {
        self.patterns.count()
    }

    pub fn subscribed_channels(&self) -> impl Iterator<Item = &Bytes> {
        self.channels.iter()
    }

    pub fn subscribed_patterns(&self) -> impl Iterator<Item = &Bytes> {
        self.patterns.iter()
    }

    // --- Timing ---

    pub fn age(&self) -> u64 {
        self.lifecycle.age()
    }

    pub fn idle_time(&self) -> u64 {
        self.lifecycle.idle_time()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let channels = self.channels.unsubscribe_all(self.owner.as_ref(), self.id);
        let patterns = self.patterns.unsubscribe_all(self.owner.as_ref(), self.id);
        if self.flags.contains(ConnectionFlags::MONITOR) {
            self.owner.remove_monitor(self.id);
        }
        self.request_removal();
        debug!(
            "Connection {} ({}) released: {} channels and {} patterns unregistered.",
            self.id,
            self.addr,
            channels.len(),
            patterns.len()
        );
    }
}
