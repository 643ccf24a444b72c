// src/connection/mod.rs

//! Manages the lifecycle of a single client connection: event callbacks,
//! flags, timestamps, pub/sub interests and the reply path.

mod events;
mod flags;
mod handler;
mod lifecycle;
mod output;
mod owner;
mod session;
mod subscriptions;

pub use events::{ConnectionEvent, RemovalReason, Transition};
pub use flags::{ConnectionFlags, SocketEvents};
pub use handler::{ConnectionHandler, DEFAULT_READ_BUFFER_SIZE};
pub use lifecycle::{Clock, LifecycleTracker, SystemClock};
pub use output::OutboundQueue;
pub use owner::{ConnectionId, ConnectionOwner};
pub use session::Connection;
pub use subscriptions::{SubscriptionKind, SubscriptionList};
