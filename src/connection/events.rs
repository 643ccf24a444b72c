// src/connection/events.rs

//! Typed events delivered to a connection and the transitions they produce.

use crate::core::ConnError;
use strum_macros::{Display, EnumIter, IntoStaticStr};

/// A notification for one connection, produced by its driver task.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// New bytes were appended to the input buffer.
    Readable,
    /// All queued output has been written to the socket.
    Writable,
    /// The socket failed.
    Error(ConnError),
    /// The peer closed its side.
    Eof,
    /// No input arrived within the configured idle timeout.
    Timeout,
}

/// What the driver must do after an event has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Keep going.
    Continue,
    /// Re-enable reading and writing; the connection stays active.
    Rearm,
    /// Stop immediately. The owner has already been asked to remove the connection.
    Remove(RemovalReason),
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum RemovalReason {
    /// Deferred close completed after the last reply was written.
    CloseAfterReply,
    TransportError,
    PeerClosed,
    /// Requested from inside command execution.
    Requested,
    /// Removed by another connection or the server.
    Killed,
    Shutdown,
}
