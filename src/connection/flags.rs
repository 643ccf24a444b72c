// src/connection/flags.rs

use bitflags::bitflags;

bitflags! {
    /// Per-connection capabilities. Flags are only ever added.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConnectionFlags: u8 {
        /// Close the socket once all queued output has been written.
        const CLOSE_AFTER_REPLY = 1 << 0;
        /// Receive a copy of every command executed by other clients.
        const MONITOR = 1 << 1;
    }
}

bitflags! {
    /// Socket conditions reported together in one notification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SocketEvents: u8 {
        const ERROR = 1 << 0;
        const EOF = 1 << 1;
        const TIMEOUT = 1 << 2;
    }
}
