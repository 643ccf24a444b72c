// src/core/errors.rs

//! Defines the error type shared by the connection layer and the request engine.

use std::num::ParseIntError;
use std::sync::Arc;
use thiserror::Error;

/// Every failure the connection layer can observe or report.
///
/// The last three variants form the connection taxonomy: a `Transport` error
/// is fatal and unexpected, `PeerClosed` is fatal but orderly, and
/// `IdleTimeout` is informational only. Socket I/O failures convert into
/// `Transport`.
#[derive(Error, Debug)]
pub enum ConnError {
    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArgumentCount(String),

    #[error("unknown subcommand '{0}'")]
    UnknownSubcommand(String),

    #[error("value is not an integer or out of range")]
    NotAnInteger,

    #[error("{0}")]
    InvalidState(String),

    #[error("No such client")]
    NoSuchClient,

    #[error("Transport error: {0}")]
    Transport(Arc<std::io::Error>),

    #[error("Connection closed by peer")]
    PeerClosed,

    #[error("Connection reached idle timeout")]
    IdleTimeout,
}

impl ConnError {
    /// Renders the error the way it is sent to clients, e.g. `ERR No such client`.
    pub fn to_reply_string(&self) -> String {
        format!("ERR {self}")
    }
}

// `std::io::Error` is not `Clone`, so it is shared behind an `Arc`.
impl Clone for ConnError {
    fn clone(&self) -> Self {
        match self {
            ConnError::IncompleteData => ConnError::IncompleteData,
            ConnError::Protocol(s) => ConnError::Protocol(s.clone()),
            ConnError::UnknownCommand(s) => ConnError::UnknownCommand(s.clone()),
            ConnError::WrongArgumentCount(s) => ConnError::WrongArgumentCount(s.clone()),
            ConnError::UnknownSubcommand(s) => ConnError::UnknownSubcommand(s.clone()),
            ConnError::NotAnInteger => ConnError::NotAnInteger,
            ConnError::InvalidState(s) => ConnError::InvalidState(s.clone()),
            ConnError::NoSuchClient => ConnError::NoSuchClient,
            ConnError::Transport(e) => ConnError::Transport(Arc::clone(e)),
            ConnError::PeerClosed => ConnError::PeerClosed,
            ConnError::IdleTimeout => ConnError::IdleTimeout,
        }
    }
}

impl PartialEq for ConnError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConnError::Transport(e1), ConnError::Transport(e2)) => e1.kind() == e2.kind(),
            (ConnError::Protocol(s1), ConnError::Protocol(s2)) => s1 == s2,
            (ConnError::UnknownCommand(s1), ConnError::UnknownCommand(s2)) => s1 == s2,
            (ConnError::WrongArgumentCount(s1), ConnError::WrongArgumentCount(s2)) => s1 == s2,
            (ConnError::UnknownSubcommand(s1), ConnError::UnknownSubcommand(s2)) => s1 == s2,
            (ConnError::InvalidState(s1), ConnError::InvalidState(s2)) => s1 == s2,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl From<std::io::Error> for ConnError {
    fn from(e: std::io::Error) -> Self {
        ConnError::Transport(Arc::new(e))
    }
}

impl From<std::str::Utf8Error> for ConnError {
    fn from(_: std::str::Utf8Error) -> Self {
        ConnError::Protocol("invalid UTF-8 in simple string".to_string())
    }
}

impl From<ParseIntError> for ConnError {
    fn from(_: ParseIntError) -> Self {
        ConnError::NotAnInteger
    }
}
