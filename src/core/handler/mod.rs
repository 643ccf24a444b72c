// src/core/handler/mod.rs

//! The request engine seam: how a connection turns input bytes into executed
//! commands, plus the RESP engine the server runs by default.

pub mod command_router;
mod resp_engine;

pub use resp_engine::RespEngine;

use crate::connection::Connection;
use crate::core::ConnError;
use bytes::BytesMut;

/// Parses and executes requests on behalf of one connection.
///
/// Execution runs on the connection's own task and must not block: a slow
/// command stalls everything else that task would do.
pub trait RequestEngine: Send {
    /// Moves every complete request out of `input`, leaving a trailing
    /// partial request in place for the next read.
    ///
    /// On a protocol error the requests extracted before it are kept and
    /// will still be executed.
    fn tokenize(&mut self, input: &mut BytesMut) -> Result<(), ConnError>;

    /// Runs all tokenized requests, in order, against `conn`.
    fn execute_commands(&mut self, conn: &mut Connection);
}
