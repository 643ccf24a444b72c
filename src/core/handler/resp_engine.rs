// src/core/handler/resp_engine.rs

use super::RequestEngine;
use super::command_router;
use crate::connection::{Connection, ConnectionFlags};
use crate::core::ConnError;
use crate::core::protocol::{RequestArgs, next_request};
use crate::core::state::ServerState;
use bytes::BytesMut;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// The default engine: RESP tokenizer plus the connection-level command set.
#[derive(Debug)]
pub struct RespEngine {
    state: Arc<ServerState>,
    pending: VecDeque<RequestArgs>,
}

impl RespEngine {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self {
            state,
            pending: VecDeque::new(),
        }
    }

    /// Requests tokenized but not yet executed.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }
}

impl RequestEngine for RespEngine {
    fn tokenize(&mut self, input: &mut BytesMut) -> Result<(), ConnError> {
        while let Some(args) = next_request(input)? {
            if !args.is_empty() {
                self.pending.push_back(args);
            }
        }
        Ok(())
    }

    fn execute_commands(&mut self, conn: &mut Connection) {
        while let Some(args) = self.pending.pop_front() {
            // Nothing pipelined after QUIT or a kill is executed.
            if conn.is_removal_requested()
                || conn.is_flag_enabled(ConnectionFlags::CLOSE_AFTER_REPLY)
            {
                debug!(
                    "Dropping {} pipelined requests from closing connection {}.",
                    self.pending.len() + 1,
                    conn.id()
                );
                self.pending.clear();
                return;
            }
            command_router::execute(&self.state, conn, &args);
        }
    }
}
