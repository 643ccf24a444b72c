// src/connection/handler.rs

//! Defines the `ConnectionHandler`, the task that drives one `Connection`.

use super::events::{ConnectionEvent, RemovalReason, Transition};
use super::session::Connection;
use crate::core::handler::RequestEngine;
use crate::core::metrics;
use crate::core::protocol::RespFrame;
use crate::core::pubsub::PushReceiver;
use crate::core::state::KillReceiver;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::broadcast;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace};

/// The default read chunk reserved before each socket read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

/// Drives a `Connection`: turns socket readiness, pushed frames, timers and
/// kill signals into connection events, and performs the I/O the
/// connection's transitions call for.
pub struct ConnectionHandler<S, E> {
    // Declared before `stream`: the connection unregisters its subscriptions
    // before the socket is closed.
    conn: Connection,
    engine: E,
    stream: BufWriter<S>,
    push_rx: PushReceiver,
    kill_rx: KillReceiver,
    shutdown_rx: broadcast::Receiver<()>,
    idle_timeout: Option<Duration>,
    idle_deadline: Option<Instant>,
    read_buffer_size: usize,
}

impl<S, E> ConnectionHandler<S, E>
where
    S: AsyncRead + AsyncWrite + Unpin,
    E: RequestEngine,
{
    /// Creates a handler. An `idle_timeout` of `None` disables timeout events.
    pub fn new(
        stream: S,
        conn: Connection,
        push_rx: PushReceiver,
        engine: E,
        kill_rx: KillReceiver,
        shutdown_rx: broadcast::Receiver<()>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            conn,
            engine,
            stream: BufWriter::new(stream),
            push_rx,
            kill_rx,
            shutdown_rx,
            idle_deadline: idle_timeout.map(|t| Instant::now() + t),
            idle_timeout,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Runs the connection until it is removed, then releases it.
    ///
    /// Queued output is only flushed on the way out for a graceful close;
    /// errors and EOF drop it.
    pub async fn run(mut self) -> RemovalReason {
        let reason = self.event_loop().await;
        let label: &'static str = reason.into();
        metrics::CONNECTIONS_CLOSED_TOTAL
            .with_label_values(&[label])
            .inc();
        info!(
            "Connection {} from {} closed: {}",
            self.conn.id(),
            self.conn.addr(),
            reason
        );
        // Ensures the owner has been told even when the loop ended on a signal.
        self.conn.request_removal();
        reason
    }

    async fn event_loop(&mut self) -> RemovalReason {
        loop {
            let transition = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    info!("Connection handler for {} received shutdown signal.", self.conn.addr());
                    let shutdown_msg = RespFrame::Error("SHUTDOWN Server is shutting down".to_string());
                    let _ = self.stream.write_all(&shutdown_msg.to_bytes()).await;
                    let _ = self.stream.flush().await;
                    return RemovalReason::Shutdown;
                }
                _ = self.kill_rx.recv() => {
                    info!("Connection handler for {} received kill signal.", self.conn.addr());
                    return RemovalReason::Killed;
                }
                Some(frame) = self.push_rx.recv() => {
                    self.conn.reply(frame);
                    Transition::Continue
                }
                _ = wait_for_deadline(self.idle_deadline) => {
                    self.conn.handle(ConnectionEvent::Timeout, &mut self.engine)
                }
                event = read_event(&mut self.stream, self.conn.input_mut(), self.read_buffer_size) => {
                    if matches!(event, ConnectionEvent::Readable) {
                        self.reset_idle_deadline();
                    }
                    self.conn.handle(event, &mut self.engine)
                }
            };

            match transition {
                Transition::Remove(reason) => return reason,
                Transition::Rearm => self.reset_idle_deadline(),
                Transition::Continue => {}
            }

            if let Some(reason) = self.flush_output().await {
                return reason;
            }
        }
    }

    /// Writes all queued output and then reports the connection writable.
    async fn flush_output(&mut self) -> Option<RemovalReason> {
        if self.conn.has_pending_output() {
            match self.conn.output_mut().write_to(&mut self.stream).await {
                Ok(written) => trace!("Wrote {} bytes to {}", written, self.conn.addr()),
                Err(e) => {
                    let event = ConnectionEvent::Error(e.into());
                    if let Transition::Remove(reason) = self.conn.handle(event, &mut self.engine) {
                        return Some(reason);
                    }
                }
            }
        }
        match self.conn.handle(ConnectionEvent::Writable, &mut self.engine) {
            Transition::Remove(reason) => Some(reason),
            _ => None,
        }
    }

    fn reset_idle_deadline(&mut self) {
        self.idle_deadline = self.idle_timeout.map(|t| Instant::now() + t);
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Reads once from the socket into `input` and classifies the outcome.
async fn read_event<S>(stream: &mut S, input: &mut BytesMut, chunk: usize) -> ConnectionEvent
where
    S: AsyncRead + Unpin,
{
    input.reserve(chunk);
    match stream.read_buf(input).await {
        Ok(0) => ConnectionEvent::Eof,
        Ok(n) => {
            trace!("Read {} bytes", n);
            ConnectionEvent::Readable
        }
        Err(e) => {
            debug!("Socket read failed: {}", e);
            ConnectionEvent::Error(e.into())
        }
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
