// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use respconn::config::Config;
use respconn::connection::{
    Clock, Connection, ConnectionFlags, ConnectionHandler, ConnectionId, ConnectionOwner,
    RemovalReason, SystemClock,
};
use respconn::core::handler::RespEngine;
use respconn::core::protocol::{RespFrame, RespFrameCodec};
use respconn::core::pubsub::{PubSubRegistry, PushReceiver, Subscriber};
use respconn::core::state::ServerState;
use respconn::core::{ConnError, RequestEngine};
use respconn::server::Worker;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Installs a quiet test subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

pub fn test_addr() -> SocketAddr {
    "127.0.0.1:50000".parse().unwrap()
}

/// A clock the test moves by hand.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn starting_at(secs: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(secs),
        })
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, secs: i64) {
        self.now.store(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// An owner that records every call and keeps a real registry behind it.
#[derive(Debug, Default)]
pub struct RecordingOwner {
    pub registry: PubSubRegistry,
    removals: Mutex<Vec<ConnectionId>>,
    outbound: AtomicU64,
    repl: AtomicBool,
}

impl RecordingOwner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn replication() -> Arc<Self> {
        let owner = Self::default();
        owner.repl.store(true, Ordering::SeqCst);
        Arc::new(owner)
    }

    pub fn removals(&self) -> Vec<ConnectionId> {
        self.removals.lock().clone()
    }

    pub fn outbound_bytes(&self) -> u64 {
        self.outbound.load(Ordering::SeqCst)
    }
}

impl ConnectionOwner for RecordingOwner {
    fn remove_connection(&self, id: ConnectionId) {
        self.removals.lock().push(id);
    }

    fn is_repl(&self) -> bool {
        self.repl.load(Ordering::SeqCst)
    }

    fn subscribe_channel(&self, channel: &Bytes, subscriber: &Subscriber) {
        self.registry.subscribe_channel(channel, subscriber);
    }

    fn unsubscribe_channel(&self, channel: &Bytes, id: ConnectionId) {
        self.registry.unsubscribe_channel(channel, id);
    }

    fn psubscribe_channel(&self, pattern: &Bytes, subscriber: &Subscriber) {
        self.registry.psubscribe_channel(pattern, subscriber);
    }

    fn punsubscribe_channel(&self, pattern: &Bytes, id: ConnectionId) {
        self.registry.punsubscribe_channel(pattern, id);
    }

    fn add_monitor(&self, subscriber: &Subscriber) {
        self.registry.add_monitor(subscriber);
    }

    fn remove_monitor(&self, id: ConnectionId) {
        self.registry.remove_monitor(id);
    }

    fn incr_outbound_bytes(&self, n: u64) {
        self.outbound.fetch_add(n, Ordering::SeqCst);
    }
}

/// Builds a connection owned by `owner` and timed by `clock`.
pub fn new_connection(
    id: ConnectionId,
    owner: &Arc<RecordingOwner>,
    clock: &Arc<ManualClock>,
) -> (Connection, PushReceiver) {
    Connection::new(id, test_addr(), owner.clone(), clock.clone())
}

/// A newline-delimited engine for exercising the read path without RESP.
///
/// Every line is echoed back with a `+` prefix. `close` sets close-after-reply,
/// `bye` requests removal, `sub <name>` subscribes, and a line starting with
/// `!` is a protocol error.
#[derive(Debug, Default)]
pub struct LineEngine {
    pending: Vec<String>,
    pub executed: Vec<String>,
}

impl RequestEngine for LineEngine {
    fn tokenize(&mut self, input: &mut BytesMut) -> Result<(), ConnError> {
        while let Some(pos) = input.iter().position(|&b| b == b'\n') {
            let line = input.split_to(pos + 1);
            let line = String::from_utf8_lossy(&line[..pos]).trim().to_string();
            if line.starts_with('!') {
                return Err(ConnError::Protocol(format!("bad line '{line}'")));
            }
            self.pending.push(line);
        }
        Ok(())
    }

    fn execute_commands(&mut self, conn: &mut Connection) {
        for line in self.pending.drain(..) {
            match line.split_once(' ') {
                Some(("sub", name)) => {
                    conn.subscribe_channel(Bytes::from(name.to_string()));
                }
                _ if line == "close" => conn.enable_flag(ConnectionFlags::CLOSE_AFTER_REPLY),
                _ if line == "bye" => conn.request_removal(),
                _ => {}
            }
            conn.reply(Bytes::from(format!("+{line}\r\n")));
            self.executed.push(line);
        }
    }
}

/// A server state plus worker, driving connections over in-memory pipes.
pub struct TestServer {
    pub state: Arc<ServerState>,
    pub worker: Arc<Worker>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        init_tracing();
        let state = ServerState::new(config);
        let worker = Arc::new(Worker::new(state.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            state,
            worker,
            shutdown_tx,
        }
    }

    /// Accepts a client on an in-memory pipe and spawns its handler.
    pub fn connect(&self) -> TestClient {
        self.connect_from(test_addr())
    }

    pub fn connect_from(&self, addr: SocketAddr) -> TestClient {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (id, handler) = self.handler_for(server_io, addr);
        let task = tokio::spawn(handler.run());

        let (reader, writer) = tokio::io::split(client_io);
        TestClient {
            id,
            reader: FramedRead::new(reader, RespFrameCodec),
            writer,
            task,
        }
    }

    /// Registers a client and builds the handler that would serve `stream`.
    pub fn handler_for<S>(
        &self,
        stream: S,
        addr: SocketAddr,
    ) -> (ConnectionId, ConnectionHandler<S, RespEngine>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (id, kill_rx) = self.state.register_client(addr);
        let owner: Arc<dyn ConnectionOwner> = self.worker.clone();
        let (conn, push_rx) = Connection::new(id, addr, owner, Arc::new(SystemClock));
        let handler = ConnectionHandler::new(
            stream,
            conn,
            push_rx,
            RespEngine::new(self.state.clone()),
            kill_rx,
            self.shutdown_tx.subscribe(),
            self.state.config.idle_timeout(),
        )
        .with_read_buffer_size(self.state.config.read_buffer_size);
        (id, handler)
    }
}

/// The client side of an in-memory connection.
pub struct TestClient {
    pub id: ConnectionId,
    reader: FramedRead<ReadHalf<DuplexStream>, RespFrameCodec>,
    writer: WriteHalf<DuplexStream>,
    pub task: JoinHandle<RemovalReason>,
}

impl TestClient {
    /// Sends a multibulk request.
    pub async fn send(&mut self, args: &[&str]) {
        let frame = RespFrame::Array(
            args.iter()
                .map(|a| RespFrame::BulkString(Bytes::copy_from_slice(a.as_bytes())))
                .collect(),
        );
        self.send_raw(&frame.to_bytes()).await;
    }

    pub async fn send_raw(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Receives the next frame, failing the test if none arrives in time.
    pub async fn recv(&mut self) -> RespFrame {
        tokio::time::timeout(Duration::from_secs(2), self.reader.next())
            .await
            .expect("timed out waiting for a reply")
            .expect("connection closed")
            .expect("malformed reply")
    }

    pub async fn request(&mut self, args: &[&str]) -> RespFrame {
        self.send(args).await;
        self.recv().await
    }

    /// True once the server side has closed the pipe.
    pub async fn is_closed(&mut self) -> bool {
        matches!(
            tokio::time::timeout(Duration::from_secs(2), self.reader.next()).await,
            Ok(None) | Ok(Some(Err(_)))
        )
    }

    /// Closes the client's write side, which the server sees as EOF.
    pub async fn hang_up(&mut self) {
        self.writer.shutdown().await.unwrap();
    }

    pub async fn finish(self) -> RemovalReason {
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .expect("handler did not stop")
            .expect("handler panicked")
    }
}

pub fn bulk(s: &str) -> RespFrame {
    RespFrame::BulkString(Bytes::copy_from_slice(s.as_bytes()))
}

pub fn simple(s: &str) -> RespFrame {
    RespFrame::SimpleString(s.to_string())
}

/// The `[kind, name, count]` confirmation of a (un)subscribe.
pub fn sub_reply(kind: &str, name: &str, count: i64) -> RespFrame {
    RespFrame::Array(vec![bulk(kind), bulk(name), RespFrame::Integer(count)])
}
