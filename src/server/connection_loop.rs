// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use super::stream::ClientStream;
use crate::connection::{Connection, ConnectionHandler, ConnectionOwner, SystemClock};
use crate::core::handler::RespEngine;
use crate::core::protocol::RespFrame;
use crate::core::state::ServerState;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{OwnedSemaphorePermit, broadcast};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// The main server loop that accepts connections and handles graceful shutdown.
pub async fn run(mut ctx: ServerContext) -> Result<()> {
    let mut client_tasks = JoinSet::new();

    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => accept_client(&ctx, &mut client_tasks, socket, addr).await,
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        debug!("No task was listening for the shutdown signal.");
    }

    if tokio::time::timeout(Duration::from_secs(5), async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for clients to disconnect; aborting the rest.");
        client_tasks.shutdown().await;
    }
    info!("All client connections closed.");

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
    Ok(())
}

/// Admits one accepted socket, or turns it away when the server is full.
async fn accept_client(
    ctx: &ServerContext,
    client_tasks: &mut JoinSet<()>,
    mut socket: TcpStream,
    addr: SocketAddr,
) {
    let Ok(permit) = ctx.connection_permits.clone().try_acquire_owned() else {
        warn!("Rejecting connection from {}: max number of clients reached.", addr);
        let reply = RespFrame::Error("ERR max number of clients reached".to_string()).to_bytes();
        let _ = socket.write_all(&reply).await;
        return;
    };
    debug!("Accepted new connection from: {}", addr);

    let state = ctx.state.clone();
    let owner: Arc<dyn ConnectionOwner> = ctx.worker.clone();
    let acceptor = ctx.acceptor.clone();
    let shutdown_rx = ctx.shutdown_tx.subscribe();
    client_tasks.spawn(async move {
        let stream = match open_stream(socket, addr, acceptor).await {
            Some(stream) => stream,
            None => return,
        };
        serve_client(stream, addr, state, owner, shutdown_rx, permit).await;
    });
}

/// Completes the TLS handshake when TLS is enabled.
async fn open_stream(
    socket: TcpStream,
    addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
) -> Option<ClientStream> {
    if let Err(e) = socket.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
    }
    let Some(acceptor) = acceptor else {
        return Some(ClientStream::Tcp(socket));
    };
    match acceptor.accept(socket).await {
        Ok(tls_stream) => {
            debug!("TLS handshake successful for {addr}");
            Some(ClientStream::Tls(Box::new(tls_stream)))
        }
        Err(e) => {
            warn!("TLS handshake error for {addr}: {e}");
            None
        }
    }
}

/// Registers the client, then drives its connection until removal.
async fn serve_client(
    stream: ClientStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
    owner: Arc<dyn ConnectionOwner>,
    shutdown_rx: broadcast::Receiver<()>,
    _permit: OwnedSemaphorePermit,
) {
    let (id, kill_rx) = state.register_client(addr);
    let (conn, push_rx) = Connection::new(id, addr, owner, Arc::new(SystemClock));
    info!(
        "Client {} connected from {}{}.",
        id,
        addr,
        if stream.is_tls() { " over TLS" } else { "" }
    );
    if let Ok(local) = stream.tcp().local_addr() {
        debug!("Client {} is served on {}.", id, local);
    }

    let engine = RespEngine::new(state.clone());
    let handler = ConnectionHandler::new(
        stream,
        conn,
        push_rx,
        engine,
        kill_rx,
        shutdown_rx,
        state.config.idle_timeout(),
    )
    .with_read_buffer_size(state.config.read_buffer_size);
    handler.run().await;
}
