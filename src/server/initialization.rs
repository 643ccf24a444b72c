// src/server/initialization.rs

//! Builds everything the accept loop needs: shared state, the TLS acceptor
//! and the bound listener.

use super::context::ServerContext;
use super::worker::Worker;
use crate::config::Config;
use crate::core::metrics;
use crate::core::state::ServerState;
use anyhow::{Context, Result, anyhow};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_rustls::{TlsAcceptor, rustls};
use tracing::{info, warn};

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let acceptor = setup_tls(&config)?;

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!("Server listening on {}:{}", config.host, config.port);

    metrics::init_removal_reason_labels();
    let connection_permits = Arc::new(Semaphore::new(config.max_clients));
    let state = ServerState::new(config);
    let worker = Arc::new(Worker::new(state.clone()));
    info!("Server state initialized.");

    Ok(ServerContext {
        state,
        worker,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        acceptor,
        connection_permits,
    })
}

/// Sets up the TLS acceptor if TLS is enabled in the configuration.
fn setup_tls(config: &Config) -> Result<Option<TlsAcceptor>> {
    if !config.tls.enabled {
        return Ok(None);
    }
    info!("TLS is enabled. Loading certificate and key.");
    let certs = load_certs(&config.tls.cert_path)?;
    let key = load_key(&config.tls.key_path)?;
    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
}

/// Loads TLS certificates from a PEM file.
fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let cert_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open certificate file '{}': {}", path, e))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in '{}'", path));
    }
    Ok(certs)
}

/// Loads a private key from a PEM file.
fn load_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let key_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open private key file '{}': {}", path, e))?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow!("No private key found in key file '{}'", path))
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    info!("Accepting up to {} concurrent clients.", config.max_clients);
    match config.idle_timeout() {
        Some(timeout) => info!(
            "Idle connections receive a timeout event every {}s.",
            timeout.as_secs()
        ),
        None => info!("Idle timeout events are disabled."),
    }
    if config.tls.enabled && config.metrics.enabled {
        warn!("The metrics endpoint is served over plain HTTP even though TLS is enabled.");
    }
}
