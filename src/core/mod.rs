// src/core/mod.rs

//! Server-wide pieces the connection layer talks to: errors, the RESP
//! protocol, the request engine, the pub/sub registry, shared state and metrics.

pub mod errors;
pub mod handler;
pub mod metrics;
pub mod protocol;
pub mod pubsub;
pub mod state;

pub use errors::ConnError;
pub use handler::RequestEngine;
