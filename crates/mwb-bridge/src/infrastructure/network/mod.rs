//! Network infrastructure: tokio TCP adapters around the sans-IO service.
//!
//! # Sub-modules
//!
//! - **`listener`** – Binds the message and clipboard ports and forwards
//!   accepted streams to the event loop.
//!
//! - **`connection`** – Per-connection reader and writer tasks. They own the
//!   socket halves and nothing else; bytes travel over channels.
//!
//! - **`runtime`** – The single event-loop task that owns the
//!   `CompatService` and performs its `NetAction`s.

pub mod connection;
pub mod listener;
pub mod runtime;

use std::net::SocketAddr;

use mwb_core::Channel;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::application::SessionId;

pub use runtime::{BridgeHandle, BridgeRuntime};

/// Error type for socket-level operations.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {addr} failed: {reason}")]
    ConnectFailed { addr: String, reason: String },

    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Notifications from I/O tasks to the event loop.
#[derive(Debug)]
pub enum NetEvent {
    Accepted {
        channel: Channel,
        stream: TcpStream,
        remote: SocketAddr,
    },
    Connected {
        id: SessionId,
        stream: TcpStream,
    },
    ConnectFailed {
        id: SessionId,
        error: String,
    },
    Data {
        id: SessionId,
        bytes: Vec<u8>,
    },
    /// `error` is `None` when the peer closed the stream cleanly.
    Closed {
        id: SessionId,
        error: Option<String>,
    },
}
