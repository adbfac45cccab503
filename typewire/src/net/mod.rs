//! The connection runtime: server acceptor, client dialer, connection
//! records, lifecycle hooks, and configuration.

mod client;
mod config;
mod connection;
mod hooks;
mod server;

pub use client::MessageClient;
pub use config::NetConfig;
pub use connection::{Connection, ConnectionId, MessageSender};
pub use hooks::{ConnectionHooks, ConnectionInfo, DisconnectReason, NoHooks};
pub use server::MessageServer;

pub(crate) use connection::BoxedReadHalf;

use crate::dispatch::BindingError;

/// Failures establishing a server or client.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The listen socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The endpoint that failed to bind.
        addr: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The outbound dial failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// The endpoint that failed to connect.
        addr: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The handler type's bindings are invalid.
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// The verify hook declined the connection.
    #[error("connection rejected by verification hook")]
    Rejected,
}
