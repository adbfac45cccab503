//! Application hooks gating and observing the connection lifecycle.

use async_trait::async_trait;

use super::ConnectionId;

/// What the application learns about a connection in lifecycle hooks.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Unique identity of the connection.
    pub id: ConnectionId,
    /// Remote address, as reported by the socket.
    pub peer_addr: String,
}

/// Why a connection was torn down.
#[derive(Debug, Clone)]
pub enum DisconnectReason {
    /// Explicit disconnect or cooperative cancellation.
    Requested,
    /// A transport, decode, or dispatch failure.
    Error(String),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "requested"),
            DisconnectReason::Error(error) => write!(f, "error: {error}"),
        }
    }
}

/// Lifecycle hooks implemented by the embedding application.
///
/// All hooks default to no-ops; `on_verify` defaults to accepting.
#[async_trait]
pub trait ConnectionHooks: Send + Sync + 'static {
    /// Gate a connection before any handler exists for it. Returning
    /// `false` closes the socket and keeps no record.
    async fn on_verify(&self, info: &ConnectionInfo) -> bool {
        let _ = info;
        true
    }

    /// A connection was accepted and its listening pipe is running.
    async fn on_connected(&self, info: &ConnectionInfo) {
        let _ = info;
    }

    /// A connection finished its teardown. Invoked exactly once per
    /// connection regardless of how many disconnect triggers fired.
    async fn on_disconnected(&self, info: &ConnectionInfo, reason: &DisconnectReason) {
        let _ = (info, reason);
    }
}

/// Hook set that accepts everything and observes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

#[async_trait]
impl ConnectionHooks for NoHooks {}
