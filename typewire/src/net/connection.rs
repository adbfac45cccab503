//! Connection records, the live registry, and the per-connection sender.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use super::hooks::{ConnectionHooks, ConnectionInfo, DisconnectReason};
use crate::codec::{Message, TypeTable};
use crate::pool::BufferPool;
use crate::wire::{FrameReader, FrameWriter, TransportError};

/// Opaque unique identity of one connection.
///
/// A new connection is always a new id; ids are never reused or
/// renegotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new() -> Self {
        Self(rand::random())
    }

    /// The raw 64-bit value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

const STATUS_WORKING: u8 = 0;
const STATUS_CLOSING: u8 = 1;

pub(crate) type BoxedReadHalf = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriteHalf = Box<dyn AsyncWrite + Send + Unpin>;

/// One live connection: identity, socket write half, and the at-most-once
/// disconnect state machine.
///
/// Status transitions exactly once, `Working → Closing`, enforced by an
/// atomic compare-and-set, so concurrent disconnect triggers — a write
/// failure racing an application-initiated close, say — collapse into a
/// single effective disconnect.
pub struct Connection {
    id: ConnectionId,
    peer_addr: String,
    status: AtomicU8,
    cancel: CancellationToken,
    writer: tokio::sync::Mutex<FrameWriter<BoxedWriteHalf>>,
    hooks: Arc<dyn ConnectionHooks>,
    registry: Weak<Registry>,
}

impl Connection {
    /// Split a stream and build the connection record plus the frame reader
    /// its listening pipe will own.
    pub(crate) fn wire_up<S>(
        id: ConnectionId,
        peer_addr: String,
        stream: S,
        pool: BufferPool,
        write_timeout: Duration,
        hooks: Arc<dyn ConnectionHooks>,
        registry: Weak<Registry>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, FrameReader<BoxedReadHalf>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = FrameReader::new(Box::new(read_half) as BoxedReadHalf, pool);
        let writer = FrameWriter::new(Box::new(write_half) as BoxedWriteHalf, write_timeout);

        let connection = Arc::new(Self {
            id,
            peer_addr,
            status: AtomicU8::new(STATUS_WORKING),
            cancel,
            writer: tokio::sync::Mutex::new(writer),
            hooks,
            registry,
        });
        (connection, reader)
    }

    /// This connection's id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address.
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Whether the connection is still in its working state.
    pub fn is_working(&self) -> bool {
        self.status.load(Ordering::SeqCst) == STATUS_WORKING
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            peer_addr: self.peer_addr.clone(),
        }
    }

    pub(crate) async fn write_frame(
        &self,
        payload: &[u8],
        type_id: u16,
    ) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.write_message(payload, type_id, &self.cancel).await
    }

    /// Tear the connection down gracefully.
    ///
    /// Safe to call any number of times from any task; only the first caller
    /// to win the `Working → Closing` transition runs the teardown.
    pub async fn disconnect(&self) {
        self.close(DisconnectReason::Requested).await;
    }

    /// Tear the connection down because of a failure.
    ///
    /// Same at-most-once discipline as [`disconnect`](Self::disconnect).
    pub async fn disconnect_with_error(&self, error: &str) {
        self.close(DisconnectReason::Error(error.to_string())).await;
    }

    async fn close(&self, reason: DisconnectReason) {
        if self
            .status
            .compare_exchange(
                STATUS_WORKING,
                STATUS_CLOSING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            tracing::debug!(id = %self.id, "disconnect already in progress");
            return;
        }

        tracing::debug!(id = %self.id, peer = %self.peer_addr, %reason, "closing connection");

        // Stop the listening pipe and abort any in-flight read or write.
        self.cancel.cancel();

        self.hooks.on_disconnected(&self.info(), &reason).await;

        // Close the socket. The cancel above unblocks any sender holding the
        // write lock, so this acquires promptly.
        self.writer.lock().await.shutdown().await;

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("working", &self.is_working())
            .finish()
    }
}

/// Live-connection registry: inserted by the accept loop, removed by
/// whichever disconnect path wins the close.
#[derive(Default)]
pub(crate) struct Registry {
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Registry {
    pub(crate) fn insert(&self, connection: Arc<Connection>) {
        let mut map = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        map.insert(connection.id(), connection);
    }

    pub(crate) fn remove(&self, id: ConnectionId) {
        let mut map = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        map.remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub(crate) fn drain(&self) -> Vec<Arc<Connection>> {
        let mut map = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        map.drain().map(|(_, connection)| connection).collect()
    }
}

/// Per-connection message sender.
///
/// Cloneable; usable from handler methods or any other code holding it.
/// Sends are best-effort: failures are logged, trigger error-disconnect of
/// the connection, and never surface into the caller.
#[derive(Clone)]
pub struct MessageSender {
    connection: Arc<Connection>,
    types: Arc<TypeTable>,
}

impl MessageSender {
    pub(crate) fn new(connection: Arc<Connection>, types: Arc<TypeTable>) -> Self {
        Self { connection, types }
    }

    /// Identity of the connection this sender writes to.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Send one message to the peer.
    ///
    /// Concurrent callers interleave at message granularity; no ordering is
    /// guaranteed across senders. A send that fails tears the connection
    /// down and is otherwise swallowed.
    pub async fn send<M: Message>(&self, message: M) {
        let (payload, type_id) = match self.types.encode(&message) {
            Ok(encoded) => encoded,
            Err(error) => {
                tracing::warn!(id = %self.connection.id(), %error, "dropping unencodable message");
                return;
            }
        };

        match self.connection.write_frame(&payload, type_id).await {
            Ok(()) => {}
            Err(TransportError::Cancelled) => {
                tracing::debug!(id = %self.connection.id(), "send cancelled by teardown");
            }
            Err(error) => {
                tracing::warn!(id = %self.connection.id(), %error, "send failed, disconnecting");
                self.connection.disconnect_with_error(&error.to_string()).await;
            }
        }
    }
}

impl std::fmt::Debug for MessageSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSender")
            .field("connection", &self.connection.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::net::NoHooks;

    struct CountingHooks {
        disconnects: AtomicUsize,
        errors: AtomicUsize,
    }

    impl CountingHooks {
        fn new() -> Self {
            Self {
                disconnects: AtomicUsize::new(0),
                errors: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ConnectionHooks for CountingHooks {
        async fn on_disconnected(&self, _info: &ConnectionInfo, reason: &DisconnectReason) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            if matches!(reason, DisconnectReason::Error(_)) {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn wire_test_connection(
        hooks: Arc<dyn ConnectionHooks>,
    ) -> (Arc<Connection>, FrameReader<BoxedReadHalf>) {
        let (stream, _other) = tokio::io::duplex(1024);
        Connection::wire_up(
            ConnectionId::new(),
            "test-peer".to_string(),
            stream,
            BufferPool::new(64),
            Duration::from_secs(1),
            hooks,
            Weak::new(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_disconnect_runs_side_effects_exactly_once() {
        let hooks = Arc::new(CountingHooks::new());
        let (connection, _reader) = wire_test_connection(hooks.clone());

        // Race a graceful disconnect against an error disconnect.
        let a = connection.disconnect();
        let b = connection.disconnect_with_error("write failed");
        tokio::join!(a, b);

        assert_eq!(hooks.disconnects.load(Ordering::SeqCst), 1);
        assert!(!connection.is_working());

        // Later triggers stay no-ops.
        connection.disconnect().await;
        assert_eq!(hooks.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnect_reports_reason() {
        let hooks = Arc::new(CountingHooks::new());
        let (connection, _reader) = wire_test_connection(hooks.clone());

        connection.disconnect_with_error("magic mismatch").await;
        assert_eq!(hooks.errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registry_insert_remove() {
        let registry = Arc::new(Registry::default());
        let (connection, _reader) = wire_test_connection(Arc::new(NoHooks));

        registry.insert(Arc::clone(&connection));
        assert_eq!(registry.len(), 1);

        registry.remove(connection.id());
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_close_removes_from_registry() {
        let registry = Arc::new(Registry::default());
        let (stream, _other) = tokio::io::duplex(1024);
        let (connection, _reader) = Connection::wire_up(
            ConnectionId::new(),
            "test-peer".to_string(),
            stream,
            BufferPool::new(64),
            Duration::from_secs(1),
            Arc::new(NoHooks),
            Arc::downgrade(&registry),
            CancellationToken::new(),
        );
        registry.insert(Arc::clone(&connection));

        connection.disconnect().await;
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_connection_id_display() {
        let id = ConnectionId(0xAB);
        assert_eq!(id.to_string(), "00000000000000ab");
    }
}
