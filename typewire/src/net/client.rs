//! The dialing side: one outbound connection.

use std::sync::{Arc, Weak};

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use super::config::NetConfig;
use super::connection::{Connection, ConnectionId, MessageSender};
use super::hooks::ConnectionHooks;
use super::NetError;
use crate::codec::TypeTable;
use crate::dispatch::{DispatchTable, HandlerContext, HandlerFactory};
use crate::pipe;
use crate::pool::BufferPool;

/// A client holding exactly one outbound connection.
///
/// Runs the same verify/connected lifecycle as the server side, inline —
/// there is no accept loop because there is exactly one connection. No
/// reconnection: when the connection closes, a new client is a new
/// connection.
pub struct MessageClient {
    connection: Arc<Connection>,
    sender: MessageSender,
}

impl MessageClient {
    /// Dial the configured endpoint and wire the connection up.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Connect`] when the dial fails,
    /// [`NetError::Rejected`] when the verify hook declines, and
    /// [`NetError::Binding`] when the handler's bindings are invalid.
    pub async fn connect<F: HandlerFactory>(
        config: NetConfig,
        types: Arc<TypeTable>,
        factory: Arc<F>,
        hooks: Arc<dyn ConnectionHooks>,
    ) -> Result<Self, NetError> {
        let stream = TcpStream::connect(&config.endpoint)
            .await
            .map_err(|source| NetError::Connect {
                addr: config.endpoint.clone(),
                source,
            })?;
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| config.endpoint.clone());

        let id = ConnectionId::new();
        let pool = BufferPool::with_options(config.pool_block_size, config.strict_pool);
        let (connection, reader) = Connection::wire_up(
            id,
            peer,
            stream,
            pool,
            config.write_timeout,
            Arc::clone(&hooks),
            Weak::new(),
            CancellationToken::new(),
        );
        let info = connection.info();

        if !hooks.on_verify(&info).await {
            tracing::debug!(id = %info.id, peer = %info.peer_addr, "connection rejected by verify hook");
            return Err(NetError::Rejected);
        }

        let sender = MessageSender::new(Arc::clone(&connection), Arc::clone(&types));
        let handler = factory.build(HandlerContext {
            sender: sender.clone(),
            connection_id: id,
        });
        let table = DispatchTable::bind(handler, &types)?;

        pipe::spawn(reader, table, types, Arc::clone(&connection));
        hooks.on_connected(&info).await;
        tracing::debug!(id = %info.id, peer = %info.peer_addr, "connected");

        Ok(Self { connection, sender })
    }

    /// The per-connection sender.
    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    /// Identity of the underlying connection.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Whether the connection is still working.
    pub fn is_connected(&self) -> bool {
        self.connection.is_working()
    }

    /// Tear the connection down.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }
}

impl std::fmt::Debug for MessageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageClient")
            .field("connection", &self.connection.id())
            .field("connected", &self.is_connected())
            .finish()
    }
}
