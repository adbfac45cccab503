//! The listening side: accept loop, per-connection wiring, shutdown.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::NetConfig;
use super::connection::{Connection, ConnectionId, MessageSender, Registry};
use super::hooks::ConnectionHooks;
use super::NetError;
use crate::codec::TypeTable;
use crate::dispatch::{DispatchTable, HandlerContext, HandlerFactory};
use crate::pipe;
use crate::pool::BufferPool;

/// A listening message server.
///
/// Owns the TCP listen socket, the accept loop, and the live-connection
/// registry. Every accepted connection gets its own handler instance (from
/// the factory), its own dispatch table, and its own listening pipe.
pub struct MessageServer {
    local_addr: String,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
    accept_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MessageServer {
    /// Bind the listen socket and start accepting.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Bind`] when the endpoint cannot be bound.
    pub async fn bind<F: HandlerFactory>(
        config: NetConfig,
        types: Arc<TypeTable>,
        factory: Arc<F>,
        hooks: Arc<dyn ConnectionHooks>,
    ) -> Result<Self, NetError> {
        let listener = TcpListener::bind(&config.endpoint)
            .await
            .map_err(|source| NetError::Bind {
                addr: config.endpoint.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| config.endpoint.clone());

        let registry = Arc::new(Registry::default());
        let shutdown = CancellationToken::new();

        let pool = BufferPool::with_options(config.pool_block_size, config.strict_pool);
        let loop_ctx = AcceptContext {
            config,
            types,
            factory,
            hooks,
            registry: Arc::clone(&registry),
            pool,
            shutdown: shutdown.clone(),
        };

        tracing::debug!(addr = %local_addr, "server listening");
        let accept_handle = tokio::spawn(accept_loop(listener, loop_ctx));

        Ok(Self {
            local_addr,
            registry,
            shutdown,
            accept_handle: tokio::sync::Mutex::new(Some(accept_handle)),
        })
    }

    /// The actual bound address (useful when binding port 0).
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Stop accepting and tear down every live connection.
    ///
    /// Teardown is best-effort per connection: one stuck connection cannot
    /// block the rest.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        if let Some(handle) = self.accept_handle.lock().await.take() {
            let _ = handle.await;
        }

        for connection in self.registry.drain() {
            connection.disconnect().await;
        }
        tracing::debug!(addr = %self.local_addr, "server stopped");
    }
}

struct AcceptContext<F: HandlerFactory> {
    config: NetConfig,
    types: Arc<TypeTable>,
    factory: Arc<F>,
    hooks: Arc<dyn ConnectionHooks>,
    registry: Arc<Registry>,
    pool: BufferPool,
    shutdown: CancellationToken,
}

async fn accept_loop<F: HandlerFactory>(listener: TcpListener, ctx: AcceptContext<F>) {
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let peer = peer.to_string();
                    if let Err(error) = admit(&ctx, stream, peer.clone()).await {
                        tracing::warn!(%peer, %error, "failed to set up incoming connection");
                    }
                }
                Err(error) => {
                    // One bad accept must not stop service for the others.
                    tracing::warn!(%error, "accept failed");
                }
            }
        }
    }
    tracing::debug!("accept loop stopped");
}

async fn admit<F: HandlerFactory>(
    ctx: &AcceptContext<F>,
    stream: TcpStream,
    peer: String,
) -> Result<(), NetError> {
    let id = ConnectionId::new();
    let (connection, reader) = Connection::wire_up(
        id,
        peer,
        stream,
        ctx.pool.clone(),
        ctx.config.write_timeout,
        Arc::clone(&ctx.hooks),
        Arc::downgrade(&ctx.registry),
        ctx.shutdown.child_token(),
    );
    let info = connection.info();

    if !ctx.hooks.on_verify(&info).await {
        tracing::debug!(id = %info.id, peer = %info.peer_addr, "connection rejected by verify hook");
        // Dropping the halves closes the socket; no record was kept.
        return Ok(());
    }

    ctx.registry.insert(Arc::clone(&connection));

    let sender = MessageSender::new(Arc::clone(&connection), Arc::clone(&ctx.types));
    let handler = ctx.factory.build(HandlerContext {
        sender,
        connection_id: id,
    });

    let table = match DispatchTable::bind(handler, &ctx.types) {
        Ok(table) => table,
        Err(error) => {
            // The record must not outlive a failed setup; the accept loop
            // keeps running for other connections.
            ctx.registry.remove(id);
            return Err(error.into());
        }
    };

    pipe::spawn(reader, table, Arc::clone(&ctx.types), Arc::clone(&connection));
    ctx.hooks.on_connected(&info).await;
    tracing::debug!(id = %info.id, peer = %info.peer_addr, "connection established");
    Ok(())
}
