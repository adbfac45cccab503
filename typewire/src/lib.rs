//! # typewire
//!
//! Self-hosted, bidirectional message-RPC over raw TCP.
//!
//! Peers exchange typed messages framed by a small binary header; each
//! inbound message is dispatched to a handler method selected by the
//! message's concrete type. There is no external RPC stack and no on-wire
//! schema negotiation: both peers derive the same compact type ids from the
//! structural fingerprints of an agreed message set.
//!
//! This crate provides:
//! - **Wire codec**: structural type identity (`type ⇄ u16 id`) plus
//!   pluggable payload serialization
//! - **Framed transport**: one message at a time over an 8-byte header, with
//!   per-write timeouts and cancellation
//! - **Buffer pool**: block-sized reusable buffers with generation-checked
//!   returns
//! - **Connection runtime**: server acceptor, client dialer, live-connection
//!   registry, at-most-once disconnect
//! - **Handler binding**: declarative `bind_handlers!` registration feeding
//!   a per-connection dispatch table
//!
//! # Protocol compatibility
//!
//! Both peers must register the *same* message set: ids are assigned by
//! sorting structural fingerprints, so a renamed member or a divergent set
//! silently shifts ids. Fingerprints are inspectable via
//! [`TypeTable::entries`] for out-of-band comparison.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use typewire::{
//!     FnHandlerFactory, JsonCodec, MessageClient, MessageSender, MessageServer, NetConfig,
//!     NoHooks, TypeTableBuilder, bind_handlers, message_types,
//! };
//!
//! message_types! {
//!     pub struct Ping {
//!         pub value: i32,
//!         pub count: i32,
//!     }
//! }
//!
//! struct EchoHandler {
//!     sender: MessageSender,
//! }
//!
//! impl EchoHandler {
//!     async fn on_ping(&self, ping: Ping) {
//!         if ping.count > 0 {
//!             self.sender
//!                 .send(Ping {
//!                     value: ping.value,
//!                     count: ping.count - 1,
//!                 })
//!                 .await;
//!         }
//!     }
//! }
//!
//! bind_handlers! {
//!     EchoHandler {
//!         async fn on_ping(Ping);
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let types = Arc::new(TypeTableBuilder::new(JsonCodec).register::<Ping>().build()?);
//! let factory = Arc::new(FnHandlerFactory::new(|ctx| EchoHandler { sender: ctx.sender }));
//!
//! let server = MessageServer::bind(
//!     NetConfig::new("127.0.0.1:4600"),
//!     Arc::clone(&types),
//!     Arc::clone(&factory),
//!     Arc::new(NoHooks),
//! )
//! .await?;
//!
//! let client = MessageClient::connect(
//!     NetConfig::new(server.local_addr()),
//!     types,
//!     factory,
//!     Arc::new(NoHooks),
//! )
//! .await?;
//!
//! client.sender().send(Ping { value: 1, count: 3 }).await;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// =============================================================================
// Modules
// =============================================================================

/// Payload serialization, structural shapes, and the type-identity table.
pub mod codec;

/// Handler binding, dispatch tables, and handler factories.
pub mod dispatch;

/// Servers, clients, connections, and lifecycle hooks.
pub mod net;

/// Generation-checked buffer pooling.
pub mod pool;

/// Frame header layout and the framed transport.
pub mod wire;

mod macros;
mod pipe;

// =============================================================================
// Public API Re-exports
// =============================================================================

// Codec exports
pub use codec::{
    CodecError, DecodeError, EncodeError, FieldShape, JsonCodec, Member, Message, MessageCodec,
    Shape, Structural, TypeSetError, TypeTable, TypeTableBuilder, fingerprint,
};

// Dispatch exports
pub use dispatch::{
    Binding, BindingError, DispatchError, DispatchTable, FnHandlerFactory, HandlerContext,
    HandlerFactory, Handlers, SingletonHandlerFactory,
};

// Connection runtime exports
pub use net::{
    Connection, ConnectionHooks, ConnectionId, ConnectionInfo, DisconnectReason, MessageClient,
    MessageSender, MessageServer, NetConfig, NetError, NoHooks,
};

// Pool exports
pub use pool::{BufferPool, DEFAULT_BLOCK_SIZE, PoolError, PoolStats, PooledBuffer};

// Wire format exports
pub use wire::{
    FrameHeader, FrameReader, FrameWriter, HEADER_SIZE, MAGIC, ProtocolError, RawMessage,
    TransportError,
};
