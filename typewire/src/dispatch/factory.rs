//! Per-connection handler construction.

use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use super::Handlers;
use crate::net::{ConnectionId, MessageSender};

/// What a handler gets to know about its connection at construction time.
#[derive(Clone)]
pub struct HandlerContext {
    /// Sender bound to this connection, usable from handler methods or
    /// anywhere the handler hands it to.
    pub sender: MessageSender,
    /// Identity of the connection the handler serves.
    pub connection_id: ConnectionId,
}

/// Builds exactly one handler instance per connection.
pub trait HandlerFactory: Send + Sync + 'static {
    /// The handler type this factory produces.
    type Handler: Handlers;

    /// Build the handler for one connection.
    fn build(&self, context: HandlerContext) -> Arc<Self::Handler>;
}

/// Closure-backed factory.
///
/// The closure decides whether to capture the context's sender, which
/// subsumes both the sender-injecting and the plain construction paths; a
/// handler type with neither simply cannot produce a factory, so the failure
/// is at build time, never per connection.
pub struct FnHandlerFactory<H, F> {
    build: F,
    _marker: PhantomData<fn() -> H>,
}

impl<H, F> FnHandlerFactory<H, F>
where
    H: Handlers,
    F: Fn(HandlerContext) -> H + Send + Sync + 'static,
{
    /// Wrap a construction closure.
    pub fn new(build: F) -> Self {
        Self {
            build,
            _marker: PhantomData,
        }
    }
}

impl<H, F> HandlerFactory for FnHandlerFactory<H, F>
where
    H: Handlers,
    F: Fn(HandlerContext) -> H + Send + Sync + 'static,
{
    type Handler = H;

    fn build(&self, context: HandlerContext) -> Arc<H> {
        Arc::new((self.build)(context))
    }
}

/// Factory wrapper that remembers the first instance it produced.
///
/// Per-connection semantics are unchanged — every connection still gets its
/// own instance — but the first one is exposed for inspection, which is only
/// meaningful when exactly one connection is expected (tests, single-client
/// tools).
pub struct SingletonHandlerFactory<F: HandlerFactory> {
    inner: F,
    first: OnceLock<Arc<F::Handler>>,
}

impl<F: HandlerFactory> SingletonHandlerFactory<F> {
    /// Wrap an inner factory.
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            first: OnceLock::new(),
        }
    }

    /// The first handler instance built, if any connection arrived yet.
    pub fn first(&self) -> Option<Arc<F::Handler>> {
        self.first.get().cloned()
    }
}

impl<F: HandlerFactory> HandlerFactory for SingletonHandlerFactory<F> {
    type Handler = F::Handler;

    fn build(&self, context: HandlerContext) -> Arc<F::Handler> {
        let handler = self.inner.build(context);
        let _ = self.first.set(Arc::clone(&handler));
        handler
    }
}
