//! Handler binding and message dispatch.
//!
//! A handler is a plain type whose methods are declared through
//! [`bind_handlers!`](crate::bind_handlers); the macro produces the
//! per-type binding list once, and [`DispatchTable::bind`] closes each
//! binding over a concrete instance to build the per-connection table. The
//! table maps a decoded message's concrete type to exactly one handler
//! invocation.

mod factory;

pub use factory::{
    FnHandlerFactory, HandlerContext, HandlerFactory, SingletonHandlerFactory,
};

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::codec::{Message, TypeTable};

/// A type whose methods handle inbound messages.
///
/// Implemented by [`bind_handlers!`](crate::bind_handlers); the binding
/// list is a property of the *type* — [`DispatchTable::bind`] re-closes it
/// over each per-connection instance.
pub trait Handlers: Send + Sync + Sized + 'static {
    /// The handler bindings of this type.
    fn bindings() -> Vec<Binding<Self>>;
}

type ErasedInvoke<H> =
    Arc<dyn Fn(Arc<H>, Box<dyn Any + Send>) -> BoxFuture<'static, ()> + Send + Sync>;

/// One handler method of a handler type: the message type it accepts plus an
/// adapter that downcasts and invokes, normalized to an awaitable future.
pub struct Binding<H> {
    message_type: TypeId,
    message_name: &'static str,
    method: &'static str,
    invoke: ErasedInvoke<H>,
}

impl<H: Handlers> Binding<H> {
    /// Build a binding for a method accepting message type `M`.
    ///
    /// Used by the [`bind_handlers!`](crate::bind_handlers) expansion; the
    /// adapter receives the instance and the already-downcast message.
    pub fn new<M: Message>(
        method: &'static str,
        invoke: fn(Arc<H>, M) -> BoxFuture<'static, ()>,
    ) -> Self {
        Self {
            message_type: TypeId::of::<M>(),
            message_name: M::type_name(),
            method,
            invoke: Arc::new(move |instance, message| match message.downcast::<M>() {
                Ok(message) => invoke(instance, *message),
                Err(_) => {
                    // The table is keyed by TypeId, so a mismatched downcast
                    // cannot be reached through dispatch.
                    debug_assert!(false, "dispatch downcast mismatch");
                    Box::pin(std::future::ready(()))
                }
            }),
        }
    }

    /// Name of the accepted message type.
    pub fn message_name(&self) -> &'static str {
        self.message_name
    }

    /// Name of the bound method.
    pub fn method(&self) -> &'static str {
        self.method
    }
}

/// Binding-time configuration failures.
///
/// Raised once when a connection's table is bound, never per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    /// Two handler methods accept the same message type.
    #[error("duplicate handler for {message}: {first} and {second}")]
    DuplicateMessageType {
        /// The contested message type.
        message: &'static str,
        /// The method bound first.
        first: &'static str,
        /// The conflicting method.
        second: &'static str,
    },

    /// A handler method accepts a type missing from the type table.
    #[error("handler {method} accepts {message}, which is not in the type table")]
    UnregisteredMessageType {
        /// The unknown message type.
        message: &'static str,
        /// The offending method.
        method: &'static str,
    },
}

/// Dispatch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The decoded message's type has no bound handler. Fatal to the
    /// connection, like a decode failure: the stream is intact but the peer
    /// contract is not.
    #[error("no handler bound for the incoming message type")]
    NoHandler,
}

struct DispatchEntry {
    message_name: &'static str,
    method: &'static str,
    run: Arc<dyn Fn(Box<dyn Any + Send>) -> BoxFuture<'static, ()> + Send + Sync>,
}

/// Per-connection `message type → handler invocation` table.
///
/// Immutable after construction; owned by the connection's listening pipe.
pub struct DispatchTable {
    entries: HashMap<TypeId, DispatchEntry>,
}

impl DispatchTable {
    /// Close a handler type's bindings over `instance`.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError`] when two methods accept the same message
    /// type or a method accepts a type the table does not know.
    pub fn bind<H: Handlers>(
        instance: Arc<H>,
        types: &TypeTable,
    ) -> Result<Self, BindingError> {
        let bindings = H::bindings();
        let mut entries = HashMap::with_capacity(bindings.len());

        for binding in bindings {
            if !types.contains_type(binding.message_type) {
                return Err(BindingError::UnregisteredMessageType {
                    message: binding.message_name,
                    method: binding.method,
                });
            }

            let instance = Arc::clone(&instance);
            let invoke = Arc::clone(&binding.invoke);
            let entry = DispatchEntry {
                message_name: binding.message_name,
                method: binding.method,
                run: Arc::new(move |message| invoke(Arc::clone(&instance), message)),
            };

            if let Some(existing) = entries.insert(binding.message_type, entry) {
                return Err(BindingError::DuplicateMessageType {
                    message: binding.message_name,
                    first: existing.method,
                    second: binding.method,
                });
            }
        }

        Ok(Self { entries })
    }

    /// Dispatch a decoded message to its handler, awaiting completion.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoHandler`] when the message's concrete type
    /// has no bound handler.
    pub async fn dispatch(&self, message: Box<dyn Any + Send>) -> Result<(), DispatchError> {
        let type_id = message.as_ref().type_id();
        let entry = self.entries.get(&type_id).ok_or(DispatchError::NoHandler)?;
        tracing::trace!(
            message = entry.message_name,
            method = entry.method,
            "dispatching"
        );
        (entry.run)(message).await;
        Ok(())
    }

    /// Whether a handler is bound for message type `M`.
    pub fn handles<M: Message>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<M>())
    }

    /// Number of bound message types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no handlers are bound.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("handlers", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::codec::{JsonCodec, TypeTableBuilder};
    use crate::{bind_handlers, message_types};

    message_types! {
        pub struct Ping {
            pub value: i32,
            pub count: i32,
        }

        pub struct Note {
            pub text: String,
        }

        pub struct Unhandled {
            pub ignored: bool,
        }
    }

    #[derive(Default)]
    struct Recorder {
        pings: Mutex<Vec<Ping>>,
        notes: AtomicU32,
    }

    impl Recorder {
        async fn record_ping(&self, ping: Ping) {
            self.pings.lock().expect("lock").push(ping);
        }

        fn record_note(&self, _note: Note) {
            self.notes.fetch_add(1, Ordering::SeqCst);
        }
    }

    bind_handlers! {
        Recorder {
            async fn record_ping(Ping);
            fn record_note(Note);
        }
    }

    fn types() -> TypeTable {
        TypeTableBuilder::new(JsonCodec)
            .register::<Ping>()
            .register::<Note>()
            .register::<Unhandled>()
            .build()
            .expect("build table")
    }

    #[tokio::test]
    async fn test_dispatch_invokes_exactly_one_handler() {
        let recorder = Arc::new(Recorder::default());
        let table = DispatchTable::bind(Arc::clone(&recorder), &types()).expect("bind");
        assert_eq!(table.len(), 2);

        let ping = Ping {
            value: 100,
            count: 5,
        };
        table
            .dispatch(Box::new(ping.clone()))
            .await
            .expect("dispatch");

        let pings = recorder.pings.lock().expect("lock");
        assert_eq!(pings.as_slice(), &[ping]);
        assert_eq!(recorder.notes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sync_handler_is_normalized() {
        let recorder = Arc::new(Recorder::default());
        let table = DispatchTable::bind(Arc::clone(&recorder), &types()).expect("bind");

        table
            .dispatch(Box::new(Note {
                text: "hi".to_string(),
            }))
            .await
            .expect("dispatch");
        assert_eq!(recorder.notes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unbound_type_is_a_dispatch_error() {
        let recorder = Arc::new(Recorder::default());
        let table = DispatchTable::bind(recorder, &types()).expect("bind");

        let err = table
            .dispatch(Box::new(Unhandled { ignored: true }))
            .await
            .expect_err("no handler");
        assert_eq!(err, DispatchError::NoHandler);
    }

    #[test]
    fn test_binding_against_incomplete_type_table() {
        let types = TypeTableBuilder::new(JsonCodec)
            .register::<Ping>()
            .build()
            .expect("build table");

        let err = DispatchTable::bind(Arc::new(Recorder::default()), &types)
            .expect_err("Note is unregistered");
        assert_eq!(
            err,
            BindingError::UnregisteredMessageType {
                message: "Note",
                method: "record_note",
            }
        );
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        struct Doubled;

        impl Doubled {
            fn first(&self, _ping: Ping) {}
            fn second(&self, _ping: Ping) {}
        }

        bind_handlers! {
            Doubled {
                fn first(Ping);
                fn second(Ping);
            }
        }

        let err = DispatchTable::bind(Arc::new(Doubled), &types())
            .expect_err("duplicate must fail");
        assert_eq!(
            err,
            BindingError::DuplicateMessageType {
                message: "Ping",
                first: "first",
                second: "second",
            }
        );
    }

    #[test]
    fn test_bindings_are_a_property_of_the_type() {
        let first = Recorder::bindings();
        let second = Recorder::bindings();
        let names =
            |b: &[Binding<Recorder>]| b.iter().map(|x| x.message_name()).collect::<Vec<_>>();
        assert_eq!(names(&first), names(&second));
    }

    #[test]
    fn test_handles_reports_bound_types() {
        let table =
            DispatchTable::bind(Arc::new(Recorder::default()), &types()).expect("bind");
        assert!(table.handles::<Ping>());
        assert!(table.handles::<Note>());
        assert!(!table.handles::<Unhandled>());
    }
}
