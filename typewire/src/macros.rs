//! Macros for declaring message types and handler bindings.
//!
//! - [`message_types!`]: declare wire messages with the required derives and
//!   structural-shape plumbing in one place
//! - [`bind_handlers!`]: turn a plain type's methods into a handler binding
//!   list without writing any dispatch code

/// Declare wire message types.
///
/// Each struct gets `#[derive(Debug, Clone, PartialEq, Serialize,
/// Deserialize)]` plus the structural-shape implementations that feed the
/// fingerprint fold, so the declaration is the single source of both the
/// payload schema and the type identity.
///
/// Supported field types: the integer and float primitives, `bool`,
/// `String`, `Vec<T>` of any supported type, and other declared message
/// types.
///
/// # Example
///
/// ```rust
/// use typewire::message_types;
///
/// message_types! {
///     /// A probe carrying a countdown.
///     pub struct Ping {
///         pub value: i32,
///         pub count: i32,
///     }
///
///     /// Raw frame bytes.
///     pub struct GameFrame {
///         pub bytes: Vec<u8>,
///     }
/// }
/// ```
#[macro_export]
macro_rules! message_types {
    (
        $(
            $(#[$meta:meta])*
            $vis:vis struct $name:ident {
                $(
                    $(#[$field_meta:meta])*
                    $field_vis:vis $field:ident : $ty:ty
                ),* $(,)?
            }
        )*
    ) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
            $vis struct $name {
                $(
                    $(#[$field_meta])*
                    $field_vis $field : $ty,
                )*
            }

            impl $crate::codec::Structural for $name {
                fn shape() -> $crate::codec::Shape {
                    $crate::codec::Shape {
                        members: ::std::vec![
                            $(
                                $crate::codec::Member {
                                    name: stringify!($field),
                                    element: <$ty as $crate::codec::FieldShape>::element(),
                                },
                            )*
                        ],
                    }
                }
            }

            impl $crate::codec::FieldShape for $name {}

            impl $crate::Message for $name {
                fn type_name() -> &'static str {
                    stringify!($name)
                }
            }
        )*
    };
}

/// Bind a type's methods as message handlers.
///
/// Each listed method becomes the handler for its single message parameter;
/// the macro normalizes plain methods and `async` methods into one uniform
/// awaited-to-completion contract. A method with the wrong shape (parameter
/// count, parameter type, non-unit return) fails to compile — handler-shape
/// mistakes never survive to runtime.
///
/// # Example
///
/// ```rust,ignore
/// struct ServerHandler { sender: MessageSender }
///
/// impl ServerHandler {
///     async fn handle_ping(&self, ping: Ping) {
///         self.sender.send(Pong { /* … */ }).await;
///     }
///
///     fn handle_frame(&self, frame: GameFrame) {
///         tracing::info!(len = frame.bytes.len(), "frame received");
///     }
/// }
///
/// bind_handlers! {
///     ServerHandler {
///         async fn handle_ping(Ping);
///         fn handle_frame(GameFrame);
///     }
/// }
/// ```
#[macro_export]
macro_rules! bind_handlers {
    (@munch $handler:ty; $acc:ident;) => {};

    (@munch $handler:ty; $acc:ident; async fn $method:ident($msg:ty); $($rest:tt)*) => {
        $acc.push($crate::dispatch::Binding::new::<$msg>(
            stringify!($method),
            |instance: ::std::sync::Arc<$handler>, message| {
                ::std::boxed::Box::pin(async move { instance.$method(message).await })
            },
        ));
        $crate::bind_handlers!(@munch $handler; $acc; $($rest)*);
    };

    (@munch $handler:ty; $acc:ident; fn $method:ident($msg:ty); $($rest:tt)*) => {
        $acc.push($crate::dispatch::Binding::new::<$msg>(
            stringify!($method),
            |instance: ::std::sync::Arc<$handler>, message| {
                instance.$method(message);
                ::std::boxed::Box::pin(::std::future::ready(()))
            },
        ));
        $crate::bind_handlers!(@munch $handler; $acc; $($rest)*);
    };

    ($handler:ty { $($body:tt)* }) => {
        impl $crate::dispatch::Handlers for $handler {
            fn bindings() -> ::std::vec::Vec<$crate::dispatch::Binding<Self>> {
                let mut bindings = ::std::vec::Vec::new();
                $crate::bind_handlers!(@munch $handler; bindings; $($body)*);
                bindings
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::codec::{Structural, fingerprint};

    message_types! {
        /// Doc comments survive the macro.
        pub struct Probe {
            pub seq: u32,
            pub tag: String,
        }

        pub struct Batch {
            pub probes: Vec<Probe>,
        }
    }

    #[test]
    fn test_generated_derives() {
        let probe = Probe {
            seq: 1,
            tag: "t".to_string(),
        };
        let json = serde_json::to_string(&probe).expect("serialize");
        let parsed: Probe = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, probe);
    }

    #[test]
    fn test_generated_shape_lists_fields_in_order() {
        let shape = Probe::shape();
        let names: Vec<_> = shape.members.iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["seq", "tag"]);
        assert!(shape.members.iter().all(|m| m.element.is_none()));
    }

    #[test]
    fn test_array_of_messages_recurses() {
        let shape = Batch::shape();
        assert_eq!(shape.members.len(), 1);
        let element = shape.members[0].element.expect("array element shape");
        assert_eq!(element().members.len(), 2);

        // The recursion shows up in the fingerprint.
        let flat = crate::codec::Shape {
            members: vec![crate::codec::Member {
                name: "probes",
                element: None,
            }],
        };
        assert_ne!(fingerprint(&Batch::shape()), fingerprint(&flat));
    }
}
