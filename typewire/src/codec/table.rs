//! The per-process type-identity table.
//!
//! A [`TypeTable`] maps every registered message type to a compact `u16` id
//! and back, and owns the encode/decode entry points keyed by those ids. It
//! is built once at startup and shared read-only by every connection.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::shape::{Structural, fingerprint};
use super::{CodecError, MessageCodec};

/// A message type that can cross the wire.
///
/// Implemented by the [`message_types!`](crate::message_types) macro; the
/// registered name is used for diagnostics and as the fingerprint tie-break.
pub trait Message: Structural + Serialize + DeserializeOwned + Send + 'static {
    /// Stable registered name of this message type.
    fn type_name() -> &'static str;
}

type EncodeFn = Arc<dyn Fn(&dyn Any) -> Result<Vec<u8>, CodecError> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<Box<dyn Any + Send>, CodecError> + Send + Sync>;

struct TypeEntry {
    type_id: TypeId,
    name: &'static str,
    fingerprint: i64,
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Errors raised while assembling a type table.
#[derive(Debug, thiserror::Error)]
pub enum TypeSetError {
    /// The same message type was registered twice.
    #[error("message type {name} registered twice")]
    DuplicateType {
        /// Name of the duplicated type.
        name: &'static str,
    },

    /// More types than the 16-bit id space can address.
    #[error("message set has {count} types, more than a u16 id can address")]
    TooManyTypes {
        /// Number of registered types.
        count: usize,
    },
}

/// Errors raised when encoding an outbound message.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// The message type was never registered in the table.
    #[error("message type {name} is not in the type table")]
    UnregisteredType {
        /// Name of the unregistered type.
        name: &'static str,
    },

    /// The payload failed to serialize.
    #[error("failed to encode {name}: {source}")]
    Codec {
        /// Name of the message type.
        name: &'static str,
        /// Underlying codec failure.
        #[source]
        source: CodecError,
    },
}

/// Errors raised when decoding an inbound message.
///
/// Both variants are fatal to the connection: the read loop has no way to
/// resynchronize a stream whose payloads it cannot interpret.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The wire carried an id this process never assigned.
    #[error("unknown type id {type_id}")]
    UnknownTypeId {
        /// The unrecognized id.
        type_id: u16,
    },

    /// The payload bytes do not match the resolved type's shape.
    #[error("payload does not decode as {name}: {source}")]
    Payload {
        /// Name of the resolved message type.
        name: &'static str,
        /// Underlying codec failure.
        #[source]
        source: CodecError,
    },
}

/// Builder for a [`TypeTable`].
///
/// Register every message type the peers agree on, then [`build`] once. Both
/// peers must register the *same set* of types — ids are assigned from the
/// structural fingerprints, so a set mismatch diverges silently. This is a
/// documented protocol-compatibility precondition, not something detected at
/// runtime.
///
/// [`build`]: TypeTableBuilder::build
pub struct TypeTableBuilder<C: MessageCodec> {
    codec: C,
    pending: Vec<TypeEntry>,
}

impl<C: MessageCodec> TypeTableBuilder<C> {
    /// Start a builder over the given payload codec.
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            pending: Vec::new(),
        }
    }

    /// Register a message type into the set.
    pub fn register<M: Message>(mut self) -> Self {
        let codec = self.codec.clone();
        let encode: EncodeFn = Arc::new(move |value| {
            let value = value
                .downcast_ref::<M>()
                .ok_or_else(|| CodecError::Encode("encode vtable type mismatch".into()))?;
            codec.encode(value)
        });

        let codec = self.codec.clone();
        let decode: DecodeFn = Arc::new(move |bytes| {
            codec
                .decode::<M>(bytes)
                .map(|m| Box::new(m) as Box<dyn Any + Send>)
        });

        self.pending.push(TypeEntry {
            type_id: TypeId::of::<M>(),
            name: M::type_name(),
            fingerprint: fingerprint(&M::shape()),
            encode,
            decode,
        });
        self
    }

    /// Sort the registered set and assign ids.
    ///
    /// # Errors
    ///
    /// Returns [`TypeSetError`] on duplicate registration or a set too large
    /// for the 16-bit id space.
    pub fn build(self) -> Result<TypeTable, TypeSetError> {
        let mut entries = self.pending;

        if entries.len() > usize::from(u16::MAX) + 1 {
            return Err(TypeSetError::TooManyTypes {
                count: entries.len(),
            });
        }

        // Ids are a function of the fingerprints, not of registration order.
        // Ties fall back to the registered name so the table stays
        // order-independent even then.
        entries.sort_by(|a, b| {
            a.fingerprint
                .cmp(&b.fingerprint)
                .then_with(|| a.name.cmp(b.name))
        });

        let mut ids = HashMap::with_capacity(entries.len());
        for (id, entry) in entries.iter().enumerate() {
            if ids.insert(entry.type_id, id as u16).is_some() {
                return Err(TypeSetError::DuplicateType { name: entry.name });
            }
        }

        Ok(TypeTable { entries, ids })
    }
}

/// Bidirectional `type ⇄ u16 id` table plus per-type encode/decode entries.
///
/// Built once per process from the agreed Message Type Set, immutable
/// thereafter, shared read-only (via `Arc`) by all connections.
pub struct TypeTable {
    entries: Vec<TypeEntry>,
    ids: HashMap<TypeId, u16>,
}

impl TypeTable {
    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The assigned id of a message type, if registered.
    pub fn id_of<M: Message>(&self) -> Option<u16> {
        self.ids.get(&TypeId::of::<M>()).copied()
    }

    /// The structural fingerprint of a message type, if registered.
    pub fn fingerprint_of<M: Message>(&self) -> Option<i64> {
        let id = self.id_of::<M>()?;
        Some(self.entries[usize::from(id)].fingerprint)
    }

    /// The registered name behind an id.
    pub fn name_of(&self, id: u16) -> Option<&'static str> {
        self.entries.get(usize::from(id)).map(|e| e.name)
    }

    /// Iterate `(id, name, fingerprint)` in id order.
    ///
    /// The fingerprints are the inspectable schema identity of this process;
    /// embedders can log them to compare message sets across peers out of
    /// band.
    pub fn entries(&self) -> impl Iterator<Item = (u16, &'static str, i64)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(id, e)| (id as u16, e.name, e.fingerprint))
    }

    pub(crate) fn contains_type(&self, type_id: TypeId) -> bool {
        self.ids.contains_key(&type_id)
    }

    /// Encode an outbound message, resolving its id.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the type is unregistered or serialization
    /// fails.
    pub fn encode<M: Message>(&self, message: &M) -> Result<(Vec<u8>, u16), EncodeError> {
        let id = self
            .id_of::<M>()
            .ok_or(EncodeError::UnregisteredType {
                name: M::type_name(),
            })?;
        let entry = &self.entries[usize::from(id)];
        let bytes = (entry.encode)(message).map_err(|source| EncodeError::Codec {
            name: entry.name,
            source,
        })?;
        Ok((bytes, id))
    }

    /// Decode an inbound payload into the type behind `id`.
    ///
    /// The value comes back type-erased for dispatch; the dispatch table
    /// downcasts it to the handler's parameter type.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the id is unknown or the bytes do not
    /// match the resolved type.
    pub fn decode(&self, id: u16, bytes: &[u8]) -> Result<Box<dyn Any + Send>, DecodeError> {
        let entry = self
            .entries
            .get(usize::from(id))
            .ok_or(DecodeError::UnknownTypeId { type_id: id })?;
        (entry.decode)(bytes).map_err(|source| DecodeError::Payload {
            name: entry.name,
            source,
        })
    }
}

impl std::fmt::Debug for TypeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeTable")
            .field("types", &self.entries.len())
            .finish()
    }
}
