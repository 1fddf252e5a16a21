//! Event document model and the type-discriminator decode registry.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Result, StorageError};

/// Document field carrying the event-type discriminator.
pub const TYPE_FIELD: &str = "@type";

/// An event the appender can persist.
///
/// The document identifier is derived from the aggregate identifier and
/// the sequence number, so the backend rejects a duplicate
/// `(aggregate, sequence)` append as a conflict instead of silently
/// overwriting history.
pub trait StoredEvent: Send + Sync {
    fn aggregate_id(&self) -> &str;

    /// Monotonically increasing sequence number within the aggregate.
    fn seq_number(&self) -> u64;

    /// Serialize into the JSON document written to the backend. The
    /// document must carry the [`TYPE_FIELD`] discriminator so readers
    /// can decode it again.
    fn to_document(&self) -> Result<Value>;
}

/// Derived document identifier for an event: `{aggregate_id}-{seq_number}`.
pub fn document_id(event: &dyn StoredEvent) -> String {
    format!("{}-{}", event.aggregate_id(), event.seq_number())
}

type DecodeFn<E> = Box<dyn Fn(Value) -> Result<E> + Send + Sync>;

/// Closed registry mapping discriminator strings to decoders.
///
/// Built once at startup and shared by every reader. Unknown
/// discriminators fail with a typed error rather than being dispatched
/// dynamically.
pub struct EventRegistry<E> {
    decoders: HashMap<String, DecodeFn<E>>,
}

impl<E> Default for EventRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventRegistry<E> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register a decoder for one event type.
    pub fn register<F>(&mut self, event_type: impl Into<String>, decode: F)
    where
        F: Fn(Value) -> Result<E> + Send + Sync + 'static,
    {
        self.decoders.insert(event_type.into(), Box::new(decode));
    }

    /// Decode one event document via its discriminator field.
    pub fn decode(&self, document: Value) -> Result<E> {
        let event_type = document
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .ok_or(StorageError::MissingTypeDiscriminator)?
            .to_owned();

        let decode = self
            .decoders
            .get(&event_type)
            .ok_or(StorageError::UnknownEventType(event_type))?;

        decode(document)
    }
}

/// The ordered event history of one aggregate, sequence ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct EventStream<E> {
    pub identifier: String,
    pub events: Vec<E>,
}
