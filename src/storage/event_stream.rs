//! Per-aggregate event stream store.
//!
//! The reader resolves an aggregate identifier to its ordered event list;
//! the appender writes one event per call and is append-only by contract:
//! deletes are rejected outright, and a repeated `(aggregate, sequence)`
//! append collides on the derived document identifier instead of
//! overwriting.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{Result, StorageError};
use crate::event::{document_id, EventRegistry, EventStream, StoredEvent};
use crate::request::{build_request, Method};
use crate::transport::{Transport, TransportError};

use super::{database_name, read_stream_docs, rows_field};

/// Default view keyed by `[aggregate_id, seq_number]`.
pub const DEFAULT_STREAM_VIEW: &str = "event_stream";

/// Design document holding the shared discovery views.
const DISCOVERY_DESIGN_DOC: &str = "default_views";

/// Cursor for scanning all streams, one aggregate per call.
///
/// The identifier set is snapshotted on the first call; aggregates
/// created mid-scan are not visited until the next full rescan. The
/// cursor is a plain value threaded back by the caller, so single-owner
/// usage is part of the type contract.
#[derive(Debug, Clone, Default)]
pub struct StreamCursor {
    identifiers: Vec<String>,
    position: usize,
    primed: bool,
}

/// Reads ordered event streams from the per-aggregate view.
pub struct EventStreamReader<E> {
    transport: Arc<dyn Transport>,
    config: StoreConfig,
    database: String,
    registry: Arc<EventRegistry<E>>,
}

impl<E> EventStreamReader<E> {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: StoreConfig,
        registry: Arc<EventRegistry<E>>,
    ) -> Result<Self> {
        let database = database_name(&config)?;
        Ok(Self {
            transport,
            config,
            database,
            registry,
        })
    }

    /// Read one aggregate's stream, sequence ascending. `None` when the
    /// aggregate has no events.
    pub async fn read(&self, identifier: &str) -> Result<Option<EventStream<E>>> {
        let view_name = self
            .config
            .view_name
            .as_deref()
            .unwrap_or(DEFAULT_STREAM_VIEW);
        let docs = read_stream_docs(
            self.transport.as_ref(),
            &self.database,
            self.config.design_doc.as_deref(),
            view_name,
            identifier,
        )
        .await?;
        let Some(docs) = docs else {
            return Ok(None);
        };

        let mut events = Vec::with_capacity(docs.len());
        for doc in docs {
            events.push(self.registry.decode(doc)?);
        }
        Ok(Some(EventStream {
            identifier: identifier.to_owned(),
            events,
        }))
    }

    /// Advance through all known streams, one aggregate per call.
    ///
    /// A fresh cursor enumerates the aggregate identifiers once via the
    /// grouped discovery view; each subsequent call reads the next
    /// single stream. Returns an empty page once exhausted.
    pub async fn read_all(
        &self,
        cursor: StreamCursor,
    ) -> Result<(Vec<EventStream<E>>, StreamCursor)> {
        let mut cursor = cursor;
        if !cursor.primed {
            cursor = StreamCursor {
                identifiers: self.fetch_stream_identifiers().await?,
                position: 0,
                primed: true,
            };
        }

        let Some(identifier) = cursor.identifiers.get(cursor.position).cloned() else {
            return Ok((Vec::new(), cursor));
        };
        cursor.position += 1;

        let streams = self.read(&identifier).await?.into_iter().collect();
        Ok((streams, cursor))
    }

    async fn fetch_stream_identifiers(&self) -> Result<Vec<String>> {
        let view_name = self
            .config
            .view_name
            .as_deref()
            .unwrap_or(DEFAULT_STREAM_VIEW);

        let mut params = BTreeMap::new();
        params.insert("group".to_owned(), "true".to_owned());
        params.insert("group_level".to_owned(), "1".to_owned());
        params.insert("reduce".to_owned(), "true".to_owned());

        let operation = build_request(
            &self.database,
            &format!("_design/{DISCOVERY_DESIGN_DOC}/_view/{view_name}"),
            Method::Get,
            None,
            params,
        )?;
        let response = self.transport.send(operation).await?;

        let rows = rows_field(&response.body)?;
        let mut identifiers = Vec::with_capacity(rows.len());
        for row in rows {
            let key = row
                .get("key")
                .and_then(|key| key.get(0))
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    StorageError::InvalidBackendResponse(format!(
                        "grouped row without string key: {row}"
                    ))
                })?;
            identifiers.push(key.to_owned());
        }
        Ok(identifiers)
    }
}

/// Appends events to the per-aggregate stream.
pub struct EventStreamAppender {
    transport: Arc<dyn Transport>,
    database: String,
}

impl EventStreamAppender {
    pub fn new(transport: Arc<dyn Transport>, config: StoreConfig) -> Result<Self> {
        let database = database_name(&config)?;
        Ok(Self {
            transport,
            database,
        })
    }

    /// Append one event. The document identifier is derived from the
    /// aggregate identifier and sequence number, so a duplicate append
    /// surfaces as a conflict.
    pub async fn append(&self, event: &dyn StoredEvent) -> Result<()> {
        let document = event.to_document()?;
        let id = document_id(event);
        debug!(
            aggregate = event.aggregate_id(),
            seq = event.seq_number(),
            "appending event"
        );

        let operation = build_request(
            &self.database,
            &id,
            Method::Put,
            Some(document),
            BTreeMap::new(),
        )?;
        let response = self
            .transport
            .send(operation)
            .await
            .map_err(|error| match &error {
                TransportError::Http { status: 409, .. } => StorageError::ConcurrencyConflict {
                    id: id.clone(),
                    reason: error.reason(),
                },
                _ => StorageError::Transport(error),
            })?;

        let acknowledged = response
            .body
            .get("ok")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let revision = response.body.get("rev").and_then(Value::as_str);
        if !acknowledged || revision.is_none() {
            return Err(StorageError::WriteFailed(format!(
                "append acknowledgement missing ok/rev: {}",
                response.body
            )));
        }
        Ok(())
    }

    /// The stream is append-only; deletes always fail.
    pub fn delete(&self, _identifier: &str) -> Result<()> {
        Err(StorageError::OperationNotPermitted(
            "deleting events from an append-only stream",
        ))
    }
}
