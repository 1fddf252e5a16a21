//! Global chronological event feed.
//!
//! Reads the flat, insertion-ordered feed of all events through a
//! timestamp-keyed view, resuming via an exclusive-after-key cursor.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::StoreConfig;
use crate::error::{Result, StorageError};
use crate::event::EventRegistry;
use crate::request::{build_request, Method};
use crate::transport::Transport;

use super::{database_name, read_stream_docs, row_doc, rows_field};
use super::event_stream::DEFAULT_STREAM_VIEW;

/// Default view keyed by event timestamp.
pub const DEFAULT_FEED_VIEW: &str = "events_by_timestamp";

const DEFAULT_FEED_LIMIT: usize = 100;

/// Document field holding the feed's ordering key.
const ORDERING_FIELD: &str = "iso_date";

/// Resumable position in the chronological feed.
///
/// Holds the ordering key of the last delivered event; the next page
/// starts exclusively after it. A default cursor starts from the
/// beginning.
#[derive(Debug, Clone, Default)]
pub struct FeedCursor {
    last_key: Option<String>,
}

/// Reads the global event feed.
pub struct DomainEventReader<E> {
    transport: Arc<dyn Transport>,
    config: StoreConfig,
    database: String,
    registry: Arc<EventRegistry<E>>,
}

impl<E> DomainEventReader<E> {
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

    /// Read one aggregate's events, sequence ascending; a convenience
    /// overlay on the same storage as the stream reader.
    pub async fn read(&self, identifier: &str) -> Result<Option<Vec<E>>> {
        let docs = read_stream_docs(
            self.transport.as_ref(),
            &self.database,
            self.config.design_doc.as_deref(),
            DEFAULT_STREAM_VIEW,
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
        Ok(Some(events))
    }

    /// Read the next page of the chronological feed.
    ///
    /// The returned cursor resumes exclusively after the last delivered
    /// event's ordering key; an exhausted feed yields empty pages.
    pub async fn read_all(&self, cursor: FeedCursor) -> Result<(Vec<E>, FeedCursor)> {
        let design_doc = self
            .config
            .design_doc
            .as_deref()
            .ok_or(StorageError::MissingConfig("design_doc"))?;
        let view_name = self
            .config
            .view_name
            .as_deref()
            .unwrap_or(DEFAULT_FEED_VIEW);
        let limit = self.config.limit.unwrap_or(DEFAULT_FEED_LIMIT);

        let mut params = BTreeMap::new();
        params.insert("include_docs".to_owned(), "true".to_owned());
        params.insert("reduce".to_owned(), "false".to_owned());
        params.insert("limit".to_owned(), limit.to_string());
        if let Some(last_key) = &cursor.last_key {
            // Exclusive-after-key: the previously delivered last event is
            // skipped, not re-delivered.
            params.insert("skip".to_owned(), "1".to_owned());
            params.insert(
                "startkey".to_owned(),
                Value::String(last_key.clone()).to_string(),
            );
        }

        let operation = build_request(
            &self.database,
            &format!("_design/{design_doc}/_view/{view_name}"),
            Method::Get,
            None,
            params,
        )?;
        let response = self.transport.send(operation).await?;
        let rows = rows_field(&response.body)?;

        let mut events = Vec::with_capacity(rows.len());
        let mut last_key = cursor.last_key;
        for row in rows {
            let doc = row_doc(row)?;
            let ordering_key = doc
                .get(ORDERING_FIELD)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    StorageError::InvalidBackendResponse(format!(
                        "event document without {ORDERING_FIELD}: {doc}"
                    ))
                })?
                .to_owned();
            events.push(self.registry.decode(doc)?);
            last_key = Some(ordering_key);
        }

        Ok((events, FeedCursor { last_key }))
    }
}
