//! CouchDB store implementations.
//!
//! Each store owns one access pattern over the same database: the
//! per-aggregate event stream, the global chronological feed and the
//! schema-version ledger. All of them funnel through the shared request
//! builder and a caller-supplied [`Transport`](crate::transport::Transport).

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::config::StoreConfig;
use crate::error::{Result, StorageError};
use crate::request::{build_request, Method};
use crate::transport::Transport;

pub mod domain_event;
pub mod event_stream;
pub mod structure_version;

pub use domain_event::{DomainEventReader, FeedCursor};
pub use event_stream::{EventStreamAppender, EventStreamReader, StreamCursor};
pub use structure_version::{
    LedgerCursor, StructureVersionListReader, StructureVersionListWriter,
};

/// Upper bound on a single stream read; one aggregate's history is read
/// as a unit.
pub(crate) const STREAM_PAGE_LIMIT: usize = 1000;

pub(crate) fn database_name(config: &StoreConfig) -> Result<String> {
    match config.database.as_deref() {
        Some(database) if !database.trim().is_empty() => Ok(database.to_owned()),
        _ => Err(StorageError::MissingConfig("database")),
    }
}

pub(crate) fn rows_field(body: &Value) -> Result<&Vec<Value>> {
    body.get("rows").and_then(Value::as_array).ok_or_else(|| {
        StorageError::InvalidBackendResponse(format!("missing rows field: {body}"))
    })
}

pub(crate) fn row_doc(row: &Value) -> Result<Value> {
    match row.get("doc") {
        Some(doc) if !doc.is_null() => Ok(doc.clone()),
        _ => Err(StorageError::InvalidBackendResponse(format!(
            "row without document body: {row}"
        ))),
    }
}

/// Range-query one aggregate's documents from a `[aggregate_id, seq]`
/// keyed view, returned in ascending sequence order.
///
/// The `["id", {}]` .. `["id", 1]` bracket combined with descending
/// delivery captures exactly the keys whose first component equals the
/// identifier, since objects sort after numbers in CouchDB view keys.
/// 404 and an empty result both map to `None`.
pub(crate) async fn read_stream_docs(
    transport: &dyn Transport,
    database: &str,
    design_doc: Option<&str>,
    view_name: &str,
    identifier: &str,
) -> Result<Option<Vec<Value>>> {
    if identifier.trim().is_empty() {
        return Err(StorageError::InvalidIdentifier(identifier.to_owned()));
    }
    let design_doc = design_doc.ok_or(StorageError::MissingConfig("design_doc"))?;

    let mut params = BTreeMap::new();
    params.insert("startkey".to_owned(), json!([identifier, {}]).to_string());
    params.insert("endkey".to_owned(), json!([identifier, 1]).to_string());
    params.insert("include_docs".to_owned(), "true".to_owned());
    params.insert("reduce".to_owned(), "false".to_owned());
    params.insert("descending".to_owned(), "true".to_owned());
    params.insert("limit".to_owned(), STREAM_PAGE_LIMIT.to_string());

    let operation = build_request(
        database,
        &format!("_design/{design_doc}/_view/{view_name}"),
        Method::Get,
        None,
        params,
    )?;

    let response = match transport.send(operation).await {
        Ok(response) => response,
        Err(error) if error.is_not_found() => return Ok(None),
        Err(error) => return Err(error.into()),
    };

    let total_rows = response
        .body
        .get("total_rows")
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            StorageError::InvalidBackendResponse(format!(
                "missing total_rows field: {}",
                response.body
            ))
        })?;
    if total_rows == 0 {
        return Ok(None);
    }

    let rows = rows_field(&response.body)?;
    if rows.is_empty() {
        return Ok(None);
    }

    // The view delivers descending; flip back to ascending sequence order.
    let mut docs = Vec::with_capacity(rows.len());
    for row in rows.iter().rev() {
        docs.push(row_doc(row)?);
    }
    Ok(Some(docs))
}
