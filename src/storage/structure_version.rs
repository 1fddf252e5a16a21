//! Schema-version ledger store.
//!
//! One document per logical entity type, holding the ordered list of
//! applied migration versions. Writes do a read-then-write revision
//! dance; "no prior document" is an expected state, not an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{Result, StorageError};
use crate::request::{build_request, Method};
use crate::transport::{Transport, TransportError};
use crate::version::{StructureVersion, StructureVersionList};

use super::{database_name, row_doc, rows_field};

const DEFAULT_LEDGER_LIMIT: usize = 10;

/// Resumable position in the full-ledger scan.
///
/// Exhaustion is explicit: once the backend reports the final page, the
/// cursor drops its key and the following call returns an empty page.
#[derive(Debug, Clone, Default)]
pub struct LedgerCursor {
    last_key: Option<String>,
    started: bool,
}

fn decode_list(document: &Value) -> Result<StructureVersionList> {
    let identifier = document
        .get("_id")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            StorageError::InvalidBackendResponse(format!("document without _id: {document}"))
        })?
        .to_owned();
    let revision = document
        .get("_rev")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let versions = document.get("versions").cloned().ok_or_else(|| {
        StorageError::InvalidBackendResponse(format!("document without versions: {document}"))
    })?;
    let versions: Vec<StructureVersion> = serde_json::from_value(versions)?;

    Ok(StructureVersionList {
        identifier,
        revision,
        versions,
    })
}

/// Reads version ledgers by identifier or as a paginated full scan.
pub struct StructureVersionListReader {
    transport: Arc<dyn Transport>,
    config: StoreConfig,
    database: String,
}

impl StructureVersionListReader {
    pub fn new(transport: Arc<dyn Transport>, config: StoreConfig) -> Result<Self> {
        let database = database_name(&config)?;
        Ok(Self {
            transport,
            config,
            database,
        })
    }

    /// Read one entity type's ledger; `None` when never persisted.
    pub async fn read(&self, identifier: &str) -> Result<Option<StructureVersionList>> {
        if identifier.trim().is_empty() {
            return Err(StorageError::InvalidIdentifier(identifier.to_owned()));
        }

        let operation = build_request(
            &self.database,
            identifier,
            Method::Get,
            None,
            BTreeMap::new(),
        )?;
        let response = match self.transport.send(operation).await {
            Ok(response) => response,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        decode_list(&response.body).map(Some)
    }

    /// Read the next page of the full ledger scan.
    pub async fn read_all(
        &self,
        cursor: LedgerCursor,
    ) -> Result<(Vec<StructureVersionList>, LedgerCursor)> {
        if cursor.started && cursor.last_key.is_none() {
            return Ok((Vec::new(), cursor));
        }

        let limit = self.config.limit.unwrap_or(DEFAULT_LEDGER_LIMIT);
        let mut params = BTreeMap::new();
        params.insert("include_docs".to_owned(), "true".to_owned());
        params.insert("limit".to_owned(), limit.to_string());
        if let Some(last_key) = &cursor.last_key {
            params.insert("skip".to_owned(), "1".to_owned());
            params.insert(
                "startkey".to_owned(),
                Value::String(last_key.clone()).to_string(),
            );
        }

        let operation = build_request(
            &self.database,
            "_all_docs",
            Method::Get,
            None,
            params,
        )?;
        let response = self.transport.send(operation).await?;

        let total_rows = response.body.get("total_rows").and_then(Value::as_u64);
        let offset = response.body.get("offset").and_then(Value::as_u64);
        let (Some(total_rows), Some(offset)) = (total_rows, offset) else {
            return Err(StorageError::InvalidBackendResponse(format!(
                "missing total_rows/offset fields: {}",
                response.body
            )));
        };

        let rows = rows_field(&response.body)?;
        let mut lists = Vec::with_capacity(rows.len());
        for row in rows {
            lists.push(decode_list(&row_doc(row)?)?);
        }

        // Final page: drop the key so the following call signals
        // exhaustion with an empty result.
        let last_key = if total_rows == offset + 1 {
            None
        } else {
            lists.last().map(|list| list.identifier.clone())
        };

        Ok((
            lists,
            LedgerCursor {
                last_key,
                started: true,
            },
        ))
    }
}

/// Writes version ledgers with optimistic concurrency.
pub struct StructureVersionListWriter {
    transport: Arc<dyn Transport>,
    database: String,
}

impl StructureVersionListWriter {
    pub fn new(transport: Arc<dyn Transport>, config: StoreConfig) -> Result<Self> {
        let database = database_name(&config)?;
        Ok(Self {
            transport,
            database,
        })
    }

    /// Persist the whole ledger, updating in place when it already
    /// exists. A stale revision is rejected by the backend and
    /// propagated as a conflict.
    pub async fn write(&self, list: &StructureVersionList) -> Result<()> {
        let revision = self.current_revision(&list.identifier).await;

        let mut body = json!({
            "identifier": list.identifier,
            "versions": serde_json::to_value(&list.versions)?,
        });
        if let Some(revision) = revision {
            body["revision"] = Value::String(revision);
        }

        let operation = build_request(
            &self.database,
            &list.identifier,
            Method::Put,
            Some(body),
            BTreeMap::new(),
        )?;
        let response = self
            .transport
            .send(operation)
            .await
            .map_err(|error| match &error {
                TransportError::Http { status: 409, .. } => StorageError::ConcurrencyConflict {
                    id: list.identifier.clone(),
                    reason: error.reason(),
                },
                _ => StorageError::Transport(error),
            })?;

        let acknowledged = response
            .body
            .get("ok")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let new_revision = response.body.get("rev").and_then(Value::as_str);
        if !acknowledged || new_revision.is_none() {
            return Err(StorageError::WriteFailed(format!(
                "ledger acknowledgement missing ok/rev: {}",
                response.body
            )));
        }
        Ok(())
    }

    /// Best-effort delete: "already gone" is a benign state.
    pub async fn delete(&self, identifier: &str) -> Result<()> {
        let Some(revision) = self.current_revision(identifier).await else {
            warn!(identifier, "skipping ledger delete, no current revision");
            return Ok(());
        };

        let body = json!({ "revision": revision });
        let operation = build_request(
            &self.database,
            identifier,
            Method::Delete,
            Some(body),
            BTreeMap::new(),
        )?;
        if let Err(error) = self.transport.send(operation).await {
            warn!(identifier, error = %error, "best-effort ledger delete failed");
        }
        Ok(())
    }

    /// Current backend revision of the document, when it exists.
    ///
    /// Lookup failure is an expected state (first creation), distinct
    /// from a known revision; the write proceeds without one.
    async fn current_revision(&self, identifier: &str) -> Option<String> {
        let operation = build_request(
            &self.database,
            identifier,
            Method::Get,
            None,
            BTreeMap::new(),
        )
        .ok()?;
        match self.transport.send(operation).await {
            Ok(response) => response
                .body
                .get("_rev")
                .and_then(Value::as_str)
                .map(str::to_owned),
            Err(error) => {
                debug!(identifier, error = %error, "no current revision");
                None
            }
        }
    }
}
