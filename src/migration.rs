//! Database and design-document lifecycle management.
//!
//! Deploys a view bundle (map/reduce sources read from disk) as a single
//! design document, and creates or tears down the target database. Runs
//! at deployment time, off the request-serving path, through the same
//! request builder and transport as the stores.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::config::MigrationConfig;
use crate::error::{Result, StorageError};
use crate::request::{build_request, Method};
use crate::transport::Transport;

const MAP_FILE_SUFFIX: &str = ".map.js";
const REDUCE_FILE_SUFFIX: &str = ".reduce.js";

const DESIGN_NAME_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.');

/// Manages a database's existence and its design documents.
pub struct CouchMigration {
    transport: Arc<dyn Transport>,
    config: MigrationConfig,
}

impl CouchMigration {
    pub fn new(transport: Arc<dyn Transport>, config: MigrationConfig) -> Self {
        Self { transport, config }
    }

    /// True when the target database exists. 404 maps to `false`; any
    /// other failure propagates.
    pub async fn database_exists(&self) -> Result<bool> {
        let operation = build_request(
            &self.config.database,
            "",
            Method::Get,
            None,
            BTreeMap::new(),
        )?;
        match self.transport.send(operation).await {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    /// Create the database when absent; redeploy the view bundle when
    /// requested. Idempotent.
    pub async fn ensure_database(&self, update_views: bool) -> Result<()> {
        if !self.database_exists().await? {
            self.create_database(update_views).await
        } else if update_views {
            self.update_design_doc().await
        } else {
            Ok(())
        }
    }

    async fn create_database(&self, update_views: bool) -> Result<()> {
        let operation = build_request(
            &self.config.database,
            "",
            Method::Put,
            None,
            BTreeMap::new(),
        )?;
        let response = self.transport.send(operation).await.map_err(|error| {
            StorageError::MigrationFailed {
                reason: format!(
                    "failed to create database {}: {}",
                    self.config.database,
                    error.reason()
                ),
            }
        })?;
        if response.status != 201 {
            return Err(StorageError::MigrationFailed {
                reason: format!(
                    "failed to create database {}: status {} with {}",
                    self.config.database, response.status, response.body
                ),
            });
        }
        info!(database = %self.config.database, "database created");

        if update_views {
            self.update_design_doc().await
        } else {
            Ok(())
        }
    }

    /// Drop the database. Absence is a no-op success.
    pub async fn delete_database(&self) -> Result<()> {
        if !self.database_exists().await? {
            return Ok(());
        }

        let operation = build_request(
            &self.config.database,
            "",
            Method::Delete,
            None,
            BTreeMap::new(),
        )?;
        let response = self.transport.send(operation).await.map_err(|error| {
            StorageError::MigrationFailed {
                reason: format!(
                    "failed to delete database {}: {}",
                    self.config.database,
                    error.reason()
                ),
            }
        })?;
        if response.status != 200 {
            return Err(StorageError::MigrationFailed {
                reason: format!(
                    "failed to delete database {}: status {} with {}",
                    self.config.database, response.status, response.body
                ),
            });
        }
        info!(database = %self.config.database, "database deleted");
        Ok(())
    }

    /// Deploy the view bundle, replacing the design document's whole
    /// `views` map with the definitions found on disk.
    pub async fn update_design_doc(&self) -> Result<()> {
        let views = collect_views(&self.config.views_directory)?;
        let path = self.design_doc_path();

        let mut document = match self.fetch_design_doc(&path).await? {
            Some(existing) => existing,
            None => json!({ "language": "javascript" }),
        };
        document["views"] = Value::Object(views);

        let operation = build_request(
            &self.config.database,
            &path,
            Method::Put,
            Some(document),
            BTreeMap::new(),
        )?;
        self.transport.send(operation).await.map_err(|error| {
            StorageError::MigrationFailed {
                reason: format!("failed to deploy design document: {}", error.reason()),
            }
        })?;
        info!(
            database = %self.config.database,
            design_doc = %self.config.design_doc,
            "design document deployed"
        );
        Ok(())
    }

    /// Remove the design document. Absence at any step is success.
    pub async fn delete_design_doc(&self) -> Result<()> {
        let path = self.design_doc_path();
        let Some(document) = self.fetch_design_doc(&path).await? else {
            return Ok(());
        };
        let Some(revision) = document.get("_rev").and_then(Value::as_str) else {
            return Ok(());
        };

        let mut params = BTreeMap::new();
        params.insert("rev".to_owned(), revision.to_owned());
        let operation = build_request(
            &self.config.database,
            &path,
            Method::Delete,
            None,
            params,
        )?;
        match self.transport.send(operation).await {
            Ok(_) => Ok(()),
            Err(error) if error.is_not_found() => Ok(()),
            Err(error) => Err(StorageError::MigrationFailed {
                reason: format!("failed to delete design document: {}", error.reason()),
            }),
        }
    }

    fn design_doc_path(&self) -> String {
        format!(
            "_design/{}",
            utf8_percent_encode(&self.config.design_doc, DESIGN_NAME_ENCODE)
        )
    }

    async fn fetch_design_doc(&self, path: &str) -> Result<Option<Value>> {
        let operation = build_request(
            &self.config.database,
            path,
            Method::Get,
            None,
            BTreeMap::new(),
        )?;
        match self.transport.send(operation).await {
            Ok(response) => Ok(Some(response.body)),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(StorageError::MigrationFailed {
                reason: format!("failed to fetch design document: {}", error.reason()),
            }),
        }
    }
}

/// Scan the views directory for `<name>.map.js` sources, pairing each
/// with an optional `<name>.reduce.js` sibling.
fn collect_views(directory: &Path) -> Result<Map<String, Value>> {
    if !directory.is_dir() {
        return Err(StorageError::MigrationFailed {
            reason: format!("views directory {} does not exist", directory.display()),
        });
    }

    let read_failure = |error: std::io::Error| StorageError::MigrationFailed {
        reason: format!("failed to read views directory: {error}"),
    };

    let mut file_names: Vec<String> = fs::read_dir(directory)
        .map_err(read_failure)?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<_>>()
        .map_err(read_failure)?;
    file_names.sort();

    let mut views = Map::new();
    for file_name in file_names {
        let Some(view_name) = file_name.strip_suffix(MAP_FILE_SUFFIX) else {
            continue;
        };
        let map_function =
            fs::read_to_string(directory.join(&file_name)).map_err(read_failure)?;
        let mut view = json!({ "map": map_function });

        let reduce_path = directory.join(format!("{view_name}{REDUCE_FILE_SUFFIX}"));
        if reduce_path.is_file() {
            view["reduce"] = Value::String(
                fs::read_to_string(&reduce_path).map_err(read_failure)?,
            );
        }

        views.insert(view_name.to_owned(), view);
    }
    Ok(views)
}
