//! Configuration types for the CouchDB connector and stores.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Basic-auth credentials.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

/// Health-probe status override, used by ops tooling to pin the reported
/// connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Working,
    Failing,
    Unknown,
}

/// Connection configuration for the reqwest-backed transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Base URI of the CouchDB host, e.g. `http://localhost:5984`.
    pub base_uri: String,
    /// Scheme override; combined with `host` and `port` when all three
    /// are set, taking precedence over `base_uri`.
    pub transport: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Default database for stores that do not name their own; applied
    /// via [`StoreConfig::with_connection_defaults`].
    pub database: Option<String>,
    pub auth: Option<AuthConfig>,
    /// Headers applied to every request.
    pub default_headers: HashMap<String, String>,
    /// Query parameters merged into every request; request-level
    /// parameters win on conflict.
    pub default_query: HashMap<String, String>,
    /// Path probed by the connection health check. No probe is issued
    /// when unset.
    pub status_test: Option<String>,
    /// Collect transfer diagnostics during the health probe.
    pub status_verbose: bool,
    /// Pin the health probe outcome without touching the network.
    pub fake_status: Option<StatusKind>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_uri: "http://localhost:5984".to_owned(),
            transport: None,
            host: None,
            port: None,
            database: None,
            auth: None,
            default_headers: HashMap::new(),
            default_query: HashMap::new(),
            status_test: None,
            status_verbose: true,
            fake_status: None,
        }
    }
}

impl ConnectionConfig {
    /// Effective base URI: `transport://host:port` when all three parts
    /// are configured, otherwise `base_uri`.
    pub fn effective_base_uri(&self) -> String {
        match (&self.transport, &self.host, self.port) {
            (Some(scheme), Some(host), Some(port)) => {
                format!("{}://{}:{}", scheme, host, port)
            }
            _ => self.base_uri.clone(),
        }
    }
}

/// Per-store configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database name; [`with_connection_defaults`](Self::with_connection_defaults)
    /// fills it from the connection-level database when unset.
    pub database: Option<String>,
    /// Design document holding this store's view.
    pub design_doc: Option<String>,
    /// View name; each store has its own default.
    pub view_name: Option<String>,
    /// Page size for cursor reads; each store has its own default.
    pub limit: Option<usize>,
}

impl StoreConfig {
    /// Convenience constructor for the common case.
    pub fn for_database(database: impl Into<String>) -> Self {
        Self {
            database: Some(database.into()),
            ..Self::default()
        }
    }

    /// Fill unset fields from the connection-level defaults.
    ///
    /// Applied when wiring stores to a connector, so a deployment can
    /// name the database once on the connection.
    pub fn with_connection_defaults(mut self, connection: &ConnectionConfig) -> Self {
        if self.database.is_none() {
            self.database = connection.database.clone();
        }
        self
    }
}

/// Configuration for database and design-document migrations.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    pub database: String,
    /// Name of the design document the view bundle is deployed to.
    pub design_doc: String,
    /// Directory scanned for `*.map.js` / `*.reduce.js` view sources.
    pub views_directory: PathBuf,
}
