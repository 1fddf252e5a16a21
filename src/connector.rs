//! reqwest-backed transport and connection health probe.

use std::collections::HashSet;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use serde_json::{json, Value};
use url::Url;

use crate::config::{ConnectionConfig, StatusKind};
use crate::error::{Result, StorageError};
use crate::request::{Method, Operation};
use crate::transport::{BackendResponse, Transport, TransportError};

/// Outcome of the connection health probe.
///
/// The details payload is free-form diagnostic data: effective URL,
/// transfer time and status code on success, response headers or the
/// transport error message on failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Working { details: Value },
    Failing { details: Value },
    Unknown { details: Value },
}

/// HTTP connection to a CouchDB host.
///
/// Owns the reqwest client and the connection-level defaults (auth,
/// headers, query parameters). Stores talk to it through the
/// [`Transport`] trait only.
#[derive(Debug)]
pub struct CouchConnector {
    client: reqwest::Client,
    base_uri: String,
    auth: Option<(String, String)>,
    default_query: Vec<(String, String)>,
    status_test: Option<String>,
    status_verbose: bool,
    fake_status: Option<StatusKind>,
}

impl CouchConnector {
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let base_uri = config.effective_base_uri();
        Url::parse(&base_uri)
            .map_err(|e| StorageError::InvalidConfig(format!("base URI {base_uri:?}: {e}")))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| StorageError::InvalidConfig(format!("header {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| StorageError::InvalidConfig(format!("header {name:?}: {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?;

        let mut default_query: Vec<(String, String)> = config
            .default_query
            .into_iter()
            .collect();
        default_query.sort();

        Ok(Self {
            client,
            base_uri: base_uri.trim_end_matches('/').to_owned(),
            auth: config
                .auth
                .filter(|auth| !auth.username.is_empty() && !auth.password.is_empty())
                .map(|auth| (auth.username, auth.password)),
            default_query,
            status_test: config.status_test,
            status_verbose: config.status_verbose,
            fake_status: config.fake_status,
        })
    }

    fn url_for(&self, path_and_query: &str) -> std::result::Result<Url, TransportError> {
        let separator = if path_and_query.starts_with('/') { "" } else { "/" };
        let mut url = Url::parse(&format!("{}{}{}", self.base_uri, separator, path_and_query))
            .map_err(|e| TransportError::Network(format!("invalid request URL: {e}")))?;

        if !self.default_query.is_empty() {
            let present: HashSet<String> =
                url.query_pairs().map(|(key, _)| key.into_owned()).collect();
            let missing: Vec<&(String, String)> = self
                .default_query
                .iter()
                .filter(|(key, _)| !present.contains(key))
                .collect();
            if !missing.is_empty() {
                let mut pairs = url.query_pairs_mut();
                for (key, value) in missing {
                    pairs.append_pair(key, value);
                }
            }
        }

        Ok(url)
    }

    /// Probe the configured status path and classify the outcome.
    ///
    /// Transport-level failures are caught and reported as `Failing`;
    /// this never returns an error.
    pub async fn status(&self) -> Status {
        if let Some(kind) = self.fake_status {
            let details = json!({ "message": "fake status configured" });
            return match kind {
                StatusKind::Working => Status::Working { details },
                StatusKind::Failing => Status::Failing { details },
                StatusKind::Unknown => Status::Unknown { details },
            };
        }

        let Some(path) = self.status_test.clone() else {
            return Status::Unknown {
                details: json!({ "message": "no status_test path configured" }),
            };
        };

        let operation = Operation {
            method: Method::Get,
            path: path.clone(),
            body: None,
        };
        let started = Instant::now();

        match self.send(operation).await {
            Ok(response) if response.status < 300 => {
                let mut details = json!({ "message": format!("GET succeeded: {path}") });
                if self.status_verbose {
                    details["info"] = json!({
                        "effective_uri": self
                            .url_for(&path)
                            .map(|url| url.to_string())
                            .unwrap_or_default(),
                        "transfer_time": started.elapsed().as_secs_f64(),
                        "status_code": response.status,
                    });
                }
                Status::Working { details }
            }
            Ok(response) => Status::Failing {
                details: json!({
                    "message": format!("GET failed: {path}"),
                    "status_code": response.status,
                    "headers": headers_to_json(&response.headers),
                }),
            },
            Err(TransportError::Http {
                status, headers, ..
            }) => Status::Failing {
                details: json!({
                    "message": format!("GET failed: {path}"),
                    "status_code": status,
                    "headers": headers_to_json(&headers),
                }),
            },
            Err(TransportError::Network(message)) => {
                tracing::warn!(path = %path, error = %message, "status probe failed");
                Status::Failing {
                    details: json!({ "message": format!("error on {path:?}: {message}") }),
                }
            }
        }
    }
}

fn headers_to_json(headers: &HeaderMap) -> Value {
    let map: serde_json::Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_owned(),
                Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            )
        })
        .collect();
    Value::Object(map)
}

#[async_trait]
impl Transport for CouchConnector {
    async fn send(&self, operation: Operation) -> std::result::Result<BackendResponse, TransportError> {
        let url = self.url_for(&operation.path)?;
        let method = match operation.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut request = self
            .client
            .request(method, url)
            .header(ACCEPT, "application/json");
        if let Some((username, password)) = &self.auth {
            request = request.basic_auth(username, Some(password));
        }
        if let Some(body) = &operation.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if status >= 400 {
            Err(TransportError::Http {
                status,
                headers,
                body,
            })
        } else {
            Ok(BackendResponse {
                status,
                headers,
                body,
            })
        }
    }
}
