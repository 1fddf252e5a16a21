//! Transport abstraction over the CouchDB HTTP wire.
//!
//! Stores never talk to reqwest directly. They hand an [`Operation`] to a
//! [`Transport`] and interpret the JSON body that comes back. Error-class
//! statuses are surfaced as [`TransportError::Http`] with the response
//! attached, so callers can branch on 404 versus everything else.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;

use crate::request::Operation;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised by a transport implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The backend answered with an error-class status. The decoded body
    /// is kept so callers can inspect CouchDB's `{error, reason}` payload.
    #[error("HTTP {status}")]
    Http {
        status: u16,
        headers: HeaderMap,
        body: Value,
    },

    /// The request never produced a response (connect, TLS, timeout, ...).
    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    /// True when the backend reported the document or database as absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            TransportError::Http { status, body, .. } => {
                *status == 404
                    || body.get("error").and_then(Value::as_str) == Some("not_found")
            }
            TransportError::Network(_) => false,
        }
    }

    /// Backend-reported reason text, falling back to the error display.
    pub fn reason(&self) -> String {
        match self {
            TransportError::Http { body, .. } => body
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| self.to_string()),
            TransportError::Network(msg) => msg.clone(),
        }
    }
}

/// A successful (non-error-class) backend response.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Value,
}

/// Interface for sending one operation to the backend.
///
/// Implementations:
/// - `CouchConnector`: reqwest-backed HTTP transport
/// - `MockTransport`: scripted in-memory transport for testing
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a single request/response cycle.
    async fn send(&self, operation: Operation) -> Result<BackendResponse>;
}
