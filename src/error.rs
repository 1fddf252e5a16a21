//! Error taxonomy shared by all CouchDB stores.

use crate::transport::TransportError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Not-found is never represented here: single-item reads return
/// `Ok(None)` and callers branch on it.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid method: {0}")]
    InvalidMethod(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("missing setting: {0}")]
    MissingConfig(&'static str),

    #[error("invalid setting: {0}")]
    InvalidConfig(String),

    #[error("missing type discriminator in event document")]
    MissingTypeDiscriminator,

    #[error("no decoder registered for event type: {0}")]
    UnknownEventType(String),

    #[error("invalid backend response: {0}")]
    InvalidBackendResponse(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("operation not permitted: {0}")]
    OperationNotPermitted(&'static str),

    #[error("revision conflict on {id}: {reason}")]
    ConcurrencyConflict { id: String, reason: String },

    #[error("migration failed: {reason}")]
    MigrationFailed { reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
