//! eventcouch - CouchDB storage adapter for event-sourced applications.
//!
//! Maps an event-sourced aggregate model onto CouchDB over HTTP:
//! an append-only per-aggregate event log with ordered, resumable reads,
//! a global time-ordered event feed, a schema-version ledger per entity
//! type, and lifecycle management of the database and its view bundles.
//!
//! All stores build their requests through [`request::build_request`] and
//! send them over a caller-supplied [`transport::Transport`]; the
//! reqwest-backed [`connector::CouchConnector`] is the production
//! implementation. Cursors are explicit values threaded back by the
//! caller, so resumable reads need no server-side session state.

pub mod config;
pub mod connector;
pub mod error;
pub mod event;
pub mod migration;
pub mod request;
pub mod storage;
pub mod test_utils;
pub mod transport;
pub mod version;

pub use error::{Result, StorageError};
