//! Test utilities and mock implementations.
//!
//! Provides a scripted in-memory [`Transport`] so store behavior can be
//! tested without a running CouchDB.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;

use crate::request::Operation;
use crate::transport::{BackendResponse, Result, Transport, TransportError};

/// Mock transport replaying scripted responses in order.
///
/// Every sent operation is recorded for later assertions on the
/// method/path/body shape the stores produce.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<BackendResponse>>>,
    requests: Mutex<Vec<Operation>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a successful response.
    pub fn push_response(&self, status: u16, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(BackendResponse {
                status,
                headers: HeaderMap::new(),
                body,
            }));
    }

    /// Script an error-class HTTP response.
    pub fn push_error(&self, status: u16, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(TransportError::Http {
                status,
                headers: HeaderMap::new(),
                body,
            }));
    }

    /// Script a transport-level failure.
    pub fn push_network_error(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(TransportError::Network(message.to_owned())));
    }

    /// Operations sent so far, in order.
    pub fn requests(&self) -> Vec<Operation> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, operation: Operation) -> Result<BackendResponse> {
        self.requests.lock().unwrap().push(operation);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no scripted response".to_owned())))
    }
}
