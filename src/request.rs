//! Pure construction of CouchDB operations.
//!
//! No I/O happens here. Every reader and writer funnels through
//! [`build_request`], which produces the method, path and query shape the
//! transport executes. Keeping this free of the HTTP client makes the
//! URL/query contract unit-testable.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use url::form_urlencoded;

use crate::error::{Result, StorageError};

/// HTTP methods accepted by the CouchDB stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Parse a method name, case-insensitively.
    ///
    /// Anything outside the allowed set fails with `InvalidMethod`.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "get" => Ok(Method::Get),
            "post" => Ok(Method::Post),
            "put" => Ok(Method::Put),
            "delete" => Ok(Method::Delete),
            _ => Err(StorageError::InvalidMethod(name.to_owned())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backend operation: method, path (query included) and JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

/// Build an operation addressing `/<database>/<identifier>`.
///
/// A `revision` field in the body is lifted into the `rev` query
/// parameter and removed from the wire body: the revision is part of the
/// addressing, not the payload. Query parameters are percent-encoded in
/// sorted key order. Doubled path separators are collapsed, so an empty
/// identifier addresses the database root.
pub fn build_request(
    database: &str,
    identifier: &str,
    method: Method,
    body: Option<Value>,
    mut params: BTreeMap<String, String>,
) -> Result<Operation> {
    if database.trim().is_empty() {
        return Err(StorageError::MissingConfig("database"));
    }

    let body = match body {
        Some(mut value) => {
            if let Some(object) = value.as_object_mut() {
                if let Some(revision) = object.remove("revision") {
                    let revision = match revision {
                        Value::String(rev) => rev,
                        other => other.to_string(),
                    };
                    params.insert("rev".to_owned(), revision);
                }
            }
            match value {
                Value::Object(ref object) if object.is_empty() => None,
                value => Some(value),
            }
        }
        None => None,
    };

    let mut path = format!("/{}/{}", database, identifier);
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }

    if !params.is_empty() {
        let query: String = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish();
        path.push('?');
        path.push_str(&query);
    }

    Ok(Operation { method, path, body })
}
