//! Schema-version ledger model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One applied migration step for a logical entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureVersion {
    pub version: u64,
    /// Arbitrary migration metadata carried alongside the ordinal.
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl StructureVersion {
    pub fn new(version: u64) -> Self {
        Self {
            version,
            metadata: Map::new(),
        }
    }
}

/// The ordered list of applied versions for one entity type.
///
/// The revision is the backend concurrency token, absent until the list
/// has been persisted once. Writers must read-merge-write: the protocol
/// overwrites the whole list, the domain contract is append-only growth.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureVersionList {
    pub identifier: String,
    pub revision: Option<String>,
    pub versions: Vec<StructureVersion>,
}

impl StructureVersionList {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            revision: None,
            versions: Vec::new(),
        }
    }

    pub fn push(&mut self, version: StructureVersion) {
        self.versions.push(version);
    }

    /// Highest applied version ordinal, if any.
    pub fn latest(&self) -> Option<u64> {
        self.versions.iter().map(|v| v.version).max()
    }
}
