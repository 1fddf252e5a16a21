//! Shared fixtures for the store contract tests.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use eventcouch::config::StoreConfig;
use eventcouch::error::Result;
use eventcouch::event::{EventRegistry, StoredEvent};

/// Minimal domain event used across the store tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketEvent {
    #[serde(rename = "@type")]
    pub event_type: String,
    pub aggregate_id: String,
    pub seq_number: u64,
    pub iso_date: String,
    #[serde(default)]
    pub payload: Value,
}

impl StoredEvent for TicketEvent {
    fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    fn seq_number(&self) -> u64 {
        self.seq_number
    }

    fn to_document(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

pub fn make_event(aggregate: &str, seq: u64, iso_date: &str) -> TicketEvent {
    TicketEvent {
        event_type: "ticket_event".to_owned(),
        aggregate_id: aggregate.to_owned(),
        seq_number: seq,
        iso_date: iso_date.to_owned(),
        payload: json!({ "note": format!("{aggregate}/{seq}") }),
    }
}

pub fn registry() -> Arc<EventRegistry<TicketEvent>> {
    let mut registry = EventRegistry::new();
    registry.register("ticket_event", |doc| Ok(serde_json::from_value(doc)?));
    Arc::new(registry)
}

/// A view row as CouchDB delivers it with `include_docs=true`.
pub fn view_row(event: &TicketEvent) -> Value {
    let doc = serde_json::to_value(event).unwrap();
    json!({
        "id": format!("{}-{}", event.aggregate_id, event.seq_number),
        "key": [event.aggregate_id, event.seq_number],
        "value": null,
        "doc": doc,
    })
}

pub fn store_config() -> StoreConfig {
    StoreConfig {
        database: Some("events".to_owned()),
        design_doc: Some("default_views".to_owned()),
        view_name: None,
        limit: None,
    }
}
