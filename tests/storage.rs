//! Store contract tests over a scripted mock transport.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{make_event, registry, store_config, view_row};
use eventcouch::error::StorageError;
use eventcouch::request::Method;
use eventcouch::storage::{
    DomainEventReader, EventStreamAppender, EventStreamReader, FeedCursor, LedgerCursor,
    StreamCursor, StructureVersionListReader, StructureVersionListWriter,
};
use eventcouch::test_utils::MockTransport;
use eventcouch::transport::Transport;
use eventcouch::version::{StructureVersion, StructureVersionList};

fn mock() -> (Arc<MockTransport>, Arc<dyn Transport>) {
    let mock = Arc::new(MockTransport::new());
    let transport = mock.clone() as Arc<dyn Transport>;
    (mock, transport)
}

// =============================================================================
// EventStreamAppender
// =============================================================================

#[tokio::test]
async fn append_puts_derived_document_id() {
    let (mock, transport) = mock();
    mock.push_response(201, json!({ "ok": true, "id": "ticket-1-0", "rev": "1-a" }));

    let appender = EventStreamAppender::new(transport, store_config()).unwrap();
    appender.append(&make_event("ticket-1", 0, "t0")).await.unwrap();

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::Put);
    assert_eq!(requests[0].path, "/events/ticket-1-0");
    let body = requests[0].body.as_ref().unwrap();
    assert_eq!(body["@type"], "ticket_event");
    assert_eq!(body["seq_number"], 0);
}

#[tokio::test]
async fn duplicate_append_is_a_conflict() {
    let (mock, transport) = mock();
    mock.push_error(
        409,
        json!({ "error": "conflict", "reason": "Document update conflict." }),
    );

    let appender = EventStreamAppender::new(transport, store_config()).unwrap();
    let err = appender
        .append(&make_event("ticket-1", 0, "t0"))
        .await
        .unwrap_err();

    match err {
        StorageError::ConcurrencyConflict { id, reason } => {
            assert_eq!(id, "ticket-1-0");
            assert_eq!(reason, "Document update conflict.");
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn append_without_ok_or_rev_fails() {
    let (mock, transport) = mock();
    mock.push_response(201, json!({ "ok": true }));

    let appender = EventStreamAppender::new(transport, store_config()).unwrap();
    let err = appender
        .append(&make_event("ticket-1", 0, "t0"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::WriteFailed(_)));
}

#[tokio::test]
async fn stream_delete_is_not_permitted() {
    let (_mock, transport) = mock();
    let appender = EventStreamAppender::new(transport, store_config()).unwrap();
    let err = appender.delete("ticket-1-0").unwrap_err();
    assert!(matches!(err, StorageError::OperationNotPermitted(_)));
}

// =============================================================================
// EventStreamReader
// =============================================================================

#[tokio::test]
async fn read_returns_events_in_ascending_order() {
    let (mock, transport) = mock();
    // The view delivers descending.
    mock.push_response(
        200,
        json!({
            "total_rows": 3,
            "offset": 0,
            "rows": [
                view_row(&make_event("ticket-1", 2, "t2")),
                view_row(&make_event("ticket-1", 1, "t1")),
                view_row(&make_event("ticket-1", 0, "t0")),
            ],
        }),
    );

    let reader = EventStreamReader::new(transport, store_config(), registry()).unwrap();
    let stream = reader.read("ticket-1").await.unwrap().unwrap();

    assert_eq!(stream.identifier, "ticket-1");
    let sequences: Vec<u64> = stream.events.iter().map(|e| e.seq_number).collect();
    assert_eq!(sequences, vec![0, 1, 2]);

    let requests = mock.requests();
    assert_eq!(requests[0].method, Method::Get);
    assert!(requests[0].path.starts_with("/events/_design/default_views/_view/event_stream?"));
    assert!(requests[0].path.contains("descending=true"));
    assert!(requests[0].path.contains("include_docs=true"));
    assert!(requests[0].path.contains("limit=1000"));
    assert!(requests[0].path.contains("reduce=false"));
    // startkey ["ticket-1",{}], endkey ["ticket-1",1]
    assert!(requests[0].path.contains("startkey=%5B%22ticket-1%22%2C%7B%7D%5D"));
    assert!(requests[0].path.contains("endkey=%5B%22ticket-1%22%2C1%5D"));
}

#[tokio::test]
async fn read_of_unknown_aggregate_is_none() {
    let (mock, transport) = mock();
    mock.push_error(404, json!({ "error": "not_found", "reason": "missing" }));

    let reader = EventStreamReader::new(transport, store_config(), registry()).unwrap();
    assert!(reader.read("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn read_with_zero_rows_is_none() {
    let (mock, transport) = mock();
    mock.push_response(200, json!({ "total_rows": 0, "offset": 0, "rows": [] }));

    let reader = EventStreamReader::new(transport, store_config(), registry()).unwrap();
    assert!(reader.read("ticket-1").await.unwrap().is_none());
}

#[tokio::test]
async fn read_without_total_rows_is_invalid() {
    let (mock, transport) = mock();
    mock.push_response(200, json!({ "rows": [] }));

    let reader = EventStreamReader::new(transport, store_config(), registry()).unwrap();
    let err = reader.read("ticket-1").await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidBackendResponse(_)));
}

#[tokio::test]
async fn read_with_blank_identifier_is_rejected() {
    let (_mock, transport) = mock();
    let reader = EventStreamReader::new(transport, store_config(), registry()).unwrap();
    let err = reader.read("  ").await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidIdentifier(_)));
}

#[tokio::test]
async fn read_document_without_discriminator_fails() {
    let (mock, transport) = mock();
    let mut row = view_row(&make_event("ticket-1", 0, "t0"));
    row["doc"].as_object_mut().unwrap().remove("@type");
    mock.push_response(200, json!({ "total_rows": 1, "offset": 0, "rows": [row] }));

    let reader = EventStreamReader::new(transport, store_config(), registry()).unwrap();
    let err = reader.read("ticket-1").await.unwrap_err();
    assert!(matches!(err, StorageError::MissingTypeDiscriminator));
}

#[tokio::test]
async fn read_all_enumerates_streams_one_per_call() {
    let (mock, transport) = mock();
    // Fresh cursor: grouped discovery first, then the first stream.
    mock.push_response(
        200,
        json!({
            "rows": [
                { "key": ["ticket-1", null], "value": 2 },
                { "key": ["ticket-2", null], "value": 1 },
            ],
        }),
    );
    mock.push_response(
        200,
        json!({
            "total_rows": 1,
            "offset": 0,
            "rows": [view_row(&make_event("ticket-1", 0, "t0"))],
        }),
    );

    let reader = EventStreamReader::new(transport, store_config(), registry()).unwrap();
    let (streams, cursor) = reader.read_all(StreamCursor::default()).await.unwrap();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].identifier, "ticket-1");

    let requests = mock.requests();
    assert!(requests[0]
        .path
        .starts_with("/events/_design/default_views/_view/event_stream?"));
    assert!(requests[0].path.contains("group=true"));
    assert!(requests[0].path.contains("group_level=1"));
    assert!(requests[0].path.contains("reduce=true"));

    mock.push_response(
        200,
        json!({
            "total_rows": 1,
            "offset": 0,
            "rows": [view_row(&make_event("ticket-2", 0, "t1"))],
        }),
    );
    let (streams, cursor) = reader.read_all(cursor).await.unwrap();
    assert_eq!(streams[0].identifier, "ticket-2");

    // Exhausted: no further requests are issued.
    let before = mock.requests().len();
    let (streams, _cursor) = reader.read_all(cursor).await.unwrap();
    assert!(streams.is_empty());
    assert_eq!(mock.requests().len(), before);
}

// =============================================================================
// DomainEventReader
// =============================================================================

#[tokio::test]
async fn feed_pages_resume_exclusively_after_last_key() {
    let (mock, transport) = mock();
    let mut config = store_config();
    config.limit = Some(2);

    let events: Vec<_> = (0..4)
        .map(|i| make_event("ticket-1", i, &format!("{}", i + 1)))
        .collect();

    mock.push_response(
        200,
        json!({
            "total_rows": 4,
            "offset": 0,
            "rows": [view_row(&events[0]), view_row(&events[1])],
        }),
    );
    mock.push_response(
        200,
        json!({
            "total_rows": 4,
            "offset": 2,
            "rows": [view_row(&events[2]), view_row(&events[3])],
        }),
    );
    mock.push_response(200, json!({ "total_rows": 4, "offset": 4, "rows": [] }));

    let reader = DomainEventReader::new(transport, config, registry()).unwrap();

    let (page, cursor) = reader.read_all(FeedCursor::default()).await.unwrap();
    let keys: Vec<&str> = page.iter().map(|e| e.iso_date.as_str()).collect();
    assert_eq!(keys, vec!["1", "2"]);

    let (page, cursor) = reader.read_all(cursor).await.unwrap();
    let keys: Vec<&str> = page.iter().map(|e| e.iso_date.as_str()).collect();
    assert_eq!(keys, vec!["3", "4"]);

    let (page, _cursor) = reader.read_all(cursor).await.unwrap();
    assert!(page.is_empty());

    let requests = mock.requests();
    assert!(requests[0]
        .path
        .starts_with("/events/_design/default_views/_view/events_by_timestamp?"));
    assert!(requests[0].path.contains("limit=2"));
    assert!(!requests[0].path.contains("skip="));
    // Resumed pages skip the previously delivered last event.
    assert!(requests[1].path.contains("skip=1"));
    assert!(requests[1].path.contains("startkey=%222%22"));
    assert!(requests[2].path.contains("startkey=%224%22"));
}

#[tokio::test]
async fn feed_without_rows_field_is_invalid() {
    let (mock, transport) = mock();
    mock.push_response(200, json!({ "total_rows": 0 }));

    let reader = DomainEventReader::new(transport, store_config(), registry()).unwrap();
    let err = reader.read_all(FeedCursor::default()).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidBackendResponse(_)));
}

#[tokio::test]
async fn feed_document_without_discriminator_fails() {
    let (mock, transport) = mock();
    let mut row = view_row(&make_event("ticket-1", 0, "t0"));
    row["doc"].as_object_mut().unwrap().remove("@type");
    mock.push_response(200, json!({ "total_rows": 1, "offset": 0, "rows": [row] }));

    let reader = DomainEventReader::new(transport, store_config(), registry()).unwrap();
    let err = reader.read_all(FeedCursor::default()).await.unwrap_err();
    assert!(matches!(err, StorageError::MissingTypeDiscriminator));
}

#[tokio::test]
async fn feed_single_read_shares_stream_semantics() {
    let (mock, transport) = mock();
    mock.push_response(
        200,
        json!({
            "total_rows": 2,
            "offset": 0,
            "rows": [
                view_row(&make_event("ticket-1", 1, "t1")),
                view_row(&make_event("ticket-1", 0, "t0")),
            ],
        }),
    );

    let reader = DomainEventReader::new(transport, store_config(), registry()).unwrap();
    let events = reader.read("ticket-1").await.unwrap().unwrap();
    let sequences: Vec<u64> = events.iter().map(|e| e.seq_number).collect();
    assert_eq!(sequences, vec![0, 1]);

    mock.push_error(404, json!({ "error": "not_found", "reason": "missing" }));
    assert!(reader.read("nope").await.unwrap().is_none());
}

// =============================================================================
// StructureVersionList stores
// =============================================================================

fn ledger_doc(identifier: &str, rev: &str, versions: &[u64]) -> serde_json::Value {
    json!({
        "_id": identifier,
        "_rev": rev,
        "versions": versions.iter().map(|v| json!({ "version": v })).collect::<Vec<_>>(),
    })
}

#[tokio::test]
async fn ledger_read_carries_revision() {
    let (mock, transport) = mock();
    mock.push_response(200, ledger_doc("ticket", "3-c", &[1, 2]));

    let reader = StructureVersionListReader::new(transport, store_config()).unwrap();
    let list = reader.read("ticket").await.unwrap().unwrap();

    assert_eq!(list.identifier, "ticket");
    assert_eq!(list.revision.as_deref(), Some("3-c"));
    assert_eq!(list.latest(), Some(2));
    assert_eq!(mock.requests()[0].path, "/events/ticket");
}

#[tokio::test]
async fn ledger_read_of_unknown_identifier_is_none() {
    let (mock, transport) = mock();
    mock.push_error(404, json!({ "error": "not_found", "reason": "missing" }));

    let reader = StructureVersionListReader::new(transport, store_config()).unwrap();
    assert!(reader.read("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn ledger_scan_resets_cursor_on_final_page() {
    let (mock, transport) = mock();
    let mut config = store_config();
    config.limit = Some(1);

    mock.push_response(
        200,
        json!({
            "total_rows": 2,
            "offset": 0,
            "rows": [{ "id": "a", "key": "a", "value": {}, "doc": ledger_doc("a", "1-a", &[1]) }],
        }),
    );
    mock.push_response(
        200,
        json!({
            "total_rows": 2,
            "offset": 1,
            "rows": [{ "id": "b", "key": "b", "value": {}, "doc": ledger_doc("b", "1-b", &[1]) }],
        }),
    );

    let reader = StructureVersionListReader::new(transport, config).unwrap();

    let (page, cursor) = reader.read_all(LedgerCursor::default()).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].identifier, "a");

    let (page, cursor) = reader.read_all(cursor).await.unwrap();
    assert_eq!(page[0].identifier, "b");

    // total_rows == offset + 1 reset the cursor; no request goes out.
    let before = mock.requests().len();
    let (page, _cursor) = reader.read_all(cursor).await.unwrap();
    assert!(page.is_empty());
    assert_eq!(mock.requests().len(), before);

    let requests = mock.requests();
    assert_eq!(requests[0].path, "/events/_all_docs?include_docs=true&limit=1");
    assert!(requests[1].path.contains("skip=1"));
    assert!(requests[1].path.contains("startkey=%22a%22"));
}

#[tokio::test]
async fn ledger_write_creates_without_prior_revision() {
    let (mock, transport) = mock();
    mock.push_error(404, json!({ "error": "not_found", "reason": "missing" }));
    mock.push_response(201, json!({ "ok": true, "rev": "1-a" }));

    let writer = StructureVersionListWriter::new(transport, store_config()).unwrap();
    let mut list = StructureVersionList::new("ticket");
    list.push(StructureVersion::new(1));
    writer.write(&list).await.unwrap();

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].method, Method::Put);
    assert_eq!(requests[1].path, "/events/ticket");
    let body = requests[1].body.as_ref().unwrap();
    assert_eq!(body["identifier"], "ticket");
    assert_eq!(body["versions"][0]["version"], 1);
    assert!(body.get("revision").is_none());
}

#[tokio::test]
async fn ledger_write_updates_with_current_revision() {
    let (mock, transport) = mock();
    mock.push_response(200, ledger_doc("ticket", "3-c", &[1]));
    mock.push_response(201, json!({ "ok": true, "rev": "4-d" }));

    let writer = StructureVersionListWriter::new(transport, store_config()).unwrap();
    let mut list = StructureVersionList::new("ticket");
    list.push(StructureVersion::new(1));
    list.push(StructureVersion::new(2));
    writer.write(&list).await.unwrap();

    let requests = mock.requests();
    // Revision travels as addressing, not payload.
    assert_eq!(requests[1].path, "/events/ticket?rev=3-c");
    assert!(requests[1].body.as_ref().unwrap().get("revision").is_none());
}

#[tokio::test]
async fn ledger_write_propagates_stale_revision_conflict() {
    let (mock, transport) = mock();
    mock.push_response(200, ledger_doc("ticket", "3-c", &[1]));
    mock.push_error(
        409,
        json!({ "error": "conflict", "reason": "Document update conflict." }),
    );

    let writer = StructureVersionListWriter::new(transport, store_config()).unwrap();
    let err = writer
        .write(&StructureVersionList::new("ticket"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::ConcurrencyConflict { .. }));
}

#[tokio::test]
async fn ledger_write_without_ack_fails() {
    let (mock, transport) = mock();
    mock.push_error(404, json!({ "error": "not_found", "reason": "missing" }));
    mock.push_response(201, json!({ "id": "ticket" }));

    let writer = StructureVersionListWriter::new(transport, store_config()).unwrap();
    let err = writer
        .write(&StructureVersionList::new("ticket"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::WriteFailed(_)));
}

#[tokio::test]
async fn ledger_delete_is_best_effort() {
    let (mock, transport) = mock();
    let writer = StructureVersionListWriter::new(transport, store_config()).unwrap();

    // Already gone: the revision lookup fails, nothing else is sent.
    mock.push_error(404, json!({ "error": "not_found", "reason": "missing" }));
    writer.delete("ticket").await.unwrap();
    assert_eq!(mock.requests().len(), 1);

    // Backend failure during the delete itself is swallowed.
    mock.push_response(200, ledger_doc("ticket", "3-c", &[1]));
    mock.push_error(500, json!({ "error": "internal", "reason": "boom" }));
    writer.delete("ticket").await.unwrap();

    // Happy path carries the revision as addressing.
    mock.push_response(200, ledger_doc("ticket", "3-c", &[1]));
    mock.push_response(200, json!({ "ok": true, "rev": "4-d" }));
    writer.delete("ticket").await.unwrap();
    let requests = mock.requests();
    let last = requests.last().unwrap();
    assert_eq!(last.method, Method::Delete);
    assert_eq!(last.path, "/events/ticket?rev=3-c");
    assert!(last.body.is_none());
}
