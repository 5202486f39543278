//! Tests du format des messages SSE
#![cfg(feature = "server")]

use kqevents::sse::{event_name, event_payload};
use kqqueue::{QueueEvent, QueueItem, Requester, Viewer};
use serde_json::Value;
use std::time::Duration;

fn item(id: i64, title: &str) -> QueueItem {
    QueueItem {
        id,
        requester: Requester {
            id: "u1".to_string(),
            name: "user u1".to_string(),
            admin: false,
        },
        title: title.to_string(),
        url: format!("http://example.com/{}", title),
        lyrics_url: None,
        duration: Duration::from_secs(180),
        position: 1,
        created_at: chrono::Utc::now(),
        revoked_at: None,
        dequeued_at: None,
    }
}

#[test]
fn test_remove_payload_is_bare_id() {
    let event = QueueEvent::ItemRemoved { id: 5 };
    assert_eq!(event_name(&event), "remove");
    assert_eq!(event_payload(&event).unwrap(), "5");
}

#[test]
fn test_append_payload_is_the_item() {
    let event = QueueEvent::ItemAppended(item(7, "song"));
    assert_eq!(event_name(&event), "append");

    let payload: Value = serde_json::from_str(&event_payload(&event).unwrap()).unwrap();
    // L'objet élément directement, sans étiquette de variante
    assert_eq!(payload["id"], 7);
    assert_eq!(payload["title"], "song");
    assert!(payload.get("ItemAppended").is_none());
}

#[test]
fn test_snapshot_payload_is_the_ordered_list() {
    let event = QueueEvent::Snapshot(vec![item(1, "a"), item(2, "b")]);
    assert_eq!(event_name(&event), "queue");

    let payload: Value = serde_json::from_str(&event_payload(&event).unwrap()).unwrap();
    let list = payload.as_array().expect("snapshot payload is an array");
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["title"], "a");
    assert_eq!(list[1]["title"], "b");
}

#[test]
fn test_presence_payload_is_the_viewer() {
    let viewer = Viewer {
        id: "alice".to_string(),
        name: "Alice".to_string(),
    };

    let joined = QueueEvent::PresenceJoined(viewer.clone());
    assert_eq!(event_name(&joined), "presence-join");
    let payload: Value = serde_json::from_str(&event_payload(&joined).unwrap()).unwrap();
    assert_eq!(payload["id"], "alice");
    assert_eq!(payload["name"], "Alice");
    assert!(payload.get("PresenceJoined").is_none());

    let left = QueueEvent::PresenceLeft(viewer);
    assert_eq!(event_name(&left), "presence-leave");
    let payload: Value = serde_json::from_str(&event_payload(&left).unwrap()).unwrap();
    assert_eq!(payload["id"], "alice");
}
