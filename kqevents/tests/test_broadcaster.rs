//! Tests d'intégration du diffuseur d'évènements

use kqevents::Broadcaster;
use kqqueue::{NewItem, Queue, QueueEvent, Requester, SqliteStore, Viewer};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn requester(id: &str) -> Requester {
    Requester {
        id: id.to_string(),
        name: format!("user {}", id),
        admin: false,
    }
}

fn new_item(id: &str, title: &str) -> NewItem {
    NewItem {
        requester: requester(id),
        title: title.to_string(),
        url: format!("http://example.com/{}", title),
        lyrics_url: None,
        duration: Duration::from_secs(180),
    }
}

fn viewer(name: &str) -> Viewer {
    Viewer {
        id: name.to_string(),
        name: name.to_string(),
    }
}

fn make_queue(dir: &tempfile::TempDir, broadcaster: &Arc<Broadcaster>) -> Arc<Queue> {
    let store = SqliteStore::open(&dir.path().join("queue.db")).unwrap();
    let queue = Arc::new(Queue::new(Arc::new(store), 10));
    queue.add_sink(broadcaster.clone());
    queue
}

#[tokio::test]
async fn test_snapshot_is_first_event() {
    let dir = tempfile::tempdir().unwrap();
    let broadcaster = Broadcaster::new(16);
    let queue = make_queue(&dir, &broadcaster);

    queue.push(new_item("u1", "first")).await.unwrap();
    queue.push(new_item("u2", "second")).await.unwrap();

    let mut sub = broadcaster.subscribe(&queue, viewer("v1")).await.unwrap();
    match sub.recv().await.unwrap() {
        QueueEvent::Snapshot(items) => {
            assert_eq!(items.len(), 2);
            assert_eq!(items[0].title, "first");
            assert_eq!(items[1].title, "second");
        }
        other => panic!("expected snapshot, got {:?}", other),
    }
}

#[tokio::test]
async fn test_mutations_after_snapshot_are_incremental() {
    let dir = tempfile::tempdir().unwrap();
    let broadcaster = Broadcaster::new(16);
    let queue = make_queue(&dir, &broadcaster);

    let mut sub = broadcaster.subscribe(&queue, viewer("v1")).await.unwrap();
    assert!(matches!(
        sub.recv().await.unwrap(),
        QueueEvent::Snapshot(items) if items.is_empty()
    ));

    let pushed = queue.push(new_item("u1", "song")).await.unwrap();
    match sub.recv().await.unwrap() {
        QueueEvent::ItemAppended(item) => assert_eq!(item.id, pushed.id),
        other => panic!("expected append, got {:?}", other),
    }

    assert!(queue.revoke(pushed.id).await.unwrap());
    match sub.recv().await.unwrap() {
        QueueEvent::ItemRemoved { id } => assert_eq!(id, pushed.id),
        other => panic!("expected remove, got {:?}", other),
    }
}

#[tokio::test]
async fn test_snapshot_xor_append() {
    let dir = tempfile::tempdir().unwrap();
    let broadcaster = Broadcaster::new(64);
    let queue = make_queue(&dir, &broadcaster);

    const TOTAL: usize = 20;

    // Des insertions concourent avec l'abonnement : chaque élément doit
    // apparaître soit dans l'instantané, soit comme append, jamais les deux
    let mut pushers = Vec::new();
    for i in 0..TOTAL {
        let queue = queue.clone();
        pushers.push(tokio::spawn(async move {
            queue
                .push(new_item(&format!("u{}", i), &format!("song {}", i)))
                .await
                .unwrap()
                .id
        }));
    }

    let mut sub = broadcaster.subscribe(&queue, viewer("v1")).await.unwrap();

    let mut all = HashSet::new();
    for pusher in pushers {
        all.insert(pusher.await.unwrap());
    }

    let mut from_snapshot = HashSet::new();
    let mut from_appends = HashSet::new();
    match sub.recv().await.unwrap() {
        QueueEvent::Snapshot(items) => {
            from_snapshot.extend(items.iter().map(|i| i.id));
        }
        other => panic!("expected snapshot first, got {:?}", other),
    }
    while from_snapshot.len() + from_appends.len() < TOTAL {
        match sub.recv().await.unwrap() {
            QueueEvent::ItemAppended(item) => {
                assert!(
                    !from_snapshot.contains(&item.id),
                    "item {} seen in both snapshot and append",
                    item.id
                );
                assert!(from_appends.insert(item.id), "item {} appended twice", item.id);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    let seen: HashSet<i64> = from_snapshot.union(&from_appends).copied().collect();
    assert_eq!(seen, all);
}

#[tokio::test]
async fn test_presence_counting() {
    let dir = tempfile::tempdir().unwrap();
    let broadcaster = Broadcaster::new(16);
    let queue = make_queue(&dir, &broadcaster);

    assert_eq!(broadcaster.presence(), 0);

    let mut first = broadcaster.subscribe(&queue, viewer("alice")).await.unwrap();
    assert_eq!(broadcaster.presence(), 1);
    assert!(matches!(first.recv().await.unwrap(), QueueEvent::Snapshot(_)));

    let second = broadcaster.subscribe(&queue, viewer("bob")).await.unwrap();
    assert_eq!(broadcaster.presence(), 2);

    // L'abonné déjà présent est notifié de l'arrivée
    match first.recv().await.unwrap() {
        QueueEvent::PresenceJoined(v) => assert_eq!(v.name, "bob"),
        other => panic!("expected presence-join, got {:?}", other),
    }

    drop(second);
    assert_eq!(broadcaster.presence(), 1);
    match first.recv().await.unwrap() {
        QueueEvent::PresenceLeft(v) => assert_eq!(v.name, "bob"),
        other => panic!("expected presence-leave, got {:?}", other),
    }

    drop(first);
    assert_eq!(broadcaster.presence(), 0);
}

#[tokio::test]
async fn test_presence_counts_identities_not_connections() {
    let dir = tempfile::tempdir().unwrap();
    let broadcaster = Broadcaster::new(16);
    let queue = make_queue(&dir, &broadcaster);

    let mut watcher = broadcaster.subscribe(&queue, viewer("bob")).await.unwrap();
    assert!(matches!(
        watcher.recv().await.unwrap(),
        QueueEvent::Snapshot(_)
    ));

    // Deux onglets de la même identité : un seul join, un seul leave
    let first_tab = broadcaster.subscribe(&queue, viewer("alice")).await.unwrap();
    let second_tab = broadcaster.subscribe(&queue, viewer("alice")).await.unwrap();
    assert_eq!(broadcaster.presence(), 2);

    match watcher.recv().await.unwrap() {
        QueueEvent::PresenceJoined(v) => assert_eq!(v.id, "alice"),
        other => panic!("expected presence-join, got {:?}", other),
    }

    let connected: Vec<String> = broadcaster
        .connected()
        .into_iter()
        .map(|v| v.id)
        .collect();
    assert_eq!(connected, vec!["bob".to_string(), "alice".to_string()]);

    drop(first_tab);
    assert_eq!(broadcaster.presence(), 2);

    drop(second_tab);
    assert_eq!(broadcaster.presence(), 1);
    match watcher.recv().await.unwrap() {
        QueueEvent::PresenceLeft(v) => assert_eq!(v.id, "alice"),
        other => panic!("expected presence-leave, got {:?}", other),
    }
}

#[tokio::test]
async fn test_dropped_subscriber_does_not_block_publishing() {
    let dir = tempfile::tempdir().unwrap();
    let broadcaster = Broadcaster::new(1);
    let queue = make_queue(&dir, &broadcaster);

    let sub = broadcaster.subscribe(&queue, viewer("ghost")).await.unwrap();
    drop(sub);
    assert_eq!(broadcaster.presence(), 0);

    // La publication ne doit pas attendre un consommateur disparu
    queue.push(new_item("u1", "song")).await.unwrap();
    queue.push(new_item("u2", "other")).await.unwrap();
}

#[tokio::test]
async fn test_events_follow_mutation_order() {
    let dir = tempfile::tempdir().unwrap();
    let broadcaster = Broadcaster::new(32);
    let queue = make_queue(&dir, &broadcaster);

    let mut sub = broadcaster.subscribe(&queue, viewer("v1")).await.unwrap();
    assert!(matches!(sub.recv().await.unwrap(), QueueEvent::Snapshot(_)));

    let a = queue.push(new_item("u1", "a")).await.unwrap();
    let b = queue.push(new_item("u2", "b")).await.unwrap();
    assert!(queue.revoke(a.id).await.unwrap());

    let mut ids = Vec::new();
    for _ in 0..3 {
        match sub.recv().await.unwrap() {
            QueueEvent::ItemAppended(item) => ids.push(("append", item.id)),
            QueueEvent::ItemRemoved { id } => ids.push(("remove", id)),
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(
        ids,
        vec![("append", a.id), ("append", b.id), ("remove", a.id)]
    );
}
