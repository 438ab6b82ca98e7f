//! End-to-end tests: a real server, real WebSocket clients.
//!
//! These start a `SyncServer` on a free port with a throwaway store and
//! drive `SyncClient`s against it, verifying the reconciliation handshake
//! and the broadcast fan-out.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use cartlist_core::{Item, ItemId, ItemRef, UndoableAction};
use cartlist_sync::{
    ClientConfig, ConnectionState, ControlMessage, Message, Notifier, PushSubscription,
    RecordingNotifier, ServerConfig, SubscriptionKeys, SyncClient, SyncEvent, SyncServer,
};

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port with a throwaway store.
async fn start_test_server_with(
    notifier: Arc<dyn Notifier>,
) -> (Arc<SyncServer>, String, tempfile::TempDir) {
    let port = free_port().await;
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        broadcast_capacity: 64,
        storage_path: dir.path().join("db"),
    };
    let server = Arc::new(SyncServer::with_notifier(config, notifier).unwrap());

    let runner = server.clone();
    tokio::spawn(async move {
        runner.run().await.unwrap();
    });
    // Give the server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;

    (server, format!("ws://127.0.0.1:{port}"), dir)
}

async fn start_test_server() -> (Arc<SyncServer>, String, tempfile::TempDir) {
    start_test_server_with(Arc::new(cartlist_sync::LogNotifier)).await
}

/// Next event within two seconds, or panic.
async fn next_event(rx: &mut tokio::sync::mpsc::Receiver<SyncEvent>) -> SyncEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Assert that no further event arrives within a short window.
async fn assert_quiet(rx: &mut tokio::sync::mpsc::Receiver<SyncEvent>) {
    let extra = timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(extra.is_err(), "unexpected extra event: {:?}", extra.unwrap());
}

fn add_item(id: &str, value: &str) -> UndoableAction {
    UndoableAction::AddListItem(Item {
        id: ItemId::from(id),
        value: value.into(),
        checked: false,
        deleted: false,
        prev_item_id: ItemRef::Id(ItemId::initial()),
    })
}

/// Connect a client and drain its Connected + FullData handshake events.
async fn connected_client(
    url: &str,
) -> (SyncClient, tokio::sync::mpsc::Receiver<SyncEvent>) {
    let mut client = SyncClient::new(ClientConfig::new(url));
    let mut rx = client.take_event_rx().unwrap();
    client.connect();

    match next_event(&mut rx).await {
        SyncEvent::Connected => {}
        other => panic!("expected Connected, got {other:?}"),
    }
    match next_event(&mut rx).await {
        SyncEvent::FullData(_) => {}
        other => panic!("expected FullData handshake, got {other:?}"),
    }
    (client, rx)
}

#[tokio::test]
async fn test_connect_receives_authoritative_state() {
    let (_server, url, _dir) = start_test_server().await;

    let mut client = SyncClient::new(ClientConfig::new(&url));
    let mut rx = client.take_event_rx().unwrap();
    client.connect();

    match next_event(&mut rx).await {
        SyncEvent::Connected => {}
        other => panic!("expected Connected, got {other:?}"),
    }
    match next_event(&mut rx).await {
        SyncEvent::FullData(items) => {
            assert!(items.contains_key(&ItemId::initial()));
        }
        other => panic!("expected FullData, got {other:?}"),
    }

    assert_eq!(client.connection_state().await, ConnectionState::Connected);
    client.disconnect().await;
}

#[tokio::test]
async fn test_offline_edits_reconcile_on_connect() {
    let (server, url, _dir) = start_test_server().await;

    // An observer session is already live.
    let (observer, mut observer_rx) = connected_client(&url).await;

    // The editing client works offline first.
    let mut editor = SyncClient::new(ClientConfig::new(&url));
    let mut editor_rx = editor.take_event_rx().unwrap();
    editor.send_action(add_item("a", "milk")).await.unwrap();
    editor
        .send_action(UndoableAction::UpdateListItemChecked {
            id: ItemId::from("a"),
            new_checked: true,
        })
        .await
        .unwrap();
    assert_eq!(editor.offline_queue_len().await, 2);

    // Reconnect: the queue is compacted and replayed in one request.
    editor.connect();

    match next_event(&mut editor_rx).await {
        SyncEvent::Connected => {}
        other => panic!("expected Connected, got {other:?}"),
    }
    // The originator receives the authoritative set exactly once…
    match next_event(&mut editor_rx).await {
        SyncEvent::FullData(items) => {
            let item = &items[&ItemId::from("a")];
            assert_eq!(item.value, "milk");
            assert!(item.checked);
        }
        other => panic!("expected FullData, got {other:?}"),
    }
    assert_quiet(&mut editor_rx).await;
    assert_eq!(editor.offline_queue_len().await, 0);

    // …while the observer receives the two actions individually, not a
    // merged one.
    match next_event(&mut observer_rx).await {
        SyncEvent::RemoteAction(UndoableAction::AddListItem(item)) => {
            assert_eq!(item.value, "milk");
        }
        other => panic!("expected add broadcast, got {other:?}"),
    }
    match next_event(&mut observer_rx).await {
        SyncEvent::RemoteAction(UndoableAction::UpdateListItemChecked {
            id,
            new_checked,
        }) => {
            assert_eq!(id, ItemId::from("a"));
            assert!(new_checked);
        }
        other => panic!("expected checked broadcast, got {other:?}"),
    }
    assert_quiet(&mut observer_rx).await;

    // The store of record agrees.
    let stored = server.store().get_item(&ItemId::from("a")).unwrap().unwrap();
    assert_eq!(stored.value, "milk");
    assert!(stored.checked);

    editor.disconnect().await;
    observer.disconnect().await;
}

#[tokio::test]
async fn test_live_edit_reaches_others_but_never_echoes() {
    let (_server, url, _dir) = start_test_server().await;

    let (alice, mut alice_rx) = connected_client(&url).await;
    let (bob, mut bob_rx) = connected_client(&url).await;

    alice.send_action(add_item("a", "eggs")).await.unwrap();

    match next_event(&mut bob_rx).await {
        SyncEvent::RemoteAction(UndoableAction::AddListItem(item)) => {
            assert_eq!(item.value, "eggs");
        }
        other => panic!("expected broadcast, got {other:?}"),
    }
    // The sender applied it locally before sending; no echo comes back.
    assert_quiet(&mut alice_rx).await;

    alice.disconnect().await;
    bob.disconnect().await;
}

#[tokio::test]
async fn test_resync_returns_full_data() {
    let (_server, url, _dir) = start_test_server().await;
    let (client, mut rx) = connected_client(&url).await;

    // Visibility regained: empty-queue reconciliation.
    client.resync().await.unwrap();

    match next_event(&mut rx).await {
        SyncEvent::FullData(items) => {
            assert!(items.contains_key(&ItemId::initial()));
        }
        other => panic!("expected FullData, got {other:?}"),
    }

    client.disconnect().await;
}

#[tokio::test]
async fn test_malformed_message_is_rejected_with_error_reply() {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let (_server, url, _dir) = start_test_server().await;

    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws.send(WsMessage::Text("this is not json".into()))
        .await
        .unwrap();

    let reply = timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out")
        .unwrap()
        .unwrap();
    let WsMessage::Text(text) = reply else {
        panic!("expected text reply, got {reply:?}");
    };
    match Message::decode(text.as_str()).unwrap() {
        Message::Control(ControlMessage::Error { message }) => {
            assert!(message.contains("invalid message"));
        }
        other => panic!("expected error reply, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_item_reference_aborts_and_reports() {
    let (server, url, _dir) = start_test_server().await;
    let (alice, mut alice_rx) = connected_client(&url).await;
    let (bob, mut bob_rx) = connected_client(&url).await;

    alice
        .send_action(UndoableAction::UpdateListItemValue {
            id: ItemId::from("ghost"),
            new_value: "boo".into(),
        })
        .await
        .unwrap();

    match next_event(&mut alice_rx).await {
        SyncEvent::ServerError(message) => {
            assert!(message.contains("ghost"));
        }
        other => panic!("expected server error, got {other:?}"),
    }
    // Nothing was applied, nothing broadcast.
    assert_quiet(&mut bob_rx).await;
    assert!(server.store().get_item(&ItemId::from("ghost")).unwrap().is_none());

    alice.disconnect().await;
    bob.disconnect().await;
}

#[tokio::test]
async fn test_finished_signal_notifies_other_subscribers() {
    let notifier = Arc::new(RecordingNotifier::new());
    let (_server, url, _dir) = start_test_server_with(notifier.clone()).await;

    let (client, _rx) = connected_client(&url).await;

    let subscription = |tag: &str| PushSubscription {
        endpoint: format!("https://push.example/{tag}"),
        expiration_time: None,
        keys: SubscriptionKeys {
            auth: format!("auth-{tag}"),
            p256dh: format!("p256dh-{tag}"),
        },
    };

    client
        .send_control(ControlMessage::SubscribeUserPushNotifications {
            user_id: "alice".into(),
            subscription: subscription("alice"),
        })
        .await
        .unwrap();
    client
        .send_control(ControlMessage::SubscribeUserPushNotifications {
            user_id: "bob".into(),
            subscription: subscription("bob"),
        })
        .await
        .unwrap();
    client
        .send_control(ControlMessage::SignalFinishedShoppingList {
            user_id: "alice".into(),
        })
        .await
        .unwrap();

    // The notifier is invoked for everyone but the signaling user.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let calls = notifier.calls();
        if !calls.is_empty() {
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].0, vec!["bob".to_string()]);
            assert!(calls[0].1.contains("FINISHED_SHOPPINGLIST"));
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "notifier was never invoked"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    client.disconnect().await;
}

#[tokio::test]
async fn test_offline_compaction_net_zero_sends_nothing() {
    let (_server, url, _dir) = start_test_server().await;
    let (observer, mut observer_rx) = connected_client(&url).await;

    let mut editor = SyncClient::new(ClientConfig::new(&url));
    let mut editor_rx = editor.take_event_rx().unwrap();

    // Created and destroyed entirely offline: nets out to nothing.
    editor.send_action(add_item("tmp", "scratch")).await.unwrap();
    editor
        .send_action(UndoableAction::UpdateListItemValue {
            id: ItemId::from("tmp"),
            new_value: "scribble".into(),
        })
        .await
        .unwrap();
    editor
        .send_action(UndoableAction::RemoveListItem { id: ItemId::from("tmp") })
        .await
        .unwrap();

    editor.connect();
    match next_event(&mut editor_rx).await {
        SyncEvent::Connected => {}
        other => panic!("expected Connected, got {other:?}"),
    }
    match next_event(&mut editor_rx).await {
        SyncEvent::FullData(items) => {
            assert!(!items.contains_key(&ItemId::from("tmp")));
        }
        other => panic!("expected FullData, got {other:?}"),
    }

    // The observer sees no broadcast at all.
    assert_quiet(&mut observer_rx).await;

    editor.disconnect().await;
    observer.disconnect().await;
}
