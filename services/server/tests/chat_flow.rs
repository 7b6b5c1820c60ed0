//! Multi-client chat scenarios: login broadcast, roster, private routing.

use parley_net::{Client, ClientConfig, ClientEvent, ServerConfig};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

async fn start_server() -> (parley_server::App, u16) {
    let app = parley_server::build();
    let cfg = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    let port = app.controller.start(&cfg).await.expect("server must start");
    (app, port)
}

async fn connect(port: u16) -> (Client, UnboundedReceiver<ClientEvent>) {
    let cfg = ClientConfig {
        port,
        ..ClientConfig::default()
    };
    Client::connect(&cfg).await.expect("client must connect")
}

/// Log in and return the assigned uid.
async fn login(client: &Client, name: &str) -> u32 {
    let result = timeout(
        Duration::from_secs(5),
        client.request("login", json!({"name": name})),
    )
    .await
    .expect("timed out")
    .expect("login failed");
    assert_eq!(result["status"], "success");
    assert_eq!(result["name"], name);
    u32::try_from(result["uid"].as_u64().expect("uid")).expect("uid fits u32")
}

/// Wait for the next push with the given `event` value, skipping
/// everything else.
async fn next_push(events: &mut UnboundedReceiver<ClientEvent>, event: &str) -> Value {
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.expect("event stream ended") {
                ClientEvent::Push(push) if push["event"] == event => return push,
                _ => {}
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for push: {event}"))
}

#[tokio::test]
async fn login_is_broadcast_to_connected_peers() {
    let (_app, port) = start_server().await;
    let (_bystander, mut bystander_events) = connect(port).await;

    let (alice, _alice_events) = connect(port).await;
    let alice_uid = login(&alice, "alice").await;

    let push = next_push(&mut bystander_events, "user_joined").await;
    assert_eq!(push["uid"], alice_uid);
    assert_eq!(push["name"], "alice");
}

#[tokio::test]
async fn logging_in_peer_receives_its_own_join_push() {
    let (_app, port) = start_server().await;
    let (alice, mut events) = connect(port).await;
    let uid = login(&alice, "alice").await;

    let push = next_push(&mut events, "user_joined").await;
    assert_eq!(push["uid"], uid);
}

#[tokio::test]
async fn client_list_after_two_joins() {
    let (_app, port) = start_server().await;
    let (alice, _a_events) = connect(port).await;
    let (bob, _b_events) = connect(port).await;
    let alice_uid = login(&alice, "alice").await;
    let bob_uid = login(&bob, "bob").await;
    assert_ne!(alice_uid, bob_uid);

    let result = timeout(
        Duration::from_secs(5),
        bob.request("client_list", json!({})),
    )
    .await
    .expect("timed out")
    .expect("client_list failed");

    let clients = result["clients"].as_array().expect("clients array");
    assert_eq!(clients.len(), 2);

    let mut names: Vec<&str> = clients
        .iter()
        .map(|c| c["name"].as_str().expect("name"))
        .collect();
    names.sort_unstable();
    assert_eq!(names, vec!["alice", "bob"]);

    let uids: Vec<u64> = clients
        .iter()
        .map(|c| c["uid"].as_u64().expect("uid"))
        .collect();
    assert_ne!(uids[0], uids[1]);
}

#[tokio::test]
async fn private_message_reaches_only_the_recipient() {
    let (_app, port) = start_server().await;
    let (alice, _a_events) = connect(port).await;
    let (bob, mut bob_events) = connect(port).await;
    let (carol, mut carol_events) = connect(port).await;

    let alice_uid = login(&alice, "alice").await;
    let bob_uid = login(&bob, "bob").await;
    login(&carol, "carol").await;

    let completion = alice
        .request_async("send_private", json!({"to_uid": bob_uid, "text": "hi"}))
        .expect("send failed");

    let push = next_push(&mut bob_events, "private_message").await;
    assert_eq!(push["from_uid"], alice_uid);
    assert_eq!(push["from_name"], "alice");
    assert_eq!(push["text"], "hi");

    let result = timeout(Duration::from_secs(5), completion)
        .await
        .expect("timed out")
        .expect("completion dropped")
        .expect("send_private failed");
    assert_eq!(result, json!({"delivered": true}));

    // Carol must not see the private message.  Bob already received it,
    // so anything destined for Carol has had time to arrive.
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = carol_events.try_recv() {
        if let ClientEvent::Push(push) = event {
            assert_ne!(push["event"], "private_message", "leaked to carol: {push}");
        }
    }
}

#[tokio::test]
async fn public_message_reaches_everyone_with_sender_name() {
    let (_app, port) = start_server().await;
    let (alice, _a_events) = connect(port).await;
    let (bob, mut bob_events) = connect(port).await;
    let alice_uid = login(&alice, "alice").await;
    login(&bob, "bob").await;

    let result = alice
        .request("send_public", json!({"text": "hello room"}))
        .await
        .expect("send_public failed");
    assert_eq!(result, json!({"delivered": true}));

    let push = next_push(&mut bob_events, "public_message").await;
    assert_eq!(push["from_uid"], alice_uid);
    assert_eq!(push["from_name"], "alice");
    assert_eq!(push["text"], "hello room");
}

#[tokio::test]
async fn closing_a_client_broadcasts_user_left() {
    let (_app, port) = start_server().await;
    let (alice, _a_events) = connect(port).await;
    let (bob, mut bob_events) = connect(port).await;
    let alice_uid = login(&alice, "alice").await;
    login(&bob, "bob").await;

    alice.close();

    let push = next_push(&mut bob_events, "user_left").await;
    assert_eq!(push["uid"], alice_uid);
}
