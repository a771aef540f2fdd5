//! Core broker tests: registry invariants, FIFO pairing, dispatch
//! semantics, and disconnect cleanup — all against channel-backed fake
//! transports, no server involved.

use axum::extract::ws::Message;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use pairchat_server::broker::{
    matcher, Action, Broker, ClientConnection, ConnId, Envelope, Inbound, UserRef,
};
use pairchat_server::ws::broadcast;

/// Register a connection backed by an in-memory channel; the receiver
/// plays the role of the remote client.
fn connect(broker: &mut Broker, user_id: &str, name: &str) -> (ConnId, UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let user = UserRef {
        id: user_id.to_string(),
        display_name: name.to_string(),
    };
    let conn = broker.connect(ClientConnection::new(user, tx));
    (conn, rx)
}

/// Dispatch one action and deliver the resulting envelopes.
fn send(broker: &mut Broker, conn: ConnId, action: Action, data: Option<Value>) {
    let outbounds = broker.handle(conn, Inbound { action, data });
    broadcast::deliver_all(&outbounds);
}

/// Drain every envelope currently queued for a client.
fn received(rx: &mut UnboundedReceiver<Message>) -> Vec<Envelope> {
    let mut envelopes = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Message::Text(text) = msg {
            envelopes.push(serde_json::from_str(text.as_str()).expect("valid envelope JSON"));
        }
    }
    envelopes
}

#[test]
fn canonical_key_is_symmetric() {
    assert_eq!(matcher::canonical_room_key("5", "9"), "5-9");
    assert_eq!(matcher::canonical_room_key("9", "5"), "5-9");
    assert_eq!(matcher::canonical_room_key("abc", "abd"), "abc-abd");
}

#[test]
fn join_waiting_list_acks_without_broadcast() {
    let mut broker = Broker::new();
    let (c1, mut rx1) = connect(&mut broker, "1", "alice");

    send(&mut broker, c1, Action::JoinWaitingList, None);

    let envelopes = received(&mut rx1);
    assert_eq!(envelopes.len(), 1);
    assert!(envelopes[0].status);
    assert_eq!(envelopes[0].action, Action::JoinWaitingList);
    assert_eq!(envelopes[0].data, None);
    assert_eq!(broker.registry().waiting().len(), 1);
}

#[test]
fn second_enqueue_pairs_both_into_canonical_room() {
    let mut broker = Broker::new();
    let (c1, mut rx1) = connect(&mut broker, "9", "alice");
    let (c2, mut rx2) = connect(&mut broker, "5", "bob");

    send(&mut broker, c1, Action::JoinWaitingList, None);
    received(&mut rx1); // ack

    send(&mut broker, c2, Action::JoinWaitingList, None);

    // Enqueue order was 9 then 5, but the key is canonical.
    let e1 = received(&mut rx1);
    assert_eq!(e1.len(), 1);
    assert_eq!(e1[0].action, Action::JoinChat);
    assert_eq!(e1[0].data, Some(json!({ "room": "5-9" })));

    let e2 = received(&mut rx2);
    assert_eq!(e2.len(), 2); // own ack, then the pairing broadcast
    assert_eq!(e2[0].action, Action::JoinWaitingList);
    assert_eq!(e2[1].action, Action::JoinChat);
    assert_eq!(e2[1].data, Some(json!({ "room": "5-9" })));

    assert!(broker.registry().waiting().is_empty());
    assert_eq!(broker.registry().members_of("5-9"), vec![c1, c2]);
}

#[test]
fn pairing_is_fifo_fair() {
    // P1: the i-th and (i+1)-th enqueuers (i odd) always pair together.
    let mut broker = Broker::new();
    let mut clients = Vec::new();
    for i in 1..=4 {
        let (conn, rx) = connect(&mut broker, &i.to_string(), &format!("user{i}"));
        clients.push((conn, rx));
    }

    for (conn, _) in &clients {
        send(&mut broker, *conn, Action::JoinWaitingList, None);
    }

    let rooms: Vec<String> = clients
        .iter_mut()
        .map(|(_, rx)| {
            received(rx)
                .into_iter()
                .find(|e| e.action == Action::JoinChat)
                .expect("every client gets paired")
                .data
                .unwrap()["room"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();

    assert_eq!(rooms[0], "1-2");
    assert_eq!(rooms[1], "1-2");
    assert_eq!(rooms[2], "3-4");
    assert_eq!(rooms[3], "3-4");
}

#[test]
fn matcher_drains_bursts_in_pairs() {
    let mut broker = Broker::new();
    let mut conns = Vec::new();
    for i in 1..=5 {
        let (conn, rx) = connect(&mut broker, &i.to_string(), &format!("user{i}"));
        conns.push((conn, rx));
    }

    // Mutation burst: five enqueues before the matcher runs once, so the
    // drain loop has to clear two pairs in a single invocation.
    for (conn, _) in &conns {
        broker.registry_mut().enqueue_waiting(*conn).unwrap();
    }

    let outbounds = matcher::drain(broker.registry_mut());
    assert_eq!(outbounds.len(), 2);
    assert_eq!(broker.registry().waiting().len(), 1);
    assert_eq!(broker.registry().members_of("1-2").len(), 2);
    assert_eq!(broker.registry().members_of("3-4").len(), 2);
}

#[test]
fn double_enqueue_is_a_noop() {
    let mut broker = Broker::new();
    let (c1, mut rx1) = connect(&mut broker, "1", "alice");

    send(&mut broker, c1, Action::JoinWaitingList, None);
    send(&mut broker, c1, Action::JoinWaitingList, None);
    assert_eq!(broker.registry().waiting().len(), 1);

    let (c2, _rx2) = connect(&mut broker, "2", "bob");
    send(&mut broker, c2, Action::JoinWaitingList, None);

    // Exactly one pairing despite the duplicate enqueue.
    let pairings = received(&mut rx1)
        .into_iter()
        .filter(|e| e.action == Action::JoinChat)
        .count();
    assert_eq!(pairings, 1);
    assert!(broker.registry().waiting().is_empty());
}

#[test]
fn join_chat_notifies_every_member_including_joiner() {
    let mut broker = Broker::new();
    let (c1, mut rx1) = connect(&mut broker, "1", "alice");
    let (c2, mut rx2) = connect(&mut broker, "2", "bob");

    send(&mut broker, c1, Action::JoinChat, Some(json!({ "room": "alpha" })));
    let e1 = received(&mut rx1);
    assert_eq!(e1.len(), 1);
    assert_eq!(e1[0].action, Action::JoinChat);

    send(&mut broker, c2, Action::JoinChat, Some(json!({ "room": "alpha" })));
    assert_eq!(received(&mut rx1).len(), 1); // existing member notified
    assert_eq!(received(&mut rx2).len(), 1); // joiner notified too

    assert_eq!(broker.registry().members_of("alpha"), vec![c1, c2]);
}

#[test]
fn chat_message_fans_out_to_all_members() {
    let mut broker = Broker::new();
    let (c1, mut rx1) = connect(&mut broker, "1", "alice");
    let (c2, mut rx2) = connect(&mut broker, "2", "bob");
    send(&mut broker, c1, Action::JoinChat, Some(json!({ "room": "alpha" })));
    send(&mut broker, c2, Action::JoinChat, Some(json!({ "room": "alpha" })));
    received(&mut rx1);
    received(&mut rx2);

    send(
        &mut broker,
        c1,
        Action::ChatMessage,
        Some(json!({ "room": "alpha", "content": "hi" })),
    );

    for rx in [&mut rx1, &mut rx2] {
        let envelopes = received(rx);
        assert_eq!(envelopes.len(), 1);
        assert!(envelopes[0].status);
        assert_eq!(envelopes[0].action, Action::ChatMessage);
        assert_eq!(
            envelopes[0].data,
            Some(json!({
                "user": { "id": "1", "displayName": "alice" },
                "content": "hi"
            }))
        );
    }
}

#[test]
fn chat_message_to_unknown_room_errors_sender_only() {
    let mut broker = Broker::new();
    let (c1, mut rx1) = connect(&mut broker, "1", "alice");
    let (c2, mut rx2) = connect(&mut broker, "2", "bob");
    send(&mut broker, c2, Action::JoinChat, Some(json!({ "room": "alpha" })));
    received(&mut rx2);

    send(
        &mut broker,
        c1,
        Action::ChatMessage,
        Some(json!({ "room": "ghost", "content": "boo" })),
    );

    let e1 = received(&mut rx1);
    assert_eq!(e1.len(), 1);
    assert!(!e1[0].status);
    assert_eq!(e1[0].action, Action::ChatMessage);
    assert!(e1[0].error.is_some());
    assert!(received(&mut rx2).is_empty());
    assert!(!broker.registry().room_exists("ghost"));
}

#[test]
fn chat_message_requires_membership() {
    let mut broker = Broker::new();
    let (c1, mut rx1) = connect(&mut broker, "1", "alice");
    let (c2, mut rx2) = connect(&mut broker, "2", "bob");
    send(&mut broker, c2, Action::JoinChat, Some(json!({ "room": "alpha" })));
    received(&mut rx2);

    send(
        &mut broker,
        c1,
        Action::ChatMessage,
        Some(json!({ "room": "alpha", "content": "intruder" })),
    );

    let e1 = received(&mut rx1);
    assert_eq!(e1.len(), 1);
    assert!(!e1[0].status);
    // The room's actual member saw nothing.
    assert!(received(&mut rx2).is_empty());
}

#[test]
fn left_chat_without_room_dequeues_from_waiting() {
    let mut broker = Broker::new();
    let (c1, mut rx1) = connect(&mut broker, "1", "alice");
    send(&mut broker, c1, Action::JoinWaitingList, None);
    received(&mut rx1);

    send(&mut broker, c1, Action::LeftChat, None);
    let e1 = received(&mut rx1);
    assert_eq!(e1.len(), 1);
    assert!(e1[0].status);
    assert_eq!(e1[0].action, Action::LeftChat);
    assert_eq!(e1[0].data, None);
    assert!(broker.registry().waiting().is_empty());

    // Later arrivals pair with each other, never with the departed client.
    let (c2, _rx2) = connect(&mut broker, "2", "bob");
    let (c3, _rx3) = connect(&mut broker, "3", "carol");
    send(&mut broker, c2, Action::JoinWaitingList, None);
    send(&mut broker, c3, Action::JoinWaitingList, None);
    assert!(received(&mut rx1)
        .iter()
        .all(|e| e.action != Action::JoinChat));
    assert_eq!(broker.registry().members_of("2-3").len(), 2);
}

#[test]
fn left_chat_notifies_remaining_members() {
    let mut broker = Broker::new();
    let (c1, mut rx1) = connect(&mut broker, "1", "alice");
    let (c2, mut rx2) = connect(&mut broker, "2", "bob");
    send(&mut broker, c1, Action::JoinChat, Some(json!({ "room": "alpha" })));
    send(&mut broker, c2, Action::JoinChat, Some(json!({ "room": "alpha" })));
    received(&mut rx1);
    received(&mut rx2);

    send(&mut broker, c1, Action::LeftChat, Some(json!({ "room": "alpha" })));

    let e2 = received(&mut rx2);
    assert_eq!(e2.len(), 1);
    assert_eq!(e2[0].action, Action::LeftChat);
    assert_eq!(
        e2[0].data,
        Some(json!({ "user": { "displayName": "alice" }, "room": "alpha" }))
    );

    assert_eq!(broker.registry().members_of("alpha"), vec![c2]);
    let joined = &broker.registry().client(c1).unwrap().joined_rooms;
    assert!(joined.is_empty());
}

#[test]
fn left_chat_for_unjoined_room_is_idempotent() {
    // P5: leaving a room the client never joined succeeds and alters no
    // membership.
    let mut broker = Broker::new();
    let (c1, mut rx1) = connect(&mut broker, "1", "alice");
    let (c2, mut rx2) = connect(&mut broker, "2", "bob");
    let (c3, mut rx3) = connect(&mut broker, "3", "carol");
    send(&mut broker, c1, Action::JoinChat, Some(json!({ "room": "alpha" })));
    send(&mut broker, c2, Action::JoinChat, Some(json!({ "room": "alpha" })));
    received(&mut rx1);
    received(&mut rx2);

    send(&mut broker, c3, Action::LeftChat, Some(json!({ "room": "alpha" })));

    let e3 = received(&mut rx3);
    assert_eq!(e3.len(), 1);
    assert!(e3[0].status);
    assert_eq!(broker.registry().members_of("alpha"), vec![c1, c2]);
}

#[test]
fn disconnect_cleans_up_waiting_and_every_room() {
    // P4: one disconnect broadcast per affected room, waiting entry gone.
    let mut broker = Broker::new();
    let (c1, mut rx1) = connect(&mut broker, "1", "alice");
    let (c2, mut rx2) = connect(&mut broker, "2", "bob");
    let (c3, mut rx3) = connect(&mut broker, "3", "carol");
    send(&mut broker, c1, Action::JoinChat, Some(json!({ "room": "a" })));
    send(&mut broker, c2, Action::JoinChat, Some(json!({ "room": "a" })));
    send(&mut broker, c1, Action::JoinChat, Some(json!({ "room": "b" })));
    send(&mut broker, c3, Action::JoinChat, Some(json!({ "room": "b" })));
    send(&mut broker, c1, Action::JoinWaitingList, None);
    received(&mut rx1);
    received(&mut rx2);
    received(&mut rx3);

    let outbounds = broker.disconnect(c1);
    broadcast::deliver_all(&outbounds);

    assert!(broker.registry().waiting().is_empty());
    assert_eq!(broker.registry().members_of("a"), vec![c2]);
    assert_eq!(broker.registry().members_of("b"), vec![c3]);
    assert!(broker.registry().client(c1).is_none());

    let e2 = received(&mut rx2);
    assert_eq!(e2.len(), 1);
    assert_eq!(e2[0].action, Action::Disconnect);
    assert_eq!(
        e2[0].data,
        Some(json!({ "user": { "displayName": "alice" }, "room": "a" }))
    );

    let e3 = received(&mut rx3);
    assert_eq!(e3.len(), 1);
    assert_eq!(
        e3[0].data,
        Some(json!({ "user": { "displayName": "alice" }, "room": "b" }))
    );

    // Diagnostic teardown ack addressed to the closing client itself.
    let e1 = received(&mut rx1);
    assert_eq!(e1.len(), 1);
    assert!(!e1[0].status);
    assert_eq!(e1[0].action, Action::Disconnect);
    assert_eq!(e1[0].error, Some(json!({ "error": "connection closed" })));
}

#[test]
fn membership_stays_bidirectionally_consistent() {
    // P3: k ∈ joined_rooms(c) iff c ∈ rooms[k], after any op sequence.
    let mut broker = Broker::new();
    let (c1, _rx1) = connect(&mut broker, "1", "alice");
    let (c2, _rx2) = connect(&mut broker, "2", "bob");
    let (c3, _rx3) = connect(&mut broker, "3", "carol");

    send(&mut broker, c1, Action::JoinChat, Some(json!({ "room": "a" })));
    send(&mut broker, c2, Action::JoinChat, Some(json!({ "room": "a" })));
    send(&mut broker, c2, Action::JoinChat, Some(json!({ "room": "b" })));
    send(&mut broker, c3, Action::JoinChat, Some(json!({ "room": "b" })));
    send(&mut broker, c1, Action::LeftChat, Some(json!({ "room": "a" })));
    send(&mut broker, c3, Action::LeftChat, Some(json!({ "room": "a" })));
    let outbounds = broker.disconnect(c2);
    broadcast::deliver_all(&outbounds);

    let registry = broker.registry();
    let keys: Vec<String> = registry.room_keys().cloned().collect();
    for conn in [c1, c3] {
        let client = registry.client(conn).unwrap();
        for key in &keys {
            let in_room = registry.members_of(key).contains(&conn);
            let in_joined = client.joined_rooms.iter().any(|r| r == key);
            assert_eq!(in_room, in_joined, "conn {conn} room {key}");
        }
        // No dangling keys on the client side either.
        for joined in &client.joined_rooms {
            assert!(registry.members_of(joined).contains(&conn));
        }
    }
}

#[test]
fn malformed_data_is_a_protocol_error_without_mutation() {
    let mut broker = Broker::new();
    let (c1, mut rx1) = connect(&mut broker, "1", "alice");

    send(&mut broker, c1, Action::JoinChat, Some(json!({ "nope": 1 })));

    let e1 = received(&mut rx1);
    assert_eq!(e1.len(), 1);
    assert!(!e1[0].status);
    assert_eq!(e1[0].action, Action::Error);
    assert_eq!(broker.registry().room_keys().count(), 0);
    assert!(broker.registry().client(c1).unwrap().joined_rooms.is_empty());
}

#[test]
fn room_dedupes_connections_for_the_same_user() {
    let mut broker = Broker::new();
    let (c1, _rx1) = connect(&mut broker, "1", "alice");
    let (c1b, _rx1b) = connect(&mut broker, "1", "alice");

    send(&mut broker, c1, Action::JoinChat, Some(json!({ "room": "alpha" })));
    send(&mut broker, c1b, Action::JoinChat, Some(json!({ "room": "alpha" })));

    assert_eq!(broker.registry().members_of("alpha"), vec![c1]);
    // The second connection holds no reference to a room it isn't in.
    assert!(broker
        .registry()
        .client(c1b)
        .unwrap()
        .joined_rooms
        .is_empty());
}
