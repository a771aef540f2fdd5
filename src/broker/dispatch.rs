//! Action dispatch: routes one inbound `{action, data}` message to its
//! handler and collects the resulting broadcasts.
//!
//! Each handler maps `(registry, requesting connection, data)` to one or
//! more `Outbound` batches. The enum-indexed match is exhaustive — an
//! unknown action string already fails deserialization at the transport
//! boundary. Handler failures stay local to the requesting client: logic
//! errors answer the sender alone and never touch other rooms.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::broker::client::ConnId;
use crate::broker::matcher;
use crate::broker::registry::RoomRegistry;
use crate::broker::response::{build_error, build_response, Outbound};

/// The action vocabulary. `Error` is outbound-only: clients never send it,
/// and a message carrying it is rejected as a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    JoinWaitingList,
    JoinChat,
    LeftChat,
    ChatMessage,
    Disconnect,
    Error,
}

/// Inbound message shape: `{action, data?}`.
#[derive(Debug, Deserialize)]
pub struct Inbound {
    pub action: Action,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JoinChatData {
    room: String,
}

#[derive(Debug, Deserialize)]
struct ChatMessageData {
    room: String,
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct LeftChatData {
    room: Option<String>,
}

/// Dispatch one inbound message for a connection. Returns every envelope
/// to deliver, in order: the handler's own response first, then any
/// matcher broadcasts it triggered.
///
/// The handler response is always delivered to the requesting client in
/// addition to its broadcast audience (without duplication), so acks with
/// an empty recipient list — `join-waiting-list`, `left-chat` without a
/// room — still reach the sender.
pub fn dispatch(registry: &mut RoomRegistry, conn: ConnId, inbound: Inbound) -> Vec<Outbound> {
    match inbound.action {
        Action::JoinWaitingList => handle_join_waiting_list(registry, conn),
        Action::JoinChat => handle_join_chat(registry, conn, inbound.data),
        Action::ChatMessage => handle_chat_message(registry, conn, inbound.data),
        Action::LeftChat => handle_left_chat(registry, conn, inbound.data),
        // Disconnect is driven by the transport layer when the connection
        // closes; a client sending it explicitly asks for teardown and the
        // actor closes the socket after this returns.
        Action::Disconnect => handle_disconnect(registry, conn),
        Action::Error => vec![protocol_error(registry, conn, "unknown action")],
    }
}

/// Transport entry point for connection close. Must run to completion
/// even if an individual room's cleanup broadcast has no recipients left;
/// each room is handled independently.
pub fn handle_disconnect(registry: &mut RoomRegistry, conn: ConnId) -> Vec<Outbound> {
    registry.dequeue_waiting(&[conn]);

    let (display_name, rooms) = match registry.client(conn) {
        Some(client) => (client.user.display_name.clone(), client.joined_rooms.clone()),
        None => return Vec::new(),
    };

    let mut out = Vec::new();
    // Snapshot taken above: leave_room mutates joined_rooms while we walk it.
    for room in rooms {
        registry.leave_room(&room, conn);
        // Remaining members computed after removal.
        let remaining = registry.senders_of(&registry.members_of(&room));
        out.push(build_response(
            remaining,
            Action::Disconnect,
            Some(json!({ "user": { "displayName": display_name }, "room": room })),
        ));
    }

    // Diagnostic teardown ack addressed to the closing connection itself.
    // The transport is already closing, so this is a best-effort no-op
    // send kept for parity with the wire protocol.
    out.push(build_error(
        registry.senders_of(&[conn]),
        Action::Disconnect,
        json!({ "error": "connection closed" }),
    ));

    registry.remove(conn);
    out
}

fn handle_join_waiting_list(registry: &mut RoomRegistry, conn: ConnId) -> Vec<Outbound> {
    if let Err(e) = registry.enqueue_waiting(conn) {
        // Programming-error signal (double enqueue): fail loudly in the
        // log, degrade to a no-op rather than drop the connection.
        tracing::error!(conn = %conn, error = %e, "Waiting-list enqueue rejected");
    }

    // The ack has no broadcast audience; pairing (if any) is a separate
    // broadcast emitted by the matcher below.
    let mut out = vec![build_response(
        registry.senders_of(&[conn]),
        Action::JoinWaitingList,
        None,
    )];
    out.extend(matcher::drain(registry));
    out
}

fn handle_join_chat(registry: &mut RoomRegistry, conn: ConnId, data: Option<Value>) -> Vec<Outbound> {
    let data: JoinChatData = match parse_data(data) {
        Ok(d) => d,
        Err(msg) => return vec![protocol_error(registry, conn, &msg)],
    };

    // First join creates the room; there is no separate "create" action.
    registry.join_room(&data.room, conn);

    // Every current member, including the joiner, is notified. (The
    // joiner can be absent from the member list when another connection
    // for the same user already occupies the room.)
    let recipients = with_requester(conn, registry.members_of(&data.room));
    vec![build_response(
        registry.senders_of(&recipients),
        Action::JoinChat,
        Some(json!({ "room": data.room })),
    )]
}

fn handle_chat_message(
    registry: &mut RoomRegistry,
    conn: ConnId,
    data: Option<Value>,
) -> Vec<Outbound> {
    let data: ChatMessageData = match parse_data(data) {
        Ok(d) => d,
        Err(msg) => return vec![protocol_error(registry, conn, &msg)],
    };

    let members = registry.members_of(&data.room);
    // Logic error: unknown room or sender not a member. Answered to the
    // sender only, no third-party broadcast, no mutation.
    if !registry.room_exists(&data.room) || !members.contains(&conn) {
        tracing::debug!(conn = %conn, room = %data.room, "chat-message outside membership");
        return vec![build_error(
            registry.senders_of(&[conn]),
            Action::ChatMessage,
            json!({ "error": format!("not a member of room '{}'", data.room) }),
        )];
    }

    let user = registry
        .client(conn)
        .map(|c| json!({ "id": c.user.id, "displayName": c.user.display_name }))
        .unwrap_or(Value::Null);

    vec![build_response(
        registry.senders_of(&members),
        Action::ChatMessage,
        Some(json!({ "user": user, "content": data.content })),
    )]
}

fn handle_left_chat(registry: &mut RoomRegistry, conn: ConnId, data: Option<Value>) -> Vec<Outbound> {
    let data: LeftChatData = match data {
        None | Some(Value::Null) => LeftChatData::default(),
        some => match parse_data(some) {
            Ok(d) => d,
            Err(msg) => return vec![protocol_error(registry, conn, &msg)],
        },
    };

    // Covers leaving while still queued for a match.
    registry.dequeue_waiting(&[conn]);

    let Some(room) = data.room else {
        // Pure dequeue-from-waiting case.
        return vec![build_response(
            registry.senders_of(&[conn]),
            Action::LeftChat,
            None,
        )];
    };

    // Leaving a room the client never joined still succeeds (no-op).
    registry.leave_room(&room, conn);

    let display_name = registry
        .client(conn)
        .map(|c| c.user.display_name.clone())
        .unwrap_or_default();

    let recipients = with_requester(conn, registry.members_of(&room));
    vec![build_response(
        registry.senders_of(&recipients),
        Action::LeftChat,
        Some(json!({ "user": { "displayName": display_name }, "room": room })),
    )]
}

/// Deserialize a handler payload, mapping failures to a protocol-error
/// message without touching registry state.
fn parse_data<T: serde::de::DeserializeOwned>(data: Option<Value>) -> Result<T, String> {
    serde_json::from_value(data.unwrap_or(Value::Null))
        .map_err(|e| format!("malformed data: {e}"))
}

fn protocol_error(registry: &RoomRegistry, conn: ConnId, msg: &str) -> Outbound {
    build_error(
        registry.senders_of(&[conn]),
        Action::Error,
        json!({ "error": msg }),
    )
}

/// Broadcast audience plus the requesting client, deduplicated. Keeps the
/// "requester always hears the response" rule without double-sending when
/// the requester is already a member of the audience.
fn with_requester(conn: ConnId, mut recipients: Vec<ConnId>) -> Vec<ConnId> {
    if !recipients.contains(&conn) {
        recipients.push(conn);
    }
    recipients
}
