//! Waiting-list matcher: pairs the two longest-waiting clients into a
//! deterministic 1:1 room.
//!
//! Invoked explicitly by the dispatcher after every waiting-list mutation
//! (the registry holds no callback into matching logic). Runs under the
//! same broker lock as the mutation that triggered it, so an enqueue and
//! the pairing it causes are atomic with respect to other connections.

use serde_json::json;

use crate::broker::dispatch::Action;
use crate::broker::registry::RoomRegistry;
use crate::broker::response::{build_response, Outbound};

/// Canonical 1:1 room key for an unordered pair of user ids. Both sides
/// compute the same key regardless of enqueue order, so at most one such
/// room exists per pair at a time.
pub fn canonical_room_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}-{b}")
    } else {
        format!("{b}-{a}")
    }
}

/// Drain the waiting list in FIFO pairs. Each pair is dequeued, joined
/// into its canonical room, and addressed a `join-chat` broadcast naming
/// the room. The loop handles bursts that leave three or more clients
/// waiting; with fewer than two it is a no-op. Never fails.
pub fn drain(registry: &mut RoomRegistry) -> Vec<Outbound> {
    let mut out = Vec::new();

    while registry.waiting().len() >= 2 {
        let first = registry.waiting()[0];
        let second = registry.waiting()[1];
        registry.dequeue_waiting(&[first, second]);

        let (first_uid, second_uid) = match (registry.client(first), registry.client(second)) {
            (Some(a), Some(b)) => (a.user.id.clone(), b.user.id.clone()),
            // A queued connection with no record means it was torn down
            // mid-burst; drop it and keep draining.
            _ => continue,
        };

        let key = canonical_room_key(&first_uid, &second_uid);
        registry.join_room(&key, first);
        registry.join_room(&key, second);

        tracing::debug!(room = %key, "Paired waiting clients");

        out.push(build_response(
            registry.senders_of(&[first, second]),
            Action::JoinChat,
            Some(json!({ "room": key })),
        ));
    }

    out
}
