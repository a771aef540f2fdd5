//! In-memory room registry: the single process-wide mutable resource.
//!
//! Owns the waiting list (FIFO) and the room-key -> member mapping. All
//! operations are synchronous and run to completion; callers hold the
//! broker lock across a full mutation sequence, so the registry itself
//! needs no internal locking. The registry is a pure data owner — the
//! waiting-list matcher is a separate component invoked explicitly by the
//! dispatcher after waiting-list mutations, never via a stored callback.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use crate::broker::client::{ClientConnection, ConnId};

/// Programming-error signals from registry guards. Never user-facing:
/// callers log these and degrade to a no-op rather than crash the broker.
#[derive(Debug, Error)]
pub enum InvariantError {
    #[error("connection {0} is already on the waiting list")]
    AlreadyWaiting(ConnId),
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnId),
}

/// Room key -> member list plus the waiting list, with bidirectional
/// consistency between `rooms` and each client's `joined_rooms`.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    clients: HashMap<ConnId, ClientConnection>,
    waiting: VecDeque<ConnId>,
    rooms: HashMap<String, Vec<ConnId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted connection. Called by the transport
    /// layer once, before any action is dispatched for the connection.
    pub fn register(&mut self, client: ClientConnection) {
        self.clients.insert(client.id, client);
    }

    /// Drop the connection record entirely. Only valid once disconnect
    /// cleanup has removed the connection from `waiting` and every room.
    pub fn remove(&mut self, conn: ConnId) -> Option<ClientConnection> {
        self.clients.remove(&conn)
    }

    pub fn client(&self, conn: ConnId) -> Option<&ClientConnection> {
        self.clients.get(&conn)
    }

    pub fn waiting(&self) -> &VecDeque<ConnId> {
        &self.waiting
    }

    /// Append to the waiting list. Errors on double-enqueue — an
    /// idempotency guard, not a user-facing failure.
    pub fn enqueue_waiting(&mut self, conn: ConnId) -> Result<(), InvariantError> {
        if !self.clients.contains_key(&conn) {
            return Err(InvariantError::UnknownConnection(conn));
        }
        if self.waiting.contains(&conn) {
            return Err(InvariantError::AlreadyWaiting(conn));
        }
        self.waiting.push_back(conn);
        Ok(())
    }

    /// Remove each given connection from the waiting list if present.
    /// Silent no-op for connections that are not queued.
    pub fn dequeue_waiting(&mut self, conns: &[ConnId]) {
        self.waiting.retain(|c| !conns.contains(c));
    }

    /// Add a connection to a room, creating the room on first join.
    /// Idempotent, and a room never holds two connections for the same
    /// user id: a second connection authenticated as the same user is a
    /// no-op join.
    pub fn join_room(&mut self, key: &str, conn: ConnId) {
        let Some(client) = self.clients.get(&conn) else {
            return;
        };
        let user_id = client.user.id.clone();

        let members = self.rooms.entry(key.to_string()).or_default();
        let user_occupies = members.iter().any(|m| {
            self.clients
                .get(m)
                .is_some_and(|c| c.user.id == user_id)
        });
        if !user_occupies {
            members.push(conn);
        }

        // Record the key on the client side only when this connection is
        // actually a member — a second connection for the same user is
        // kept out by the dedupe guard and must not reference the room.
        let is_member = members.contains(&conn);
        if is_member {
            if let Some(client) = self.clients.get_mut(&conn) {
                if !client.joined_rooms.iter().any(|r| r == key) {
                    client.joined_rooms.push(key.to_string());
                }
            }
        }
    }

    /// Remove a connection from a room and the room key from the client's
    /// membership list. No-op if either side is absent. Empty rooms are
    /// deleted so no stale keys accumulate.
    pub fn leave_room(&mut self, key: &str, conn: ConnId) {
        let now_empty = match self.rooms.get_mut(key) {
            Some(members) => {
                members.retain(|m| *m != conn);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.rooms.remove(key);
        }
        if let Some(client) = self.clients.get_mut(&conn) {
            client.joined_rooms.retain(|r| r != key);
        }
    }

    /// Current members of a room in join order; empty for unknown keys.
    pub fn members_of(&self, key: &str) -> Vec<ConnId> {
        self.rooms.get(key).cloned().unwrap_or_default()
    }

    pub fn room_exists(&self, key: &str) -> bool {
        self.rooms.contains_key(key)
    }

    pub fn room_keys(&self) -> impl Iterator<Item = &String> {
        self.rooms.keys()
    }

    /// Resolve connection ids to transport senders, skipping connections
    /// that have already been removed.
    pub fn senders_of(&self, conns: &[ConnId]) -> Vec<crate::ws::ConnectionSender> {
        conns
            .iter()
            .filter_map(|c| self.clients.get(c).map(|cl| cl.sender.clone()))
            .collect()
    }
}
