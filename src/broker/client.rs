use serde::Serialize;
use uuid::Uuid;

use crate::ws::ConnectionSender;

/// Opaque per-connection identifier, stable for the connection's lifetime.
/// Distinct from the user id: one user may open several connections.
pub type ConnId = Uuid;

/// Identity of the human behind a connection, resolved by the transport
/// layer (user store lookup) before the connection is registered.
/// Immutable for the life of the connection.
#[derive(Debug, Clone, Serialize)]
pub struct UserRef {
    pub id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

/// Identity + membership record for one live connection. Pure state —
/// all mutation goes through the `RoomRegistry`.
#[derive(Debug)]
pub struct ClientConnection {
    pub id: ConnId,
    pub user: UserRef,
    /// Room keys this connection belongs to, in join order.
    pub joined_rooms: Vec<String>,
    /// Transport handle. The core never inspects it; only the broadcaster
    /// pushes frames into it.
    pub sender: ConnectionSender,
}

impl ClientConnection {
    pub fn new(user: UserRef, sender: ConnectionSender) -> Self {
        Self {
            id: Uuid::new_v4(),
            user,
            joined_rooms: Vec::new(),
            sender,
        }
    }
}
