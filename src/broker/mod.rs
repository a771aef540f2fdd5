//! Connection/room broker core.
//!
//! Transient, in-memory, single-process: the registry of rooms and
//! waiting clients, the FIFO matcher that pairs waiting clients into a
//! canonical room, the per-action dispatch, and the response envelopes.
//! The transport layer drives it through exactly three entry points:
//! [`Broker::connect`], [`Broker::handle`], and [`Broker::disconnect`].

pub mod client;
pub mod dispatch;
pub mod matcher;
pub mod registry;
pub mod response;

pub use client::{ClientConnection, ConnId, UserRef};
pub use dispatch::{Action, Inbound};
pub use registry::{InvariantError, RoomRegistry};
pub use response::{Envelope, Outbound};

use std::sync::{Arc, Mutex};

/// Facade owning the registry. One instance per broker process, shared
/// behind a single lock: every dispatch runs to completion under it, so a
/// mutation sequence (enqueue, match, join, build broadcasts) is atomic
/// with respect to other connections.
#[derive(Debug, Default)]
pub struct Broker {
    registry: RoomRegistry,
}

/// Broker handle as stored in application state.
pub type SharedBroker = Arc<Mutex<Broker>>;

pub fn new_shared_broker() -> SharedBroker {
    Arc::new(Mutex::new(Broker::new()))
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted connection.
    pub fn connect(&mut self, client: ClientConnection) -> ConnId {
        let id = client.id;
        self.registry.register(client);
        id
    }

    /// Dispatch one inbound message. Returns the envelopes to deliver,
    /// with recipients already resolved to transport handles.
    pub fn handle(&mut self, conn: ConnId, inbound: Inbound) -> Vec<Outbound> {
        dispatch::dispatch(&mut self.registry, conn, inbound)
    }

    /// Run disconnect cleanup for a closed connection: dequeue from the
    /// waiting list, leave every joined room, and notify each room's
    /// remaining members.
    pub fn disconnect(&mut self, conn: ConnId) -> Vec<Outbound> {
        dispatch::handle_disconnect(&mut self.registry, conn)
    }

    /// Read-only access for assertions and diagnostics.
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Mutable registry access for callers that drive the registry and
    /// matcher directly (tests, tooling). Production traffic goes through
    /// [`Broker::handle`] and [`Broker::disconnect`].
    pub fn registry_mut(&mut self) -> &mut RoomRegistry {
        &mut self.registry
    }
}
