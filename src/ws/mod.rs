pub mod actor;
pub mod broadcast;
pub mod handler;

use tokio::sync::mpsc;

/// Sender half of a WebSocket connection's outbound channel. The broker
/// stores one per connection as its opaque transport handle; anything
/// holding a clone can push frames to that client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
