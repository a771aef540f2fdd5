use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::broker::{Action, ClientConnection, Inbound, UserRef};
use crate::state::AppState;
use crate::ws::broadcast;

/// Ping interval: server sends a WebSocket ping every 30 seconds to
/// surface abrupt disconnects that never send a Close frame.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if no pong arrives within 10 seconds after a ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for a resolved user.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames from an mpsc channel
/// - Reader loop: parses inbound `{action, data}` messages and dispatches
///   them through the broker
///
/// The mpsc sender is the connection's transport handle inside the
/// broker; any broadcast reaches this client by cloning it.
pub async fn run_connection(socket: WebSocket, state: AppState, user: UserRef) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Register the connection with the broker before any message flows.
    let client = ClientConnection::new(user.clone(), tx.clone());
    let conn_id = state.broker().connect(client);

    tracing::info!(conn = %conn_id, user_id = %user.id, "WebSocket actor started");

    // Writer task: forwards mpsc frames to the WebSocket sink.
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Ping task: periodic pings, close on pong timeout.
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(conn = %conn_id, "Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Set once disconnect handling has run, whether triggered by an
    // explicit `disconnect` action or by the stream ending. Terminal: no
    // further actions are accepted afterwards.
    let mut disconnected = false;

    // Reader loop: process incoming WebSocket messages in arrival order.
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    let inbound: Inbound = match serde_json::from_str(text.as_str()) {
                        Ok(inbound) => inbound,
                        Err(e) => {
                            // Protocol error: reject without mutating
                            // broker state, answer the sender only.
                            tracing::debug!(conn = %conn_id, error = %e, "Rejected inbound message");
                            send_protocol_error(&tx, &format!("unknown action: {e}"));
                            continue;
                        }
                    };

                    let teardown = inbound.action == Action::Disconnect;
                    let outbounds = state.broker().handle(conn_id, inbound);
                    broadcast::deliver_all(&outbounds);

                    if teardown {
                        // Client asked for teardown; cleanup already ran.
                        disconnected = true;
                        let _ = tx.send(Message::Close(None));
                        break;
                    }
                }
                Message::Binary(_) => {
                    // The protocol is JSON text frames.
                    tracing::debug!(conn = %conn_id, "Ignoring binary frame (expected text)");
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(conn = %conn_id, reason = ?frame, "Client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(conn = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::info!(conn = %conn_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Disconnect cleanup runs exactly once, even when the transport never
    // sent a Close frame.
    if !disconnected {
        let outbounds = state.broker().disconnect(conn_id);
        broadcast::deliver_all(&outbounds);
    }

    writer_handle.abort();
    ping_handle.abort();

    tracing::info!(conn = %conn_id, user_id = %user.id, "WebSocket actor stopped");
}

/// Writer task: receives frames from the mpsc channel and forwards them
/// to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}

/// Answer a malformed message with an `error`-action envelope, sender only.
fn send_protocol_error(tx: &crate::ws::ConnectionSender, msg: &str) {
    let envelope = crate::broker::Envelope {
        status: false,
        action: Action::Error,
        data: None,
        error: Some(serde_json::json!({ "error": msg })),
    };
    if let Ok(text) = serde_json::to_string(&envelope) {
        let _ = tx.send(Message::Text(text.into()));
    }
}
