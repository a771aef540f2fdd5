use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::broker::UserRef;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection. Identity resolution is
/// external to the broker: the caller names a registered user id and the
/// transport hydrates the display name from the user store.
#[derive(Debug, Deserialize)]
pub struct WsConnectQuery {
    pub user: String,
}

/// Close code sent when the named user does not exist.
const CLOSE_UNKNOWN_USER: u16 = 4002;

/// GET /ws?user=<user_id>
/// WebSocket upgrade endpoint. On an unknown user, upgrades then
/// immediately closes with a descriptive close code. On success, spawns
/// the per-connection actor.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user = resolve_user(&state, params.user.clone()).await;

    match user {
        Some(user) => {
            tracing::info!(user_id = %user.id, "WebSocket connection resolved");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user))
        }
        None => {
            tracing::warn!(user_id = %params.user, "WebSocket connect for unknown user");
            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: CLOSE_UNKNOWN_USER,
                    reason: "Unknown user".into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}

/// Look up the user row backing this connection. Returns `None` when the
/// id is not registered.
async fn resolve_user(state: &AppState, user_id: String) -> Option<UserRef> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        conn.query_row(
            "SELECT id, display_name FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            |row| {
                Ok(UserRef {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                })
            },
        )
        .ok()
    })
    .await
    .ok()
    .flatten()
}
