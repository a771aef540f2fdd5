use axum::{routing::get, routing::post, Router};

use crate::chats;
use crate::state::AppState;
use crate::users;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Identity store (consumed by the WS transport to resolve users)
        .route("/api/users", post(users::register_user))
        .route("/api/users/{user_id}", get(users::get_user))
        // Chat persistence collaborator
        .route(
            "/api/chats",
            post(chats::create_chat).get(chats::list_chats),
        )
        .route("/api/chats/{chat_id}", get(chats::get_chat_by_id))
        .route("/api/chats/{chat_id}/join", post(chats::join_chat))
        .route("/api/chats/{chat_id}/messages", post(chats::create_message))
        // Live broker transport
        .route("/ws", get(ws_handler::ws_upgrade))
        .with_state(state)
}
