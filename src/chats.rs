//! REST persistence collaborator: durable chats, memberships, and message
//! history live here, outside the transient broker. Clients hydrate room
//! membership and history over HTTP and carry live traffic over the
//! WebSocket broker.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;

/// Maximum persisted message length (chars).
const MAX_CONTENT_LENGTH: usize = 4000;

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub name: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct JoinChatRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ChatMemberResponse {
    pub id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub id: String,
    pub name: Option<String>,
    pub users: Vec<ChatMemberResponse>,
}

#[derive(Debug, Serialize)]
pub struct LastMessageResponse {
    pub content: String,
    #[serde(rename = "userId")]
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ChatListEntryResponse {
    pub id: String,
    pub name: Option<String>,
    pub users: Vec<ChatMemberResponse>,
    #[serde(rename = "lastMessage")]
    pub last_message: Option<LastMessageResponse>,
    pub participates: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListChatsQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: i64,
    #[serde(rename = "chatId")]
    pub chat_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub content: String,
}

// --- Handlers ---

/// POST /api/chats — Create a chat and enroll its creator.
pub async fn create_chat(
    State(state): State<AppState>,
    Json(body): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<ChatResponse>), StatusCode> {
    let db = state.db.clone();
    let chat = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if !user_exists(&conn, &body.user_id)? {
            return Err(StatusCode::NOT_FOUND);
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO chats (id, name, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, body.name, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.execute(
            "INSERT INTO chat_users (chat_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![id, body.user_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let users = chat_members(&conn, &id)?;
        Ok::<_, StatusCode>(ChatResponse {
            id,
            name: body.name,
            users,
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    tracing::info!(chat_id = %chat.id, "Chat created");
    Ok((StatusCode::CREATED, Json(chat)))
}

/// POST /api/chats/{chat_id}/join — Add a user to an existing chat.
/// Idempotent: re-joining is not an error.
pub async fn join_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(body): Json<JoinChatRequest>,
) -> Result<Json<ChatResponse>, StatusCode> {
    let db = state.db.clone();
    let chat = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if !user_exists(&conn, &body.user_id)? {
            return Err(StatusCode::NOT_FOUND);
        }
        let name = chat_name(&conn, &chat_id)?;

        conn.execute(
            "INSERT OR IGNORE INTO chat_users (chat_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![chat_id, body.user_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let users = chat_members(&conn, &chat_id)?;
        Ok::<_, StatusCode>(ChatResponse {
            id: chat_id,
            name,
            users,
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(chat))
}

/// GET /api/chats/{chat_id} — Chat with its member list.
pub async fn get_chat_by_id(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<ChatResponse>, StatusCode> {
    let db = state.db.clone();
    let chat = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let name = chat_name(&conn, &chat_id)?;
        let users = chat_members(&conn, &chat_id)?;
        Ok::<_, StatusCode>(ChatResponse {
            id: chat_id,
            name,
            users,
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(chat))
}

/// GET /api/chats?user_id=… — All chats with members and their latest
/// message; `participates` marks the ones the given user belongs to.
pub async fn list_chats(
    State(state): State<AppState>,
    Query(query): Query<ListChatsQuery>,
) -> Result<Json<Vec<ChatListEntryResponse>>, StatusCode> {
    let db = state.db.clone();
    let chats = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut stmt = conn
            .prepare("SELECT id, name FROM chats ORDER BY created_at ASC")
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let rows: Vec<(String, Option<String>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        let mut chats = Vec::with_capacity(rows.len());
        for (id, name) in rows {
            let users = chat_members(&conn, &id)?;
            let last_message = conn
                .query_row(
                    "SELECT content, user_id FROM messages
                     WHERE chat_id = ?1 ORDER BY id DESC LIMIT 1",
                    rusqlite::params![id],
                    |row| {
                        Ok(LastMessageResponse {
                            content: row.get(0)?,
                            user_id: row.get(1)?,
                        })
                    },
                )
                .ok();
            let participates = query
                .user_id
                .as_deref()
                .is_some_and(|uid| users.iter().any(|u| u.id == uid));

            chats.push(ChatListEntryResponse {
                id,
                name,
                users,
                last_message,
                participates,
            });
        }
        Ok::<_, StatusCode>(chats)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(chats))
}

/// POST /api/chats/{chat_id}/messages — Persist a message to history.
/// History lives outside the broker; live fan-out happens over the
/// WebSocket `chat-message` action.
pub async fn create_message(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(body): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), StatusCode> {
    let content = body.content.trim().to_string();
    if content.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if content.len() > MAX_CONTENT_LENGTH {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let db = state.db.clone();
    let message = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        // The sender must be enrolled in the chat.
        let is_member: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM chat_users WHERE chat_id = ?1 AND user_id = ?2",
                rusqlite::params![chat_id, body.user_id],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .unwrap_or(false);
        if !is_member {
            return Err(StatusCode::FORBIDDEN);
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO messages (chat_id, user_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![chat_id, body.user_id, content, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let id = conn.last_insert_rowid();

        Ok::<_, StatusCode>(MessageResponse {
            id,
            chat_id,
            user_id: body.user_id,
            content,
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok((StatusCode::CREATED, Json(message)))
}

// --- Query helpers ---

fn user_exists(conn: &Connection, user_id: &str) -> Result<bool, StatusCode> {
    conn.query_row(
        "SELECT COUNT(*) FROM users WHERE id = ?1",
        rusqlite::params![user_id],
        |row| row.get::<_, i64>(0).map(|c| c > 0),
    )
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Chat name lookup doubling as an existence check.
fn chat_name(conn: &Connection, chat_id: &str) -> Result<Option<String>, StatusCode> {
    conn.query_row(
        "SELECT name FROM chats WHERE id = ?1",
        rusqlite::params![chat_id],
        |row| row.get(0),
    )
    .map_err(|_| StatusCode::NOT_FOUND)
}

fn chat_members(conn: &Connection, chat_id: &str) -> Result<Vec<ChatMemberResponse>, StatusCode> {
    let mut stmt = conn
        .prepare(
            "SELECT u.id, u.display_name FROM users u
             JOIN chat_users cu ON cu.user_id = u.id
             WHERE cu.chat_id = ?1 ORDER BY u.display_name ASC",
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let users = stmt
        .query_map(rusqlite::params![chat_id], |row| {
            Ok(ChatMemberResponse {
                id: row.get(0)?,
                display_name: row.get(1)?,
            })
        })
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(users)
}
