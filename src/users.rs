//! REST identity store. The WebSocket transport resolves a connection's
//! user from these rows; the live broker itself never reads them.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterUserRequest {
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

/// POST /api/users — Register a user with a unique display name.
pub async fn register_user(
    State(state): State<AppState>,
    Json(body): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), StatusCode> {
    let display_name = body.display_name.trim().to_string();
    if display_name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO users (id, display_name, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, display_name, now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        })?;

        Ok::<_, StatusCode>(UserResponse { id, display_name })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    tracing::info!(user_id = %user.id, "User registered");
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /api/users/{id} — Look up a registered user.
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, StatusCode> {
    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.query_row(
            "SELECT id, display_name FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            |row| {
                Ok(UserResponse {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                })
            },
        )
        .map_err(|_| StatusCode::NOT_FOUND)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(user))
}
