use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::likes::{self, LikeState, LikeTarget};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    post_id: Option<i64>,
    comment_id: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/likes/toggle", post(toggle))
}

/// POST /api/likes/toggle: 201 when a like is added, 200 when removed,
/// 409 when a concurrent toggle won the race.
async fn toggle(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<ToggleRequest>,
) -> AppResult<Response> {
    let target = LikeTarget::from_ids(req.post_id, req.comment_id)?;
    let mut conn = state.db.get()?;
    let result = likes::toggle_like(&mut conn, user.id, target, Utc::now())?;

    let (status, message) = match result.status {
        LikeState::Liked => (StatusCode::CREATED, "Like added successfully"),
        LikeState::Unliked => (StatusCode::OK, "Like removed successfully"),
    };
    let body = Json(json!({
        "status": result.status,
        "like_count": result.like_count,
        "message": message,
    }));
    Ok((status, body).into_response())
}
