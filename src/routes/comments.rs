use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use crate::comments::{self, CommentNode, CommentWithCounts, NewComment};
use crate::error::AppResult;
use crate::extractors::{CurrentUser, MaybeUser};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/comments", post(create_comment))
        .route(
            "/api/comments/{id}",
            get(comment_thread).delete(delete_comment),
        )
}

async fn create_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(new): Json<NewComment>,
) -> AppResult<(StatusCode, Json<CommentWithCounts>)> {
    let conn = state.db.get()?;
    let comment = comments::create_comment(&conn, user.id, &new, Utc::now())?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn comment_thread(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<i64>,
) -> AppResult<Json<CommentNode>> {
    let conn = state.db.get()?;
    Ok(Json(comments::get_comment(&conn, id, viewer.id())?))
}

async fn delete_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db.get()?;
    let removed = comments::delete_comment(&mut conn, id, user.id)?;
    Ok(Json(json!({ "removed": removed })))
}
