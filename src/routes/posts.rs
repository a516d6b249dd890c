use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use crate::error::AppResult;
use crate::extractors::{CurrentUser, MaybeUser};
use crate::posts::{self, NewPost, Page, PostDetail, PostWithCounts};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u32>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/posts", get(list_posts).post(create_post))
        .route(
            "/api/posts/{id}",
            get(post_detail).put(update_post).delete(delete_post),
        )
}

async fn list_posts(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Page<PostWithCounts>>> {
    let conn = state.db.get()?;
    let page = posts::list_posts(
        &conn,
        viewer.id(),
        query.page.unwrap_or(1),
        state.config.feed.page_size,
    )?;
    Ok(Json(page))
}

async fn create_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(new): Json<NewPost>,
) -> AppResult<(StatusCode, Json<PostWithCounts>)> {
    let conn = state.db.get()?;
    let post = posts::create_post(&conn, user.id, &new, Utc::now())?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn post_detail(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<i64>,
) -> AppResult<Json<PostDetail>> {
    let conn = state.db.get()?;
    Ok(Json(posts::get_post_detail(&conn, id, viewer.id())?))
}

async fn update_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(edit): Json<NewPost>,
) -> AppResult<Json<PostWithCounts>> {
    let conn = state.db.get()?;
    Ok(Json(posts::update_post(&conn, id, user.id, &edit, Utc::now())?))
}

async fn delete_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    let conn = state.db.get()?;
    posts::delete_post(&conn, id, user.id)?;
    Ok(StatusCode::NO_CONTENT)
}
