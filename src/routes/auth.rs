use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::auth::{self, session, Credentials, Registration};
use crate::db::models::{AuthorRef, User};
use crate::error::{AppError, AppResult};
use crate::extractors::{session_token, CurrentUser};
use crate::karma::{self, KarmaWindow};
use crate::state::AppState;

#[derive(Serialize)]
struct Me {
    #[serde(flatten)]
    user: User,
    karma: i64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
}

// -- Cookie helpers --

fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    let max_age_secs = max_age_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", name)
}

/// Open a session for `user` and answer with the cookie attached.
fn signed_in(state: &AppState, user: User, status: StatusCode, message: &str) -> AppResult<Response> {
    let conn = state.db.get()?;
    let token = session::create_session(&conn, user.id, state.config.auth.session_hours, Utc::now())?;
    let cookie = session_cookie(
        &state.config.auth.cookie_name,
        &token,
        state.config.auth.session_hours,
    );

    let body = Json(json!({
        "user": AuthorRef { id: user.id, username: user.username },
        "message": message,
    }));
    Ok((status, [(header::SET_COOKIE, cookie)], body).into_response())
}

// -- Handlers --

/// POST /api/auth/register: create an account and sign in
async fn register(
    State(state): State<AppState>,
    Json(req): Json<Registration>,
) -> AppResult<Response> {
    // bcrypt blocks; run it off the async workers.
    let pool = state.db.clone();
    let cost = state.config.auth.bcrypt_cost;
    let user = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        auth::register(&conn, &req, cost, Utc::now())
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    signed_in(&state, user, StatusCode::CREATED, "Registration successful")
}

/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> AppResult<Response> {
    let pool = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        auth::authenticate(&conn, &req)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    tracing::info!(user_id = user.id, "user logged in");
    signed_in(&state, user, StatusCode::OK, "Logged in successfully")
}

/// POST /api/auth/logout: drop the session if there is one
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let cookie_name = &state.config.auth.cookie_name;
    if let Some(token) = session_token(&headers, cookie_name) {
        let conn = state.db.get()?;
        session::delete_session(&conn, token)?;
    }

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, clear_session_cookie(cookie_name))],
        Json(json!({ "message": "Logged out successfully" })),
    )
        .into_response())
}

/// GET /api/auth/me: the signed-in user with their rolling karma
async fn me(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Me>> {
    let conn = state.db.get()?;
    let window = KarmaWindow::trailing(Utc::now(), state.config.leaderboard.window_hours);
    let karma = karma::user_karma(&conn, user.id, &window)?;
    let user = auth::get_user(&conn, user.id)?;
    Ok(Json(Me { user, karma }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_sets_max_age_in_seconds() {
        let cookie = session_cookie("sid", "tok", 2);
        assert_eq!(cookie, "sid=tok; HttpOnly; SameSite=Strict; Path=/; Max-Age=7200");
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        assert!(clear_session_cookie("sid").ends_with("Max-Age=0"));
    }
}
