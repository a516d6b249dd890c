use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::karma::{self, KarmaEntry, KarmaWindow, MAX_LEADERBOARD_LIMIT, MAX_WINDOW_HOURS};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct TopQuery {
    hours: Option<i64>,
    limit: Option<usize>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/leaderboard/top", get(top))
}

/// GET /api/leaderboard/top: defaults to the configured window and size.
async fn top(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> AppResult<Json<Vec<KarmaEntry>>> {
    let hours = query.hours.unwrap_or(state.config.leaderboard.window_hours);
    let limit = query.limit.unwrap_or(state.config.leaderboard.limit);
    if !(1..=MAX_WINDOW_HOURS).contains(&hours) {
        return Err(AppError::Validation(format!(
            "hours must be between 1 and {}",
            MAX_WINDOW_HOURS
        )));
    }
    if !(1..=MAX_LEADERBOARD_LIMIT).contains(&limit) {
        return Err(AppError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_LEADERBOARD_LIMIT
        )));
    }

    let window = KarmaWindow::trailing(Utc::now(), hours);
    let conn = state.db.get()?;
    Ok(Json(karma::top_karma(&conn, &window, limit)?))
}
