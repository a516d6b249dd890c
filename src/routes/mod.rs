pub mod auth;
pub mod comments;
pub mod leaderboard;
pub mod likes;
pub mod posts;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The full JSON API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(auth::router())
        .merge(posts::router())
        .merge(comments::router())
        .merge(likes::router())
        .merge(leaderboard::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
