//! Like/unlike toggling for posts and comments.
//!
//! The check-and-mutate sequence runs in one `IMMEDIATE` transaction, which
//! takes SQLite's write lock up front so concurrent toggles serialize. The
//! partial unique indexes on `likes` remain the final guard: if an insert
//! still collides, the attempt is reported as
//! [`AppError::ConcurrentModification`] and nothing is persisted.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::Serialize;

use crate::db::models::Like;
use crate::db::{get_timestamp, timestamp};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeTarget {
    Post(i64),
    Comment(i64),
}

impl LikeTarget {
    /// Exactly one of the two ids must be present.
    pub fn from_ids(post_id: Option<i64>, comment_id: Option<i64>) -> AppResult<Self> {
        match (post_id, comment_id) {
            (Some(post_id), None) => Ok(LikeTarget::Post(post_id)),
            (None, Some(comment_id)) => Ok(LikeTarget::Comment(comment_id)),
            _ => Err(AppError::Validation(
                "Must specify exactly one: post_id or comment_id".into(),
            )),
        }
    }

    pub fn id(&self) -> i64 {
        match *self {
            LikeTarget::Post(id) | LikeTarget::Comment(id) => id,
        }
    }

    fn table(&self) -> &'static str {
        match self {
            LikeTarget::Post(_) => "posts",
            LikeTarget::Comment(_) => "comments",
        }
    }

    fn column(&self) -> &'static str {
        match self {
            LikeTarget::Post(_) => "post_id",
            LikeTarget::Comment(_) => "comment_id",
        }
    }

    fn missing(&self) -> AppError {
        match self {
            LikeTarget::Post(_) => AppError::Validation("Post does not exist".into()),
            LikeTarget::Comment(_) => AppError::Validation("Comment does not exist".into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LikeState {
    Liked,
    Unliked,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToggleResult {
    pub status: LikeState,
    pub like_count: i64,
}

/// Flip `user_id`'s like on `target`.
pub fn toggle_like(
    conn: &mut Connection,
    user_id: i64,
    target: LikeTarget,
    now: DateTime<Utc>,
) -> AppResult<ToggleResult> {
    match toggle_atomically(conn, user_id, target, now) {
        Err(AppError::Database(e)) if is_contention(&e) => {
            tracing::warn!(user_id, ?target, "like toggle lost a race: {}", e);
            Err(AppError::ConcurrentModification(
                "Concurrent modification detected. Please try again.".into(),
            ))
        }
        other => other,
    }
}

fn toggle_atomically(
    conn: &mut Connection,
    user_id: i64,
    target: LikeTarget,
    now: DateTime<Utc>,
) -> AppResult<ToggleResult> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let exists: bool = tx.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", target.table()),
        params![target.id()],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(target.missing());
    }

    let column = target.column();
    let deleted = tx.execute(
        &format!("DELETE FROM likes WHERE user_id = ?1 AND {column} = ?2"),
        params![user_id, target.id()],
    )?;

    let status = if deleted > 0 {
        LikeState::Unliked
    } else {
        tx.execute(
            &format!("INSERT INTO likes (user_id, {column}, created_at) VALUES (?1, ?2, ?3)"),
            params![user_id, target.id(), timestamp(&now)],
        )?;
        LikeState::Liked
    };

    let like_count: i64 = tx.query_row(
        &format!("SELECT COUNT(*) FROM likes WHERE {column} = ?1"),
        params![target.id()],
        |row| row.get(0),
    )?;
    tx.commit()?;

    tracing::debug!(user_id, ?target, ?status, like_count, "like toggled");
    Ok(ToggleResult { status, like_count })
}

/// Errors that mean another writer got there first.
fn is_contention(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

pub fn find_like(conn: &Connection, user_id: i64, target: LikeTarget) -> AppResult<Option<Like>> {
    let like = conn
        .query_row(
            &format!(
                "SELECT id, user_id, post_id, comment_id, created_at FROM likes
                 WHERE user_id = ?1 AND {} = ?2",
                target.column()
            ),
            params![user_id, target.id()],
            |row| {
                Ok(Like {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    post_id: row.get(2)?,
                    comment_id: row.get(3)?,
                    created_at: get_timestamp(row, 4)?,
                })
            },
        )
        .optional()?;
    Ok(like)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::state::DbPool;

    fn setup() -> DbPool {
        let pool = db::create_memory_pool().unwrap();
        db::run_migrations(&pool).unwrap();
        let conn = pool.get().unwrap();
        let now = timestamp(&Utc::now());
        conn.execute(
            "INSERT INTO users (id, username, password_hash, created_at)
             VALUES (1, 'alice', 'x', ?1), (2, 'bob', 'x', ?1)",
            params![now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO posts (id, author_id, content, created_at, updated_at) VALUES (10, 1, 'p', ?1, ?1)",
            params![now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO comments (id, post_id, author_id, content, created_at, updated_at)
             VALUES (100, 10, 1, 'c', ?1, ?1)",
            params![now],
        )
        .unwrap();
        drop(conn);
        pool
    }

    #[test]
    fn from_ids_requires_exactly_one_target() {
        assert_eq!(LikeTarget::from_ids(Some(1), None).unwrap(), LikeTarget::Post(1));
        assert_eq!(
            LikeTarget::from_ids(None, Some(2)).unwrap(),
            LikeTarget::Comment(2)
        );
        assert!(matches!(
            LikeTarget::from_ids(Some(1), Some(2)),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            LikeTarget::from_ids(None, None),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn toggle_twice_restores_count() {
        let pool = setup();
        let mut conn = pool.get().unwrap();
        let target = LikeTarget::Post(10);

        let first = toggle_like(&mut conn, 2, target, Utc::now()).unwrap();
        assert_eq!(first.status, LikeState::Liked);
        assert_eq!(first.like_count, 1);
        assert!(find_like(&conn, 2, target).unwrap().is_some());

        let second = toggle_like(&mut conn, 2, target, Utc::now()).unwrap();
        assert_eq!(second.status, LikeState::Unliked);
        assert_eq!(second.like_count, 0);
        assert!(find_like(&conn, 2, target).unwrap().is_none());

        let third = toggle_like(&mut conn, 2, target, Utc::now()).unwrap();
        assert_eq!(third.status, LikeState::Liked);
    }

    #[test]
    fn post_and_comment_likes_are_independent() {
        let pool = setup();
        let mut conn = pool.get().unwrap();
        toggle_like(&mut conn, 2, LikeTarget::Post(10), Utc::now()).unwrap();
        let on_comment = toggle_like(&mut conn, 2, LikeTarget::Comment(100), Utc::now()).unwrap();
        assert_eq!(on_comment.status, LikeState::Liked);
        assert_eq!(on_comment.like_count, 1);

        let like = find_like(&conn, 2, LikeTarget::Comment(100)).unwrap().unwrap();
        assert_eq!(like.comment_id, Some(100));
        assert_eq!(like.post_id, None);
    }

    #[test]
    fn counts_include_other_users() {
        let pool = setup();
        let mut conn = pool.get().unwrap();
        toggle_like(&mut conn, 1, LikeTarget::Post(10), Utc::now()).unwrap();
        let second = toggle_like(&mut conn, 2, LikeTarget::Post(10), Utc::now()).unwrap();
        assert_eq!(second.like_count, 2);
    }

    #[test]
    fn missing_target_is_validation_error_and_writes_nothing() {
        let pool = setup();
        let mut conn = pool.get().unwrap();
        let err = toggle_like(&mut conn, 2, LikeTarget::Post(999), Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref msg) if msg == "Post does not exist"));
        let err = toggle_like(&mut conn, 2, LikeTarget::Comment(999), Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref msg) if msg == "Comment does not exist"));

        let likes: i64 = conn
            .query_row("SELECT COUNT(*) FROM likes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(likes, 0);
    }

    #[test]
    fn unique_violation_is_contention() {
        let pool = setup();
        let conn = pool.get().unwrap();
        let now = timestamp(&Utc::now());
        conn.execute(
            "INSERT INTO likes (user_id, post_id, created_at) VALUES (2, 10, ?1)",
            params![now],
        )
        .unwrap();
        let err = conn
            .execute(
                "INSERT INTO likes (user_id, post_id, created_at) VALUES (2, 10, ?1)",
                params![now],
            )
            .unwrap_err();
        assert!(is_contention(&err));
        assert!(!is_contention(&rusqlite::Error::QueryReturnedNoRows));
    }

    #[test]
    fn check_constraint_failure_is_not_contention() {
        let pool = setup();
        let conn = pool.get().unwrap();
        let err = conn
            .execute(
                "INSERT INTO likes (user_id, post_id, comment_id, created_at) VALUES (2, 10, 100, 'x')",
                [],
            )
            .unwrap_err();
        assert!(!is_contention(&err));
    }
}
