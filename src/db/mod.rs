pub mod models;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Row};
use std::path::Path;

use crate::state::DbPool;

pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial",
        include_str!("../../migrations/001_initial.sql"),
    ),
    ("002_likes", include_str!("../../migrations/002_likes.sql")),
];

/// Fixed-width UTC text so that lexical order matches time order in SQL.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn create_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas are per-connection, so every pooled connection gets them.
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(
            "
            PRAGMA busy_timeout = 5000;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )
    });
    let pool = Pool::builder().max_size(8).build(manager)?;

    Ok(pool)
}

/// Single-connection in-memory pool. Each in-memory connection is its own
/// database, so the pool must never hand out a second one.
pub fn create_memory_pool() -> anyhow::Result<DbPool> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::builder().max_size(1).build(manager)?;
    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    // Create migrations tracking table
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    tracing::info!("Database migrations complete");
    Ok(())
}

pub fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Read a timestamp column written by [`timestamp`].
pub fn get_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_pool() -> DbPool {
        let pool = create_memory_pool().unwrap();
        run_migrations(&pool).unwrap();
        pool
    }

    fn seed(conn: &rusqlite::Connection) {
        let now = timestamp(&Utc::now());
        conn.execute(
            "INSERT INTO users (id, username, password_hash, created_at) VALUES (1, 'alice', 'x', ?1)",
            params![now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO posts (id, author_id, content, created_at, updated_at) VALUES (10, 1, 'hello', ?1, ?1)",
            params![now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO comments (id, post_id, author_id, parent_id, content, created_at, updated_at)
             VALUES (100, 10, 1, NULL, 'top', ?1, ?1),
                    (101, 10, 1, 100, 'reply', ?1, ?1),
                    (102, 10, 1, 101, 'nested', ?1, ?1)",
            params![now],
        )
        .unwrap();
    }

    #[test]
    fn create_pool_creates_db_file() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("sub/dir/test.db");
        let pool = create_pool(&db_path).unwrap();
        assert!(db_path.exists());
        let conn = pool.get().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn every_pooled_connection_enforces_foreign_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = create_pool(&tmp.path().join("fk.db")).unwrap();
        let first = pool.get().unwrap();
        let second = pool.get().unwrap();
        for conn in [&first, &second] {
            let enabled: bool = conn
                .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                .unwrap();
            assert!(enabled);
        }
    }

    #[test]
    fn migrations_run_successfully() {
        let pool = test_pool();
        let conn = pool.get().unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };
        for table in ["users", "sessions", "posts", "comments", "likes"] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn foreign_keys_enforced() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let result = conn.execute(
            "INSERT INTO posts (author_id, content, created_at, updated_at) VALUES (999, 'x', 'now', 'now')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn like_must_target_exactly_one() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        seed(&conn);
        let now = timestamp(&Utc::now());

        let both = conn.execute(
            "INSERT INTO likes (user_id, post_id, comment_id, created_at) VALUES (1, 10, 100, ?1)",
            params![now],
        );
        assert!(both.is_err());

        let neither = conn.execute(
            "INSERT INTO likes (user_id, post_id, comment_id, created_at) VALUES (1, NULL, NULL, ?1)",
            params![now],
        );
        assert!(neither.is_err());
    }

    #[test]
    fn duplicate_likes_rejected_by_unique_index() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        seed(&conn);
        let now = timestamp(&Utc::now());

        conn.execute(
            "INSERT INTO likes (user_id, post_id, created_at) VALUES (1, 10, ?1)",
            params![now],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO likes (user_id, post_id, created_at) VALUES (1, 10, ?1)",
            params![now],
        );
        assert!(dup.is_err());

        // The post index must not block comment likes by the same user.
        conn.execute(
            "INSERT INTO likes (user_id, comment_id, created_at) VALUES (1, 100, ?1)",
            params![now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO likes (user_id, comment_id, created_at) VALUES (1, 101, ?1)",
            params![now],
        )
        .unwrap();
    }

    #[test]
    fn deleting_post_cascades_through_comment_tree() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        seed(&conn);
        let now = timestamp(&Utc::now());
        conn.execute(
            "INSERT INTO likes (user_id, comment_id, created_at) VALUES (1, 102, ?1)",
            params![now],
        )
        .unwrap();

        conn.execute("DELETE FROM posts WHERE id = 10", []).unwrap();

        let comments: i64 = conn
            .query_row("SELECT COUNT(*) FROM comments", [], |r| r.get(0))
            .unwrap();
        let likes: i64 = conn
            .query_row("SELECT COUNT(*) FROM likes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(comments, 0);
        assert_eq!(likes, 0);
    }

    #[test]
    fn timestamps_sort_lexically() {
        let earlier = Utc.with_ymd_and_hms(2025, 1, 15, 9, 59, 59).unwrap();
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(timestamp(&earlier) < timestamp(&later));
        assert_eq!(timestamp(&earlier), "2025-01-15T09:59:59.000000Z");
    }

    #[test]
    fn get_timestamp_reads_back_stored_value() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let now = Utc::now();
        let read: DateTime<Utc> = conn
            .query_row("SELECT ?1", params![timestamp(&now)], |row| get_timestamp(row, 0))
            .unwrap();
        assert_eq!(read.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn get_timestamp_rejects_garbage() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let result = conn.query_row("SELECT 'not-a-date'", [], |row| get_timestamp(row, 0));
        assert!(result.is_err());
    }
}
