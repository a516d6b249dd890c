use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::timestamp;
use crate::error::AppResult;
use crate::extractors::CurrentUser;

/// Sessions last at most a year.
pub const MAX_SESSION_HOURS: u64 = 24 * 366;

/// Create a new session for a user. Returns the session token.
pub fn create_session(
    conn: &Connection,
    user_id: i64,
    hours: u64,
    now: DateTime<Utc>,
) -> AppResult<String> {
    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();
    let expires_at = now + Duration::hours(hours as i64);

    conn.execute(
        "INSERT INTO sessions (id, user_id, token, expires_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, user_id, token, timestamp(&expires_at), timestamp(&now)],
    )?;

    Ok(token)
}

/// The user owning an unexpired session, if any.
pub fn find_session_user(
    conn: &Connection,
    token: &str,
    now: DateTime<Utc>,
) -> AppResult<Option<CurrentUser>> {
    let user = conn
        .query_row(
            "SELECT u.id, u.username FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1 AND s.expires_at > ?2",
            params![token, timestamp(&now)],
            |row| {
                Ok(CurrentUser {
                    id: row.get(0)?,
                    username: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

/// Delete a session by token.
pub fn delete_session(conn: &Connection, token: &str) -> AppResult<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
