pub mod session;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;

use crate::db::models::User;
use crate::db::{get_timestamp, timestamp};
use crate::error::{AppError, AppResult};

const MAX_USERNAME_CHARS: usize = 150;
const MIN_PASSWORD_CHARS: usize = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub password_confirm: String,
    #[serde(default)]
    pub bio: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

fn validate_username(username: &str) -> AppResult<()> {
    if username.is_empty() {
        return Err(AppError::Validation("Username is required".into()));
    }
    if username.chars().count() > MAX_USERNAME_CHARS {
        return Err(AppError::Validation(format!(
            "Username must be {} characters or fewer",
            MAX_USERNAME_CHARS
        )));
    }
    let allowed = |c: char| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_');
    if !username.chars().all(allowed) {
        return Err(AppError::Validation(
            "Username may contain only letters, numbers, and @/./+/-/_ characters".into(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AppError::Validation(format!(
            "This password is too short. It must contain at least {} characters.",
            MIN_PASSWORD_CHARS
        )));
    }
    if password.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation(
            "This password is entirely numeric.".into(),
        ));
    }
    Ok(())
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        bio: row.get(2)?,
        created_at: get_timestamp(row, 3)?,
    })
}

pub fn register(
    conn: &Connection,
    registration: &Registration,
    bcrypt_cost: u32,
    now: DateTime<Utc>,
) -> AppResult<User> {
    let username = registration.username.trim();
    validate_username(username)?;
    validate_password(&registration.password)?;
    if registration.password != registration.password_confirm {
        return Err(AppError::Validation("Password fields didn't match.".into()));
    }

    let taken: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
        params![username],
        |row| row.get(0),
    )?;
    if taken {
        return Err(AppError::Validation(
            "A user with that username already exists.".into(),
        ));
    }

    let password_hash = bcrypt::hash(&registration.password, bcrypt_cost)?;
    let inserted = conn.execute(
        "INSERT INTO users (username, password_hash, bio, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![username, password_hash, registration.bio.trim(), timestamp(&now)],
    );
    match inserted {
        Ok(_) => {}
        // Lost a race with a concurrent registration for the same name.
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(AppError::Validation(
                "A user with that username already exists.".into(),
            ));
        }
        Err(e) => return Err(e.into()),
    }

    let user_id = conn.last_insert_rowid();
    tracing::info!(user_id, username, "user registered");
    get_user(conn, user_id)
}

pub fn authenticate(conn: &Connection, credentials: &Credentials) -> AppResult<User> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM users WHERE username = ?1",
            params![credentials.username.trim()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((user_id, password_hash)) = row else {
        return Err(AppError::Validation(
            "User does not exist. Please sign up first.".into(),
        ));
    };

    if !bcrypt::verify(&credentials.password, &password_hash)? {
        tracing::debug!(user_id, "rejected login");
        return Err(AppError::Validation("Wrong username or password.".into()));
    }

    get_user(conn, user_id)
}

pub fn get_user(conn: &Connection, user_id: i64) -> AppResult<User> {
    conn.query_row(
        "SELECT id, username, bio, created_at FROM users WHERE id = ?1",
        params![user_id],
        user_from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound("User not found".into()))
}
