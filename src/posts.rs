use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::comments::{build_comment_tree, fetch_post_comments, CommentNode};
use crate::db::models::{AuthorRef, Post};
use crate::db::{get_timestamp, timestamp};
use crate::error::{AppError, AppResult};

pub const MAX_CONTENT_CHARS: usize = 10_000;

/// A post plus the values derived for the current request.
#[derive(Debug, Clone, Serialize)]
pub struct PostWithCounts {
    #[serde(flatten)]
    pub post: Post,
    pub author: AuthorRef,
    pub like_count: i64,
    pub comment_count: i64,
    pub user_has_liked: bool,
}

#[derive(Debug, Serialize)]
pub struct PostDetail {
    #[serde(flatten)]
    pub post: PostWithCounts,
    pub comments: Vec<CommentNode>,
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub count: i64,
    pub page: u32,
    pub page_size: u32,
    pub has_next: bool,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPost {
    pub content: String,
}

/// Trim user-supplied text and enforce the length rules shared by posts and
/// comments.
pub fn clean_content(raw: &str) -> AppResult<String> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(AppError::Validation("Content cannot be empty".into()));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(AppError::Validation(format!(
            "Content must be {} characters or less",
            MAX_CONTENT_CHARS
        )));
    }
    Ok(content.to_string())
}

const POST_SELECT: &str = "
    SELECT p.id, p.author_id, p.content, p.created_at, p.updated_at,
           u.username,
           (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id) AS like_count,
           (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count,
           EXISTS(SELECT 1 FROM likes l WHERE l.post_id = p.id AND l.user_id = ?1) AS user_has_liked
    FROM posts p
    JOIN users u ON u.id = p.author_id";

fn post_with_counts(row: &Row<'_>) -> rusqlite::Result<PostWithCounts> {
    let author_id: i64 = row.get(1)?;
    Ok(PostWithCounts {
        post: Post {
            id: row.get(0)?,
            author_id,
            content: row.get(2)?,
            created_at: get_timestamp(row, 3)?,
            updated_at: get_timestamp(row, 4)?,
        },
        author: AuthorRef {
            id: author_id,
            username: row.get(5)?,
        },
        like_count: row.get(6)?,
        comment_count: row.get(7)?,
        user_has_liked: row.get(8)?,
    })
}

pub fn create_post(
    conn: &Connection,
    author_id: i64,
    new: &NewPost,
    now: DateTime<Utc>,
) -> AppResult<PostWithCounts> {
    let content = clean_content(&new.content)?;
    let ts = timestamp(&now);
    conn.execute(
        "INSERT INTO posts (author_id, content, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        params![author_id, content, ts],
    )?;
    let post_id = conn.last_insert_rowid();
    tracing::debug!(post_id, author_id, "post created");
    get_post(conn, post_id, Some(author_id))
}

/// Newest first, one page at a time. Pages are numbered from 1.
pub fn list_posts(
    conn: &Connection,
    viewer: Option<i64>,
    page: u32,
    page_size: u32,
) -> AppResult<Page<PostWithCounts>> {
    if page == 0 {
        return Err(AppError::Validation("Page numbers start at 1".into()));
    }
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
    let offset = i64::from(page - 1) * i64::from(page_size);
    if page > 1 && offset >= count {
        return Err(AppError::NotFound("Invalid page.".into()));
    }

    let mut stmt = conn.prepare(&format!(
        "{POST_SELECT}
         ORDER BY p.created_at DESC, p.id DESC
         LIMIT ?2 OFFSET ?3"
    ))?;
    let results = stmt
        .query_map(params![viewer, page_size, offset], post_with_counts)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        count,
        page,
        page_size,
        has_next: offset + (results.len() as i64) < count,
        results,
    })
}

pub fn get_post(conn: &Connection, post_id: i64, viewer: Option<i64>) -> AppResult<PostWithCounts> {
    conn.query_row(
        &format!("{POST_SELECT} WHERE p.id = ?2"),
        params![viewer, post_id],
        post_with_counts,
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound("Post not found".into()))
}

/// The post and its whole discussion: one query for the post, one bulk query
/// for every comment, then the tree is assembled in memory.
pub fn get_post_detail(conn: &Connection, post_id: i64, viewer: Option<i64>) -> AppResult<PostDetail> {
    let post = get_post(conn, post_id, viewer)?;
    let comments = build_comment_tree(fetch_post_comments(conn, post_id, viewer)?);
    Ok(PostDetail { post, comments })
}

fn post_author(conn: &Connection, post_id: i64) -> AppResult<i64> {
    conn.query_row(
        "SELECT author_id FROM posts WHERE id = ?1",
        params![post_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound("Post not found".into()))
}

pub fn update_post(
    conn: &Connection,
    post_id: i64,
    editor_id: i64,
    new: &NewPost,
    now: DateTime<Utc>,
) -> AppResult<PostWithCounts> {
    if post_author(conn, post_id)? != editor_id {
        return Err(AppError::Forbidden("You can only edit your own posts".into()));
    }
    let content = clean_content(&new.content)?;
    conn.execute(
        "UPDATE posts SET content = ?1, updated_at = ?2 WHERE id = ?3",
        params![content, timestamp(&now), post_id],
    )?;
    get_post(conn, post_id, Some(editor_id))
}

/// Comments and likes go with the post through the foreign-key cascade.
pub fn delete_post(conn: &Connection, post_id: i64, requester_id: i64) -> AppResult<()> {
    if post_author(conn, post_id)? != requester_id {
        return Err(AppError::Forbidden("You can only delete your own posts".into()));
    }
    conn.execute("DELETE FROM posts WHERE id = ?1", params![post_id])?;
    tracing::info!(post_id, "post deleted");
    Ok(())
}
