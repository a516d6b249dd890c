pub mod tree;

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;

use crate::db::models::{AuthorRef, Comment};
use crate::db::{get_timestamp, timestamp};
use crate::error::{AppError, AppResult};
use crate::posts::clean_content;

pub use tree::build_comment_tree;

/// A comment plus the values derived for the current request.
#[derive(Debug, Clone, Serialize)]
pub struct CommentWithCounts {
    #[serde(flatten)]
    pub comment: Comment,
    pub author: AuthorRef,
    pub like_count: i64,
    pub user_has_liked: bool,
}

/// One comment and its replies. Threads may be arbitrarily deep, so dropping
/// and serializing never recurse.
#[derive(Debug)]
pub struct CommentNode {
    pub entry: CommentWithCounts,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    /// JSON object for this comment with its `replies` nested inside,
    /// written from an explicit stack.
    pub fn to_json(&self) -> serde_json::Result<String> {
        enum Step<'a> {
            Open(&'a CommentNode),
            Comma,
            Close,
        }

        let mut out: Vec<u8> = Vec::new();
        let mut steps = vec![Step::Open(self)];
        while let Some(step) = steps.pop() {
            match step {
                Step::Open(node) => {
                    serde_json::to_writer(&mut out, &node.entry)?;
                    // Reopen the entry's object to append its replies.
                    out.pop();
                    out.extend_from_slice(b",\"replies\":[");
                    steps.push(Step::Close);
                    for (i, reply) in node.replies.iter().enumerate().rev() {
                        steps.push(Step::Open(reply));
                        if i > 0 {
                            steps.push(Step::Comma);
                        }
                    }
                }
                Step::Comma => out.push(b','),
                Step::Close => out.extend_from_slice(b"]}"),
            }
        }
        String::from_utf8(out).map_err(<serde_json::Error as serde::ser::Error>::custom)
    }
}

impl Serialize for CommentNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let json = self
            .to_json()
            .map_err(<S::Error as serde::ser::Error>::custom)?;
        let raw = RawValue::from_string(json).map_err(<S::Error as serde::ser::Error>::custom)?;
        raw.serialize(serializer)
    }
}

impl Drop for CommentNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.replies);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.replies);
        }
    }
}

/// Where a comment thread comes from, decided once at the request boundary.
#[derive(Debug)]
pub enum CommentSource {
    /// A forest already assembled from a bulk load.
    Bulk(Vec<CommentNode>),
    /// A single comment whose thread still has to be loaded.
    OnDemand(i64),
}

impl CommentSource {
    pub fn resolve(self, conn: &Connection, viewer: Option<i64>) -> AppResult<Vec<CommentNode>> {
        match self {
            CommentSource::Bulk(forest) => Ok(forest),
            CommentSource::OnDemand(comment_id) => {
                let post_id: i64 = conn
                    .query_row(
                        "SELECT post_id FROM comments WHERE id = ?1",
                        params![comment_id],
                        |row| row.get(0),
                    )
                    .optional()?
                    .ok_or_else(|| AppError::NotFound("Comment not found".into()))?;

                let forest = build_comment_tree(fetch_post_comments(conn, post_id, viewer)?);
                Ok(tree::take_subtree(forest, comment_id).into_iter().collect())
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewComment {
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub content: String,
}

const COMMENT_SELECT: &str = "
    SELECT c.id, c.post_id, c.author_id, c.parent_id, c.content, c.created_at, c.updated_at,
           u.username,
           (SELECT COUNT(*) FROM likes l WHERE l.comment_id = c.id) AS like_count,
           EXISTS(SELECT 1 FROM likes l WHERE l.comment_id = c.id AND l.user_id = ?1) AS user_has_liked
    FROM comments c
    JOIN users u ON u.id = c.author_id";

fn comment_with_counts(row: &Row<'_>) -> rusqlite::Result<CommentWithCounts> {
    let author_id: i64 = row.get(2)?;
    Ok(CommentWithCounts {
        comment: Comment {
            id: row.get(0)?,
            post_id: row.get(1)?,
            author_id,
            parent_id: row.get(3)?,
            content: row.get(4)?,
            created_at: get_timestamp(row, 5)?,
            updated_at: get_timestamp(row, 6)?,
        },
        author: AuthorRef {
            id: author_id,
            username: row.get(7)?,
        },
        like_count: row.get(8)?,
        user_has_liked: row.get(9)?,
    })
}

/// Every comment of a post, oldest first, annotated in the same query.
pub fn fetch_post_comments(
    conn: &Connection,
    post_id: i64,
    viewer: Option<i64>,
) -> AppResult<Vec<CommentWithCounts>> {
    let mut stmt = conn.prepare(&format!(
        "{COMMENT_SELECT}
         WHERE c.post_id = ?2
         ORDER BY c.created_at ASC, c.id ASC"
    ))?;
    let comments = stmt
        .query_map(params![viewer, post_id], comment_with_counts)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}

pub fn fetch_comment(
    conn: &Connection,
    comment_id: i64,
    viewer: Option<i64>,
) -> AppResult<Option<CommentWithCounts>> {
    let comment = conn
        .query_row(
            &format!("{COMMENT_SELECT} WHERE c.id = ?2"),
            params![viewer, comment_id],
            comment_with_counts,
        )
        .optional()?;
    Ok(comment)
}

/// A single comment with its full reply thread.
pub fn get_comment(conn: &Connection, comment_id: i64, viewer: Option<i64>) -> AppResult<CommentNode> {
    CommentSource::OnDemand(comment_id)
        .resolve(conn, viewer)?
        .pop()
        .ok_or_else(|| AppError::NotFound("Comment not found".into()))
}

pub fn create_comment(
    conn: &Connection,
    author_id: i64,
    new: &NewComment,
    now: DateTime<Utc>,
) -> AppResult<CommentWithCounts> {
    let content = clean_content(&new.content)?;

    let post_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM posts WHERE id = ?1)",
        params![new.post_id],
        |row| row.get(0),
    )?;
    if !post_exists {
        return Err(AppError::NotFound("Post not found".into()));
    }

    if let Some(parent_id) = new.parent_id {
        let parent_post: Option<i64> = conn
            .query_row(
                "SELECT post_id FROM comments WHERE id = ?1",
                params![parent_id],
                |row| row.get(0),
            )
            .optional()?;
        match parent_post {
            None => return Err(AppError::Validation("Parent comment does not exist".into())),
            Some(post_id) if post_id != new.post_id => {
                return Err(AppError::Validation(
                    "Parent comment must belong to the same post".into(),
                ))
            }
            Some(_) => {}
        }
    }

    let ts = timestamp(&now);
    conn.execute(
        "INSERT INTO comments (post_id, author_id, parent_id, content, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![new.post_id, author_id, new.parent_id, content, ts],
    )?;
    let comment_id = conn.last_insert_rowid();
    tracing::debug!(comment_id, post_id = new.post_id, "comment created");

    fetch_comment(conn, comment_id, Some(author_id))?
        .ok_or_else(|| AppError::Internal("Failed to retrieve created comment".into()))
}

/// Ids of `root_id` and all of its descendants, breadth first.
pub fn collect_subtree_ids(conn: &Connection, root_id: i64) -> AppResult<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM comments WHERE parent_id = ?1 ORDER BY id")?;
    let mut ids = vec![root_id];
    let mut queue = VecDeque::from([root_id]);
    while let Some(id) = queue.pop_front() {
        let children = stmt
            .query_map(params![id], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for child in children {
            ids.push(child);
            queue.push_back(child);
        }
    }
    Ok(ids)
}

/// Delete a comment and its whole reply subtree. Returns the number of
/// comments removed.
pub fn delete_comment(conn: &mut Connection, comment_id: i64, requester_id: i64) -> AppResult<usize> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let author_id: i64 = tx
        .query_row(
            "SELECT author_id FROM comments WHERE id = ?1",
            params![comment_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound("Comment not found".into()))?;
    if author_id != requester_id {
        return Err(AppError::Forbidden(
            "You can only delete your own comments".into(),
        ));
    }

    let ids = collect_subtree_ids(&tx, comment_id)?;
    {
        let mut delete_likes = tx.prepare("DELETE FROM likes WHERE comment_id = ?1")?;
        let mut delete_comment = tx.prepare("DELETE FROM comments WHERE id = ?1")?;
        // Deepest first so no row ever points at a deleted parent.
        for id in ids.iter().rev() {
            delete_likes.execute(params![id])?;
            delete_comment.execute(params![id])?;
        }
    }
    tx.commit()?;

    tracing::info!(comment_id, removed = ids.len(), "comment subtree deleted");
    Ok(ids.len())
}
