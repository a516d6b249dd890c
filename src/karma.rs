//! Rolling karma: likes received inside a trailing window, weighted by what
//! was liked. Never stored; every call recomputes from the `likes` table.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::db::timestamp;
use crate::error::AppResult;

pub const POST_LIKE_KARMA: i64 = 5;
pub const COMMENT_LIKE_KARMA: i64 = 1;

/// Longest window and largest board a caller may ask for.
pub const MAX_WINDOW_HOURS: i64 = 24 * 30;
pub const MAX_LEADERBOARD_LIMIT: usize = 100;

/// Half-open interval `[start, end)`, fixed once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KarmaWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl KarmaWindow {
    pub fn trailing(now: DateTime<Utc>, hours: i64) -> Self {
        Self {
            start: now - Duration::hours(hours),
            end: now,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KarmaEntry {
    pub user_id: i64,
    pub username: String,
    pub karma: i64,
}

/// Likes received by one author from one kind of target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeTally {
    pub user_id: i64,
    pub username: String,
    pub likes: i64,
}

/// Merge post and comment tallies into a ranking. Users missing from one side
/// contribute zero from it; non-positive totals are dropped. Ties are broken
/// by ascending user id.
pub fn combine_karma(
    post_likes: Vec<LikeTally>,
    comment_likes: Vec<LikeTally>,
    limit: usize,
) -> Vec<KarmaEntry> {
    let mut totals: HashMap<i64, KarmaEntry> = HashMap::new();
    for (tallies, weight) in [
        (post_likes, POST_LIKE_KARMA),
        (comment_likes, COMMENT_LIKE_KARMA),
    ] {
        for tally in tallies {
            totals
                .entry(tally.user_id)
                .or_insert_with(|| KarmaEntry {
                    user_id: tally.user_id,
                    username: tally.username,
                    karma: 0,
                })
                .karma += weight * tally.likes;
        }
    }

    let mut ranked: Vec<KarmaEntry> = totals.into_values().filter(|e| e.karma > 0).collect();
    ranked.sort_by(|a, b| b.karma.cmp(&a.karma).then(a.user_id.cmp(&b.user_id)));
    ranked.truncate(limit);
    ranked
}

fn tally(conn: &Connection, sql: &str, window: &KarmaWindow) -> AppResult<Vec<LikeTally>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(
            params![timestamp(&window.start), timestamp(&window.end)],
            |row| {
                Ok(LikeTally {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    likes: row.get(2)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

const POST_TALLY: &str = "
    SELECT p.author_id, u.username, COUNT(*)
    FROM likes l
    JOIN posts p ON p.id = l.post_id
    JOIN users u ON u.id = p.author_id
    WHERE l.created_at >= ?1 AND l.created_at < ?2
    GROUP BY p.author_id, u.username";

const COMMENT_TALLY: &str = "
    SELECT c.author_id, u.username, COUNT(*)
    FROM likes l
    JOIN comments c ON c.id = l.comment_id
    JOIN users u ON u.id = c.author_id
    WHERE l.created_at >= ?1 AND l.created_at < ?2
    GROUP BY c.author_id, u.username";

/// Top `limit` users by karma earned inside `window`.
pub fn top_karma(conn: &Connection, window: &KarmaWindow, limit: usize) -> AppResult<Vec<KarmaEntry>> {
    let post_likes = tally(conn, POST_TALLY, window)?;
    let comment_likes = tally(conn, COMMENT_TALLY, window)?;
    Ok(combine_karma(post_likes, comment_likes, limit))
}

/// Karma of one user inside `window`.
pub fn user_karma(conn: &Connection, user_id: i64, window: &KarmaWindow) -> AppResult<i64> {
    let (start, end) = (timestamp(&window.start), timestamp(&window.end));
    let post_likes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM likes l JOIN posts p ON p.id = l.post_id
         WHERE p.author_id = ?1 AND l.created_at >= ?2 AND l.created_at < ?3",
        params![user_id, start, end],
        |row| row.get(0),
    )?;
    let comment_likes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM likes l JOIN comments c ON c.id = l.comment_id
         WHERE c.author_id = ?1 AND l.created_at >= ?2 AND l.created_at < ?3",
        params![user_id, start, end],
        |row| row.get(0),
    )?;
    Ok(POST_LIKE_KARMA * post_likes + COMMENT_LIKE_KARMA * comment_likes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tallied(user_id: i64, likes: i64) -> LikeTally {
        LikeTally {
            user_id,
            username: format!("user{user_id}"),
            likes,
        }
    }

    #[test]
    fn window_is_closed_open() {
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let window = KarmaWindow::trailing(now, 24);
        assert!(window.contains(now - Duration::hours(24)));
        assert!(window.contains(now - Duration::hours(1)));
        assert!(!window.contains(now));
        assert!(!window.contains(now - Duration::hours(25)));
    }

    #[test]
    fn post_likes_weigh_five_comment_likes_one() {
        let ranked = combine_karma(vec![tallied(1, 2)], vec![tallied(1, 3), tallied(2, 4)], 5);
        assert_eq!(
            ranked,
            vec![
                KarmaEntry {
                    user_id: 1,
                    username: "user1".into(),
                    karma: 13
                },
                KarmaEntry {
                    user_id: 2,
                    username: "user2".into(),
                    karma: 4
                },
            ]
        );
    }

    #[test]
    fn zero_karma_is_excluded() {
        let ranked = combine_karma(vec![tallied(1, 0)], vec![tallied(2, 0), tallied(3, 1)], 5);
        let ids: Vec<i64> = ranked.iter().map(|e| e.user_id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn ties_break_by_user_id_and_limit_applies() {
        let ranked = combine_karma(
            vec![tallied(9, 1), tallied(4, 1), tallied(7, 2)],
            vec![tallied(2, 5), tallied(8, 3)],
            3,
        );
        let ids: Vec<(i64, i64)> = ranked.iter().map(|e| (e.user_id, e.karma)).collect();
        assert_eq!(ids, vec![(7, 10), (2, 5), (4, 5)]);
    }

    #[test]
    fn empty_tallies_rank_nobody() {
        assert!(combine_karma(Vec::new(), Vec::new(), 5).is_empty());
    }
}
