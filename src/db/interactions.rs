//! Likes and comments
//!
//! One like per user per memory, enforced by the unique pair. Unliking
//! never creates state: an absent like stays absent. Comment reads join
//! the author's username for display.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Like row with the liker's username
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeRow {
    pub id: i64,
    pub memory_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub created_at: String,
}

/// Comment row with the author's username
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRow {
    pub id: i64,
    pub memory_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

const SELECT_LIKE: &str = "SELECT l.*, u.username AS user_name FROM memory_likes l \
     JOIN users u ON u.id = l.user_id";

const SELECT_COMMENT: &str = "SELECT c.*, u.username AS user_name FROM memory_comments c \
     JOIN users u ON u.id = c.user_id";

impl LikeRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            memory_id: row.get("memory_id")?,
            user_id: row.get("user_id")?,
            user_name: row.get("user_name")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl CommentRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            memory_id: row.get("memory_id")?,
            user_id: row.get("user_id")?,
            user_name: row.get("user_name")?,
            content: row.get("content")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

// -- Likes --

/// Like a memory. Returns the like row and whether it was newly created;
/// a repeat like is a no-op returning the existing row.
pub fn like(conn: &Connection, memory_id: i64, user_id: i64) -> Result<(LikeRow, bool), ApiError> {
    let changed = conn.execute(
        "INSERT INTO memory_likes (memory_id, user_id) VALUES (?, ?) \
         ON CONFLICT (memory_id, user_id) DO NOTHING",
        params![memory_id, user_id],
    )?;

    let sql = format!("{} WHERE l.memory_id = ? AND l.user_id = ?", SELECT_LIKE);
    let row = conn.query_row(&sql, params![memory_id, user_id], |row| {
        LikeRow::from_row(row)
    })?;
    Ok((row, changed == 1))
}

/// Remove a like. Returns true if one existed. Never inserts.
pub fn unlike(conn: &Connection, memory_id: i64, user_id: i64) -> Result<bool, ApiError> {
    let changes = conn.execute(
        "DELETE FROM memory_likes WHERE memory_id = ? AND user_id = ?",
        params![memory_id, user_id],
    )?;
    Ok(changes > 0)
}

pub fn is_liked(conn: &Connection, memory_id: i64, user_id: i64) -> Result<bool, ApiError> {
    let mut stmt =
        conn.prepare("SELECT 1 FROM memory_likes WHERE memory_id = ? AND user_id = ?")?;
    Ok(stmt.exists(params![memory_id, user_id])?)
}

pub fn list_likes(conn: &Connection, memory_id: i64) -> Result<Vec<LikeRow>, ApiError> {
    let sql = format!("{} WHERE l.memory_id = ? ORDER BY l.id", SELECT_LIKE);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![memory_id], |row| LikeRow::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn count_likes(conn: &Connection, memory_id: i64) -> Result<i64, ApiError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM memory_likes WHERE memory_id = ?",
        params![memory_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// -- Comments --

pub fn add_comment(
    conn: &Connection,
    memory_id: i64,
    user_id: i64,
    content: &str,
) -> Result<CommentRow, ApiError> {
    conn.execute(
        "INSERT INTO memory_comments (memory_id, user_id, content) VALUES (?, ?, ?)",
        params![memory_id, user_id, content],
    )?;
    let id = conn.last_insert_rowid();
    get_comment(conn, id)?
        .ok_or_else(|| ApiError::Internal("Comment not found after insert".to_string()))
}

pub fn get_comment(conn: &Connection, id: i64) -> Result<Option<CommentRow>, ApiError> {
    let sql = format!("{} WHERE c.id = ?", SELECT_COMMENT);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(CommentRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Comments on a memory, newest first
pub fn list_comments(conn: &Connection, memory_id: i64) -> Result<Vec<CommentRow>, ApiError> {
    let sql = format!(
        "{} WHERE c.memory_id = ? ORDER BY c.created_at DESC, c.id DESC",
        SELECT_COMMENT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![memory_id], |row| CommentRow::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn count_comments(conn: &Connection, memory_id: i64) -> Result<i64, ApiError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM memory_comments WHERE memory_id = ?",
        params![memory_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Replace a comment's text and touch its updated_at
pub fn update_comment(conn: &Connection, id: i64, content: &str) -> Result<CommentRow, ApiError> {
    let changes = conn.execute(
        "UPDATE memory_comments SET content = ?, updated_at = datetime('now') WHERE id = ?",
        params![content, id],
    )?;
    if changes == 0 {
        return Err(not_found());
    }
    get_comment(conn, id)?.ok_or_else(not_found)
}

fn not_found() -> ApiError {
    ApiError::NotFound("Comment not found".to_string())
}

pub fn delete_comment(conn: &Connection, id: i64) -> Result<bool, ApiError> {
    let changes = conn.execute("DELETE FROM memory_comments WHERE id = ?", params![id])?;
    Ok(changes > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{memories, users, MemoryDb};

    fn seed(conn: &Connection) -> (i64, i64) {
        let p = users::create_user(conn, "pat", "", "h", "patient", None)
            .unwrap()
            .id;
        let m = memories::create(
            conn,
            p,
            &memories::CreateMemoryInput {
                title: "m".to_string(),
                description: String::new(),
                date: None,
                location: String::new(),
                tag: String::new(),
                image_url: None,
            },
        )
        .unwrap()
        .id;
        (p, m)
    }

    #[test]
    fn test_like_is_idempotent() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let (p, m) = seed(conn);

            let (first, created) = like(conn, m, p)?;
            assert!(created);
            assert_eq!(first.user_name, "pat");

            let (second, created) = like(conn, m, p)?;
            assert!(!created);
            assert_eq!(first.id, second.id);

            assert_eq!(count_likes(conn, m)?, 1);
            assert!(is_liked(conn, m, p)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_unlike_never_creates() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let (p, m) = seed(conn);

            assert!(!unlike(conn, m, p)?);
            assert_eq!(count_likes(conn, m)?, 0);

            like(conn, m, p)?;
            assert!(unlike(conn, m, p)?);
            assert!(!unlike(conn, m, p)?);
            assert_eq!(count_likes(conn, m)?, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_comments_newest_first_with_author() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let (p, m) = seed(conn);
            let f = users::create_user(conn, "fam", "", "h", "family", None)?.id;

            add_comment(conn, m, p, "first")?;
            let last = add_comment(conn, m, f, "second")?;

            let listed = list_comments(conn, m)?;
            assert_eq!(listed.len(), 2);
            assert_eq!(listed[0].id, last.id);
            assert_eq!(listed[0].user_name, "fam");
            assert_eq!(count_comments(conn, m)?, 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_comment_update_touches_updated_at() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let (p, m) = seed(conn);
            let comment = add_comment(conn, m, p, "draft")?;

            // Backdate so the touch is observable
            conn.execute(
                "UPDATE memory_comments SET created_at = '2020-01-01 00:00:00', \
                 updated_at = '2020-01-01 00:00:00' WHERE id = ?",
                params![comment.id],
            )?;

            let updated = update_comment(conn, comment.id, "final")?;
            assert_eq!(updated.content, "final");
            assert_eq!(updated.created_at, "2020-01-01 00:00:00");
            assert_ne!(updated.updated_at, "2020-01-01 00:00:00");

            assert!(matches!(
                update_comment(conn, comment.id + 999, "x"),
                Err(ApiError::NotFound(_))
            ));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_comment_reports_removal() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let (p, m) = seed(conn);
            let comment = add_comment(conn, m, p, "gone soon")?;

            assert!(delete_comment(conn, comment.id)?);
            assert!(!delete_comment(conn, comment.id)?);
            Ok(())
        })
        .unwrap();
    }
}
