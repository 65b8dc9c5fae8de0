//! Memory CRUD and timeline queries
//!
//! Memories belong to exactly one user (the patient). Row reads carry
//! sub-entity counts via correlated subselects so list and detail responses
//! never need follow-up queries.

use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Memory row with attachment counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRow {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub date: Option<String>,
    pub location: String,
    pub tag: String,
    pub image_url: Option<String>,
    pub created_at: String,
    pub images_count: i64,
    pub videos_count: i64,
    pub recordings_count: i64,
    pub likes_count: i64,
}

/// Minimal projection for timeline neighbors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySummary {
    pub id: i64,
    pub title: String,
    pub date: Option<String>,
}

/// Fields accepted when creating a memory
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMemoryInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Partial update; absent fields keep their current value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateMemoryInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub location: Option<String>,
    pub tag: Option<String>,
    pub image_url: Option<String>,
}

const SELECT_WITH_COUNTS: &str = "SELECT m.*, \
     (SELECT COUNT(*) FROM memory_images i WHERE i.memory_id = m.id) AS images_count, \
     (SELECT COUNT(*) FROM memory_videos v WHERE v.memory_id = m.id) AS videos_count, \
     (SELECT COUNT(*) FROM memory_voice_recordings r WHERE r.memory_id = m.id) AS recordings_count, \
     (SELECT COUNT(*) FROM memory_likes l WHERE l.memory_id = m.id) AS likes_count \
     FROM memories m";

impl MemoryRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            date: row.get("date")?,
            location: row.get("location")?,
            tag: row.get("tag")?,
            image_url: row.get("image_url")?,
            created_at: row.get("created_at")?,
            images_count: row.get("images_count")?,
            videos_count: row.get("videos_count")?,
            recordings_count: row.get("recordings_count")?,
            likes_count: row.get("likes_count")?,
        })
    }

    pub fn summary(&self) -> MemorySummary {
        MemorySummary {
            id: self.id,
            title: self.title.clone(),
            date: self.date.clone(),
        }
    }
}

/// Create a memory owned by `user_id`
pub fn create(
    conn: &Connection,
    user_id: i64,
    input: &CreateMemoryInput,
) -> Result<MemoryRow, ApiError> {
    conn.execute(
        "INSERT INTO memories (user_id, title, description, date, location, tag, image_url) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            user_id,
            input.title,
            input.description,
            input.date,
            input.location,
            input.tag,
            input.image_url
        ],
    )?;
    let id = conn.last_insert_rowid();
    get(conn, id)?.ok_or_else(|| ApiError::Internal("Memory not found after insert".to_string()))
}

/// Get a memory by id
pub fn get(conn: &Connection, id: i64) -> Result<Option<MemoryRow>, ApiError> {
    let sql = format!("{} WHERE m.id = ?", SELECT_WITH_COUNTS);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![id])?;

    match rows.next()? {
        Some(row) => Ok(Some(MemoryRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Timeline across one or more owners, newest first. Ties on created_at
/// break by id so same-second inserts still order deterministically.
pub fn list_for_owners(conn: &Connection, owner_ids: &[i64]) -> Result<Vec<MemoryRow>, ApiError> {
    if owner_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; owner_ids.len()].join(",");
    let sql = format!(
        "{} WHERE m.user_id IN ({}) ORDER BY m.created_at DESC, m.id DESC",
        SELECT_WITH_COUNTS, placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(owner_ids.iter()), |row| {
        MemoryRow::from_row(row)
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Timeline across one or more owners as summaries, newest first. Used
/// for neighbor navigation, which positions a memory within the whole
/// collection its viewer can see.
pub fn list_summaries_for_owners(
    conn: &Connection,
    owner_ids: &[i64],
) -> Result<Vec<MemorySummary>, ApiError> {
    if owner_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; owner_ids.len()].join(",");
    let sql = format!(
        "SELECT id, title, date FROM memories WHERE user_id IN ({}) \
         ORDER BY created_at DESC, id DESC",
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(owner_ids.iter()), |row| {
        Ok(MemorySummary {
            id: row.get("id")?,
            title: row.get("title")?,
            date: row.get("date")?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Partial update; absent fields keep their current value
pub fn update(
    conn: &Connection,
    id: i64,
    input: &UpdateMemoryInput,
) -> Result<MemoryRow, ApiError> {
    let current = get(conn, id)?.ok_or_else(not_found)?;

    let title = input.title.as_deref().unwrap_or(&current.title);
    let description = input
        .description
        .as_deref()
        .unwrap_or(&current.description);
    let date = input.date.as_deref().or(current.date.as_deref());
    let location = input.location.as_deref().unwrap_or(&current.location);
    let tag = input.tag.as_deref().unwrap_or(&current.tag);
    let image_url = input.image_url.as_deref().or(current.image_url.as_deref());

    conn.execute(
        "UPDATE memories SET title = ?, description = ?, date = ?, location = ?, tag = ?, \
         image_url = ? WHERE id = ?",
        params![title, description, date, location, tag, image_url, id],
    )?;
    get(conn, id)?.ok_or_else(not_found)
}

fn not_found() -> ApiError {
    ApiError::NotFound("Memory not found".to_string())
}

/// Delete a memory (sub-entities cascade). Returns true if a row was removed.
pub fn delete(conn: &Connection, id: i64) -> Result<bool, ApiError> {
    let changes = conn.execute("DELETE FROM memories WHERE id = ?", params![id])?;
    Ok(changes > 0)
}
