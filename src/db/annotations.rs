//! People and event tags attached to a memory
//!
//! Both are unique per memory (by name / tag_name). Bulk adds skip
//! duplicates rather than failing the whole batch, reporting what was
//! skipped so the caller can surface it.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

fn default_color() -> String {
    "#999999".to_string()
}

/// Tagged person row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonRow {
    pub id: i64,
    pub memory_id: i64,
    pub name: String,
    pub relation: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

/// Event tag row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRow {
    pub id: i64,
    pub memory_id: i64,
    pub tag_name: String,
    pub color: String,
    pub created_at: String,
}

/// One entry of a bulk people add
#[derive(Debug, Clone, Deserialize)]
pub struct PersonEntry {
    pub name: String,
    #[serde(default)]
    pub relation: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// One entry of a bulk tag add
#[derive(Debug, Clone, Deserialize)]
pub struct TagEntry {
    pub tag_name: String,
    #[serde(default = "default_color")]
    pub color: String,
}

impl PersonRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            memory_id: row.get("memory_id")?,
            name: row.get("name")?,
            relation: row.get("relation")?,
            avatar_url: row.get("avatar_url")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl TagRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            memory_id: row.get("memory_id")?,
            tag_name: row.get("tag_name")?,
            color: row.get("color")?,
            created_at: row.get("created_at")?,
        })
    }
}

// -- People --

/// Bulk add. Returns created rows and the names skipped as duplicates.
pub fn add_people(
    conn: &Connection,
    memory_id: i64,
    entries: &[PersonEntry],
) -> Result<(Vec<PersonRow>, Vec<String>), ApiError> {
    let mut created = Vec::new();
    let mut skipped = Vec::new();

    for entry in entries {
        let changed = conn.execute(
            "INSERT INTO memory_people (memory_id, name, relation, avatar_url) \
             VALUES (?, ?, ?, ?) ON CONFLICT (memory_id, name) DO NOTHING",
            params![memory_id, entry.name, entry.relation, entry.avatar_url],
        )?;
        if changed == 1 {
            let id = conn.last_insert_rowid();
            let row = get_person(conn, id)?.ok_or_else(|| {
                ApiError::Internal("Person not found after insert".to_string())
            })?;
            created.push(row);
        } else {
            skipped.push(entry.name.clone());
        }
    }
    Ok((created, skipped))
}

pub fn list_people(conn: &Connection, memory_id: i64) -> Result<Vec<PersonRow>, ApiError> {
    let mut stmt = conn.prepare("SELECT * FROM memory_people WHERE memory_id = ? ORDER BY id")?;
    let rows = stmt.query_map(params![memory_id], |row| PersonRow::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_person(conn: &Connection, id: i64) -> Result<Option<PersonRow>, ApiError> {
    let mut stmt = conn.prepare("SELECT * FROM memory_people WHERE id = ?")?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(PersonRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Partial update; absent fields keep their current value
pub fn update_person(
    conn: &Connection,
    id: i64,
    name: Option<&str>,
    relation: Option<&str>,
    avatar_url: Option<&str>,
) -> Result<PersonRow, ApiError> {
    let current = get_person(conn, id)?.ok_or_else(|| not_found("Person"))?;
    let name = name.unwrap_or(&current.name);
    let relation = relation.unwrap_or(&current.relation);
    let avatar_url = avatar_url.or(current.avatar_url.as_deref());

    conn.execute(
        "UPDATE memory_people SET name = ?, relation = ?, avatar_url = ? WHERE id = ?",
        params![name, relation, avatar_url, id],
    )?;
    get_person(conn, id)?.ok_or_else(|| not_found("Person"))
}

pub fn delete_person(conn: &Connection, id: i64) -> Result<bool, ApiError> {
    let changes = conn.execute("DELETE FROM memory_people WHERE id = ?", params![id])?;
    Ok(changes > 0)
}

// -- Tags --

/// Bulk add. Returns created rows and the tag names skipped as duplicates.
pub fn add_tags(
    conn: &Connection,
    memory_id: i64,
    entries: &[TagEntry],
) -> Result<(Vec<TagRow>, Vec<String>), ApiError> {
    let mut created = Vec::new();
    let mut skipped = Vec::new();

    for entry in entries {
        let changed = conn.execute(
            "INSERT INTO memory_tags (memory_id, tag_name, color) VALUES (?, ?, ?) \
             ON CONFLICT (memory_id, tag_name) DO NOTHING",
            params![memory_id, entry.tag_name, entry.color],
        )?;
        if changed == 1 {
            let id = conn.last_insert_rowid();
            let row = get_tag(conn, id)?
                .ok_or_else(|| ApiError::Internal("Tag not found after insert".to_string()))?;
            created.push(row);
        } else {
            skipped.push(entry.tag_name.clone());
        }
    }
    Ok((created, skipped))
}

pub fn list_tags(conn: &Connection, memory_id: i64) -> Result<Vec<TagRow>, ApiError> {
    let mut stmt = conn.prepare("SELECT * FROM memory_tags WHERE memory_id = ? ORDER BY id")?;
    let rows = stmt.query_map(params![memory_id], |row| TagRow::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_tag(conn: &Connection, id: i64) -> Result<Option<TagRow>, ApiError> {
    let mut stmt = conn.prepare("SELECT * FROM memory_tags WHERE id = ?")?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(TagRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Partial update; absent fields keep their current value
pub fn update_tag(
    conn: &Connection,
    id: i64,
    tag_name: Option<&str>,
    color: Option<&str>,
) -> Result<TagRow, ApiError> {
    let current = get_tag(conn, id)?.ok_or_else(|| not_found("Tag"))?;
    let tag_name = tag_name.unwrap_or(&current.tag_name);
    let color = color.unwrap_or(&current.color);

    conn.execute(
        "UPDATE memory_tags SET tag_name = ?, color = ? WHERE id = ?",
        params![tag_name, color, id],
    )?;
    get_tag(conn, id)?.ok_or_else(|| not_found("Tag"))
}

fn not_found(kind: &str) -> ApiError {
    ApiError::NotFound(format!("{kind} not found"))
}

pub fn delete_tag(conn: &Connection, id: i64) -> Result<bool, ApiError> {
    let changes = conn.execute("DELETE FROM memory_tags WHERE id = ?", params![id])?;
    Ok(changes > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{memories, users, MemoryDb};

    fn seed_memory(conn: &Connection) -> i64 {
        let p = users::create_user(conn, "pat", "", "h", "patient", None)
            .unwrap()
            .id;
        memories::create(
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
        .id
    }

    fn person(name: &str) -> PersonEntry {
        PersonEntry {
            name: name.to_string(),
            relation: String::new(),
            avatar_url: None,
        }
    }

    #[test]
    fn test_bulk_people_skips_duplicates() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let m = seed_memory(conn);
            let (created, skipped) =
                add_people(conn, m, &[person("Mary"), person("Tom"), person("Mary")])?;
            assert_eq!(created.len(), 2);
            assert_eq!(skipped, vec!["Mary".to_string()]);

            // Re-adding the same batch creates nothing
            let (created, skipped) = add_people(conn, m, &[person("Mary"), person("Tom")])?;
            assert!(created.is_empty());
            assert_eq!(skipped.len(), 2);
            assert_eq!(list_people(conn, m)?.len(), 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_tag_color_defaults_on_parse() {
        let entry: TagEntry = serde_json::from_str(r#"{"tag_name": "Birthday"}"#).unwrap();
        assert_eq!(entry.color, "#999999");
    }

    #[test]
    fn test_bulk_tags_and_item_ops() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let m = seed_memory(conn);
            let (created, skipped) = add_tags(
                conn,
                m,
                &[
                    TagEntry {
                        tag_name: "Birthday".to_string(),
                        color: "#ff0000".to_string(),
                    },
                    TagEntry {
                        tag_name: "Birthday".to_string(),
                        color: "#00ff00".to_string(),
                    },
                ],
            )?;
            assert_eq!(created.len(), 1);
            assert_eq!(skipped, vec!["Birthday".to_string()]);
            assert_eq!(created[0].color, "#ff0000");

            let updated = update_tag(conn, created[0].id, None, Some("#0000ff"))?;
            assert_eq!(updated.tag_name, "Birthday");
            assert_eq!(updated.color, "#0000ff");

            assert!(delete_tag(conn, created[0].id)?);
            assert!(list_tags(conn, m)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_person_update_keeps_absent_fields() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let m = seed_memory(conn);
            let (created, _) = add_people(
                conn,
                m,
                &[PersonEntry {
                    name: "Mary".to_string(),
                    relation: "Daughter".to_string(),
                    avatar_url: Some("https://img/m.png".to_string()),
                }],
            )?;

            let updated = update_person(conn, created[0].id, Some("Mary Ann"), None, None)?;
            assert_eq!(updated.name, "Mary Ann");
            assert_eq!(updated.relation, "Daughter");
            assert_eq!(updated.avatar_url.as_deref(), Some("https://img/m.png"));
            Ok(())
        })
        .unwrap();
    }
}
