//! Patient-owned roster of family members
//!
//! Rows created by the connect flow carry `linked_user_id` and are kept in
//! lockstep with the corresponding family_links row. Manually-added rows
//! have a NULL `linked_user_id` and never participate in mirroring.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Roster entry from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterRow {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub relation: String,
    pub avatar_url: Option<String>,
    pub linked_user_id: Option<i64>,
    pub created_at: String,
}

impl RosterRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            name: row.get("name")?,
            relation: row.get("relation")?,
            avatar_url: row.get("avatar_url")?,
            linked_user_id: row.get("linked_user_id")?,
            created_at: row.get("created_at")?,
        })
    }

    /// Connect-flow rows mirror a ledger link; manual rows do not
    pub fn is_linked(&self) -> bool {
        self.linked_user_id.is_some()
    }
}

/// Add a manual roster entry (no linked user)
pub fn create(
    conn: &Connection,
    user_id: i64,
    name: &str,
    relation: &str,
    avatar_url: Option<&str>,
) -> Result<RosterRow, ApiError> {
    conn.execute(
        "INSERT INTO family_members (user_id, name, relation, avatar_url) VALUES (?, ?, ?, ?)",
        params![user_id, name, relation, avatar_url],
    )?;
    let id = conn.last_insert_rowid();
    get(conn, id)?.ok_or_else(|| ApiError::Internal("Roster row not found after insert".to_string()))
}

/// Get-or-create the mirror row for a connected family user. Keyed on
/// (user_id, linked_user_id); a name collision with an existing manual row
/// adopts that row by setting its `linked_user_id` instead of duplicating.
/// Returns the row and whether it was newly created.
pub fn get_or_create_linked(
    conn: &Connection,
    user_id: i64,
    linked_user_id: i64,
    name: &str,
    relation: &str,
) -> Result<(RosterRow, bool), ApiError> {
    if let Some(existing) = find_linked(conn, user_id, linked_user_id)? {
        return Ok((existing, false));
    }

    let result = conn.execute(
        "INSERT INTO family_members (user_id, name, relation, linked_user_id) VALUES (?, ?, ?, ?)",
        params![user_id, name, relation, linked_user_id],
    );
    match result {
        Ok(_) => {
            let id = conn.last_insert_rowid();
            let row = get(conn, id)?.ok_or_else(|| {
                ApiError::Internal("Roster row not found after insert".to_string())
            })?;
            Ok((row, true))
        }
        Err(e)
            if matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::ConstraintViolation)
            ) =>
        {
            // UNIQUE(user_id, name): a manual row already holds this name
            conn.execute(
                "UPDATE family_members SET linked_user_id = ? WHERE user_id = ? AND name = ?",
                params![linked_user_id, user_id, name],
            )?;
            let row = find_linked(conn, user_id, linked_user_id)?.ok_or_else(|| {
                ApiError::Internal("Roster row not found after link adoption".to_string())
            })?;
            Ok((row, false))
        }
        Err(e) => Err(e.into()),
    }
}

/// All roster entries for a patient, newest first
pub fn list_for_user(conn: &Connection, user_id: i64) -> Result<Vec<RosterRow>, ApiError> {
    let mut stmt =
        conn.prepare("SELECT * FROM family_members WHERE user_id = ? ORDER BY id DESC")?;
    let rows = stmt.query_map(params![user_id], |row| RosterRow::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Get a roster entry by id
pub fn get(conn: &Connection, id: i64) -> Result<Option<RosterRow>, ApiError> {
    let mut stmt = conn.prepare("SELECT * FROM family_members WHERE id = ?")?;
    let mut rows = stmt.query(params![id])?;

    match rows.next()? {
        Some(row) => Ok(Some(RosterRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Find the mirror row for a (patient, linked family user) pair
pub fn find_linked(
    conn: &Connection,
    user_id: i64,
    linked_user_id: i64,
) -> Result<Option<RosterRow>, ApiError> {
    let mut stmt =
        conn.prepare("SELECT * FROM family_members WHERE user_id = ? AND linked_user_id = ?")?;
    let mut rows = stmt.query(params![user_id, linked_user_id])?;

    match rows.next()? {
        Some(row) => Ok(Some(RosterRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Partial update; absent fields keep their current value
pub fn update(
    conn: &Connection,
    id: i64,
    name: Option<&str>,
    relation: Option<&str>,
    avatar_url: Option<&str>,
) -> Result<RosterRow, ApiError> {
    let current = get(conn, id)?.ok_or_else(not_found)?;

    let name = name.unwrap_or(&current.name);
    let relation = relation.unwrap_or(&current.relation);
    let avatar_url = avatar_url.or(current.avatar_url.as_deref());

    conn.execute(
        "UPDATE family_members SET name = ?, relation = ?, avatar_url = ? WHERE id = ?",
        params![name, relation, avatar_url, id],
    )?;
    get(conn, id)?.ok_or_else(not_found)
}

fn not_found() -> ApiError {
    ApiError::NotFound("Family member not found".to_string())
}

/// Delete a roster entry. Returns true if a row was removed.
pub fn delete(conn: &Connection, id: i64) -> Result<bool, ApiError> {
    let changes = conn.execute("DELETE FROM family_members WHERE id = ?", params![id])?;
    Ok(changes > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{users, MemoryDb};

    #[test]
    fn test_manual_create_and_list_newest_first() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let p = users::create_user(conn, "pat", "", "h", "patient", None)?.id;
            create(conn, p, "Mary", "Daughter", None)?;
            create(conn, p, "Tom", "Son", Some("https://img/tom.png"))?;

            let rows = list_for_user(conn, p)?;
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].name, "Tom");
            assert_eq!(rows[1].name, "Mary");
            assert!(!rows[0].is_linked());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_get_or_create_linked_is_idempotent() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let p = users::create_user(conn, "pat", "", "h", "patient", None)?.id;
            let f = users::create_user(conn, "fam", "", "h", "family", None)?.id;

            let (first, created) = get_or_create_linked(conn, p, f, "fam", "Family Member")?;
            assert!(created);
            let (second, created) = get_or_create_linked(conn, p, f, "fam", "Family Member")?;
            assert!(!created);
            assert_eq!(first.id, second.id);

            assert_eq!(list_for_user(conn, p)?.len(), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_name_collision_adopts_manual_row() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let p = users::create_user(conn, "pat", "", "h", "patient", None)?.id;
            let f = users::create_user(conn, "bob", "", "h", "family", None)?.id;

            let manual = create(conn, p, "bob", "Neighbor", None)?;
            let (linked, created) = get_or_create_linked(conn, p, f, "bob", "Family Member")?;

            assert!(!created);
            assert_eq!(linked.id, manual.id);
            assert_eq!(linked.linked_user_id, Some(f));
            assert_eq!(list_for_user(conn, p)?.len(), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_partial_update_keeps_absent_fields() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let p = users::create_user(conn, "pat", "", "h", "patient", None)?.id;
            let row = create(conn, p, "Mary", "Daughter", Some("https://img/a.png"))?;

            let updated = update(conn, row.id, None, Some("Eldest daughter"), None)?;
            assert_eq!(updated.name, "Mary");
            assert_eq!(updated.relation, "Eldest daughter");
            assert_eq!(updated.avatar_url.as_deref(), Some("https://img/a.png"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_reports_removal() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let p = users::create_user(conn, "pat", "", "h", "patient", None)?.id;
            let row = create(conn, p, "Mary", "", None)?;

            assert!(delete(conn, row.id)?);
            assert!(!delete(conn, row.id)?);
            Ok(())
        })
        .unwrap();
    }
}
