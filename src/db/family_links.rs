//! Relationship ledger CRUD operations
//!
//! A family_links row is the authoritative patient↔family approval state.
//! The UNIQUE (patient_id, family_member_id) pair means concurrent
//! establish calls collapse to one row.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub const STATUS_PENDING: &str = "PENDING";
pub const STATUS_APPROVED: &str = "APPROVED";
pub const STATUS_REVOKED: &str = "REVOKED";

/// Ledger row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyLinkRow {
    pub id: i64,
    pub patient_id: i64,
    pub family_member_id: i64,
    pub relation: String,
    pub status: String,
    pub created_at: String,
}

impl FamilyLinkRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            patient_id: row.get("patient_id")?,
            family_member_id: row.get("family_member_id")?,
            relation: row.get("relation")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Idempotently establish an APPROVED link for the pair.
///
/// Creates the link if absent; transitions an existing non-APPROVED link to
/// APPROVED; leaves an APPROVED link untouched. Returns the row and whether
/// it was newly created. The upsert rides on the unique pair constraint, so
/// a concurrent duplicate attempt collapses to the surviving row.
pub fn establish(
    conn: &Connection,
    patient_id: i64,
    family_member_id: i64,
    relation: &str,
) -> Result<(FamilyLinkRow, bool), ApiError> {
    let existing = get_between(conn, patient_id, family_member_id)?;
    let created = existing.is_none();

    conn.execute(
        "INSERT INTO family_links (patient_id, family_member_id, relation, status) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT (patient_id, family_member_id) DO UPDATE SET status = ?",
        params![
            patient_id,
            family_member_id,
            relation,
            STATUS_APPROVED,
            STATUS_APPROVED
        ],
    )?;

    let row = get_between(conn, patient_id, family_member_id)?
        .ok_or_else(|| ApiError::Internal("Link not found after upsert".to_string()))?;

    Ok((row, created))
}

/// Get the link between a patient and a family member, any status
pub fn get_between(
    conn: &Connection,
    patient_id: i64,
    family_member_id: i64,
) -> Result<Option<FamilyLinkRow>, ApiError> {
    let mut stmt = conn
        .prepare("SELECT * FROM family_links WHERE patient_id = ? AND family_member_id = ?")?;
    let mut rows = stmt.query(params![patient_id, family_member_id])?;

    match rows.next()? {
        Some(row) => Ok(Some(FamilyLinkRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// The single predicate every cross-user read/write check calls
pub fn is_approved(
    conn: &Connection,
    family_member_id: i64,
    patient_id: i64,
) -> Result<bool, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT 1 FROM family_links \
         WHERE family_member_id = ? AND patient_id = ? AND status = ?",
    )?;
    let exists = stmt.exists(params![family_member_id, patient_id, STATUS_APPROVED])?;
    Ok(exists)
}

/// All patients with an APPROVED link to this family member.
/// Scopes every family-role list/query.
pub fn approved_patient_ids(conn: &Connection, family_member_id: i64) -> Result<Vec<i64>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT patient_id FROM family_links WHERE family_member_id = ? AND status = ?",
    )?;
    let ids: Vec<i64> = stmt
        .query_map(params![family_member_id, STATUS_APPROVED], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// APPROVED links for a family member, newest first (the my-patients view)
pub fn list_approved_for_family(
    conn: &Connection,
    family_member_id: i64,
) -> Result<Vec<FamilyLinkRow>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM family_links \
         WHERE family_member_id = ? AND status = ? ORDER BY id DESC",
    )?;
    let links: Vec<FamilyLinkRow> = stmt
        .query_map(params![family_member_id, STATUS_APPROVED], |row| {
            FamilyLinkRow::from_row(row)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(links)
}

/// Delete the link between a pair. Returns true if a row was removed.
/// Callers that mirror the roster run this inside their own transaction.
pub fn delete_between(
    conn: &Connection,
    patient_id: i64,
    family_member_id: i64,
) -> Result<bool, ApiError> {
    let changes = conn.execute(
        "DELETE FROM family_links WHERE patient_id = ? AND family_member_id = ?",
        params![patient_id, family_member_id],
    )?;
    Ok(changes > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{users, MemoryDb};

    fn seed_pair(conn: &Connection) -> (i64, i64) {
        let p = users::create_user(conn, "pat", "", "h", "patient", None).unwrap();
        let f = users::create_user(conn, "fam", "", "h", "family", None).unwrap();
        (p.id, f.id)
    }

    #[test]
    fn test_establish_is_idempotent() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let (p, f) = seed_pair(conn);

            let (link, created) = establish(conn, p, f, "daughter")?;
            assert!(created);
            assert_eq!(link.status, STATUS_APPROVED);

            let (link2, created2) = establish(conn, p, f, "daughter")?;
            assert!(!created2);
            assert_eq!(link2.id, link.id);

            // Still exactly one row for the pair
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM family_links WHERE patient_id = ? AND family_member_id = ?",
                params![p, f],
                |r| r.get(0),
            )?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_establish_transitions_revoked_to_approved() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let (p, f) = seed_pair(conn);
            establish(conn, p, f, "")?;
            conn.execute(
                "UPDATE family_links SET status = ? WHERE patient_id = ?",
                params![STATUS_REVOKED, p],
            )?;
            assert!(!is_approved(conn, f, p)?);

            let (link, created) = establish(conn, p, f, "")?;
            assert!(!created);
            assert_eq!(link.status, STATUS_APPROVED);
            assert!(is_approved(conn, f, p)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_approved_patient_ids_scopes_by_status() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let (p1, f) = seed_pair(conn);
            let p2 = users::create_user(conn, "pat2", "", "h", "patient", None)?.id;
            establish(conn, p1, f, "")?;
            establish(conn, p2, f, "")?;
            conn.execute(
                "UPDATE family_links SET status = ? WHERE patient_id = ?",
                params![STATUS_PENDING, p2],
            )?;

            let ids = approved_patient_ids(conn, f)?;
            assert_eq!(ids, vec![p1]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_between() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let (p, f) = seed_pair(conn);
            establish(conn, p, f, "")?;
            assert!(delete_between(conn, p, f)?);
            assert!(!delete_between(conn, p, f)?);
            assert!(get_between(conn, p, f)?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
