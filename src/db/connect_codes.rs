//! Connect code issue/lookup/consume
//!
//! A patient holds at most one live code (UNIQUE patient_id). Codes are
//! human-typable `XXXX-XX` values, valid for a fixed window, and consumed
//! on successful redemption.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rand::Rng;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// SQLite datetime('now') format; sorts chronologically as TEXT
pub const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Connect code row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectCodeRow {
    pub id: i64,
    pub patient_id: i64,
    pub code: String,
    pub expires_at: String,
    pub created_at: String,
}

impl ConnectCodeRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            patient_id: row.get("patient_id")?,
            code: row.get("code")?,
            expires_at: row.get("expires_at")?,
            created_at: row.get("created_at")?,
        })
    }

    /// A code is valid iff the current time is before its expiry
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        code_is_valid(&self.expires_at, now)
    }
}

/// Generate a random human-readable code: four uppercase alphanumeric
/// characters, a dash, then two more (e.g. "AB12-CD").
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let mut pick = || CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char;

    let head: String = (0..4).map(|_| pick()).collect();
    let tail: String = (0..2).map(|_| pick()).collect();
    format!("{}-{}", head, tail)
}

/// Validity check against a stored expiry timestamp. Unparseable
/// timestamps count as expired.
pub fn code_is_valid(expires_at: &str, now: DateTime<Utc>) -> bool {
    match NaiveDateTime::parse_from_str(expires_at, DATETIME_FMT) {
        Ok(naive) => now < naive.and_utc(),
        Err(_) => false,
    }
}

/// Create or replace the patient's single live code. Always generates a
/// fresh value and resets the validity window.
pub fn issue(
    conn: &Connection,
    patient_id: i64,
    validity_minutes: i64,
) -> Result<ConnectCodeRow, ApiError> {
    let expires_at = (Utc::now() + Duration::minutes(validity_minutes))
        .format(DATETIME_FMT)
        .to_string();

    // The code column is globally unique; on the rare collision with
    // another patient's live code, draw again.
    for _ in 0..5 {
        let code = generate_code();
        let result = conn.execute(
            "INSERT INTO connect_codes (patient_id, code, expires_at) VALUES (?, ?, ?) \
             ON CONFLICT (patient_id) DO UPDATE SET code = ?, expires_at = ?",
            params![patient_id, code, expires_at, code, expires_at],
        );
        match result {
            Ok(_) => {
                return get_for_patient(conn, patient_id)?.ok_or_else(|| {
                    ApiError::Internal("Connect code not found after upsert".to_string())
                });
            }
            Err(e)
                if matches!(
                    e.sqlite_error_code(),
                    Some(rusqlite::ErrorCode::ConstraintViolation)
                ) =>
            {
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ApiError::Internal(
        "Could not generate a unique connect code".to_string(),
    ))
}

/// Get the patient's code row, if any (may be expired)
pub fn get_for_patient(conn: &Connection, patient_id: i64) -> Result<Option<ConnectCodeRow>, ApiError> {
    let mut stmt = conn.prepare("SELECT * FROM connect_codes WHERE patient_id = ?")?;
    let mut rows = stmt.query(params![patient_id])?;

    match rows.next()? {
        Some(row) => Ok(Some(ConnectCodeRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Look up a code by its value
pub fn find_by_code(conn: &Connection, code: &str) -> Result<Option<ConnectCodeRow>, ApiError> {
    let mut stmt = conn.prepare("SELECT * FROM connect_codes WHERE code = ?")?;
    let mut rows = stmt.query(params![code])?;

    match rows.next()? {
        Some(row) => Ok(Some(ConnectCodeRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Delete the patient's code. Returns true if a row was removed.
pub fn delete_for_patient(conn: &Connection, patient_id: i64) -> Result<bool, ApiError> {
    let changes = conn.execute(
        "DELETE FROM connect_codes WHERE patient_id = ?",
        params![patient_id],
    )?;
    Ok(changes > 0)
}

/// Consume a code by row id (single use). Returns true if a row was removed.
pub fn delete_by_id(conn: &Connection, id: i64) -> Result<bool, ApiError> {
    let changes = conn.execute("DELETE FROM connect_codes WHERE id = ?", params![id])?;
    Ok(changes > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{users, MemoryDb};

    #[test]
    fn test_generate_code_shape() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 7);
            let bytes = code.as_bytes();
            assert_eq!(bytes[4], b'-');
            for &b in bytes.iter().filter(|&&b| b != b'-') {
                assert!(b.is_ascii_uppercase() || b.is_ascii_digit());
            }
        }
    }

    #[test]
    fn test_code_validity_window() {
        let issued = Utc::now();
        let expires = (issued + Duration::minutes(30)).format(DATETIME_FMT).to_string();

        assert!(code_is_valid(&expires, issued + Duration::minutes(29)));
        assert!(!code_is_valid(&expires, issued + Duration::minutes(31)));
        assert!(!code_is_valid("garbage", issued));
    }

    #[test]
    fn test_issue_replaces_existing_code() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let p = users::create_user(conn, "pat", "", "h", "patient", None)?.id;

            let first = issue(conn, p, 30)?;
            let second = issue(conn, p, 30)?;
            assert_ne!(first.code, second.code);

            // Still exactly one row, holding the fresh code
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM connect_codes", [], |r| r.get(0))?;
            assert_eq!(count, 1);
            assert!(find_by_code(conn, &first.code)?.is_none());
            assert!(find_by_code(conn, &second.code)?.is_some());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_consumes_code() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let p = users::create_user(conn, "pat", "", "h", "patient", None)?.id;
            let code = issue(conn, p, 30)?;

            assert!(delete_by_id(conn, code.id)?);
            assert!(find_by_code(conn, &code.code)?.is_none());
            assert!(!delete_for_patient(conn, p)?);
            Ok(())
        })
        .unwrap();
    }
}
