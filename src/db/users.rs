//! User account CRUD operations

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// User row from database. The password hash never leaves this module's
/// callers; response types strip it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub full_name: Option<String>,
    pub created_at: String,
}

impl UserRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            email: row.get("email")?,
            password_hash: row.get("password_hash")?,
            role: row.get("role")?,
            full_name: row.get("full_name")?,
            created_at: row.get("created_at")?,
        })
    }

    pub fn is_patient(&self) -> bool {
        self.role == "patient"
    }

    pub fn is_family(&self) -> bool {
        self.role == "family"
    }
}

/// Create a user, returning the stored row.
pub fn create_user(
    conn: &Connection,
    username: &str,
    email: &str,
    password_hash: &str,
    role: &str,
    full_name: Option<&str>,
) -> Result<UserRow, ApiError> {
    conn.execute(
        "INSERT INTO users (username, email, password_hash, role, full_name) \
         VALUES (?, ?, ?, ?, ?)",
        params![username, email, password_hash, role, full_name],
    )?;

    let id = conn.last_insert_rowid();
    get_user(conn, id)?.ok_or_else(|| ApiError::Internal("User not found after insert".to_string()))
}

/// Get user by id
pub fn get_user(conn: &Connection, id: i64) -> Result<Option<UserRow>, ApiError> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE id = ?")?;
    let mut rows = stmt.query(params![id])?;

    match rows.next()? {
        Some(row) => Ok(Some(UserRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Get user by exact username
pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>, ApiError> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE username = ?")?;
    let mut rows = stmt.query(params![username])?;

    match rows.next()? {
        Some(row) => Ok(Some(UserRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Get user by email, case-insensitive (login accepts email or username)
pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>, ApiError> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE email = ? COLLATE NOCASE")?;
    let mut rows = stmt.query(params![email])?;

    match rows.next()? {
        Some(row) => Ok(Some(UserRow::from_row(row)?)),
        None => Ok(None),
    }
}
