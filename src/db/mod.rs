//! SQLite database module for keepsake
//!
//! All durable state lives here: users, the patient↔family relationship
//! ledger, connect codes, the patient-facing roster, and memories with
//! their attached media, annotations, and interactions.
//!
//! ## Tables
//!
//! - `users` - accounts with a patient/family role
//! - `family_links` - relationship ledger (unique patient+family pair)
//! - `connect_codes` - one live short-lived code per patient
//! - `family_members` - patient-owned roster, mirrored from the ledger
//! - `memories` - patient-owned memory records
//! - `memory_images` / `memory_videos` / `memory_voice_recordings` - ordered media
//! - `memory_people` / `memory_tags` - unordered annotation sets
//! - `memory_likes` / `memory_comments` - interactions

pub mod schema;
pub mod users;
pub mod family_links;
pub mod connect_codes;
pub mod roster;
pub mod memories;
pub mod media;
pub mod annotations;
pub mod interactions;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::ApiError;

/// SQLite database for all keepsake state
pub struct MemoryDb {
    conn: Mutex<Connection>,
}

impl MemoryDb {
    /// Open or create the database
    pub fn open(data_dir: &Path) -> Result<Self, ApiError> {
        let db_path = data_dir.join("keepsake.db");
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(&db_path)
            .map_err(|e| ApiError::Internal(format!("Failed to open SQLite: {}", e)))?;

        // WAL for concurrent reads; FKs drive the cascade-delete rules
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )
        .map_err(|e| ApiError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, ApiError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| ApiError::Internal(format!("Failed to open in-memory SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| ApiError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), ApiError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ApiError::Internal(format!("Lock poisoned: {}", e)))?;

        schema::init_schema(&conn)?;

        Ok(())
    }

    /// Run a read operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Connection) -> Result<T, ApiError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ApiError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access (for transactions)
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut Connection) -> Result<T, ApiError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| ApiError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, ApiError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64, ApiError> {
                let n: i64 = conn
                    .query_row(sql, [], |row| row.get(0))
                    .map_err(|e| ApiError::Internal(format!("Query failed: {}", e)))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                user_count: count("SELECT COUNT(*) FROM users")?,
                link_count: count("SELECT COUNT(*) FROM family_links")?,
                memory_count: count("SELECT COUNT(*) FROM memories")?,
                media_count: count(
                    "SELECT (SELECT COUNT(*) FROM memory_images) \
                     + (SELECT COUNT(*) FROM memory_videos) \
                     + (SELECT COUNT(*) FROM memory_voice_recordings)",
                )?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub user_count: u64,
    pub link_count: u64,
    pub memory_count: u64,
    pub media_count: u64,
}

/// True when the error is a UNIQUE/PRIMARY KEY constraint violation.
/// The unique constraints are the concurrency-safety mechanism for
/// create-if-not-exists, so callers collapse or reject these races.
pub fn is_unique_violation(err: &ApiError) -> bool {
    match err {
        ApiError::Database(e) => matches!(
            e.sqlite_error_code(),
            Some(rusqlite::ErrorCode::ConstraintViolation)
        ),
        _ => false,
    }
}

// Re-exports
pub use annotations::{PersonEntry, PersonRow, TagEntry, TagRow};
pub use connect_codes::ConnectCodeRow;
pub use family_links::FamilyLinkRow;
pub use interactions::{CommentRow, LikeRow};
pub use media::{ImageRow, NewImage, NewRecording, NewVideo, RecordingRow, VideoRow};
pub use memories::{CreateMemoryInput, MemoryRow, MemorySummary, UpdateMemoryInput};
pub use roster::RosterRow;
pub use users::UserRow;
