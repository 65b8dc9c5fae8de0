//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::ApiError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), ApiError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!(
            "Migrating schema from v{} to v{}",
            current_version, SCHEMA_VERSION
        );
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, ApiError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| ApiError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    Ok(version)
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), ApiError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| ApiError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| ApiError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &Connection) -> Result<(), ApiError> {
    conn.execute_batch(USERS_SCHEMA)
        .map_err(|e| ApiError::Internal(format!("Failed to create user tables: {}", e)))?;

    conn.execute_batch(FAMILY_SCHEMA)
        .map_err(|e| ApiError::Internal(format!("Failed to create family tables: {}", e)))?;

    conn.execute_batch(MEMORY_SCHEMA)
        .map_err(|e| ApiError::Internal(format!("Failed to create memory tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| ApiError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), ApiError> {
    // Add migration steps here as schema evolves
    match from_version {
        _ => {}
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Accounts
const USERS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL DEFAULT '',
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'patient' CHECK (role IN ('patient', 'family')),
    full_name TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Relationship ledger, connect codes, and the patient-facing roster
const FAMILY_SCHEMA: &str = r#"
-- Relationship ledger: the gate for every cross-user data access.
-- The UNIQUE pair is the source of truth under concurrent creation.
CREATE TABLE IF NOT EXISTS family_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id INTEGER NOT NULL,
    family_member_id INTEGER NOT NULL,
    relation TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'APPROVED' CHECK (status IN ('PENDING', 'APPROVED', 'REVOKED')),
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (patient_id, family_member_id),
    FOREIGN KEY (patient_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (family_member_id) REFERENCES users(id) ON DELETE CASCADE
);

-- At most one live code per patient; single use, replaced in place on re-issue
CREATE TABLE IF NOT EXISTS connect_codes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id INTEGER NOT NULL UNIQUE,
    code TEXT NOT NULL UNIQUE,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (patient_id) REFERENCES users(id) ON DELETE CASCADE
);

-- Patient-owned roster. linked_user_id is set only by the connect flow;
-- rows with NULL are manual entries and exempt from ledger mirroring.
CREATE TABLE IF NOT EXISTS family_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    relation TEXT NOT NULL DEFAULT '',
    avatar_url TEXT,
    linked_user_id INTEGER,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (user_id, name),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (linked_user_id) REFERENCES users(id) ON DELETE SET NULL
);
"#;

/// Memories and their sub-entities. Every sub-entity is exclusively owned
/// by its memory and cascades on delete.
const MEMORY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    date TEXT,
    location TEXT NOT NULL DEFAULT '',
    tag TEXT NOT NULL DEFAULT '',
    image_url TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS memory_images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id INTEGER NOT NULL,
    image_url TEXT NOT NULL,
    caption TEXT NOT NULL DEFAULT '',
    position INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS memory_videos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id INTEGER NOT NULL,
    video_url TEXT NOT NULL,
    thumbnail_url TEXT,
    caption TEXT NOT NULL DEFAULT '',
    duration TEXT,
    file_size INTEGER,
    position INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS memory_voice_recordings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id INTEGER NOT NULL,
    audio_url TEXT NOT NULL,
    speaker_name TEXT NOT NULL DEFAULT 'Unknown Speaker',
    speaker_relation TEXT NOT NULL DEFAULT '',
    duration TEXT,
    file_size INTEGER,
    transcript TEXT NOT NULL DEFAULT '',
    position INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS memory_people (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    relation TEXT NOT NULL DEFAULT '',
    avatar_url TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (memory_id, name),
    FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS memory_tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id INTEGER NOT NULL,
    tag_name TEXT NOT NULL,
    color TEXT NOT NULL DEFAULT '#999999',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (memory_id, tag_name),
    FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE
);

-- One like per user per memory
CREATE TABLE IF NOT EXISTS memory_likes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (memory_id, user_id),
    FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS memory_comments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
-- Ledger lookups: is_approved and patients_of
CREATE INDEX IF NOT EXISTS idx_links_family_member ON family_links(family_member_id, status);
CREATE INDEX IF NOT EXISTS idx_links_patient ON family_links(patient_id);

-- Code redemption looks up by code value
CREATE INDEX IF NOT EXISTS idx_codes_code ON connect_codes(code);

-- Roster browsing and mirror lookups
CREATE INDEX IF NOT EXISTS idx_roster_user ON family_members(user_id);
CREATE INDEX IF NOT EXISTS idx_roster_linked_user ON family_members(linked_user_id);

-- Memory scoping and ordering
CREATE INDEX IF NOT EXISTS idx_memories_user ON memories(user_id);
CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at);

-- Sub-entity lookups by owning memory
CREATE INDEX IF NOT EXISTS idx_images_memory ON memory_images(memory_id, position);
CREATE INDEX IF NOT EXISTS idx_videos_memory ON memory_videos(memory_id, position);
CREATE INDEX IF NOT EXISTS idx_recordings_memory ON memory_voice_recordings(memory_id, position);
CREATE INDEX IF NOT EXISTS idx_people_memory ON memory_people(memory_id);
CREATE INDEX IF NOT EXISTS idx_tags_memory ON memory_tags(memory_id);
CREATE INDEX IF NOT EXISTS idx_likes_memory ON memory_likes(memory_id);
CREATE INDEX IF NOT EXISTS idx_comments_memory ON memory_comments(memory_id, created_at);
"#;
