//! Attached media: images, videos, voice recordings
//!
//! Every attachment belongs to one memory and carries an explicit
//! `position`. Inserts without a position append at the end of that
//! memory's sequence; listings sort by position.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

fn default_speaker() -> String {
    "Unknown Speaker".to_string()
}

/// Image attachment row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRow {
    pub id: i64,
    pub memory_id: i64,
    pub image_url: String,
    pub caption: String,
    pub position: i64,
    pub created_at: String,
}

/// Video attachment row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRow {
    pub id: i64,
    pub memory_id: i64,
    pub video_url: String,
    pub thumbnail_url: Option<String>,
    pub caption: String,
    pub duration: Option<String>,
    pub file_size: Option<i64>,
    pub position: i64,
    pub created_at: String,
}

/// Voice recording attachment row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingRow {
    pub id: i64,
    pub memory_id: i64,
    pub audio_url: String,
    pub speaker_name: String,
    pub speaker_relation: String,
    pub duration: Option<String>,
    pub file_size: Option<i64>,
    pub transcript: String,
    pub position: i64,
    pub created_at: String,
}

/// Fields accepted when attaching an image
#[derive(Debug, Clone, Deserialize)]
pub struct NewImage {
    #[serde(alias = "url")]
    pub image_url: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub position: Option<i64>,
}

/// Fields accepted when attaching a video
#[derive(Debug, Clone, Deserialize)]
pub struct NewVideo {
    #[serde(alias = "url")]
    pub video_url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
    #[serde(default)]
    pub position: Option<i64>,
}

/// Fields accepted when attaching a voice recording
#[derive(Debug, Clone, Deserialize)]
pub struct NewRecording {
    #[serde(alias = "url")]
    pub audio_url: String,
    #[serde(default = "default_speaker")]
    pub speaker_name: String,
    #[serde(default)]
    pub speaker_relation: String,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub position: Option<i64>,
}

/// Partial image update; absent fields keep their current value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateImage {
    pub caption: Option<String>,
    pub position: Option<i64>,
}

/// Partial video update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateVideo {
    pub caption: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration: Option<String>,
    pub position: Option<i64>,
}

/// Partial recording update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRecording {
    pub speaker_name: Option<String>,
    pub speaker_relation: Option<String>,
    pub transcript: Option<String>,
    pub duration: Option<String>,
    pub position: Option<i64>,
}

impl ImageRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            memory_id: row.get("memory_id")?,
            image_url: row.get("image_url")?,
            caption: row.get("caption")?,
            position: row.get("position")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl VideoRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            memory_id: row.get("memory_id")?,
            video_url: row.get("video_url")?,
            thumbnail_url: row.get("thumbnail_url")?,
            caption: row.get("caption")?,
            duration: row.get("duration")?,
            file_size: row.get("file_size")?,
            position: row.get("position")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl RecordingRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            memory_id: row.get("memory_id")?,
            audio_url: row.get("audio_url")?,
            speaker_name: row.get("speaker_name")?,
            speaker_relation: row.get("speaker_relation")?,
            duration: row.get("duration")?,
            file_size: row.get("file_size")?,
            transcript: row.get("transcript")?,
            position: row.get("position")?,
            created_at: row.get("created_at")?,
        })
    }
}

// -- Images --

pub fn add_image(conn: &Connection, memory_id: i64, new: &NewImage) -> Result<ImageRow, ApiError> {
    conn.execute(
        "INSERT INTO memory_images (memory_id, image_url, caption, position) VALUES (?, ?, ?, \
         COALESCE(?, (SELECT COALESCE(MAX(position) + 1, 0) FROM memory_images WHERE memory_id = ?)))",
        params![memory_id, new.image_url, new.caption, new.position, memory_id],
    )?;
    let id = conn.last_insert_rowid();
    get_image(conn, id)?
        .ok_or_else(|| ApiError::Internal("Image not found after insert".to_string()))
}

pub fn list_images(conn: &Connection, memory_id: i64) -> Result<Vec<ImageRow>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM memory_images WHERE memory_id = ? ORDER BY position, created_at, id",
    )?;
    let rows = stmt.query_map(params![memory_id], |row| ImageRow::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_image(conn: &Connection, id: i64) -> Result<Option<ImageRow>, ApiError> {
    let mut stmt = conn.prepare("SELECT * FROM memory_images WHERE id = ?")?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(ImageRow::from_row(row)?)),
        None => Ok(None),
    }
}

pub fn update_image(conn: &Connection, id: i64, update: &UpdateImage) -> Result<ImageRow, ApiError> {
    let current = get_image(conn, id)?.ok_or_else(|| not_found("Image"))?;
    let caption = update.caption.as_deref().unwrap_or(&current.caption);
    let position = update.position.unwrap_or(current.position);

    conn.execute(
        "UPDATE memory_images SET caption = ?, position = ? WHERE id = ?",
        params![caption, position, id],
    )?;
    get_image(conn, id)?.ok_or_else(|| not_found("Image"))
}

pub fn delete_image(conn: &Connection, id: i64) -> Result<bool, ApiError> {
    let changes = conn.execute("DELETE FROM memory_images WHERE id = ?", params![id])?;
    Ok(changes > 0)
}

// -- Videos --

pub fn add_video(conn: &Connection, memory_id: i64, new: &NewVideo) -> Result<VideoRow, ApiError> {
    conn.execute(
        "INSERT INTO memory_videos (memory_id, video_url, thumbnail_url, caption, duration, \
         file_size, position) VALUES (?, ?, ?, ?, ?, ?, \
         COALESCE(?, (SELECT COALESCE(MAX(position) + 1, 0) FROM memory_videos WHERE memory_id = ?)))",
        params![
            memory_id,
            new.video_url,
            new.thumbnail_url,
            new.caption,
            new.duration,
            new.file_size,
            new.position,
            memory_id
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_video(conn, id)?
        .ok_or_else(|| ApiError::Internal("Video not found after insert".to_string()))
}

pub fn list_videos(conn: &Connection, memory_id: i64) -> Result<Vec<VideoRow>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM memory_videos WHERE memory_id = ? ORDER BY position, created_at, id",
    )?;
    let rows = stmt.query_map(params![memory_id], |row| VideoRow::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_video(conn: &Connection, id: i64) -> Result<Option<VideoRow>, ApiError> {
    let mut stmt = conn.prepare("SELECT * FROM memory_videos WHERE id = ?")?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(VideoRow::from_row(row)?)),
        None => Ok(None),
    }
}

pub fn update_video(conn: &Connection, id: i64, update: &UpdateVideo) -> Result<VideoRow, ApiError> {
    let current = get_video(conn, id)?.ok_or_else(|| not_found("Video"))?;
    let caption = update.caption.as_deref().unwrap_or(&current.caption);
    let thumbnail = update
        .thumbnail_url
        .as_deref()
        .or(current.thumbnail_url.as_deref());
    let duration = update.duration.as_deref().or(current.duration.as_deref());
    let position = update.position.unwrap_or(current.position);

    conn.execute(
        "UPDATE memory_videos SET caption = ?, thumbnail_url = ?, duration = ?, position = ? \
         WHERE id = ?",
        params![caption, thumbnail, duration, position, id],
    )?;
    get_video(conn, id)?.ok_or_else(|| not_found("Video"))
}

pub fn delete_video(conn: &Connection, id: i64) -> Result<bool, ApiError> {
    let changes = conn.execute("DELETE FROM memory_videos WHERE id = ?", params![id])?;
    Ok(changes > 0)
}

// -- Voice recordings --

pub fn add_recording(
    conn: &Connection,
    memory_id: i64,
    new: &NewRecording,
) -> Result<RecordingRow, ApiError> {
    conn.execute(
        "INSERT INTO memory_voice_recordings (memory_id, audio_url, speaker_name, \
         speaker_relation, duration, file_size, transcript, position) VALUES (?, ?, ?, ?, ?, ?, ?, \
         COALESCE(?, (SELECT COALESCE(MAX(position) + 1, 0) FROM memory_voice_recordings \
         WHERE memory_id = ?)))",
        params![
            memory_id,
            new.audio_url,
            new.speaker_name,
            new.speaker_relation,
            new.duration,
            new.file_size,
            new.transcript,
            new.position,
            memory_id
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_recording(conn, id)?
        .ok_or_else(|| ApiError::Internal("Recording not found after insert".to_string()))
}

pub fn list_recordings(conn: &Connection, memory_id: i64) -> Result<Vec<RecordingRow>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM memory_voice_recordings WHERE memory_id = ? \
         ORDER BY position, created_at, id",
    )?;
    let rows = stmt.query_map(params![memory_id], |row| RecordingRow::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_recording(conn: &Connection, id: i64) -> Result<Option<RecordingRow>, ApiError> {
    let mut stmt = conn.prepare("SELECT * FROM memory_voice_recordings WHERE id = ?")?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(RecordingRow::from_row(row)?)),
        None => Ok(None),
    }
}

pub fn update_recording(
    conn: &Connection,
    id: i64,
    update: &UpdateRecording,
) -> Result<RecordingRow, ApiError> {
    let current = get_recording(conn, id)?.ok_or_else(|| not_found("Recording"))?;
    let speaker_name = update
        .speaker_name
        .as_deref()
        .unwrap_or(&current.speaker_name);
    let speaker_relation = update
        .speaker_relation
        .as_deref()
        .unwrap_or(&current.speaker_relation);
    let transcript = update.transcript.as_deref().unwrap_or(&current.transcript);
    let duration = update.duration.as_deref().or(current.duration.as_deref());
    let position = update.position.unwrap_or(current.position);

    conn.execute(
        "UPDATE memory_voice_recordings SET speaker_name = ?, speaker_relation = ?, \
         transcript = ?, duration = ?, position = ? WHERE id = ?",
        params![speaker_name, speaker_relation, transcript, duration, position, id],
    )?;
    get_recording(conn, id)?.ok_or_else(|| not_found("Recording"))
}

fn not_found(kind: &str) -> ApiError {
    ApiError::NotFound(format!("{kind} not found"))
}

pub fn delete_recording(conn: &Connection, id: i64) -> Result<bool, ApiError> {
    let changes = conn.execute(
        "DELETE FROM memory_voice_recordings WHERE id = ?",
        params![id],
    )?;
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

    fn image(url: &str, position: Option<i64>) -> NewImage {
        NewImage {
            image_url: url.to_string(),
            caption: String::new(),
            position,
        }
    }

    #[test]
    fn test_images_append_at_end() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let m = seed_memory(conn);
            let a = add_image(conn, m, &image("https://img/a.jpg", None))?;
            let b = add_image(conn, m, &image("https://img/b.jpg", None))?;
            let c = add_image(conn, m, &image("https://img/c.jpg", None))?;

            assert_eq!((a.position, b.position, c.position), (0, 1, 2));
            let listed = list_images(conn, m)?;
            assert_eq!(
                listed.iter().map(|i| i.id).collect::<Vec<_>>(),
                vec![a.id, b.id, c.id]
            );
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_explicit_position_orders_listing() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let m = seed_memory(conn);
            let late = add_image(conn, m, &image("https://img/late.jpg", Some(5)))?;
            let early = add_image(conn, m, &image("https://img/early.jpg", Some(1)))?;

            let listed = list_images(conn, m)?;
            assert_eq!(
                listed.iter().map(|i| i.id).collect::<Vec<_>>(),
                vec![early.id, late.id]
            );

            // Appending after an explicit position continues from the max
            let next = add_image(conn, m, &image("https://img/next.jpg", None))?;
            assert_eq!(next.position, 6);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_video_update_is_partial() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let m = seed_memory(conn);
            let v = add_video(
                conn,
                m,
                &NewVideo {
                    video_url: "https://vid/1.mp4".to_string(),
                    thumbnail_url: Some("https://vid/1.jpg".to_string()),
                    caption: "raw".to_string(),
                    duration: Some("01:02".to_string()),
                    file_size: Some(1024),
                    position: None,
                },
            )?;

            let updated = update_video(
                conn,
                v.id,
                &UpdateVideo {
                    caption: Some("trimmed".to_string()),
                    ..Default::default()
                },
            )?;
            assert_eq!(updated.caption, "trimmed");
            assert_eq!(updated.thumbnail_url.as_deref(), Some("https://vid/1.jpg"));
            assert_eq!(updated.duration.as_deref(), Some("01:02"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_recording_defaults_and_delete() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let m = seed_memory(conn);
            let parsed: NewRecording =
                serde_json::from_str(r#"{"audio_url": "https://audio/1.webm"}"#)?;
            assert_eq!(parsed.speaker_name, "Unknown Speaker");

            let r = add_recording(conn, m, &parsed)?;
            assert_eq!(r.speaker_name, "Unknown Speaker");
            assert_eq!(r.position, 0);

            assert!(delete_recording(conn, r.id)?);
            assert!(!delete_recording(conn, r.id)?);
            Ok(())
        })
        .unwrap();
    }
}
