//! Memory aggregate operations
//!
//! Every operation resolves the caller's scope before touching rows.
//! Out-of-scope ids read as absent, so a 404 never reveals whether a
//! memory exists. Media uploads complete against the object store
//! before any row is written; a failed upload persists nothing.

use std::sync::Arc;

use bytes::Bytes;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::access::{self, Viewer};
use crate::db::{
    annotations, family_links, interactions, media, memories, users, CommentRow, ImageRow,
    LikeRow, MemoryDb, MemoryRow, MemorySummary, NewImage, NewRecording, NewVideo, PersonEntry,
    PersonRow, RecordingRow, TagEntry, TagRow, UpdateMemoryInput, UserRow, VideoRow,
};
use crate::db::media::{UpdateImage, UpdateRecording, UpdateVideo};
use crate::error::ApiError;
use crate::media_store::{
    self, format_duration, ObjectStore, ResourceType, UploadRequest,
};

/// Create payload; family members must name the patient they create for
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMemoryRequest {
    #[serde(default)]
    pub patient_id: Option<i64>,
    #[serde(flatten)]
    pub fields: memories::CreateMemoryInput,
}

/// A memory with every sub-entity collection attached
#[derive(Debug, Serialize)]
pub struct MemoryDetail {
    #[serde(flatten)]
    pub memory: MemoryRow,
    pub images: Vec<ImageRow>,
    pub videos: Vec<VideoRow>,
    pub voice_recordings: Vec<RecordingRow>,
    pub people: Vec<PersonRow>,
    pub tags: Vec<TagRow>,
    pub comments: Vec<CommentRow>,
    pub is_liked_by_user: bool,
}

/// All attachments and annotations of one memory
#[derive(Debug, Serialize)]
pub struct MemoryMedia {
    pub images: Vec<ImageRow>,
    pub videos: Vec<VideoRow>,
    pub voice_recordings: Vec<RecordingRow>,
    pub people: Vec<PersonRow>,
    pub tags: Vec<TagRow>,
}

/// Social state of one memory
#[derive(Debug, Serialize)]
pub struct MemoryInteractions {
    pub likes: Vec<LikeRow>,
    pub comments: Vec<CommentRow>,
    pub likes_count: i64,
    pub comments_count: i64,
    pub is_liked_by_user: bool,
}

/// Neighbors of a memory in its owner's newest-first timeline
#[derive(Debug, Serialize)]
pub struct MemoryNavigation {
    pub current_position: i64,
    pub total_memories: i64,
    pub previous_memory: Option<MemorySummary>,
    pub next_memory: Option<MemorySummary>,
}

/// Outcome of a like or unlike; `created` drives the HTTP status only
#[derive(Debug, Serialize)]
pub struct LikeOutcome {
    #[serde(skip)]
    pub created: bool,
    pub message: String,
    pub liked: bool,
    pub likes_count: i64,
}

/// Bulk annotation outcome: rows written plus names skipped as duplicates
#[derive(Debug, Serialize)]
pub struct BulkAdded<T> {
    pub added: Vec<T>,
    pub skipped: Vec<String>,
}

/// Partial person update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePersonEntry {
    pub name: Option<String>,
    pub relation: Option<String>,
    pub avatar_url: Option<String>,
}

/// Partial tag update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTagEntry {
    pub tag_name: Option<String>,
    pub color: Option<String>,
}

/// Raw bytes received for an upload
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub bytes: Bytes,
    pub filename: String,
}

/// Metadata accompanying a voice recording upload
#[derive(Debug, Clone, Default)]
pub struct RecordingMeta {
    pub speaker_name: Option<String>,
    pub speaker_relation: String,
    pub transcript: String,
    pub position: Option<i64>,
}

/// Memory CRUD, media, annotations and social interactions
pub struct MemoryService {
    db: Arc<MemoryDb>,
    store: Arc<dyn ObjectStore>,
}

impl MemoryService {
    pub fn new(db: Arc<MemoryDb>, store: Arc<dyn ObjectStore>) -> Self {
        Self { db, store }
    }

    // -- Memories --

    pub fn create(&self, user: &UserRow, req: CreateMemoryRequest) -> Result<MemoryRow, ApiError> {
        if req.fields.title.trim().is_empty() {
            return Err(ApiError::Validation("Title is required.".to_string()));
        }

        let row = self.db.with_conn(|conn| {
            let owner_id = if user.is_patient() {
                user.id
            } else {
                let patient_id = req.patient_id.ok_or_else(|| {
                    ApiError::Validation(
                        "patient_id is required for family members.".to_string(),
                    )
                })?;
                let patient = users::get_user(conn, patient_id)?
                    .ok_or_else(|| ApiError::NotFound("Patient not found".to_string()))?;
                if !may_edit(conn, user, patient.id)? {
                    return Err(ApiError::PermissionDenied(
                        "Not connected to this patient.".to_string(),
                    ));
                }
                patient.id
            };
            memories::create(conn, owner_id, &req.fields)
        })?;

        info!(memory_id = row.id, owner_id = row.user_id, "Created memory");
        Ok(row)
    }

    /// Everything in the caller's scope, newest first
    pub fn list(&self, user: &UserRow) -> Result<Vec<MemoryRow>, ApiError> {
        self.db.with_conn(|conn| {
            let approved = if user.is_family() {
                family_links::approved_patient_ids(conn, user.id)?
            } else {
                Vec::new()
            };
            let scope = access::scope(&viewer(user), approved);
            memories::list_for_owners(conn, scope.owner_ids())
        })
    }

    pub fn get(&self, user: &UserRow, id: i64) -> Result<MemoryRow, ApiError> {
        self.db.with_conn(|conn| visible_memory(conn, user, id))
    }

    pub fn update(
        &self,
        user: &UserRow,
        id: i64,
        input: UpdateMemoryInput,
    ) -> Result<MemoryRow, ApiError> {
        self.db.with_conn(|conn| {
            editable_memory(conn, user, id)?;
            memories::update(conn, id, &input)
        })
    }

    /// Cascades to every attachment, annotation and interaction
    pub fn delete(&self, user: &UserRow, id: i64) -> Result<MemoryRow, ApiError> {
        let row = self.db.with_conn(|conn| {
            let row = editable_memory(conn, user, id)?;
            memories::delete(conn, id)?;
            Ok(row)
        })?;

        info!(memory_id = id, owner_id = row.user_id, "Deleted memory");
        Ok(row)
    }

    pub fn detail(&self, user: &UserRow, id: i64) -> Result<MemoryDetail, ApiError> {
        self.db.with_conn(|conn| {
            let memory = visible_memory(conn, user, id)?;
            Ok(MemoryDetail {
                images: media::list_images(conn, memory.id)?,
                videos: media::list_videos(conn, memory.id)?,
                voice_recordings: media::list_recordings(conn, memory.id)?,
                people: annotations::list_people(conn, memory.id)?,
                tags: annotations::list_tags(conn, memory.id)?,
                comments: interactions::list_comments(conn, memory.id)?,
                is_liked_by_user: interactions::is_liked(conn, memory.id, user.id)?,
                memory,
            })
        })
    }

    pub fn media(&self, user: &UserRow, id: i64) -> Result<MemoryMedia, ApiError> {
        self.db.with_conn(|conn| {
            let memory = visible_memory(conn, user, id)?;
            Ok(MemoryMedia {
                images: media::list_images(conn, memory.id)?,
                videos: media::list_videos(conn, memory.id)?,
                voice_recordings: media::list_recordings(conn, memory.id)?,
                people: annotations::list_people(conn, memory.id)?,
                tags: annotations::list_tags(conn, memory.id)?,
            })
        })
    }

    pub fn interactions(
        &self,
        user: &UserRow,
        id: i64,
    ) -> Result<MemoryInteractions, ApiError> {
        self.db.with_conn(|conn| {
            let memory = visible_memory(conn, user, id)?;
            Ok(MemoryInteractions {
                likes: interactions::list_likes(conn, memory.id)?,
                comments: interactions::list_comments(conn, memory.id)?,
                likes_count: interactions::count_likes(conn, memory.id)?,
                comments_count: interactions::count_comments(conn, memory.id)?,
                is_liked_by_user: interactions::is_liked(conn, memory.id, user.id)?,
            })
        })
    }

    /// Position and neighbors within the viewer's newest-first visible
    /// scope. For a family member linked to several patients the
    /// timeline interleaves all of them, so neighbors cross owners.
    pub fn navigation(&self, user: &UserRow, id: i64) -> Result<MemoryNavigation, ApiError> {
        self.db.with_conn(|conn| {
            let memory = visible_memory(conn, user, id)?;
            let approved = if user.is_family() {
                family_links::approved_patient_ids(conn, user.id)?
            } else {
                Vec::new()
            };
            let scope = access::scope(&viewer(user), approved);
            let timeline = memories::list_summaries_for_owners(conn, scope.owner_ids())?;
            let idx = timeline
                .iter()
                .position(|s| s.id == memory.id)
                .ok_or_else(|| not_found("Memory"))?;

            Ok(MemoryNavigation {
                current_position: (idx + 1) as i64,
                total_memories: timeline.len() as i64,
                previous_memory: if idx > 0 {
                    Some(timeline[idx - 1].clone())
                } else {
                    None
                },
                next_memory: timeline.get(idx + 1).cloned(),
            })
        })
    }

    // -- Media: pre-hosted URLs --

    pub fn add_image(
        &self,
        user: &UserRow,
        memory_id: i64,
        new: NewImage,
    ) -> Result<ImageRow, ApiError> {
        self.db.with_conn(|conn| {
            editable_memory(conn, user, memory_id)?;
            media::add_image(conn, memory_id, &new)
        })
    }

    pub fn add_video(
        &self,
        user: &UserRow,
        memory_id: i64,
        new: NewVideo,
    ) -> Result<VideoRow, ApiError> {
        self.db.with_conn(|conn| {
            editable_memory(conn, user, memory_id)?;
            media::add_video(conn, memory_id, &new)
        })
    }

    pub fn add_recording(
        &self,
        user: &UserRow,
        memory_id: i64,
        new: NewRecording,
    ) -> Result<RecordingRow, ApiError> {
        self.db.with_conn(|conn| {
            editable_memory(conn, user, memory_id)?;
            media::add_recording(conn, memory_id, &new)
        })
    }

    // -- Media: raw byte uploads --

    pub async fn upload_image(
        &self,
        user: &UserRow,
        memory_id: i64,
        file: FileUpload,
        caption: String,
        position: Option<i64>,
    ) -> Result<ImageRow, ApiError> {
        self.db
            .with_conn(|conn| editable_memory(conn, user, memory_id))?;

        let uploaded = self
            .store
            .upload(UploadRequest {
                bytes: file.bytes,
                filename: file.filename,
                folder: media_store::FOLDER_IMAGES,
                resource_type: ResourceType::Image,
            })
            .await?;
        debug!(memory_id, url = %uploaded.url, "Stored image upload");

        let new = NewImage {
            image_url: uploaded.url,
            caption,
            position,
        };
        self.db
            .with_conn(|conn| media::add_image(conn, memory_id, &new))
    }

    pub async fn upload_video(
        &self,
        user: &UserRow,
        memory_id: i64,
        file: FileUpload,
        caption: String,
        position: Option<i64>,
    ) -> Result<VideoRow, ApiError> {
        self.db
            .with_conn(|conn| editable_memory(conn, user, memory_id))?;

        let uploaded = self
            .store
            .upload(UploadRequest {
                bytes: file.bytes,
                filename: file.filename,
                folder: media_store::FOLDER_VIDEOS,
                resource_type: ResourceType::Video,
            })
            .await?;
        debug!(memory_id, url = %uploaded.url, "Stored video upload");

        let new = NewVideo {
            thumbnail_url: media_store::video_thumbnail_url(&uploaded.url),
            duration: uploaded.duration.map(format_duration),
            file_size: uploaded.size_bytes,
            video_url: uploaded.url,
            caption,
            position,
        };
        self.db
            .with_conn(|conn| media::add_video(conn, memory_id, &new))
    }

    pub async fn upload_recording(
        &self,
        user: &UserRow,
        memory_id: i64,
        file: FileUpload,
        meta: RecordingMeta,
    ) -> Result<RecordingRow, ApiError> {
        self.db
            .with_conn(|conn| editable_memory(conn, user, memory_id))?;

        let uploaded = self
            .store
            .upload(UploadRequest {
                bytes: file.bytes,
                filename: file.filename,
                folder: media_store::FOLDER_AUDIO,
                resource_type: ResourceType::Video,
            })
            .await?;
        debug!(memory_id, url = %uploaded.url, "Stored audio upload");

        let new = NewRecording {
            audio_url: uploaded.url,
            speaker_name: meta
                .speaker_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "Unknown Speaker".to_string()),
            speaker_relation: meta.speaker_relation,
            duration: uploaded.duration.map(format_duration),
            file_size: uploaded.size_bytes,
            transcript: meta.transcript,
            position: meta.position,
        };
        self.db
            .with_conn(|conn| media::add_recording(conn, memory_id, &new))
    }

    // -- Media: per-item --

    pub fn get_image(&self, user: &UserRow, id: i64) -> Result<ImageRow, ApiError> {
        self.db.with_conn(|conn| {
            let row = media::get_image(conn, id)?.ok_or_else(|| not_found("Image"))?;
            if !may_view_parent(conn, user, row.memory_id)? {
                return Err(not_found("Image"));
            }
            Ok(row)
        })
    }

    pub fn update_image(
        &self,
        user: &UserRow,
        id: i64,
        update: UpdateImage,
    ) -> Result<ImageRow, ApiError> {
        self.db.with_conn(|conn| {
            let row = media::get_image(conn, id)?.ok_or_else(|| not_found("Image"))?;
            if !may_edit_parent(conn, user, row.memory_id)? {
                return Err(not_found("Image"));
            }
            media::update_image(conn, id, &update)
        })
    }

    pub fn delete_image(&self, user: &UserRow, id: i64) -> Result<(), ApiError> {
        self.db.with_conn(|conn| {
            let row = media::get_image(conn, id)?.ok_or_else(|| not_found("Image"))?;
            if !may_edit_parent(conn, user, row.memory_id)? {
                return Err(not_found("Image"));
            }
            media::delete_image(conn, id)?;
            Ok(())
        })
    }

    pub fn get_video(&self, user: &UserRow, id: i64) -> Result<VideoRow, ApiError> {
        self.db.with_conn(|conn| {
            let row = media::get_video(conn, id)?.ok_or_else(|| not_found("Video"))?;
            if !may_view_parent(conn, user, row.memory_id)? {
                return Err(not_found("Video"));
            }
            Ok(row)
        })
    }

    pub fn update_video(
        &self,
        user: &UserRow,
        id: i64,
        update: UpdateVideo,
    ) -> Result<VideoRow, ApiError> {
        self.db.with_conn(|conn| {
            let row = media::get_video(conn, id)?.ok_or_else(|| not_found("Video"))?;
            if !may_edit_parent(conn, user, row.memory_id)? {
                return Err(not_found("Video"));
            }
            media::update_video(conn, id, &update)
        })
    }

    pub fn delete_video(&self, user: &UserRow, id: i64) -> Result<(), ApiError> {
        self.db.with_conn(|conn| {
            let row = media::get_video(conn, id)?.ok_or_else(|| not_found("Video"))?;
            if !may_edit_parent(conn, user, row.memory_id)? {
                return Err(not_found("Video"));
            }
            media::delete_video(conn, id)?;
            Ok(())
        })
    }

    pub fn get_recording(&self, user: &UserRow, id: i64) -> Result<RecordingRow, ApiError> {
        self.db.with_conn(|conn| {
            let row = media::get_recording(conn, id)?.ok_or_else(|| not_found("Recording"))?;
            if !may_view_parent(conn, user, row.memory_id)? {
                return Err(not_found("Recording"));
            }
            Ok(row)
        })
    }

    pub fn update_recording(
        &self,
        user: &UserRow,
        id: i64,
        update: UpdateRecording,
    ) -> Result<RecordingRow, ApiError> {
        self.db.with_conn(|conn| {
            let row = media::get_recording(conn, id)?.ok_or_else(|| not_found("Recording"))?;
            if !may_edit_parent(conn, user, row.memory_id)? {
                return Err(not_found("Recording"));
            }
            media::update_recording(conn, id, &update)
        })
    }

    pub fn delete_recording(&self, user: &UserRow, id: i64) -> Result<(), ApiError> {
        self.db.with_conn(|conn| {
            let row = media::get_recording(conn, id)?.ok_or_else(|| not_found("Recording"))?;
            if !may_edit_parent(conn, user, row.memory_id)? {
                return Err(not_found("Recording"));
            }
            media::delete_recording(conn, id)?;
            Ok(())
        })
    }

    // -- People and tags --

    pub fn add_people(
        &self,
        user: &UserRow,
        memory_id: i64,
        entries: Vec<PersonEntry>,
    ) -> Result<BulkAdded<PersonRow>, ApiError> {
        self.db.with_conn(|conn| {
            editable_memory(conn, user, memory_id)?;
            let (added, skipped) = annotations::add_people(conn, memory_id, &entries)?;
            Ok(BulkAdded { added, skipped })
        })
    }

    pub fn add_tags(
        &self,
        user: &UserRow,
        memory_id: i64,
        entries: Vec<TagEntry>,
    ) -> Result<BulkAdded<TagRow>, ApiError> {
        self.db.with_conn(|conn| {
            editable_memory(conn, user, memory_id)?;
            let (added, skipped) = annotations::add_tags(conn, memory_id, &entries)?;
            Ok(BulkAdded { added, skipped })
        })
    }

    pub fn get_person(&self, user: &UserRow, id: i64) -> Result<PersonRow, ApiError> {
        self.db.with_conn(|conn| {
            let row = annotations::get_person(conn, id)?.ok_or_else(|| not_found("Person"))?;
            if !may_view_parent(conn, user, row.memory_id)? {
                return Err(not_found("Person"));
            }
            Ok(row)
        })
    }

    pub fn update_person(
        &self,
        user: &UserRow,
        id: i64,
        update: UpdatePersonEntry,
    ) -> Result<PersonRow, ApiError> {
        let result = self.db.with_conn(|conn| {
            let row = annotations::get_person(conn, id)?.ok_or_else(|| not_found("Person"))?;
            if !may_edit_parent(conn, user, row.memory_id)? {
                return Err(not_found("Person"));
            }
            annotations::update_person(
                conn,
                id,
                update.name.as_deref(),
                update.relation.as_deref(),
                update.avatar_url.as_deref(),
            )
        });
        match result {
            Err(ref e) if crate::db::is_unique_violation(e) => Err(ApiError::Validation(
                "A person with this name already exists on this memory.".to_string(),
            )),
            other => other,
        }
    }

    pub fn delete_person(&self, user: &UserRow, id: i64) -> Result<(), ApiError> {
        self.db.with_conn(|conn| {
            let row = annotations::get_person(conn, id)?.ok_or_else(|| not_found("Person"))?;
            if !may_edit_parent(conn, user, row.memory_id)? {
                return Err(not_found("Person"));
            }
            annotations::delete_person(conn, id)?;
            Ok(())
        })
    }

    pub fn get_tag(&self, user: &UserRow, id: i64) -> Result<TagRow, ApiError> {
        self.db.with_conn(|conn| {
            let row = annotations::get_tag(conn, id)?.ok_or_else(|| not_found("Tag"))?;
            if !may_view_parent(conn, user, row.memory_id)? {
                return Err(not_found("Tag"));
            }
            Ok(row)
        })
    }

    pub fn update_tag(
        &self,
        user: &UserRow,
        id: i64,
        update: UpdateTagEntry,
    ) -> Result<TagRow, ApiError> {
        let result = self.db.with_conn(|conn| {
            let row = annotations::get_tag(conn, id)?.ok_or_else(|| not_found("Tag"))?;
            if !may_edit_parent(conn, user, row.memory_id)? {
                return Err(not_found("Tag"));
            }
            annotations::update_tag(conn, id, update.tag_name.as_deref(), update.color.as_deref())
        });
        match result {
            Err(ref e) if crate::db::is_unique_violation(e) => Err(ApiError::Validation(
                "A tag with this name already exists on this memory.".to_string(),
            )),
            other => other,
        }
    }

    pub fn delete_tag(&self, user: &UserRow, id: i64) -> Result<(), ApiError> {
        self.db.with_conn(|conn| {
            let row = annotations::get_tag(conn, id)?.ok_or_else(|| not_found("Tag"))?;
            if !may_edit_parent(conn, user, row.memory_id)? {
                return Err(not_found("Tag"));
            }
            annotations::delete_tag(conn, id)?;
            Ok(())
        })
    }

    // -- Likes --

    pub fn like(&self, user: &UserRow, memory_id: i64) -> Result<LikeOutcome, ApiError> {
        self.db.with_conn(|conn| {
            let memory = visible_memory(conn, user, memory_id)?;
            let (_, created) = interactions::like(conn, memory.id, user.id)?;
            Ok(LikeOutcome {
                created,
                message: if created { "Memory liked" } else { "Already liked" }.to_string(),
                liked: true,
                likes_count: interactions::count_likes(conn, memory.id)?,
            })
        })
    }

    /// Never creates a row; unliking an unliked memory is a no-op
    pub fn unlike(&self, user: &UserRow, memory_id: i64) -> Result<LikeOutcome, ApiError> {
        self.db.with_conn(|conn| {
            let memory = visible_memory(conn, user, memory_id)?;
            let removed = interactions::unlike(conn, memory.id, user.id)?;
            Ok(LikeOutcome {
                created: false,
                message: if removed { "Memory unliked" } else { "Not liked" }.to_string(),
                liked: false,
                likes_count: interactions::count_likes(conn, memory.id)?,
            })
        })
    }

    // -- Comments --

    pub fn add_comment(
        &self,
        user: &UserRow,
        memory_id: i64,
        content: &str,
    ) -> Result<CommentRow, ApiError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ApiError::Validation("Comment content is required.".to_string()));
        }
        self.db.with_conn(|conn| {
            let memory = visible_memory(conn, user, memory_id)?;
            interactions::add_comment(conn, memory.id, user.id, content)
        })
    }

    pub fn get_comment(&self, user: &UserRow, id: i64) -> Result<CommentRow, ApiError> {
        self.db.with_conn(|conn| {
            let row = interactions::get_comment(conn, id)?.ok_or_else(|| not_found("Comment"))?;
            if !may_view_parent(conn, user, row.memory_id)? {
                return Err(not_found("Comment"));
            }
            Ok(row)
        })
    }

    /// Author-only; the memory owner cannot rewrite other people's words
    pub fn update_comment(
        &self,
        user: &UserRow,
        id: i64,
        content: &str,
    ) -> Result<CommentRow, ApiError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ApiError::Validation("Comment content is required.".to_string()));
        }
        self.db.with_conn(|conn| {
            let row = interactions::get_comment(conn, id)?.ok_or_else(|| not_found("Comment"))?;
            if !may_view_parent(conn, user, row.memory_id)? {
                return Err(not_found("Comment"));
            }
            if row.user_id != user.id {
                return Err(ApiError::PermissionDenied(
                    "Only the comment author can edit it.".to_string(),
                ));
            }
            interactions::update_comment(conn, id, content)
        })
    }

    /// The author or the memory's owner may delete
    pub fn delete_comment(&self, user: &UserRow, id: i64) -> Result<(), ApiError> {
        self.db.with_conn(|conn| {
            let row = interactions::get_comment(conn, id)?.ok_or_else(|| not_found("Comment"))?;
            let memory =
                memories::get(conn, row.memory_id)?.ok_or_else(|| not_found("Comment"))?;
            if !may_view(conn, user, memory.user_id)? {
                return Err(not_found("Comment"));
            }
            if row.user_id != user.id && memory.user_id != user.id {
                return Err(ApiError::PermissionDenied(
                    "Only the comment author or the memory owner can delete it.".to_string(),
                ));
            }
            interactions::delete_comment(conn, id)?;
            Ok(())
        })
    }
}

fn viewer(user: &UserRow) -> Viewer {
    Viewer::new(user.id, &user.role)
}

fn may_view(conn: &Connection, user: &UserRow, owner_id: i64) -> Result<bool, ApiError> {
    let approved = family_links::is_approved(conn, user.id, owner_id)?;
    Ok(access::can_view(&viewer(user), owner_id, approved))
}

fn may_edit(conn: &Connection, user: &UserRow, owner_id: i64) -> Result<bool, ApiError> {
    let approved = family_links::is_approved(conn, user.id, owner_id)?;
    Ok(access::can_edit(&viewer(user), owner_id, approved))
}

/// Scope-filtered load; out-of-scope ids read as absent
fn visible_memory(conn: &Connection, user: &UserRow, id: i64) -> Result<MemoryRow, ApiError> {
    let memory = memories::get(conn, id)?.ok_or_else(|| not_found("Memory"))?;
    if may_view(conn, user, memory.user_id)? {
        Ok(memory)
    } else {
        Err(not_found("Memory"))
    }
}

fn editable_memory(conn: &Connection, user: &UserRow, id: i64) -> Result<MemoryRow, ApiError> {
    let memory = memories::get(conn, id)?.ok_or_else(|| not_found("Memory"))?;
    if may_edit(conn, user, memory.user_id)? {
        Ok(memory)
    } else {
        Err(not_found("Memory"))
    }
}

/// Attachment guards resolve through the owning memory; a missing parent denies
fn may_view_parent(conn: &Connection, user: &UserRow, memory_id: i64) -> Result<bool, ApiError> {
    match memories::get(conn, memory_id)? {
        Some(memory) => may_view(conn, user, memory.user_id),
        None => Ok(false),
    }
}

fn may_edit_parent(conn: &Connection, user: &UserRow, memory_id: i64) -> Result<bool, ApiError> {
    match memories::get(conn, memory_id)? {
        Some(memory) => may_edit(conn, user, memory.user_id),
        None => Ok(false),
    }
}

fn not_found(kind: &str) -> ApiError {
    ApiError::NotFound(format!("{kind} not found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_store::UploadedMedia;
    use std::sync::Mutex;

    struct FakeStore {
        uploads: Mutex<Vec<String>>,
        fail: bool,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                uploads: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                uploads: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    #[async_trait::async_trait]
    impl ObjectStore for FakeStore {
        async fn upload(&self, request: UploadRequest) -> Result<UploadedMedia, ApiError> {
            if self.fail {
                return Err(ApiError::Upload("store unavailable".to_string()));
            }
            self.uploads.lock().unwrap().push(request.filename.clone());
            Ok(UploadedMedia {
                url: format!(
                    "https://media.test/video/upload/{}/{}",
                    request.folder, request.filename
                ),
                duration: Some(65.0),
                size_bytes: Some(request.bytes.len() as i64),
            })
        }
    }

    struct Fixture {
        svc: MemoryService,
        db: Arc<MemoryDb>,
        store: Arc<FakeStore>,
    }

    fn fixture() -> Fixture {
        fixture_with(FakeStore::new())
    }

    fn fixture_with(store: FakeStore) -> Fixture {
        let db = Arc::new(MemoryDb::open_in_memory().unwrap());
        let store = Arc::new(store);
        Fixture {
            svc: MemoryService::new(Arc::clone(&db), Arc::clone(&store) as Arc<dyn ObjectStore>),
            db,
            store,
        }
    }

    impl Fixture {
        fn user(&self, username: &str, role: &str) -> UserRow {
            self.db
                .with_conn(|conn| users::create_user(conn, username, "", "hash", role, None))
                .unwrap()
        }

        fn link(&self, patient: &UserRow, family: &UserRow) {
            self.db
                .with_conn(|conn| family_links::establish(conn, patient.id, family.id, ""))
                .unwrap();
        }

        fn memory(&self, owner: &UserRow, title: &str) -> MemoryRow {
            self.svc
                .create(
                    owner,
                    CreateMemoryRequest {
                        patient_id: None,
                        fields: memories::CreateMemoryInput {
                            title: title.to_string(),
                            description: String::new(),
                            date: None,
                            location: String::new(),
                            tag: String::new(),
                            image_url: None,
                        },
                    },
                )
                .unwrap()
        }
    }

    fn create_req(patient_id: Option<i64>, title: &str) -> CreateMemoryRequest {
        CreateMemoryRequest {
            patient_id,
            fields: memories::CreateMemoryInput {
                title: title.to_string(),
                description: String::new(),
                date: None,
                location: String::new(),
                tag: String::new(),
                image_url: None,
            },
        }
    }

    fn upload(name: &str) -> FileUpload {
        FileUpload {
            bytes: Bytes::from_static(b"payload"),
            filename: name.to_string(),
        }
    }

    #[test]
    fn test_create_rules_by_role() {
        let fx = fixture();
        let alice = fx.user("alice", "patient");
        let bob = fx.user("bob", "family");

        // Patients create for themselves
        let own = fx.svc.create(&alice, create_req(None, "Picnic")).unwrap();
        assert_eq!(own.user_id, alice.id);

        // Family must name a patient
        assert!(matches!(
            fx.svc.create(&bob, create_req(None, "Picnic")),
            Err(ApiError::Validation(_))
        ));
        // Unknown patient
        assert!(matches!(
            fx.svc.create(&bob, create_req(Some(9999), "Picnic")),
            Err(ApiError::NotFound(_))
        ));
        // Known but unlinked patient
        assert!(matches!(
            fx.svc.create(&bob, create_req(Some(alice.id), "Picnic")),
            Err(ApiError::PermissionDenied(_))
        ));

        fx.link(&alice, &bob);
        let on_behalf = fx
            .svc
            .create(&bob, create_req(Some(alice.id), "Visit"))
            .unwrap();
        assert_eq!(on_behalf.user_id, alice.id);

        assert!(matches!(
            fx.svc.create(&alice, create_req(None, "   ")),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn test_list_follows_scope() {
        let fx = fixture();
        let alice = fx.user("alice", "patient");
        let carol = fx.user("carol", "patient");
        let bob = fx.user("bob", "family");

        fx.memory(&alice, "Alice one");
        fx.memory(&carol, "Carol one");

        let titles: Vec<String> = fx
            .svc
            .list(&alice)
            .unwrap()
            .into_iter()
            .map(|m| m.title)
            .collect();
        assert_eq!(titles, vec!["Alice one"]);

        // Unlinked family sees nothing
        assert!(fx.svc.list(&bob).unwrap().is_empty());

        fx.link(&alice, &bob);
        let titles: Vec<String> = fx
            .svc
            .list(&bob)
            .unwrap()
            .into_iter()
            .map(|m| m.title)
            .collect();
        assert_eq!(titles, vec!["Alice one"]);
    }

    #[test]
    fn test_out_of_scope_reads_as_absent() {
        let fx = fixture();
        let alice = fx.user("alice", "patient");
        let carol = fx.user("carol", "patient");
        let memory = fx.memory(&alice, "Private");

        assert!(matches!(
            fx.svc.get(&carol, memory.id),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            fx.svc.delete(&carol, memory.id),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            fx.svc
                .update(&carol, memory.id, UpdateMemoryInput::default()),
            Err(ApiError::NotFound(_))
        ));

        // Still there for the owner
        assert_eq!(fx.svc.get(&alice, memory.id).unwrap().title, "Private");
    }

    #[test]
    fn test_detail_aggregates_everything() {
        let fx = fixture();
        let alice = fx.user("alice", "patient");
        let bob = fx.user("bob", "family");
        fx.link(&alice, &bob);
        let memory = fx.memory(&alice, "Birthday");

        fx.svc
            .add_image(
                &alice,
                memory.id,
                NewImage {
                    image_url: "https://cdn.test/cake.jpg".to_string(),
                    caption: "Cake".to_string(),
                    position: None,
                },
            )
            .unwrap();
        fx.svc
            .add_people(
                &alice,
                memory.id,
                vec![PersonEntry {
                    name: "Grandma".to_string(),
                    relation: "Grandmother".to_string(),
                    avatar_url: None,
                }],
            )
            .unwrap();
        fx.svc.add_comment(&bob, memory.id, "Lovely day").unwrap();
        fx.svc.like(&bob, memory.id).unwrap();

        let detail = fx.svc.detail(&bob, memory.id).unwrap();
        assert_eq!(detail.images.len(), 1);
        assert_eq!(detail.people.len(), 1);
        assert_eq!(detail.comments.len(), 1);
        assert_eq!(detail.comments[0].user_name, "bob");
        assert!(detail.is_liked_by_user);
        assert_eq!(detail.memory.likes_count, 1);

        // Same data through the owner's eyes, unliked
        let detail = fx.svc.detail(&alice, memory.id).unwrap();
        assert!(!detail.is_liked_by_user);
    }

    #[tokio::test]
    async fn test_upload_image_persists_store_url() {
        let fx = fixture();
        let alice = fx.user("alice", "patient");
        let memory = fx.memory(&alice, "Trip");

        let row = fx
            .svc
            .upload_image(&alice, memory.id, upload("beach.jpg"), "Beach".to_string(), None)
            .await
            .unwrap();
        assert!(row.image_url.contains("memory_images/beach.jpg"));
        assert_eq!(row.caption, "Beach");
        assert_eq!(row.position, 0);
    }

    #[tokio::test]
    async fn test_upload_video_derives_thumbnail_and_duration() {
        let fx = fixture();
        let alice = fx.user("alice", "patient");
        let memory = fx.memory(&alice, "Trip");

        let row = fx
            .svc
            .upload_video(&alice, memory.id, upload("clip.mp4"), String::new(), None)
            .await
            .unwrap();
        assert_eq!(row.duration.as_deref(), Some("1:05"));
        assert_eq!(row.file_size, Some(7));
        let thumb = row.thumbnail_url.unwrap();
        assert!(thumb.contains("/video/upload/c_thumb,w_300,h_200/"));
    }

    #[tokio::test]
    async fn test_upload_recording_defaults_speaker() {
        let fx = fixture();
        let alice = fx.user("alice", "patient");
        let memory = fx.memory(&alice, "Stories");

        let row = fx
            .svc
            .upload_recording(
                &alice,
                memory.id,
                upload("story.m4a"),
                RecordingMeta {
                    speaker_name: Some("   ".to_string()),
                    ..RecordingMeta::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(row.speaker_name, "Unknown Speaker");
        assert_eq!(row.duration.as_deref(), Some("1:05"));
    }

    #[tokio::test]
    async fn test_failed_upload_writes_nothing() {
        let fx = fixture_with(FakeStore::failing());
        let alice = fx.user("alice", "patient");
        let memory = fx.memory(&alice, "Trip");

        let result = fx
            .svc
            .upload_image(&alice, memory.id, upload("beach.jpg"), String::new(), None)
            .await;
        assert!(matches!(result, Err(ApiError::Upload(_))));

        let detail = fx.svc.detail(&alice, memory.id).unwrap();
        assert!(detail.images.is_empty());
    }

    #[tokio::test]
    async fn test_upload_checks_scope_before_store() {
        let fx = fixture();
        let alice = fx.user("alice", "patient");
        let carol = fx.user("carol", "patient");
        let memory = fx.memory(&alice, "Trip");

        let result = fx
            .svc
            .upload_image(&carol, memory.id, upload("sneak.jpg"), String::new(), None)
            .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
        // Nothing reached the store
        assert!(fx.store.uploads.lock().unwrap().is_empty());
    }

    #[test]
    fn test_item_guards_conceal_cross_patient_media() {
        let fx = fixture();
        let alice = fx.user("alice", "patient");
        let carol = fx.user("carol", "patient");
        let memory = fx.memory(&alice, "Trip");

        let image = fx
            .svc
            .add_image(
                &alice,
                memory.id,
                NewImage {
                    image_url: "https://cdn.test/a.jpg".to_string(),
                    caption: String::new(),
                    position: None,
                },
            )
            .unwrap();

        assert!(matches!(
            fx.svc.get_image(&carol, image.id),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            fx.svc.delete_image(&carol, image.id),
            Err(ApiError::NotFound(_))
        ));

        // A linked family member may edit
        let bob = fx.user("bob", "family");
        fx.link(&alice, &bob);
        let updated = fx
            .svc
            .update_image(
                &bob,
                image.id,
                UpdateImage {
                    caption: Some("Harbor".to_string()),
                    position: None,
                },
            )
            .unwrap();
        assert_eq!(updated.caption, "Harbor");
    }

    #[test]
    fn test_bulk_annotations_report_skipped() {
        let fx = fixture();
        let alice = fx.user("alice", "patient");
        let memory = fx.memory(&alice, "Reunion");

        let person = |name: &str| PersonEntry {
            name: name.to_string(),
            relation: String::new(),
            avatar_url: None,
        };
        let outcome = fx
            .svc
            .add_people(&alice, memory.id, vec![person("Ann"), person("Ben")])
            .unwrap();
        assert_eq!(outcome.added.len(), 2);
        assert!(outcome.skipped.is_empty());

        let outcome = fx
            .svc
            .add_people(&alice, memory.id, vec![person("Ann"), person("Cara")])
            .unwrap();
        assert_eq!(outcome.added.len(), 1);
        assert_eq!(outcome.skipped, vec!["Ann".to_string()]);

        let tag = |name: &str| TagEntry {
            tag_name: name.to_string(),
            color: "#336699".to_string(),
        };
        let outcome = fx
            .svc
            .add_tags(&alice, memory.id, vec![tag("summer"), tag("family")])
            .unwrap();
        assert_eq!(outcome.added.len(), 2);

        // Renaming a tag onto an existing name is a validation failure
        let target = outcome.added[0].id;
        let result = fx.svc.update_tag(
            &alice,
            target,
            UpdateTagEntry {
                tag_name: Some("family".to_string()),
                color: None,
            },
        );
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_like_unlike_messages() {
        let fx = fixture();
        let alice = fx.user("alice", "patient");
        let bob = fx.user("bob", "family");
        fx.link(&alice, &bob);
        let memory = fx.memory(&alice, "Birthday");

        let outcome = fx.svc.like(&bob, memory.id).unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.message, "Memory liked");
        assert_eq!(outcome.likes_count, 1);

        let outcome = fx.svc.like(&bob, memory.id).unwrap();
        assert!(!outcome.created);
        assert_eq!(outcome.message, "Already liked");
        assert_eq!(outcome.likes_count, 1);

        let outcome = fx.svc.unlike(&bob, memory.id).unwrap();
        assert_eq!(outcome.message, "Memory unliked");
        assert!(!outcome.liked);
        assert_eq!(outcome.likes_count, 0);

        let outcome = fx.svc.unlike(&bob, memory.id).unwrap();
        assert_eq!(outcome.message, "Not liked");
        assert_eq!(outcome.likes_count, 0);
    }

    #[test]
    fn test_comment_permissions() {
        let fx = fixture();
        let alice = fx.user("alice", "patient");
        let bob = fx.user("bob", "family");
        let carol = fx.user("carol", "patient");
        fx.link(&alice, &bob);
        let memory = fx.memory(&alice, "Birthday");

        assert!(matches!(
            fx.svc.add_comment(&bob, memory.id, "  "),
            Err(ApiError::Validation(_))
        ));
        let comment = fx.svc.add_comment(&bob, memory.id, "Lovely").unwrap();

        // Author edits; the memory owner cannot
        fx.svc.update_comment(&bob, comment.id, "Lovely day").unwrap();
        assert!(matches!(
            fx.svc.update_comment(&alice, comment.id, "mine now"),
            Err(ApiError::PermissionDenied(_))
        ));

        // Outside the scope the comment does not exist
        assert!(matches!(
            fx.svc.get_comment(&carol, comment.id),
            Err(ApiError::NotFound(_))
        ));

        // The memory owner may delete
        fx.svc.delete_comment(&alice, comment.id).unwrap();
        assert!(matches!(
            fx.svc.get_comment(&bob, comment.id),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn test_navigation_walks_visible_scope() {
        let fx = fixture();
        let alice = fx.user("alice", "patient");
        let bob = fx.user("bob", "family");
        fx.link(&alice, &bob);

        let first = fx.memory(&alice, "First");
        let second = fx.memory(&alice, "Second");
        let third = fx.memory(&alice, "Third");

        // Newest first: third, second, first
        let nav = fx.svc.navigation(&bob, second.id).unwrap();
        assert_eq!(nav.current_position, 2);
        assert_eq!(nav.total_memories, 3);
        assert_eq!(nav.previous_memory.as_ref().unwrap().id, third.id);
        assert_eq!(nav.next_memory.as_ref().unwrap().id, first.id);

        let nav = fx.svc.navigation(&alice, third.id).unwrap();
        assert_eq!(nav.current_position, 1);
        assert!(nav.previous_memory.is_none());
        assert_eq!(nav.next_memory.as_ref().unwrap().id, second.id);

        let nav = fx.svc.navigation(&alice, first.id).unwrap();
        assert_eq!(nav.current_position, 3);
        assert!(nav.next_memory.is_none());
    }

    #[test]
    fn test_navigation_interleaves_linked_patients() {
        let fx = fixture();
        let alice = fx.user("alice", "patient");
        let carol = fx.user("carol", "patient");
        let bob = fx.user("bob", "family");
        fx.link(&alice, &bob);
        fx.link(&carol, &bob);

        let oldest = fx.memory(&alice, "Wedding");
        let middle = fx.memory(&carol, "Graduation");
        let newest = fx.memory(&alice, "Birthday");

        // Bob's timeline spans both patients; neighbors cross owners
        let nav = fx.svc.navigation(&bob, middle.id).unwrap();
        assert_eq!(nav.current_position, 2);
        assert_eq!(nav.total_memories, 3);
        assert_eq!(nav.previous_memory.as_ref().unwrap().id, newest.id);
        assert_eq!(nav.next_memory.as_ref().unwrap().id, oldest.id);

        // Each patient still only sees their own timeline
        let nav = fx.svc.navigation(&carol, middle.id).unwrap();
        assert_eq!(nav.current_position, 1);
        assert_eq!(nav.total_memories, 1);
        assert!(nav.previous_memory.is_none());
        assert!(nav.next_memory.is_none());
    }

    #[test]
    fn test_delete_cascades_to_interactions() {
        let fx = fixture();
        let alice = fx.user("alice", "patient");
        let bob = fx.user("bob", "family");
        fx.link(&alice, &bob);
        let memory = fx.memory(&alice, "Birthday");

        fx.svc.like(&bob, memory.id).unwrap();
        let comment = fx.svc.add_comment(&bob, memory.id, "Nice").unwrap();

        fx.svc.delete(&alice, memory.id).unwrap();
        assert!(matches!(
            fx.svc.get(&alice, memory.id),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            fx.svc.get_comment(&bob, comment.id),
            Err(ApiError::NotFound(_))
        ));
    }
}
