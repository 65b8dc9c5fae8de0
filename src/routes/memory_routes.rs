//! HTTP routes for memories, their media, annotations and interactions
//!
//! - GET|POST /api/memories
//! - GET|PUT|DELETE /api/memories/{id}
//! - GET /api/memories/{id}/detail|media|interactions|navigation
//! - POST /api/memories/{id}/images|videos|recordings   (JSON or raw bytes)
//! - POST /api/memories/{id}/people|tags                (bulk)
//! - POST|DELETE /api/memories/{id}/like
//! - POST /api/memories/{id}/comments
//! - GET|PUT|DELETE /api/memory-{images|videos|recordings|people|tags|comments}/{id}
//!
//! Media uploads send raw bytes with metadata in query parameters
//! (`filename`, `caption`, `position`, and for recordings `speaker_name`,
//! `speaker_relation`, `transcript`). A JSON content type selects the
//! pre-hosted URL path instead.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;

use crate::db::media::{UpdateImage, UpdateRecording, UpdateVideo};
use crate::db::{NewImage, NewRecording, NewVideo, PersonEntry, TagEntry, UpdateMemoryInput, UserRow};
use crate::error::ApiError;
use crate::services::{
    CreateMemoryRequest, FileUpload, RecordingMeta, UpdatePersonEntry, UpdateTagEntry,
};

use super::{
    authenticate, cors_preflight, error_response, is_json_request, json_response, parse_id,
    parse_json_body, query_param, respond, AppState, BoxBody, ErrorResponse, MessageResponse,
};

/// Raw uploads above this size are rejected before reaching the store
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct PeoplePayload {
    #[serde(default)]
    people: Vec<PersonEntry>,
}

#[derive(Debug, Deserialize)]
struct TagsPayload {
    #[serde(default)]
    tags: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct CommentPayload {
    #[serde(default)]
    content: String,
}

// =============================================================================
// Memory Handlers
// =============================================================================

/// POST /api/memories
async fn handle_create_memory(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
) -> Response<BoxBody> {
    let body: CreateMemoryRequest = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    respond(StatusCode::CREATED, state.memories.create(user, body))
}

/// PUT /api/memories/{id}
async fn handle_update_memory(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
    id: i64,
) -> Response<BoxBody> {
    let body: UpdateMemoryInput = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    respond(StatusCode::OK, state.memories.update(user, id, body))
}

// =============================================================================
// Media Attachment Handlers
// =============================================================================

/// POST /api/memories/{id}/images
async fn handle_attach_image(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
    memory_id: i64,
) -> Response<BoxBody> {
    if is_json_request(&req) {
        let new: NewImage = match parse_json_body(req).await {
            Ok(b) => b,
            Err(e) => return error_response(&e),
        };
        return respond(StatusCode::CREATED, state.memories.add_image(user, memory_id, new));
    }

    let caption = query_param(&req, "caption").unwrap_or_default();
    let position = query_param(&req, "position").and_then(|p| p.parse().ok());
    let filename = query_param(&req, "filename").unwrap_or_else(|| "upload.jpg".to_string());
    let bytes = match collect_upload(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    let result = state
        .memories
        .upload_image(user, memory_id, FileUpload { bytes, filename }, caption, position)
        .await;
    respond(StatusCode::CREATED, result)
}

/// POST /api/memories/{id}/videos
async fn handle_attach_video(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
    memory_id: i64,
) -> Response<BoxBody> {
    if is_json_request(&req) {
        let new: NewVideo = match parse_json_body(req).await {
            Ok(b) => b,
            Err(e) => return error_response(&e),
        };
        return respond(StatusCode::CREATED, state.memories.add_video(user, memory_id, new));
    }

    let caption = query_param(&req, "caption").unwrap_or_default();
    let position = query_param(&req, "position").and_then(|p| p.parse().ok());
    let filename = query_param(&req, "filename").unwrap_or_else(|| "upload.mp4".to_string());
    let bytes = match collect_upload(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    let result = state
        .memories
        .upload_video(user, memory_id, FileUpload { bytes, filename }, caption, position)
        .await;
    respond(StatusCode::CREATED, result)
}

/// POST /api/memories/{id}/recordings
async fn handle_attach_recording(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
    memory_id: i64,
) -> Response<BoxBody> {
    if is_json_request(&req) {
        let new: NewRecording = match parse_json_body(req).await {
            Ok(b) => b,
            Err(e) => return error_response(&e),
        };
        return respond(
            StatusCode::CREATED,
            state.memories.add_recording(user, memory_id, new),
        );
    }

    let meta = RecordingMeta {
        speaker_name: query_param(&req, "speaker_name"),
        speaker_relation: query_param(&req, "speaker_relation").unwrap_or_default(),
        transcript: query_param(&req, "transcript").unwrap_or_default(),
        position: query_param(&req, "position").and_then(|p| p.parse().ok()),
    };
    let filename = query_param(&req, "filename").unwrap_or_else(|| "upload.webm".to_string());
    let bytes = match collect_upload(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    let result = state
        .memories
        .upload_recording(user, memory_id, FileUpload { bytes, filename }, meta)
        .await;
    respond(StatusCode::CREATED, result)
}

async fn collect_upload(req: Request<Incoming>) -> Result<Bytes, ApiError> {
    let bytes = req
        .collect()
        .await
        .map_err(|e| ApiError::Validation(format!("Failed to read body: {}", e)))?
        .to_bytes();

    if bytes.is_empty() {
        return Err(ApiError::Validation("No file provided".to_string()));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ApiError::Validation("Upload too large".to_string()));
    }
    Ok(bytes)
}

// =============================================================================
// Annotation and Comment Handlers
// =============================================================================

/// POST /api/memories/{id}/people
async fn handle_add_people(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
    memory_id: i64,
) -> Response<BoxBody> {
    let body: PeoplePayload = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    respond(
        StatusCode::CREATED,
        state.memories.add_people(user, memory_id, body.people),
    )
}

/// POST /api/memories/{id}/tags
async fn handle_add_tags(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
    memory_id: i64,
) -> Response<BoxBody> {
    let body: TagsPayload = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    respond(
        StatusCode::CREATED,
        state.memories.add_tags(user, memory_id, body.tags),
    )
}

/// POST /api/memories/{id}/comments
async fn handle_add_comment(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
    memory_id: i64,
) -> Response<BoxBody> {
    let body: CommentPayload = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    respond(
        StatusCode::CREATED,
        state.memories.add_comment(user, memory_id, &body.content),
    )
}

// =============================================================================
// Per-item Update Handlers
// =============================================================================

async fn handle_update_image(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
    id: i64,
) -> Response<BoxBody> {
    let body: UpdateImage = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    respond(StatusCode::OK, state.memories.update_image(user, id, body))
}

async fn handle_update_video(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
    id: i64,
) -> Response<BoxBody> {
    let body: UpdateVideo = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    respond(StatusCode::OK, state.memories.update_video(user, id, body))
}

async fn handle_update_recording(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
    id: i64,
) -> Response<BoxBody> {
    let body: UpdateRecording = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    respond(StatusCode::OK, state.memories.update_recording(user, id, body))
}

async fn handle_update_person(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
    id: i64,
) -> Response<BoxBody> {
    let body: UpdatePersonEntry = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    respond(StatusCode::OK, state.memories.update_person(user, id, body))
}

async fn handle_update_tag(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
    id: i64,
) -> Response<BoxBody> {
    let body: UpdateTagEntry = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    respond(StatusCode::OK, state.memories.update_tag(user, id, body))
}

async fn handle_update_comment(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
    id: i64,
) -> Response<BoxBody> {
    let body: CommentPayload = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    respond(
        StatusCode::OK,
        state.memories.update_comment(user, id, &body.content),
    )
}

// =============================================================================
// Response Shorthands
// =============================================================================

fn deleted(result: Result<(), ApiError>, message: &str) -> Response<BoxBody> {
    match result {
        Ok(()) => json_response(
            StatusCode::OK,
            &MessageResponse {
                message: message.to_string(),
            },
        ),
        Err(e) => error_response(&e),
    }
}

fn method_not_allowed() -> Response<BoxBody> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &ErrorResponse {
            error: "Method not allowed".into(),
            code: None,
        },
    )
}

fn endpoint_not_found() -> Response<BoxBody> {
    json_response(
        StatusCode::NOT_FOUND,
        &ErrorResponse {
            error: "Memory endpoint not found".into(),
            code: None,
        },
    )
}

// =============================================================================
// Main Router
// =============================================================================

/// Handle memory-related HTTP requests.
///
/// Returns Some(response) if the request was handled, None otherwise.
pub async fn handle_memory_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let raw_path = req.uri().path();
    if !raw_path.starts_with("/api/memories") && !raw_path.starts_with("/api/memory-") {
        return None;
    }

    if req.method() == Method::OPTIONS {
        return Some(cors_preflight());
    }

    let user = match authenticate(&req, &state) {
        Ok(user) => user,
        Err(e) => return Some(error_response(&e)),
    };

    let method = req.method().clone();
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/api/memories") => respond(StatusCode::OK, state.memories.list(&user)),
        (&Method::POST, "/api/memories") => handle_create_memory(req, &state, &user).await,
        (_, "/api/memories") => method_not_allowed(),
        _ => dispatch_scoped(req, method, &path, &state, &user).await,
    };

    Some(response)
}

/// Routes with an id segment: `/api/memories/{id}[/sub]` and
/// `/api/memory-<kind>/{id}`.
async fn dispatch_scoped(
    req: Request<Incoming>,
    method: Method,
    path: &str,
    state: &AppState,
    user: &UserRow,
) -> Response<BoxBody> {
    if let Some(rest) = path.strip_prefix("/api/memories/") {
        let mut parts = rest.splitn(2, '/');
        let id = match parts.next().and_then(parse_id) {
            Some(id) => id,
            None => return endpoint_not_found(),
        };

        return match (parts.next(), &method) {
            (None, &Method::GET) => respond(StatusCode::OK, state.memories.get(user, id)),
            (None, &Method::PUT) => handle_update_memory(req, state, user, id).await,
            (None, &Method::DELETE) => {
                deleted(state.memories.delete(user, id).map(|_| ()), "Memory deleted")
            }
            (None, _) => method_not_allowed(),

            (Some("detail"), &Method::GET) => {
                respond(StatusCode::OK, state.memories.detail(user, id))
            }
            (Some("media"), &Method::GET) => respond(StatusCode::OK, state.memories.media(user, id)),
            (Some("interactions"), &Method::GET) => {
                respond(StatusCode::OK, state.memories.interactions(user, id))
            }
            (Some("navigation"), &Method::GET) => {
                respond(StatusCode::OK, state.memories.navigation(user, id))
            }

            (Some("images"), &Method::POST) => handle_attach_image(req, state, user, id).await,
            (Some("videos"), &Method::POST) => handle_attach_video(req, state, user, id).await,
            (Some("recordings"), &Method::POST) => {
                handle_attach_recording(req, state, user, id).await
            }
            (Some("people"), &Method::POST) => handle_add_people(req, state, user, id).await,
            (Some("tags"), &Method::POST) => handle_add_tags(req, state, user, id).await,
            (Some("comments"), &Method::POST) => handle_add_comment(req, state, user, id).await,

            (Some("like"), &Method::POST) => match state.memories.like(user, id) {
                Ok(outcome) => {
                    let status = if outcome.created {
                        StatusCode::CREATED
                    } else {
                        StatusCode::OK
                    };
                    json_response(status, &outcome)
                }
                Err(e) => error_response(&e),
            },
            (Some("like"), &Method::DELETE) => {
                respond(StatusCode::OK, state.memories.unlike(user, id))
            }

            (
                Some(
                    "detail" | "media" | "interactions" | "navigation" | "images" | "videos"
                    | "recordings" | "people" | "tags" | "comments" | "like",
                ),
                _,
            ) => method_not_allowed(),
            _ => endpoint_not_found(),
        };
    }

    if let Some(segment) = path.strip_prefix("/api/memory-images/") {
        let Some(id) = parse_id(segment) else {
            return endpoint_not_found();
        };
        return match method {
            Method::GET => respond(StatusCode::OK, state.memories.get_image(user, id)),
            Method::PUT => handle_update_image(req, state, user, id).await,
            Method::DELETE => deleted(state.memories.delete_image(user, id), "Image deleted"),
            _ => method_not_allowed(),
        };
    }

    if let Some(segment) = path.strip_prefix("/api/memory-videos/") {
        let Some(id) = parse_id(segment) else {
            return endpoint_not_found();
        };
        return match method {
            Method::GET => respond(StatusCode::OK, state.memories.get_video(user, id)),
            Method::PUT => handle_update_video(req, state, user, id).await,
            Method::DELETE => deleted(state.memories.delete_video(user, id), "Video deleted"),
            _ => method_not_allowed(),
        };
    }

    if let Some(segment) = path.strip_prefix("/api/memory-recordings/") {
        let Some(id) = parse_id(segment) else {
            return endpoint_not_found();
        };
        return match method {
            Method::GET => respond(StatusCode::OK, state.memories.get_recording(user, id)),
            Method::PUT => handle_update_recording(req, state, user, id).await,
            Method::DELETE => {
                deleted(state.memories.delete_recording(user, id), "Recording deleted")
            }
            _ => method_not_allowed(),
        };
    }

    if let Some(segment) = path.strip_prefix("/api/memory-people/") {
        let Some(id) = parse_id(segment) else {
            return endpoint_not_found();
        };
        return match method {
            Method::GET => respond(StatusCode::OK, state.memories.get_person(user, id)),
            Method::PUT => handle_update_person(req, state, user, id).await,
            Method::DELETE => deleted(state.memories.delete_person(user, id), "Person deleted"),
            _ => method_not_allowed(),
        };
    }

    if let Some(segment) = path.strip_prefix("/api/memory-tags/") {
        let Some(id) = parse_id(segment) else {
            return endpoint_not_found();
        };
        return match method {
            Method::GET => respond(StatusCode::OK, state.memories.get_tag(user, id)),
            Method::PUT => handle_update_tag(req, state, user, id).await,
            Method::DELETE => deleted(state.memories.delete_tag(user, id), "Tag deleted"),
            _ => method_not_allowed(),
        };
    }

    if let Some(segment) = path.strip_prefix("/api/memory-comments/") {
        let Some(id) = parse_id(segment) else {
            return endpoint_not_found();
        };
        return match method {
            Method::GET => respond(StatusCode::OK, state.memories.get_comment(user, id)),
            Method::PUT => handle_update_comment(req, state, user, id).await,
            Method::DELETE => deleted(state.memories.delete_comment(user, id), "Comment deleted"),
            _ => method_not_allowed(),
        };
    }

    endpoint_not_found()
}
