//! External object storage client
//!
//! Media bytes never live in the database; uploads go to an HTTP object
//! store and only the durable URL (plus reported metadata) is persisted.
//! The trait seam lets tests substitute an in-process fake.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;

pub const FOLDER_IMAGES: &str = "memory_images";
pub const FOLDER_VIDEOS: &str = "memory_videos";
pub const FOLDER_AUDIO: &str = "memory_audio";

const THUMB_MARKER: &str = "/video/upload/";
const THUMB_TRANSFORM: &str = "/video/upload/c_thumb,w_300,h_200/";

/// How the store should treat the payload. Audio uploads go through the
/// video pipeline, which is what extracts a duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Image,
    Video,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Image => "image",
            ResourceType::Video => "video",
        }
    }
}

/// One upload to the object store
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bytes: Bytes,
    pub filename: String,
    pub folder: &'static str,
    pub resource_type: ResourceType,
}

/// What the store reports back for a stored object
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedMedia {
    pub url: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default, rename = "bytes")]
    pub size_bytes: Option<i64>,
}

/// Seam between the API and the binary store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, request: UploadRequest) -> Result<UploadedMedia, ApiError>;
}

/// Stands in when no upload endpoint is configured. Pre-hosted URLs in
/// JSON payloads still work; raw-bytes uploads fail cleanly.
pub struct DisabledObjectStore;

#[async_trait]
impl ObjectStore for DisabledObjectStore {
    async fn upload(&self, _request: UploadRequest) -> Result<UploadedMedia, ApiError> {
        Err(ApiError::Upload(
            "Media uploads are not configured on this server".to_string(),
        ))
    }
}

/// Talks to the real store over HTTP multipart
pub struct HttpObjectStore {
    client: reqwest::Client,
    upload_url: String,
    api_key: String,
}

impl HttpObjectStore {
    pub fn new(upload_url: String, api_key: String) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ApiError::Config(format!("Failed to build upload client: {e}")))?;

        Ok(Self {
            client,
            upload_url,
            api_key,
        })
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(&self, request: UploadRequest) -> Result<UploadedMedia, ApiError> {
        let public_id = format!("{}/{}", request.folder, Uuid::new_v4());
        let endpoint = format!("{}/{}", self.upload_url, request.resource_type.as_str());

        debug!(
            folder = request.folder,
            resource_type = request.resource_type.as_str(),
            size = request.bytes.len(),
            "Uploading to object store"
        );

        let part = multipart::Part::stream(reqwest::Body::from(request.bytes))
            .file_name(request.filename);
        let form = multipart::Form::new()
            .text("folder", request.folder)
            .text("public_id", public_id)
            .part("file", part);

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Upload(format!("Upload request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ApiError::Upload(format!(
                "Object store returned {}",
                response.status()
            )));
        }

        response
            .json::<UploadedMedia>()
            .await
            .map_err(|e| ApiError::Upload(format!("Malformed object store response: {e}")))
    }
}

/// Render a duration in seconds as `M:SS` (minutes unpadded)
pub fn format_duration(seconds: f64) -> String {
    let total = seconds as i64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Derive a still-frame thumbnail URL from a stored video URL.
/// Returns None when the URL has no transformable upload segment.
pub fn video_thumbnail_url(video_url: &str) -> Option<String> {
    if video_url.contains(THUMB_MARKER) {
        Some(video_url.replacen(THUMB_MARKER, THUMB_TRANSFORM, 1))
    } else {
        None
    }
}
