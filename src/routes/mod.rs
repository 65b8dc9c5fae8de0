//! HTTP routes for the memory API
//!
//! Each router takes the request plus shared state and returns
//! `Some(response)` when the path belongs to it, `None` otherwise, so the
//! server can chain routers. Response helpers live here and are shared by
//! every route module.

pub mod auth_routes;
pub mod family_routes;
pub mod memory_routes;

pub use auth_routes::handle_auth_request;
pub use family_routes::handle_family_request;
pub use memory_routes::handle_memory_request;

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::auth::{extract_token_from_header, JwtValidator};
use crate::db::{users, MemoryDb, UserRow};
use crate::error::ApiError;
use crate::services::{FamilyService, MemoryService};

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// JSON bodies above this size are rejected before parsing
const MAX_JSON_BODY: usize = 1024 * 1024;

/// Shared state handed to every route handler
pub struct AppState {
    pub db: Arc<MemoryDb>,
    pub jwt: JwtValidator,
    pub family: FamilyService,
    pub memories: MemoryService,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// =============================================================================
// Response Helpers
// =============================================================================

pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .body(full_body(json))
        .unwrap()
}

/// Map a domain error onto its status code and `{error, code}` body
pub(crate) fn error_response(err: &ApiError) -> Response<BoxBody> {
    json_response(
        status_for(err),
        &ErrorResponse {
            error: err.to_string(),
            code: Some(err.code().to_string()),
        },
    )
}

/// Serialize a service result, mapping errors through `error_response`
pub(crate) fn respond<T: Serialize>(
    status: StatusCode,
    result: Result<T, ApiError>,
) -> Response<BoxBody> {
    match result {
        Ok(body) => json_response(status, &body),
        Err(e) => error_response(&e),
    }
}

pub(crate) fn no_content() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .body(empty_body())
        .unwrap()
}

fn status_for(err: &ApiError) -> StatusCode {
    match err {
        ApiError::Validation(_) | ApiError::InvalidCode(_) | ApiError::Upload(_) => {
            StatusCode::BAD_REQUEST
        }
        ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        ApiError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        ApiError::Conflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn cors_preflight() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .header("Access-Control-Max-Age", "86400")
        .body(empty_body())
        .unwrap()
}

pub(crate) fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub(crate) fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

// =============================================================================
// Request Helpers
// =============================================================================

pub(crate) async fn parse_json_body<T: for<'de> Deserialize<'de>>(
    req: Request<Incoming>,
) -> Result<T, ApiError> {
    let body = req
        .collect()
        .await
        .map_err(|e| ApiError::Validation(format!("Failed to read body: {}", e)))?;

    let bytes = body.to_bytes();
    if bytes.len() > MAX_JSON_BODY {
        return Err(ApiError::Validation("Request body too large".to_string()));
    }

    serde_json::from_slice(&bytes).map_err(|e| ApiError::Validation(format!("Invalid JSON: {}", e)))
}

pub(crate) fn get_auth_header<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Resolve the bearer token to a stored user; any failure reads as 401
pub(crate) fn authenticate<B>(req: &Request<B>, state: &AppState) -> Result<UserRow, ApiError> {
    let header = get_auth_header(req)
        .ok_or_else(|| ApiError::Unauthorized("Missing authorization header".to_string()))?;
    let token = extract_token_from_header(header)
        .ok_or_else(|| ApiError::Unauthorized("Invalid authorization header".to_string()))?;

    let result = state.jwt.verify_token(token);
    let claims = match result.claims {
        Some(claims) if result.valid => claims,
        _ => return Err(ApiError::Unauthorized("Invalid or expired token".to_string())),
    };

    state
        .db
        .with_conn(|conn| users::get_user(conn, claims.sub))?
        .ok_or_else(|| ApiError::Unauthorized("Unknown user".to_string()))
}

pub(crate) fn query_param<B>(req: &Request<B>, key: &str) -> Option<String> {
    let query = req.uri().query()?;
    for pair in query.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            if k == key {
                return Some(urlencoding::decode(v).unwrap_or_default().into_owned());
            }
        }
    }
    None
}

pub(crate) fn parse_id(segment: &str) -> Option<i64> {
    segment.parse::<i64>().ok().filter(|id| *id > 0)
}

pub(crate) fn is_json_request<B>(req: &Request<B>) -> bool {
    req.headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false)
}
