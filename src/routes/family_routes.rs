//! HTTP routes for the roster and connect codes
//!
//! - GET|POST   /api/family-members           - roster list / manual add
//! - GET|PUT|DELETE /api/family-members/{id}  - one roster entry
//! - POST /api/family-links/create-code       - issue a connect code
//! - GET|DELETE /api/family-links/code        - current code / clear it
//! - POST /api/family-links/connect           - redeem a code
//! - GET  /api/family-links/my-patients       - patients linked to a family member

use std::sync::Arc;

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;

use crate::db::UserRow;
use crate::services::{NewRosterEntry, UpdateRosterEntry};

use super::{
    authenticate, cors_preflight, error_response, json_response, no_content, parse_id,
    parse_json_body, respond, AppState, BoxBody, ErrorResponse,
};

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    #[serde(default)]
    code: String,
}

// =============================================================================
// Route Handlers
// =============================================================================

/// POST /api/family-members
async fn handle_add_member(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
) -> Response<BoxBody> {
    let entry: NewRosterEntry = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    respond(StatusCode::CREATED, state.family.add_roster_entry(user, entry))
}

/// PUT /api/family-members/{id}
async fn handle_update_member(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
    id: i64,
) -> Response<BoxBody> {
    let update: UpdateRosterEntry = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    respond(
        StatusCode::OK,
        state.family.update_roster_entry(user, id, update),
    )
}

/// POST /api/family-links/connect
async fn handle_connect(
    req: Request<Incoming>,
    state: &AppState,
    user: &UserRow,
) -> Response<BoxBody> {
    let body: ConnectRequest = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    respond(StatusCode::CREATED, state.family.connect(user, &body.code))
}

// =============================================================================
// Main Router
// =============================================================================

/// Handle roster and connect-code requests.
///
/// Returns Some(response) if the request was handled, None otherwise.
pub async fn handle_family_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path();
    let method = req.method();

    if !path.starts_with("/api/family-members") && !path.starts_with("/api/family-links") {
        return None;
    }

    if method == Method::OPTIONS {
        return Some(cors_preflight());
    }

    // Every endpoint here requires a valid bearer token
    let user = match authenticate(&req, &state) {
        Ok(user) => user,
        Err(e) => return Some(error_response(&e)),
    };

    let path = path.split('?').next().unwrap_or(path);

    let response = match (method, path) {
        (&Method::GET, "/api/family-members") => {
            respond(StatusCode::OK, state.family.list_roster(&user))
        }
        (&Method::POST, "/api/family-members") => handle_add_member(req, &state, &user).await,

        (&Method::POST, "/api/family-links/create-code") => {
            respond(StatusCode::CREATED, state.family.issue_code(&user))
        }
        (&Method::GET, "/api/family-links/code") => {
            respond(StatusCode::OK, state.family.current_code(&user))
        }
        (&Method::DELETE, "/api/family-links/code") => match state.family.clear_code(&user) {
            Ok(()) => no_content(),
            Err(e) => error_response(&e),
        },
        (&Method::POST, "/api/family-links/connect") => handle_connect(req, &state, &user).await,
        (&Method::GET, "/api/family-links/my-patients") => {
            respond(StatusCode::OK, state.family.my_patients(&user))
        }

        // Method not allowed on known static paths
        (_, "/api/family-members")
        | (_, "/api/family-links/create-code")
        | (_, "/api/family-links/code")
        | (_, "/api/family-links/connect")
        | (_, "/api/family-links/my-patients") => json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &ErrorResponse {
                error: "Method not allowed".into(),
                code: None,
            },
        ),

        (method, p) => {
            let id = p
                .strip_prefix("/api/family-members/")
                .and_then(parse_id);
            match id {
                Some(id) if method == Method::GET => {
                    respond(StatusCode::OK, state.family.get_roster_entry(&user, id))
                }
                Some(id) if method == Method::DELETE => {
                    respond(StatusCode::OK, state.family.delete_roster_entry(&user, id))
                }
                Some(id) if method == Method::PUT => {
                    handle_update_member(req, &state, &user, id).await
                }
                Some(_) => json_response(
                    StatusCode::METHOD_NOT_ALLOWED,
                    &ErrorResponse {
                        error: "Method not allowed".into(),
                        code: None,
                    },
                ),
                None => json_response(
                    StatusCode::NOT_FOUND,
                    &ErrorResponse {
                        error: "Family endpoint not found".into(),
                        code: None,
                    },
                ),
            }
        }
    };

    Some(response)
}
