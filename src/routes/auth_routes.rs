//! HTTP routes for authentication
//!
//! - POST /api/auth/register - Create an account and get a JWT token
//! - POST /api/auth/login    - Authenticate with username or email
//! - GET  /api/auth/me       - The user behind the presented token

use std::sync::Arc;

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::access::Role;
use crate::auth::{hash_password, verify_password, TokenInput};
use crate::db::{self, users, UserRow};
use crate::error::ApiError;

use super::{
    authenticate, cors_preflight, error_response, json_response, parse_json_body, AppState,
    BoxBody, ErrorResponse,
};

fn default_role() -> String {
    "patient".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_role")]
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email address
    #[serde(default, alias = "identifier", alias = "email")]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserRow,
}

// =============================================================================
// Route Handlers
// =============================================================================

/// POST /api/auth/register
///
/// The username falls back to `full_name` when absent, so profile-first
/// clients can register with a display name alone.
async fn handle_register(req: Request<Incoming>, state: Arc<AppState>) -> Response<BoxBody> {
    let body: RegisterRequest = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    let username = match effective_username(&body) {
        Some(name) => name,
        None => {
            return error_response(&ApiError::Validation("Username is required.".to_string()))
        }
    };
    if body.password.is_empty() {
        return error_response(&ApiError::Validation("Password is required.".to_string()));
    }
    let role = match Role::parse(&body.role) {
        Some(role) => role,
        None => {
            return error_response(&ApiError::Validation(
                "Role must be 'patient' or 'family'.".to_string(),
            ))
        }
    };

    let password_hash = match hash_password(&body.password) {
        Ok(hash) => hash,
        Err(e) => return error_response(&e),
    };

    let created = state.db.with_conn(|conn| {
        users::create_user(
            conn,
            &username,
            body.email.trim(),
            &password_hash,
            role.as_str(),
            body.full_name.as_deref().map(str::trim),
        )
    });
    let user = match created {
        Ok(user) => user,
        Err(ref e) if db::is_unique_violation(e) => {
            return error_response(&ApiError::Conflict("Username already exists.".to_string()))
        }
        Err(e) => return error_response(&e),
    };

    let token = match issue_token(&state, &user) {
        Ok(token) => token,
        Err(e) => return error_response(&e),
    };

    info!(user_id = user.id, role = %user.role, "Registered user");
    json_response(StatusCode::CREATED, &AuthResponse { token, user })
}

/// POST /api/auth/login
///
/// Accepts a username or an email as the identifier. Failures are a
/// single generic 401 so accounts cannot be enumerated.
async fn handle_login(req: Request<Incoming>, state: Arc<AppState>) -> Response<BoxBody> {
    let body: LoginRequest = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    let identifier = body.username.trim();
    if identifier.is_empty() || body.password.is_empty() {
        return error_response(&ApiError::Validation(
            "Username and password are required.".to_string(),
        ));
    }

    let found = state.db.with_conn(|conn| {
        match users::get_user_by_email(conn, identifier)? {
            Some(user) => Ok(Some(user)),
            None => users::get_user_by_username(conn, identifier),
        }
    });
    let user = match found {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!(identifier, "Login failed: unknown identifier");
            return invalid_credentials();
        }
        Err(e) => return error_response(&e),
    };

    match verify_password(&body.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => {
            warn!(user_id = user.id, "Login failed: wrong password");
            return invalid_credentials();
        }
        Err(e) => return error_response(&e),
    }

    let token = match issue_token(&state, &user) {
        Ok(token) => token,
        Err(e) => return error_response(&e),
    };

    info!(user_id = user.id, "Logged in");
    json_response(StatusCode::OK, &AuthResponse { token, user })
}

/// GET /api/auth/me
async fn handle_me(req: Request<Incoming>, state: Arc<AppState>) -> Response<BoxBody> {
    match authenticate(&req, &state) {
        Ok(user) => json_response(StatusCode::OK, &user),
        Err(e) => error_response(&e),
    }
}

fn effective_username(body: &RegisterRequest) -> Option<String> {
    let username = body.username.trim();
    if !username.is_empty() {
        return Some(username.to_string());
    }
    body.full_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn issue_token(state: &AppState, user: &UserRow) -> Result<String, ApiError> {
    state.jwt.generate_token(TokenInput {
        user_id: user.id,
        username: user.username.clone(),
        role: user.role.clone(),
    })
}

fn invalid_credentials() -> Response<BoxBody> {
    error_response(&ApiError::Unauthorized("Invalid credentials".to_string()))
}

// =============================================================================
// Main Router
// =============================================================================

/// Handle auth-related HTTP requests.
///
/// Returns Some(response) if the request was handled, None if not an auth route.
pub async fn handle_auth_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path();
    let method = req.method();

    if !path.starts_with("/api/auth") {
        return None;
    }

    if method == Method::OPTIONS {
        return Some(cors_preflight());
    }

    let path = path.split('?').next().unwrap_or(path).to_string();

    let response = match (method, path.as_str()) {
        (&Method::POST, "/api/auth/register") => handle_register(req, state).await,
        (&Method::POST, "/api/auth/login") => handle_login(req, state).await,
        (&Method::GET, "/api/auth/me") => handle_me(req, state).await,

        // Method not allowed
        (_, "/api/auth/register") | (_, "/api/auth/login") | (_, "/api/auth/me") => {
            json_response(
                StatusCode::METHOD_NOT_ALLOWED,
                &ErrorResponse {
                    error: "Method not allowed".into(),
                    code: None,
                },
            )
        }

        _ => json_response(
            StatusCode::NOT_FOUND,
            &ErrorResponse {
                error: "Auth endpoint not found".into(),
                code: None,
            },
        ),
    };

    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(username: &str, full_name: Option<&str>) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            full_name: full_name.map(str::to_string),
            email: String::new(),
            password: "secret".to_string(),
            role: default_role(),
        }
    }

    #[test]
    fn test_username_fallback() {
        assert_eq!(
            effective_username(&register("alice", None)).as_deref(),
            Some("alice")
        );
        assert_eq!(
            effective_username(&register("  ", Some("Alice Hart"))).as_deref(),
            Some("Alice Hart")
        );
        assert_eq!(effective_username(&register("", Some("   "))), None);
        assert_eq!(effective_username(&register("", None)), None);
    }

    #[test]
    fn test_register_payload_defaults() {
        let body: RegisterRequest =
            serde_json::from_str(r#"{"username": "alice", "password": "pw"}"#).unwrap();
        assert_eq!(body.role, "patient");
        assert_eq!(body.email, "");
        assert!(body.full_name.is_none());
    }

    #[test]
    fn test_login_accepts_identifier_aliases() {
        let body: LoginRequest =
            serde_json::from_str(r#"{"identifier": "alice@example.com", "password": "pw"}"#)
                .unwrap();
        assert_eq!(body.username, "alice@example.com");

        let body: LoginRequest =
            serde_json::from_str(r#"{"email": "a@b.c", "password": "pw"}"#).unwrap();
        assert_eq!(body.username, "a@b.c");
    }
}
