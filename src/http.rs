//! HTTP server for the memory API
//!
//! Binds a TCP listener and serves HTTP/1.1 connections, dispatching each
//! request through the route chain:
//!
//! - `GET /health` - liveness plus database statistics (unauthenticated)
//! - `/api/auth/*` - register, login, me
//! - `/api/family-members`, `/api/family-links/*` - roster and connect codes
//! - `/api/memories*`, `/api/memory-*` - the memory aggregate
//!
//! Each router takes the request and returns `Some(response)` when the
//! path belongs to it; the first hit wins and anything unmatched is 404.

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::db::DbStats;
use crate::error::ApiError;
use crate::routes::{
    self, cors_preflight, json_response, AppState, BoxBody, ErrorResponse,
};

/// HTTP server state
pub struct HttpServer {
    state: Arc<AppState>,
    bind_addr: SocketAddr,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    #[serde(flatten)]
    stats: DbStats,
}

impl HttpServer {
    pub fn new(state: Arc<AppState>, bind_addr: SocketAddr) -> Self {
        Self { state, bind_addr }
    }

    /// Run the accept loop; each connection is served on its own task
    pub async fn run(self: Arc<Self>) -> Result<(), ApiError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route one request through the handler chain
    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<BoxBody>, hyper::Error> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        debug!(method = %method, path = %path, "Incoming request");

        if method == Method::GET && path == "/health" {
            return Ok(self.handle_health());
        }
        if method == Method::OPTIONS && !path.starts_with("/api/") {
            return Ok(cors_preflight());
        }

        // Routers claim disjoint path prefixes, so at most one fires
        let state = Arc::clone(&self.state);
        let response = if path.starts_with("/api/auth") {
            routes::handle_auth_request(req, state).await
        } else if path.starts_with("/api/family-") {
            routes::handle_family_request(req, state).await
        } else if path.starts_with("/api/memories") || path.starts_with("/api/memory-") {
            routes::handle_memory_request(req, state).await
        } else {
            None
        };
        if let Some(response) = response {
            return Ok(response);
        }

        Ok(json_response(
            StatusCode::NOT_FOUND,
            &ErrorResponse {
                error: format!("No route for {} {}", method, path),
                code: Some("NOT_FOUND".to_string()),
            },
        ))
    }

    fn handle_health(&self) -> Response<BoxBody> {
        match self.state.db.stats() {
            Ok(stats) => json_response(
                StatusCode::OK,
                &HealthResponse {
                    status: "healthy",
                    service: "keepsake",
                    stats,
                },
            ),
            Err(e) => json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &ErrorResponse {
                    error: format!("Database unavailable: {}", e),
                    code: Some("DB_ERROR".to_string()),
                },
            ),
        }
    }
}
