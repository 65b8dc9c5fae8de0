//! Keepsake API server
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (config under the local data dir)
//! JWT_SECRET=... keepsake
//!
//! # Custom config file
//! keepsake --config /path/to/config.toml
//!
//! # Custom port and data directory
//! keepsake --http-port 8093 --data-dir /data/keepsake
//!
//! # Point at a media object store
//! keepsake --media-upload-url https://store.example/upload \
//!          --media-api-key ...
//! ```
//!
//! Secrets come from the environment or CLI, never the TOML file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use keepsake::auth::JwtValidator;
use keepsake::routes::AppState;
use keepsake::services::{FamilyService, MemoryService};
use keepsake::{Config, DisabledObjectStore, HttpObjectStore, HttpServer, MemoryDb, ObjectStore};

#[derive(Parser, Debug)]
#[command(name = "keepsake")]
#[command(about = "Family memory-sharing API server")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory for the SQLite database
    #[arg(long, env = "KEEPSAKE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "KEEPSAKE_HTTP_PORT")]
    http_port: Option<u16>,

    /// Address to bind the HTTP server to
    #[arg(long, env = "KEEPSAKE_BIND_ADDR")]
    bind_addr: Option<String>,

    /// Secret for signing JWT tokens
    #[arg(long, env = "JWT_SECRET")]
    jwt_secret: String,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS")]
    jwt_expiry_seconds: Option<u64>,

    /// Media object store upload endpoint (unset = uploads disabled,
    /// pre-hosted URLs still accepted)
    #[arg(long, env = "MEDIA_UPLOAD_URL")]
    media_upload_url: Option<String>,

    /// API key sent to the media object store
    #[arg(long, env = "MEDIA_API_KEY")]
    media_api_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "keepsake=info".into()),
        )
        .init();

    let args = Args::parse();

    // Load config, then overlay CLI/env values
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        Config::default()
    };

    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(addr) = args.bind_addr {
        config.bind_addr = addr;
    }
    if let Some(expiry) = args.jwt_expiry_seconds {
        config.jwt_expiry_seconds = expiry;
    }
    if let Some(url) = args.media_upload_url {
        config.media_upload_url = url;
    }
    if let Some(key) = args.media_api_key {
        config.media_api_key = key;
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

    // Save default config next to the database if none exists yet
    let config_path = config.config_path();
    if args.config.is_none() && !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    info!(
        data_dir = %config.data_dir.display(),
        http_port = config.http_port,
        "Starting keepsake"
    );

    let db = Arc::new(MemoryDb::open(&config.data_dir)?);
    let jwt = JwtValidator::new(&args.jwt_secret, config.jwt_expiry_seconds)?;

    let store: Arc<dyn ObjectStore> = if config.media_upload_url.is_empty() {
        info!("No media upload endpoint configured; raw-bytes uploads disabled");
        Arc::new(DisabledObjectStore)
    } else {
        info!(url = %config.media_upload_url, "Media uploads via object store");
        Arc::new(HttpObjectStore::new(
            config.media_upload_url.clone(),
            config.media_api_key.clone(),
        )?)
    };

    let state = Arc::new(AppState {
        db: Arc::clone(&db),
        jwt,
        family: FamilyService::new(Arc::clone(&db), config.code_validity_minutes),
        memories: MemoryService::new(Arc::clone(&db), store),
    });

    let bind_addr: SocketAddr = format!("{}:{}", config.bind_addr, config.http_port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.bind_addr, config.http_port))?;

    let server = Arc::new(HttpServer::new(state, bind_addr));
    server.run().await?;

    Ok(())
}
