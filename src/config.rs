//! Configuration for keepsake

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keepsake")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for the SQLite database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Address to bind the HTTP server to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// JWT token expiry in seconds
    #[serde(default = "default_jwt_expiry")]
    pub jwt_expiry_seconds: u64,

    /// Connect code validity window in minutes
    #[serde(default = "default_code_validity")]
    pub code_validity_minutes: i64,

    /// Media object store upload endpoint (empty = uploads disabled,
    /// pre-hosted URLs still accepted)
    #[serde(default)]
    pub media_upload_url: String,

    /// API key sent to the media object store
    #[serde(default)]
    pub media_api_key: String,
}

fn default_http_port() -> u16 {
    8093
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_jwt_expiry() -> u64 {
    86400
}

fn default_code_validity() -> i64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            http_port: 8093,
            bind_addr: "0.0.0.0".to_string(),
            jwt_expiry_seconds: 86400,
            code_validity_minutes: 30,
            media_upload_url: String::new(),
            media_api_key: String::new(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get database path
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("keepsake.db")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
