//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the client starts with zero
//! configuration for local development.

use std::path::PathBuf;

use ebchat_shared::constants::{ASSISTANT_NAME, DEFAULT_MAX_BLOB_SIZE};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Profile database file.
    /// Env: `EBCHAT_DB_PATH`
    /// Default: platform data directory (`ebchat.db`).
    pub db_path: Option<PathBuf>,

    /// Directory where uploaded images are stored.
    /// Env: `EBCHAT_BLOB_DIR`
    /// Default: `./blobs`
    pub blob_dir: PathBuf,

    /// URL prefix returned for uploaded blobs.
    /// Env: `EBCHAT_BLOB_BASE_URL`
    /// Default: `file://` URL of `blob_dir`.
    pub blob_base_url: Option<String>,

    /// Maximum upload size in bytes.
    /// Env: `EBCHAT_MAX_BLOB_SIZE`
    /// Default: 10 MiB.
    pub max_blob_size: usize,

    /// Fallback tracing filter when `RUST_LOG` is unset.
    /// Env: `EBCHAT_LOG`
    pub log_filter: String,

    /// Display name of the assistant contact.
    /// Env: `EBCHAT_ASSISTANT_NAME`
    pub assistant_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            blob_dir: PathBuf::from("./blobs"),
            blob_base_url: None,
            max_blob_size: DEFAULT_MAX_BLOB_SIZE,
            log_filter: "ebchat_client=debug,ebchat_store=info,warn".to_string(),
            assistant_name: ASSISTANT_NAME.to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("EBCHAT_DB_PATH").filter(|p| !p.is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(dir) = lookup("EBCHAT_BLOB_DIR").filter(|d| !d.is_empty()) {
            config.blob_dir = PathBuf::from(dir);
        }

        if let Some(url) = lookup("EBCHAT_BLOB_BASE_URL").filter(|u| !u.is_empty()) {
            config.blob_base_url = Some(url);
        }

        if let Some(val) = lookup("EBCHAT_MAX_BLOB_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_blob_size = n,
                _ => tracing::warn!(value = %val, "Invalid EBCHAT_MAX_BLOB_SIZE, using default"),
            }
        }

        if let Some(filter) = lookup("EBCHAT_LOG").filter(|f| !f.is_empty()) {
            config.log_filter = filter;
        }

        if let Some(name) = lookup("EBCHAT_ASSISTANT_NAME").filter(|n| !n.trim().is_empty()) {
            config.assistant_name = name;
        }

        config
    }
}
