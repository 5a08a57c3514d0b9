use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Files at or above this size go through the chunked path: 100 MiB.
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 100 * 1024 * 1024;
/// Fixed chunk size for the chunked path: 10 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;
/// Maximum parallel upload tasks per batch.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;
/// Maximum attempts per phase call (init, one chunk, finalize).
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Per-file size cap in megabytes.
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 500;
/// Whole-request timeout applied to every endpoint call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub fn default_accepted_formats() -> Vec<String> {
    [
        "image/jpeg",
        "image/png",
        "image/webp",
        "video/mp4",
        "video/quicktime",
        "video/x-msvideo",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the upload endpoint, e.g. `https://host/upload`.
    pub endpoint: String,
    pub max_file_size_mb: u64,
    /// Accepted MIME types; exact (`video/mp4`) or wildcard (`image/*`).
    /// Empty means accept everything.
    pub accepted_formats: Vec<String>,
    pub chunk_size: u64,
    pub chunk_threshold: u64,
    pub max_concurrent: usize,
    pub max_retries: u32,
    #[serde(skip, default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            accepted_formats: default_accepted_formats(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    pub media_host_url: String,
    pub media_host_key: Option<String>,
    /// Connection string for the metadata store. When absent the server
    /// runs with in-memory sessions and skips metadata persistence.
    pub mongo_uri: Option<String>,
    /// Top-level folder on the media host under which assets are
    /// namespaced per project and chapter.
    pub folder_root: String,
}
