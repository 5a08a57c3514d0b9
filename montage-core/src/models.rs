use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::progress::ProgressUpdate;
use crate::response::UploadOutcome;

/// Stable identity for one upload task, derived from the file's name,
/// byte size and last-modified timestamp so the same file always maps
/// to the same progress/speed/ETA entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn derive(file_name: &str, size: u64, modified_ms: i64) -> Self {
        Self(format!("{}-{}-{}", file_name, size, modified_ms))
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Uploading,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Idle,
    Uploading,
    Completed,
    Error,
}

/// Read-only description of a task handed back to the caller.
#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub id: TaskId,
    pub file_name: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub task: TaskId,
    pub phase: TaskPhase,
}

#[derive(Debug, Clone)]
pub enum TaskPhase {
    Started { total_bytes: u64 },
    Progress(ProgressUpdate),
    Completed(UploadOutcome),
    Failed { error: String, cancelled: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Anything that is not an image is treated as video, matching the
    /// two kinds the project wizard distinguishes.
    pub fn from_mime(mime_type: Option<&str>) -> Self {
        match mime_type {
            Some(m) if m.starts_with("image/") => MediaKind::Image,
            _ => MediaKind::Video,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata row persisted once per successfully hosted file.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MediaRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub project_id: String,
    pub user_email: String,
    pub file_name: String,
    pub file_type: MediaKind,
    pub file_size: u64,
    pub cloudinary_url: String,
    pub chapter: Option<String>,
    pub chapter_style: Option<Value>,
    pub duration: Option<f64>,
    /// `"1920x1080"` when the media host reports dimensions.
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Server-side state correlating the init call of a chunked upload
/// with its chunk and finalize calls. Lives in the session store, not
/// in any single request's process memory.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChunkSession {
    pub session_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: Option<String>,
    pub total_chunks: u32,
    pub project_id: Option<String>,
    pub user_email: Option<String>,
    pub chapter: Option<String>,
    pub chapter_style: Option<Value>,
    pub created_at: DateTime<Utc>,
}
