use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::errors::Result;
use crate::models::TaskId;

/// A file that passed validation and is ready to be enqueued.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub modified_ms: i64,
    pub mime_type: String,
}

impl Candidate {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path)?;
        let modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let mime_type = mime_guess::from_path(&path)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        Ok(Self {
            path,
            file_name,
            size: metadata.len(),
            modified_ms,
            mime_type,
        })
    }

    pub fn task_id(&self) -> TaskId {
        TaskId::derive(&self.file_name, self.size, self.modified_ms)
    }
}

/// A file refused by validation, with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub file_name: String,
    pub reason: String,
}

/// Splits candidates into accepted files and rejections. Rejections
/// are non-fatal: every input lands in exactly one of the two lists.
pub fn partition(
    candidates: Vec<Candidate>,
    max_file_size_mb: u64,
    accepted_formats: &[String],
) -> (Vec<Candidate>, Vec<Rejection>) {
    let max_bytes = max_file_size_mb * 1024 * 1024;
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for candidate in candidates {
        if candidate.size > max_bytes {
            rejected.push(Rejection {
                file_name: candidate.file_name,
                reason: format!("File too large. Max size: {}MB", max_file_size_mb),
            });
            continue;
        }

        let format_ok = accepted_formats.is_empty()
            || accepted_formats
                .iter()
                .any(|f| format_matches(&candidate.mime_type, &candidate.file_name, f));

        if !format_ok {
            rejected.push(Rejection {
                file_name: candidate.file_name,
                reason: format!(
                    "Unsupported format. Accepted formats: {}",
                    accepted_formats.join(", ")
                ),
            });
            continue;
        }

        accepted.push(candidate);
    }

    (accepted, rejected)
}

/// A candidate matches an accepted entry when its MIME type matches
/// exactly, matches a `type/*` wildcard, or its extension equals the
/// entry's subtype (so `clip.mp4` passes `video/mp4` even when the
/// MIME type could not be guessed).
fn format_matches(mime_type: &str, file_name: &str, accepted: &str) -> bool {
    if let (Ok(m), Ok(a)) = (
        mime_type.parse::<mime::Mime>(),
        accepted.parse::<mime::Mime>(),
    ) {
        if a.subtype() == mime::STAR {
            if m.type_() == a.type_() {
                return true;
            }
        } else if m.essence_str() == a.essence_str() {
            return true;
        }
    }

    match accepted.rsplit('/').next() {
        Some(ext) if ext != "*" && !ext.is_empty() => file_name
            .to_ascii_lowercase()
            .ends_with(&ext.to_ascii_lowercase()),
        _ => false,
    }
}
