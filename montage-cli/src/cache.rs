use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of the per-project display cache. Authoritative state is
/// the metadata store; this only remembers the last listing so the
/// CLI can show something while the store is unreachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedMedia {
    pub file_name: String,
    pub url: String,
    pub file_type: String,
    pub file_size: u64,
    pub chapter: Option<String>,
    pub record_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct MediaCache {
    dir: PathBuf,
}

impl MediaCache {
    pub fn open() -> Option<Self> {
        let dir = dirs::data_dir()?.join("montage").join("projects");
        fs::create_dir_all(&dir).ok()?;
        Some(Self { dir })
    }

    fn path(&self, project_id: &str) -> PathBuf {
        let safe: String = project_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    pub fn load(&self, project_id: &str) -> Vec<CachedMedia> {
        fs::read_to_string(self.path(project_id))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn store(&self, project_id: &str, entries: &[CachedMedia]) {
        if let Ok(raw) = serde_json::to_string_pretty(entries) {
            if let Err(err) = fs::write(self.path(project_id), raw) {
                log::warn!("failed to write media cache: {}", err);
            }
        }
    }

    pub fn append(&self, project_id: &str, new_entries: Vec<CachedMedia>) {
        if new_entries.is_empty() {
            return;
        }
        let mut entries = self.load(project_id);
        entries.extend(new_entries);
        self.store(project_id, &entries);
    }
}
