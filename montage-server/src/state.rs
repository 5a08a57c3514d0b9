use std::sync::Arc;

use montage_core::{MediaHost, MediaStore, SessionStore};

/// Collaborators every handler needs, constructed once at startup and
/// injected per request. The metadata store is optional: without it
/// the endpoint still hosts files and simply skips persistence.
#[derive(Clone)]
pub struct ApiState {
    pub media_host: Arc<dyn MediaHost>,
    pub records: Option<Arc<dyn MediaStore>>,
    pub sessions: Arc<dyn SessionStore>,
    /// Top-level media-host folder under which assets are namespaced
    /// per project and chapter.
    pub folder_root: String,
}
