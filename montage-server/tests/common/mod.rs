#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use montage_core::{
    ChunkSession, HostedMedia, MediaHost, MediaKind, MediaRecord, MediaStore, MemorySessionStore,
    MontageError, Result, SessionStore, UploadOptions,
};
use montage_server::{build_router, ApiState};
use serde_json::Value;
use tower::ServiceExt;

// =======================================================================
// Stub collaborators
// =======================================================================

pub struct StubMediaHost {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl StubMediaHost {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }
}

#[async_trait]
impl MediaHost for StubMediaHost {
    async fn upload(&self, data: Bytes, opts: UploadOptions) -> Result<HostedMedia> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MontageError::MediaHostError(
                "media host unavailable".to_string(),
            ));
        }
        let kind = MediaKind::from_mime(opts.mime_type.as_deref());
        Ok(HostedMedia {
            secure_url: format!("https://media.test/{}/{}", opts.folder, opts.public_id),
            public_id: format!("{}/{}", opts.folder, opts.public_id),
            bytes: data.len() as u64,
            kind,
            width: (kind == MediaKind::Image).then_some(1920),
            height: (kind == MediaKind::Image).then_some(1080),
            duration: (kind == MediaKind::Video).then_some(12.5),
        })
    }
}

pub struct StubMediaStore {
    pub fail: bool,
    pub rows: Mutex<Vec<MediaRecord>>,
    pub inserts: AtomicUsize,
}

impl StubMediaStore {
    pub fn new() -> Self {
        Self {
            fail: false,
            rows: Mutex::new(Vec::new()),
            inserts: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            rows: Mutex::new(Vec::new()),
            inserts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MediaStore for StubMediaStore {
    async fn insert(&self, record: MediaRecord) -> Result<String> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MontageError::Unknown("metadata store down".to_string()));
        }
        let mut rows = self.rows.lock().unwrap();
        rows.push(record);
        Ok(format!("rec-{}", rows.len()))
    }

    async fn delete(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn list_project(&self, project_id: &str) -> Result<Vec<MediaRecord>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect())
    }
}

/// Delegates to the in-memory session store while recording how the
/// chunked phases were exercised.
pub struct CountingSessionStore {
    inner: MemorySessionStore,
    pub creates: AtomicUsize,
    pub chunk_indices: Mutex<Vec<u32>>,
}

impl CountingSessionStore {
    pub fn new() -> Self {
        Self {
            inner: MemorySessionStore::new(),
            creates: AtomicUsize::new(0),
            chunk_indices: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SessionStore for CountingSessionStore {
    async fn create(&self, session: ChunkSession) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(session).await
    }

    async fn get(&self, session_id: &str) -> Result<Option<ChunkSession>> {
        self.inner.get(session_id).await
    }

    async fn put_chunk(&self, session_id: &str, index: u32, data: Bytes) -> Result<()> {
        self.chunk_indices.lock().unwrap().push(index);
        self.inner.put_chunk(session_id, index, data).await
    }

    async fn received_count(&self, session_id: &str) -> Result<u32> {
        self.inner.received_count(session_id).await
    }

    async fn assemble(&self, session_id: &str) -> Result<Bytes> {
        self.inner.assemble(session_id).await
    }

    async fn remove(&self, session_id: &str) -> Result<()> {
        self.inner.remove(session_id).await
    }
}

// =======================================================================
// Test environment
// =======================================================================

pub struct TestEnv {
    pub host: Arc<StubMediaHost>,
    pub store: Arc<StubMediaStore>,
    pub sessions: Arc<CountingSessionStore>,
    pub router: Router,
}

pub fn test_env() -> TestEnv {
    build_env(StubMediaHost::new(), StubMediaStore::new())
}

pub fn test_env_failing_store() -> TestEnv {
    build_env(StubMediaHost::new(), StubMediaStore::failing())
}

pub fn test_env_failing_host() -> TestEnv {
    build_env(StubMediaHost::failing(), StubMediaStore::new())
}

fn build_env(host: StubMediaHost, store: StubMediaStore) -> TestEnv {
    let host = Arc::new(host);
    let store = Arc::new(store);
    let sessions = Arc::new(CountingSessionStore::new());
    let state = ApiState {
        media_host: host.clone(),
        records: Some(store.clone()),
        sessions: sessions.clone(),
        folder_root: "montage".to_string(),
    };
    TestEnv {
        host,
        store,
        sessions,
        router: build_router(state),
    }
}

// =======================================================================
// Request plumbing
// =======================================================================

pub const BOUNDARY: &str = "montage-test-boundary";

#[derive(Default)]
pub struct MultipartBuilder {
    body: Vec<u8>,
}

impl MultipartBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, mime_type: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, name, file_name, mime_type
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        self.body
    }
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

pub fn post_multipart(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, multipart_content_type())
        .body(Body::from(body))
        .unwrap()
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn call(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    }
}
