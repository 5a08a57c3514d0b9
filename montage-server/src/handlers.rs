use std::collections::HashMap;

use axum::body::Body;
use axum::extract::multipart::Field;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use montage_core::{ChunkSession, MediaRecord, UploadOptions};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::ApiState;

/// Direct uploads stay under the client's 100 MiB chunking threshold;
/// this bound only guards against runaway bodies.
pub const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub files: Vec<FileDescriptor>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub cloudinary_url: String,
    pub public_id: String,
    pub original_name: String,
    pub file_size: u64,
    pub file_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Null when metadata persistence was skipped or failed.
    pub supabase_id: Option<String>,
}

pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

pub async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method not allowed" })),
    )
}

// =======================================================================
// Direct upload
// =======================================================================

struct MediaPart {
    file_name: String,
    mime_type: Option<String>,
    data: Bytes,
}

pub async fn direct_upload(
    State(state): State<ApiState>,
    request: Request,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = read_multipart(request).await?;

    let mut fields: HashMap<String, String> = HashMap::new();
    let mut media: Option<MediaPart> = None;

    while let Some(field) = next_field(&mut multipart).await? {
        let name = field.name().unwrap_or_default().to_string();
        if field.file_name().is_some() {
            if name == "media" && media.is_none() {
                let file_name = field.file_name().unwrap_or("unknown").to_string();
                let mime_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("error reading file part: {}", e)))?;
                media = Some(MediaPart {
                    file_name,
                    mime_type,
                    data,
                });
            } else {
                // Only one media part is accepted; anything else is
                // drained so it never sits in memory.
                drain(field).await?;
            }
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(format!("error reading field: {}", e)))?;
            fields.insert(name, value);
        }
    }

    let media = media.ok_or_else(|| ApiError::BadRequest("No file provided".to_string()))?;
    if media.data.is_empty() {
        return Err(ApiError::BadRequest("Uploaded file is empty".to_string()));
    }
    let project_id = fields
        .get("projectId")
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ApiError::BadRequest("Missing projectId".to_string()))?;

    let user_email = fields.get("userEmail").filter(|v| !v.is_empty()).cloned();
    let chapter = fields
        .get("chapter")
        .or_else(|| fields.get("chapterName"))
        .filter(|v| !v.is_empty())
        .cloned();
    let chapter_style = fields.get("chapterStyle").and_then(|raw| parse_style(raw));

    let descriptor = publish(
        &state,
        media,
        Some(&project_id),
        user_email.as_deref(),
        chapter.as_deref(),
        chapter_style,
    )
    .await?;

    Ok(Json(UploadResponse {
        success: true,
        files: vec![descriptor],
    }))
}

// =======================================================================
// Chunked phases
// =======================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub file_name: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub file_type: Option<String>,
    pub total_chunks: u32,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub chapter: Option<String>,
    #[serde(default)]
    pub chapter_style: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub upload_id: String,
}

pub async fn init_upload(
    State(state): State<ApiState>,
    Json(request): Json<InitUploadRequest>,
) -> Result<Json<InitUploadResponse>, ApiError> {
    if request.total_chunks == 0 {
        return Err(ApiError::BadRequest(
            "totalChunks must be at least 1".to_string(),
        ));
    }

    let session = ChunkSession {
        session_id: Uuid::new_v4().to_string(),
        file_name: request.file_name,
        file_size: request.file_size,
        mime_type: request.file_type,
        total_chunks: request.total_chunks,
        project_id: request.project_id,
        user_email: request.user_email,
        chapter: request.chapter,
        chapter_style: request.chapter_style,
        created_at: Utc::now(),
    };
    let upload_id = session.session_id.clone();
    state.sessions.create(session).await?;

    Ok(Json(InitUploadResponse { upload_id }))
}

pub async fn upload_chunk(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut chunk: Option<Bytes> = None;

    while let Some(field) = next_field(&mut multipart).await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "chunk" {
            chunk = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("error reading chunk: {}", e)))?,
            );
        } else if field.file_name().is_some() {
            drain(field).await?;
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(format!("error reading field: {}", e)))?;
            fields.insert(name, value);
        }
    }

    let chunk = chunk.ok_or_else(|| ApiError::BadRequest("No chunk provided".to_string()))?;
    let upload_id = fields
        .get("uploadId")
        .cloned()
        .ok_or_else(|| ApiError::BadRequest("Missing uploadId".to_string()))?;
    let index: u32 = fields
        .get("chunkIndex")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing or invalid chunkIndex".to_string()))?;

    let session = state
        .sessions
        .get(&upload_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("unknown upload session: {}", upload_id)))?;

    if let Some(total) = fields.get("totalChunks").and_then(|v| v.parse::<u32>().ok()) {
        if total != session.total_chunks {
            return Err(ApiError::BadRequest(format!(
                "totalChunks mismatch: session declared {}",
                session.total_chunks
            )));
        }
    }
    if index >= session.total_chunks {
        return Err(ApiError::BadRequest(format!(
            "chunk index {} out of range for {} chunks",
            index, session.total_chunks
        )));
    }
    if chunk.is_empty() {
        return Err(ApiError::BadRequest("Uploaded chunk is empty".to_string()));
    }

    // A re-sent index overwrites the stored payload, so client
    // retries are harmless.
    state.sessions.put_chunk(&upload_id, index, chunk).await?;
    let received = state.sessions.received_count(&upload_id).await?;

    Ok(Json(json!({ "success": true, "received": received })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeUploadRequest {
    pub upload_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

pub async fn finalize_upload(
    State(state): State<ApiState>,
    Json(request): Json<FinalizeUploadRequest>,
) -> Result<Json<UploadResponse>, ApiError> {
    let session = state
        .sessions
        .get(&request.upload_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("unknown upload session: {}", request.upload_id))
        })?;

    let received = state.sessions.received_count(&request.upload_id).await?;
    if received != session.total_chunks {
        return Err(ApiError::BadRequest(format!(
            "Expected {} chunks, received {}",
            session.total_chunks, received
        )));
    }

    let data = state.sessions.assemble(&request.upload_id).await?;
    if data.is_empty() {
        return Err(ApiError::BadRequest("Assembled file is empty".to_string()));
    }

    let media = MediaPart {
        file_name: request
            .file_name
            .unwrap_or_else(|| session.file_name.clone()),
        mime_type: session.mime_type.clone(),
        data,
    };
    let descriptor = publish(
        &state,
        media,
        session.project_id.as_deref(),
        session.user_email.as_deref(),
        session.chapter.as_deref(),
        session.chapter_style.clone(),
    )
    .await?;

    if let Err(err) = state.sessions.remove(&request.upload_id).await {
        log::warn!(
            "failed to clean up upload session {}: {}",
            request.upload_id,
            err
        );
    }

    Ok(Json(UploadResponse {
        success: true,
        files: vec![descriptor],
    }))
}

// =======================================================================
// Shared publish path: media host, then best-effort metadata
// =======================================================================

async fn publish(
    state: &ApiState,
    media: MediaPart,
    project_id: Option<&str>,
    user_email: Option<&str>,
    chapter: Option<&str>,
    chapter_style: Option<Value>,
) -> Result<FileDescriptor, ApiError> {
    let folder = format!(
        "{}/{}/{}",
        state.folder_root,
        project_id.unwrap_or("unassigned"),
        chapter.unwrap_or("general")
    );
    let public_id = derive_public_id(&media.file_name, Utc::now().timestamp_millis());

    // Without a hosted URL there is nothing to persist or return, so
    // a media-host failure is fatal to the request.
    let hosted = state
        .media_host
        .upload(
            media.data.clone(),
            UploadOptions {
                file_name: media.file_name.clone(),
                mime_type: media.mime_type.clone(),
                folder,
                public_id,
            },
        )
        .await
        .map_err(|e| ApiError::Internal {
            message: e.to_string(),
            details: None,
        })?;

    let record_id = match (&state.records, project_id, user_email) {
        (Some(store), Some(project_id), Some(user_email)) => {
            let now = Utc::now();
            let record = MediaRecord {
                id: None,
                project_id: project_id.to_string(),
                user_email: user_email.to_string(),
                file_name: media.file_name.clone(),
                file_type: hosted.kind,
                file_size: hosted.bytes,
                cloudinary_url: hosted.secure_url.clone(),
                chapter: chapter.map(str::to_string),
                chapter_style,
                duration: hosted.duration,
                resolution: match (hosted.width, hosted.height) {
                    (Some(w), Some(h)) => Some(format!("{}x{}", w, h)),
                    _ => None,
                },
                created_at: now,
                updated_at: now,
            };
            match store.insert(record).await {
                Ok(id) => Some(id),
                Err(err) => {
                    // The asset is already hosted; losing the metadata
                    // row must not fail the request.
                    log::error!("metadata insert failed: {}", err);
                    None
                }
            }
        }
        _ => None,
    };

    Ok(FileDescriptor {
        cloudinary_url: hosted.secure_url,
        public_id: hosted.public_id,
        original_name: media.file_name,
        file_size: hosted.bytes,
        file_type: hosted.kind.as_str().to_string(),
        width: hosted.width,
        height: hosted.height,
        duration: hosted.duration,
        supabase_id: record_id,
    })
}

// =======================================================================
// Multipart plumbing
// =======================================================================

async fn read_multipart(request: Request) -> Result<Multipart, ApiError> {
    let (parts, body) = request.into_parts();
    let raw = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::BadRequest(format!("unreadable request body: {}", e)))?;
    if raw.is_empty() {
        return Err(ApiError::BadRequest("No body provided".to_string()));
    }
    let decoded = decode_transport_body(raw);
    let request = Request::from_parts(parts, Body::from(decoded));
    Multipart::from_request(request, &())
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Some transports deliver the body base64-encoded. A multipart body
/// always begins with the `--` boundary marker, so anything else that
/// decodes cleanly back to one is treated as base64.
fn decode_transport_body(raw: Bytes) -> Bytes {
    if raw.starts_with(b"--") {
        return raw;
    }
    let compact: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    match BASE64.decode(&compact) {
        Ok(decoded) if decoded.starts_with(b"--") => Bytes::from(decoded),
        _ => raw,
    }
}

async fn next_field<'a>(multipart: &'a mut Multipart) -> Result<Option<Field<'a>>, ApiError> {
    multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("error parsing form data: {}", e)))
}

async fn drain(mut field: Field<'_>) -> Result<(), ApiError> {
    while field
        .chunk()
        .await
        .map_err(|e| ApiError::BadRequest(format!("error draining field: {}", e)))?
        .is_some()
    {}
    Ok(())
}

/// Malformed style payloads are dropped, never fatal.
fn parse_style(raw: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.is_object() => Some(value),
        _ => {
            log::warn!("ignoring malformed chapterStyle payload");
            None
        }
    }
}

fn derive_public_id(file_name: &str, timestamp_ms: i64) -> String {
    let stem = std::path::Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let safe = sanitize_filename::sanitize(stem);
    let safe = if safe.is_empty() {
        "file".to_string()
    } else {
        safe
    };
    format!("{}-{}", timestamp_ms, safe)
}
