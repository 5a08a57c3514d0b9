use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Client};
use serde_json::Value;

use crate::errors::{MontageError, Result};
use crate::models::MediaKind;

/// Placement of one asset on the media host.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub file_name: String,
    pub mime_type: Option<String>,
    /// Folder path namespacing assets per project and chapter.
    pub folder: String,
    /// Collision-free name, timestamp plus sanitized original stem.
    pub public_id: String,
}

/// What the media host reports back for a stored asset.
#[derive(Debug, Clone)]
pub struct HostedMedia {
    pub secure_url: String,
    pub public_id: String,
    pub bytes: u64,
    pub kind: MediaKind,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<f64>,
}

/// The external service that stores and transcodes the actual bytes.
/// Injected into the endpoint so tests can substitute a fake.
#[async_trait]
pub trait MediaHost: Send + Sync {
    async fn upload(&self, data: Bytes, opts: UploadOptions) -> Result<HostedMedia>;
}

/// HTTP client for a Cloudinary-style upload API: one multipart POST,
/// JSON body back with the durable URL and asset attributes.
pub struct HttpMediaHost {
    client: Client,
    upload_url: String,
    api_key: Option<String>,
}

impl HttpMediaHost {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let base = base_url.into();
        Self {
            client: Client::new(),
            upload_url: format!("{}/upload", base.trim_end_matches('/')),
            api_key,
        }
    }
}

#[async_trait]
impl MediaHost for HttpMediaHost {
    async fn upload(&self, data: Bytes, opts: UploadOptions) -> Result<HostedMedia> {
        let fallback_size = data.len() as u64;
        let fallback_kind = MediaKind::from_mime(opts.mime_type.as_deref());

        let mut part = multipart::Part::bytes(data.to_vec()).file_name(opts.file_name.clone());
        if let Some(mime_type) = &opts.mime_type {
            part = part.mime_str(mime_type)?;
        }

        let mut form = multipart::Form::new()
            .part("file", part)
            .text("folder", opts.folder.clone())
            .text("public_id", opts.public_id.clone())
            .text("resource_type", "auto");
        if let Some(key) = &self.api_key {
            form = form.text("api_key", key.clone());
        }

        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(MontageError::MediaHostError(format!(
                "upload rejected ({}): {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        let json: Value = response.json().await?;

        let secure_url = json["secure_url"]
            .as_str()
            .or_else(|| json["url"].as_str())
            .ok_or_else(|| MontageError::MediaHostError("no URL in response".to_string()))?
            .to_string();
        let public_id = json["public_id"]
            .as_str()
            .unwrap_or(&opts.public_id)
            .to_string();
        let kind = match json["resource_type"].as_str() {
            Some("image") => MediaKind::Image,
            Some("video") => MediaKind::Video,
            _ => fallback_kind,
        };

        Ok(HostedMedia {
            secure_url,
            public_id,
            bytes: json["bytes"].as_u64().unwrap_or(fallback_size),
            kind,
            width: json["width"].as_u64().map(|w| w as u32),
            height: json["height"].as_u64().map(|h| h as u32),
            duration: json["duration"].as_f64(),
        })
    }
}
