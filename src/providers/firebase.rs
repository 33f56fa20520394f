//! Firebase Cloud Storage Provider
//!
//! Implements StorageProvider on the Firebase Storage REST API (v0), the same
//! endpoints the web SDK talks to. Requests are authorized with the id token
//! of the signed-in user (`Authorization: Firebase <token>`).

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::ExposeSecret;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{
    ObjectMetadata, ObjectRef, ProgressFn, ProviderError, ProviderType, StorageProvider,
    TokenSource,
};
use crate::config::{AppConfig, UPLOAD_CHUNK_ALIGNMENT};

/// Firebase Storage configuration
#[derive(Debug, Clone)]
pub struct FirebaseStorageConfig {
    /// Base URL (`https://firebasestorage.googleapis.com` or an emulator)
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Bytes per resumable upload request, a multiple of 256 KiB
    pub chunk_size: usize,
}

impl FirebaseStorageConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let bucket = config
            .storage_bucket
            .trim()
            .trim_start_matches("gs://")
            .trim_end_matches('/')
            .to_string();
        if bucket.is_empty() {
            return Err(ProviderError::InvalidConfig("Storage bucket is required".to_string()));
        }
        Ok(Self {
            endpoint: config.storage_endpoint.trim_end_matches('/').to_string(),
            bucket,
            chunk_size: aligned_chunk_size(config.upload_chunk_size),
        })
    }
}

/// Round a chunk size up to the resumable upload granularity
fn aligned_chunk_size(requested: usize) -> usize {
    let chunks = requested.div_ceil(UPLOAD_CHUNK_ALIGNMENT).max(1);
    chunks * UPLOAD_CHUNK_ALIGNMENT
}

/// Object resource as returned by the metadata and upload endpoints
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirebaseObject {
    name: String,
    #[serde(default, deserialize_with = "de_size")]
    size: u64,
    content_type: Option<String>,
    time_created: Option<String>,
    /// Comma separated list of download tokens
    download_tokens: Option<String>,
}

impl FirebaseObject {
    fn first_token(&self) -> Option<&str> {
        self.download_tokens
            .as_deref()?
            .split(',')
            .map(str::trim)
            .find(|t| !t.is_empty())
    }

    fn to_metadata(&self) -> ObjectMetadata {
        ObjectMetadata {
            size: self.size,
            content_type: self.content_type.clone().filter(|c| !c.is_empty()),
            created_at: self
                .time_created
                .as_deref()
                .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&chrono::Utc)),
        }
    }
}

/// Sizes arrive as decimal strings; accept plain numbers too
fn de_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Text(String),
        Number(u64),
    }

    match Option::<Size>::deserialize(deserializer)? {
        Some(Size::Text(s)) => s.trim().parse().map_err(serde::de::Error::custom),
        Some(Size::Number(n)) => Ok(n),
        None => Ok(0),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    /// Full object path
    name: String,
}

/// Firebase Cloud Storage provider
pub struct FirebaseStorage {
    config: FirebaseStorageConfig,
    tokens: Arc<dyn TokenSource>,
    client: reqwest::Client,
}

impl FirebaseStorage {
    pub fn new(config: FirebaseStorageConfig, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            config,
            tokens,
            client: reqwest::Client::new(),
        }
    }

    /// `.../v0/b/<bucket>/o`
    fn objects_url(&self) -> String {
        format!(
            "{}/v0/b/{}/o",
            self.config.endpoint,
            urlencoding::encode(&self.config.bucket)
        )
    }

    /// `.../v0/b/<bucket>/o/<url-encoded path>`; slashes must be encoded
    fn object_url(&self, path: &str) -> String {
        format!("{}/{}", self.objects_url(), urlencoding::encode(path))
    }

    /// Attach the id token, if signed in
    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, ProviderError> {
        match self.tokens.id_token().await? {
            Some(token) => {
                let value = HeaderValue::from_str(&format!("Firebase {}", token.expose_secret()))
                    .map_err(|e| ProviderError::Other(format!("Invalid token: {}", e)))?;
                Ok(request.header(AUTHORIZATION, value))
            }
            None => Ok(request),
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self.authorize(request).await?.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, context, &text));
        }
        Ok(response)
    }

    async fn get_object(&self, path: &str) -> Result<FirebaseObject, ProviderError> {
        let response = self.send(self.client.get(self.object_url(path)), path).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(format!("metadata of {}: {}", path, e)))
    }

    fn download_url_for(&self, object: &FirebaseObject) -> Result<String, ProviderError> {
        let token = object.first_token().ok_or_else(|| {
            ProviderError::NotFound(format!("{} has no download token", object.name))
        })?;
        Ok(format!(
            "{}?alt=media&token={}",
            self.object_url(&object.name),
            urlencoding::encode(token)
        ))
    }

    /// Open a resumable upload session and return its upload URL
    async fn start_upload(
        &self,
        path: &str,
        total: u64,
        content_type: &str,
    ) -> Result<String, ProviderError> {
        let url = format!("{}?name={}", self.objects_url(), urlencoding::encode(path));
        let body = serde_json::json!({
            "name": path,
            "contentType": content_type,
        });

        let request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", total.to_string())
            .header("X-Goog-Upload-Header-Content-Type", content_type)
            .body(body.to_string());

        let response = self.send(request, path).await?;
        let upload_url = response
            .headers()
            .get("X-Goog-Upload-URL")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProviderError::TransferFailed("Upload session URL missing".to_string()))?
            .to_string();

        debug!("Resumable upload session opened for {}", path);
        Ok(upload_url)
    }
}

#[async_trait]
impl StorageProvider for FirebaseStorage {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Firebase
    }

    fn display_name(&self) -> String {
        format!("gs://{}", self.config.bucket)
    }

    async fn list(&self, folder: &str) -> Result<Vec<ObjectRef>, ProviderError> {
        let prefix = format!("{}/", folder.trim_matches('/'));
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}?prefix={}&delimiter=%2F",
                self.objects_url(),
                urlencoding::encode(&prefix)
            );
            if let Some(ref token) = page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }

            let response = self.send(self.client.get(&url), folder).await?;
            let page: ListResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::ParseError(format!("listing of {}: {}", folder, e)))?;

            objects.extend(page.items.into_iter().filter_map(|item| {
                let name = item.name.strip_prefix(&prefix)?.to_string();
                (!name.is_empty()).then_some(ObjectRef {
                    name,
                    full_path: item.name,
                })
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Listed {} objects under {}", objects.len(), prefix);
        Ok(objects)
    }

    async fn download_url(&self, object: &ObjectRef) -> Result<String, ProviderError> {
        let resource = self.get_object(&object.full_path).await?;
        self.download_url_for(&resource)
    }

    async fn metadata(&self, object: &ObjectRef) -> Result<ObjectMetadata, ProviderError> {
        Ok(self.get_object(&object.full_path).await?.to_metadata())
    }

    async fn upload_resumable(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
        on_progress: Option<ProgressFn>,
    ) -> Result<String, ProviderError> {
        let total = data.len() as u64;
        let content_type = content_type.unwrap_or("application/octet-stream");
        let upload_url = self.start_upload(path, total, content_type).await?;

        let chunk_size = self.config.chunk_size;
        let mut offset = 0usize;

        // An empty file still needs one finalize request
        let finished: FirebaseObject = loop {
            let end = std::cmp::min(offset + chunk_size, data.len());
            let is_last = end >= data.len();
            let command = if is_last { "upload, finalize" } else { "upload" };

            let request = self
                .client
                .post(&upload_url)
                .header("X-Goog-Upload-Protocol", "resumable")
                .header("X-Goog-Upload-Command", command)
                .header("X-Goog-Upload-Offset", offset.to_string())
                .body(data[offset..end].to_vec());

            let response = self.send(request, path).await.map_err(|e| match e {
                ProviderError::NetworkError(msg) | ProviderError::ServerError(msg) => {
                    ProviderError::TransferFailed(msg)
                }
                other => other,
            })?;

            offset = end;
            if let Some(ref progress) = on_progress {
                progress(offset as u64, total);
            }

            if is_last {
                break response
                    .json()
                    .await
                    .map_err(|e| ProviderError::ParseError(format!("upload of {}: {}", path, e)))?;
            }
        };

        info!("Uploaded {} ({} bytes)", path, total);

        // Some backends only mint the download token on first metadata read
        match self.download_url_for(&finished) {
            Ok(url) => Ok(url),
            Err(_) => self.download_url(&ObjectRef {
                name: path.rsplit('/').next().unwrap_or(path).to_string(),
                full_path: path.to_string(),
            })
            .await,
        }
    }

    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        self.send(self.client.delete(self.object_url(path)), path).await?;
        info!("Deleted {}", path);
        Ok(())
    }

    async fn download_to_file(
        &self,
        path: &str,
        local_path: &Path,
        on_progress: Option<ProgressFn>,
    ) -> Result<u64, ProviderError> {
        let url = format!("{}?alt=media", self.object_url(path));
        let response = self.send(self.client.get(&url), path).await?;
        let total = response.content_length().unwrap_or(0);

        let mut file = tokio::fs::File::create(local_path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ProviderError::TransferFailed(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if let Some(ref progress) = on_progress {
                progress(written, total.max(written));
            }
        }
        file.flush().await?;

        info!("Downloaded {} to {:?} ({} bytes)", path, local_path, written);
        Ok(written)
    }
}
