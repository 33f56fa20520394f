//! File registry
//!
//! The dashboard's model: enumerates the vault folder, resolves a download
//! reference and metadata for every object, and offers search, preview,
//! download, delete and upload on top of that snapshot. The remote folder is
//! the source of truth; every mutation is followed by a full re-enumeration.

use futures_util::future::join_all;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::format::{format_file_size, format_upload_date};
use crate::providers::{object_path, ObjectRef, ProgressFn, ProviderError, StorageProvider};
use crate::upload::{LocalFile, UploadError, UploadOrchestrator, UploadedFile};

pub const DELETE_PROMPT: &str = "Are you sure you want to delete this file?";
pub const PREVIEW_UNAVAILABLE: &str = "Preview not available for this file type";
const NO_MATCHES: &str = "No files found matching your search.";
const NO_FILES: &str = "No files uploaded yet.";

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to fetch files: {0}")]
    List(#[source] ProviderError),

    #[error("Failed to upload file: {0}")]
    Upload(#[source] UploadError),

    #[error("Failed to delete file: {0}")]
    Delete(#[source] ProviderError),

    #[error("Failed to download file: {0}")]
    Download(#[source] ProviderError),

    #[error("No file named {0}")]
    UnknownFile(String),
}

/// One entry of the listing as the dashboard shows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub url: String,
    /// Formatted size (`"2 KB"`)
    pub size: String,
    pub bytes: u64,
    pub content_type: Option<String>,
    /// Formatted creation date, empty when unknown
    pub upload_date: String,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl RemoteFile {
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|t| t.starts_with("image/"))
    }
}

/// What the preview overlay renders
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preview {
    Image { name: String, url: String },
    Unavailable { name: String },
}

impl Preview {
    pub fn name(&self) -> &str {
        match self {
            Preview::Image { name, .. } | Preview::Unavailable { name } => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

/// Transient user notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn success(message: &str) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.to_string(),
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.to_string(),
        }
    }
}

/// Interactive yes/no confirmation
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    files: Vec<RemoteFile>,
    search_term: String,
    notices: VecDeque<Notice>,
}

/// Dashboard model over one remote folder
pub struct FileRegistry {
    storage: Arc<dyn StorageProvider>,
    uploader: UploadOrchestrator,
    folder: String,
    state: RwLock<RegistryState>,
    uploading: AtomicBool,
    /// Progress of the upload this registry is running, if any
    current_upload: watch::Sender<Option<watch::Receiver<f64>>>,
}

/// Re-enables the upload control when the upload ends, however it ends
struct UploadGuard<'a> {
    flag: &'a AtomicBool,
    current: &'a watch::Sender<Option<watch::Receiver<f64>>>,
}

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        self.current.send_replace(None);
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl FileRegistry {
    pub fn new(storage: Arc<dyn StorageProvider>, folder: &str) -> Self {
        let folder = folder.trim_matches('/').to_string();
        let (current_upload, _) = watch::channel(None);
        Self {
            uploader: UploadOrchestrator::new(storage.clone(), &folder),
            storage,
            folder,
            state: RwLock::new(RegistryState::default()),
            uploading: AtomicBool::new(false),
            current_upload,
        }
    }

    /// Where the files live, e.g. `gs://bucket/files`
    pub fn location(&self) -> String {
        format!("{}/{}", self.storage.display_name(), self.folder)
    }

    /// Re-enumerate the folder.
    ///
    /// Objects whose URL or metadata cannot be resolved are left out. When the
    /// listing itself fails the snapshot becomes empty.
    pub async fn refresh(&self) -> Result<usize, RegistryError> {
        let objects = match self.storage.list(&self.folder).await {
            Ok(objects) => objects,
            Err(e) => {
                error!("Error fetching files: {}", e);
                let mut state = self.state.write().await;
                state.files.clear();
                state.notices.push_back(Notice::error("Failed to fetch files"));
                return Err(RegistryError::List(e));
            }
        };

        let resolved = join_all(objects.iter().map(|object| self.resolve(object))).await;
        let files: Vec<RemoteFile> = resolved.into_iter().flatten().collect();

        debug!(
            "Listed {} of {} objects in {}",
            files.len(),
            objects.len(),
            self.folder
        );
        let count = files.len();
        self.state.write().await.files = files;
        Ok(count)
    }

    async fn resolve(&self, object: &ObjectRef) -> Option<RemoteFile> {
        let fetched = futures_util::try_join!(
            self.storage.download_url(object),
            self.storage.metadata(object)
        );

        match fetched {
            Ok((url, metadata)) => Some(RemoteFile {
                name: object.name.clone(),
                url,
                size: format_file_size(metadata.size),
                bytes: metadata.size,
                content_type: metadata.content_type,
                upload_date: format_upload_date(metadata.created_at),
                created_at: metadata.created_at,
            }),
            Err(e) => {
                warn!("Error fetching file {}: {}", object.name, e);
                None
            }
        }
    }

    /// Full snapshot from the last refresh
    pub async fn files(&self) -> Vec<RemoteFile> {
        self.state.read().await.files.clone()
    }

    /// Set the search term; filtering never touches the backend
    pub async fn search(&self, term: &str) {
        self.state.write().await.search_term = term.to_string();
    }

    /// Snapshot entries whose name contains the search term, ignoring case
    pub async fn filtered(&self) -> Vec<RemoteFile> {
        let state = self.state.read().await;
        filter_by_name(&state.files, &state.search_term)
    }

    /// Placeholder text for an empty filtered view
    pub async fn empty_message(&self) -> &'static str {
        if self.state.read().await.search_term.is_empty() {
            NO_FILES
        } else {
            NO_MATCHES
        }
    }

    /// Drain pending notifications
    pub async fn take_notices(&self) -> Vec<Notice> {
        self.state.write().await.notices.drain(..).collect()
    }

    async fn notify(&self, notice: Notice) {
        self.state.write().await.notices.push_back(notice);
    }

    async fn find(&self, name: &str) -> Option<RemoteFile> {
        self.state
            .read()
            .await
            .files
            .iter()
            .find(|f| f.name == name)
            .cloned()
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::SeqCst)
    }

    /// Follow the upload this registry runs: `Some(progress)` while one is in
    /// flight, `None` otherwise
    pub fn subscribe_uploads(&self) -> watch::Receiver<Option<watch::Receiver<f64>>> {
        self.current_upload.subscribe()
    }

    /// Upload a file, then re-enumerate whatever the outcome.
    ///
    /// Returns `Ok(None)` without doing anything when no file is given or
    /// another upload from this registry is still running.
    pub async fn upload(
        &self,
        file: Option<LocalFile>,
    ) -> Result<Option<UploadedFile>, RegistryError> {
        let Some(file) = file else {
            return Ok(None);
        };
        if self.uploading.swap(true, Ordering::SeqCst) {
            debug!("Upload of {} ignored, another upload is running", file.name);
            return Ok(None);
        }
        let _guard = UploadGuard {
            flag: &self.uploading,
            current: &self.current_upload,
        };

        let handle = self.uploader.start(file).await;
        self.current_upload.send_replace(Some(handle.progress()));
        let result = handle.wait().await;

        // A failed refresh already queued its own notice
        let _ = self.refresh().await;

        match result {
            Ok(uploaded) => {
                info!("Uploaded {}", uploaded.name);
                self.notify(Notice::success("File uploaded successfully!")).await;
                Ok(Some(uploaded))
            }
            Err(e) => {
                error!("Error uploading file: {}", e);
                self.notify(Notice::error("Failed to upload file")).await;
                Err(RegistryError::Upload(e))
            }
        }
    }

    /// Delete a file after confirmation.
    ///
    /// Returns `Ok(false)` when the user declines. On failure the current
    /// snapshot is kept.
    pub async fn delete(&self, name: &str, confirm: &dyn Confirm) -> Result<bool, RegistryError> {
        if !confirm.confirm(DELETE_PROMPT) {
            debug!("Delete of {} cancelled", name);
            return Ok(false);
        }

        let path = object_path(&self.folder, name);
        if let Err(e) = self.storage.delete(&path).await {
            error!("Error deleting file: {}", e);
            self.notify(Notice::error("Failed to delete file")).await;
            return Err(RegistryError::Delete(e));
        }

        let _ = self.refresh().await;
        self.notify(Notice::success("File deleted successfully!")).await;
        Ok(true)
    }

    /// Preview of a listed file
    pub async fn preview(&self, name: &str) -> Result<Preview, RegistryError> {
        let file = self
            .find(name)
            .await
            .ok_or_else(|| RegistryError::UnknownFile(name.to_string()))?;
        Ok(if file.is_image() {
            Preview::Image {
                name: file.name,
                url: file.url,
            }
        } else {
            Preview::Unavailable { name: file.name }
        })
    }

    /// Save a listed file to `dest`
    pub async fn download(
        &self,
        name: &str,
        dest: &Path,
        on_progress: Option<ProgressFn>,
    ) -> Result<u64, RegistryError> {
        if self.find(name).await.is_none() {
            return Err(RegistryError::UnknownFile(name.to_string()));
        }
        let path = object_path(&self.folder, name);
        self.storage
            .download_to_file(&path, dest, on_progress)
            .await
            .map_err(RegistryError::Download)
    }
}

/// Case-insensitive substring filter over names
pub fn filter_by_name(files: &[RemoteFile], term: &str) -> Vec<RemoteFile> {
    let needle = term.to_lowercase();
    files
        .iter()
        .filter(|f| f.name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}
