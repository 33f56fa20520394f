//! Upload orchestrator
//!
//! Streams a local file to `<folder>/<file name>` and reports progress as a
//! percentage. Each upload gets its own session id and progress channel, so
//! concurrent uploads never overwrite each other's progress. The channel reads
//! 0 before the transfer starts and is reset to 0 once it settles.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::providers::{
    object_path, ProgressFn, ProviderError, StorageProvider, TransferProgressInfo,
};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("Upload task ended abnormally: {0}")]
    Aborted(String),
}

/// A local file selected for upload
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

impl LocalFile {
    /// Build from in-memory bytes; the content type is guessed from the name
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        let name = name.into();
        let content_type = mime_guess::from_path(&name)
            .first()
            .map(|m| m.essence_str().to_string());
        Self {
            name,
            data,
            content_type,
        }
    }

    /// Read a file from disk; the upload keeps its base name
    pub async fn open(path: &Path) -> Result<Self, UploadError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                UploadError::InvalidFile(format!("{} has no file name", path.display()))
            })?
            .to_string();
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| UploadError::InvalidFile(format!("{}: {}", path.display(), e)))?;
        Ok(Self::new(name, data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Terminal result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Download reference of the stored object
    pub url: String,
    /// Original file name
    pub name: String,
}

/// An upload currently in flight
#[derive(Debug, Clone)]
pub struct ActiveUpload {
    pub id: Uuid,
    pub name: String,
    pub progress: watch::Receiver<f64>,
}

/// Handle to one upload session
pub struct UploadHandle {
    id: Uuid,
    name: String,
    progress: watch::Receiver<f64>,
    join: JoinHandle<Result<UploadedFile, UploadError>>,
}

impl UploadHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Progress stream of this session, in percent
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.progress.clone()
    }

    /// Wait for the upload to settle
    pub async fn wait(self) -> Result<UploadedFile, UploadError> {
        self.join
            .await
            .map_err(|e| UploadError::Aborted(e.to_string()))?
    }
}

/// Drives uploads against the storage collaborator
#[derive(Clone)]
pub struct UploadOrchestrator {
    storage: Arc<dyn StorageProvider>,
    folder: String,
    sessions: Arc<RwLock<HashMap<Uuid, ActiveUpload>>>,
}

impl UploadOrchestrator {
    pub fn new(storage: Arc<dyn StorageProvider>, folder: &str) -> Self {
        Self {
            storage,
            folder: folder.trim_matches('/').to_string(),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Upload a file and wait for it.
    ///
    /// `None` returns immediately without touching progress or the backend.
    pub async fn upload(
        &self,
        file: Option<LocalFile>,
    ) -> Result<Option<UploadedFile>, UploadError> {
        let Some(file) = file else {
            return Ok(None);
        };
        self.start(file).await.wait().await.map(Some)
    }

    /// Start an upload in the background and return its session handle
    pub async fn start(&self, file: LocalFile) -> UploadHandle {
        let id = Uuid::new_v4();
        let name = file.name.clone();
        let (tx, progress) = watch::channel(0.0f64);
        let tx = Arc::new(tx);

        self.sessions.write().await.insert(
            id,
            ActiveUpload {
                id,
                name: name.clone(),
                progress: progress.clone(),
            },
        );

        let storage = self.storage.clone();
        let sessions = self.sessions.clone();
        let path = object_path(&self.folder, &file.name);

        let join = tokio::spawn(async move {
            debug!("Upload {} started: {} ({} bytes)", id, path, file.size());

            let reporter = tx.clone();
            let on_progress: ProgressFn = Box::new(move |sent: u64, total: u64| {
                let pct = TransferProgressInfo::new(sent, total).percentage;
                // Never move backwards while the transfer runs
                reporter.send_if_modified(|current| {
                    if pct > *current {
                        *current = pct;
                        true
                    } else {
                        false
                    }
                });
            });

            let result = storage
                .upload_resumable(&path, file.data, file.content_type.as_deref(), Some(on_progress))
                .await;

            tx.send_replace(0.0);
            sessions.write().await.remove(&id);

            match result {
                Ok(url) => {
                    info!("Upload {} finished: {}", id, path);
                    Ok(UploadedFile { url, name: file.name })
                }
                Err(e) => {
                    warn!("Upload {} failed: {}", id, e);
                    Err(UploadError::Provider(e))
                }
            }
        });

        UploadHandle {
            id,
            name,
            progress,
            join,
        }
    }

    /// Uploads currently in flight
    pub async fn active_sessions(&self) -> Vec<ActiveUpload> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Progress stream of an in-flight session
    pub async fn progress_of(&self, id: Uuid) -> Option<watch::Receiver<f64>> {
        self.sessions.read().await.get(&id).map(|s| s.progress.clone())
    }
}
