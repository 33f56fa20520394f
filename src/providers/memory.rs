//! In-process backend
//!
//! Implements both collaborators on top of in-memory maps. Used by the test
//! suites and by `--backend memory` for offline demos. Failure injection hooks
//! let tests exercise every error path of the orchestration layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use super::{
    AuthProvider, Identity, ObjectMetadata, ObjectRef, ProgressFn, ProviderError, ProviderType,
    StorageProvider,
};

/// Account registered by the memory backend created through the factory
pub const DEMO_EMAIL: &str = "demo@quantumvault.local";
pub const DEMO_PASSWORD: &str = "demo-password";

/// Bytes per simulated transfer step
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// In-memory auth service
pub struct MemoryAuth {
    /// email -> (uid, password)
    accounts: Mutex<HashMap<String, (String, String)>>,
    identity: watch::Sender<Option<Identity>>,
    sign_in_calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryAuth {
    pub fn new() -> Self {
        let (identity, _) = watch::channel(None);
        Self {
            accounts: Mutex::new(HashMap::new()),
            identity,
            sign_in_calls: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Register an account
    pub fn register(&self, email: &str, password: &str) {
        let uid = uuid::Uuid::new_v4().simple().to_string();
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.insert(email.to_string(), (uid, password.to_string()));
        }
    }

    /// Make every sign-in fail as if the service were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of sign-in requests received
    pub fn sign_in_calls(&self) -> usize {
        self.sign_in_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Memory
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, ProviderError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProviderError::NetworkError("auth service unavailable".to_string()));
        }

        let account = self
            .accounts
            .lock()
            .map_err(|_| ProviderError::Other("account table poisoned".to_string()))?
            .get(email)
            .cloned();

        match account {
            Some((uid, expected)) if expected == password => {
                let identity = Identity {
                    uid,
                    email: email.to_string(),
                };
                self.identity.send_replace(Some(identity.clone()));
                info!("Signed in {}", email);
                Ok(identity)
            }
            Some(_) => Err(ProviderError::AuthenticationFailed("INVALID_PASSWORD".to_string())),
            None => Err(ProviderError::AuthenticationFailed("EMAIL_NOT_FOUND".to_string())),
        }
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.identity.send_replace(None);
        Ok(())
    }

    fn current_identity(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    fn watch_identity(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.subscribe()
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: Option<String>,
    created_at: DateTime<Utc>,
    token: String,
}

/// In-memory object store
///
/// Objects are kept in path order, which is also the listing order.
pub struct MemoryStorage {
    bucket: String,
    objects: RwLock<BTreeMap<String, StoredObject>>,
    chunk_size: usize,
    fail_list: AtomicBool,
    fail_upload: AtomicBool,
    fail_delete: AtomicBool,
    fail_metadata: Mutex<HashSet<String>>,
    list_calls: AtomicUsize,
    upload_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MemoryStorage {
    pub fn new(bucket: &str) -> Self {
        let bucket = if bucket.is_empty() { "memory" } else { bucket };
        Self {
            bucket: bucket.to_string(),
            objects: RwLock::new(BTreeMap::new()),
            chunk_size: DEFAULT_CHUNK_SIZE,
            fail_list: AtomicBool::new(false),
            fail_upload: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_metadata: Mutex::new(HashSet::new()),
            list_calls: AtomicUsize::new(0),
            upload_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Bytes per simulated transfer step (at least 1)
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Store an object directly, bypassing the upload path
    pub async fn insert(&self, path: &str, data: Vec<u8>, content_type: Option<&str>) {
        let object = StoredObject {
            data,
            content_type: content_type.map(str::to_string),
            created_at: Utc::now(),
            token: uuid::Uuid::new_v4().to_string(),
        };
        self.objects.write().await.insert(path.to_string(), object);
    }

    /// Raw contents of an object
    pub async fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(path).map(|o| o.data.clone())
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_upload(&self, fail: bool) {
        self.fail_upload.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Make metadata lookups of one object path fail
    pub fn fail_metadata_for(&self, path: &str) {
        if let Ok(mut set) = self.fail_metadata.lock() {
            set.insert(path.to_string());
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn metadata_blocked(&self, path: &str) -> bool {
        self.fail_metadata
            .lock()
            .map(|set| set.contains(path))
            .unwrap_or(false)
    }

    async fn get(&self, path: &str) -> Result<StoredObject, ProviderError> {
        self.objects
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(path.to_string()))
    }

    fn url_for(&self, path: &str, token: &str) -> String {
        format!(
            "memory://{}/{}?token={}",
            self.bucket,
            urlencoding::encode(path),
            token
        )
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Memory
    }

    fn display_name(&self) -> String {
        format!("memory://{}", self.bucket)
    }

    async fn list(&self, folder: &str) -> Result<Vec<ObjectRef>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if self.fail_list.load(Ordering::SeqCst) {
            return Err(ProviderError::ServerError("listing unavailable".to_string()));
        }

        let prefix = format!("{}/", folder.trim_matches('/'));
        let objects = self.objects.read().await;
        Ok(objects
            .keys()
            .filter_map(|path| {
                let name = path.strip_prefix(&prefix)?;
                (!name.is_empty() && !name.contains('/')).then(|| ObjectRef {
                    name: name.to_string(),
                    full_path: path.clone(),
                })
            })
            .collect())
    }

    async fn download_url(&self, object: &ObjectRef) -> Result<String, ProviderError> {
        tokio::task::yield_now().await;
        let stored = self.get(&object.full_path).await?;
        Ok(self.url_for(&object.full_path, &stored.token))
    }

    async fn metadata(&self, object: &ObjectRef) -> Result<ObjectMetadata, ProviderError> {
        tokio::task::yield_now().await;
        if self.metadata_blocked(&object.full_path) {
            return Err(ProviderError::PermissionDenied(object.full_path.clone()));
        }
        let stored = self.get(&object.full_path).await?;
        Ok(ObjectMetadata {
            size: stored.data.len() as u64,
            content_type: stored.content_type,
            created_at: Some(stored.created_at),
        })
    }

    async fn upload_resumable(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
        on_progress: Option<ProgressFn>,
    ) -> Result<String, ProviderError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        let total = data.len() as u64;
        let mut sent = 0u64;

        for chunk in data.chunks(self.chunk_size) {
            tokio::task::yield_now().await;
            if self.fail_upload.load(Ordering::SeqCst) {
                return Err(ProviderError::TransferFailed(format!(
                    "upload of {} interrupted at {} bytes",
                    path, sent
                )));
            }
            sent += chunk.len() as u64;
            if let Some(ref progress) = on_progress {
                progress(sent, total);
            }
        }

        if data.is_empty() {
            if self.fail_upload.load(Ordering::SeqCst) {
                return Err(ProviderError::TransferFailed(format!("upload of {} rejected", path)));
            }
            if let Some(ref progress) = on_progress {
                progress(0, 0);
            }
        }

        let token = uuid::Uuid::new_v4().to_string();
        let object = StoredObject {
            data,
            content_type: content_type.map(str::to_string),
            created_at: Utc::now(),
            token: token.clone(),
        };
        self.objects.write().await.insert(path.to_string(), object);
        debug!("Stored {} ({} bytes)", path, total);

        Ok(self.url_for(path, &token))
    }

    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(ProviderError::PermissionDenied(path.to_string()));
        }

        self.objects
            .write()
            .await
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(path.to_string()))
    }

    async fn download_to_file(
        &self,
        path: &str,
        local_path: &Path,
        on_progress: Option<ProgressFn>,
    ) -> Result<u64, ProviderError> {
        let stored = self.get(path).await?;
        tokio::fs::write(local_path, &stored.data).await?;
        let total = stored.data.len() as u64;
        if let Some(ref progress) = on_progress {
            progress(total, total);
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_auth_sign_in_and_out() {
        let auth = MemoryAuth::new();
        auth.register("user@example.com", "secret");
        let mut rx = auth.watch_identity();

        assert!(auth.sign_in("user@example.com", "wrong").await.is_err());
        assert!(auth.sign_in("nobody@example.com", "secret").await.is_err());
        assert!(auth.current_identity().is_none());

        let identity = auth.sign_in("user@example.com", "secret").await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref(), Some(&identity));

        auth.sign_out().await.unwrap();
        assert!(auth.current_identity().is_none());
        assert_eq!(auth.sign_in_calls(), 3);
    }

    #[tokio::test]
    async fn test_memory_list_only_direct_children() {
        let storage = MemoryStorage::new("bucket");
        storage.insert("files/b.txt", b"b".to_vec(), Some("text/plain")).await;
        storage.insert("files/a.png", b"a".to_vec(), Some("image/png")).await;
        storage.insert("files/sub/c.txt", b"c".to_vec(), None).await;
        storage.insert("other/d.txt", b"d".to_vec(), None).await;

        let names: Vec<String> = storage
            .list("files")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.name)
            .collect();
        assert_eq!(names, vec!["a.png", "b.txt"]);
    }

    #[tokio::test]
    async fn test_memory_upload_reports_progress_and_overwrites() {
        let storage = MemoryStorage::new("bucket").with_chunk_size(4);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        storage
            .upload_resumable(
                "files/n.bin",
                vec![0u8; 10],
                None,
                Some(Box::new(move |sent, total| {
                    sink.lock().unwrap().push((sent, total));
                })),
            )
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(4, 10), (8, 10), (10, 10)]);

        storage
            .upload_resumable("files/n.bin", vec![1u8; 3], None, None)
            .await
            .unwrap();
        assert_eq!(storage.list("files").await.unwrap().len(), 1);
        assert_eq!(storage.contents("files/n.bin").await.unwrap(), vec![1u8; 3]);
    }

    #[tokio::test]
    async fn test_memory_failure_injection() {
        let storage = MemoryStorage::new("bucket");
        storage.insert("files/a.txt", b"a".to_vec(), None).await;

        storage.fail_metadata_for("files/a.txt");
        let object = ObjectRef::new("files", "a.txt");
        assert!(storage.metadata(&object).await.is_err());
        assert!(storage.download_url(&object).await.is_ok());

        storage.set_fail_list(true);
        assert!(storage.list("files").await.is_err());

        storage.set_fail_delete(true);
        assert!(storage.delete("files/a.txt").await.is_err());
        assert!(storage.contents("files/a.txt").await.is_some());

        storage.set_fail_delete(false);
        storage.delete("files/a.txt").await.unwrap();
        assert!(matches!(
            storage.delete("files/a.txt").await,
            Err(ProviderError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_download_to_file() {
        let storage = MemoryStorage::new("bucket");
        storage.insert("files/a.txt", b"hello".to_vec(), None).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.txt");

        let written = storage.download_to_file("files/a.txt", &dest, None).await.unwrap();
        assert_eq!(written, 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
    }
}
