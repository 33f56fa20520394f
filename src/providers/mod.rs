//! Collaborator Module
//!
//! The vault delegates every durable concern to a managed backend: an
//! authentication service and an object store. This module defines the two
//! contracts the rest of the crate is written against, plus the bindings that
//! implement them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐      ┌───────────────────────┐
//! │   AuthProvider   │      │    StorageProvider    │
//! │ sign_in/sign_out │      │ list, metadata, url,  │
//! │ watch_identity   │      │ upload, delete        │
//! └──────────────────┘      └───────────────────────┘
//!      │         │               │             │
//!      ▼         ▼               ▼             ▼
//! ┌─────────┐ ┌────────┐   ┌──────────┐  ┌────────┐
//! │Firebase │ │ Memory │   │ Firebase │  │ Memory │
//! │  Auth   │ │        │   │ Storage  │  │        │
//! └─────────┘ └────────┘   └──────────┘  └────────┘
//! ```

pub mod types;
pub mod firebase;
pub mod firebase_auth;
pub mod memory;
#[cfg(test)]
pub(crate) mod test_server;

pub use types::*;
pub use firebase::{FirebaseStorage, FirebaseStorageConfig};
pub use firebase_auth::{FirebaseAuth, FirebaseAuthConfig};
pub use memory::{MemoryAuth, MemoryStorage};

use async_trait::async_trait;
use secrecy::SecretString;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::AppConfig;

/// Byte progress callback: `(transferred, total)`
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Authentication collaborator
///
/// Validity and renewal of the signed-in session are entirely the
/// implementation's business; callers only see whether an identity is present.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Get the provider type identifier
    fn provider_type(&self) -> ProviderType;

    /// Sign in with email and password
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, ProviderError>;

    /// Sign out the current user (no-op when nobody is signed in)
    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Identity at this instant
    fn current_identity(&self) -> Option<Identity>;

    /// Live identity stream; updated on every sign-in and sign-out
    fn watch_identity(&self) -> watch::Receiver<Option<Identity>>;
}

/// Source of the bearer credential attached to storage requests
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Current id token, `None` when signed out
    async fn id_token(&self) -> Result<Option<SecretString>, ProviderError>;
}

/// Object storage collaborator
///
/// Paths are full object paths (`files/a.png`). Implementations take `&self`
/// so a listing can fan out metadata requests concurrently.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get the provider type identifier
    fn provider_type(&self) -> ProviderType;

    /// Get display name for this provider instance
    fn display_name(&self) -> String;

    /// List the objects directly inside `folder`, in backend order
    async fn list(&self, folder: &str) -> Result<Vec<ObjectRef>, ProviderError>;

    /// Resolve a download reference for an object
    async fn download_url(&self, object: &ObjectRef) -> Result<String, ProviderError>;

    /// Fetch size, content type and creation time of an object
    async fn metadata(&self, object: &ObjectRef) -> Result<ObjectMetadata, ProviderError>;

    /// Upload `data` to `path`, replacing any existing object, and return its
    /// download reference
    async fn upload_resumable(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
        on_progress: Option<ProgressFn>,
    ) -> Result<String, ProviderError>;

    /// Remove an object
    async fn delete(&self, path: &str) -> Result<(), ProviderError>;

    /// Download an object to a local file, returning the byte count
    async fn download_to_file(
        &self,
        path: &str,
        local_path: &Path,
        on_progress: Option<ProgressFn>,
    ) -> Result<u64, ProviderError>;
}

/// A connected pair of collaborators
#[derive(Clone)]
pub struct Backend {
    pub auth: Arc<dyn AuthProvider>,
    pub storage: Arc<dyn StorageProvider>,
}

/// Provider factory for creating backend instances
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create the auth/storage pair for the configured backend
    pub fn create(config: &AppConfig) -> Result<Backend, ProviderError> {
        match config.backend {
            ProviderType::Firebase => {
                let auth_config = FirebaseAuthConfig::from_app_config(config)?;
                let auth = Arc::new(FirebaseAuth::new(auth_config)?);
                let storage = FirebaseStorage::new(
                    FirebaseStorageConfig::from_app_config(config)?,
                    auth.clone(),
                );
                Ok(Backend {
                    auth,
                    storage: Arc::new(storage),
                })
            }
            ProviderType::Memory => {
                let auth = MemoryAuth::new();
                auth.register(memory::DEMO_EMAIL, memory::DEMO_PASSWORD);
                Ok(Backend {
                    auth: Arc::new(auth),
                    storage: Arc::new(MemoryStorage::new(&config.storage_bucket)),
                })
            }
        }
    }
}
