//! Shared types for the vault collaborators
//!
//! This module contains the types exchanged between the orchestration layer and
//! the auth/storage backends: backend selection, object references and metadata,
//! the authenticated identity, and the provider error type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Supported backend types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Firebase Authentication + Firebase Cloud Storage
    #[default]
    Firebase,
    /// In-process backend (tests, offline demos)
    Memory,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderType::Firebase => write!(f, "Firebase"),
            ProviderType::Memory => write!(f, "Memory"),
        }
    }
}

impl std::str::FromStr for ProviderType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "firebase" => Ok(ProviderType::Firebase),
            "memory" => Ok(ProviderType::Memory),
            other => Err(ProviderError::InvalidConfig(format!("Unknown backend: {}", other))),
        }
    }
}

/// Authenticated user handle.
///
/// The application only distinguishes present from absent; `uid` and `email`
/// are carried for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: String,
}

/// Reference to one object returned by a folder listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Object name within its folder (e.g. `a.png`)
    pub name: String,
    /// Full storage path (e.g. `files/a.png`)
    pub full_path: String,
}

impl ObjectRef {
    pub fn new(folder: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            full_path: object_path(folder, name),
        }
    }
}

/// Descriptive metadata of a stored object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Size in bytes
    pub size: u64,
    /// MIME type, when the backend recorded one
    pub content_type: Option<String>,
    /// Server-side creation time
    pub created_at: Option<DateTime<Utc>>,
}

/// Deterministic storage path for a file name inside a folder.
///
/// The same name always maps to the same path, so re-uploading a name
/// replaces the stored object.
pub fn object_path(folder: &str, name: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}

/// Provider error type
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Map a non-success HTTP status to the closest error variant
    pub fn from_status(status: u16, context: &str, body: &str) -> Self {
        let detail = if body.is_empty() {
            context.to_string()
        } else {
            format!("{}: {}", context, truncate(body, 200))
        };
        match status {
            401 => ProviderError::NotAuthenticated,
            403 => ProviderError::PermissionDenied(detail),
            404 => ProviderError::NotFound(context.to_string()),
            500..=599 => ProviderError::ServerError(format!("HTTP {} {}", status, detail)),
            _ => ProviderError::Other(format!("HTTP {} {}", status, detail)),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::ParseError(e.to_string())
        } else {
            ProviderError::NetworkError(e.to_string())
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Byte progress of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransferProgressInfo {
    /// Bytes transferred so far
    pub bytes_transferred: u64,
    /// Total bytes to transfer
    pub total_bytes: u64,
    /// Progress percentage (0-100)
    pub percentage: f64,
}

impl TransferProgressInfo {
    pub fn new(bytes_transferred: u64, total_bytes: u64) -> Self {
        let percentage = if total_bytes > 0 {
            (bytes_transferred as f64 / total_bytes as f64 * 100.0).clamp(0.0, 100.0)
        } else {
            100.0
        };

        Self {
            bytes_transferred,
            total_bytes,
            percentage,
        }
    }
}
