// QuantumVault Configuration Module
// Backend connection settings loaded from disk with environment overrides

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::providers::ProviderType;

/// Resumable uploads must be sent in multiples of this many bytes
pub const UPLOAD_CHUNK_ALIGNMENT: usize = 256 * 1024;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Which backend to talk to
    pub backend: ProviderType,
    /// Firebase web API key
    pub api_key: String,
    /// Storage bucket (e.g. `my-project.appspot.com`)
    pub storage_bucket: String,
    /// Firebase project id (informational)
    pub project_id: Option<String>,
    /// Remote folder holding every vault object
    pub folder: String,
    /// Identity Toolkit base URL
    pub auth_endpoint: String,
    /// Secure Token base URL (id token refresh)
    pub secure_token_endpoint: String,
    /// Firebase Storage base URL
    pub storage_endpoint: String,
    /// Bytes per resumable upload request
    pub upload_chunk_size: usize,
    /// Default log level (`RUST_LOG` wins when set)
    pub log_level: String,
    /// Where the auth binding keeps the signed-in session, `None` keeps it in memory only
    pub session_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: ProviderType::Firebase,
            api_key: String::new(),
            storage_bucket: String::new(),
            project_id: None,
            folder: "files".to_string(),
            auth_endpoint: "https://identitytoolkit.googleapis.com".to_string(),
            secure_token_endpoint: "https://securetoken.googleapis.com".to_string(),
            storage_endpoint: "https://firebasestorage.googleapis.com".to_string(),
            upload_chunk_size: 8 * 1024 * 1024,
            log_level: "info".to_string(),
            session_file: Some(config_dir().join("session.json")),
        }
    }
}

impl AppConfig {
    /// Apply environment overrides through `lookup` (normally `std::env::var`)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("QUANTUMVAULT_API_KEY") {
            self.api_key = key;
        }
        if let Some(bucket) = lookup("QUANTUMVAULT_BUCKET") {
            self.storage_bucket = bucket;
        }
        if let Some(backend) = lookup("QUANTUMVAULT_BACKEND") {
            match backend.parse() {
                Ok(backend) => self.backend = backend,
                Err(e) => tracing::warn!("Ignoring QUANTUMVAULT_BACKEND: {}", e),
            }
        }
        // Emulator hosts follow the Firebase tooling convention (host:port, plain HTTP)
        if let Some(host) = lookup("FIREBASE_STORAGE_EMULATOR_HOST") {
            self.storage_endpoint = format!("http://{}", host.trim_end_matches('/'));
        }
        if let Some(host) = lookup("FIREBASE_AUTH_EMULATOR_HOST") {
            let host = host.trim_end_matches('/');
            self.auth_endpoint = format!("http://{}/identitytoolkit.googleapis.com", host);
            self.secure_token_endpoint = format!("http://{}/securetoken.googleapis.com", host);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == ProviderType::Firebase {
            if self.api_key.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "api_key is required for the Firebase backend".to_string(),
                ));
            }
            if self.storage_bucket.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "storage_bucket is required for the Firebase backend".to_string(),
                ));
            }
        }

        let folder = self.folder.trim_matches('/');
        if folder.is_empty() {
            return Err(ConfigError::Invalid("folder cannot be empty".to_string()));
        }
        if folder.contains('/') {
            return Err(ConfigError::Invalid("folder must be a single path segment".to_string()));
        }

        for (name, endpoint) in [
            ("auth_endpoint", &self.auth_endpoint),
            ("secure_token_endpoint", &self.secure_token_endpoint),
            ("storage_endpoint", &self.storage_endpoint),
        ] {
            let parsed = url::Url::parse(endpoint)
                .map_err(|e| ConfigError::Invalid(format!("{} is not a valid URL: {}", name, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid(format!("{} must use http or https", name)));
            }
        }

        if self.upload_chunk_size == 0 || self.upload_chunk_size % UPLOAD_CHUNK_ALIGNMENT != 0 {
            return Err(ConfigError::Invalid(format!(
                "upload_chunk_size must be a positive multiple of {} bytes",
                UPLOAD_CHUNK_ALIGNMENT
            )));
        }

        Ok(())
    }
}

/// Directory holding the config and session files
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("quantumvault")
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration.
///
/// An explicit `path` must exist. Without one the default location is used and
/// a missing file yields the defaults. Environment overrides are applied last.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let (config_path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path(), false),
    };

    let mut config = if config_path.exists() || required {
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: config_path.clone(),
            source,
        })?
    } else {
        tracing::debug!("No config at {:?}, using defaults", config_path);
        AppConfig::default()
    };

    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn firebase_config() -> AppConfig {
        AppConfig {
            api_key: "AIza-test".to_string(),
            storage_bucket: "vault.appspot.com".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.backend, ProviderType::Firebase);
        assert_eq!(config.folder, "files");
        assert_eq!(config.upload_chunk_size % UPLOAD_CHUNK_ALIGNMENT, 0);
        assert!(config.session_file.is_some());
    }

    #[test]
    fn test_validate_config() {
        let mut config = AppConfig::default();

        // Should fail - no API key
        assert!(config.validate().is_err());

        config = firebase_config();
        assert!(config.validate().is_ok());

        config.folder = "/".to_string();
        assert!(config.validate().is_err());

        config.folder = "files/nested".to_string();
        assert!(config.validate().is_err());

        config = firebase_config();
        config.upload_chunk_size = 1000;
        assert!(config.validate().is_err());

        config = firebase_config();
        config.storage_endpoint = "localhost:9199".to_string();
        assert!(config.validate().is_err());

        config = firebase_config();
        config.auth_endpoint = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_memory_backend_needs_no_credentials() {
        let config = AppConfig {
            backend: ProviderType::Memory,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("QUANTUMVAULT_API_KEY", "from-env"),
            ("QUANTUMVAULT_BACKEND", "memory"),
            ("FIREBASE_STORAGE_EMULATOR_HOST", "127.0.0.1:9199"),
            ("FIREBASE_AUTH_EMULATOR_HOST", "127.0.0.1:9099/"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_key, "from-env");
        assert_eq!(config.backend, ProviderType::Memory);
        assert_eq!(config.storage_endpoint, "http://127.0.0.1:9199");
        assert_eq!(
            config.auth_endpoint,
            "http://127.0.0.1:9099/identitytoolkit.googleapis.com"
        );
        assert_eq!(
            config.secure_token_endpoint,
            "http://127.0.0.1:9099/securetoken.googleapis.com"
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{"api_key":"k","storage_bucket":"b.appspot.com"}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.folder, "files");
        assert_eq!(config.backend, ProviderType::Firebase);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"backend":"memory","folder":"vault"}"#).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.folder, "vault");
        assert_eq!(loaded.upload_chunk_size, AppConfig::default().upload_chunk_size);
    }

    #[test]
    fn test_malformed_config_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_explicit_missing_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(matches!(load_config(Some(&path)), Err(ConfigError::Read { .. })));
    }
}
