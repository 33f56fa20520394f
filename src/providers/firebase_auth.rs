//! Firebase Authentication binding
//!
//! Email/password sign-in through the Identity Toolkit REST API, id token
//! renewal through the Secure Token API. The signed-in session is kept on disk
//! (owner-only permissions) so the CLI stays signed in between invocations,
//! the same way the browser SDK keeps it in local storage.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use super::{AuthProvider, Identity, ProviderError, ProviderType, TokenSource};
use crate::config::AppConfig;

/// Renew the id token when it has less than this many seconds left
const EXPIRY_MARGIN_SECS: i64 = 300;

/// Firebase Auth configuration
#[derive(Debug, Clone)]
pub struct FirebaseAuthConfig {
    pub api_key: SecretString,
    /// Identity Toolkit base URL
    pub auth_endpoint: String,
    /// Secure Token base URL
    pub secure_token_endpoint: String,
    /// Persisted session location (`None` = memory only)
    pub session_file: Option<PathBuf>,
}

impl FirebaseAuthConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::InvalidConfig("Firebase api_key is required".to_string()));
        }
        Ok(Self {
            api_key: SecretString::from(config.api_key.trim().to_string()),
            auth_endpoint: config.auth_endpoint.trim_end_matches('/').to_string(),
            secure_token_endpoint: config.secure_token_endpoint.trim_end_matches('/').to_string(),
            session_file: config.session_file.clone(),
        })
    }
}

/// Signed-in session as persisted on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
    uid: String,
    email: String,
    id_token: String,
    refresh_token: String,
    /// Unix timestamp
    expires_at: i64,
}

impl StoredSession {
    /// Check if the id token is expired (with margin)
    fn is_expired(&self) -> bool {
        self.expires_at <= chrono::Utc::now().timestamp() + EXPIRY_MARGIN_SECS
    }

    fn identity(&self) -> Identity {
        Identity {
            uid: self.uid.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    #[serde(default)]
    email: String,
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

/// Extract the Firebase error code (`INVALID_PASSWORD`, `EMAIL_NOT_FOUND`, ...)
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect())
}

fn expires_at(expires_in: &str) -> i64 {
    let secs = expires_in.trim().parse::<i64>().unwrap_or(3600);
    chrono::Utc::now().timestamp() + secs
}

/// Firebase Authentication provider
pub struct FirebaseAuth {
    config: FirebaseAuthConfig,
    client: reqwest::Client,
    session: RwLock<Option<StoredSession>>,
    identity: watch::Sender<Option<Identity>>,
}

impl FirebaseAuth {
    /// Create the provider, restoring a persisted session if one exists
    pub fn new(config: FirebaseAuthConfig) -> Result<Self, ProviderError> {
        let session = match config.session_file.as_deref() {
            Some(path) => load_session(path),
            None => None,
        };
        if let Some(ref s) = session {
            debug!("Restored session for {}", s.email);
        }
        let (identity, _) = watch::channel(session.as_ref().map(StoredSession::identity));

        Ok(Self {
            config,
            client: reqwest::Client::new(),
            session: RwLock::new(session),
            identity,
        })
    }

    fn sign_in_url(&self) -> String {
        format!(
            "{}/v1/accounts:signInWithPassword?key={}",
            self.config.auth_endpoint,
            urlencoding::encode(self.config.api_key.expose_secret())
        )
    }

    fn refresh_url(&self) -> String {
        format!(
            "{}/v1/token?key={}",
            self.config.secure_token_endpoint,
            urlencoding::encode(self.config.api_key.expose_secret())
        )
    }

    fn persist(&self, session: &StoredSession) {
        if let Some(ref path) = self.config.session_file {
            if let Err(e) = store_session(path, session) {
                warn!("Failed to persist session: {}", e);
            }
        }
    }

    fn forget(&self) {
        if let Some(ref path) = self.config.session_file {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("Failed to remove session file {:?}: {}", path, e);
                }
            }
        }
    }

    /// Exchange the refresh token for a new id token
    async fn refresh(&self, session: &StoredSession) -> Result<StoredSession, ProviderError> {
        let response = self
            .client
            .post(self.refresh_url())
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", session.refresh_token.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::AuthenticationFailed(api_error_message(&text)));
        }

        let refreshed: RefreshResponse = response
            .json()
            .await?;

        Ok(StoredSession {
            id_token: refreshed.id_token,
            refresh_token: refreshed.refresh_token,
            expires_at: expires_at(&refreshed.expires_in),
            ..session.clone()
        })
    }
}

#[async_trait]
impl AuthProvider for FirebaseAuth {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Firebase
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, ProviderError> {
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "returnSecureToken": true,
        });

        let response = self
            .client
            .post(self.sign_in_url())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::AuthenticationFailed(api_error_message(&text)));
        }

        let signed_in: SignInResponse = response
            .json()
            .await?;

        let session = StoredSession {
            uid: signed_in.local_id,
            email: if signed_in.email.is_empty() {
                email.to_string()
            } else {
                signed_in.email
            },
            id_token: signed_in.id_token,
            refresh_token: signed_in.refresh_token,
            expires_at: expires_at(&signed_in.expires_in),
        };
        let identity = session.identity();

        self.persist(&session);
        *self.session.write().await = Some(session);
        self.identity.send_replace(Some(identity.clone()));

        info!("Signed in as {}", identity.email);
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let previous = self.session.write().await.take();
        self.forget();
        self.identity.send_replace(None);
        if let Some(s) = previous {
            info!("Signed out {}", s.email);
        }
        Ok(())
    }

    fn current_identity(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    fn watch_identity(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.subscribe()
    }
}

#[async_trait]
impl TokenSource for FirebaseAuth {
    async fn id_token(&self) -> Result<Option<SecretString>, ProviderError> {
        {
            let session = self.session.read().await;
            match session.as_ref() {
                None => return Ok(None),
                Some(s) if !s.is_expired() => {
                    return Ok(Some(SecretString::from(s.id_token.clone())));
                }
                Some(_) => {}
            }
        }

        let mut session = self.session.write().await;
        let current = match session.as_ref() {
            None => return Ok(None),
            // Another caller refreshed while we waited for the lock
            Some(s) if !s.is_expired() => return Ok(Some(SecretString::from(s.id_token.clone()))),
            Some(s) => s.clone(),
        };

        match self.refresh(&current).await {
            Ok(refreshed) => {
                debug!("Refreshed id token for {}", refreshed.email);
                self.persist(&refreshed);
                let token = SecretString::from(refreshed.id_token.clone());
                *session = Some(refreshed);
                Ok(Some(token))
            }
            Err(ProviderError::AuthenticationFailed(reason)) => {
                warn!("Session for {} is no longer valid: {}", current.email, reason);
                *session = None;
                drop(session);
                self.forget();
                self.identity.send_replace(None);
                Err(ProviderError::NotAuthenticated)
            }
            Err(e) => Err(e),
        }
    }
}

fn load_session(path: &Path) -> Option<StoredSession> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!("Ignoring unreadable session file {:?}: {}", path, e);
            None
        }
    }
}

fn store_session(path: &Path, session: &StoredSession) -> Result<(), ProviderError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        ensure_secure_permissions(parent)?;
    }
    let json = serde_json::to_string_pretty(session)
        .map_err(|e| ProviderError::Other(format!("Failed to serialize session: {}", e)))?;
    std::fs::write(path, json)?;
    ensure_secure_permissions(path)?;
    Ok(())
}

/// Restrict a session file (or its directory) to the current user
fn ensure_secure_permissions(path: &Path) -> Result<(), ProviderError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if path.is_dir() { 0o700 } else { 0o600 };
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_server::{MockResponse, MockServer};

    fn config(endpoint: &str, session_file: Option<PathBuf>) -> FirebaseAuthConfig {
        FirebaseAuthConfig {
            api_key: SecretString::from("test-key".to_string()),
            auth_endpoint: endpoint.to_string(),
            secure_token_endpoint: endpoint.to_string(),
            session_file,
        }
    }

    #[test]
    fn test_api_error_message() {
        let body = r#"{"error":{"code":400,"message":"INVALID_PASSWORD","errors":[]}}"#;
        assert_eq!(api_error_message(body), "INVALID_PASSWORD");
        assert_eq!(api_error_message("gateway down"), "gateway down");
    }

    #[test]
    fn test_session_expiry_margin() {
        let now = chrono::Utc::now().timestamp();
        let mut session = StoredSession {
            uid: "u".to_string(),
            email: "e".to_string(),
            id_token: "t".to_string(),
            refresh_token: "r".to_string(),
            expires_at: now + 3600,
        };
        assert!(!session.is_expired());
        session.expires_at = now + 60;
        assert!(session.is_expired());
    }

    #[test]
    fn test_requires_api_key() {
        let app = AppConfig::default();
        assert!(FirebaseAuthConfig::from_app_config(&app).is_err());
    }

    #[tokio::test]
    async fn test_sign_in_persists_session() {
        let server = MockServer::start(vec![MockResponse::json(
            200,
            r#"{"localId":"uid-1","email":"user@example.com","idToken":"id-1","refreshToken":"refresh-1","expiresIn":"3600"}"#,
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let session_path = dir.path().join("session.json");

        let auth = FirebaseAuth::new(config(&server.url(), Some(session_path.clone()))).unwrap();
        let identity = auth.sign_in("user@example.com", "pw").await.unwrap();
        assert_eq!(identity.uid, "uid-1");
        assert_eq!(auth.current_identity(), Some(identity.clone()));

        let requests = server.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0].path.starts_with("/v1/accounts:signInWithPassword?key=test-key"));
        assert!(requests[0].body.contains("\"returnSecureToken\":true"));

        // A fresh provider restores the session from disk
        let restored =
            FirebaseAuth::new(config(&server.url(), Some(session_path.clone()))).unwrap();
        assert_eq!(restored.current_identity(), Some(identity));
        let token = restored.id_token().await.unwrap().unwrap();
        assert_eq!(token.expose_secret(), "id-1");

        restored.sign_out().await.unwrap();
        assert!(!session_path.exists());
        assert!(restored.current_identity().is_none());
        assert!(restored.id_token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_in_failure_reports_code() {
        let server = MockServer::start(vec![MockResponse::json(
            400,
            r#"{"error":{"code":400,"message":"INVALID_LOGIN_CREDENTIALS"}}"#,
        )])
        .await;
        let auth = FirebaseAuth::new(config(&server.url(), None)).unwrap();

        let err = auth.sign_in("user@example.com", "bad").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::AuthenticationFailed(ref m) if m == "INVALID_LOGIN_CREDENTIALS"
        ));
        assert!(auth.current_identity().is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        let server = MockServer::start(vec![
            MockResponse::json(
                200,
                r#"{"localId":"uid-1","email":"user@example.com","idToken":"stale","refreshToken":"refresh-1","expiresIn":"10"}"#,
            ),
            MockResponse::json(
                200,
                r#"{"id_token":"fresh","refresh_token":"refresh-2","expires_in":"3600","user_id":"uid-1"}"#,
            ),
        ])
        .await;
        let auth = FirebaseAuth::new(config(&server.url(), None)).unwrap();
        auth.sign_in("user@example.com", "pw").await.unwrap();

        let token = auth.id_token().await.unwrap().unwrap();
        assert_eq!(token.expose_secret(), "fresh");

        let requests = server.requests().await;
        assert_eq!(requests.len(), 2);
        assert!(requests[1].path.starts_with("/v1/token?key=test-key"));
        assert!(requests[1].body.contains("grant_type=refresh_token"));
        assert!(requests[1].body.contains("refresh_token=refresh-1"));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let auth = FirebaseAuth::new(config(&endpoint, None)).unwrap();
        let err = auth.sign_in("user@example.com", "pw").await.unwrap_err();
        assert!(matches!(err, ProviderError::NetworkError(_)));
    }

    #[tokio::test]
    async fn test_malformed_sign_in_response_is_parse_error() {
        let server =
            MockServer::start(vec![MockResponse::json(200, r#"{"unexpected":true}"#)]).await;
        let auth = FirebaseAuth::new(config(&server.url(), None)).unwrap();

        let err = auth.sign_in("user@example.com", "pw").await.unwrap_err();
        assert!(matches!(err, ProviderError::ParseError(_)));
        assert!(auth.current_identity().is_none());
    }

    #[tokio::test]
    async fn test_rejected_refresh_signs_out() {
        let server = MockServer::start(vec![
            MockResponse::json(
                200,
                r#"{"localId":"uid-1","email":"user@example.com","idToken":"stale","refreshToken":"refresh-1","expiresIn":"10"}"#,
            ),
            MockResponse::json(400, r#"{"error":{"message":"TOKEN_EXPIRED"}}"#),
        ])
        .await;
        let auth = FirebaseAuth::new(config(&server.url(), None)).unwrap();
        auth.sign_in("user@example.com", "pw").await.unwrap();
        let mut identity = auth.watch_identity();

        assert!(matches!(auth.id_token().await, Err(ProviderError::NotAuthenticated)));
        assert!(identity.has_changed().unwrap());
        assert!(identity.borrow_and_update().is_none());
    }
}
