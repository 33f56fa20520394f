//! Session gate
//!
//! Decides which view a visitor gets based on the auth collaborator's live
//! identity, runs the email/password login form, and logs out.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::providers::{AuthProvider, Identity, ProviderError};

/// The only message a failed login ever shows
pub const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Application views
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Landing,
    Login,
    Dashboard,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Landing => "/",
            Route::Login => "/login",
            Route::Dashboard => "/dashboard",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Call to action offered by the landing view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandingAction {
    Login,
    GoToDashboard,
}

impl LandingAction {
    pub fn label(&self) -> &'static str {
        match self {
            LandingAction::Login => "Login",
            LandingAction::GoToDashboard => "Go to Dashboard",
        }
    }

    pub fn target(&self) -> Route {
        match self {
            LandingAction::Login => Route::Login,
            LandingAction::GoToDashboard => Route::Dashboard,
        }
    }
}

/// Identity-driven routing
pub struct SessionGate {
    auth: Arc<dyn AuthProvider>,
    identity: watch::Receiver<Option<Identity>>,
}

impl SessionGate {
    pub fn new(auth: Arc<dyn AuthProvider>) -> Self {
        let identity = auth.watch_identity();
        Self { auth, identity }
    }

    /// Latest identity seen on the subscription
    pub fn identity(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.borrow().is_some()
    }

    pub fn landing_action(&self) -> LandingAction {
        if self.is_authenticated() {
            LandingAction::GoToDashboard
        } else {
            LandingAction::Login
        }
    }

    /// Route actually shown for a requested route
    pub fn resolve(&self, requested: Route) -> Route {
        match requested {
            Route::Dashboard if !self.is_authenticated() => {
                debug!("No identity, redirecting {} to {}", Route::Dashboard, Route::Login);
                Route::Login
            }
            other => other,
        }
    }

    /// Wait until the identity changes (sign-in or sign-out anywhere in the
    /// process) and return the new value; `None` once the auth side is gone
    pub async fn wait_for_change(&mut self) -> Option<Option<Identity>> {
        self.identity.changed().await.ok()?;
        Some(self.identity.borrow_and_update().clone())
    }

    /// Sign out and go back to the landing view
    pub async fn logout(&self) -> Result<Route, ProviderError> {
        self.auth.sign_out().await?;
        Ok(Route::Landing)
    }
}

/// Result of a login submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Signed in; navigate here
    Navigate(Route),
    /// Failed; show this message and stay on the login view
    Failed(String),
    /// A submission is already in flight
    Busy,
}

/// Email/password login form
pub struct LoginForm {
    auth: Arc<dyn AuthProvider>,
    submitting: AtomicBool,
}

/// Re-enables the form when the submission ends, however it ends
struct SubmitGuard<'a>(&'a AtomicBool);

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl LoginForm {
    pub fn new(auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            auth,
            submitting: AtomicBool::new(false),
        }
    }

    /// Whether the submit control is currently disabled
    pub fn is_submitting(&self) -> bool {
        self.submitting.load(Ordering::SeqCst)
    }

    /// Submit credentials.
    ///
    /// Every failure collapses into [`INVALID_CREDENTIALS`]; the underlying
    /// reason is only logged at debug level.
    pub async fn submit(&self, email: &str, password: &str) -> LoginOutcome {
        if self.submitting.swap(true, Ordering::SeqCst) {
            return LoginOutcome::Busy;
        }
        let _guard = SubmitGuard(&self.submitting);

        match self.auth.sign_in(email, password).await {
            Ok(identity) => {
                info!("Login succeeded for {}", identity.email);
                LoginOutcome::Navigate(Route::Dashboard)
            }
            Err(e) => {
                debug!("Login failed: {}", e);
                LoginOutcome::Failed(INVALID_CREDENTIALS.to_string())
            }
        }
    }
}
