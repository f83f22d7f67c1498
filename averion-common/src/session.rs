//! Authenticated session context
//!
//! Holds the bearer token and last-known user profile for one signed-in user.
//! The context is a cheap cloneable handle injected into the HTTP client;
//! nothing in the admission or polling logic reads it directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// User profile as returned by `/auth/me` and the login endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    /// Authoritative credit balance at the time of the request
    #[serde(default)]
    pub credits: u64,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Session contents
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
    pub authenticated_at: Option<DateTime<Utc>>,
}

/// Shared handle to the current session
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    inner: Arc<RwLock<Session>>,
}

impl SessionContext {
    /// Create an empty (signed-out) session
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session from an existing access token (e.g. `AVERION_TOKEN`)
    pub fn with_token(access_token: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Session {
                access_token: Some(access_token.into()),
                refresh_token: None,
                user: None,
                authenticated_at: Some(Utc::now()),
            })),
        }
    }

    /// Store tokens and profile after a successful login
    pub async fn establish(
        &self,
        access_token: String,
        refresh_token: Option<String>,
        user: Option<UserProfile>,
    ) {
        let mut session = self.inner.write().await;
        session.access_token = Some(access_token);
        session.refresh_token = refresh_token;
        session.user = user;
        session.authenticated_at = Some(Utc::now());
        tracing::debug!("Session established");
    }

    /// Bearer token for the Authorization header, if signed in
    pub async fn bearer_token(&self) -> Option<String> {
        self.inner.read().await.access_token.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.read().await.access_token.is_some()
    }

    /// Replace the cached profile (e.g. after re-fetching the credit balance)
    pub async fn update_user(&self, user: UserProfile) {
        self.inner.write().await.user = Some(user);
    }

    pub async fn user(&self) -> Option<UserProfile> {
        self.inner.read().await.user.clone()
    }

    /// Copy of the full session state
    pub async fn snapshot(&self) -> Session {
        self.inner.read().await.clone()
    }

    /// Drop tokens and profile (sign-out, or any 401/403 from the backend)
    pub async fn clear(&self) {
        let mut session = self.inner.write().await;
        if session.access_token.is_some() {
            tracing::info!("Clearing session credentials");
        }
        *session = Session::default();
    }
}
