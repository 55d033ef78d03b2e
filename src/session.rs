//! Session controller: the single owner of in-memory identity state.
//!
//! LIFECYCLE
//! =========
//! A controller starts in `Loading`. [`SessionController::init`] resolves it
//! once to `Authenticated` (stored credentials and a fetched profile) or
//! `Anonymous`. Afterwards only login/registration move it to
//! `Authenticated`, and logout or a failed token refresh move it back to
//! `Anonymous`. Observers follow along through a `tokio::sync::watch`
//! channel.
//!
//! ERROR HANDLING
//! ==============
//! Operations return `Result<_, ApiError>` with the error already classified.
//! The refresh path is the exception: it can fail deep inside an unrelated
//! call, so it reports through [`SessionObserver`] and the controller flips
//! the session to `Anonymous` on its own.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::watch;

use crate::client::{self, ApiClient};
use crate::config::{ClientConfig, LogoutEndpoint, Timeouts};
use crate::error::ApiError;
use crate::refresh::SessionObserver;
use crate::store::{self, CredentialPair, CredentialStore};
use crate::transport::{ApiRequest, TransportError};

pub const LOGIN_PATH: &str = "auth/login/";
pub const REGISTER_PATH: &str = "auth/register/";
pub const PROFILE_PATH: &str = "auth/profile/";

// =============================================================================
// SESSION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Loading,
    Authenticated,
    Anonymous,
}

/// Current identity. `user` is `Some` exactly when `status` is `Authenticated`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub status: SessionStatus,
    pub user: Option<UserProfile>,
}

impl Session {
    #[must_use]
    pub fn loading() -> Self {
        Self { status: SessionStatus::Loading, user: None }
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self { status: SessionStatus::Anonymous, user: None }
    }

    #[must_use]
    pub fn authenticated(user: UserProfile) -> Self {
        Self { status: SessionStatus::Authenticated, user: Some(user) }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }
}

// =============================================================================
// USER PROFILE
// =============================================================================

/// Server-owned profile, kept as the raw JSON object.
///
/// Only `total_points` and `current_level` are ever written locally; every
/// other field round-trips untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserProfile(Map<String, Value>);

impl UserProfile {
    #[must_use]
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn id(&self) -> Option<u64> {
        self.get("id").and_then(Value::as_u64)
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.get("username").and_then(Value::as_str)
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.get("email").and_then(Value::as_str)
    }

    #[must_use]
    pub fn total_points(&self) -> Option<i64> {
        self.get("total_points").and_then(Value::as_i64)
    }

    #[must_use]
    pub fn current_level(&self) -> Option<i64> {
        self.get("current_level").and_then(Value::as_i64)
    }

    #[must_use]
    pub fn created_at(&self) -> Option<&str> {
        self.get("created_at").and_then(Value::as_str)
    }

    fn set_stats(&mut self, total_points: i64, current_level: i64) {
        self.0.insert("total_points".to_owned(), Value::from(total_points));
        self.0.insert("current_level".to_owned(), Value::from(current_level));
    }
}

// =============================================================================
// UI-FACING OUTCOME
// =============================================================================

/// `{success, error}` shape for callers that only render a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl<T> From<&Result<T, ApiError>> for AuthOutcome {
    fn from(result: &Result<T, ApiError>) -> Self {
        match result {
            Ok(_) => Self { success: true, error: None },
            Err(e) => Self { success: false, error: Some(e.user_message()) },
        }
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Deserialize)]
struct AuthResponse {
    user: UserProfile,
    access: String,
    refresh: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    email: &'a str,
    username: &'a str,
    password: &'a str,
    password_confirm: &'a str,
}

// =============================================================================
// CONTROLLER
// =============================================================================

pub struct SessionController {
    client: ApiClient,
    state: Arc<watch::Sender<Session>>,
    logout_endpoint: LogoutEndpoint,
    logout_timeout: Duration,
}

/// Lets the refresh path end the session without owning it.
struct ExpiryHook {
    state: Arc<watch::Sender<Session>>,
}

impl SessionObserver for ExpiryHook {
    fn session_expired(&self) {
        tracing::info!("session expired; re-authentication required");
        self.state.send_replace(Session::anonymous());
    }
}

impl SessionController {
    #[must_use]
    pub fn new(client: ApiClient, logout_endpoint: LogoutEndpoint) -> Self {
        let (tx, _rx) = watch::channel(Session::loading());
        let state = Arc::new(tx);
        client.set_session_observer(Arc::new(ExpiryHook { state: Arc::clone(&state) }));
        Self { client, state, logout_endpoint, logout_timeout: Timeouts::default().logout }
    }

    /// Bound the server notification that precedes the local clear on logout.
    #[must_use]
    pub fn with_logout_timeout(mut self, timeout: Duration) -> Self {
        self.logout_timeout = timeout;
        self
    }

    /// Build a controller backed by `reqwest` from typed config.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_config(config: &ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self, TransportError> {
        Ok(Self::new(ApiClient::from_config(config, store)?, config.logout_endpoint)
            .with_logout_timeout(config.timeouts.logout))
    }

    #[must_use]
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Snapshot of the current session.
    #[must_use]
    pub fn session(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Receiver that observes every session change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// Resolve the startup `Loading` state from the credential store.
    pub async fn init(&self) -> Session {
        if store::load_or_absent(self.client.store().as_ref()).is_some() {
            if let Err(e) = self.fetch_current_user().await {
                tracing::info!(error = %e, "could not restore session at startup");
            }
        } else {
            self.state.send_replace(Session::anonymous());
        }
        self.session()
    }

    /// Authenticate with email and password.
    ///
    /// # Errors
    ///
    /// Returns the classified error; stored credentials are untouched on failure.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, ApiError> {
        let body = serde_json::to_value(LoginRequest { email, password }).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.authenticate(LOGIN_PATH, body).await
    }

    /// Create an account and sign in with it.
    ///
    /// # Errors
    ///
    /// Returns the classified error, including per-field
    /// [`ApiError::ValidationFailed`] messages.
    pub async fn register(
        &self,
        email: &str,
        username: &str,
        password: &str,
        password_confirm: &str,
    ) -> Result<UserProfile, ApiError> {
        let body = serde_json::to_value(RegisterRequest { email, username, password, password_confirm })
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        self.authenticate(REGISTER_PATH, body).await
    }

    async fn authenticate(&self, path: &str, body: Value) -> Result<UserProfile, ApiError> {
        let response = self.client.send_unauthenticated(ApiRequest::post(path, body)).await?;
        if !response.is_success() {
            let err = ApiError::from_auth_response(&response);
            tracing::info!(path, status = response.status, error = %err, "authentication rejected");
            return Err(err);
        }

        let auth: AuthResponse = serde_json::from_str(&response.body).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.client
            .store()
            .save(&CredentialPair::new(auth.access, auth.refresh))?;
        tracing::info!(path, username = auth.user.username().unwrap_or_default(), "signed in");
        self.state.send_replace(Session::authenticated(auth.user.clone()));
        Ok(auth.user)
    }

    /// Sign out. The server is told to invalidate the refresh token on a best
    /// effort basis; local credentials are cleared whatever it answers.
    pub async fn logout(&self) {
        if let Some(pair) = store::load_or_absent(self.client.store().as_ref()) {
            self.notify_logout(&pair).await;
        }

        if let Err(e) = self.client.store().clear() {
            tracing::warn!(error = %e, "failed to clear credentials on logout");
        }
        self.state.send_replace(Session::anonymous());
        tracing::info!("signed out");
    }

    async fn notify_logout(&self, pair: &CredentialPair) {
        let path = self.logout_endpoint.path();
        let call = async {
            match self.logout_endpoint {
                LogoutEndpoint::Blacklist => {
                    self.client
                        .send_unauthenticated(ApiRequest::post(path, json!({ "refresh": pair.refresh_token })))
                        .await
                }
                LogoutEndpoint::Logout => {
                    self.client
                        .send_once(ApiRequest::post(path, json!({ "refresh": pair.refresh_token })))
                        .await
                }
            }
        };
        match tokio::time::timeout(self.logout_timeout, call).await {
            Ok(Ok(resp)) if resp.is_success() => tracing::debug!(path, "server acknowledged logout"),
            Ok(Ok(resp)) => tracing::warn!(path, status = resp.status, "server rejected logout"),
            Ok(Err(e)) => tracing::warn!(path, error = %e, "logout notification failed"),
            Err(_) => tracing::warn!(path, "logout notification timed out"),
        }
    }

    /// Load the profile for the stored credentials.
    ///
    /// Returns `Ok(None)` (and leaves the session `Anonymous`) when no
    /// credentials are stored. A transient failure (no response, 5xx) keeps the
    /// credentials for a later attempt; any other failure clears them.
    ///
    /// # Errors
    ///
    /// Returns the classified error when the profile could not be fetched.
    pub async fn fetch_current_user(&self) -> Result<Option<UserProfile>, ApiError> {
        if store::load_or_absent(self.client.store().as_ref()).is_none() {
            self.state.send_replace(Session::anonymous());
            return Ok(None);
        }

        let result = self
            .client
            .send(ApiRequest::get(PROFILE_PATH))
            .await
            .and_then(client::decode::<UserProfile>);
        match result {
            Ok(user) => {
                self.state.send_replace(Session::authenticated(user.clone()));
                Ok(Some(user))
            }
            Err(e @ (ApiError::NetworkUnavailable(_) | ApiError::ServerError { .. })) => {
                tracing::warn!(error = %e, "profile fetch failed; keeping credentials");
                self.state.send_if_modified(|session| {
                    if session.status == SessionStatus::Loading {
                        *session = Session::anonymous();
                        true
                    } else {
                        false
                    }
                });
                Err(e)
            }
            Err(e) => {
                tracing::warn!(error = %e, "profile fetch failed; clearing credentials");
                if let Err(clear) = self.client.store().clear() {
                    tracing::warn!(error = %clear, "failed to clear credentials");
                }
                self.state.send_replace(Session::anonymous());
                Err(e)
            }
        }
    }

    /// Optimistically patch the cached profile after earning points.
    ///
    /// Local only; the next [`fetch_current_user`](Self::fetch_current_user)
    /// replaces it. Returns `false` when there is no profile to patch.
    pub fn update_local_stats(&self, total_points: i64, current_level: i64) -> bool {
        self.state.send_if_modified(|session| match session.user.as_mut() {
            Some(user) => {
                user.set_stats(total_points, current_level);
                true
            }
            None => false,
        })
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
