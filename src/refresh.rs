//! Access-token refresh with single-flight coalescing.
//!
//! ARCHITECTURE
//! ============
//! When a call comes back 401, [`RefreshCoordinator::refresh`] exchanges the
//! stored refresh token at `token/refresh/` for a new access token. Only one
//! exchange runs at a time: the first caller installs a shared in-flight
//! future, later callers await a clone of it, and the slot is emptied once the
//! exchange settles. Every waiter therefore sees the same new token (or the
//! same failure).
//!
//! A caller whose request went out with a token that has since been replaced
//! skips the exchange and uses the current token directly, so a 401 that
//! straggles in after a completed refresh does not burn the refresh token a
//! second time.
//!
//! Each exchange is bound to the refresh token it started from. The result is
//! written back only while the store still holds that token, and a failure
//! clears the store only under the same condition, so an exchange that
//! outlives a logout and a new login never touches the new session. The
//! in-flight slot is keyed the same way: a 401 under a new session starts its
//! own exchange instead of joining the old one.
//!
//! TRADE-OFFS
//! ==========
//! Failure side effects (clearing the store and notifying the session owner)
//! run inside the shared future, so they happen once per failed exchange no
//! matter how many callers were waiting on it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde_json::json;

use crate::store::{self, CredentialStore};
use crate::transport::{ApiRequest, Transport};

pub const REFRESH_PATH: &str = "token/refresh/";

// =============================================================================
// ERROR / OBSERVER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token stored")]
    MissingRefreshToken,
    #[error("refresh request failed: {0}")]
    Network(String),
    #[error("refresh rejected: status {0}")]
    Rejected(u16),
    #[error("refresh response parse failed: {0}")]
    Decode(String),
    #[error("credential storage failed during refresh: {0}")]
    Storage(String),
    #[error("credentials changed while the refresh was running")]
    Superseded,
}

/// Notified when a refresh fails terminally and the credentials are gone.
pub trait SessionObserver: Send + Sync {
    fn session_expired(&self);
}

#[derive(serde::Deserialize)]
struct RefreshResponse {
    access: String,
    /// Present only when the server rotates refresh tokens.
    #[serde(default)]
    refresh: Option<String>,
}

type InFlight = Shared<BoxFuture<'static, Result<String, RefreshError>>>;

/// The running exchange and the refresh token it spends.
struct Exchange {
    id: u64,
    refresh_token: String,
    future: InFlight,
}

// =============================================================================
// COORDINATOR
// =============================================================================

pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    in_flight: Mutex<Option<Exchange>>,
    next_id: AtomicU64,
    observer: RwLock<Option<Arc<dyn SessionObserver>>>,
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            transport,
            store,
            in_flight: Mutex::new(None),
            next_id: AtomicU64::new(0),
            observer: RwLock::new(None),
        }
    }

    /// Register the party that owns the session; replaces any previous observer.
    pub fn set_observer(&self, observer: Arc<dyn SessionObserver>) {
        *self.observer.write().unwrap_or_else(PoisonError::into_inner) = Some(observer);
    }

    /// Obtain a fresh access token after `stale` was rejected.
    ///
    /// `stale` is the token the failed request carried (`None` if it went out
    /// unauthenticated).
    ///
    /// # Errors
    ///
    /// Returns a [`RefreshError`] when no usable token can be obtained. By then
    /// the credential store has been cleared and the observer notified.
    pub async fn refresh(&self, stale: Option<&str>) -> Result<String, RefreshError> {
        let Some(pair) = store::load_or_absent(self.store.as_ref()) else {
            tracing::info!("401 with no stored refresh token");
            self.expire(&RefreshError::MissingRefreshToken);
            return Err(RefreshError::MissingRefreshToken);
        };

        if stale.is_some_and(|token| token != pair.access_token) {
            tracing::debug!("access token already refreshed; reusing current token");
            return Ok(pair.access_token);
        }

        let (id, exchange) = self.join_or_start(pair.refresh_token);
        let result = exchange.await;

        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|current| current.id == id) {
            *slot = None;
        }
        result
    }

    /// Whether an exchange is currently in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn join_or_start(&self, refresh_token: String) -> (u64, InFlight) {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = slot.as_ref().filter(|current| current.refresh_token == refresh_token) {
            tracing::debug!(refresh_id = current.id, "joining in-flight token refresh");
            return (current.id, current.future.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let transport = Arc::clone(&self.transport);
        let store = Arc::clone(&self.store);
        let observer = self.observer();
        let spent = refresh_token.clone();
        let exchange = async move {
            tracing::info!(refresh_id = id, "refreshing access token");
            let result = exchange_refresh_token(transport.as_ref(), store.as_ref(), &spent).await;
            match &result {
                Ok(_) => tracing::info!(refresh_id = id, "access token refreshed"),
                Err(RefreshError::Superseded) => {
                    tracing::info!(refresh_id = id, "credentials replaced during refresh; result discarded");
                }
                Err(e) => {
                    tracing::warn!(refresh_id = id, error = %e, "token refresh failed; clearing session");
                    clear_if_current_and_notify(store.as_ref(), observer.as_deref(), &spent);
                }
            }
            result
        }
        .boxed()
        .shared();

        *slot = Some(Exchange { id, refresh_token, future: exchange.clone() });
        (id, exchange)
    }

    fn observer(&self) -> Option<Arc<dyn SessionObserver>> {
        self.observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn expire(&self, reason: &RefreshError) {
        tracing::debug!(reason = %reason, "session expired");
        clear_and_notify(self.store.as_ref(), self.observer().as_deref());
    }
}

/// Unauthenticated `POST token/refresh/ {refresh}`; persists the result.
async fn exchange_refresh_token(
    transport: &dyn Transport,
    store: &dyn CredentialStore,
    refresh_token: &str,
) -> Result<String, RefreshError> {
    let request = ApiRequest::post(REFRESH_PATH, json!({ "refresh": refresh_token }));
    let response = transport
        .send(&request)
        .await
        .map_err(|e| RefreshError::Network(e.to_string()))?;
    if !response.is_success() {
        return Err(RefreshError::Rejected(response.status));
    }

    let body: RefreshResponse =
        serde_json::from_str(&response.body).map_err(|e| RefreshError::Decode(e.to_string()))?;
    match store.update_access(refresh_token, &body.access, body.refresh.as_deref()) {
        Ok(Some(pair)) => Ok(pair.access_token),
        // Logged out (and possibly back in) while the exchange was running.
        Ok(None) => Err(RefreshError::Superseded),
        Err(e) => Err(RefreshError::Storage(e.to_string())),
    }
}

/// Clear and notify, unless the pair that failed has already been replaced.
fn clear_if_current_and_notify(store: &dyn CredentialStore, observer: Option<&dyn SessionObserver>, spent: &str) {
    match store.clear_if_current(spent) {
        Ok(false) => {
            tracing::info!("credentials replaced during failed refresh; keeping the new session");
            return;
        }
        Ok(true) => {}
        Err(e) => tracing::warn!(error = %e, "failed to clear credentials after refresh failure"),
    }
    if let Some(observer) = observer {
        observer.session_expired();
    }
}

fn clear_and_notify(store: &dyn CredentialStore, observer: Option<&dyn SessionObserver>) {
    if let Err(e) = store.clear() {
        tracing::warn!(error = %e, "failed to clear credentials after refresh failure");
    }
    if let Some(observer) = observer {
        observer.session_expired();
    }
}

#[cfg(test)]
#[path = "refresh_test.rs"]
mod tests;
