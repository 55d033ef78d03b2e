//! Authenticated API client.
//!
//! DESIGN
//! ======
//! `ApiClient::send` runs one request through its whole lifecycle:
//! authorize → send → on 401 refresh once → replay. The request's `retried`
//! flag bounds the loop, so a 401 on the replay comes back to the caller as a
//! plain response instead of triggering another refresh.
//!
//! `ApiClient` is a cheap `Arc` handle; clones share the transport, the
//! credential store and the in-flight refresh slot.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::authenticator::RequestAuthenticator;
use crate::config::{AuthScheme, ClientConfig};
use crate::error::ApiError;
use crate::refresh::{RefreshCoordinator, SessionObserver};
use crate::store::CredentialStore;
use crate::transport::{ApiRequest, ApiResponse, Method, ReqwestTransport, Transport, TransportError};

#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    authenticator: RequestAuthenticator,
    refresh: RefreshCoordinator,
}

impl ApiClient {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn CredentialStore>, scheme: AuthScheme) -> Self {
        let authenticator = RequestAuthenticator::new(Arc::clone(&store), scheme);
        let refresh = RefreshCoordinator::new(Arc::clone(&transport), Arc::clone(&store));
        Self { inner: Arc::new(ClientInner { transport, store, authenticator, refresh }) }
    }

    /// Build a client backed by `reqwest` from typed config.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_config(config: &ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::new(config.api_url.clone(), config.timeouts)?;
        Ok(Self::new(Arc::new(transport), store, config.auth_scheme))
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    /// Register the session owner to be told when a refresh fails terminally.
    pub fn set_session_observer(&self, observer: Arc<dyn SessionObserver>) {
        self.inner.refresh.set_observer(observer);
    }

    /// Send an authenticated request, refreshing and replaying once on 401.
    ///
    /// Any response the server produced is returned as-is, including a 401 on
    /// the replay.
    ///
    /// # Errors
    ///
    /// - [`ApiError::NetworkUnavailable`] if no response was received.
    /// - [`ApiError::SessionExpired`] if the refresh exchange failed; the
    ///   credentials have been cleared by then.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let sent_with = self.inner.authenticator.authorize(&mut request);
        let response = self.dispatch(&request).await?;
        if response.status != 401 || request.retried {
            return Ok(response);
        }

        request.retried = true;
        tracing::info!(request_id = %request.id, path = %request.path, "401 received; refreshing access token");
        let token = self
            .inner
            .refresh
            .refresh(sent_with.as_deref())
            .await
            .map_err(|e| {
                tracing::warn!(request_id = %request.id, error = %e, "session expired");
                ApiError::SessionExpired
            })?;

        self.inner.authenticator.apply(&mut request, &token);
        let replay = self.dispatch(&request).await?;
        if replay.status == 401 {
            tracing::warn!(request_id = %request.id, path = %request.path, "replay rejected with 401; giving up");
        }
        Ok(replay)
    }

    /// Send without credentials and without refresh handling (login,
    /// registration, token blacklisting).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NetworkUnavailable`] if no response was received.
    pub async fn send_unauthenticated(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.dispatch(&request).await
    }

    /// Send with the current access token attached but without refresh
    /// handling. Used for calls whose failure must not start a refresh, such
    /// as notifying the server of a logout.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NetworkUnavailable`] if no response was received.
    pub async fn send_once(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.inner.authenticator.authorize(&mut request);
        self.dispatch(&request).await
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        tracing::debug!(
            request_id = %request.id,
            method = request.method.as_str(),
            path = %request.path,
            retried = request.retried,
            "api request"
        );
        self.inner.transport.send(request).await.map_err(|e| {
            tracing::warn!(request_id = %request.id, path = %request.path, error = %e, "api request failed");
            ApiError::from(e)
        })
    }

    // =========================================================================
    // JSON HELPERS
    // =========================================================================

    /// `GET path` and decode the body.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ApiError`] for any non-2xx or undecodable response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        decode(self.send(ApiRequest::get(path)).await?)
    }

    /// `POST path` with a JSON body and decode the response.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ApiError`] for any non-2xx or undecodable response.
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        decode(self.send(ApiRequest::post(path, to_value(body)?)).await?)
    }

    /// `PUT path` with a JSON body and decode the response.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ApiError`] for any non-2xx or undecodable response.
    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        decode(self.send(ApiRequest::new(Method::Put, path).with_body(to_value(body)?)).await?)
    }

    /// `DELETE path`, ignoring any body.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ApiError`] for any non-2xx response.
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        ensure_success(self.send(ApiRequest::new(Method::Delete, path)).await?).map(|_| ())
    }
}

pub(crate) fn ensure_success(response: ApiResponse) -> Result<ApiResponse, ApiError> {
    if response.is_success() { Ok(response) } else { Err(ApiError::from_response(&response)) }
}

pub(crate) fn decode<T: DeserializeOwned>(response: ApiResponse) -> Result<T, ApiError> {
    let response = ensure_success(response)?;
    serde_json::from_str(&response.body).map_err(|e| ApiError::Decode(e.to_string()))
}

fn to_value<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
