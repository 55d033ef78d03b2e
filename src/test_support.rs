//! Scripted transport and fixtures shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::Semaphore;

use crate::refresh::{REFRESH_PATH, SessionObserver};
use crate::transport::{ApiRequest, ApiResponse, Transport, TransportError};

type Handler = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync>;

/// Records every request and answers through a closure.
///
/// With [`MockTransport::gate_refresh_on_401s`], the refresh endpoint blocks
/// until that many 401 responses have been served, which lets a test line up
/// N concurrent failures before any refresh can complete.
pub(crate) struct MockTransport {
    handler: Handler,
    requests: Mutex<Vec<ApiRequest>>,
    served_401: Arc<Semaphore>,
    refresh_gate: Option<(Arc<Semaphore>, u32)>,
}

impl MockTransport {
    pub(crate) fn new<F>(handler: F) -> Self
    where
        F: Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    {
        Self { handler: Box::new(handler), requests: Mutex::new(Vec::new()), served_401: Arc::new(Semaphore::new(0)), refresh_gate: None }
    }

    pub(crate) fn gate_refresh_on_401s(mut self, count: u32) -> Self {
        self.refresh_gate = Some((Arc::clone(&self.served_401), count));
        self
    }

    /// Refresh requests each take one permit from `gate` before answering.
    pub(crate) fn gate_refresh(mut self, gate: Arc<Semaphore>) -> Self {
        self.refresh_gate = Some((gate, 1));
        self
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests().into_iter().filter(|r| r.path == path).collect()
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.requests_to(REFRESH_PATH).len()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        if request.path == REFRESH_PATH {
            if let Some((gate, count)) = &self.refresh_gate {
                gate.acquire_many(*count).await.unwrap().forget();
            }
        }
        let response = (self.handler)(request);
        if matches!(&response, Ok(r) if r.status == 401) {
            self.served_401.add_permits(1);
        }
        response
    }
}

pub(crate) fn json(status: u16, body: &Value) -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse::json(status, body))
}

pub(crate) fn status(status: u16) -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse::new(status, ""))
}

pub(crate) fn bearer(request: &ApiRequest) -> Option<&str> {
    request.header("Authorization").and_then(|v| v.strip_prefix("Bearer "))
}

/// Counts expiry notifications.
#[derive(Default)]
pub(crate) struct CountingObserver {
    pub(crate) expired: AtomicUsize,
}

impl CountingObserver {
    pub(crate) fn count(&self) -> usize {
        self.expired.load(Ordering::SeqCst)
    }
}

impl SessionObserver for CountingObserver {
    fn session_expired(&self) {
        self.expired.fetch_add(1, Ordering::SeqCst);
    }
}
