//! HabitBloom API client: credential storage, request authentication,
//! single-flight token refresh and the session controller, plus a typed
//! client for the habit resources.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use habitbloom::{ClientConfig, MemoryStore, SessionController};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env()?;
//! let session = SessionController::from_config(&config, Arc::new(MemoryStore::new()))?;
//! session.login("me@example.com", "secret").await?;
//! # Ok(())
//! # }
//! ```

pub mod authenticator;
pub mod client;
pub mod config;
pub mod error;
pub mod habits;
pub mod refresh;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::ApiClient;
pub use config::{AuthScheme, ClientConfig, ConfigError, LogoutEndpoint};
pub use error::ApiError;
pub use habits::HabitsApi;
pub use session::{AuthOutcome, Session, SessionController, SessionStatus, UserProfile};
pub use store::{CredentialPair, CredentialStore, FileStore, MemoryStore};
