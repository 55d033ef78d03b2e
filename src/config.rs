//! Client configuration parsed from environment variables.

use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LOGOUT_TIMEOUT_SECS: u64 = 5;

/// Errors produced while reading configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid API URL '{0}': expected http:// or https://")]
    InvalidApiUrl(String),
    #[error("unknown HABITBLOOM_AUTH_SCHEME: {0} (expected 'bearer' or 'token')")]
    UnknownAuthScheme(String),
    #[error("unknown HABITBLOOM_LOGOUT_ENDPOINT: {0} (expected 'blacklist' or 'logout')")]
    UnknownLogoutEndpoint(String),
}

/// Prefix placed before the access token in the `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthScheme {
    #[default]
    Bearer,
    Token,
}

impl AuthScheme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bearer => "Bearer",
            Self::Token => "Token",
        }
    }
}

/// Server endpoint used to invalidate the refresh token on logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogoutEndpoint {
    /// `POST token/blacklist/ {refresh}`
    #[default]
    Blacklist,
    /// `POST auth/logout/` (authenticated)
    Logout,
}

impl LogoutEndpoint {
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::Blacklist => "token/blacklist/",
            Self::Logout => "auth/logout/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request: Duration,
    pub connect: Duration,
    /// Bound on the best-effort server notification during logout.
    pub logout: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            logout: Duration::from_secs(DEFAULT_LOGOUT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// API root, always ending in `/` so relative paths join cleanly.
    pub api_url: String,
    pub timeouts: Timeouts,
    pub auth_scheme: AuthScheme,
    pub logout_endpoint: LogoutEndpoint,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            timeouts: Timeouts::default(),
            auth_scheme: AuthScheme::default(),
            logout_endpoint: LogoutEndpoint::default(),
        }
    }
}

impl ClientConfig {
    /// Build a config pointing at `api_url` with every other value defaulted.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidApiUrl`] when the URL has no http(s) scheme.
    pub fn with_api_url(api_url: &str) -> Result<Self, ConfigError> {
        Ok(Self { api_url: normalize_api_url(api_url)?, ..Self::default() })
    }

    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `HABITBLOOM_API_URL`: default `http://localhost:8000/api/`
    /// - `HABITBLOOM_REQUEST_TIMEOUT_SECS`: default 10
    /// - `HABITBLOOM_CONNECT_TIMEOUT_SECS`: default 10
    /// - `HABITBLOOM_LOGOUT_TIMEOUT_SECS`: default 5
    /// - `HABITBLOOM_AUTH_SCHEME`: `bearer` (default) or `token`
    /// - `HABITBLOOM_LOGOUT_ENDPOINT`: `blacklist` (default) or `logout`
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a value is present but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = normalize_api_url(
            std::env::var("HABITBLOOM_API_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .as_deref()
                .unwrap_or(DEFAULT_API_URL),
        )?;
        let timeouts = Timeouts {
            request: Duration::from_secs(env_parse_u64("HABITBLOOM_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)),
            connect: Duration::from_secs(env_parse_u64("HABITBLOOM_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)),
            logout: Duration::from_secs(env_parse_u64("HABITBLOOM_LOGOUT_TIMEOUT_SECS", DEFAULT_LOGOUT_TIMEOUT_SECS)),
        };
        let auth_scheme = parse_auth_scheme(std::env::var("HABITBLOOM_AUTH_SCHEME").ok().as_deref())?;
        let logout_endpoint = parse_logout_endpoint(std::env::var("HABITBLOOM_LOGOUT_ENDPOINT").ok().as_deref())?;

        Ok(Self { api_url, timeouts, auth_scheme, logout_endpoint })
    }
}

pub(crate) fn normalize_api_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::InvalidApiUrl(raw.to_owned()));
    }
    Ok(format!("{}/", trimmed.trim_end_matches('/')))
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn parse_auth_scheme(raw: Option<&str>) -> Result<AuthScheme, ConfigError> {
    match raw.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        None | Some("" | "bearer") => Ok(AuthScheme::Bearer),
        Some("token") => Ok(AuthScheme::Token),
        Some(other) => Err(ConfigError::UnknownAuthScheme(other.to_owned())),
    }
}

fn parse_logout_endpoint(raw: Option<&str>) -> Result<LogoutEndpoint, ConfigError> {
    match raw.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        None | Some("" | "blacklist") => Ok(LogoutEndpoint::Blacklist),
        Some("logout") => Ok(LogoutEndpoint::Logout),
        Some(other) => Err(ConfigError::UnknownLogoutEndpoint(other.to_owned())),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
