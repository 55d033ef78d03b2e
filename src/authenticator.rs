//! Attaches the stored access token to outgoing requests.

use std::sync::Arc;

use crate::config::AuthScheme;
use crate::store::{self, CredentialStore};
use crate::transport::ApiRequest;

pub const AUTHORIZATION: &str = "Authorization";

#[derive(Clone)]
pub struct RequestAuthenticator {
    store: Arc<dyn CredentialStore>,
    scheme: AuthScheme,
}

impl RequestAuthenticator {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, scheme: AuthScheme) -> Self {
        Self { store, scheme }
    }

    /// Decorate `request` with the current access token, if any.
    ///
    /// Returns the token that was attached so a later 401 can be matched
    /// against the token it was actually sent with. Without a token the
    /// request goes out unauthenticated and the server decides.
    pub fn authorize(&self, request: &mut ApiRequest) -> Option<String> {
        match store::load_or_absent(self.store.as_ref()) {
            Some(pair) => {
                self.apply(request, &pair.access_token);
                Some(pair.access_token)
            }
            None => {
                request.remove_header(AUTHORIZATION);
                None
            }
        }
    }

    /// Set the header to a specific token (used for replays).
    pub fn apply(&self, request: &mut ApiRequest, access_token: &str) {
        request.set_header(AUTHORIZATION, self.header_value(access_token));
    }

    #[must_use]
    pub fn header_value(&self, access_token: &str) -> String {
        format!("{} {access_token}", self.scheme.as_str())
    }
}

#[cfg(test)]
#[path = "authenticator_test.rs"]
mod tests;
