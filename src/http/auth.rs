//! Collaborator hooks consumed by the executor.

use futures_util::future::BoxFuture;

use crate::http::headers::Headers;
use crate::http::request::Credentials;
use crate::http::transport::TransportResponse;

/// Document-store conventions the executor consults.
pub trait Conventions: Send + Sync {
    /// Whether responses for `url` may be cached.
    fn should_cache_request(&self, _url: &str) -> bool {
        true
    }

    /// Never gzip request bodies.
    fn disable_request_compression(&self) -> bool {
        false
    }
}

/// Caches everything, compresses unless told otherwise.
#[derive(Debug, Clone, Default)]
pub struct DefaultConventions {
    pub disable_request_compression: bool,
}

impl Conventions for DefaultConventions {
    fn disable_request_compression(&self) -> bool {
        self.disable_request_compression
    }
}

/// Reacts to `401`/`412` and `403` responses.
pub trait AuthenticationHandler: Send + Sync {
    /// Called for `401` and `412`. May amend `headers` (for example with a
    /// fresh token); resolving to `true` re-sends the request.
    fn handle_unauthorized<'a>(
        &'a self,
        response: &'a TransportResponse,
        headers: &'a mut Headers,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, bool>;

    /// Notification for `403`. The request is never re-sent.
    fn handle_forbidden(&self, _response: &TransportResponse) {}
}

/// Declines every retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthentication;

impl AuthenticationHandler for NoAuthentication {
    fn handle_unauthorized<'a>(
        &'a self,
        _response: &'a TransportResponse,
        _headers: &'a mut Headers,
        _credentials: &'a Credentials,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async { false })
    }
}

/// Sends the API key as a bearer token after the first `401`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiKeyAuthentication;

impl AuthenticationHandler for ApiKeyAuthentication {
    fn handle_unauthorized<'a>(
        &'a self,
        _response: &'a TransportResponse,
        headers: &'a mut Headers,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let Some(key) = &credentials.api_key else {
                return false;
            };
            let bearer = format!("Bearer {}", key);
            if headers.get("Authorization") == Some(bearer.as_str()) {
                // Already sent this token; the server rejected it.
                return false;
            }
            headers.set("Authorization", bearer);
            true
        })
    }

    fn handle_forbidden(&self, response: &TransportResponse) {
        tracing::warn!(status = response.status, "API key lacks permission");
    }
}
