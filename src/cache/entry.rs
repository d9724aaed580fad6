//! A single cached response.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::http::headers::Headers;

/// Snapshot of a response kept for conditional revalidation.
///
/// `data` is shared behind an `Arc` and never mutated in place; callers that
/// want to edit it get their own copy (`Arc::make_mut` or `Value::clone`).
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub url: String,
    pub data: Arc<Value>,
    pub headers: Headers,
    pub captured_at: Instant,
    pub force_server_check: bool,
    pub database: Option<String>,
}

impl CachedEntry {
    pub(crate) fn new(url: &str, data: Value, headers: Headers) -> Self {
        Self {
            url: url.to_string(),
            data: Arc::new(data),
            headers,
            captured_at: Instant::now(),
            force_server_check: false,
            database: database_from_url(url),
        }
    }

    pub fn etag(&self) -> Option<&str> {
        self.headers.etag()
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

/// Database name embedded in a URL as `/databases/<name>`.
pub fn database_from_url(url: &str) -> Option<String> {
    const MARKER: &str = "/databases/";
    let lower = url.to_ascii_lowercase();
    let start = lower.find(MARKER)? + MARKER.len();
    let rest = &url[start..];
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let name = &rest[..end];
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
