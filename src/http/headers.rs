//! Header names and a small case-insensitive header map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const ETAG: &str = "ETag";
pub const IF_NONE_MATCH: &str = "If-None-Match";
pub const CACHE_CONTROL: &str = "Cache-Control";
pub const CONTENT_ENCODING: &str = "Content-Encoding";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const ACCEPT_ENCODING: &str = "Accept-Encoding";
pub const CLIENT_VERSION: &str = "Raven-Client-Version";
pub const PRIMARY_SERVER_URL: &str = "Raven-Client-Primary-Server-Url";
pub const PRIMARY_SERVER_LAST_CHECK: &str = "Raven-Client-Primary-Server-LastCheck";
pub const FORCE_PRIMARY_SERVER_CHECK: &str = "Raven-Force-Primary-Server-Check";
pub const NEXT_PAGE_START: &str = "Next-Page-Start";

/// Value sent in [`CLIENT_VERSION`].
pub const CLIENT_VERSION_VALUE: &str = "3.0.0.0";

/// Header map keyed by the name as first written.
///
/// Lookups ignore ASCII case; setting a header replaces any existing entry
/// whose name differs only in case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_of(&self, name: &str) -> Option<&String> {
        self.0.keys().find(|k| k.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.key_of(name)
            .and_then(|k| self.0.get(k))
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.key_of(name).is_some()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if let Some(existing) = self.key_of(&name).cloned() {
            self.0.remove(&existing);
        }
        self.0.insert(name, value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let key = self.key_of(name)?.clone();
        self.0.remove(&key)
    }

    /// Copy every header of `other` over this map.
    pub fn extend_from(&mut self, other: &Headers) {
        for (name, value) in other.iter() {
            self.set(name, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Non-empty ETag, if present.
    pub fn etag(&self) -> Option<&str> {
        self.get(ETAG).filter(|v| !v.trim().is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.set(k, v);
        }
        headers
    }
}
