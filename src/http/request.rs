//! Request descriptors.
//!
//! # Responsibilities
//! - Describe one logical call (method, URL, metadata, body, credentials)
//! - Turn document metadata into request headers
//! - Provide re-openable streaming bodies so a retry can resend them
//!
//! # Design Decisions
//! - Descriptors are immutable during execution; the executor copies what
//!   it needs into each physical attempt
//! - Streaming bodies are factories, not streams, so every attempt starts
//!   from the first byte

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use serde_json::{Map, Value};
use tokio_util::io::ReaderStream;

use crate::http::headers::{self, Headers};

/// HTTP verbs, including the two custom ones the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Patch,
    Head,
    Eval,
    Reset,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Eval => "EVAL",
            HttpMethod::Reset => "RESET",
        }
    }

    /// Methods whose bodies are gzip-compressed.
    pub fn compresses_body(&self) -> bool {
        matches!(
            self,
            HttpMethod::Put | HttpMethod::Post | HttpMethod::Patch | HttpMethod::Eval
        )
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produces a fresh byte stream for every attempt.
pub trait BodySource: Send + Sync {
    fn open(&self) -> io::Result<BoxStream<'static, io::Result<Bytes>>>;
}

impl<F> BodySource for F
where
    F: Fn() -> io::Result<BoxStream<'static, io::Result<Bytes>>> + Send + Sync,
{
    fn open(&self) -> io::Result<BoxStream<'static, io::Result<Bytes>>> {
        self()
    }
}

/// Streams a file from disk, reopening it for each attempt.
#[derive(Debug, Clone)]
pub struct FileBodySource {
    path: PathBuf,
}

impl FileBodySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BodySource for FileBodySource {
    fn open(&self) -> io::Result<BoxStream<'static, io::Result<Bytes>>> {
        let file = std::fs::File::open(&self.path)?;
        Ok(ReaderStream::new(tokio::fs::File::from_std(file)).boxed())
    }
}

/// Request payload.
#[derive(Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Bytes),
    Stream(Arc<dyn BodySource>),
}

impl RequestBody {
    pub fn json(value: &Value) -> Self {
        RequestBody::Bytes(Bytes::from(value.to_string()))
    }

    /// Textual form for diagnostics; streams are never captured.
    pub fn posted_data(&self) -> Option<String> {
        match self {
            RequestBody::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            RequestBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Credentials handed to the authentication handler.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One logical call.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: HttpMethod,
    /// Document metadata written as headers.
    pub metadata: Map<String, Value>,
    /// Headers set verbatim, after metadata.
    pub headers: Headers,
    pub body: RequestBody,
    pub credentials: Credentials,
    pub disable_compression: bool,
    /// Never consult or fill the response cache.
    pub avoid_caching: bool,
    pub timeout: Option<Duration>,
    /// Use the long-request timeout (bulk operations).
    pub long_request: bool,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            metadata: Map::new(),
            headers: Headers::new(),
            body: RequestBody::Empty,
            credentials: Credentials::default(),
            disable_compression: false,
            avoid_caching: false,
            timeout: None,
            long_request: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_json(self, value: &Value) -> Self {
        self.with_body(RequestBody::json(value))
    }

    pub fn with_stream(self, source: impl BodySource + 'static) -> Self {
        self.with_body(RequestBody::Stream(Arc::new(source)))
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn without_compression(mut self) -> Self {
        self.disable_compression = true;
        self
    }

    pub fn avoid_caching(mut self) -> Self {
        self.avoid_caching = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn long_request(mut self) -> Self {
        self.long_request = true;
        self
    }
}

/// Write document metadata into `headers`.
///
/// Nested objects and arrays have no header form and are skipped. `ETag`
/// becomes `If-None-Match` and `Content-Length` is left to the transport.
pub fn write_metadata(metadata: &Map<String, Value>, headers: &mut Headers) {
    for (name, value) in metadata {
        if value.is_object() || value.is_array() {
            continue;
        }
        if name.eq_ignore_ascii_case(headers::CONTENT_LENGTH) {
            continue;
        }
        let name = if name == headers::ETAG {
            headers::IF_NONE_MATCH
        } else {
            name.as_str()
        };
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        headers.set(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_write_metadata() {
        let metadata = json!({
            "ETag": "\"01-abc\"",
            "Content-Length": 42,
            "Raven-Entity-Name": "Users",
            "Raven-Nested": {"a": 1},
            "Raven-List": [1, 2],
            "Raven-Count": 3,
        });
        let mut headers = Headers::new();
        write_metadata(metadata.as_object().unwrap(), &mut headers);

        assert_eq!(headers.get("If-None-Match"), Some("\"01-abc\""));
        assert_eq!(headers.get("Raven-Entity-Name"), Some("Users"));
        assert_eq!(headers.get("Raven-Count"), Some("3"));
        assert!(!headers.contains("ETag"));
        assert!(!headers.contains("Content-Length"));
        assert!(!headers.contains("Raven-Nested"));
        assert!(!headers.contains("Raven-List"));
    }

    #[test]
    fn test_compressing_methods() {
        assert!(HttpMethod::Eval.compresses_body());
        assert!(HttpMethod::Patch.compresses_body());
        assert!(!HttpMethod::Get.compresses_body());
        assert!(!HttpMethod::Reset.compresses_body());
        assert_eq!(HttpMethod::Reset.to_string(), "RESET");
    }

    #[tokio::test]
    async fn test_file_source_reopens() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"attachment bytes").unwrap();
        let source = FileBodySource::new(file.path());

        for _ in 0..2 {
            let chunks: Vec<Bytes> = source.open().unwrap().try_collect().await.unwrap();
            assert_eq!(chunks.concat(), b"attachment bytes");
        }
    }

    #[test]
    fn test_credentials_are_redacted() {
        let creds = Credentials {
            api_key: Some("secret/key".into()),
        };
        assert!(!format!("{:?}", creds).contains("secret"));
    }
}
