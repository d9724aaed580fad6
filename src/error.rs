//! Error taxonomy for the request runtime.

use std::collections::BTreeMap;

use thiserror::Error;

/// Why a physical HTTP call never produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// TCP connect / DNS / TLS failure.
    Connect,
    /// The per-call deadline elapsed.
    Timeout,
    /// The request or response body could not be streamed.
    Body,
    /// Anything else reported by the HTTP stack.
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Body => "body",
            TransportErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Contract violations between this client and the server (or its caller).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// A cached response was requested for a call that had no cache entry.
    #[error("cannot serve a cached response for a request without cached information")]
    NoCachedEntry,

    /// The multi-get response did not pair up with the queued sub-requests.
    #[error("multi-get returned {actual} responses for {expected} requests")]
    BatchLengthMismatch { expected: usize, actual: usize },

    /// A response that had to be cacheable carried no ETag.
    #[error("response for {url} has no ETag")]
    MissingEtag { url: String },

    /// The server answered with something the client cannot interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors surfaced by the request runtime.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never got an HTTP response.
    #[error("{kind} error calling {url}: {message}")]
    Transport {
        url: String,
        kind: TransportErrorKind,
        message: String,
    },

    /// The server answered with an error status.
    #[error("server returned {status}: {message}")]
    Server {
        status: u16,
        message: String,
        /// Remaining structured properties of the error body.
        fields: BTreeMap<String, String>,
    },

    /// `400` with a server-supplied message.
    #[error("bad request: {message}")]
    BadRequest { message: String },

    /// The server rejected an index definition.
    #[error("index compilation failed on {index_definition_property}: {message}")]
    IndexCompilation {
        message: String,
        index_definition_property: String,
        problematic_text: Option<String>,
    },

    /// `403`; never retried.
    #[error("access to {url} is forbidden: {message}")]
    Forbidden { url: String, message: String },

    /// Programmer or wire-contract error. Never retried.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// The operation is not allowed under the configured failover behavior.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The executor or cache was closed.
    #[error("object was disposed")]
    Disposed,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Server { status, .. } => Some(*status),
            ClientError::BadRequest { .. } => Some(400),
            ClientError::Forbidden { .. } => Some(403),
            _ => None,
        }
    }

    /// True when the destination looks unreachable, which is what drives failover.
    pub fn is_server_down(&self) -> bool {
        matches!(
            self,
            ClientError::Transport {
                kind: TransportErrorKind::Connect | TransportErrorKind::Timeout,
                ..
            }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ClientError::Transport {
                kind: TransportErrorKind::Timeout,
                ..
            }
        )
    }

    pub(crate) fn transport(url: &str, kind: TransportErrorKind, message: impl Into<String>) -> Self {
        ClientError::Transport {
            url: url.to_string(),
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn server(status: u16, message: impl Into<String>) -> Self {
        ClientError::Server {
            status,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_down_classification() {
        let err = ClientError::transport("http://a", TransportErrorKind::Connect, "refused");
        assert!(err.is_server_down());
        assert!(!err.is_timeout());

        let err = ClientError::transport("http://a", TransportErrorKind::Timeout, "elapsed");
        assert!(err.is_server_down());
        assert!(err.is_timeout());

        let err = ClientError::transport("http://a", TransportErrorKind::Body, "reset");
        assert!(!err.is_server_down());

        assert!(!ClientError::server(500, "boom").is_server_down());
    }

    #[test]
    fn test_status_accessor() {
        assert_eq!(ClientError::server(404, "missing").status(), Some(404));
        assert_eq!(
            ClientError::BadRequest { message: "no".into() }.status(),
            Some(400)
        );
        assert_eq!(ClientError::Disposed.status(), None);
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::from(ProtocolViolation::BatchLengthMismatch {
            expected: 5,
            actual: 4,
        });
        assert_eq!(
            err.to_string(),
            "protocol error: multi-get returned 4 responses for 5 requests"
        );

        let err = ClientError::IndexCompilation {
            message: "bad map".into(),
            index_definition_property: "Maps".into(),
            problematic_text: Some("from doc in docs".into()),
        };
        assert!(err.to_string().contains("Maps"));
    }
}
