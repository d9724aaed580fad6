//! Physical HTTP transport.
//!
//! # Responsibilities
//! - Send one fully prepared request and return status, headers and raw body
//! - Map HTTP stack failures onto `TransportErrorKind`
//!
//! # Design Decisions
//! - One `reqwest::Client` is the shared, bounded connection pool
//! - Automatic response decompression is off; the executor decodes bodies
//! - The trait is the seam tests use to count and inspect physical calls

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;

use crate::config::HttpConfig;
use crate::error::{ClientError, ClientResult, TransportErrorKind};
use crate::http::headers::Headers;
use crate::http::request::HttpMethod;

/// Body of one physical attempt.
pub enum TransportBody {
    Empty,
    Bytes(Bytes),
    Stream(BoxStream<'static, io::Result<Bytes>>),
}

pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: TransportBody,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends one request. Implementations must not retry.
pub trait Transport: Send + Sync {
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, ClientResult<TransportResponse>>;
}

/// Production transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &HttpConfig) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build()
            .map_err(|e| ClientError::transport("", TransportErrorKind::Other, e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send_inner(&self, request: TransportRequest) -> ClientResult<TransportResponse> {
        let url = request.url;
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| ClientError::InvalidOperation(e.to_string()))?;

        let mut builder = self.client.request(method, &url).timeout(request.timeout);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        builder = match request.body {
            TransportBody::Empty => builder,
            TransportBody::Bytes(bytes) => builder.body(bytes),
            TransportBody::Stream(stream) => builder.body(reqwest::Body::wrap_stream(stream)),
        };

        let response = builder.send().await.map_err(|e| map_error(&url, e))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| map_error(&url, e))?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, ClientResult<TransportResponse>> {
        Box::pin(self.send_inner(request))
    }
}

fn map_error(url: &str, error: reqwest::Error) -> ClientError {
    let kind = if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if error.is_connect() {
        TransportErrorKind::Connect
    } else if error.is_body() || error.is_decode() {
        TransportErrorKind::Body
    } else {
        TransportErrorKind::Other
    };
    ClientError::transport(url, kind, error.to_string())
}
