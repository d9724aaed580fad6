//! Request execution.
//!
//! # Responsibilities
//! - Build and send one logical call, re-sending it on authentication retries
//! - Consult the response cache (conditional GET, aggressive window)
//! - Compress request bodies and decode response bodies
//! - Emit one profiling event per execution, on success and failure alike
//!
//! # Data Flow
//! ```text
//! RequestDescriptor + RequestContext
//!     → cache lookup (aggressive hit returns here, no network)
//!     → headers (client version, metadata, If-None-Match, Cache-Control)
//!     → configure-request observers
//!     → transport attempt(s), bounded by the retry budget
//!     → 304: cached body | 2xx: parse + cache | other: typed error
//!     → request-completed observers, tracing, metrics
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::cache::{CachedEntry, ResponseCache};
use crate::config::{ClientConfig, HttpConfig};
use crate::error::{ClientError, ClientResult, ProtocolViolation, TransportErrorKind};
use crate::http::auth::{AuthenticationHandler, Conventions, DefaultConventions, NoAuthentication};
use crate::http::codec;
use crate::http::context::RequestContext;
use crate::http::headers::{self, Headers};
use crate::http::request::{write_metadata, HttpMethod, RequestBody, RequestDescriptor};
use crate::http::response::{parse_error, HttpResponse, RawResponse};
use crate::http::transport::{ReqwestTransport, Transport, TransportBody, TransportRequest, TransportResponse};
use crate::observability::{metrics, EventList, RequestResultArgs, RequestStatus};
use crate::resilience::{classify, resolve_timeout, with_deadline, Attempt, FailureKind, RetryBudget};

/// Arguments handed to configure-request observers before the first send.
#[derive(Debug, Clone)]
pub struct ConfigureRequestArgs {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
}

/// Outcome of a cache consultation.
#[derive(Debug, Default)]
pub(crate) struct CacheLookup {
    pub entry: Option<CachedEntry>,
    pub skip_server_check: bool,
}

/// Bookkeeping for one logical execution.
struct Exchange {
    request_id: Uuid,
    started: Instant,
    method: HttpMethod,
    url: String,
    /// Rendered as text only when an observer is listening.
    body: RequestBody,
}

impl Exchange {
    fn begin(descriptor: &RequestDescriptor) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            started: Instant::now(),
            method: descriptor.method,
            url: descriptor.url.clone(),
            body: descriptor.body.clone(),
        }
    }
}

/// Shared request executor.
///
/// Cheap to share behind `Arc`; every piece of mutable state (cache,
/// counters, observer lists) is synchronized internally.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    cache: Arc<ResponseCache>,
    conventions: Arc<dyn Conventions>,
    authentication: Arc<dyn AuthenticationHandler>,
    http: HttpConfig,
    max_attempts: u32,
    request_completed: EventList<RequestResultArgs>,
    configure_request: EventList<ConfigureRequestArgs>,
    cached_requests: AtomicU64,
    cache_resets: AtomicU64,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>, cache: Arc<ResponseCache>, config: &ClientConfig) -> Self {
        Self {
            transport,
            cache,
            conventions: Arc::new(DefaultConventions {
                disable_request_compression: config.http.disable_request_compression,
            }),
            authentication: Arc::new(NoAuthentication),
            http: config.http.clone(),
            max_attempts: config.retries.max_attempts,
            request_completed: EventList::new(),
            configure_request: EventList::new(),
            cached_requests: AtomicU64::new(0),
            cache_resets: AtomicU64::new(0),
        }
    }

    /// Executor over a fresh `reqwest` pool and response cache.
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config.http)?);
        let cache = Arc::new(ResponseCache::from_config(&config.cache));
        Ok(Self::new(transport, cache, config))
    }

    pub fn with_conventions(mut self, conventions: Arc<dyn Conventions>) -> Self {
        self.conventions = conventions;
        self
    }

    pub fn with_authentication(mut self, handler: Arc<dyn AuthenticationHandler>) -> Self {
        self.authentication = handler;
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn conventions(&self) -> &dyn Conventions {
        self.conventions.as_ref()
    }

    pub fn http_config(&self) -> &HttpConfig {
        &self.http
    }

    pub fn request_completed(&self) -> &EventList<RequestResultArgs> {
        &self.request_completed
    }

    pub fn configure_request(&self) -> &EventList<ConfigureRequestArgs> {
        &self.configure_request
    }

    /// Responses served from the cache, revalidated or not.
    pub fn cached_request_count(&self) -> u64 {
        self.cached_requests.load(Ordering::Relaxed)
    }

    pub fn cache_reset_count(&self) -> u64 {
        self.cache_resets.load(Ordering::Relaxed)
    }

    pub(crate) fn record_cached_request(&self) {
        self.cached_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Force revalidation of every cached response of `database`.
    pub fn expire_items_from_cache(&self, database: &str) -> ClientResult<usize> {
        let flagged = self.cache.force_server_check(database)?;
        self.cache_resets.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(database, flagged, "Expired cached responses");
        Ok(flagged)
    }

    /// Close the shared cache; later executions fail with `Disposed`.
    pub fn close(&self) {
        self.cache.close();
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.cache.is_closed() {
            return Err(ClientError::Disposed);
        }
        Ok(())
    }

    /// Consult the cache for `url` and add the matching validation headers.
    ///
    /// `skip_server_check` is set when the entry is inside the caller's
    /// aggressive window and nobody forced a server check.
    pub(crate) fn configure_caching(
        &self,
        ctx: &RequestContext,
        url: &str,
        headers: &mut Headers,
    ) -> ClientResult<CacheLookup> {
        let Some(entry) = self.cache.get(url)? else {
            return Ok(CacheLookup::default());
        };
        if let Some(window) = ctx.aggressive_cache {
            if !entry.force_server_check && entry.age() < window {
                return Ok(CacheLookup {
                    entry: Some(entry),
                    skip_server_check: true,
                });
            }
            if window.as_secs() > 0 {
                headers.set(headers::CACHE_CONTROL, format!("max-age={}", window.as_secs()));
            }
            self.cache.clear_force_check(url)?;
        }
        if let Some(etag) = entry.etag() {
            headers.set(headers::IF_NONE_MATCH, etag);
        }
        Ok(CacheLookup {
            entry: Some(entry),
            skip_server_check: false,
        })
    }

    fn should_cache(&self, ctx: &RequestContext, descriptor: &RequestDescriptor) -> bool {
        descriptor.method == HttpMethod::Get
            && !descriptor.avoid_caching
            && !ctx.disable_http_caching
            && self.conventions.should_cache_request(&descriptor.url)
    }

    fn compresses(&self, descriptor: &RequestDescriptor) -> bool {
        descriptor.method.compresses_body()
            && !descriptor.disable_compression
            && !self.conventions.disable_request_compression()
            && !matches!(descriptor.body, RequestBody::Empty)
    }

    fn base_headers(&self, descriptor: &RequestDescriptor) -> Headers {
        let mut headers = Headers::new();
        headers.set(headers::CLIENT_VERSION, headers::CLIENT_VERSION_VALUE);
        headers.set(headers::ACCEPT_ENCODING, "gzip,deflate");
        write_metadata(&descriptor.metadata, &mut headers);
        headers.extend_from(&descriptor.headers);
        if self.compresses(descriptor) {
            headers.set(headers::CONTENT_ENCODING, "gzip");
        }
        headers
    }

    fn notify_configure(&self, descriptor: &RequestDescriptor, headers: &mut Headers) {
        if self.configure_request.is_empty() {
            return;
        }
        let mut args = ConfigureRequestArgs {
            method: descriptor.method,
            url: descriptor.url.clone(),
            headers: std::mem::take(headers),
        };
        self.configure_request.notify(&mut args);
        *headers = args.headers;
    }

    /// Execute and return the parsed response.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        descriptor: &RequestDescriptor,
    ) -> ClientResult<HttpResponse> {
        let exchange = Exchange::begin(descriptor);
        self.ensure_open().map_err(|e| self.abort(&exchange, 0, e))?;
        let mut headers = self.base_headers(descriptor);
        let should_cache = self.should_cache(ctx, descriptor);

        let mut cached = None;
        if should_cache {
            let lookup = self
                .configure_caching(ctx, &descriptor.url, &mut headers)
                .map_err(|e| self.abort(&exchange, 0, e))?;
            if lookup.skip_server_check {
                if let Some(entry) = lookup.entry {
                    return Ok(self.serve_aggressively(&exchange, entry));
                }
            }
            cached = lookup.entry;
        }

        self.notify_configure(descriptor, &mut headers);
        let response = self
            .send_with_retries(ctx, descriptor, &mut headers, &exchange)
            .await?;

        if response.status == 304 {
            let Some(entry) = cached else {
                self.emit(&exchange, 304, RequestStatus::ErrorOnServer, String::new(), BTreeMap::new());
                return Err(ProtocolViolation::NoCachedEntry.into());
            };
            let entry = self
                .cache
                .refresh(&descriptor.url)
                .map_err(|e| self.abort(&exchange, 304, e))?
                .unwrap_or(entry);
            return Ok(self.serve_revalidated(&exchange, entry, &response.headers));
        }

        if !(200..300).contains(&response.status) {
            return Err(self.fail(&exchange, &response));
        }

        let text = response.body_text();
        let body = if response.body.is_empty() {
            None
        } else {
            match serde_json::from_slice::<Value>(&response.body) {
                Ok(value) => Some(value),
                Err(e) => {
                    self.emit(&exchange, response.status, RequestStatus::ErrorOnServer, text, BTreeMap::new());
                    return Err(e.into());
                }
            }
        };

        if should_cache {
            if let Some(data) = &body {
                self.cache
                    .set(&descriptor.url, data.clone(), &response.headers)
                    .map_err(|e| self.abort(&exchange, response.status, e))?;
            }
        }

        self.emit(&exchange, response.status, RequestStatus::SendToServer, text, BTreeMap::new());
        Ok(HttpResponse {
            status: response.status,
            headers: response.headers,
            body,
            request_status: RequestStatus::SendToServer,
        })
    }

    /// Execute and return only the JSON body (`Null` when empty).
    pub async fn execute_json(
        &self,
        ctx: &RequestContext,
        descriptor: &RequestDescriptor,
    ) -> ClientResult<Value> {
        self.execute(ctx, descriptor).await.map(HttpResponse::into_json)
    }

    /// Execute without caching and return the undecoded-JSON body bytes.
    pub async fn execute_raw(
        &self,
        ctx: &RequestContext,
        descriptor: &RequestDescriptor,
    ) -> ClientResult<RawResponse> {
        let exchange = Exchange::begin(descriptor);
        self.ensure_open().map_err(|e| self.abort(&exchange, 0, e))?;
        let mut headers = self.base_headers(descriptor);
        self.notify_configure(descriptor, &mut headers);

        let response = self
            .send_with_retries(ctx, descriptor, &mut headers, &exchange)
            .await?;
        if !matches!(classify(response.status), Attempt::Success) {
            return Err(self.fail(&exchange, &response));
        }

        self.emit(
            &exchange,
            response.status,
            RequestStatus::SendToServer,
            format!("<{} bytes>", response.body.len()),
            BTreeMap::new(),
        );
        Ok(RawResponse {
            status: response.status,
            headers: response.headers,
            body: response.body,
        })
    }

    /// Gzip buffered bodies once; streams are compressed per attempt.
    fn prepare_body(&self, descriptor: &RequestDescriptor) -> ClientResult<(RequestBody, bool)> {
        let compress = self.compresses(descriptor);
        Ok(match &descriptor.body {
            RequestBody::Bytes(bytes) if compress => (RequestBody::Bytes(codec::gzip(bytes)?), false),
            other => (other.clone(), compress),
        })
    }

    fn attempt_body(body: &RequestBody, compress_stream: bool) -> ClientResult<TransportBody> {
        Ok(match body {
            RequestBody::Empty => TransportBody::Empty,
            RequestBody::Bytes(bytes) => TransportBody::Bytes(bytes.clone()),
            RequestBody::Stream(source) => {
                let stream = source.open()?;
                if compress_stream {
                    TransportBody::Stream(codec::gzip_stream(stream))
                } else {
                    TransportBody::Stream(stream)
                }
            }
        })
    }

    /// Send until success, a fatal status, or the retry budget runs out.
    /// Error statuses are returned as responses; transport failures as errors.
    async fn send_with_retries(
        &self,
        ctx: &RequestContext,
        descriptor: &RequestDescriptor,
        headers: &mut Headers,
        exchange: &Exchange,
    ) -> ClientResult<TransportResponse> {
        let timeout = resolve_timeout(
            descriptor.timeout,
            ctx.request_timeout,
            descriptor.long_request,
            &self.http,
        );
        let (body, compress_stream) = self
            .prepare_body(descriptor)
            .map_err(|e| self.abort(exchange, 0, e))?;
        let mut budget = RetryBudget::new(self.max_attempts);
        let mut last = None;

        while budget.try_acquire() {
            tracing::debug!(
                request_id = %exchange.request_id,
                method = %descriptor.method,
                url = %loggable_url(&descriptor.url),
                attempt = budget.attempts(),
                "Sending request"
            );
            let attempt_body = Self::attempt_body(&body, compress_stream).map_err(|e| self.abort(exchange, 0, e))?;
            let request = TransportRequest {
                method: descriptor.method,
                url: descriptor.url.clone(),
                headers: headers.clone(),
                body: attempt_body,
                timeout,
            };

            let sent = with_deadline(timeout, &descriptor.url, self.transport.send(request)).await;
            let mut response = match sent {
                Ok(response) => response,
                Err(e) => return Err(self.abort(exchange, 0, e)),
            };
            let status = response.status;
            let encoding = response.headers.get(headers::CONTENT_ENCODING).map(str::to_string);
            response.body = codec::decode_body(encoding.as_deref(), response.body).map_err(|e| {
                let error = ClientError::transport(&descriptor.url, TransportErrorKind::Body, e.to_string());
                self.abort(exchange, status, error)
            })?;

            match classify(response.status) {
                Attempt::RetryableFailure(kind) => {
                    if budget.has_remaining()
                        && self
                            .authentication
                            .handle_unauthorized(&response, headers, &descriptor.credentials)
                            .await
                    {
                        tracing::debug!(
                            request_id = %exchange.request_id,
                            ?kind,
                            "Retrying after authentication challenge"
                        );
                        last = Some(response);
                        continue;
                    }
                    return Ok(response);
                }
                Attempt::FatalFailure(FailureKind::Forbidden) => {
                    self.authentication.handle_forbidden(&response);
                    return Ok(response);
                }
                Attempt::Success | Attempt::FatalFailure(_) => return Ok(response),
            }
        }

        last.ok_or_else(|| {
            self.abort(
                exchange,
                0,
                ClientError::InvalidOperation("no attempt was made".to_string()),
            )
        })
    }

    fn serve_aggressively(&self, exchange: &Exchange, entry: CachedEntry) -> HttpResponse {
        self.record_cached_request();
        self.emit(exchange, 0, RequestStatus::AggressivelyCached, String::new(), BTreeMap::new());
        HttpResponse {
            status: 304,
            headers: entry.headers,
            body: Some(entry.data.as_ref().clone()),
            request_status: RequestStatus::AggressivelyCached,
        }
    }

    fn serve_revalidated(
        &self,
        exchange: &Exchange,
        entry: CachedEntry,
        response_headers: &Headers,
    ) -> HttpResponse {
        self.record_cached_request();
        let mut headers = entry.headers;
        if let Some(force) = response_headers.get(headers::FORCE_PRIMARY_SERVER_CHECK) {
            headers.set(headers::FORCE_PRIMARY_SERVER_CHECK, force);
        }
        self.emit(exchange, 304, RequestStatus::Cached, String::new(), BTreeMap::new());
        HttpResponse {
            status: 304,
            headers,
            body: Some(entry.data.as_ref().clone()),
            request_status: RequestStatus::Cached,
        }
    }

    /// Record `error` as this exchange's outcome and hand it back.
    fn abort(&self, exchange: &Exchange, http_result: u16, error: ClientError) -> ClientError {
        self.emit(exchange, http_result, RequestStatus::ErrorOnServer, error.to_string(), BTreeMap::new());
        error
    }

    fn fail(&self, exchange: &Exchange, response: &TransportResponse) -> ClientError {
        let text = response.body_text();
        self.emit(exchange, response.status, RequestStatus::ErrorOnServer, text.clone(), BTreeMap::new());
        parse_error(response.status, &exchange.url, &text)
    }

    /// Profiling event for a batch served entirely from the local cache.
    pub(crate) fn record_local_batch(
        &self,
        url: &str,
        posted_data: Option<String>,
        additional_information: BTreeMap<String, String>,
    ) {
        let exchange = Exchange {
            request_id: Uuid::new_v4(),
            started: Instant::now(),
            method: HttpMethod::Post,
            url: url.to_string(),
            body: posted_data.map_or(RequestBody::Empty, |text| RequestBody::Bytes(Bytes::from(text))),
        };
        self.emit(
            &exchange,
            0,
            RequestStatus::AggressivelyCached,
            String::new(),
            additional_information,
        );
    }

    fn emit(
        &self,
        exchange: &Exchange,
        http_result: u16,
        status: RequestStatus,
        result: String,
        additional_information: BTreeMap<String, String>,
    ) {
        let duration = exchange.started.elapsed();
        let url = loggable_url(&exchange.url);
        match status {
            RequestStatus::ErrorOnServer => tracing::warn!(
                request_id = %exchange.request_id,
                method = %exchange.method,
                url = %url,
                http_result,
                status = %status,
                duration_ms = duration.as_millis() as u64,
                "Request failed"
            ),
            _ => tracing::debug!(
                request_id = %exchange.request_id,
                method = %exchange.method,
                url = %url,
                http_result,
                status = %status,
                duration_ms = duration.as_millis() as u64,
                "Request completed"
            ),
        }

        metrics::record_request(exchange.method.as_str(), status, duration);
        if matches!(status, RequestStatus::Cached | RequestStatus::AggressivelyCached) {
            metrics::record_cache_hit(status);
        }

        if self.request_completed.is_empty() {
            return;
        }
        let mut args = RequestResultArgs {
            request_id: exchange.request_id,
            duration,
            method: exchange.method.as_str().to_string(),
            url,
            http_result,
            status,
            result,
            posted_data: exchange.body.posted_data(),
            additional_information,
        };
        self.request_completed.notify(&mut args);
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("cache", &self.cache)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Path and query of `raw`; scheme, host and user info are dropped.
pub(crate) fn loggable_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        },
        Err(_) => raw.to_string(),
    }
}
