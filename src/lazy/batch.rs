//! Multi-get execution.
//!
//! # Data Flow
//! ```text
//! [SubRequest; n] + target
//!     → per sub-request cache consult (If-None-Match, aggressive hits → null)
//!     → all null: serve from cache, no network
//!     → POST <target>/multi_get  body: [SubRequest | null; n]
//!     → [SubResponse | null; n]  (length must be n)
//!     → null / 304: fill from cache | 2xx + ETag: store in cache
//! ```

use std::collections::BTreeMap;

use serde_json::Value;

use crate::cache::CachedEntry;
use crate::error::{ClientResult, ProtocolViolation};
use crate::http::context::RequestContext;
use crate::http::executor::{loggable_url, RequestExecutor};
use crate::http::headers::{self, Headers};
use crate::http::request::RequestDescriptor;
use crate::lazy::operation::{SubRequest, SubResponse};
use crate::observability::RequestStatus;
use crate::replication::ResolvedTarget;

/// Multi-get endpoint of `target_url`.
pub fn multi_get_url(target_url: &str, parallel: bool) -> String {
    let mut url = format!("{}/multi_get", target_url);
    if parallel {
        url.push_str("?parallel=yes");
    }
    url
}

/// Send `requests` to `target` as one physical call and return one
/// sub-response per request, in order.
pub async fn execute_multi_get(
    executor: &RequestExecutor,
    ctx: &RequestContext,
    target: &ResolvedTarget,
    requests: &[SubRequest],
) -> ClientResult<Vec<SubResponse>> {
    let request_uri = multi_get_url(&target.url, executor.http_config().use_parallel_multi_get);
    let caching = !ctx.disable_http_caching && executor.conventions().should_cache_request(&request_uri);

    let mut outgoing: Vec<Option<SubRequest>> = Vec::with_capacity(requests.len());
    let mut cached: Vec<Option<CachedEntry>> = Vec::with_capacity(requests.len());
    for request in requests {
        let mut request = request.clone();
        request
            .headers
            .set(headers::CLIENT_VERSION, headers::CLIENT_VERSION_VALUE);
        if caching {
            let key = format!("{}{}", target.url, request.url_and_query());
            let lookup = executor.configure_caching(ctx, &key, &mut request.headers)?;
            let skip = lookup.skip_server_check && lookup.entry.is_some();
            cached.push(lookup.entry);
            outgoing.push((!skip).then_some(request));
        } else {
            cached.push(None);
            outgoing.push(Some(request));
        }
    }

    let body = serde_json::to_value(&outgoing)?;
    if !outgoing.is_empty() && outgoing.iter().all(Option::is_none) {
        executor.record_local_batch(&request_uri, Some(body.to_string()), BTreeMap::new());
        let responses = vec![None; requests.len()];
        return fill_responses(executor, target, requests, responses, &cached);
    }

    let mut descriptor = RequestDescriptor::post(request_uri).with_json(&body);
    descriptor.headers.extend_from(&target.headers);
    let response = executor.execute(ctx, &descriptor).await?;

    let entries = match response.into_json() {
        Value::Array(entries) => entries,
        other => {
            return Err(ProtocolViolation::InvalidResponse(format!(
                "multi-get answered with {} instead of an array",
                json_kind(&other)
            ))
            .into())
        }
    };
    if entries.len() != requests.len() {
        return Err(ProtocolViolation::BatchLengthMismatch {
            expected: requests.len(),
            actual: entries.len(),
        }
        .into());
    }

    let responses = entries
        .into_iter()
        .map(|entry| match entry {
            Value::Null => Ok(None),
            other => serde_json::from_value::<SubResponse>(other).map(Some),
        })
        .collect::<Result<Vec<_>, _>>()?;

    fill_responses(executor, target, requests, responses, &cached)
}

fn fill_responses(
    executor: &RequestExecutor,
    target: &ResolvedTarget,
    requests: &[SubRequest],
    responses: Vec<Option<SubResponse>>,
    cached: &[Option<CachedEntry>],
) -> ClientResult<Vec<SubResponse>> {
    let mut filled = Vec::with_capacity(responses.len());
    let mut statuses = Vec::with_capacity(responses.len());

    for (i, response) in responses.into_iter().enumerate() {
        let key = format!("{}{}", target.url, requests[i].url_and_query());
        match response {
            Some(response) if response.status != 304 => {
                statuses.push(if response.has_errors() {
                    RequestStatus::ErrorOnServer
                } else {
                    RequestStatus::SendToServer
                });
                if (200..300).contains(&response.status) && executor.cache().set(&key, response.result.clone(), &response.headers)? {
                    tracing::trace!(url = %loggable_url(&key), "Cached multi-get sub-response");
                }
                filled.push(response);
            }
            response => {
                let Some(entry) = cached[i].as_ref() else {
                    return Err(ProtocolViolation::NoCachedEntry.into());
                };
                let aggressive = response.is_none();
                statuses.push(if aggressive {
                    RequestStatus::AggressivelyCached
                } else {
                    RequestStatus::Cached
                });
                let mut headers: Headers = response.map(|r| r.headers).unwrap_or_default();
                headers.extend_from(&entry.headers);
                if !aggressive {
                    executor.cache().refresh(&key)?;
                }
                executor.record_cached_request();
                filled.push(SubResponse {
                    status: 304,
                    result: entry.data.as_ref().clone(),
                    headers,
                });
            }
        }
    }

    if statuses
        .iter()
        .any(|s| matches!(s, RequestStatus::Cached | RequestStatus::AggressivelyCached))
    {
        for (i, status) in statuses.iter().enumerate() {
            tracing::debug!(
                index = i,
                url = %requests[i].url_and_query(),
                status = %status,
                "Multi-get sub-request"
            );
        }
    }
    Ok(filled)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
