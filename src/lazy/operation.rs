//! Deferred operations and their multi-get wire forms.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ClientError, ClientResult, ProtocolViolation};
use crate::http::headers::{self, Headers};

/// Server-side timing header attached to each sub-response.
pub const TEMP_REQUEST_TIME: &str = "Temp-Request-Time";
const NON_AUTHORITATIVE: &str = "Non-Authoritative-Information";

/// One entry of the multi-get request array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubRequest {
    pub url: String,
    pub query: String,
    pub headers: Headers,
}

impl SubRequest {
    pub fn new(url: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: query.into(),
            headers: Headers::new(),
        }
    }

    /// `url?query`; a query that already starts with `?` is appended as is.
    pub fn url_and_query(&self) -> String {
        if self.query.is_empty() {
            self.url.clone()
        } else if self.query.starts_with('?') {
            format!("{}{}", self.url, self.query)
        } else {
            format!("{}?{}", self.url, self.query)
        }
    }
}

/// One entry of the multi-get response array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubResponse {
    #[serde(rename = "Status", alias = "status", default)]
    pub status: u16,
    #[serde(rename = "Result", alias = "result", default, deserialize_with = "embedded_json")]
    pub result: Value,
    #[serde(rename = "Headers", alias = "headers", default)]
    pub headers: Headers,
}

/// Older servers send `Result` as a JSON string.
fn embedded_json<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        other => other,
    })
}

impl SubResponse {
    /// True for statuses the server uses to report a failed sub-request.
    pub fn has_errors(&self) -> bool {
        !matches!(self.status, 0 | 200 | 201 | 203 | 204 | 304 | 404)
    }

    fn etag(&self) -> Option<String> {
        self.headers.etag().map(str::to_string)
    }
}

/// Sort clause of an index query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub descending: bool,
}

/// Query against a named index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexQuery {
    pub query: String,
    pub start: u32,
    pub page_size: u32,
    pub fields_to_fetch: Vec<String>,
    pub sort: Vec<SortField>,
    /// A stale result asks for another round trip.
    pub wait_for_non_stale_results: bool,
}

impl Default for IndexQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            start: 0,
            page_size: 128,
            fields_to_fetch: Vec::new(),
            sort: Vec::new(),
            wait_for_non_stale_results: false,
        }
    }
}

impl IndexQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn minimal_query_string(&self) -> String {
        format!("query={}", escape(&self.query))
    }

    pub fn query_string(&self) -> String {
        let mut out = format!("?{}", self.minimal_query_string());
        if self.start != 0 {
            out.push_str(&format!("&start={}", self.start));
        }
        out.push_str(&format!("&pageSize={}", self.page_size));
        for field in self.fields_to_fetch.iter().filter(|f| !f.is_empty()) {
            out.push_str(&format!("&fetch={}", escape(field)));
        }
        for sort in &self.sort {
            let sign = if sort.descending { "-" } else { "" };
            out.push_str(&format!("&sort={}{}", sign, escape(&sort.field)));
        }
        out
    }
}

/// Facet definitions: a stored setup document or inline facets.
#[derive(Debug, Clone, PartialEq)]
pub enum FacetSource {
    Document(String),
    Inline(Value),
}

/// A request whose execution is postponed until its result is read.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredOperation {
    Load {
        id: String,
    },
    MultiLoad {
        ids: Vec<String>,
        includes: Vec<String>,
    },
    StartsWith {
        prefix: String,
        matches: Option<String>,
        exclude: Option<String>,
        start: u32,
        page_size: u32,
    },
    Query {
        index: String,
        query: IndexQuery,
        includes: Vec<String>,
        headers: Headers,
    },
    Facets {
        index: String,
        query: IndexQuery,
        facets: FacetSource,
        start: u32,
        page_size: Option<u32>,
    },
}

/// A stored document returned by a load.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
    pub etag: Option<String>,
    pub headers: Headers,
}

/// One page of documents whose ids share a prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPage {
    pub documents: Vec<Value>,
    pub next_page_start: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryResult {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub includes: Vec<Value>,
    #[serde(default)]
    pub is_stale: bool,
    #[serde(default)]
    pub total_results: u64,
    #[serde(default)]
    pub skipped_results: u64,
    #[serde(default)]
    pub index_name: Option<String>,
}

/// Resolved value of a deferred operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    /// `None` when the document does not exist.
    Document(Option<Document>),
    MultiLoad { results: Vec<Value>, includes: Vec<Value> },
    /// `None` when the server could not answer the page.
    Page(Option<DocumentPage>),
    Query(QueryResult),
    Facets(Value),
}

/// What handling a sub-response produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub result: OperationResult,
    /// The caller should run the operation again on its own.
    pub requires_retry: bool,
}

impl Outcome {
    fn done(result: OperationResult) -> Self {
        Self {
            result,
            requires_retry: false,
        }
    }
}

impl DeferredOperation {
    pub fn load(id: impl Into<String>) -> Self {
        DeferredOperation::Load { id: id.into() }
    }

    pub fn starts_with(prefix: impl Into<String>, start: u32, page_size: u32) -> Self {
        DeferredOperation::StartsWith {
            prefix: prefix.into(),
            matches: None,
            exclude: None,
            start,
            page_size,
        }
    }

    pub fn query(index: impl Into<String>, query: IndexQuery) -> Self {
        DeferredOperation::Query {
            index: index.into(),
            query,
            includes: Vec::new(),
            headers: Headers::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeferredOperation::Load { .. } => "load",
            DeferredOperation::MultiLoad { .. } => "multi_load",
            DeferredOperation::StartsWith { .. } => "starts_with",
            DeferredOperation::Query { .. } => "query",
            DeferredOperation::Facets { .. } => "facets",
        }
    }

    /// The sub-request this operation contributes to a batch.
    pub fn create_request(&self) -> SubRequest {
        match self {
            DeferredOperation::Load { id } => SubRequest::new("/docs", format!("id={}", escape(id))),
            DeferredOperation::MultiLoad { ids, includes } => {
                let includes: Vec<String> = includes.iter().map(|i| format!("include={}", i)).collect();
                let ids: Vec<String> = ids.iter().map(|id| format!("id={}", escape(id))).collect();
                SubRequest::new("/queries/", format!("?{}&{}", includes.join("&"), ids.join("&")))
            }
            DeferredOperation::StartsWith {
                prefix,
                matches,
                exclude,
                start,
                page_size,
            } => SubRequest::new(
                "/docs",
                format!(
                    "startsWith={}&matches={}&exclude={}&start={}&pageSize={}&next-page=false",
                    escape(prefix),
                    escape(matches.as_deref().unwrap_or("")),
                    escape(exclude.as_deref().unwrap_or("")),
                    start,
                    page_size
                ),
            ),
            DeferredOperation::Query {
                index,
                query,
                includes,
                headers,
            } => {
                let mut query = query.query_string();
                for include in includes {
                    query.push_str(&format!("&include={}", include));
                }
                let mut request = SubRequest::new(format!("/indexes/{}", index), query);
                request.headers.extend_from(headers);
                request
            }
            DeferredOperation::Facets {
                index,
                query,
                facets,
                start,
                page_size,
            } => {
                let addition = match facets {
                    FacetSource::Document(id) => format!("facetDoc={}", id),
                    FacetSource::Inline(value) => format!("facets={}", escape(&value.to_string())),
                };
                let page_size = page_size.map(|p| p.to_string()).unwrap_or_default();
                SubRequest::new(
                    format!("/facets/{}", index),
                    format!(
                        "{}&facetStart={}&facetPageSize={}&{}",
                        query.minimal_query_string(),
                        start,
                        page_size,
                        addition
                    ),
                )
            }
        }
    }

    /// Interpret this operation's slice of the batch response.
    pub fn handle_response(&self, response: &SubResponse) -> ClientResult<Outcome> {
        match self {
            DeferredOperation::Load { id } => {
                if response.status == 404 {
                    return Ok(Outcome::done(OperationResult::Document(None)));
                }
                let document = Document {
                    id: id.clone(),
                    data: response.result.clone(),
                    etag: response.etag(),
                    headers: response.headers.clone(),
                };
                Ok(Outcome {
                    // 203: served by a replica that is not authoritative yet.
                    requires_retry: response.status == 203,
                    result: OperationResult::Document(Some(document)),
                })
            }
            DeferredOperation::MultiLoad { .. } => {
                let results = array_field(&response.result, "Results");
                let includes = array_field(&response.result, "Includes");
                let requires_retry = results.iter().any(is_non_authoritative);
                Ok(Outcome {
                    result: OperationResult::MultiLoad { results, includes },
                    requires_retry,
                })
            }
            DeferredOperation::StartsWith { .. } => {
                if response.status == 404 {
                    return Ok(Outcome::done(OperationResult::Page(None)));
                }
                let documents = response.result.as_array().cloned().unwrap_or_default();
                let next_page_start = response
                    .headers
                    .get(headers::NEXT_PAGE_START)
                    .and_then(|v| v.trim().parse().ok());
                Ok(Outcome::done(OperationResult::Page(Some(DocumentPage {
                    documents,
                    next_page_start,
                }))))
            }
            DeferredOperation::Query { index, query, .. } => {
                if response.status == 404 {
                    return Err(ClientError::server(
                        404,
                        format!("There is no index named: {}", index),
                    ));
                }
                let result: QueryResult = serde_json::from_value(response.result.clone()).map_err(|e| {
                    ProtocolViolation::InvalidResponse(format!("query result for {}: {}", index, e))
                })?;
                Ok(Outcome {
                    requires_retry: query.wait_for_non_stale_results && result.is_stale,
                    result: OperationResult::Query(result),
                })
            }
            DeferredOperation::Facets { .. } => {
                if !matches!(response.status, 200 | 304) {
                    return Err(ClientError::server(
                        response.status,
                        format!(
                            "Got an unexpected response code for the request: {}\n{}",
                            response.status, response.result
                        ),
                    ));
                }
                Ok(Outcome::done(OperationResult::Facets(response.result.clone())))
            }
        }
    }
}

fn array_field(value: &Value, name: &str) -> Vec<Value> {
    value
        .get(name)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn is_non_authoritative(document: &Value) -> bool {
    document
        .pointer(&format!("/@metadata/{}", NON_AUTHORITATIVE))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Escape a query-string value.
pub fn escape(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
