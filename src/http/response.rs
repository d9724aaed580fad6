//! Executor results and server error bodies.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde_json::Value;

use crate::error::ClientError;
use crate::http::headers::Headers;
use crate::observability::RequestStatus;

/// Result of [`RequestExecutor::execute`](crate::http::RequestExecutor::execute).
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// `304` when the body came from the cache.
    pub status: u16,
    pub headers: Headers,
    /// Parsed JSON body; `None` for empty bodies.
    pub body: Option<Value>,
    pub request_status: RequestStatus,
}

impl HttpResponse {
    pub fn is_from_cache(&self) -> bool {
        matches!(
            self.request_status,
            RequestStatus::Cached | RequestStatus::AggressivelyCached
        )
    }

    /// Body as JSON, `Value::Null` when empty.
    pub fn into_json(self) -> Value {
        self.body.unwrap_or(Value::Null)
    }
}

/// Result of [`RequestExecutor::execute_raw`](crate::http::RequestExecutor::execute_raw).
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

/// Turn an error response into the most specific `ClientError`.
pub fn parse_error(status: u16, url: &str, body: &str) -> ClientError {
    if body.trim().is_empty() {
        return error_for_status(status, url, format!("server returned {} with an empty body", status));
    }

    let object = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(object)) => object,
        _ => return error_for_status(status, url, body.to_string()),
    };

    if let Some(property) = object.get("IndexDefinitionProperty").and_then(Value::as_str) {
        return ClientError::IndexCompilation {
            message: text_of(object.get("Message").or_else(|| object.get("Error"))),
            index_definition_property: property.to_string(),
            problematic_text: object
                .get("ProblematicText")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
    }

    if status == 400 {
        if let Some(message) = object.get("Message").and_then(Value::as_str) {
            return ClientError::BadRequest {
                message: message.to_string(),
            };
        }
    }

    let Some(error) = object.get("Error") else {
        return error_for_status(status, url, body.to_string());
    };

    if status == 403 {
        return error_for_status(status, url, text_of(Some(error)));
    }

    let fields: BTreeMap<String, String> = object
        .iter()
        .filter(|(k, _)| k.as_str() != "Error")
        .map(|(k, v)| (k.clone(), text_of(Some(v))))
        .collect();
    ClientError::Server {
        status,
        message: text_of(Some(error)),
        fields,
    }
}

fn error_for_status(status: u16, url: &str, message: String) -> ClientError {
    if status == 403 {
        ClientError::Forbidden {
            url: url.to_string(),
            message,
        }
    } else {
        ClientError::server(status, message)
    }
}

fn text_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
