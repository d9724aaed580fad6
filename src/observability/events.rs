//! Observer lists and the per-request profiling event.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

/// How a logical request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    /// A physical call produced a fresh response.
    SendToServer,
    /// The server answered 304 and the cached body was used.
    Cached,
    /// The cached body was used without contacting the server.
    AggressivelyCached,
    /// The server answered with an error status.
    ErrorOnServer,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::SendToServer => "SEND_TO_SERVER",
            RequestStatus::Cached => "CACHED",
            RequestStatus::AggressivelyCached => "AGGRESSIVELY_CACHED",
            RequestStatus::ErrorOnServer => "ERROR_ON_SERVER",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profiling record emitted once per logical execution.
#[derive(Debug, Clone, Serialize)]
pub struct RequestResultArgs {
    pub request_id: Uuid,
    pub duration: Duration,
    pub method: String,
    /// Path and query only; never scheme, host or credentials.
    pub url: String,
    /// HTTP status; `0` when no physical call was made.
    pub http_result: u16,
    pub status: RequestStatus,
    /// Response body (or error text) for diagnostics.
    pub result: String,
    /// Request body that was sent, when it was textual.
    pub posted_data: Option<String>,
    pub additional_information: BTreeMap<String, String>,
}

/// Handle returned by [`EventList::add`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<T> = Arc<dyn Fn(&mut T) + Send + Sync>;

/// Ordered list of callbacks.
///
/// Handlers run in registration order and may amend the arguments; later
/// handlers observe earlier amendments.
pub struct EventList<T> {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, Handler<T>)>>,
}

impl<T> EventList<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn add<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Returns false if the subscription was unknown.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn notify(&self, args: &mut T) {
        // Snapshot so handlers may (un)subscribe while being invoked.
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in snapshot {
            handler(args);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl<T> Default for EventList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventList").field("handlers", &self.len()).finish()
    }
}
