//! Per-session queue of deferred operations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::LazyConfig;
use crate::error::{ClientError, ClientResult};
use crate::http::context::RequestContext;
use crate::http::executor::RequestExecutor;
use crate::lazy::batch::execute_multi_get;
use crate::lazy::operation::{DeferredOperation, OperationResult, SubRequest, SubResponse, TEMP_REQUEST_TIME};
use crate::replication::{OperationKind, ReplicationRouter};

type EvalCallback = Box<dyn FnOnce(&OperationResult) + Send + Sync>;

/// Reference to a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LazyHandle {
    generation: u64,
    index: usize,
}

/// Server-reported time spent on one sub-request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseTimeItem {
    pub url: String,
    pub duration: Duration,
}

/// Timing of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseTimeInformation {
    pub total_client_duration: Duration,
    pub duration_breakdown: Vec<ResponseTimeItem>,
}

struct PendingOperation {
    operation: DeferredOperation,
    on_eval: Option<EvalCallback>,
    result: Option<OperationResult>,
}

/// Deferred operations of one unit of work.
///
/// Nothing touches the network until a result is read; the first read
/// sends every unresolved operation in one multi-get call.
pub struct LazyOperationQueue {
    executor: Arc<RequestExecutor>,
    router: Arc<ReplicationRouter>,
    primary_url: String,
    context: RequestContext,
    max_individual_retries: u32,
    generation: u64,
    operations: Vec<PendingOperation>,
}

impl LazyOperationQueue {
    pub fn new(
        executor: Arc<RequestExecutor>,
        router: Arc<ReplicationRouter>,
        primary_url: impl Into<String>,
        config: &LazyConfig,
    ) -> Self {
        Self {
            executor,
            router,
            primary_url: primary_url.into(),
            context: RequestContext::default(),
            max_individual_retries: config.max_individual_retries,
            generation: 0,
            operations: Vec::new(),
        }
    }

    /// Context used when the queue flushes.
    pub fn context_mut(&mut self) -> &mut RequestContext {
        &mut self.context
    }

    pub fn enqueue(&mut self, operation: DeferredOperation) -> LazyHandle {
        self.push(operation, None)
    }

    /// Queue `operation`; `on_eval` runs once with its result after the flush.
    pub fn enqueue_with_callback<F>(&mut self, operation: DeferredOperation, on_eval: F) -> LazyHandle
    where
        F: FnOnce(&OperationResult) + Send + Sync + 'static,
    {
        self.push(operation, Some(Box::new(on_eval)))
    }

    fn push(&mut self, operation: DeferredOperation, on_eval: Option<EvalCallback>) -> LazyHandle {
        self.operations.push(PendingOperation {
            operation,
            on_eval,
            result: None,
        });
        LazyHandle {
            generation: self.generation,
            index: self.operations.len() - 1,
        }
    }

    /// Operations not resolved yet.
    pub fn pending_count(&self) -> usize {
        self.operations.iter().filter(|op| op.result.is_none()).count()
    }

    pub fn is_flushed(&self) -> bool {
        self.pending_count() == 0
    }

    /// Result of `handle`, flushing the queue first if needed.
    pub async fn get_value(&mut self, handle: LazyHandle) -> ClientResult<&OperationResult> {
        if handle.generation != self.generation || handle.index >= self.operations.len() {
            return Err(ClientError::InvalidOperation(
                "lazy handle belongs to a cleared unit of work".to_string(),
            ));
        }
        if self.operations[handle.index].result.is_none() {
            self.execute_all_pending().await?;
        }
        self.operations[handle.index]
            .result
            .as_ref()
            .ok_or_else(|| ClientError::InvalidOperation("lazy operation was not resolved".to_string()))
    }

    /// Resolve every unresolved operation with one multi-get call.
    ///
    /// A queue with nothing pending returns immediately without I/O.
    pub async fn execute_all_pending(&mut self) -> ClientResult<ResponseTimeInformation> {
        let pending: Vec<usize> = (0..self.operations.len())
            .filter(|&i| self.operations[i].result.is_none())
            .collect();
        if pending.is_empty() {
            return Ok(ResponseTimeInformation::default());
        }

        let started = Instant::now();
        let requests: Vec<SubRequest> = pending
            .iter()
            .map(|&i| self.operations[i].operation.create_request())
            .collect();
        tracing::debug!(operations = requests.len(), "Flushing lazy operations");

        let responses = self.multi_get(&requests).await?;
        let mut timings = ResponseTimeInformation::default();
        let mut resolved = Vec::with_capacity(pending.len());

        for ((&i, request), response) in pending.iter().zip(&requests).zip(&responses) {
            timings.duration_breakdown.push(ResponseTimeItem {
                url: request.url_and_query(),
                duration: server_duration(response),
            });
            if response.has_errors() {
                return Err(ClientError::server(
                    response.status,
                    format!(
                        "Got an error from server, status code: {}\n{}",
                        response.status, response.result
                    ),
                ));
            }

            let operation = &self.operations[i].operation;
            let mut outcome = operation.handle_response(response)?;
            let mut retries = 0;
            while outcome.requires_retry && retries < self.max_individual_retries {
                retries += 1;
                tracing::debug!(kind = operation.kind(), retries, "Re-executing lazy operation on its own");
                let single = self.multi_get(std::slice::from_ref(request)).await?;
                let response = single.first().ok_or_else(|| {
                    ClientError::InvalidOperation("multi-get returned no response".to_string())
                })?;
                outcome = operation.handle_response(response)?;
            }
            if outcome.requires_retry {
                tracing::warn!(kind = operation.kind(), retries, "Lazy operation still asks for a retry");
            }
            resolved.push((i, outcome.result));
        }

        for (i, result) in resolved {
            let slot = &mut self.operations[i];
            if let Some(on_eval) = slot.on_eval.take() {
                on_eval(&result);
            }
            slot.result = Some(result);
        }

        timings.total_client_duration = started.elapsed();
        Ok(timings)
    }

    async fn multi_get(&self, requests: &[SubRequest]) -> ClientResult<Vec<SubResponse>> {
        let executor = self.executor.as_ref();
        let ctx = &self.context;
        self.router
            .execute_with_failover(OperationKind::Batch, &self.primary_url, |target| async move {
                execute_multi_get(executor, ctx, &target, requests).await
            })
            .await
    }

    /// Drop every operation and start a new unit of work. Handles from
    /// before the clear are rejected.
    pub fn clear(&mut self) {
        if !self.operations.is_empty() {
            tracing::trace!(discarded = self.pending_count(), "Clearing lazy operations");
        }
        self.operations.clear();
        self.generation += 1;
    }
}

fn server_duration(response: &SubResponse) -> Duration {
    response
        .headers
        .get(TEMP_REQUEST_TIME)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_default()
}

impl std::fmt::Debug for LazyOperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyOperationQueue")
            .field("primary_url", &self.primary_url)
            .field("operations", &self.operations.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}
