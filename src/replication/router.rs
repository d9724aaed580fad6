//! Replication-aware routing.
//!
//! # Responsibilities
//! - Keep one health record per destination (primary and replicas)
//! - Resolve which URL an operation should use, in priority order
//! - Run an operation with failover across the resolved candidates
//!
//! # Design Decisions
//! - Health lives in atomics inside `DashMap` values; no global lock
//! - The replica list is swapped atomically when the topology changes
//! - Exhaustion never fails resolution: the primary is returned and the
//!   caller sees whatever error the primary produces

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::{DestinationConfig, FailoverBehavior, ReplicationConfig};
use crate::error::{ClientError, ClientResult};
use crate::http::context::RequestContext;
use crate::http::executor::RequestExecutor;
use crate::http::headers::{self, Headers};
use crate::http::request::{HttpMethod, RequestDescriptor};
use crate::http::response::HttpResponse;
use crate::observability::{metrics, EventList};
use crate::replication::destination::{destination_url, normalize_url, now_millis, DestinationState};
use crate::replication::topology::TopologyRefresh;

/// Routing class of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
    /// Multi-get; routed like a read.
    Batch,
}

impl OperationKind {
    pub fn for_method(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get | HttpMethod::Head => OperationKind::Read,
            _ => OperationKind::Write,
        }
    }

    pub fn is_read(&self) -> bool {
        !matches!(self, OperationKind::Write)
    }
}

/// A chosen destination plus the headers to send to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub url: String,
    pub is_primary: bool,
    pub headers: Headers,
}

/// Fired when a destination starts failing or recovers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverStatusChanged {
    pub url: String,
    pub failing: bool,
}

pub struct ReplicationRouter {
    pub(crate) config: ReplicationConfig,
    states: DashMap<String, Arc<DestinationState>>,
    replicas: ArcSwap<Vec<Arc<DestinationState>>>,
    read_stripe: AtomicUsize,
    pub(crate) topology: Mutex<TopologyRefresh>,
    failover_status_changed: EventList<FailoverStatusChanged>,
}

impl ReplicationRouter {
    pub fn new(config: ReplicationConfig) -> Self {
        let router = Self {
            states: DashMap::new(),
            replicas: ArcSwap::from_pointee(Vec::new()),
            read_stripe: AtomicUsize::new(0),
            topology: Mutex::new(TopologyRefresh::default()),
            failover_status_changed: EventList::new(),
            config,
        };
        let configured = router.config.destinations.clone();
        router.set_replicas(&configured);
        router
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn failover_status_changed(&self) -> &EventList<FailoverStatusChanged> {
        &self.failover_status_changed
    }

    /// Health record for `url`, created on first use.
    pub fn state(&self, url: &str) -> Arc<DestinationState> {
        let key = normalize_url(url);
        self.states
            .entry(key.clone())
            .or_insert_with(|| Arc::new(DestinationState::new(&key, None, false)))
            .clone()
    }

    /// Replace the replica list, keeping the health of known destinations.
    pub fn set_replicas(&self, destinations: &[DestinationConfig]) {
        let replicas: Vec<Arc<DestinationState>> = destinations
            .iter()
            .map(|d| {
                let url = destination_url(&d.url, d.database.as_deref());
                let state = self
                    .states
                    .entry(url.clone())
                    .or_insert_with(|| Arc::new(DestinationState::new(&url, d.database.clone(), d.allow_writes)))
                    .clone();
                state.set_allow_writes(d.allow_writes);
                state
            })
            .collect();
        tracing::debug!(replicas = replicas.len(), "Replication destinations updated");
        self.replicas.store(Arc::new(replicas));
    }

    pub fn replicas(&self) -> Arc<Vec<Arc<DestinationState>>> {
        self.replicas.load_full()
    }

    pub fn failure_count(&self, url: &str) -> u64 {
        self.state(url).failure_count()
    }

    pub fn is_first_failure(&self, url: &str) -> bool {
        self.failure_count(url) == 0
    }

    pub fn report_failure(&self, url: &str) {
        let state = self.state(url);
        let count = state.record_failure(now_millis());
        metrics::record_destination_failure(&state.url);
        tracing::warn!(url = %state.url, failures = count, "Replication destination failed");
        if count == 1 {
            self.failover_status_changed.notify(&mut FailoverStatusChanged {
                url: state.url.clone(),
                failing: true,
            });
        }
    }

    pub fn report_success(&self, url: &str) {
        let state = self.state(url);
        let previous = state.record_success(now_millis());
        if previous > 0 {
            tracing::info!(url = %state.url, previous_failures = previous, "Replication destination recovered");
            self.failover_status_changed.notify(&mut FailoverStatusChanged {
                url: state.url.clone(),
                failing: false,
            });
        }
    }

    /// Make `url` eligible on the next resolution regardless of its failures.
    pub fn force_check(&self, url: &str, force: bool) {
        self.state(url).set_force_check(force);
    }

    fn accepts(&self, kind: OperationKind, replica: &DestinationState) -> bool {
        match (kind.is_read(), self.config.failover_behavior) {
            (true, FailoverBehavior::FailImmediately) => self.config.read_from_all_servers,
            (true, _) => true,
            (false, FailoverBehavior::AllowReadsFromSecondariesAndWritesToSecondaries) => true,
            (false, FailoverBehavior::FailImmediately) => false,
            (false, FailoverBehavior::AllowReadsFromSecondaries) => replica.allows_writes(),
        }
    }

    fn target(&self, state: &DestinationState, primary: &DestinationState) -> ResolvedTarget {
        let is_primary = state.url == primary.url;
        let mut headers = Headers::new();
        if !is_primary {
            let last_check = primary.last_check().unwrap_or_else(Utc::now);
            headers.set(headers::PRIMARY_SERVER_URL, primary.url.clone());
            headers.set(
                headers::PRIMARY_SERVER_LAST_CHECK,
                last_check.to_rfc3339_opts(SecondsFormat::Millis, true),
            );
        }
        ResolvedTarget {
            url: state.url.clone(),
            is_primary,
            headers,
        }
    }

    /// Every eligible destination for `kind`, best first. Never empty.
    pub fn candidates(&self, kind: OperationKind, primary_url: &str) -> Vec<ResolvedTarget> {
        let primary = self.state(primary_url);
        let striping = kind.is_read() && self.config.read_from_all_servers;
        if self.config.failover_behavior == FailoverBehavior::FailImmediately && !striping {
            primary.stamp_check(now_millis());
            return vec![self.target(&primary, &primary)];
        }

        let replicas = self.replicas.load();
        let mut ordered: Vec<Arc<DestinationState>> = std::iter::once(primary.clone())
            .chain(
                replicas
                    .iter()
                    .filter(|r| !r.is_disabled() && r.url != primary.url && self.accepts(kind, r))
                    .cloned(),
            )
            .collect();
        if striping && ordered.len() > 1 {
            let start = self.read_stripe.fetch_add(1, Ordering::Relaxed) % ordered.len();
            ordered.rotate_left(start);
        }

        let now = now_millis();
        let interval = self.config.reprobe_interval();
        let mut candidates: Vec<ResolvedTarget> = ordered
            .iter()
            .filter(|state| state.is_eligible(now, interval))
            .map(|state| {
                state.stamp_check(now);
                self.target(state, &primary)
            })
            .collect();

        if candidates.is_empty() {
            candidates.push(self.target(&primary, &primary));
        }
        candidates
    }

    /// Best destination for `kind`.
    pub fn resolve_url(&self, kind: OperationKind, primary_url: &str) -> ResolvedTarget {
        let mut candidates = self.candidates(kind, primary_url);
        candidates.swap_remove(0)
    }

    /// Run `op` against each candidate until one answers.
    ///
    /// Only server-down errors (connect failures, timeouts) move on to the
    /// next candidate; any other error is returned as is.
    pub async fn execute_with_failover<T, F, Fut>(
        &self,
        kind: OperationKind,
        primary_url: &str,
        mut op: F,
    ) -> ClientResult<T>
    where
        F: FnMut(ResolvedTarget) -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let candidates = self.candidates(kind, primary_url);
        let mut last_error = None;

        for target in candidates {
            let url = target.url.clone();
            match op(target).await {
                Ok(value) => {
                    self.report_success(&url);
                    return Ok(value);
                }
                Err(e) if e.is_server_down() => {
                    self.report_failure(&url);
                    tracing::warn!(url = %url, error = %e, "Failing over to the next destination");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let error = last_error.unwrap_or_else(|| {
            ClientError::InvalidOperation("no replication destination was tried".to_string())
        });
        let writes_blocked = kind == OperationKind::Write
            && !self.replicas().is_empty()
            && !self.replicas().iter().any(|r| self.accepts(kind, r));
        if writes_blocked {
            return Err(ClientError::InvalidOperation(format!(
                "could not replicate a write to a secondary, failover behavior is {:?}: {}",
                self.config.failover_behavior, error
            )));
        }
        Err(error)
    }

    /// Execute `descriptor`, whose URL is relative to the database root,
    /// against the best destination with failover.
    pub async fn execute_request(
        &self,
        executor: &RequestExecutor,
        ctx: &RequestContext,
        primary_url: &str,
        descriptor: &RequestDescriptor,
    ) -> ClientResult<HttpResponse> {
        let kind = OperationKind::for_method(descriptor.method);
        let response = self
            .execute_with_failover(kind, primary_url, |target| {
                let mut request = descriptor.clone();
                request.url = format!("{}{}", target.url, descriptor.url);
                request.headers.extend_from(&target.headers);
                async move { executor.execute(ctx, &request).await }
            })
            .await?;
        self.observe_response_headers(primary_url, &response.headers);
        Ok(response)
    }

    /// Flag the primary for a forced check when a response asks for it.
    pub fn observe_response_headers(&self, primary_url: &str, response_headers: &Headers) {
        let forced = response_headers
            .get(headers::FORCE_PRIMARY_SERVER_CHECK)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        if forced {
            self.force_check(primary_url, true);
        }
    }
}

impl std::fmt::Debug for ReplicationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationRouter")
            .field("failover_behavior", &self.config.failover_behavior)
            .field("replicas", &self.replicas.load().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;
    use std::sync::Mutex as StdMutex;

    const PRIMARY: &str = "http://primary:8080";
    const REPLICA_A: &str = "http://replica-a:8080";
    const REPLICA_B: &str = "http://replica-b:8080";

    fn config(behavior: FailoverBehavior) -> ReplicationConfig {
        ReplicationConfig {
            failover_behavior: behavior,
            destinations: vec![
                DestinationConfig {
                    url: REPLICA_A.into(),
                    database: None,
                    allow_writes: false,
                },
                DestinationConfig {
                    url: REPLICA_B.into(),
                    database: None,
                    allow_writes: true,
                },
            ],
            ..ReplicationConfig::default()
        }
    }

    fn down(url: &str) -> ClientError {
        ClientError::transport(url, TransportErrorKind::Connect, "connection refused")
    }

    #[test]
    fn test_primary_preferred_while_healthy() {
        let router = ReplicationRouter::new(config(FailoverBehavior::AllowReadsFromSecondaries));
        let target = router.resolve_url(OperationKind::Read, PRIMARY);
        assert_eq!(target.url, PRIMARY);
        assert!(target.is_primary);
        assert!(target.headers.is_empty());
    }

    #[test]
    fn test_failover_after_primary_failures_and_reset() {
        let router = ReplicationRouter::new(config(FailoverBehavior::AllowReadsFromSecondaries));
        for _ in 0..3 {
            router.report_failure(PRIMARY);
        }

        let target = router.resolve_url(OperationKind::Read, PRIMARY);
        assert_eq!(target.url, REPLICA_A);
        assert_eq!(target.headers.get(headers::PRIMARY_SERVER_URL), Some(PRIMARY));
        assert!(target.headers.contains(headers::PRIMARY_SERVER_LAST_CHECK));

        router.report_success(PRIMARY);
        assert_eq!(router.failure_count(PRIMARY), 0);
        assert_eq!(router.resolve_url(OperationKind::Read, PRIMARY).url, PRIMARY);
    }

    #[test]
    fn test_writes_only_go_to_writable_replicas() {
        let router = ReplicationRouter::new(config(FailoverBehavior::AllowReadsFromSecondaries));
        router.report_failure(PRIMARY);

        let target = router.resolve_url(OperationKind::Write, PRIMARY);
        assert_eq!(target.url, REPLICA_B);

        let router = ReplicationRouter::new(config(
            FailoverBehavior::AllowReadsFromSecondariesAndWritesToSecondaries,
        ));
        router.report_failure(PRIMARY);
        assert_eq!(router.resolve_url(OperationKind::Write, PRIMARY).url, REPLICA_A);
    }

    #[test]
    fn test_fail_immediately_always_uses_primary() {
        let router = ReplicationRouter::new(config(FailoverBehavior::FailImmediately));
        router.report_failure(PRIMARY);
        let candidates = router.candidates(OperationKind::Read, PRIMARY);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, PRIMARY);
    }

    #[test]
    fn test_exhaustion_returns_primary() {
        let router = ReplicationRouter::new(config(FailoverBehavior::AllowReadsFromSecondaries));
        for url in [PRIMARY, REPLICA_A, REPLICA_B] {
            router.report_failure(url);
        }
        let target = router.resolve_url(OperationKind::Read, PRIMARY);
        assert_eq!(target.url, PRIMARY);
    }

    #[test]
    fn test_failing_destination_reprobed_after_interval() {
        let mut cfg = config(FailoverBehavior::AllowReadsFromSecondaries);
        cfg.reprobe_interval_secs = 0;
        let router = ReplicationRouter::new(cfg);
        router.report_failure(PRIMARY);
        assert_eq!(router.resolve_url(OperationKind::Read, PRIMARY).url, PRIMARY);
    }

    #[test]
    fn test_force_check_makes_primary_eligible() {
        let router = ReplicationRouter::new(config(FailoverBehavior::AllowReadsFromSecondaries));
        router.report_failure(PRIMARY);
        assert_eq!(router.resolve_url(OperationKind::Read, PRIMARY).url, REPLICA_A);

        let forced: Headers = [(headers::FORCE_PRIMARY_SERVER_CHECK, "True")].into_iter().collect();
        router.observe_response_headers(PRIMARY, &forced);
        assert_eq!(router.resolve_url(OperationKind::Read, PRIMARY).url, PRIMARY);
    }

    #[test]
    fn test_read_striping_rotates() {
        let mut cfg = config(FailoverBehavior::AllowReadsFromSecondaries);
        cfg.read_from_all_servers = true;
        let router = ReplicationRouter::new(cfg);

        let picks: Vec<String> = (0..6)
            .map(|_| router.resolve_url(OperationKind::Read, PRIMARY).url)
            .collect();
        assert_eq!(
            picks,
            vec![PRIMARY, REPLICA_A, REPLICA_B, PRIMARY, REPLICA_A, REPLICA_B]
        );
        // Writes are never striped.
        assert_eq!(router.resolve_url(OperationKind::Write, PRIMARY).url, PRIMARY);
    }

    #[test]
    fn test_status_changes_fire_once() {
        let router = ReplicationRouter::new(config(FailoverBehavior::AllowReadsFromSecondaries));
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        router
            .failover_status_changed()
            .add(move |e: &mut FailoverStatusChanged| sink.lock().unwrap().push(e.failing));

        router.report_failure(PRIMARY);
        router.report_failure(PRIMARY);
        router.report_success(PRIMARY);
        router.report_success(PRIMARY);

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_concurrent_reports_on_one_destination() {
        let router = Arc::new(ReplicationRouter::new(config(FailoverBehavior::AllowReadsFromSecondaries)));
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        router
            .failover_status_changed()
            .add(move |e: &mut FailoverStatusChanged| sink.lock().unwrap().push(e.failing));

        let failing: Vec<_> = (0..8)
            .map(|_| {
                let router = router.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        router.report_failure(PRIMARY);
                    }
                })
            })
            .collect();
        for handle in failing {
            handle.join().unwrap();
        }
        assert_eq!(router.failure_count(PRIMARY), 400);
        assert_eq!(*events.lock().unwrap(), vec![true]);

        let mixed: Vec<_> = (0..8)
            .map(|t| {
                let router = router.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        if (t + i) % 2 == 0 {
                            router.report_failure(PRIMARY);
                        } else {
                            router.report_success(PRIMARY);
                        }
                    }
                })
            })
            .collect();
        for handle in mixed {
            handle.join().unwrap();
        }

        // Each 0 -> n transition fires `failing`, each n -> 0 fires recovery.
        let events = events.lock().unwrap();
        let failed = events.iter().filter(|f| **f).count();
        let recovered = events.len() - failed;
        let still_failing = router.failure_count(PRIMARY) > 0;
        assert_eq!(failed, recovered + usize::from(still_failing));
    }

    #[tokio::test]
    async fn test_execute_with_failover_moves_to_replica() {
        let router = ReplicationRouter::new(config(FailoverBehavior::AllowReadsFromSecondaries));
        let tried = StdMutex::new(Vec::new());

        let result = router
            .execute_with_failover(OperationKind::Read, PRIMARY, |target| {
                tried.lock().unwrap().push(target.url.clone());
                async move {
                    if target.is_primary {
                        Err(down(&target.url))
                    } else {
                        Ok(target.url)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, REPLICA_A);
        assert_eq!(*tried.lock().unwrap(), vec![PRIMARY, REPLICA_A]);
        assert_eq!(router.failure_count(PRIMARY), 1);
        assert_eq!(router.failure_count(REPLICA_A), 0);
    }

    #[tokio::test]
    async fn test_execute_with_failover_keeps_server_errors() {
        let router = ReplicationRouter::new(config(FailoverBehavior::AllowReadsFromSecondaries));
        let calls = AtomicUsize::new(0);

        let err = router
            .execute_with_failover(OperationKind::Read, PRIMARY, |_target| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ClientError::server(500, "boom")) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(500));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(router.failure_count(PRIMARY), 0);
    }

    #[tokio::test]
    async fn test_write_without_writable_replica_is_invalid() {
        let mut cfg = config(FailoverBehavior::AllowReadsFromSecondaries);
        cfg.destinations.truncate(1);
        let router = ReplicationRouter::new(cfg);

        let err = router
            .execute_with_failover(OperationKind::Write, PRIMARY, |target| async move {
                Err::<(), _>(down(&target.url))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_execute_request_fails_over_and_honors_force_check() {
        use crate::cache::ResponseCache;
        use crate::config::ClientConfig;
        use crate::http::transport::mock::{response, ScriptedTransport};

        let transport = ScriptedTransport::with_handler(|call| {
            if call.url.starts_with(PRIMARY) {
                Err(ClientError::transport(&call.url, TransportErrorKind::Connect, "refused"))
            } else {
                Ok(response(
                    200,
                    &[(headers::FORCE_PRIMARY_SERVER_CHECK, "true")],
                    r#"{"Name":"replica"}"#,
                ))
            }
        });
        let executor = RequestExecutor::new(
            transport.clone(),
            Arc::new(ResponseCache::new(16)),
            &ClientConfig::default(),
        );
        let router = ReplicationRouter::new(config(FailoverBehavior::AllowReadsFromSecondaries));
        let ctx = RequestContext::default();

        let body = router
            .execute_request(&executor, &ctx, PRIMARY, &RequestDescriptor::get("/docs?id=users/1"))
            .await
            .unwrap()
            .into_json();
        assert_eq!(body["Name"], "replica");

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].url, format!("{}/docs?id=users/1", REPLICA_A));
        assert_eq!(calls[1].headers.get(headers::PRIMARY_SERVER_URL), Some(PRIMARY));
        // The replica asked for the primary to be checked again.
        assert!(router.state(PRIMARY).is_force_check());
    }

    #[tokio::test]
    async fn test_all_destinations_down_returns_last_error() {
        let router = ReplicationRouter::new(config(
            FailoverBehavior::AllowReadsFromSecondariesAndWritesToSecondaries,
        ));
        let err = router
            .execute_with_failover(OperationKind::Read, PRIMARY, |target| async move {
                Err::<(), _>(down(&target.url))
            })
            .await
            .unwrap_err();
        match err {
            ClientError::Transport { url, .. } => assert_eq!(url, REPLICA_B),
            other => panic!("unexpected {:?}", other),
        }
    }
}
