//! Client entry point.
//!
//! Ties the shared pieces together for one primary URL: the executor (and
//! its cache), the replication router, and per-session lazy queues.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::config::validation::validate_config;
use crate::config::{load_config, ClientConfig, ConfigError};
use crate::error::{ClientError, ClientResult};
use crate::http::{HttpResponse, RequestContext, RequestDescriptor, RequestExecutor};
use crate::lazy::LazyOperationQueue;
use crate::replication::{normalize_url, ReplicationRouter};

pub struct DocumentStoreClient {
    primary_url: String,
    config: ClientConfig,
    executor: Arc<RequestExecutor>,
    router: Arc<ReplicationRouter>,
}

impl DocumentStoreClient {
    /// Client over a fresh connection pool and response cache.
    pub fn new(primary_url: &str, config: ClientConfig) -> ClientResult<Self> {
        if let Err(errors) = validate_config(&config) {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            return Err(ClientError::InvalidOperation(format!(
                "invalid configuration: {}",
                messages.join("; ")
            )));
        }
        let executor = Arc::new(RequestExecutor::from_config(&config)?);
        Ok(Self::with_executor(primary_url, config, executor))
    }

    /// Client sharing an existing executor, and with it the cache and pool.
    pub fn with_executor(primary_url: &str, config: ClientConfig, executor: Arc<RequestExecutor>) -> Self {
        let router = Arc::new(ReplicationRouter::new(config.replication.clone()));
        let primary_url = normalize_url(primary_url);
        router.load_from_local_cache(&primary_url);
        tracing::info!(
            primary = %primary_url,
            replicas = router.replicas().len(),
            failover = ?config.replication.failover_behavior,
            "Document store client created"
        );
        Self {
            primary_url,
            config,
            executor,
            router,
        }
    }

    /// Load, validate and apply a TOML configuration file.
    pub fn from_config_file(primary_url: &str, path: &Path) -> Result<Self, ConfigError> {
        let config = load_config(path)?;
        let executor = RequestExecutor::from_config(&config)?;
        Ok(Self::with_executor(primary_url, config, Arc::new(executor)))
    }

    pub fn primary_url(&self) -> &str {
        &self.primary_url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    pub fn router(&self) -> &Arc<ReplicationRouter> {
        &self.router
    }

    /// Execute `descriptor`, whose URL is relative to the primary, with
    /// replication failover.
    pub async fn execute(&self, ctx: &RequestContext, descriptor: &RequestDescriptor) -> ClientResult<HttpResponse> {
        self.router
            .update_topology_if_needed(&self.executor, &self.primary_url)
            .await;
        self.router
            .execute_request(&self.executor, ctx, &self.primary_url, descriptor)
            .await
    }

    pub async fn get_json(&self, ctx: &RequestContext, path: &str) -> ClientResult<Value> {
        self.execute(ctx, &RequestDescriptor::get(path))
            .await
            .map(HttpResponse::into_json)
    }

    /// New lazy queue for one unit of work.
    pub fn lazy_session(&self) -> LazyOperationQueue {
        LazyOperationQueue::new(
            self.executor.clone(),
            self.router.clone(),
            self.primary_url.clone(),
            &self.config.lazy,
        )
    }

    pub fn expire_items_from_cache(&self, database: &str) -> ClientResult<usize> {
        self.executor.expire_items_from_cache(database)
    }

    /// Persist the topology and close the shared cache.
    pub fn close(&self) {
        self.router.save_to_local_cache(&self.primary_url);
        self.executor.close();
        tracing::info!(primary = %self.primary_url, "Document store client closed");
    }
}

impl std::fmt::Debug for DocumentStoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStoreClient")
            .field("primary_url", &self.primary_url)
            .field("router", &self.router)
            .finish()
    }
}
