//! Replication topology discovery.
//!
//! # Data Flow
//! ```text
//! update_topology_if_needed
//!     → first use: seed replicas from the local cache
//!     → throttled: GET <primary>/docs/Raven/Replication/Destinations
//!         → 200: parse destinations, swap replica list, save locally
//!         → 404: no replication configured, keep what we have
//!         → failure: fall back to the local cache
//! ```

use std::time::Instant;

use chrono::Utc;
use serde_json::Value;

use crate::config::{DestinationConfig, FailoverBehavior};
use crate::http::context::RequestContext;
use crate::http::executor::RequestExecutor;
use crate::http::request::RequestDescriptor;
use crate::replication::destination::{destination_url, normalize_url};
use crate::replication::local_cache::{self, PersistedDestination, TopologySnapshot};
use crate::replication::router::ReplicationRouter;

const DESTINATIONS_DOCUMENT: &str = "/docs/Raven/Replication/Destinations";

/// Refresh bookkeeping kept by the router.
#[derive(Debug, Default)]
pub(crate) struct TopologyRefresh {
    last_update: Option<Instant>,
    seeded: bool,
}

/// Where the current replica list came from after a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologySource {
    /// Downloaded from the primary.
    Server,
    /// The primary has no destinations document.
    NotConfigured,
    /// The primary failed; the persisted topology was used.
    LocalCache,
    /// The primary failed and nothing was persisted.
    Unavailable,
}

/// Map a destinations document to replica settings.
///
/// `ClientVisibleUrl` wins over `Url`; disabled entries, entries the client
/// must ignore, and entries without any URL are skipped.
pub fn parse_destinations(document: &Value) -> Vec<DestinationConfig> {
    let Some(entries) = document.get("Destinations").and_then(Value::as_array) else {
        return Vec::new();
    };

    let flag = |entry: &Value, name: &str| entry.get(name).and_then(Value::as_bool).unwrap_or(false);
    let text = |entry: &Value, name: &str| {
        entry
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    entries
        .iter()
        .filter_map(|entry| {
            let url = text(entry, "ClientVisibleUrl").or_else(|| text(entry, "Url"))?;
            if flag(entry, "Disabled") || flag(entry, "IgnoredClient") {
                return None;
            }
            Some(DestinationConfig {
                url,
                database: text(entry, "Database"),
                allow_writes: false,
            })
        })
        .collect()
}

impl ReplicationRouter {
    /// Download the destinations document from the primary now.
    pub async fn refresh_topology(&self, executor: &RequestExecutor, primary_url: &str) -> TopologySource {
        let primary = normalize_url(primary_url);
        let descriptor = RequestDescriptor::get(format!("{}{}", primary, DESTINATIONS_DOCUMENT)).avoid_caching();
        let result = executor.execute(&RequestContext::default(), &descriptor).await;
        self.topology.lock().last_update = Some(Instant::now());

        match result {
            Ok(response) => {
                self.report_success(&primary);
                let document = response.into_json();
                let destinations = parse_destinations(&document);
                tracing::info!(
                    primary = %primary,
                    destinations = destinations.len(),
                    "Replication topology refreshed"
                );
                self.apply_destinations(&destinations);
                self.save_to_local_cache(&primary);
                TopologySource::Server
            }
            Err(e) if e.status() == Some(404) => {
                tracing::debug!(primary = %primary, "No replication destinations configured");
                TopologySource::NotConfigured
            }
            Err(e) => {
                tracing::warn!(
                    primary = %primary,
                    error = %e,
                    "Could not download replication topology, using the local cache"
                );
                if self.load_from_local_cache(&primary) {
                    TopologySource::LocalCache
                } else {
                    TopologySource::Unavailable
                }
            }
        }
    }

    /// Refresh unless the last refresh is recent. Returns `None` when skipped.
    pub async fn update_topology_if_needed(
        &self,
        executor: &RequestExecutor,
        primary_url: &str,
    ) -> Option<TopologySource> {
        if self.config.failover_behavior == FailoverBehavior::FailImmediately {
            return None;
        }

        {
            let mut topology = self.topology.lock();
            if !topology.seeded {
                topology.seeded = true;
                drop(topology);
                self.load_from_local_cache(primary_url);
                topology = self.topology.lock();
            }
            let fresh = topology
                .last_update
                .is_some_and(|at| at.elapsed() < self.config.topology_refresh());
            if fresh {
                return None;
            }
            // Claim the slot so concurrent callers do not refresh too.
            topology.last_update = Some(Instant::now());
        }

        Some(self.refresh_topology(executor, primary_url).await)
    }

    /// Seed replicas and their health from disk. Missing or unreadable
    /// files leave the router as it is.
    pub fn load_from_local_cache(&self, primary_url: &str) -> bool {
        let Some(dir) = self.config.local_cache_dir.as_deref() else {
            return false;
        };
        let snapshot = match local_cache::load_from_local_cache(dir, primary_url) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(primary = %primary_url, error = %e, "Ignoring unreadable topology cache");
                return false;
            }
        };

        let destinations: Vec<DestinationConfig> = snapshot
            .destinations
            .iter()
            .filter(|d| !d.disabled)
            .map(|d| DestinationConfig {
                url: d.url.clone(),
                database: d.database.clone(),
                allow_writes: d.allow_writes,
            })
            .collect();
        self.apply_destinations(&destinations);
        for persisted in &snapshot.destinations {
            let state = self.state(&persisted.url);
            state.restore(persisted.failure_count, persisted.last_checked_ms);
            state.set_disabled(persisted.disabled);
        }
        true
    }

    /// Persist the current replica list. Errors are logged, never raised.
    pub fn save_to_local_cache(&self, primary_url: &str) {
        let Some(dir) = self.config.local_cache_dir.as_deref() else {
            return;
        };
        let snapshot = TopologySnapshot {
            primary: normalize_url(primary_url),
            saved_at: Utc::now(),
            destinations: self
                .replicas()
                .iter()
                .map(|state| PersistedDestination {
                    url: state.url.clone(),
                    database: state.database.clone(),
                    allow_writes: state.allows_writes(),
                    disabled: state.is_disabled(),
                    failure_count: state.failure_count(),
                    last_checked_ms: state.last_check_millis(),
                })
                .collect(),
        };
        if let Err(e) = local_cache::save_to_local_cache(dir, &snapshot) {
            tracing::warn!(primary = %primary_url, error = %e, "Could not save topology cache");
        }
    }

    /// Discovered destinations plus statically configured ones that the
    /// server did not mention.
    fn apply_destinations(&self, discovered: &[DestinationConfig]) {
        let mut merged: Vec<DestinationConfig> = discovered
            .iter()
            .map(|d| {
                let configured = self.config.destinations.iter().find(|c| {
                    destination_url(&c.url, c.database.as_deref()) == destination_url(&d.url, d.database.as_deref())
                });
                DestinationConfig {
                    allow_writes: d.allow_writes || configured.is_some_and(|c| c.allow_writes),
                    ..d.clone()
                }
            })
            .collect();
        for configured in &self.config.destinations {
            let key = destination_url(&configured.url, configured.database.as_deref());
            if !merged
                .iter()
                .any(|d| destination_url(&d.url, d.database.as_deref()) == key)
            {
                merged.push(configured.clone());
            }
        }
        self.set_replicas(&merged);
    }
}
