//! Replication-aware routing and failover.
//!
//! # Data Flow
//! ```text
//! operation (read / write / batch)
//!     → router.rs (candidates in priority order, primary headers)
//!         → destination.rs (per-destination failure count, re-probe window)
//!     → executor call per candidate until one answers
//!     → report_success / report_failure
//!
//! topology.rs → GET destinations document → replica list
//!     ↔ local_cache.rs (JSON file keyed by a BLAKE3 hash of the primary)
//! ```
//!
//! # Design Decisions
//! - A failing destination is skipped until its re-probe interval elapses
//! - Only connect failures and timeouts trigger failover
//! - Topology persistence is best effort; a broken file is ignored

pub mod destination;
pub mod local_cache;
pub mod router;
pub mod topology;

pub use destination::{destination_url, normalize_url, root_database_url, DestinationState};
pub use local_cache::{server_hash, PersistedDestination, TopologySnapshot};
pub use router::{FailoverStatusChanged, OperationKind, ReplicationRouter, ResolvedTarget};
pub use topology::{parse_destinations, TopologySource};
