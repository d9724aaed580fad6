//! Client-side request runtime for an HTTP document database.
//!
//! # Architecture Overview
//!
//! ```text
//!     Session layer
//!         │
//!         ├── execute(descriptor) ─────────────┐
//!         │                                    ▼
//!         │                         ┌────────────────────┐
//!         │                         │ replication router │  which server?
//!         │                         └─────────┬──────────┘
//!         │                                   ▼
//!         │                         ┌────────────────────┐    ┌────────────────┐
//!         │                         │  request executor  │◀──▶│ response cache │  send at all?
//!         │                         └─────────┬──────────┘    └────────────────┘
//!         │                                   ▼
//!         │                            reqwest transport
//!         │
//!         └── enqueue / get_value ──▶ lazy queue ──▶ one POST /multi_get  how many at once?
//! ```
//!
//! Cross-cutting: `config` (TOML), `observability` (tracing, metrics,
//! observer lists), `resilience` (timeouts, authentication retries),
//! `error` (one error enum for the crate).

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod lazy;
pub mod observability;
pub mod replication;
pub mod resilience;

pub use cache::ResponseCache;
pub use client::DocumentStoreClient;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use http::{RequestContext, RequestDescriptor, RequestExecutor};
pub use lazy::{DeferredOperation, LazyOperationQueue};
pub use replication::ReplicationRouter;
