//! Lazy operations and multi-get batching.
//!
//! # Data Flow
//! ```text
//! enqueue(DeferredOperation) → LazyHandle        (no I/O)
//! get_value(handle)
//!     → queue.rs: collect unresolved operations
//!     → operation.rs: one SubRequest each
//!     → router: batch candidates with failover
//!         → batch.rs: cache consult, POST /multi_get, fill from cache
//!     → operation.rs: handle each SubResponse, re-run the ones that ask
//!     → on_eval callbacks, results stored on the queue
//! ```
//!
//! # Design Decisions
//! - The queue is owned by one session and mutated through `&mut self`
//! - Operations are a closed enum; each variant carries only its own inputs
//! - A batch is all or nothing: any failed sub-request fails the flush

pub mod batch;
pub mod operation;
pub mod queue;

pub use batch::{execute_multi_get, multi_get_url};
pub use operation::{
    DeferredOperation, Document, DocumentPage, FacetSource, IndexQuery, OperationResult, Outcome, QueryResult,
    SortField, SubRequest, SubResponse,
};
pub use queue::{LazyHandle, LazyOperationQueue, ResponseTimeInformation, ResponseTimeItem};
