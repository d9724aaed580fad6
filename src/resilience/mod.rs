//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Physical attempt:
//!     → timeouts.rs (deadline from descriptor/context/config)
//!     → retries.rs (classify status, spend retry budget on 401/412)
//! Transport failure:
//!     → replication router (failover to the next destination)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every physical call has a deadline
//! - Retries are bounded and limited to authentication-class failures
//! - Failover lives with the replication router, not here

pub mod retries;
pub mod timeouts;

pub use retries::{classify, Attempt, FailureKind, RetryBudget};
pub use timeouts::{resolve_timeout, with_deadline};
