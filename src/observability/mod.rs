//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every request execution produces:
//!     → events.rs (RequestResultArgs pushed to request-completed observers)
//!     → logging.rs (structured tracing event with the same fields)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Session layer profiling (observer registration)
//!     → Log aggregation (stdout, JSON)
//!     → Whatever metrics exporter the application installs
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON optional) for machine parsing
//! - Request ID (UUID v4) flows through every event of one execution
//! - Observers are plain callback lists, off the request critical path

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{EventList, RequestResultArgs, RequestStatus, SubscriptionId};
