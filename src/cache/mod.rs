//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! GET issued by the executor:
//!     → store.rs (lookup by full URL)
//!     → entry.rs (ETag, age, force-check bit)
//!     → If-None-Match / aggressive hit decided by the executor
//! 2xx with ETag:
//!     → store.rs (insert, evicting the least recently used entry)
//! ```
//!
//! # Design Decisions
//! - One cache per process, shared behind `Arc`
//! - Entries without an ETag are never stored
//! - Per-database invalidation flags entries instead of evicting them

pub mod entry;
pub mod store;

pub use entry::{database_from_url, CachedEntry};
pub use store::ResponseCache;
