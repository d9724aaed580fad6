//! Replication destination health.
//!
//! # Responsibilities
//! - Represent a single destination (primary or replica)
//! - Track consecutive failures and the time of the last check
//! - Decide whether a failing destination is due for another probe

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Health record for one destination URL.
///
/// All counters are atomics so concurrent callers can report outcomes
/// without a lock; only the router mutates them.
#[derive(Debug)]
pub struct DestinationState {
    /// Full URL, database path included.
    pub url: String,
    pub database: Option<String>,
    allow_writes: AtomicBool,
    disabled: AtomicBool,
    failure_count: AtomicU64,
    /// Unix milliseconds; `0` means never checked.
    last_checked_at: AtomicU64,
    force_check: AtomicBool,
}

impl DestinationState {
    pub fn new(url: &str, database: Option<String>, allow_writes: bool) -> Self {
        Self {
            url: normalize_url(url),
            database,
            allow_writes: AtomicBool::new(allow_writes),
            disabled: AtomicBool::new(false),
            failure_count: AtomicU64::new(0),
            last_checked_at: AtomicU64::new(0),
            force_check: AtomicBool::new(false),
        }
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Acquire)
    }

    pub fn allows_writes(&self) -> bool {
        self.allow_writes.load(Ordering::Relaxed)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    pub fn is_force_check(&self) -> bool {
        self.force_check.load(Ordering::Relaxed)
    }

    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        match self.last_checked_at.load(Ordering::Acquire) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms as i64).single(),
        }
    }

    pub(crate) fn last_check_millis(&self) -> u64 {
        self.last_checked_at.load(Ordering::Acquire)
    }

    pub(crate) fn set_allow_writes(&self, allow: bool) {
        self.allow_writes.store(allow, Ordering::Relaxed);
    }

    pub(crate) fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Relaxed);
    }

    pub(crate) fn set_force_check(&self, force: bool) {
        self.force_check.store(force, Ordering::Relaxed);
    }

    pub(crate) fn stamp_check(&self, now_ms: u64) {
        self.last_checked_at.store(now_ms, Ordering::Release);
    }

    /// Count a failure. Returns the new count.
    pub(crate) fn record_failure(&self, now_ms: u64) -> u64 {
        self.force_check.store(false, Ordering::Relaxed);
        self.stamp_check(now_ms);
        self.failure_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Clear the failure count. Returns the previous count.
    pub(crate) fn record_success(&self, now_ms: u64) -> u64 {
        self.force_check.store(false, Ordering::Relaxed);
        self.stamp_check(now_ms);
        self.failure_count.swap(0, Ordering::AcqRel)
    }

    /// Seed counters from a persisted snapshot.
    pub(crate) fn restore(&self, failure_count: u64, last_checked_ms: u64) {
        self.failure_count.store(failure_count, Ordering::Release);
        self.last_checked_at.store(last_checked_ms, Ordering::Release);
    }

    /// Healthy, flagged for a forced check, or failing but last checked at
    /// least `reprobe_interval` ago.
    pub(crate) fn is_eligible(&self, now_ms: u64, reprobe_interval: Duration) -> bool {
        if self.failure_count() == 0 || self.is_force_check() {
            return true;
        }
        let elapsed = now_ms.saturating_sub(self.last_check_millis());
        elapsed >= reprobe_interval.as_millis() as u64
    }
}

pub(crate) fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Key form of a URL: trailing slashes trimmed.
pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Server root of a URL that may carry a `/databases/<name>` suffix.
pub fn root_database_url(url: &str) -> String {
    let url = normalize_url(url);
    match url.to_ascii_lowercase().find("/databases/") {
        Some(idx) => url[..idx].to_string(),
        None => url,
    }
}

/// URL of `database` on the server at `url`.
pub fn destination_url(url: &str, database: Option<&str>) -> String {
    match database.filter(|db| !db.is_empty()) {
        Some(db) => format!("{}/databases/{}", root_database_url(url), db),
        None => normalize_url(url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_and_recovery_counts() {
        let state = DestinationState::new("http://a:8080/", None, false);
        assert_eq!(state.url, "http://a:8080");
        assert_eq!(state.record_failure(1_000), 1);
        assert_eq!(state.record_failure(2_000), 2);
        assert_eq!(state.last_check_millis(), 2_000);

        assert_eq!(state.record_success(3_000), 2);
        assert_eq!(state.failure_count(), 0);
    }

    #[test]
    fn test_eligibility() {
        let interval = Duration::from_secs(60);
        let state = DestinationState::new("http://a", None, false);
        assert!(state.is_eligible(0, interval));

        state.record_failure(10_000);
        assert!(!state.is_eligible(20_000, interval));
        assert!(state.is_eligible(70_000, interval));

        state.set_force_check(true);
        assert!(state.is_eligible(20_000, interval));

        // A failure clears the forced check.
        state.record_failure(20_000);
        assert!(!state.is_eligible(30_000, interval));
    }

    #[test]
    fn test_destination_urls() {
        assert_eq!(
            destination_url("http://b:8080/databases/old/", Some("shop")),
            "http://b:8080/databases/shop"
        );
        assert_eq!(destination_url("http://b:8080/", None), "http://b:8080");
        assert_eq!(destination_url("http://b:8080", Some("")), "http://b:8080");
        assert_eq!(root_database_url("http://b/Databases/x"), "http://b");
    }

    #[test]
    fn test_last_check_timestamp() {
        let state = DestinationState::new("http://a", None, false);
        assert!(state.last_check().is_none());
        state.stamp_check(1_700_000_000_000);
        assert_eq!(
            state.last_check().unwrap().timestamp_millis(),
            1_700_000_000_000
        );
    }
}
