//! On-disk topology cache.
//!
//! One JSON file per primary, named after a BLAKE3 hash of the primary URL,
//! so a restarted process knows its replicas before the first round trip.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted topology of one primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub primary: String,
    pub saved_at: DateTime<Utc>,
    pub destinations: Vec<PersistedDestination>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedDestination {
    pub url: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub allow_writes: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub failure_count: u64,
    /// Unix milliseconds of the last check, `0` when never checked.
    #[serde(default)]
    pub last_checked_ms: u64,
}

/// Identity of a server for cache keys.
pub fn server_hash(primary_url: &str) -> String {
    blake3::hash(primary_url.trim_end_matches('/').as_bytes())
        .to_hex()
        .to_string()
}

pub fn cache_path(dir: &Path, primary_url: &str) -> PathBuf {
    dir.join(format!("{}.json", server_hash(primary_url)))
}

/// `Ok(None)` when nothing was saved yet.
pub fn load_from_local_cache(dir: &Path, primary_url: &str) -> io::Result<Option<TopologySnapshot>> {
    let path = cache_path(dir, primary_url);
    if !path.exists() {
        return Ok(None);
    }
    let reader = BufReader::new(File::open(&path)?);
    let snapshot: TopologySnapshot = serde_json::from_reader(reader)?;
    tracing::debug!(
        path = %path.display(),
        destinations = snapshot.destinations.len(),
        "Loaded replication topology from local cache"
    );
    Ok(Some(snapshot))
}

pub fn save_to_local_cache(dir: &Path, snapshot: &TopologySnapshot) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = cache_path(dir, &snapshot.primary);
    let writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer(writer, snapshot)?;
    tracing::debug!(
        path = %path.display(),
        destinations = snapshot.destinations.len(),
        "Saved replication topology to local cache"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> TopologySnapshot {
        TopologySnapshot {
            primary: "http://primary:8080".into(),
            saved_at: Utc::now(),
            destinations: vec![PersistedDestination {
                url: "http://replica:8080/databases/shop".into(),
                database: Some("shop".into()),
                allow_writes: false,
                disabled: false,
                failure_count: 2,
                last_checked_ms: 1_700_000_000_000,
            }],
        }
    }

    #[test]
    fn test_hash_is_stable_and_slash_insensitive() {
        assert_eq!(
            server_hash("http://primary:8080/"),
            server_hash("http://primary:8080")
        );
        assert_ne!(server_hash("http://a"), server_hash("http://b"));
        assert_eq!(server_hash("http://a").len(), 64);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = snapshot();
        save_to_local_cache(dir.path(), &snapshot).unwrap();

        let loaded = load_from_local_cache(dir.path(), "http://primary:8080/")
            .unwrap()
            .unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_from_local_cache(dir.path(), "http://nowhere")
            .unwrap()
            .is_none());

        std::fs::write(cache_path(dir.path(), "http://broken"), b"{not json").unwrap();
        assert!(load_from_local_cache(dir.path(), "http://broken").is_err());
    }
}
