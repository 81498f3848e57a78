use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::constants::{DISCOVERY_LOG_KEY, LOCAL_COUNTER_PREFIX};
use crate::logging::{emit_log, Level};
use crate::types::{DiscoveryEntry, RankSource};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode store payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Session-scoped key-value persistence. Callers treat every error as
/// "storage unavailable" and keep going in memory.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct KeyValueFile {
    version: u8,
    values: BTreeMap<String, String>,
}

/// JSON-file-backed store for hosts without browser session storage.
/// Every write rewrites the whole file.
pub struct JsonFileStore {
    file_path: PathBuf,
    values: BTreeMap<String, String>,
}

impl JsonFileStore {
    pub fn new(file_path: PathBuf) -> Self {
        let values = load_values(&file_path);
        Self { file_path, values }
    }

    fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let payload = KeyValueFile {
            version: 1,
            values: self.values.clone(),
        };
        let text = serde_json::to_string_pretty(&payload)?;
        fs::write(&self.file_path, text).map_err(|source| StoreError::Io {
            path: self.file_path.clone(),
            source,
        })
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value.to_string());
        self.save()
    }
}

fn load_values(path: &Path) -> BTreeMap<String, String> {
    let text = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                emit_log(
                    Level::Warn,
                    "session-store",
                    "read_failed",
                    json!({ "path": path.display().to_string(), "error": error.to_string() }),
                );
            }
            return BTreeMap::new();
        }
    };
    match serde_json::from_str::<KeyValueFile>(&text) {
        Ok(file) if file.version == 1 => file.values,
        Ok(file) => {
            emit_log(
                Level::Warn,
                "session-store",
                "unsupported_version",
                json!({ "path": path.display().to_string(), "version": file.version }),
            );
            BTreeMap::new()
        }
        Err(error) => {
            emit_log(
                Level::Warn,
                "session-store",
                "parse_failed",
                json!({ "path": path.display().to_string(), "error": error.to_string() }),
            );
            BTreeMap::new()
        }
    }
}

/// Global detection counter. Returns the caller's ordinal for `target_id`,
/// or `None` on any failure.
pub trait DetectionCounter {
    fn record_detection(&mut self, target_id: &str) -> Option<u64>;
}

/// Counter for hosts with no reachable service; every report falls back locally.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineCounter;

impl DetectionCounter for OfflineCounter {
    fn record_detection(&mut self, _target_id: &str) -> Option<u64> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DetectionReport {
    #[serde(rename = "targetId")]
    pub target_id: String,
    pub rank: u64,
    pub repeat: bool,
    pub source: RankSource,
}

/// Append-only, per-target idempotent log of this session's detections.
pub struct DiscoveryTracker {
    store: Box<dyn KeyValueStore>,
    entries: Vec<DiscoveryEntry>,
}

impl DiscoveryTracker {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        let entries = load_entries(store.as_ref());
        Self { store, entries }
    }

    pub fn entries(&self) -> &[DiscoveryEntry] {
        &self.entries
    }

    pub fn find(&self, target_id: &str) -> Option<&DiscoveryEntry> {
        self.entries.iter().find(|entry| entry.target_id == target_id)
    }

    /// A repeat never reaches `counter`. A failed report falls back to the
    /// local per-target counter; the result is always a rank.
    pub fn record_hit(
        &mut self,
        target_id: &str,
        counter: &mut dyn DetectionCounter,
        now_ms: u64,
    ) -> DetectionReport {
        if let Some(previous) = self.find(target_id) {
            return DetectionReport {
                target_id: target_id.to_string(),
                rank: previous.rank,
                repeat: true,
                source: RankSource::Session,
            };
        }

        let (rank, source) = match counter.record_detection(target_id) {
            Some(rank) => (rank, RankSource::Global),
            None => (self.local_fallback_rank(target_id), RankSource::LocalFallback),
        };

        self.entries.push(DiscoveryEntry {
            target_id: target_id.to_string(),
            rank,
            found_at_ms: now_ms,
        });
        self.persist();

        DetectionReport {
            target_id: target_id.to_string(),
            rank,
            repeat: false,
            source,
        }
    }

    fn local_fallback_rank(&mut self, target_id: &str) -> u64 {
        let key = format!("{LOCAL_COUNTER_PREFIX}{target_id}");
        let current = match self.store.get(&key) {
            Ok(value) => value
                .and_then(|text| text.trim().parse::<u64>().ok())
                .unwrap_or(0),
            Err(error) => {
                log_store_error("read_failed", &error);
                0
            }
        };
        let next = current.saturating_add(1);
        if let Err(error) = self.store.set(&key, &next.to_string()) {
            log_store_error("write_failed", &error);
        }
        next
    }

    fn persist(&mut self) {
        let text = match serde_json::to_string(&self.entries) {
            Ok(text) => text,
            Err(error) => {
                log_store_error("write_failed", &StoreError::from(error));
                return;
            }
        };
        if let Err(error) = self.store.set(DISCOVERY_LOG_KEY, &text) {
            log_store_error("write_failed", &error);
        }
    }
}

fn load_entries(store: &dyn KeyValueStore) -> Vec<DiscoveryEntry> {
    let text = match store.get(DISCOVERY_LOG_KEY) {
        Ok(Some(text)) => text,
        Ok(None) => return Vec::new(),
        Err(error) => {
            log_store_error("read_failed", &error);
            return Vec::new();
        }
    };
    let parsed: Vec<DiscoveryEntry> = match serde_json::from_str(&text) {
        Ok(entries) => entries,
        Err(error) => {
            log_store_error("read_failed", &StoreError::from(error));
            return Vec::new();
        }
    };

    let mut entries: Vec<DiscoveryEntry> = Vec::with_capacity(parsed.len());
    for entry in parsed {
        if entry.target_id.is_empty() || entries.iter().any(|e| e.target_id == entry.target_id) {
            continue;
        }
        entries.push(entry);
    }
    entries
}

fn log_store_error(event: &str, error: &StoreError) {
    emit_log(
        Level::Debug,
        "discovery",
        event,
        json!({ "error": error.to_string() }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingCounter {
        calls: u64,
        totals: HashMap<String, u64>,
    }

    impl DetectionCounter for CountingCounter {
        fn record_detection(&mut self, target_id: &str) -> Option<u64> {
            self.calls += 1;
            let total = self.totals.entry(target_id.to_string()).or_insert(0);
            *total += 1;
            Some(*total + 10)
        }
    }

    struct BrokenStore;

    fn storage_disabled() -> StoreError {
        StoreError::Io {
            path: PathBuf::from("session"),
            source: std::io::Error::other("storage disabled"),
        }
    }

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(storage_disabled())
        }

        fn set(&mut self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(storage_disabled())
        }
    }

    fn temp_file(name: &str) -> PathBuf {
        let unique = format!("{}-{}-{}", name, std::process::id(), rand::random::<u32>());
        std::env::temp_dir().join(unique).join("session.json")
    }

    #[test]
    fn repeat_hit_does_not_double_increment() {
        let mut tracker = DiscoveryTracker::new(Box::new(MemoryStore::new()));
        let mut counter = CountingCounter::default();

        let first = tracker.record_hit("vela", &mut counter, 10);
        assert_eq!(first.rank, 11);
        assert!(!first.repeat);
        assert_eq!(first.source, RankSource::Global);

        let second = tracker.record_hit("vela", &mut counter, 20);
        assert!(second.repeat);
        assert_eq!(second.rank, first.rank);
        assert_eq!(second.source, RankSource::Session);
        assert_eq!(counter.calls, 1);
        assert_eq!(tracker.entries().len(), 1);
        assert_eq!(tracker.entries()[0].found_at_ms, 10);
    }

    #[test]
    fn failed_report_uses_local_counter() {
        let mut store = MemoryStore::new();
        store
            .set(&format!("{LOCAL_COUNTER_PREFIX}crab"), "4")
            .expect("memory store writes");
        let mut tracker = DiscoveryTracker::new(Box::new(store));

        let report = tracker.record_hit("crab", &mut OfflineCounter, 5);
        assert_eq!(report.rank, 5);
        assert_eq!(report.source, RankSource::LocalFallback);

        let other = tracker.record_hit("vela", &mut OfflineCounter, 6);
        assert_eq!(other.rank, 1);
    }

    #[test]
    fn log_survives_a_new_tracker_over_the_same_store() {
        let path = temp_file("discovery-persist");
        {
            let mut tracker = DiscoveryTracker::new(Box::new(JsonFileStore::new(path.clone())));
            tracker.record_hit("vela", &mut CountingCounter::default(), 1);
            tracker.record_hit("crab", &mut CountingCounter::default(), 2);
        }
        let tracker = DiscoveryTracker::new(Box::new(JsonFileStore::new(path.clone())));
        let ids: Vec<&str> = tracker.entries().iter().map(|e| e.target_id.as_str()).collect();
        assert_eq!(ids, vec!["vela", "crab"]);

        if let Some(parent) = path.parent() {
            let _ = fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn broken_storage_keeps_the_game_playable() {
        let mut tracker = DiscoveryTracker::new(Box::new(BrokenStore));
        let first = tracker.record_hit("vela", &mut OfflineCounter, 1);
        assert_eq!(first.rank, 1);
        assert_eq!(first.source, RankSource::LocalFallback);
        let again = tracker.record_hit("vela", &mut OfflineCounter, 2);
        assert!(again.repeat);
        assert_eq!(again.rank, 1);
        assert_eq!(tracker.entries().len(), 1);
    }

    #[test]
    fn corrupt_log_is_dropped_and_duplicates_are_collapsed() {
        let mut store = MemoryStore::new();
        store
            .set(DISCOVERY_LOG_KEY, "not json")
            .expect("memory store writes");
        assert!(DiscoveryTracker::new(Box::new(store)).entries().is_empty());

        let mut store = MemoryStore::new();
        store
            .set(
                DISCOVERY_LOG_KEY,
                r#"[{"targetId":"a","rank":1,"foundAtMs":1},{"targetId":"a","rank":9,"foundAtMs":2},{"targetId":"","rank":3,"foundAtMs":3}]"#,
            )
            .expect("memory store writes");
        let tracker = DiscoveryTracker::new(Box::new(store));
        assert_eq!(tracker.entries().len(), 1);
        assert_eq!(tracker.find("a").map(|e| e.rank), Some(1));
    }

    #[test]
    fn json_file_store_ignores_unsupported_versions() {
        let path = temp_file("session-store-version");
        let parent = path.parent().expect("parent exists").to_path_buf();
        fs::create_dir_all(&parent).expect("create dir");
        fs::write(&path, r#"{"version":9,"values":{"k":"v"}}"#).expect("write file");

        let mut store = JsonFileStore::new(path.clone());
        assert_eq!(store.get("k").expect("file store reads"), None);
        store.set("k", "fresh").expect("file store writes");

        let reloaded = JsonFileStore::new(path.clone());
        assert_eq!(
            reloaded.get("k").expect("file store reads"),
            Some("fresh".to_string())
        );

        let _ = fs::remove_dir_all(&parent);
    }
}
