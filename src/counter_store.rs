use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::discovery::DetectionCounter;
use crate::logging::{emit_log, now_ms, Level};

const MAX_TARGET_ID_LEN: usize = 64;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredDetectionEntry {
    count: u64,
    #[serde(rename = "firstAtMs", alias = "first_at_ms")]
    first_at_ms: u64,
    #[serde(rename = "updatedAtMs", alias = "updated_at_ms")]
    updated_at_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
struct DetectionStoreFile<'a> {
    version: u8,
    targets: &'a HashMap<String, StoredDetectionEntry>,
}

#[derive(Clone, Debug, Deserialize)]
struct DetectionStoreFileRaw {
    version: u8,
    targets: HashMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DetectionCount {
    #[serde(rename = "targetId")]
    pub target_id: String,
    pub count: u64,
    #[serde(rename = "firstAtMs")]
    pub first_at_ms: u64,
    #[serde(rename = "updatedAtMs")]
    pub updated_at_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct DetectionsResponse {
    #[serde(rename = "generatedAtIso")]
    pub generated_at_iso: String,
    pub entries: Vec<DetectionCount>,
}

/// Global "Nth detector" counter. With a file path every increment is
/// written through; failures are logged and the in-memory count stands.
pub struct DetectionCounterStore {
    file_path: Option<PathBuf>,
    targets: HashMap<String, StoredDetectionEntry>,
}

impl DetectionCounterStore {
    pub fn new(file_path: PathBuf) -> Self {
        let targets = load_targets(&file_path);
        Self {
            file_path: Some(file_path),
            targets,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            file_path: None,
            targets: HashMap::new(),
        }
    }

    /// Increments and returns the new count, which is the caller's rank.
    pub fn record(&mut self, target_id: &str) -> Option<u64> {
        let key = sanitize_target_id(target_id)?;
        let now_ms = now_ms();
        let entry = self
            .targets
            .entry(key)
            .or_insert_with(|| StoredDetectionEntry {
                count: 0,
                first_at_ms: now_ms,
                updated_at_ms: now_ms,
            });
        entry.count = entry.count.saturating_add(1);
        entry.updated_at_ms = now_ms;
        let rank = entry.count;
        self.save();
        Some(rank)
    }

    pub fn count(&self, target_id: &str) -> u64 {
        sanitize_target_id(target_id)
            .and_then(|key| self.targets.get(&key))
            .map_or(0, |entry| entry.count)
    }

    pub fn get(&self, target_id: &str) -> Option<DetectionCount> {
        let key = sanitize_target_id(target_id)?;
        self.targets.get(&key).map(|entry| to_count(&key, entry))
    }

    pub fn build_response(&self) -> DetectionsResponse {
        let mut entries: Vec<DetectionCount> = self
            .targets
            .iter()
            .map(|(key, entry)| to_count(key, entry))
            .collect();
        entries.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.target_id.cmp(&b.target_id))
        });
        DetectionsResponse {
            generated_at_iso: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            entries,
        }
    }

    fn save(&self) {
        let Some(file_path) = self.file_path.as_ref() else {
            return;
        };
        if let Some(parent) = file_path.parent() {
            if let Err(error) = fs::create_dir_all(parent) {
                log_store_warning(
                    "create_dir_failed",
                    parent,
                    &error.to_string(),
                );
                return;
            }
        }

        let payload = DetectionStoreFile {
            version: 1,
            targets: &self.targets,
        };
        match serde_json::to_string_pretty(&payload) {
            Ok(text) => {
                if let Err(error) = fs::write(file_path, text) {
                    log_store_warning("write_failed", file_path, &error.to_string());
                }
            }
            Err(error) => log_store_warning("serialize_failed", file_path, &error.to_string()),
        }
    }
}

impl DetectionCounter for DetectionCounterStore {
    fn record_detection(&mut self, target_id: &str) -> Option<u64> {
        self.record(target_id)
    }
}

/// Trimmed id of 1-64 chars from `[A-Za-z0-9._+-]`, or `None`.
pub fn sanitize_target_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_TARGET_ID_LEN {
        return None;
    }
    let valid = trimmed
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '+' | '-'));
    valid.then(|| trimmed.to_string())
}

fn to_count(key: &str, entry: &StoredDetectionEntry) -> DetectionCount {
    DetectionCount {
        target_id: key.to_string(),
        count: entry.count,
        first_at_ms: entry.first_at_ms,
        updated_at_ms: entry.updated_at_ms,
    }
}

fn load_targets(path: &Path) -> HashMap<String, StoredDetectionEntry> {
    let text = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                log_store_warning("read_failed", path, &error.to_string());
            }
            return HashMap::new();
        }
    };
    let parsed = match serde_json::from_str::<DetectionStoreFileRaw>(&text) {
        Ok(value) if value.version == 1 => value,
        Ok(value) => {
            log_store_warning(
                "unsupported_version",
                path,
                &format!("version {}", value.version),
            );
            return HashMap::new();
        }
        Err(error) => {
            log_store_warning("parse_failed", path, &error.to_string());
            return HashMap::new();
        }
    };

    let mut sanitized = HashMap::<String, StoredDetectionEntry>::new();
    for (raw_key, raw_value) in parsed.targets {
        let value: StoredDetectionEntry = match serde_json::from_value(raw_value) {
            Ok(entry) => entry,
            Err(error) => {
                log_store_warning(
                    "entry_skipped",
                    path,
                    &format!("'{raw_key}': {error}"),
                );
                continue;
            }
        };
        let Some(key) = sanitize_target_id(&raw_key) else {
            continue;
        };

        match sanitized.get_mut(&key) {
            Some(current) => {
                current.count = current.count.saturating_add(value.count);
                current.first_at_ms = current.first_at_ms.min(value.first_at_ms);
                current.updated_at_ms = current.updated_at_ms.max(value.updated_at_ms);
            }
            None => {
                sanitized.insert(key, value);
            }
        }
    }

    sanitized
}

fn log_store_warning(event: &str, path: &Path, error: &str) {
    emit_log(
        Level::Warn,
        "detection-store",
        event,
        json!({ "path": path.display().to_string(), "error": error }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> PathBuf {
        let unique = format!(
            "{}-{}-{}",
            name,
            std::process::id(),
            now_ms().saturating_add(rand::random::<u32>() as u64)
        );
        std::env::temp_dir().join(unique).join("detections.json")
    }

    #[test]
    fn record_returns_increasing_ranks_per_target() {
        let mut store = DetectionCounterStore::in_memory();
        assert_eq!(store.record("vela"), Some(1));
        assert_eq!(store.record("vela"), Some(2));
        assert_eq!(store.record("crab"), Some(1));
        assert_eq!(store.count("vela"), 2);
        assert_eq!(store.count(" vela "), 2);
        assert_eq!(store.count("unknown"), 0);
    }

    #[test]
    fn invalid_ids_are_rejected() {
        let mut store = DetectionCounterStore::in_memory();
        assert_eq!(store.record(""), None);
        assert_eq!(store.record("   "), None);
        assert_eq!(store.record("../etc/passwd"), None);
        assert_eq!(store.record(&"x".repeat(65)), None);
        assert_eq!(store.record(&"x".repeat(64)), Some(1));
        assert_eq!(store.record("J0437-4715+b_1.2"), Some(1));
        assert!(store.get("nope/").is_none());
    }

    #[test]
    fn counts_survive_reload() {
        let path = temp_file("detection-store-reload");
        {
            let mut store = DetectionCounterStore::new(path.clone());
            store.record("vela");
            store.record("vela");
            store.record("crab");
        }
        let mut store = DetectionCounterStore::new(path.clone());
        assert_eq!(store.count("vela"), 2);
        assert_eq!(store.record_detection("vela"), Some(3));

        let response = store.build_response();
        let ids: Vec<&str> = response.entries.iter().map(|e| e.target_id.as_str()).collect();
        assert_eq!(ids, vec!["vela", "crab"]);
        assert!(response.generated_at_iso.ends_with('Z'));

        if let Some(parent) = path.parent() {
            let _ = fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn load_merges_keys_and_skips_malformed_entries() {
        let path = temp_file("detection-store-load");
        let parent = path.parent().expect("parent exists").to_path_buf();
        fs::create_dir_all(&parent).expect("create dir");
        let raw = r#"{
  "version": 1,
  "targets": {
    "vela": { "count": 2, "firstAtMs": 50, "updatedAtMs": 60 },
    " vela ": { "count": 3, "first_at_ms": 10, "updated_at_ms": 90 },
    "crab": { "count": "many" },
    "bad/id": { "count": 7, "firstAtMs": 1, "updatedAtMs": 1 }
  }
}"#;
        fs::write(&path, raw).expect("write file");

        let store = DetectionCounterStore::new(path.clone());
        let vela = store.get("vela").expect("vela exists");
        assert_eq!(vela.count, 5);
        assert_eq!(vela.first_at_ms, 10);
        assert_eq!(vela.updated_at_ms, 90);
        assert_eq!(store.count("crab"), 0);
        assert_eq!(store.build_response().entries.len(), 1);

        let _ = fs::remove_dir_all(&parent);
    }

    #[test]
    fn unsupported_version_starts_empty() {
        let path = temp_file("detection-store-version");
        let parent = path.parent().expect("parent exists").to_path_buf();
        fs::create_dir_all(&parent).expect("create dir");
        fs::write(&path, r#"{"version":2,"targets":{"vela":{"count":4,"firstAtMs":1,"updatedAtMs":1}}}"#)
            .expect("write file");

        let store = DetectionCounterStore::new(path.clone());
        assert_eq!(store.count("vela"), 0);

        let _ = fs::remove_dir_all(&parent);
    }
}
