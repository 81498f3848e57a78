use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::logging::{emit_log, Level};
use crate::types::{Difficulty, Target};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct CatalogFileRaw {
    #[serde(default)]
    targets: Vec<Value>,
    #[serde(default)]
    pages: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TargetRaw {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "frequencyHz", alias = "frequency_hz", alias = "frequency")]
    frequency_hz: f64,
    #[serde(default)]
    difficulty: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    details: BTreeMap<String, String>,
}

/// Read-only target list plus the site's page registry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TargetCatalog {
    targets: Vec<Target>,
    pages: Vec<String>,
}

impl TargetCatalog {
    pub fn new(targets: Vec<Target>, pages: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        let targets = targets
            .into_iter()
            .filter_map(sanitize_target)
            .filter(|target| seen.insert(target.id.clone()))
            .collect();
        let pages = pages
            .into_iter()
            .map(|page| page.trim().to_string())
            .filter(|page| !page.is_empty())
            .collect();
        Self { targets, pages }
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, CatalogError> {
        let raw: CatalogFileRaw = serde_json::from_str(text)?;
        let mut targets = Vec::with_capacity(raw.targets.len());
        for (index, value) in raw.targets.into_iter().enumerate() {
            match serde_json::from_value::<TargetRaw>(value) {
                Ok(entry) => targets.push(entry.into_target()),
                Err(error) => emit_log(
                    Level::Warn,
                    "catalog",
                    "target_skipped",
                    json!({ "index": index, "error": error.to_string() }),
                ),
            }
        }
        Ok(Self::new(targets, raw.pages))
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    pub fn target_ids(&self) -> Vec<String> {
        self.targets.iter().map(|target| target.id.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Target> {
        self.targets.iter().find(|target| target.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl TargetRaw {
    fn into_target(self) -> Target {
        let difficulty = self
            .difficulty
            .as_deref()
            .map(|value| value.trim().to_ascii_lowercase())
            .and_then(|value| Difficulty::parse(&value))
            .unwrap_or_default();
        let name = self
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.id.trim().to_string());
        Target {
            id: self.id,
            name,
            frequency_hz: self.frequency_hz,
            difficulty,
            image: self.image,
            details: self.details,
        }
    }
}

fn sanitize_target(mut target: Target) -> Option<Target> {
    target.id = target.id.trim().to_string();
    if target.id.is_empty() {
        return None;
    }
    if !target.frequency_hz.is_finite() || target.frequency_hz <= 0.0 {
        emit_log(
            Level::Warn,
            "catalog",
            "target_skipped",
            json!({ "id": target.id, "reason": "invalid frequency" }),
        );
        return None;
    }
    Some(target)
}
