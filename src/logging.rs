use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Clone, Debug, Serialize)]
pub struct StructuredLogLine {
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: u64,
    pub level: Level,
    pub event: String,
    pub scope: String,
    #[serde(rename = "runId", skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    pub details: Value,
}

impl StructuredLogLine {
    pub fn new(level: Level, scope: &str, event: &str, details: Value) -> Self {
        Self {
            timestamp_ms: now_ms(),
            level,
            event: event.to_string(),
            scope: scope.to_string(),
            run_id: None,
            page: None,
            details,
        }
    }

    pub fn with_run_id(mut self, run_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self
    }

    pub fn with_page(mut self, page: &str) -> Self {
        self.page = Some(page.to_string());
        self
    }

    pub fn emit(&self) {
        if self.level < min_level() {
            return;
        }
        match serde_json::to_string(self) {
            Ok(text) => eprintln!("{text}"),
            Err(error) => eprintln!("[{}] {} (unserializable log: {error})", self.scope, self.event),
        }
    }
}

pub fn emit_log(level: Level, scope: &str, event: &str, details: Value) {
    StructuredLogLine::new(level, scope, event, details).emit();
}

/// `PULSAR_LOG=debug|info|warn|error`, default `info`.
pub fn min_level() -> Level {
    match std::env::var("PULSAR_LOG").ok().as_deref().map(str::trim) {
        Some("debug") => Level::Debug,
        Some("warn") => Level::Warn,
        Some("error") => Level::Error,
        _ => Level::Info,
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
