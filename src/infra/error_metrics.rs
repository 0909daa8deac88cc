//! Process-wide error occurrence counts keyed by `category:code`.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::error::{ErrorCategory, TypedError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorMetricsEntry {
    pub key: String,
    pub category: ErrorCategory,
    pub code: String,
    pub count: u64,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ErrorCollector {
    entries: Mutex<HashMap<String, ErrorMetricsEntry>>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&self, err: &TypedError) {
        let category = err.category();
        let code = err.code();
        let key = format!("{category}:{code}");
        let at = err.metadata().timestamp();

        metrics::counter!(
            "errors_total",
            "category" => category.as_str(),
            "code" => code.to_string()
        )
        .increment(1);

        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries
            .entry(key.clone())
            .and_modify(|e| {
                e.count += 1;
                e.first_occurrence = e.first_occurrence.min(at);
                e.last_occurrence = e.last_occurrence.max(at);
            })
            .or_insert_with(|| ErrorMetricsEntry {
                key,
                category,
                code: code.to_string(),
                count: 1,
                first_occurrence: at,
                last_occurrence: at,
            });
    }

    /// Snapshot of every entry, sorted by key.
    pub fn metrics(&self) -> Vec<ErrorMetricsEntry> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let mut out: Vec<_> = entries.values().cloned().collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    pub fn total(&self) -> u64 {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.values().map(|e| e.count).sum()
    }

    pub fn reset(&self) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}
