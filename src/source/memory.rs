//! In-process row source.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{RawRow, RowSource, SourceQuery};

/// Rows held in memory, keyed by data source.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    inner: Arc<RwLock<HashMap<String, Vec<RawRow>>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rows of a data source. Non-object values are skipped.
    pub fn set_rows(&self, key: &str, rows: Vec<serde_json::Value>) {
        let rows: Vec<RawRow> = rows
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::Object(obj) => Some(obj),
                _ => None,
            })
            .collect();
        tracing::debug!("MemorySource: stored {} rows for '{}'", rows.len(), key);
        self.inner.write().unwrap().insert(key.to_string(), rows);
    }

    pub fn with_rows(self, key: &str, rows: Vec<serde_json::Value>) -> Self {
        self.set_rows(key, rows);
        self
    }
}

#[async_trait::async_trait]
impl RowSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_rows(&self, query: &SourceQuery) -> anyhow::Result<Vec<RawRow>> {
        let store = self.inner.read().unwrap();
        store
            .get(&query.data_source)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No rows loaded for data source '{}'", query.data_source))
    }
}
