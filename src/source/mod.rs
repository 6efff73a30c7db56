//! Row source abstraction.
//!
//! Defines the [`RowSource`] trait and the catalog of registered data sources so
//! different backends (in-memory rows, data files, a remote REST table) can feed
//! the same transform stage.

pub mod file;
pub mod http;
pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::model::{Field, Filter, GroupBy, SortSpec};

/// Raw row as delivered by a source: field key → primitive JSON value.
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// Typed row used by the transform stage.
pub type Row = HashMap<String, Cell>;

/// A named, queryable collection of typed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceSpec {
    pub key: String,
    pub label: String,
    pub fields: Vec<Field>,
}

impl DataSourceSpec {
    /// Convert raw rows into typed rows using the declared field types.
    /// Keys that are not declared fields are dropped.
    pub fn type_rows(&self, raw: Vec<RawRow>) -> Vec<Row> {
        raw.into_iter()
            .map(|obj| {
                self.fields
                    .iter()
                    .map(|field| {
                        let cell = obj
                            .get(&field.key)
                            .map(|v| Cell::from_json_typed(v, field.field_type))
                            .unwrap_or(Cell::Null);
                        (field.key.clone(), cell)
                    })
                    .collect()
            })
            .collect()
    }
}

/// Parameters handed to a source. Sources may use them to narrow their fetch;
/// the engine re-applies every filter regardless.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceQuery {
    pub data_source: String,
    pub filters: Vec<Filter>,
    pub group_by: Vec<GroupBy>,
    pub sorting: Vec<SortSpec>,
}

/// Async trait implemented by each row backend.
#[async_trait::async_trait]
pub trait RowSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_rows(&self, query: &SourceQuery) -> Result<Vec<RawRow>>;
}

/// Registered data sources and the backend serving each.
#[derive(Clone, Default)]
pub struct SourceCatalog {
    specs: HashMap<String, DataSourceSpec>,
    providers: HashMap<String, Arc<dyn RowSource>>,
}

impl SourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a data source. Fields are immutable once registered, so a
    /// second registration of the same key is refused.
    pub fn register(&mut self, spec: DataSourceSpec, provider: Arc<dyn RowSource>) -> Result<()> {
        if self.specs.contains_key(&spec.key) {
            anyhow::bail!("Data source already registered: {}", spec.key);
        }
        let mut seen = std::collections::HashSet::new();
        for field in &spec.fields {
            if !seen.insert(field.key.as_str()) {
                anyhow::bail!("Duplicate field '{}' in data source {}", field.key, spec.key);
            }
        }
        tracing::info!(
            "Registered data source '{}' ({} fields) served by {}",
            spec.key,
            spec.fields.len(),
            provider.name()
        );
        self.providers.insert(spec.key.clone(), provider);
        self.specs.insert(spec.key.clone(), spec);
        Ok(())
    }

    pub fn spec(&self, key: &str) -> Option<&DataSourceSpec> {
        self.specs.get(key)
    }

    pub fn provider(&self, key: &str) -> Option<Arc<dyn RowSource>> {
        self.providers.get(key).cloned()
    }

    pub fn specs(&self) -> Vec<&DataSourceSpec> {
        let mut specs: Vec<_> = self.specs.values().collect();
        specs.sort_by(|a, b| a.key.cmp(&b.key));
        specs
    }
}
