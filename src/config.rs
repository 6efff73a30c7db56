//! Service configuration and the report definition store.
//!
//! Settings come from the environment (`.env` honoured). Data sources are
//! described by JSON files in `<config_dir>/sources`; report definitions live
//! in `<config_dir>/reports` and are validated against those sources on load.
//! The in-memory definition cache is backed by `RwLock` for runtime CRUD.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::model::ReportDefinition;
use crate::source::file::FileSource;
use crate::source::http::HttpSource;
use crate::source::{DataSourceSpec, RowSource, SourceCatalog};
use crate::validation::validate_definition;

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_addr: String,
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    /// Zone applied to schedules that do not name one.
    pub default_timezone: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let default_timezone = lookup("REPORT_DEFAULT_TIMEZONE").unwrap_or_else(|| "UTC".to_string());
        default_timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| anyhow::anyhow!("REPORT_DEFAULT_TIMEZONE is not an IANA zone: {}", default_timezone))?;

        Ok(Self {
            bind_addr: lookup("REPORT_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            config_dir: lookup("REPORT_CONFIG_DIR").unwrap_or_else(|| "configs".to_string()).into(),
            data_dir: lookup("REPORT_DATA_DIR").unwrap_or_else(|| "data".to_string()).into(),
            default_timezone,
        })
    }

    pub fn sources_dir(&self) -> PathBuf {
        self.config_dir.join("sources")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.config_dir.join("reports")
    }
}

// ============================================================================
// Data sources
// ============================================================================

/// Which backend serves a configured data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceBackend {
    /// `<data_dir>/<key>.{json,csv,xlsx}`
    #[default]
    File,
    /// Remote REST table, needs `REPORT_SOURCE_URL`.
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(flatten)]
    pub spec: DataSourceSpec,
    #[serde(default)]
    pub backend: SourceBackend,
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read directory {:?}", dir))? {
        let path = entry?.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Build the catalog from `*.json` source descriptions.
pub fn load_sources_from_dir(dir: &Path, data_dir: &Path, http: Option<HttpSource>) -> Result<SourceCatalog> {
    if !dir.exists() {
        anyhow::bail!("Source directory does not exist: {:?}", dir);
    }

    let files: Arc<dyn RowSource> = Arc::new(FileSource::new(data_dir));
    let http: Option<Arc<dyn RowSource>> = http.map(|h| Arc::new(h) as Arc<dyn RowSource>);
    let mut catalog = SourceCatalog::new();

    for path in json_files(dir)? {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read source config: {:?}", path))?;
        let config: SourceConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse source config: {:?}", path))?;

        let provider = match config.backend {
            SourceBackend::File => files.clone(),
            SourceBackend::Http => match &http {
                Some(h) => h.clone(),
                None => {
                    warn!(
                        "Skipping data source '{}': http backend requested but REPORT_SOURCE_URL is not set",
                        config.spec.key
                    );
                    continue;
                }
            },
        };
        catalog
            .register(config.spec, provider)
            .with_context(|| format!("Invalid source config: {:?}", path))?;
    }

    Ok(catalog)
}

// ============================================================================
// Definition store
// ============================================================================

/// In-memory store for report definitions.
#[derive(Debug, Default)]
pub struct DefinitionStore {
    definitions: Arc<RwLock<HashMap<String, ReportDefinition>>>,
}

impl DefinitionStore {
    /// Load every definition in `dir` and validate it against `catalog`.
    pub fn load_from_dir(dir: &Path, catalog: &SourceCatalog) -> Result<Self> {
        if !dir.exists() {
            anyhow::bail!("Report directory does not exist: {:?}", dir);
        }

        let mut definitions = Vec::new();
        for path in json_files(dir)? {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read report definition: {:?}", path))?;
            let definition: ReportDefinition = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse report definition: {:?}", path))?;
            info!("Loaded report: {} from {:?}", definition.id, path);
            definitions.push(definition);
        }

        if definitions.is_empty() {
            warn!("No report definitions found in {:?}", dir);
        }
        Self::from_definitions(definitions, catalog)
    }

    /// Create a store from already-parsed definitions, validating each.
    pub fn from_definitions(definitions: Vec<ReportDefinition>, catalog: &SourceCatalog) -> Result<Self> {
        let mut map = HashMap::new();
        for definition in definitions {
            let spec = catalog.spec(&definition.data_source).with_context(|| {
                format!(
                    "Report '{}' uses unknown data source '{}'",
                    definition.id, definition.data_source
                )
            })?;
            validate_definition(&definition, &spec.fields)
                .with_context(|| format!("Report '{}' is invalid", definition.id))?;
            if map.insert(definition.id.clone(), definition).is_some() {
                anyhow::bail!("Duplicate report id in definitions");
            }
        }
        Ok(Self {
            definitions: Arc::new(RwLock::new(map)),
        })
    }

    /// Get a definition by id (returns clone).
    pub fn get(&self, id: &str) -> Option<ReportDefinition> {
        self.definitions.read().unwrap().get(id).cloned()
    }

    /// Sorted definition ids.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.definitions.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Insert or replace a definition.
    pub fn insert(&self, definition: ReportDefinition) {
        self.definitions
            .write()
            .unwrap()
            .insert(definition.id.clone(), definition);
    }

    /// Remove a definition. Returns true if it existed.
    pub fn remove(&self, id: &str) -> bool {
        self.definitions.write().unwrap().remove(id).is_some()
    }

    pub fn all(&self) -> Vec<ReportDefinition> {
        let mut all: Vec<ReportDefinition> = self.definitions.read().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}
