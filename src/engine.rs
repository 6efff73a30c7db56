//! Report engine: fetch rows, run the transform stage, project charts and export.
//!
//! The row fetch is the only suspension point. Nothing here is shared between
//! executions apart from the read-only catalog.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::chart::{self, ChartError, ChartSeries};
use crate::error::{DefinitionError, ReportError, Result};
use crate::export::{self, ExportArtifact, ExportOptions};
use crate::model::{ReportData, ReportDefinition};
use crate::schedule::ScheduledReport;
use crate::source::{DataSourceSpec, SourceCatalog, SourceQuery};
use crate::transform::{self, ExecutionOptions};
use crate::validation::validate_definition;

#[derive(Clone)]
pub struct ReportEngine {
    catalog: SourceCatalog,
}

impl ReportEngine {
    pub fn new(catalog: SourceCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    fn spec_for(&self, definition: &ReportDefinition) -> std::result::Result<&DataSourceSpec, DefinitionError> {
        self.catalog
            .spec(&definition.data_source)
            .ok_or_else(|| DefinitionError::UnknownDataSource(definition.data_source.clone()))
    }

    /// Check a definition against its data source without fetching rows.
    pub fn validate(&self, definition: &ReportDefinition) -> std::result::Result<(), DefinitionError> {
        let spec = self.spec_for(definition)?;
        validate_definition(definition, &spec.fields)
    }

    /// Execute a definition. Validation happens before any row is fetched.
    pub async fn execute(&self, definition: &ReportDefinition, options: &ExecutionOptions) -> Result<ReportData> {
        let started = Instant::now();
        let spec = self.spec_for(definition)?;
        validate_definition(definition, &spec.fields)?;
        let provider = self
            .catalog
            .provider(&definition.data_source)
            .ok_or_else(|| DefinitionError::UnknownDataSource(definition.data_source.clone()))?;

        info!(
            "Executing report '{}' on '{}' via {}",
            definition.id,
            definition.data_source,
            provider.name()
        );

        let mut filters = definition.filters.clone();
        filters.extend(options.extra_filters.iter().cloned());
        let query = SourceQuery {
            data_source: definition.data_source.clone(),
            filters,
            group_by: definition.group_by.clone(),
            sorting: definition.sorting.clone(),
        };

        let raw = provider.fetch_rows(&query).await.map_err(|e| {
            error!("Row fetch failed for report '{}': {:#}", definition.id, e);
            ReportError::Source {
                data_source: definition.data_source.clone(),
                definition_id: definition.id.clone(),
                source: e,
            }
        })?;
        debug!("Fetched {} raw rows for '{}'", raw.len(), definition.data_source);

        let rows = spec.type_rows(raw);
        let mut data = transform::execute(rows, definition, &spec.fields, options)?;
        data.metadata.execution_time = started.elapsed().as_millis() as u64;

        info!(
            "Report '{}' done: {} rows ({} before limit) in {} ms",
            definition.id,
            data.rows.len(),
            data.total_rows,
            data.metadata.execution_time
        );
        Ok(data)
    }

    /// Project the chart at `index` of the definition.
    /// `None` when the definition has no chart at that position.
    pub fn chart(
        &self,
        data: &ReportData,
        definition: &ReportDefinition,
        index: usize,
    ) -> Option<std::result::Result<ChartSeries, ChartError>> {
        definition.charts.get(index).map(|config| chart::project(data, config))
    }

    /// Execute and serialize in one step.
    pub async fn export(
        &self,
        definition: &ReportDefinition,
        execution: &ExecutionOptions,
        options: &ExportOptions,
    ) -> Result<ExportArtifact> {
        let data = self.execute(definition, execution).await?;
        Ok(export::export(&data, definition, options)?)
    }

    /// One dispatcher run of a schedule: execute once, export every requested
    /// format, then advance the schedule. The schedule is left untouched on error.
    pub async fn run_schedule(
        &self,
        schedule: &mut ScheduledReport,
        definition: &ReportDefinition,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExportArtifact>> {
        let execution = ExecutionOptions {
            now: Some(now),
            ..Default::default()
        };
        let data = self.execute(definition, &execution).await?;

        let artifacts = schedule
            .export_formats
            .iter()
            .map(|format| export::export(&data, definition, &ExportOptions::new(*format)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        schedule.advance(now)?;
        info!(
            "Schedule '{}' ran with {} artifacts, next run {}",
            schedule.id,
            artifacts.len(),
            schedule.next_run()
        );
        Ok(artifacts)
    }
}
