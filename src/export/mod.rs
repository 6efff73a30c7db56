//! Export serializers: report result → downloadable artifact.
//!
//! Every serializer renders null cells as empty strings and is deterministic
//! for a given input; the only time-dependent content is the generation
//! timestamp already carried in the report metadata.

pub mod csv;
pub mod pdf;
pub mod xlsx;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::error::SerializationError;
use crate::model::{ReportData, ReportDefinition};

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    #[serde(alias = "xlsx")]
    Excel,
    Csv,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Excel => "excel",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Excel => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Excel => "xlsx",
            other => other.as_str(),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pdf" => Ok(ExportFormat::Pdf),
            "excel" | "xlsx" => Ok(ExportFormat::Excel),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(SerializationError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    #[default]
    A4,
    Letter,
    Legal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStyle {
    #[default]
    Striped,
    Bordered,
    Minimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    pub format: ExportFormat,
    #[serde(default = "default_true")]
    pub include_metadata: bool,
    #[serde(default)]
    pub include_charts: bool,
    #[serde(default = "default_true")]
    pub include_description: bool,
    #[serde(default)]
    pub page_size: PageSize,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub table_style: TableStyle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<String>,
    /// Overrides the definition name as document title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ExportOptions {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            include_metadata: true,
            include_charts: false,
            include_description: true,
            page_size: PageSize::default(),
            orientation: Orientation::default(),
            table_style: TableStyle::default(),
            watermark: None,
            title: None,
        }
    }
}

// ============================================================================
// Serializer contract
// ============================================================================

/// Bytes produced by a serializer plus the recoverable problems it hit.
#[derive(Debug, Default)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub warnings: Vec<SerializationError>,
}

impl Rendered {
    pub fn clean(bytes: Vec<u8>) -> Self {
        Self { bytes, warnings: Vec::new() }
    }
}

pub trait ExportSerializer: Send + Sync {
    fn format(&self) -> ExportFormat;

    fn serialize(
        &self,
        data: &ReportData,
        definition: &ReportDefinition,
        options: &ExportOptions,
    ) -> Result<Rendered, SerializationError>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportArtifact {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
    pub warnings: Vec<String>,
}

fn serializer_for(format: ExportFormat) -> Box<dyn ExportSerializer> {
    match format {
        ExportFormat::Pdf => Box::new(pdf::PdfSerializer),
        ExportFormat::Excel => Box::new(xlsx::XlsxSerializer),
        ExportFormat::Csv => Box::new(self::csv::CsvSerializer),
    }
}

/// Serialize a report in the requested format.
pub fn export(
    data: &ReportData,
    definition: &ReportDefinition,
    options: &ExportOptions,
) -> Result<ExportArtifact, SerializationError> {
    let serializer = serializer_for(options.format);
    info!(
        "Exporting report '{}' as {} ({} rows)",
        definition.id,
        serializer.format().as_str(),
        data.rows.len()
    );

    let rendered = serializer.serialize(data, definition, options)?;
    for warning in &rendered.warnings {
        warn!("Export of '{}': {}", definition.id, warning);
    }

    let artifact = ExportArtifact {
        filename: export_filename(
            &report_title(definition, options),
            options.format,
            data.metadata.generated_at,
        ),
        mime_type: options.format.mime_type().to_string(),
        warnings: rendered.warnings.iter().map(|w| w.to_string()).collect(),
        bytes: rendered.bytes,
    };
    info!("Export ready: {} ({} bytes)", artifact.filename, artifact.bytes.len());
    Ok(artifact)
}

// ============================================================================
// Shared layout helpers
// ============================================================================

fn slug_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]").expect("static pattern"))
}

/// `<slug>-<YYYY-MM-DD-HH-mm-ss>.<ext>`, where the slug is the lowercased
/// name with every non `[a-z0-9]` character replaced by `-`.
pub fn export_filename(name: &str, format: ExportFormat, generated_at: DateTime<Utc>) -> String {
    let lowered = name.to_lowercase();
    let slug = slug_pattern().replace_all(&lowered, "-");
    format!(
        "{}-{}.{}",
        slug,
        generated_at.format("%Y-%m-%d-%H-%M-%S"),
        format.extension()
    )
}

pub fn report_title(definition: &ReportDefinition, options: &ExportOptions) -> String {
    options
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| definition.name.clone())
}

/// Key/value pairs of the metadata block, shared by the PDF and the
/// spreadsheet "Información" sheet.
pub fn metadata_entries(
    data: &ReportData,
    definition: &ReportDefinition,
    options: &ExportOptions,
) -> Vec<(&'static str, String)> {
    vec![
        ("Título", report_title(definition, options)),
        ("Descripción", definition.description.clone()),
        ("Tipo", definition.report_type.as_str().to_string()),
        (
            "Generado",
            data.metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
        ("Total de filas", data.total_rows.to_string()),
        ("Tiempo de ejecución", format!("{} ms", data.metadata.execution_time)),
        ("Filtros aplicados", data.metadata.filters.len().to_string()),
    ]
}

/// Page dimensions in PDF points (width, height).
pub fn page_dimensions(size: PageSize, orientation: Orientation) -> (f64, f64) {
    let (w, h) = match size {
        PageSize::A4 => (595.28, 841.89),
        PageSize::Letter => (612.0, 792.0),
        PageSize::Legal => (612.0, 1008.0),
    };
    match orientation {
        Orientation::Portrait => (w, h),
        Orientation::Landscape => (h, w),
    }
}
