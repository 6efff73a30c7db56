//! Typed error boundary of the report engine.
//!
//! Collaborators (row sources, config loading) speak `anyhow`; everything the
//! engine hands back to its caller is one of these variants.

use thiserror::Error;

/// The definition is inconsistent with its data source. Always fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("unknown data source: {0}")]
    UnknownDataSource(String),

    #[error("{context} references unknown field '{field}'")]
    UnknownField { context: String, field: String },

    #[error("filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("aggregation '{label}': {reason}")]
    InvalidAggregation { label: String, reason: String },

    #[error("sort field '{0}' is not a column of the grouped output")]
    SortNotInOutput(String),

    #[error("limit must be at least 1 (got {0})")]
    InvalidLimit(usize),

    #[error("invalid date range: {0}")]
    InvalidDateRange(String),
}

/// An export serializer could not represent some part of the report.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SerializationError {
    #[error("chart '{title}': unsupported chart type '{chart_type}'")]
    UnsupportedChart { title: String, chart_type: String },

    #[error("chart '{title}': {reason}")]
    ChartProjection { title: String, reason: String },

    #[error("PDF encoding failed: {0}")]
    Pdf(String),

    #[error("spreadsheet encoding failed: {0}")]
    Spreadsheet(String),

    #[error("CSV encoding failed: {0}")]
    Csv(String),

    #[error("unknown export format: {0}")]
    UnknownFormat(String),
}

impl From<rust_xlsxwriter::XlsxError> for SerializationError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        SerializationError::Spreadsheet(err.to_string())
    }
}

impl From<lopdf::Error> for SerializationError {
    fn from(err: lopdf::Error) -> Self {
        SerializationError::Pdf(err.to_string())
    }
}

impl From<csv::Error> for SerializationError {
    fn from(err: csv::Error) -> Self {
        SerializationError::Csv(err.to_string())
    }
}

/// A schedule is missing or malformed in a field its frequency requires.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleConfigError {
    #[error("weekly schedules require dayOfWeek")]
    MissingDayOfWeek,

    #[error("{0} schedules require dayOfMonth")]
    MissingDayOfMonth(String),

    #[error("dayOfWeek must be between 0 (Sunday) and 6 (got {0})")]
    InvalidDayOfWeek(u8),

    #[error("dayOfMonth must be between 1 and 31 (got {0})")]
    InvalidDayOfMonth(u8),

    #[error("time must be HH:mm (got '{0}')")]
    InvalidTime(String),

    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),

    #[error("invalid recipient '{0}'")]
    InvalidRecipient(String),

    #[error("schedule has no recipients")]
    NoRecipients,

    #[error("schedule has no export formats")]
    NoExportFormats,
}

/// Everything the engine can surface to its caller.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("row source '{data_source}' failed for report '{definition_id}': {source:#}")]
    Source {
        data_source: String,
        definition_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("schedule config error: {0}")]
    ScheduleConfig(#[from] ScheduleConfigError),
}

pub type Result<T, E = ReportError> = std::result::Result<T, E>;
