//! Report Engine - definition-driven tabular reports with chart projection,
//! PDF / spreadsheet / CSV export and recurring schedules.

pub mod cell;
pub mod chart;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod model;
pub mod schedule;
pub mod source;
pub mod transform;
pub mod validation;

pub use engine::ReportEngine;
pub use error::{DefinitionError, ReportError, ScheduleConfigError, SerializationError};
pub use export::{ExportArtifact, ExportFormat, ExportOptions};
pub use model::{ReportData, ReportDefinition};
pub use transform::ExecutionOptions;
