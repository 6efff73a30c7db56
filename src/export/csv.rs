//! CSV serializer. RFC 4180 quoting, `\n` line endings, no row cap.

use super::{ExportFormat, ExportOptions, ExportSerializer, Rendered};
use crate::cell::Cell;
use crate::error::SerializationError;
use crate::model::{ReportData, ReportDefinition};

pub struct CsvSerializer;

impl ExportSerializer for CsvSerializer {
    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }

    fn serialize(
        &self,
        data: &ReportData,
        _definition: &ReportDefinition,
        _options: &ExportOptions,
    ) -> Result<Rendered, SerializationError> {
        let mut writer = ::csv::WriterBuilder::new()
            .quote_style(::csv::QuoteStyle::Necessary)
            .terminator(::csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        writer.write_record(&data.headers)?;
        for row in &data.rows {
            writer.write_record(row.iter().map(Cell::display))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| SerializationError::Csv(e.to_string()))?;
        Ok(Rendered::clean(bytes))
    }
}
