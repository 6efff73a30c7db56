//! Spreadsheet serializer (rust_xlsxwriter).
//!
//! Sheets: "Data" always, "Información" when metadata is requested and
//! "Gráficos" when charts are requested and the definition has any.

use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};

use super::{metadata_entries, ExportFormat, ExportOptions, ExportSerializer, Rendered};
use crate::cell::Cell;
use crate::error::SerializationError;
use crate::model::{ReportData, ReportDefinition};

/// Rows sampled when sizing columns.
const WIDTH_SAMPLE_ROWS: usize = 100;
const MAX_COLUMN_WIDTH: usize = 50;

pub struct XlsxSerializer;

impl ExportSerializer for XlsxSerializer {
    fn format(&self) -> ExportFormat {
        ExportFormat::Excel
    }

    fn serialize(
        &self,
        data: &ReportData,
        definition: &ReportDefinition,
        options: &ExportOptions,
    ) -> Result<Rendered, SerializationError> {
        let bold = Format::new().set_bold();
        let mut workbook = Workbook::new();

        write_data_sheet(workbook.add_worksheet(), data, &bold)?;

        if options.include_metadata {
            let sheet = workbook.add_worksheet();
            sheet.set_name("Información")?;
            let mut row = 0u32;
            for (key, value) in metadata_entries(data, definition, options) {
                sheet.write_string_with_format(row, 0, key, &bold)?;
                sheet.write_string(row, 1, value)?;
                row += 1;
            }
            if !data.aggregates.is_empty() {
                row += 1;
                sheet.write_string_with_format(row, 0, "Totales", &bold)?;
                row += 1;
                for aggregate in &data.aggregates {
                    sheet.write_string(row, 0, &aggregate.label)?;
                    write_cell(sheet, row, 1, &aggregate.value)?;
                    row += 1;
                }
            }
            sheet.set_column_width(0, 22)?;
            sheet.set_column_width(1, 40)?;
        }

        if options.include_charts && !definition.charts.is_empty() {
            let sheet = workbook.add_worksheet();
            sheet.set_name("Gráficos")?;
            for (col, title) in ["Título", "Tipo", "Eje X", "Eje Y", "Altura"].iter().enumerate() {
                sheet.write_string_with_format(0, col as u16, *title, &bold)?;
            }
            for (i, chart) in definition.charts.iter().enumerate() {
                let row = i as u32 + 1;
                sheet.write_string(row, 0, &chart.title)?;
                sheet.write_string(row, 1, chart.chart_type.as_str())?;
                sheet.write_string(row, 2, &chart.x_axis)?;
                sheet.write_string(row, 3, chart.y_axis.join(", "))?;
                sheet.write_number(row, 4, f64::from(chart.height))?;
            }
        }

        let bytes = workbook.save_to_buffer()?;
        Ok(Rendered::clean(bytes))
    }
}

fn write_data_sheet(sheet: &mut Worksheet, data: &ReportData, bold: &Format) -> Result<(), XlsxError> {
    sheet.set_name("Data")?;

    for (col, header) in data.headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, header, bold)?;
    }
    for (i, row) in data.rows.iter().enumerate() {
        for (col, cell) in row.iter().enumerate() {
            write_cell(sheet, i as u32 + 1, col as u16, cell)?;
        }
    }

    for (col, width) in column_widths(data).into_iter().enumerate() {
        sheet.set_column_width(col as u16, width as f64)?;
    }
    Ok(())
}

fn write_cell(sheet: &mut Worksheet, row: u32, col: u16, cell: &Cell) -> Result<(), XlsxError> {
    match cell {
        Cell::Num(n) if n.is_finite() => {
            sheet.write_number(row, col, *n)?;
        }
        Cell::Bool(b) => {
            sheet.write_boolean(row, col, *b)?;
        }
        Cell::Null => {}
        other => {
            sheet.write_string(row, col, other.display())?;
        }
    }
    Ok(())
}

/// Longer of header or sampled cell text per column, capped.
pub fn column_widths(data: &ReportData) -> Vec<usize> {
    data.headers
        .iter()
        .enumerate()
        .map(|(col, header)| {
            let longest_cell = data
                .rows
                .iter()
                .take(WIDTH_SAMPLE_ROWS)
                .filter_map(|row| row.get(col))
                .map(|cell| cell.display().chars().count())
                .max()
                .unwrap_or(0);
            header.chars().count().max(longest_cell).min(MAX_COLUMN_WIDTH)
        })
        .collect()
}
