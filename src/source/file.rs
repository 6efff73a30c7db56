//! Data-file row source for JSON, CSV and Excel (.xlsx/.xlsm) files.
//!
//! A data source `trips` is served from the first of `trips.json`,
//! `trips.csv`, `trips.xlsx` or `trips.xlsm` found in the data directory.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use chrono::{Duration, NaiveDate, NaiveTime};

use super::{RawRow, RowSource, SourceQuery};

const EXTENSIONS: [&str; 4] = ["json", "csv", "xlsx", "xlsm"];

pub struct FileSource {
    dir: PathBuf,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn locate(&self, key: &str) -> Option<PathBuf> {
        EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", key, ext)))
            .find(|p| p.exists())
    }
}

#[async_trait::async_trait]
impl RowSource for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch_rows(&self, query: &SourceQuery) -> Result<Vec<RawRow>> {
        let path = self.locate(&query.data_source).with_context(|| {
            format!(
                "No data file for '{}' in {:?} (looked for .{})",
                query.data_source,
                self.dir,
                EXTENSIONS.join(", .")
            )
        })?;
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read data file: {:?}", path))?;

        let rows = parse_file(&path, &data)?;
        tracing::debug!("FileSource: {} rows from {:?}", rows.len(), path);
        Ok(rows)
    }
}

/// Dispatch file parsing by extension.
pub fn parse_file(path: &Path, data: &[u8]) -> Result<Vec<RawRow>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "json" => parse_json(data),
        "csv" => parse_csv(data),
        "xlsx" | "xlsm" => parse_excel_xlsx(data),
        _ => anyhow::bail!(
            "Unsupported data file type: .{}. Supported: .{}",
            ext,
            EXTENSIONS.join(", .")
        ),
    }
}

/// A JSON array of objects.
fn parse_json(data: &[u8]) -> Result<Vec<RawRow>> {
    let rows: Vec<serde_json::Value> = serde_json::from_slice(data).context("Data file is not a JSON array")?;
    rows.into_iter()
        .enumerate()
        .map(|(i, v)| match v {
            serde_json::Value::Object(obj) => Ok(obj),
            other => anyhow::bail!("Row {} is not an object: {}", i, other),
        })
        .collect()
}

/// CSV with a header row. Cells stay strings; typing happens against the field list.
fn parse_csv(data: &[u8]) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(data);

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.is_empty() {
        anyhow::bail!("CSV file has no headers");
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.context("Failed to read CSV record")?;
        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .filter(|(_, value)| !value.is_empty())
            .map(|(h, value)| (h.clone(), serde_json::Value::String(value.to_string())))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// First worksheet of an xlsx/xlsm workbook; first row is the header.
fn parse_excel_xlsx(data: &[u8]) -> Result<Vec<RawRow>> {
    let cursor = Cursor::new(data);
    let mut workbook: Xlsx<_> = open_workbook_from_rs(cursor).context("Failed to open Excel workbook")?;

    let first = workbook
        .sheet_names()
        .first()
        .cloned()
        .context("Workbook has no sheets")?;
    let range = workbook
        .worksheet_range(&first)
        .with_context(|| format!("Failed to read sheet '{}'", first))?;

    let mut row_iter = range.rows();
    let headers: Vec<String> = match row_iter.next() {
        Some(header_row) => header_row.iter().map(header_text).collect(),
        None => return Ok(Vec::new()),
    };

    let mut rows = Vec::new();
    for row in row_iter {
        let obj: RawRow = headers
            .iter()
            .zip(row.iter())
            .filter(|(h, c)| !h.is_empty() && !matches!(c, Data::Empty))
            .map(|(h, c)| (h.clone(), cell_to_json(c)))
            .collect();
        // Skip completely empty rows
        if !obj.is_empty() {
            rows.push(obj);
        }
    }
    Ok(rows)
}

fn header_text(cell: &Data) -> String {
    match cell_to_json(cell) {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Convert a calamine cell to a primitive JSON value.
fn cell_to_json(cell: &Data) -> serde_json::Value {
    match cell {
        Data::Empty => serde_json::Value::Null,
        Data::String(s) => serde_json::Value::String(s.clone()),
        Data::Int(i) => serde_json::Value::from(*i),
        Data::Float(f) => serde_json::Value::from(*f),
        Data::Bool(b) => serde_json::Value::Bool(*b),
        Data::DateTime(dt) => serde_json::Value::String(excel_serial_to_string(dt.as_f64())),
        Data::DateTimeIso(s) => serde_json::Value::String(s.clone()),
        Data::DurationIso(s) => serde_json::Value::String(s.clone()),
        Data::Error(e) => serde_json::Value::String(format!("#ERR:{:?}", e)),
    }
}

/// Convert an Excel serial date number to `YYYY-MM-DD[ HH:MM:SS]`.
/// Serial 0 is 1899-12-30 once the fictitious 1900-02-29 is accounted for.
fn excel_serial_to_string(serial: f64) -> String {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or(NaiveDate::MIN);
    let days = serial.trunc() as i64;
    let days = if days < 60 { days + 1 } else { days };
    let secs = (serial.fract() * 86_400.0).round() as i64;
    let dt = epoch.and_time(NaiveTime::MIN) + Duration::days(days) + Duration::seconds(secs);

    if secs == 0 {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
