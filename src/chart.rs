//! Chart projection: result rows → chart-ready records.
//!
//! Works on the rows the table shows (already limited). Records are keyed by
//! column label so renderers can use them directly.

use serde::Serialize;
use thiserror::Error;

use crate::model::{AggregateFunction, ChartConfig, ChartType, ReportData};

/// Pie charts keep only this many leading records.
pub const PIE_RECORD_CAP: usize = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChartError {
    #[error("unsupported chart type '{0}'")]
    UnsupportedType(String),

    #[error("chart axis '{0}' is not a column of the result")]
    UnknownColumn(String),

    #[error("chart has no y axis")]
    NoSeries,
}

/// Records omitted by a capped projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Truncation {
    pub shown: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSeries {
    pub chart_type: String,
    pub title: String,
    /// Label of the x axis (the pie's name key).
    pub x_key: String,
    /// Labels of the y series.
    pub y_keys: Vec<String>,
    pub records: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncation: Option<Truncation>,
}

impl ChartSeries {
    /// Numeric y values of one series, in record order. Missing values are `None`.
    pub fn series_values(&self, y_key: &str) -> Vec<Option<f64>> {
        self.records
            .iter()
            .map(|r| r.get(y_key).and_then(|v| v.as_f64()))
            .collect()
    }

    /// x values rendered as text, in record order.
    pub fn categories(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|r| match r.get(&self.x_key) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect()
    }
}

/// Axis lookup: column key, then header label, then the aggregated column of
/// a source field (`amt` → `sum_amt`). Only `<function>_<field>` keys match,
/// so `date` never binds to an unrelated `update_date` column.
fn resolve_column(data: &ReportData, key: &str) -> Result<usize, ChartError> {
    data.column_index(key)
        .or_else(|| data.headers.iter().position(|h| h == key))
        .or_else(|| {
            AggregateFunction::ALL
                .iter()
                .find_map(|f| data.column_index(&format!("{}_{}", f.as_str(), key)))
        })
        .ok_or_else(|| ChartError::UnknownColumn(key.to_string()))
}

/// Project result rows for one chart.
pub fn project(data: &ReportData, chart: &ChartConfig) -> Result<ChartSeries, ChartError> {
    if let ChartType::Other(kind) = &chart.chart_type {
        return Err(ChartError::UnsupportedType(kind.clone()));
    }
    if chart.y_axis.is_empty() {
        return Err(ChartError::NoSeries);
    }

    let x_idx = resolve_column(data, &chart.x_axis)?;
    let y_idx = chart
        .y_axis
        .iter()
        .map(|k| resolve_column(data, k))
        .collect::<Result<Vec<_>, _>>()?;

    let x_key = data.headers[x_idx].clone();
    let y_keys: Vec<String> = y_idx.iter().map(|&i| data.headers[i].clone()).collect();

    let total = data.rows.len();
    let take = match chart.chart_type {
        ChartType::Pie => total.min(PIE_RECORD_CAP),
        _ => total,
    };

    let records = data.rows[..take]
        .iter()
        .map(|row| {
            let mut record = serde_json::Map::new();
            record.insert(x_key.clone(), row[x_idx].to_json());
            for (key, &idx) in y_keys.iter().zip(&y_idx) {
                let magnitude = row[idx]
                    .as_number()
                    .and_then(serde_json::Number::from_f64)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null);
                record.insert(key.clone(), magnitude);
            }
            record
        })
        .collect();

    let truncation = (take < total).then_some(Truncation { shown: take, total });
    if truncation.is_some() {
        tracing::debug!("Pie chart '{}' capped to {} of {} records", chart.title, take, total);
    }

    Ok(ChartSeries {
        chart_type: chart.chart_type.as_str().to_string(),
        title: chart.title.clone(),
        x_key,
        y_keys,
        records,
        truncation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::model::ReportMetadata;

    fn data(n: usize) -> ReportData {
        ReportData {
            headers: vec!["Conductor".into(), "Total".into()],
            columns: vec!["driver".into(), "sum_amt".into()],
            rows: (0..n)
                .map(|i| vec![Cell::Text(format!("d{}", i)), Cell::Text(format!("{}", i * 10))])
                .collect(),
            total_rows: n,
            aggregates: vec![],
            metadata: ReportMetadata {
                definition_id: "r".into(),
                data_source: "trips".into(),
                execution_time: 0,
                generated_at: chrono::Utc::now(),
                filters: vec![],
                truncated: false,
                page: None,
                page_size: None,
                definition_hash: String::new(),
            },
        }
    }

    fn chart(kind: &str) -> ChartConfig {
        serde_json::from_value(serde_json::json!({
            "type": kind, "title": "T", "xAxis": "driver", "yAxis": ["sum_amt"]
        }))
        .unwrap()
    }

    #[test]
    fn test_bar_coerces_y_to_numbers() {
        let series = project(&data(3), &chart("bar")).unwrap();
        assert_eq!(series.records.len(), 3);
        assert_eq!(series.records[2]["Total"], serde_json::json!(20.0));
        assert_eq!(series.records[2]["Conductor"], serde_json::json!("d2"));
        assert!(series.truncation.is_none());
    }

    #[test]
    fn test_pie_is_capped_and_reports_it() {
        let series = project(&data(14), &chart("pie")).unwrap();
        assert_eq!(series.records.len(), PIE_RECORD_CAP);
        assert_eq!(series.truncation, Some(Truncation { shown: 10, total: 14 }));
    }

    #[test]
    fn test_unknown_type_is_typed_result() {
        assert_eq!(
            project(&data(3), &chart("radar")),
            Err(ChartError::UnsupportedType("radar".into()))
        );
    }

    #[test]
    fn test_axis_resolves_aggregated_field() {
        let mut c = chart("bar");
        c.y_axis = vec!["amt".into()];
        let series = project(&data(2), &c).unwrap();
        assert_eq!(series.y_keys, vec!["Total"]);
    }

    #[test]
    fn test_axis_does_not_bind_unrelated_suffix() {
        let mut report = data(2);
        report.headers = vec!["Actualizado".into(), "Total".into()];
        report.columns = vec!["update_date".into(), "sum_amt".into()];
        let mut c = chart("bar");
        c.x_axis = "date".into();
        assert_eq!(project(&report, &c), Err(ChartError::UnknownColumn("date".into())));

        report.columns[0] = "max_date".into();
        assert_eq!(project(&report, &c).unwrap().x_key, "Actualizado");
    }

    #[test]
    fn test_unknown_axis() {
        let mut c = chart("line");
        c.x_axis = "ghost".into();
        assert_eq!(project(&data(1), &c), Err(ChartError::UnknownColumn("ghost".into())));
    }
}
