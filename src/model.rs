//! Report definition and execution result types.
//!
//! Field names serialize in camelCase to match the UI contract. Definitions are
//! read-only inputs to the engine; the `with_*`/`without_*` helpers return new
//! definitions instead of editing in place.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cell::Cell;
use crate::error::DefinitionError;

pub const DEFAULT_LIMIT: usize = 1000;

// ============================================================================
// Fields and filters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Boolean,
    Currency,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Number | FieldType::Currency)
    }

    /// Types `between` is defined for.
    pub fn is_orderable(self) -> bool {
        matches!(self, FieldType::Number | FieldType::Currency | FieldType::Date)
    }
}

/// A typed column of a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Field {
    pub fn new(key: impl Into<String>, label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            field_type,
            format: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    Between,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

/// Shape of the value an operator expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    Scalar,
    List,
    None,
}

impl FilterOperator {
    pub fn value_shape(self) -> ValueShape {
        match self {
            FilterOperator::Between | FilterOperator::In | FilterOperator::NotIn => ValueShape::List,
            FilterOperator::IsNull | FilterOperator::IsNotNull => ValueShape::None,
            _ => ValueShape::Scalar,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub id: String,
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub label: String,
}

impl Filter {
    pub fn scalar(
        id: impl Into<String>,
        field: impl Into<String>,
        operator: FilterOperator,
        value: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            field: field.into(),
            operator,
            value: Some(value),
            values: None,
            label: String::new(),
        }
    }

    pub fn list(
        id: impl Into<String>,
        field: impl Into<String>,
        operator: FilterOperator,
        values: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            field: field.into(),
            operator,
            value: None,
            values: Some(values),
            label: String::new(),
        }
    }

    pub fn null_check(id: impl Into<String>, field: impl Into<String>, operator: FilterOperator) -> Self {
        Self {
            id: id.into(),
            field: field.into(),
            operator,
            value: None,
            values: None,
            label: String::new(),
        }
    }
}

// ============================================================================
// Grouping, aggregation, sorting
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateBucket {
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupBy {
    pub field: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format: Option<DateBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    Median,
    DistinctCount,
}

impl AggregateFunction {
    pub const ALL: [AggregateFunction; 7] = [
        AggregateFunction::Sum,
        AggregateFunction::Avg,
        AggregateFunction::Count,
        AggregateFunction::Min,
        AggregateFunction::Max,
        AggregateFunction::Median,
        AggregateFunction::DistinctCount,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Count => "count",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Median => "median",
            AggregateFunction::DistinctCount => "distinct_count",
        }
    }

    /// Functions that only make sense over number/currency fields.
    pub fn requires_numeric(self) -> bool {
        !matches!(self, AggregateFunction::Count | AggregateFunction::DistinctCount)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub field: String,
    pub function: AggregateFunction,
    #[serde(default)]
    pub label: String,
}

impl Aggregation {
    /// Column key of this aggregation in grouped output, e.g. `sum_amount`.
    pub fn column_key(&self) -> String {
        format!("{}_{}", self.function.as_str(), self.field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

// ============================================================================
// Charts
// ============================================================================

/// Chart kind. Unknown kinds are kept verbatim so projection can report them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChartType {
    Bar,
    Line,
    Area,
    Pie,
    Scatter,
    Other(String),
}

impl From<String> for ChartType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "bar" => ChartType::Bar,
            "line" => ChartType::Line,
            "area" => ChartType::Area,
            "pie" => ChartType::Pie,
            "scatter" => ChartType::Scatter,
            _ => ChartType::Other(s),
        }
    }
}

impl From<ChartType> for String {
    fn from(t: ChartType) -> Self {
        t.as_str().to_string()
    }
}

impl ChartType {
    pub fn as_str(&self) -> &str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Area => "area",
            ChartType::Pie => "pie",
            ChartType::Scatter => "scatter",
            ChartType::Other(s) => s,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_chart_height() -> u32 {
    300
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    #[serde(default)]
    pub title: String,
    pub x_axis: String,
    #[serde(default)]
    pub y_axis: Vec<String>,
    #[serde(default = "default_true")]
    pub show_legend: bool,
    #[serde(default = "default_true")]
    pub show_grid: bool,
    #[serde(default = "default_true")]
    pub show_tooltip: bool,
    #[serde(default = "default_chart_height")]
    pub height: u32,
}

// ============================================================================
// Definition
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    #[default]
    Table,
    Chart,
    Summary,
    Dashboard,
}

impl ReportType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportType::Table => "table",
            ReportType::Chart => "chart",
            ReportType::Summary => "summary",
            ReportType::Dashboard => "dashboard",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateRangePreset {
    Today,
    Yesterday,
    Last7Days,
    Last30Days,
    ThisMonth,
    LastMonth,
    ThisQuarter,
    ThisYear,
    Custom,
}

/// Default window applied to a date field before user filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub field: String,
    pub preset: DateRangePreset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

impl DateRange {
    /// Resolve to inclusive `[start, end]` calendar days relative to `today`.
    pub fn resolve(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), DefinitionError> {
        let range = match self.preset {
            DateRangePreset::Today => (today, today),
            DateRangePreset::Yesterday => {
                let y = today - Duration::days(1);
                (y, y)
            }
            DateRangePreset::Last7Days => (today - Duration::days(6), today),
            DateRangePreset::Last30Days => (today - Duration::days(29), today),
            DateRangePreset::ThisMonth => month_bounds(today.year(), today.month()),
            DateRangePreset::LastMonth => {
                let (y, m) = if today.month() == 1 {
                    (today.year() - 1, 12)
                } else {
                    (today.year(), today.month() - 1)
                };
                month_bounds(y, m)
            }
            DateRangePreset::ThisQuarter => {
                let first_month = (today.month0() / 3) * 3 + 1;
                let (start, _) = month_bounds(today.year(), first_month);
                let (_, end) = month_bounds(today.year(), first_month + 2);
                (start, end)
            }
            DateRangePreset::ThisYear => month_bounds_span(today.year(), 1, 12),
            DateRangePreset::Custom => {
                let parse = |raw: &Option<String>, which: &str| {
                    raw.as_deref()
                        .and_then(|s| NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d").ok())
                        .ok_or_else(|| {
                            DefinitionError::InvalidDateRange(format!("custom range needs a valid {which} date"))
                        })
                };
                (parse(&self.start, "start")?, parse(&self.end, "end")?)
            }
        };

        if range.0 > range.1 {
            return Err(DefinitionError::InvalidDateRange(format!(
                "start {} is after end {}",
                range.0, range.1
            )));
        }
        Ok(range)
    }

    /// Express the resolved window as an inclusive `between` filter.
    pub fn to_filter(&self, today: NaiveDate) -> Result<Filter, DefinitionError> {
        let (start, end) = self.resolve(today)?;
        let mut filter = Filter::list(
            "default_date_range",
            self.field.clone(),
            FilterOperator::Between,
            vec![
                serde_json::Value::String(start.format("%Y-%m-%d").to_string()),
                serde_json::Value::String(end.format("%Y-%m-%d").to_string()),
            ],
        );
        filter.label = "Rango de fechas".to_string();
        Ok(filter)
    }
}

fn month_bounds(year: i32, month: u32) -> (NaiveDate, NaiveDate) {
    month_bounds_span(year, month, month)
}

fn month_bounds_span(year: i32, first: u32, last: u32) -> (NaiveDate, NaiveDate) {
    let start = NaiveDate::from_ymd_opt(year, first, 1).unwrap_or(NaiveDate::MIN);
    let end = crate::schedule::last_day_of_month(year, last);
    (start, end)
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

/// The user-authored configuration of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub report_type: ReportType,
    pub data_source: String,
    /// Selected column keys; empty means every field of the data source.
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub group_by: Vec<GroupBy>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub sorting: Vec<SortSpec>,
    #[serde(default)]
    pub charts: Vec<ChartConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_date_range: Option<DateRange>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl ReportDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, data_source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            report_type: ReportType::Table,
            data_source: data_source.into(),
            fields: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            aggregations: Vec::new(),
            sorting: Vec::new(),
            charts: Vec::new(),
            default_date_range: None,
            limit: DEFAULT_LIMIT,
        }
    }

    /// SHA-256 of the serialized definition, hex encoded.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }

    pub fn with_filter(&self, filter: Filter) -> Self {
        let mut next = self.clone();
        next.filters.push(filter);
        next
    }

    pub fn without_filter(&self, id: &str) -> Self {
        let mut next = self.clone();
        next.filters.retain(|f| f.id != id);
        next
    }

    pub fn with_group_by(&self, group: GroupBy) -> Self {
        let mut next = self.clone();
        next.group_by.push(group);
        next
    }

    pub fn with_aggregation(&self, aggregation: Aggregation) -> Self {
        let mut next = self.clone();
        next.aggregations.push(aggregation);
        next
    }

    pub fn with_sort(&self, sort: SortSpec) -> Self {
        let mut next = self.clone();
        next.sorting.push(sort);
        next
    }

    pub fn with_chart(&self, chart: ChartConfig) -> Self {
        let mut next = self.clone();
        next.charts.push(chart);
        next
    }

    pub fn without_chart(&self, index: usize) -> Self {
        let mut next = self.clone();
        if index < next.charts.len() {
            next.charts.remove(index);
        }
        next
    }

    pub fn with_limit(&self, limit: usize) -> Self {
        let mut next = self.clone();
        next.limit = limit;
        next
    }
}

// ============================================================================
// Execution result
// ============================================================================

/// A grand total computed over the whole filtered set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateValue {
    pub key: String,
    pub label: String,
    pub field: String,
    pub function: AggregateFunction,
    pub value: Cell,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub definition_id: String,
    pub data_source: String,
    /// Milliseconds spent fetching and transforming.
    pub execution_time: u64,
    pub generated_at: DateTime<Utc>,
    /// Every filter that was applied, including the resolved date range.
    pub filters: Vec<Filter>,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
    /// SHA-256 of the definition the result was produced from.
    pub definition_hash: String,
}

/// Result of one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportData {
    pub headers: Vec<String>,
    /// Column keys aligned with `headers`.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    /// Row count before limit and pagination.
    pub total_rows: usize,
    pub aggregates: Vec<AggregateValue>,
    pub metadata: ReportMetadata,
}

impl ReportData {
    pub fn column_index(&self, key: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_deserializes_with_defaults() {
        let json = serde_json::json!({
            "id": "r1",
            "name": "Viajes",
            "dataSource": "trips",
            "filters": [{"id": "f1", "field": "status", "operator": "equals", "value": "done"}],
            "groupBy": [{"field": "date", "label": "Mes", "dateFormat": "month"}],
            "charts": [{"type": "radar", "title": "X", "xAxis": "date", "yAxis": ["amount"]}]
        });
        let def: ReportDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(def.limit, DEFAULT_LIMIT);
        assert_eq!(def.group_by[0].date_format, Some(DateBucket::Month));
        assert_eq!(def.charts[0].chart_type, ChartType::Other("radar".to_string()));
        assert_eq!(def.charts[0].height, 300);
    }

    #[test]
    fn test_edit_helpers_do_not_mutate_original() {
        let def = ReportDefinition::new("r1", "Viajes", "trips");
        let edited = def.with_filter(Filter::null_check("f1", "driver", FilterOperator::IsNull));
        assert!(def.filters.is_empty());
        assert_eq!(edited.filters.len(), 1);
        assert!(edited.without_filter("f1").filters.is_empty());
    }

    #[test]
    fn test_without_chart_removes_only_that_index() {
        let chart = |title: &str| -> ChartConfig {
            serde_json::from_value(serde_json::json!({
                "type": "bar", "title": title, "xAxis": "driver", "yAxis": ["amount"]
            }))
            .unwrap()
        };
        let def = ReportDefinition::new("r1", "Viajes", "trips")
            .with_chart(chart("a"))
            .with_chart(chart("b"))
            .with_chart(chart("c"));

        let edited = def.without_chart(1);
        let titles: Vec<&str> = edited.charts.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "c"]);
        assert_eq!(def.charts.len(), 3);
        assert_eq!(def.without_chart(7), def);
    }

    #[test]
    fn test_date_range_presets() {
        let today = NaiveDate::from_ymd_opt(2024, 2, 14).unwrap();
        let range = |preset| DateRange { field: "date".into(), preset, start: None, end: None };

        assert_eq!(
            range(DateRangePreset::ThisMonth).resolve(today).unwrap(),
            (NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(
            range(DateRangePreset::LastMonth).resolve(today).unwrap().0,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert_eq!(
            range(DateRangePreset::ThisQuarter).resolve(today).unwrap().1,
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()
        );
        assert_eq!(
            range(DateRangePreset::Last7Days).resolve(today).unwrap().0,
            NaiveDate::from_ymd_opt(2024, 2, 8).unwrap()
        );
        assert!(range(DateRangePreset::Custom).resolve(today).is_err());
    }
}
