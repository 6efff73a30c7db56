//! Query transform stage: filter → group → aggregate → sort → limit.
//!
//! Pure and synchronous. The engine fetches rows and hands them here; nothing in
//! this module performs I/O or keeps state between executions.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cell::{compare_cells, Cell};
use crate::error::DefinitionError;
use crate::model::{
    AggregateFunction, AggregateValue, Aggregation, DateBucket, Field, FieldType, Filter,
    FilterOperator, ReportData, ReportDefinition, ReportMetadata, SortDirection,
};
use crate::source::Row;
use crate::validation::{find_field, is_date_only, validate_definition, validate_filter};

/// Per-execution knobs that are not part of the stored definition.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    /// Runtime filters appended to the definition's own.
    #[serde(default)]
    pub extra_filters: Vec<Filter>,
    /// 1-based page number, applied after `limit`.
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
    /// Reference time for date-range presets; defaults to the current time.
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

/// Run a definition over typed rows and build the result table.
pub fn execute(
    rows: Vec<Row>,
    definition: &ReportDefinition,
    fields: &[Field],
    options: &ExecutionOptions,
) -> Result<ReportData, DefinitionError> {
    let started = Instant::now();
    let now = options.now.unwrap_or_else(Utc::now);

    validate_definition(definition, fields)?;
    for filter in &options.extra_filters {
        validate_filter(filter, fields)?;
    }

    let mut applied = Vec::new();
    if let Some(range) = &definition.default_date_range {
        applied.push(range.to_filter(now.date_naive())?);
    }
    applied.extend(definition.filters.iter().cloned());
    applied.extend(options.extra_filters.iter().cloned());

    let input_rows = rows.len();
    let filtered = apply_filters(rows, &applied, fields)?;
    debug!(
        "Report '{}': {} of {} rows passed {} filters",
        definition.id,
        filtered.len(),
        input_rows,
        applied.len()
    );

    let aggregates = definition
        .aggregations
        .iter()
        .map(|a| {
            let refs: Vec<&Row> = filtered.iter().collect();
            AggregateValue {
                key: a.column_key(),
                label: aggregation_label(a, fields),
                field: a.field.clone(),
                function: a.function,
                value: aggregate(a.function, &a.field, &refs),
            }
        })
        .collect();

    let table = if definition.group_by.is_empty() {
        detail_table(filtered, definition, fields)
    } else {
        grouped_table(&filtered, definition, fields)?
    };

    let total_rows = table.rows.len();
    let mut out_rows = table.rows;
    let truncated = out_rows.len() > definition.limit;
    out_rows.truncate(definition.limit);

    let (page, page_size) = match (options.page, options.page_size) {
        (Some(page), Some(size)) if page >= 1 && size >= 1 => {
            out_rows = out_rows.into_iter().skip((page - 1).saturating_mul(size)).take(size).collect();
            (Some(page), Some(size))
        }
        _ => (None, None),
    };

    Ok(ReportData {
        headers: table.headers,
        columns: table.columns,
        rows: out_rows,
        total_rows,
        aggregates,
        metadata: ReportMetadata {
            definition_id: definition.id.clone(),
            data_source: definition.data_source.clone(),
            execution_time: started.elapsed().as_millis() as u64,
            generated_at: now,
            filters: applied,
            truncated,
            page,
            page_size,
            definition_hash: definition.fingerprint(),
        },
    })
}

struct Table {
    headers: Vec<String>,
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

// ============================================================================
// Filter
// ============================================================================

/// A filter resolved against its field, with bounds already converted to cells.
struct Predicate {
    field: String,
    field_type: FieldType,
    operator: FilterOperator,
    value: Cell,
    values: Vec<Cell>,
    needle: String,
}

impl Predicate {
    fn compile(filter: &Filter, fields: &[Field]) -> Result<Self, DefinitionError> {
        let field = find_field(fields, &filter.field).ok_or_else(|| DefinitionError::UnknownField {
            context: format!("filter '{}'", filter.id),
            field: filter.field.clone(),
        })?;
        let to_cell = |v: &serde_json::Value| Cell::from_json_typed(v, field.field_type);

        let value = filter.value.as_ref().map(to_cell).unwrap_or(Cell::Null);
        let mut values: Vec<Cell> = filter
            .values
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(to_cell)
            .collect();

        // A date-only upper bound covers the whole day.
        if filter.operator == FilterOperator::Between && field.field_type == FieldType::Date {
            let upper_is_day = filter
                .values
                .as_ref()
                .and_then(|v| v.get(1))
                .map(is_date_only)
                .unwrap_or(false);
            if let (true, Some(Cell::Date(d))) = (upper_is_day, values.get(1).cloned()) {
                let end_of_day = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or(NaiveTime::MIN);
                values[1] = Cell::Date(d.date().and_time(end_of_day));
            }
        }

        let needle = value.display().to_lowercase();
        Ok(Self {
            field: field.key.clone(),
            field_type: field.field_type,
            operator: filter.operator,
            value,
            values,
            needle,
        })
    }

    fn matches(&self, row: &Row) -> bool {
        let cell = row.get(&self.field).unwrap_or(&Cell::Null);
        match self.operator {
            FilterOperator::IsNull => cell.is_empty_value(),
            FilterOperator::IsNotNull => !cell.is_empty_value(),
            FilterOperator::Equals => cells_equal(cell, &self.value, self.field_type),
            FilterOperator::NotEquals => !cells_equal(cell, &self.value, self.field_type),
            FilterOperator::Contains => cell.display().to_lowercase().contains(&self.needle),
            FilterOperator::NotContains => !cell.display().to_lowercase().contains(&self.needle),
            FilterOperator::StartsWith => cell.display().to_lowercase().starts_with(&self.needle),
            FilterOperator::EndsWith => cell.display().to_lowercase().ends_with(&self.needle),
            FilterOperator::GreaterThan => {
                compare_ordered(cell, &self.value, self.field_type) == Some(Ordering::Greater)
            }
            FilterOperator::LessThan => {
                compare_ordered(cell, &self.value, self.field_type) == Some(Ordering::Less)
            }
            FilterOperator::Between => match (self.values.first(), self.values.get(1)) {
                (Some(lo), Some(hi)) => {
                    matches!(
                        compare_ordered(cell, lo, self.field_type),
                        Some(Ordering::Greater | Ordering::Equal)
                    ) && matches!(
                        compare_ordered(cell, hi, self.field_type),
                        Some(Ordering::Less | Ordering::Equal)
                    )
                }
                _ => false,
            },
            FilterOperator::In => self.values.iter().any(|v| cells_equal(cell, v, self.field_type)),
            FilterOperator::NotIn => !self.values.iter().any(|v| cells_equal(cell, v, self.field_type)),
        }
    }
}

/// Keep rows for which every filter holds. Idempotent.
pub fn apply_filters(rows: Vec<Row>, filters: &[Filter], fields: &[Field]) -> Result<Vec<Row>, DefinitionError> {
    let predicates = filters
        .iter()
        .map(|f| Predicate::compile(f, fields))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter(|row| predicates.iter().all(|p| p.matches(row)))
        .collect())
}

fn as_bool(cell: &Cell) -> Option<bool> {
    match cell {
        Cell::Bool(b) => Some(*b),
        Cell::Text(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Cell::Num(n) => Some(*n != 0.0),
        _ => None,
    }
}

fn cells_equal(cell: &Cell, target: &Cell, field_type: FieldType) -> bool {
    if cell.is_empty_value() || target.is_empty_value() {
        return cell.is_empty_value() && target.is_empty_value();
    }
    let typed = match field_type {
        FieldType::Number | FieldType::Currency => cell.as_number().zip(target.as_number()).map(|(a, b)| a == b),
        FieldType::Date => cell.as_date().zip(target.as_date()).map(|(a, b)| a == b),
        FieldType::Boolean => as_bool(cell).zip(as_bool(target)).map(|(a, b)| a == b),
        FieldType::Text => None,
    };
    typed.unwrap_or_else(|| cell.display() == target.display())
}

/// Ordered comparison used by `greater_than`, `less_than` and `between`.
/// `None` when either side cannot be coerced, which excludes the row.
fn compare_ordered(cell: &Cell, bound: &Cell, field_type: FieldType) -> Option<Ordering> {
    if field_type == FieldType::Date {
        let (a, b) = (cell.as_date()?, bound.as_date()?);
        return Some(a.cmp(&b));
    }
    let (a, b) = (cell.as_number()?, bound.as_number()?);
    a.partial_cmp(&b)
}

// ============================================================================
// Group + aggregate
// ============================================================================

fn aggregation_label(aggregation: &Aggregation, fields: &[Field]) -> String {
    if !aggregation.label.is_empty() {
        return aggregation.label.clone();
    }
    let field_label = find_field(fields, &aggregation.field)
        .map(|f| f.label.as_str())
        .unwrap_or(&aggregation.field);
    format!("{} ({})", aggregation.function.as_str(), field_label)
}

/// Truncate a date to the start of its bucket and render the bucket label.
pub fn bucket_label(date: NaiveDateTime, bucket: DateBucket) -> String {
    match bucket {
        DateBucket::Day => date.format("%Y-%m-%d").to_string(),
        DateBucket::Week => {
            let week = date.date().iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
        DateBucket::Month => date.format("%Y-%m").to_string(),
        DateBucket::Year => date.format("%Y").to_string(),
    }
}

fn grouped_table(rows: &[Row], definition: &ReportDefinition, fields: &[Field]) -> Result<Table, DefinitionError> {
    struct GroupSpec<'a> {
        key: &'a str,
        bucket: Option<DateBucket>,
    }

    let mut specs = Vec::with_capacity(definition.group_by.len());
    let mut headers = Vec::new();
    let mut columns = Vec::new();
    for group in &definition.group_by {
        let field = find_field(fields, &group.field).ok_or_else(|| DefinitionError::UnknownField {
            context: format!("group '{}'", group.label),
            field: group.field.clone(),
        })?;
        let bucket = match (group.date_format, field.field_type) {
            (Some(b), FieldType::Date) => Some(b),
            (Some(b), other) => {
                warn!("Ignoring dateFormat {:?} on {:?} group field '{}'", b, other, field.key);
                None
            }
            (None, _) => None,
        };
        specs.push(GroupSpec { key: &field.key, bucket });
        headers.push(if group.label.is_empty() { field.label.clone() } else { group.label.clone() });
        columns.push(field.key.clone());
    }
    for aggregation in &definition.aggregations {
        headers.push(aggregation_label(aggregation, fields));
        columns.push(aggregation.column_key());
    }

    // Partitions keep first-appearance order.
    let mut index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut partitions: Vec<(Vec<Cell>, Vec<&Row>)> = Vec::new();
    for row in rows {
        let key_cells: Vec<Cell> = specs
            .iter()
            .map(|spec| {
                let cell = row.get(spec.key).cloned().unwrap_or(Cell::Null);
                match spec.bucket {
                    Some(bucket) => cell
                        .as_date()
                        .map(|d| Cell::Text(bucket_label(d, bucket)))
                        .unwrap_or(Cell::Null),
                    None => cell,
                }
            })
            .collect();
        let key: Vec<String> = key_cells.iter().map(|c| c.display()).collect();
        match index.get(&key) {
            Some(&i) => partitions[i].1.push(row),
            None => {
                index.insert(key, partitions.len());
                partitions.push((key_cells, vec![row]));
            }
        }
    }

    let mut out: Vec<Vec<Cell>> = partitions
        .into_iter()
        .map(|(mut cells, members)| {
            for aggregation in &definition.aggregations {
                cells.push(aggregate(aggregation.function, &aggregation.field, &members));
            }
            cells
        })
        .collect();

    let mut keys = Vec::new();
    for sort in &definition.sorting {
        let idx = columns
            .iter()
            .position(|c| *c == sort.field)
            .or_else(|| {
                definition
                    .aggregations
                    .iter()
                    .position(|a| a.field == sort.field)
                    .map(|i| definition.group_by.len() + i)
            })
            .ok_or_else(|| DefinitionError::SortNotInOutput(sort.field.clone()))?;
        keys.push((idx, sort.direction));
    }
    out.sort_by(|a, b| {
        keys.iter()
            .map(|(idx, dir)| compare_for_sort(&a[*idx], &b[*idx], *dir))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });

    Ok(Table { headers, columns, rows: out })
}

fn detail_table(mut rows: Vec<Row>, definition: &ReportDefinition, fields: &[Field]) -> Table {
    let selected: Vec<&Field> = if definition.fields.is_empty() {
        fields.iter().collect()
    } else {
        definition
            .fields
            .iter()
            .filter_map(|key| find_field(fields, key))
            .collect()
    };

    rows.sort_by(|a, b| {
        definition
            .sorting
            .iter()
            .map(|s| {
                let x = a.get(&s.field).unwrap_or(&Cell::Null);
                let y = b.get(&s.field).unwrap_or(&Cell::Null);
                compare_for_sort(x, y, s.direction)
            })
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });

    Table {
        headers: selected.iter().map(|f| f.label.clone()).collect(),
        columns: selected.iter().map(|f| f.key.clone()).collect(),
        rows: rows
            .into_iter()
            .map(|row| {
                selected
                    .iter()
                    .map(|f| row.get(&f.key).cloned().unwrap_or(Cell::Null))
                    .collect()
            })
            .collect(),
    }
}

/// Sort comparison: nulls last regardless of direction.
pub fn compare_for_sort(a: &Cell, b: &Cell, direction: SortDirection) -> Ordering {
    match (a.is_empty_value(), b.is_empty_value()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ord = compare_cells(a, b);
            match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        }
    }
}

/// Compute one aggregation over a partition.
///
/// `count` counts rows; `distinct_count` counts distinct non-empty values.
/// Numeric functions skip null and non-numeric cells; with nothing left,
/// `sum` is 0 and the others are null.
pub fn aggregate(function: AggregateFunction, field: &str, rows: &[&Row]) -> Cell {
    match function {
        AggregateFunction::Count => Cell::Num(rows.len() as f64),
        AggregateFunction::DistinctCount => {
            let distinct: HashSet<String> = rows
                .iter()
                .filter_map(|row| row.get(field))
                .filter(|c| !c.is_empty_value())
                .map(|c| c.display())
                .collect();
            Cell::Num(distinct.len() as f64)
        }
        AggregateFunction::Sum => Cell::Num(numeric_values(field, rows).iter().sum()),
        AggregateFunction::Avg => {
            let values = numeric_values(field, rows);
            if values.is_empty() {
                return Cell::Null;
            }
            Cell::Num(values.iter().sum::<f64>() / values.len() as f64)
        }
        AggregateFunction::Min => numeric_values(field, rows)
            .into_iter()
            .reduce(f64::min)
            .map(Cell::Num)
            .unwrap_or(Cell::Null),
        AggregateFunction::Max => numeric_values(field, rows)
            .into_iter()
            .reduce(f64::max)
            .map(Cell::Num)
            .unwrap_or(Cell::Null),
        AggregateFunction::Median => {
            let mut values = numeric_values(field, rows);
            if values.is_empty() {
                return Cell::Null;
            }
            values.sort_by(|a, b| a.total_cmp(b));
            let mid = values.len() / 2;
            if values.len() % 2 == 0 {
                Cell::Num((values[mid - 1] + values[mid]) / 2.0)
            } else {
                Cell::Num(values[mid])
            }
        }
    }
}

fn numeric_values(field: &str, rows: &[&Row]) -> Vec<f64> {
    rows.iter()
        .filter_map(|row| row.get(field))
        .filter_map(Cell::as_number)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupBy, SortSpec};
    use serde_json::json;

    fn fields() -> Vec<Field> {
        vec![
            Field::new("driver", "Conductor", FieldType::Text),
            Field::new("amt", "Monto", FieldType::Number),
            Field::new("date", "Fecha", FieldType::Date),
            Field::new("paid", "Pagado", FieldType::Boolean),
        ]
    }

    fn rows(values: serde_json::Value) -> Vec<Row> {
        let spec = crate::source::DataSourceSpec {
            key: "trips".into(),
            label: "Viajes".into(),
            fields: fields(),
        };
        let raw = values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect();
        spec.type_rows(raw)
    }

    fn sample() -> Vec<Row> {
        rows(json!([
            {"driver": "Ana", "amt": 10, "date": "2024-03-01", "paid": true},
            {"driver": "luis", "amt": 20, "date": "2024-03-15", "paid": false},
            {"driver": "Ana", "amt": 30, "date": "2024-04-02", "paid": true},
            {"driver": "", "amt": "n/a", "date": null},
        ]))
    }

    fn exec(def: &ReportDefinition, data: Vec<Row>) -> ReportData {
        execute(data, def, &fields(), &ExecutionOptions::default()).unwrap()
    }

    #[test]
    fn test_median_odd_and_even() {
        let data = rows(json!([{"amt": 10}, {"amt": 20}, {"amt": 30}]));
        let refs: Vec<&Row> = data.iter().collect();
        assert_eq!(aggregate(AggregateFunction::Median, "amt", &refs), Cell::Num(20.0));

        let data = rows(json!([{"amt": 10}, {"amt": 20}]));
        let refs: Vec<&Row> = data.iter().collect();
        assert_eq!(aggregate(AggregateFunction::Median, "amt", &refs), Cell::Num(15.0));
    }

    #[test]
    fn test_numeric_aggregates_skip_non_numeric() {
        let data = sample();
        let refs: Vec<&Row> = data.iter().collect();
        assert_eq!(aggregate(AggregateFunction::Sum, "amt", &refs), Cell::Num(60.0));
        assert_eq!(aggregate(AggregateFunction::Avg, "amt", &refs), Cell::Num(20.0));
        assert_eq!(aggregate(AggregateFunction::Count, "amt", &refs), Cell::Num(4.0));
        assert_eq!(aggregate(AggregateFunction::Min, "amt", &refs), Cell::Num(10.0));
        assert_eq!(aggregate(AggregateFunction::Max, "amt", &refs), Cell::Num(30.0));
    }

    #[test]
    fn test_distinct_count_excludes_nulls() {
        let data = sample();
        let refs: Vec<&Row> = data.iter().collect();
        assert_eq!(aggregate(AggregateFunction::DistinctCount, "driver", &refs), Cell::Num(2.0));
    }

    #[test]
    fn test_empty_partition_aggregates() {
        let refs: Vec<&Row> = Vec::new();
        assert_eq!(aggregate(AggregateFunction::Sum, "amt", &refs), Cell::Num(0.0));
        assert_eq!(aggregate(AggregateFunction::Avg, "amt", &refs), Cell::Null);
    }

    #[test]
    fn test_text_predicates_are_case_insensitive() {
        let f = vec![Filter::scalar("f", "driver", FilterOperator::Contains, json!("AN"))];
        let out = apply_filters(sample(), &f, &fields()).unwrap();
        assert_eq!(out.len(), 2);

        let f = vec![Filter::scalar("f", "driver", FilterOperator::StartsWith, json!("L"))];
        assert_eq!(apply_filters(sample(), &f, &fields()).unwrap().len(), 1);
    }

    #[test]
    fn test_numeric_comparison_excludes_uncoercible() {
        let f = vec![Filter::scalar("f", "amt", FilterOperator::LessThan, json!(100))];
        let out = apply_filters(sample(), &f, &fields()).unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_between_is_inclusive_and_date_only_bound_covers_day() {
        let data = rows(json!([
            {"date": "2024-03-01"},
            {"date": "2024-03-31 18:30:00"},
            {"date": "2024-04-01"},
        ]));
        let f = vec![Filter::list(
            "f",
            "date",
            FilterOperator::Between,
            vec![json!("2024-03-01"), json!("2024-03-31")],
        )];
        assert_eq!(apply_filters(data, &f, &fields()).unwrap().len(), 2);

        let f = vec![Filter::list("f", "amt", FilterOperator::Between, vec![json!(10), json!(20)])];
        assert_eq!(apply_filters(sample(), &f, &fields()).unwrap().len(), 2);
    }

    #[test]
    fn test_null_checks_treat_empty_text_as_null() {
        let f = vec![Filter::null_check("f", "driver", FilterOperator::IsNull)];
        assert_eq!(apply_filters(sample(), &f, &fields()).unwrap().len(), 1);
        let f = vec![Filter::null_check("f", "driver", FilterOperator::IsNotNull)];
        assert_eq!(apply_filters(sample(), &f, &fields()).unwrap().len(), 3);
    }

    #[test]
    fn test_in_and_boolean_equals() {
        let f = vec![Filter::list("f", "amt", FilterOperator::In, vec![json!("10"), json!(30)])];
        assert_eq!(apply_filters(sample(), &f, &fields()).unwrap().len(), 2);

        let f = vec![Filter::scalar("f", "paid", FilterOperator::Equals, json!(true))];
        assert_eq!(apply_filters(sample(), &f, &fields()).unwrap().len(), 2);
    }

    #[test]
    fn test_negated_operators_keep_empty_cells() {
        let f = vec![Filter::scalar("f", "driver", FilterOperator::NotEquals, json!("Ana"))];
        let out = apply_filters(sample(), &f, &fields()).unwrap();
        let names: Vec<String> = out.iter().map(|r| r["driver"].display()).collect();
        assert_eq!(names, vec!["luis", ""]);

        let f = vec![Filter::scalar("f", "amt", FilterOperator::NotEquals, json!(10))];
        assert_eq!(apply_filters(sample(), &f, &fields()).unwrap().len(), 3);

        let f = vec![Filter::list("f", "driver", FilterOperator::NotIn, vec![json!("Ana")])];
        assert_eq!(apply_filters(sample(), &f, &fields()).unwrap().len(), 2);

        // The last sample row has no `paid` value, so it is not in [true].
        let f = vec![Filter::list("f", "paid", FilterOperator::NotIn, vec![json!(true)])];
        let out = apply_filters(sample(), &f, &fields()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1]["paid"], Cell::Null);
    }

    #[test]
    fn test_ends_with_is_case_insensitive() {
        let f = vec![Filter::scalar("f", "driver", FilterOperator::EndsWith, json!("A"))];
        assert_eq!(apply_filters(sample(), &f, &fields()).unwrap().len(), 2);

        let f = vec![Filter::scalar("f", "driver", FilterOperator::EndsWith, json!("IS"))];
        let out = apply_filters(sample(), &f, &fields()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["driver"], Cell::Text("luis".into()));
    }

    #[test]
    fn test_filtering_is_idempotent() {
        let f = vec![
            Filter::scalar("a", "amt", FilterOperator::GreaterThan, json!(5)),
            Filter::scalar("b", "driver", FilterOperator::NotContains, json!("x")),
        ];
        let once = apply_filters(sample(), &f, &fields()).unwrap();
        let twice = apply_filters(once.clone(), &f, &fields()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_grouping_by_month_bucket() {
        let def = ReportDefinition::new("r", "R", "trips")
            .with_group_by(GroupBy {
                field: "date".into(),
                label: "Mes".into(),
                date_format: Some(DateBucket::Month),
            })
            .with_aggregation(Aggregation {
                field: "amt".into(),
                function: AggregateFunction::Sum,
                label: "Total".into(),
            })
            .with_sort(SortSpec {
                field: "date".into(),
                direction: SortDirection::Asc,
            });
        let data = exec(&def, sample());
        assert_eq!(data.headers, vec!["Mes", "Total"]);
        assert_eq!(data.columns, vec!["date", "sum_amt"]);
        assert_eq!(data.total_rows, 3);
        assert_eq!(data.rows[0], vec![Cell::Text("2024-03".into()), Cell::Num(30.0)]);
        assert_eq!(data.rows[1], vec![Cell::Text("2024-04".into()), Cell::Num(30.0)]);
        // The undated row forms its own group and sorts last.
        assert_eq!(data.rows[2][0], Cell::Null);
        assert_eq!(data.aggregates[0].value, Cell::Num(60.0));
    }

    #[test]
    fn test_grouped_sort_by_aggregated_field() {
        let def = ReportDefinition::new("r", "R", "trips")
            .with_filter(Filter::null_check("nn", "driver", FilterOperator::IsNotNull))
            .with_group_by(GroupBy {
                field: "driver".into(),
                label: String::new(),
                date_format: None,
            })
            .with_aggregation(Aggregation {
                field: "amt".into(),
                function: AggregateFunction::Sum,
                label: String::new(),
            })
            .with_sort(SortSpec {
                field: "amt".into(),
                direction: SortDirection::Desc,
            });
        let data = exec(&def, sample());
        assert_eq!(data.headers, vec!["Conductor", "sum (Monto)"]);
        assert_eq!(data.rows[0], vec![Cell::Text("Ana".into()), Cell::Num(40.0)]);
        assert_eq!(data.rows[1], vec![Cell::Text("luis".into()), Cell::Num(20.0)]);
    }

    #[test]
    fn test_sort_nulls_last_in_both_directions() {
        for direction in [SortDirection::Asc, SortDirection::Desc] {
            let data = rows(json!([{"amt": 2}, {"amt": null}, {"amt": 10}]));
            let def = ReportDefinition::new("r", "R", "trips").with_sort(SortSpec {
                field: "amt".into(),
                direction,
            });
            let out = exec(&def, data);
            let amt = out.column_index("amt").unwrap();
            assert_eq!(out.rows[2][amt], Cell::Null);
            let first = if direction == SortDirection::Asc { 2.0 } else { 10.0 };
            assert_eq!(out.rows[0][amt], Cell::Num(first));
        }
    }

    #[test]
    fn test_text_sort_is_numeric_aware() {
        let data = rows(json!([{"driver": "10"}, {"driver": "2"}, {"driver": "1"}]));
        let def = ReportDefinition::new("r", "R", "trips").with_sort(SortSpec {
            field: "driver".into(),
            direction: SortDirection::Asc,
        });
        let out = exec(&def, data);
        let col = out.column_index("driver").unwrap();
        let order: Vec<String> = out.rows.iter().map(|r| r[col].display()).collect();
        assert_eq!(order, vec!["1", "2", "10"]);
    }

    #[test]
    fn test_asc_then_desc_reverses_unique_keys() {
        let data = rows(json!([{"amt": 3}, {"amt": 1}, {"amt": 2}, {"amt": 5}]));
        let asc = ReportDefinition::new("r", "R", "trips").with_sort(SortSpec {
            field: "amt".into(),
            direction: SortDirection::Asc,
        });
        let desc = ReportDefinition::new("r", "R", "trips").with_sort(SortSpec {
            field: "amt".into(),
            direction: SortDirection::Desc,
        });
        let mut a = exec(&asc, data.clone()).rows;
        let d = exec(&desc, data).rows;
        a.reverse();
        assert_eq!(a, d);
    }

    #[test]
    fn test_limit_keeps_total_rows() {
        let def = ReportDefinition::new("r", "R", "trips").with_limit(2);
        let data = exec(&def, sample());
        assert_eq!(data.rows.len(), 2);
        assert_eq!(data.total_rows, 4);
        assert!(data.metadata.truncated);
        assert!(data.rows.iter().all(|r| r.len() == data.headers.len()));
    }

    #[test]
    fn test_pagination_after_limit() {
        let def = ReportDefinition::new("r", "R", "trips").with_limit(3);
        let options = ExecutionOptions {
            page: Some(2),
            page_size: Some(2),
            ..Default::default()
        };
        let data = execute(sample(), &def, &fields(), &options).unwrap();
        assert_eq!(data.rows.len(), 1);
        assert_eq!(data.total_rows, 4);
        assert_eq!(data.metadata.page, Some(2));
    }

    #[test]
    fn test_page_far_past_the_end_is_empty() {
        let def = ReportDefinition::new("r", "R", "trips");
        let options = ExecutionOptions {
            page: Some(usize::MAX),
            page_size: Some(2),
            ..Default::default()
        };
        let data = execute(sample(), &def, &fields(), &options).unwrap();
        assert!(data.rows.is_empty());
        assert_eq!(data.total_rows, 4);
    }

    #[test]
    fn test_unknown_field_fails_whole_execution() {
        let def = ReportDefinition::new("r", "R", "trips").with_aggregation(Aggregation {
            field: "ghost".into(),
            function: AggregateFunction::Count,
            label: "N".into(),
        });
        let err = execute(sample(), &def, &fields(), &ExecutionOptions::default()).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownField { .. }));
    }

    #[test]
    fn test_default_date_range_is_applied() {
        let mut def = ReportDefinition::new("r", "R", "trips");
        def.default_date_range = Some(crate::model::DateRange {
            field: "date".into(),
            preset: crate::model::DateRangePreset::ThisMonth,
            start: None,
            end: None,
        });
        let options = ExecutionOptions {
            now: Some("2024-03-20T12:00:00Z".parse().unwrap()),
            ..Default::default()
        };
        let data = execute(sample(), &def, &fields(), &options).unwrap();
        assert_eq!(data.total_rows, 2);
        assert_eq!(data.metadata.filters[0].id, "default_date_range");
    }

    #[test]
    fn test_week_bucket_label() {
        let d = crate::cell::parse_date("2024-03-05").unwrap();
        assert_eq!(bucket_label(d, DateBucket::Week), "2024-W10");
        assert_eq!(bucket_label(d, DateBucket::Year), "2024");
    }
}
