//! Structural validation of definitions against their data source fields.
//!
//! Pure functions, no side effects. A definition that fails here never reaches
//! the transform stage.

use crate::cell::{parse_date, Cell};
use crate::error::DefinitionError;
use crate::model::{
    Aggregation, Field, FieldType, Filter, FilterOperator, GroupBy, ReportDefinition, ValueShape,
};

pub fn find_field<'a>(fields: &'a [Field], key: &str) -> Option<&'a Field> {
    fields.iter().find(|f| f.key == key)
}

fn require_field<'a>(fields: &'a [Field], key: &str, context: String) -> Result<&'a Field, DefinitionError> {
    find_field(fields, key).ok_or_else(|| DefinitionError::UnknownField {
        context,
        field: key.to_string(),
    })
}

/// Check that a filter references a known field and that its value shape
/// matches its operator.
pub fn validate_filter(filter: &Filter, fields: &[Field]) -> Result<(), DefinitionError> {
    let field = require_field(fields, &filter.field, format!("filter '{}'", filter.id))?;
    let invalid = |reason: String| DefinitionError::InvalidFilter {
        filter: filter.id.clone(),
        reason,
    };

    match filter.operator.value_shape() {
        ValueShape::None => Ok(()),
        ValueShape::Scalar => {
            let value = match &filter.value {
                Some(v) if !v.is_null() => v,
                _ => return Err(invalid(format!("operator {:?} requires a value", filter.operator))),
            };
            if !is_scalar(value) {
                return Err(invalid(format!(
                    "operator {:?} requires a scalar value (got {})",
                    filter.operator, value
                )));
            }
            if matches!(filter.operator, FilterOperator::GreaterThan | FilterOperator::LessThan) {
                check_comparable(value, field.field_type).map_err(invalid)?;
            }
            Ok(())
        }
        ValueShape::List => {
            let values = match &filter.values {
                Some(v) if !v.is_empty() => v,
                _ => {
                    return Err(invalid(format!(
                        "operator {:?} requires a non-empty values list",
                        filter.operator
                    )))
                }
            };
            if let Some(bad) = values.iter().find(|v| !is_scalar(v)) {
                return Err(invalid(format!("values must be scalars (got {})", bad)));
            }
            if filter.operator == FilterOperator::Between {
                if !field.field_type.is_orderable() {
                    return Err(invalid(format!(
                        "between is not defined for {:?} fields",
                        field.field_type
                    )));
                }
                if values.len() != 2 {
                    return Err(invalid(format!(
                        "between requires exactly two values (got {})",
                        values.len()
                    )));
                }
                for v in values {
                    check_comparable(v, field.field_type).map_err(invalid)?;
                }
            }
            Ok(())
        }
    }
}

/// Strings, numbers and booleans. Arrays and objects are never cell values.
fn is_scalar(value: &serde_json::Value) -> bool {
    !matches!(value, serde_json::Value::Array(_) | serde_json::Value::Object(_))
}

/// Ordered comparisons need a bound of the field's orderable kind.
fn check_comparable(value: &serde_json::Value, field_type: FieldType) -> Result<(), String> {
    let cell = Cell::from_json(value);
    let ok = if field_type == FieldType::Date {
        cell.as_date().is_some()
    } else {
        cell.as_number().is_some()
    };
    if ok {
        Ok(())
    } else {
        Err(format!("value {} is not comparable with a {:?} field", value, field_type))
    }
}

pub fn validate_aggregation(aggregation: &Aggregation, fields: &[Field]) -> Result<(), DefinitionError> {
    let label = if aggregation.label.is_empty() {
        aggregation.column_key()
    } else {
        aggregation.label.clone()
    };
    let field = require_field(fields, &aggregation.field, format!("aggregation '{}'", label))?;

    if aggregation.function.requires_numeric() && !field.field_type.is_numeric() {
        return Err(DefinitionError::InvalidAggregation {
            label,
            reason: format!(
                "{} requires a number or currency field, '{}' is {:?}",
                aggregation.function.as_str(),
                field.key,
                field.field_type
            ),
        });
    }
    Ok(())
}

pub fn validate_group_by(group: &GroupBy, fields: &[Field]) -> Result<(), DefinitionError> {
    require_field(fields, &group.field, format!("group '{}'", group.label)).map(|_| ())
}

/// Validate every reference in a definition. The first failure aborts.
pub fn validate_definition(definition: &ReportDefinition, fields: &[Field]) -> Result<(), DefinitionError> {
    if definition.limit < 1 {
        return Err(DefinitionError::InvalidLimit(definition.limit));
    }

    for key in &definition.fields {
        require_field(fields, key, "column list".to_string())?;
    }
    for filter in &definition.filters {
        validate_filter(filter, fields)?;
    }
    for group in &definition.group_by {
        validate_group_by(group, fields)?;
    }
    for aggregation in &definition.aggregations {
        validate_aggregation(aggregation, fields)?;
    }

    if let Some(range) = &definition.default_date_range {
        let field = require_field(fields, &range.field, "default date range".to_string())?;
        if field.field_type != FieldType::Date {
            return Err(DefinitionError::InvalidDateRange(format!(
                "field '{}' is not a date field",
                field.key
            )));
        }
    }

    if definition.group_by.is_empty() {
        for sort in &definition.sorting {
            require_field(fields, &sort.field, "sorting".to_string())?;
        }
    } else {
        for sort in &definition.sorting {
            let in_output = definition.group_by.iter().any(|g| g.field == sort.field)
                || definition
                    .aggregations
                    .iter()
                    .any(|a| a.column_key() == sort.field || a.field == sort.field);
            if !in_output {
                require_field(fields, &sort.field, "sorting".to_string())?;
                return Err(DefinitionError::SortNotInOutput(sort.field.clone()));
            }
        }
    }

    Ok(())
}

/// Whether a filter bound string carries only a calendar day.
pub(crate) fn is_date_only(value: &serde_json::Value) -> bool {
    value
        .as_str()
        .map(|s| s.trim().len() == 10 && parse_date(s).is_some())
        .unwrap_or(false)
}
