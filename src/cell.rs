//! Typed cell values and the coercions the transform stage relies on.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;

use crate::model::FieldType;

/// A single value in a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Num(f64),
    Bool(bool),
    Date(NaiveDateTime),
    Null,
}

impl Cell {
    /// Convert a raw JSON value without type information.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Cell::Null,
            serde_json::Value::Bool(b) => Cell::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map(Cell::Num).unwrap_or(Cell::Null),
            serde_json::Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }

    /// Convert a raw JSON value using the declared field type.
    ///
    /// Strings become dates only for `date` fields and numbers only for
    /// `number`/`currency` fields; anything that does not fit stays as text so
    /// the operator-level coercions can decide what to do with it.
    pub fn from_json_typed(value: &serde_json::Value, field_type: FieldType) -> Self {
        let cell = Cell::from_json(value);
        match (field_type, &cell) {
            (FieldType::Date, Cell::Text(s)) => parse_date(s).map(Cell::Date).unwrap_or(cell),
            (FieldType::Number | FieldType::Currency, Cell::Text(s)) => s
                .trim()
                .parse::<f64>()
                .map(Cell::Num)
                .unwrap_or(cell),
            (FieldType::Boolean, Cell::Text(s)) => match s.trim().to_lowercase().as_str() {
                "true" => Cell::Bool(true),
                "false" => Cell::Bool(false),
                _ => cell,
            },
            _ => cell,
        }
    }

    /// True when the cell holds no usable value (null or empty text).
    pub fn is_empty_value(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Numeric view of the cell. Text is parsed; booleans and dates are not numbers.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Num(n) if n.is_finite() => Some(*n),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    /// Date view of the cell. Text is parsed with the accepted date layouts.
    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Cell::Date(d) => Some(*d),
            Cell::Text(s) => parse_date(s),
            _ => None,
        }
    }

    /// Stringified form used for exports, text predicates and distinct counts.
    /// Null renders as an empty string, never as "null".
    pub fn display(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Num(n) => format_number(*n),
            Cell::Bool(b) => b.to_string(),
            Cell::Date(d) => format_date(d),
            Cell::Null => String::new(),
        }
    }

    /// JSON form used by chart projection and transport.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Text(s) => serde_json::Value::String(s.clone()),
            Cell::Num(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Cell::Bool(b) => serde_json::Value::Bool(*b),
            Cell::Date(_) => serde_json::Value::String(self.display()),
            Cell::Null => serde_json::Value::Null,
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Text(s) => serializer.serialize_str(s),
            Cell::Num(n) => serializer.serialize_f64(*n),
            Cell::Bool(b) => serializer.serialize_bool(*b),
            Cell::Date(_) => serializer.serialize_str(&self.display()),
            Cell::Null => serializer.serialize_none(),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Num(n)
    }
}

impl From<i64> for Cell {
    fn from(n: i64) -> Self {
        Cell::Num(n as f64)
    }
}

impl From<bool> for Cell {
    fn from(b: bool) -> Self {
        Cell::Bool(b)
    }
}

/// Parse the date layouts row sources are known to send.
pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for layout in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(dt);
        }
    }
    for layout in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, layout) {
            return Some(d.and_time(NaiveTime::MIN));
        }
    }
    None
}

fn format_date(d: &NaiveDateTime) -> String {
    if d.time() == NaiveTime::MIN {
        d.format("%Y-%m-%d").to_string()
    } else {
        d.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Whole numbers render without a trailing ".0".
fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Variant rank for mixed columns: numbers, dates, booleans, text, null.
fn rank(cell: &Cell) -> u8 {
    match cell {
        Cell::Num(_) => 0,
        Cell::Date(_) => 1,
        Cell::Bool(_) => 2,
        Cell::Text(_) => 3,
        Cell::Null => 4,
    }
}

/// Total order over cells. Cells of different kinds order by kind first;
/// within a kind, numbers numerically, dates chronologically and text by
/// natural string order.
pub fn compare_cells(a: &Cell, b: &Cell) -> Ordering {
    match (a, b) {
        (Cell::Num(x), Cell::Num(y)) => x.total_cmp(y),
        (Cell::Date(x), Cell::Date(y)) => x.cmp(y),
        (Cell::Bool(x), Cell::Bool(y)) => x.cmp(y),
        (Cell::Text(x), Cell::Text(y)) => natural_cmp(x, y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Case-insensitive, accent-folded, numeric-aware string ordering.
///
/// Digit runs compare by value, so "2" sorts before "10". Ties on the folded
/// form fall back to the raw strings so the order stays total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let fa = fold(a);
    let fb = fold(b);
    let mut ia = fa.chars().peekable();
    let mut ib = fb.chars().peekable();

    loop {
        match (ia.peek().copied(), ib.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
                let na = take_digits(&mut ia);
                let nb = take_digits(&mut ib);
                let ta = na.trim_start_matches('0');
                let tb = nb.trim_start_matches('0');
                let ord = ta.len().cmp(&tb.len()).then_with(|| ta.cmp(tb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(ca), Some(cb)) => {
                if ca != cb {
                    return ca.cmp(&cb);
                }
                ia.next();
                ib.next();
            }
        }
    }
}

fn take_digits(iter: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = iter.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        iter.next();
    }
    digits
}

fn fold(s: &str) -> String {
    s.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            other => other,
        })
        .collect()
}
