//! Conversion of raw database values into JSON-safe rows.

use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Number, Value as Json};

use crate::db::{QueryResult, Value};

/// One result row: column name to JSON value, in select-list order.
pub type Row = Map<String, Json>;

/// Name of the column whose GeoJSON text is parsed into an object.
pub const GEOMETRY_COLUMN: &str = "geometry";

/// Converts every row of a raw result, keeping at most `max_rows`.
pub fn normalize_result(result: &QueryResult, max_rows: usize) -> Vec<Row> {
    result
        .rows
        .iter()
        .take(max_rows)
        .map(|raw| {
            result
                .columns
                .iter()
                .zip(raw.iter())
                .map(|(column, value)| (column.name.clone(), normalize_value(&column.name, value)))
                .collect()
        })
        .collect()
}

/// Converts one value.
///
/// NUMERIC becomes a float, temporal values become ISO-8601 text, and the
/// `geometry` column's GeoJSON text becomes an object. Text that fails to
/// parse as GeoJSON is kept as-is.
pub fn normalize_value(column: &str, value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => float(*f),
        Value::Decimal(d) => d.to_f64().map(float).unwrap_or(Json::Null),
        Value::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => Json::String(t.format("%H:%M:%S%.f").to_string()),
        Value::Timestamp(ts) => Json::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        Value::TimestampTz(ts) => Json::String(ts.to_rfc3339()),
        Value::Json(j) => j.clone(),
        Value::String(s) if is_geometry_column(column) => parse_geometry(s),
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(_) => Json::String(value.to_display_string()),
    }
}

/// True for the map geometry column, in any letter case.
pub fn is_geometry_column(column: &str) -> bool {
    column.eq_ignore_ascii_case(GEOMETRY_COLUMN)
}

fn parse_geometry(text: &str) -> Json {
    match serde_json::from_str::<Json>(text) {
        Ok(parsed @ Json::Object(_)) => parsed,
        _ => Json::String(text.to_string()),
    }
}

// NaN and infinity have no JSON form.
fn float(f: f64) -> Json {
    Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null)
}
