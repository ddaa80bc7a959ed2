//! CSV rendering and parsing.
//!
//! Nested objects are flattened into dotted columns (`company.name`) down to the configured
//! depth. Deeper objects and every array are written as JSON text.

use serde_json::{Map, Value};

use crate::errors::CrudError;

/// One record as ordered `(column, scalar)` pairs.
#[must_use]
pub fn flatten(record: &Value, depth: usize) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    match record {
        Value::Object(map) => flatten_into(&mut out, None, map, depth),
        other => out.push(("value".to_string(), scalar(other))),
    }
    out
}

fn flatten_into(out: &mut Vec<(String, Value)>, prefix: Option<&str>, map: &Map<String, Value>, depth: usize) {
    for (key, value) in map {
        let column = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(nested) if depth > 0 => flatten_into(out, Some(&column), nested, depth - 1),
            other => out.push((column, scalar(other))),
        }
    }
}

fn scalar(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        other => other.clone(),
    }
}

/// Union of all columns, in first-seen order.
#[must_use]
pub fn columns(rows: &[Vec<(String, Value)>]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for (column, _) in rows.iter().flatten() {
        if !columns.contains(column) {
            columns.push(column.clone());
        }
    }
    columns
}

/// Text of a flattened cell. Nulls are empty.
#[must_use]
pub fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

pub(crate) fn lookup<'a>(row: &'a [(String, Value)], column: &str) -> Option<&'a Value> {
    row.iter().find(|(name, _)| name == column).map(|(_, value)| value)
}

fn export_error(err: impl std::fmt::Display) -> CrudError {
    CrudError::internal("Failed to build CSV export", Some(err.to_string()))
}

/// Header row plus one row per record.
pub fn write(records: &[&Value], depth: usize) -> Result<Vec<u8>, CrudError> {
    let rows: Vec<_> = records.iter().map(|record| flatten(record, depth)).collect();
    let columns = columns(&rows);

    let mut writer = ::csv::Writer::from_writer(Vec::new());
    if !columns.is_empty() {
        writer.write_record(&columns).map_err(export_error)?;
    }
    for row in &rows {
        writer
            .write_record(columns.iter().map(|column| cell_text(lookup(row, column))))
            .map_err(export_error)?;
    }
    writer.into_inner().map_err(export_error)
}

/// Read CSV text back into flat records. Every cell comes back as a string.
pub fn parse(text: &str) -> Result<Vec<Map<String, Value>>, ::csv::Error> {
    let mut reader = ::csv::Reader::from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();
    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        records.push(
            headers
                .iter()
                .zip(row.iter())
                .map(|(column, cell)| (column.to_string(), Value::String(cell.to_string())))
                .collect(),
        );
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_respects_depth() {
        let record = json!({
            "id": 1,
            "company": { "name": "Acme", "address": { "city": "Bern" } },
            "tags": ["a", "b"]
        });
        let mut flat = flatten(&record, 1);
        flat.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            flat,
            vec![
                ("company.address".to_string(), json!(r#"{"city":"Bern"}"#)),
                ("company.name".to_string(), json!("Acme")),
                ("id".to_string(), json!(1)),
                ("tags".to_string(), json!(r#"["a","b"]"#)),
            ]
        );

        let shallow = flatten(&record, 0);
        assert!(shallow.iter().any(|(column, value)| column == "company" && value.is_string()));
    }

    #[test]
    fn test_columns_are_a_union() {
        let a = json!({ "id": 1, "name": "x" });
        let b = json!({ "id": 2, "email": "e@x.io" });
        let csv = String::from_utf8(write(&[&a, &b], 1).unwrap()).unwrap();
        assert_eq!(csv, "id,name,email\n1,x,\n2,,e@x.io\n");
    }

    #[test]
    fn test_round_trip_recovers_flattened_values() {
        let records = vec![
            json!({ "id": 1, "name": "Acme, Inc.", "owner": { "name": "Ann" }, "active": true }),
            json!({ "id": 2, "name": "Quote \"Co\"", "owner": { "name": "Bob" }, "active": false }),
        ];
        let refs: Vec<&Value> = records.iter().collect();
        let text = String::from_utf8(write(&refs, 1).unwrap()).unwrap();
        let parsed = parse(&text).unwrap();

        assert_eq!(parsed.len(), 2);
        for (record, row) in records.iter().zip(&parsed) {
            for (column, value) in flatten(record, 1) {
                assert_eq!(row[&column], Value::String(cell_text(Some(&value))));
            }
        }
    }

    #[test]
    fn test_empty_export() {
        assert!(write(&[], 1).unwrap().is_empty());
        assert!(parse("").unwrap().is_empty());
    }
}
