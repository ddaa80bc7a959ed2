//! Spreadsheet rendering, available with the `xlsx` feature.

use rust_xlsxwriter::{Workbook, XlsxError};
use serde_json::Value;

use super::csv::{cell_text, columns, flatten, lookup};
use crate::errors::CrudError;

const SHEET_NAME: &str = "data";

fn export_error(err: &XlsxError) -> CrudError {
    CrudError::internal("Failed to build spreadsheet export", Some(err.to_string()))
}

fn build(records: &[&Value], depth: usize) -> Result<Vec<u8>, XlsxError> {
    let rows: Vec<_> = records.iter().map(|record| flatten(record, depth)).collect();
    let columns = columns(&rows);

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    for (col, name) in (0u16..).zip(&columns) {
        sheet.write_string(0, col, name)?;
    }
    for (row_index, row) in (1u32..).zip(&rows) {
        for (col, column) in (0u16..).zip(&columns) {
            match lookup(row, column) {
                None | Some(Value::Null) => {}
                Some(Value::Bool(flag)) => {
                    sheet.write_boolean(row_index, col, *flag)?;
                }
                Some(Value::Number(number)) if number.as_f64().is_some() => {
                    sheet.write_number(row_index, col, number.as_f64().unwrap_or_default())?;
                }
                other => {
                    sheet.write_string(row_index, col, cell_text(other))?;
                }
            }
        }
    }

    workbook.save_to_buffer()
}

/// One `data` worksheet: a header row with the column union, then one row per record.
pub fn write(records: &[&Value], depth: usize) -> Result<Vec<u8>, CrudError> {
    build(records, depth).map_err(|err| export_error(&err))
}
