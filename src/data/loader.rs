use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array, StringArray,
};
use arrow::datatypes::DataType;
use log::{debug, info};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{CellValue, MeasurementRow, MeasurementTable};
use crate::config::ColumnConfig;

/// One input record before the key/value columns are picked out.
type Record = BTreeMap<String, CellValue>;

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a long-format measurement table from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.csv`     – header row, one measurement per row
/// * `.json`    – `[{ "Name": ..., "measurement": 1, ... }, ...]`
/// * `.parquet` – flat scalar columns (Pandas / Polars output)
pub fn load_table(path: &Path, columns: &ColumnConfig) -> Result<MeasurementTable> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let (headers, records) = match ext.as_str() {
        "csv" => read_csv(path, &columns.text_columns())?,
        "json" => read_json(path)?,
        "parquet" | "pq" => read_parquet(path)?,
        other => bail!("Unsupported file extension: .{other}"),
    };

    for required in columns.required() {
        if !headers.iter().any(|h| h == required) {
            bail!("{}: missing column '{required}'", path.display());
        }
    }

    let rows = records
        .into_iter()
        .enumerate()
        .map(|(i, rec)| to_measurement_row(rec, columns, i))
        .collect::<Result<Vec<_>>>()?;

    info!("Loaded {} rows from {}", rows.len(), path.display());
    Ok(MeasurementTable::from_rows(rows, columns.spread.is_some()))
}

/// Split one record into key fields, measurement, value, spread and extras.
fn to_measurement_row(
    mut rec: Record,
    columns: &ColumnConfig,
    row: usize,
) -> Result<MeasurementRow> {
    let mut take = |col: &str| rec.remove(col).unwrap_or(CellValue::Null);

    let subject = take(&columns.subject).to_string();
    let index_name = take(&columns.index_name).to_string();
    let altitude = take(&columns.altitude);
    let method = take(&columns.method).to_string();

    let measurement_cell = take(&columns.measurement);
    let measurement = match measurement_cell.as_f64() {
        Some(m) if m.is_finite() => m,
        _ => bail!(
            "Row {row}: measurement index '{measurement_cell}' in column '{}' is not a number",
            columns.measurement
        ),
    };

    let value = numeric_or_nan(take(&columns.value), row, &columns.value);
    let spread = columns
        .spread
        .as_deref()
        .map(|col| numeric_or_nan(take(col), row, col));

    Ok(MeasurementRow {
        subject,
        index_name,
        altitude,
        method,
        measurement,
        value,
        spread,
        extra: rec,
    })
}

fn numeric_or_nan(cell: CellValue, row: usize, col: &str) -> f64 {
    cell.as_f64().unwrap_or_else(|| {
        debug!("Row {row}: '{cell}' in column '{col}' read as NaN");
        f64::NAN
    })
}

// ---------------------------------------------------------------------------
// CSV reader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names. Cells of `verbatim` columns stay
/// text as written; every other cell is typed by [`CellValue::guess`].
fn read_csv(path: &Path, verbatim: &[&str]) -> Result<(Vec<String>, Vec<Record>)> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut records = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let rec: Record = headers
            .iter()
            .zip(record.iter())
            .map(|(col, value)| {
                let cell = if verbatim.contains(&col.as_str()) {
                    CellValue::String(value.to_string())
                } else {
                    CellValue::guess(value)
                };
                (col.clone(), cell)
            })
            .collect();
        records.push(rec);
    }

    Ok((headers, records))
}

// ---------------------------------------------------------------------------
// JSON reader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, `df.to_json(orient='records')`):
///
/// ```json
/// [
///   { "Name": "Polonez 2 Edges", "index_name": "NDRE", "altitude_m": 30,
///     "Type": "Edges", "measurement": 1, "Mean index value": 0.31 },
///   ...
/// ]
/// ```
fn read_json(path: &Path) -> Result<(Vec<String>, Vec<Record>)> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let items = root.as_array().context("Expected top-level JSON array")?;

    let mut headers: Vec<String> = Vec::new();
    let mut records = Vec::with_capacity(items.len());

    for (i, item) in items.iter().enumerate() {
        let obj = item
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let mut rec = Record::new();
        for (key, val) in obj {
            if !headers.contains(key) {
                headers.push(key.clone());
            }
            rec.insert(key.clone(), json_to_cell(val));
        }
        records.push(rec);
    }

    Ok((headers, records))
}

fn json_to_cell(val: &JsonValue) -> CellValue {
    match val {
        JsonValue::String(s) => CellValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                CellValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                CellValue::Float(f)
            } else {
                CellValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => CellValue::Bool(*b),
        JsonValue::Null => CellValue::Null,
        other => CellValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Parquet reader
// ---------------------------------------------------------------------------

/// Load a Parquet file holding the long-format table.
///
/// Every column must be a scalar (string, integer, float or bool); nulls
/// become [`CellValue::Null`]. Works with files written by both **Pandas**
/// (`df.to_parquet()`) and **Polars** (`df.write_parquet()`).
fn read_parquet(path: &Path) -> Result<(Vec<String>, Vec<Record>)> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let headers: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build().context("building parquet reader")?;

    let mut records = Vec::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();

        for row in 0..batch.num_rows() {
            let mut rec = Record::new();
            for (col_idx, field) in schema.fields().iter().enumerate() {
                let value = extract_cell(batch.column(col_idx), row)
                    .with_context(|| format!("Row {row}: column '{}'", field.name()))?;
                rec.insert(field.name().clone(), value);
            }
            records.push(rec);
        }
    }

    Ok((headers, records))
}

// -- Parquet / Arrow helpers --

/// Extract a single cell from an Arrow column at a given row.
fn extract_cell(col: &Arc<dyn Array>, row: usize) -> Result<CellValue> {
    if col.is_null(row) {
        return Ok(CellValue::Null);
    }
    let cell = match col.data_type() {
        DataType::Utf8 => {
            let arr = col
                .as_any()
                .downcast_ref::<StringArray>()
                .context("expected StringArray")?;
            CellValue::String(arr.value(row).to_string())
        }
        DataType::LargeUtf8 => CellValue::String(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => {
            let arr = col
                .as_any()
                .downcast_ref::<Int32Array>()
                .context("expected Int32Array")?;
            CellValue::Integer(arr.value(row) as i64)
        }
        DataType::Int64 => {
            let arr = col
                .as_any()
                .downcast_ref::<Int64Array>()
                .context("expected Int64Array")?;
            CellValue::Integer(arr.value(row))
        }
        DataType::Float32 => {
            let arr = col
                .as_any()
                .downcast_ref::<Float32Array>()
                .context("expected Float32Array")?;
            CellValue::Float(arr.value(row) as f64)
        }
        DataType::Float64 => {
            let arr = col
                .as_any()
                .downcast_ref::<Float64Array>()
                .context("expected Float64Array")?;
            CellValue::Float(arr.value(row))
        }
        DataType::Boolean => {
            let arr = col
                .as_any()
                .downcast_ref::<BooleanArray>()
                .context("expected BooleanArray")?;
            CellValue::Bool(arr.value(row))
        }
        other => bail!("unsupported column type {other:?}"),
    };
    Ok(cell)
}
