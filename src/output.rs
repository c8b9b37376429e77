//! Result table writer: one row per group, key columns then metric columns.

use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use log::info;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::data::grouping::GroupKey;
use crate::engine::{Metric, MetricValue, Metrics};

/// One output row: a group key with its metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub key: GroupKey,
    pub metrics: Metrics,
}

/// Rendering options for the results table.
#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    /// Text written for undefined metrics in CSV output.
    pub na_rep: String,
    /// Whether spread metrics are expected; decides the header of an empty table.
    pub with_spread: bool,
}

/// Write the results table.  Dispatch by extension (`.csv` or `.json`).
///
/// `key_columns` names the four group-key columns in output order.
pub fn write_results(
    path: &Path,
    key_columns: [&str; 4],
    rows: &[ResultRow],
    options: &OutputOptions,
) -> Result<()> {
    let metrics = metric_columns(rows, options.with_spread)?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "csv" => write_csv(path, key_columns, &metrics, rows, options)?,
        "json" => write_json(path, key_columns, rows)?,
        other => bail!("Unsupported output extension: .{other}"),
    }

    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Shared metric column list; every row must carry the same metrics.
fn metric_columns(rows: &[ResultRow], with_spread: bool) -> Result<Vec<Metric>> {
    let Some(first) = rows.first() else {
        return Ok(Metric::columns(with_spread));
    };
    let columns = first.metrics.columns();
    for row in rows {
        if row.metrics.columns() != columns {
            bail!("group {} has a different metric set than {}", row.key, first.key);
        }
    }
    Ok(columns)
}

fn render(value: MetricValue, na_rep: &str) -> String {
    match value {
        MetricValue::Number(v) => v.to_string(),
        MetricValue::Count(c) => c.to_string(),
        MetricValue::Undefined => na_rep.to_string(),
    }
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

fn write_csv(
    path: &Path,
    key_columns: [&str; 4],
    metrics: &[Metric],
    rows: &[ResultRow],
    options: &OutputOptions,
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;

    let header: Vec<&str> = key_columns
        .iter()
        .copied()
        .chain(metrics.iter().map(|m| m.name()))
        .collect();
    writer.write_record(&header).context("writing CSV header")?;

    for row in rows {
        let mut record: Vec<String> = row.key.fields().to_vec();
        record.extend(row.metrics.iter().map(|(_, v)| render(*v, &options.na_rep)));
        writer
            .write_record(&record)
            .with_context(|| format!("writing row for {}", row.key))?;
    }
    writer.flush().context("flushing CSV output")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// Serializes one row as a flat JSON object in column order.
struct JsonRecord<'a> {
    key_columns: [&'a str; 4],
    row: &'a ResultRow,
}

impl Serialize for JsonRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (col, field) in self.key_columns.iter().zip(self.row.key.fields()) {
            map.serialize_entry(col, &field)?;
        }
        for (metric, value) in self.row.metrics.iter() {
            match value {
                MetricValue::Number(v) => map.serialize_entry(metric.name(), v)?,
                MetricValue::Count(c) => map.serialize_entry(metric.name(), c)?,
                MetricValue::Undefined => map.serialize_entry(metric.name(), &())?,
            }
        }
        map.end()
    }
}

fn write_json(path: &Path, key_columns: [&str; 4], rows: &[ResultRow]) -> Result<()> {
    let records: Vec<JsonRecord<'_>> = rows
        .iter()
        .map(|row| JsonRecord { key_columns, row })
        .collect();
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &records).context("writing JSON output")?;
    writer.flush().context("flushing JSON output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::CellValue;
    use crate::engine::{EngineConfig, compute_metrics};

    const KEYS: [&str; 4] = ["Name", "index_name", "altitude_m", "Type"];

    fn result(subject: &str, values: &[f64], spread: Option<&[f64]>) -> ResultRow {
        ResultRow {
            key: GroupKey {
                subject: subject.into(),
                index_name: "GNDVI".into(),
                altitude: CellValue::Integer(30),
                method: "Bounded".into(),
            },
            metrics: compute_metrics(values, spread, &EngineConfig::default()).unwrap(),
        }
    }

    #[test]
    fn test_csv_header_and_undefined_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dynamics.csv");
        let rows = vec![result("A", &[0.5, 0.75], None)];
        write_results(&path, KEYS, &rows, &OutputOptions::default()).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(&header[..4], &KEYS);
        assert_eq!(header[4], "Mean_index");
        assert_eq!(header.last().unwrap(), "K_level_motion");
        assert_eq!(header.len(), 4 + Metric::TEMPORAL.len());

        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[0], "A");
        assert_eq!(&record[2], "30");
        let col = |name: &str| header.iter().position(|h| h == name).unwrap();
        assert_eq!(&record[col("A_total")], "0.25");
        assert_eq!(&record[col("n_growth")], "1");
        assert_eq!(&record[col("J_roughness")], "");
    }

    #[test]
    fn test_csv_na_rep() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dynamics.csv");
        let rows = vec![result("A", &[0.5, 0.75], None)];
        let options = OutputOptions {
            na_rep: "NaN".into(),
            ..OutputOptions::default()
        };
        write_results(&path, KEYS, &rows, &options).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.lines().nth(1).unwrap().ends_with("NaN"));
    }

    #[test]
    fn test_json_uses_null_for_undefined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dynamics.json");
        let rows = vec![result("A", &[0.5, 0.75], Some(&[0.1, 0.1]))];
        write_results(&path, KEYS, &rows, &OutputOptions::default()).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let rec = &json[0];
        assert_eq!(rec["Name"], "A");
        assert_eq!(rec["altitude_m"], "30");
        assert_eq!(rec["n_growth"], 1);
        assert!(rec["K_level_motion"].is_null());
        assert_eq!(rec["SD_spread"], 0.0);
    }

    #[test]
    fn test_mixed_metric_sets_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dynamics.csv");
        let rows = vec![
            result("A", &[0.5, 0.75], None),
            result("B", &[0.5, 0.75], Some(&[0.1, 0.2])),
        ];
        assert!(write_results(&path, KEYS, &rows, &OutputOptions::default()).is_err());
    }

    #[test]
    fn test_empty_results_still_write_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dynamics.csv");
        write_results(&path, KEYS, &[], &OutputOptions::default()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("Name,index_name,altitude_m,Type,Mean_index"));
    }
}
