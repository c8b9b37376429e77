//! Merge a folder of per-index annotation exports into one long table.
//!
//! Each export holds the rows of one vegetation index for one measurement
//! flight; the index name is taken from the file name (`GNDVI-annotation...csv`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use log::{debug, info};

/// Caller-supplied labels for one merged flight.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub measurement: String,
    pub altitude: String,
    /// Defaults to `<folder>/<folder-name>_merged.csv`.
    pub output: Option<PathBuf>,
}

/// Outcome of a merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub files: usize,
    pub rows: usize,
    pub output: PathBuf,
}

/// Added columns, in the order they are appended to the header.
const ADDED_COLUMNS: [&str; 4] = ["index_name", "source_folder", "measurement", "altitude_m"];

/// Index name encoded in an export file name.
pub fn index_name_from_file(file_name: &str) -> String {
    match file_name.split_once("-annotation") {
        Some((prefix, _)) => prefix.to_string(),
        None => Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name)
            .to_string(),
    }
}

/// Concatenate every CSV file of `folder` into one table.
pub fn merge_folder(folder: &Path, options: &MergeOptions) -> Result<MergeReport> {
    let measurement = options.measurement.trim();
    let altitude = options.altitude.trim();
    if measurement.is_empty() {
        bail!("no measurement name/number given");
    }
    if altitude.is_empty() {
        bail!("no flight altitude given");
    }

    let source_folder = folder
        .file_name()
        .and_then(|s| s.to_str())
        .context("folder has no usable name")?
        .to_string();
    let output = options
        .output
        .clone()
        .unwrap_or_else(|| folder.join(format!("{source_folder}_merged.csv")));

    let files = csv_files(folder, &output)?;
    if files.is_empty() {
        bail!("no CSV files in {}", folder.display());
    }

    // Union of input headers in first-seen order.
    let mut header: Vec<String> = Vec::new();
    let mut tables: Vec<(String, Vec<BTreeMap<String, String>>)> = Vec::new();

    for path in &files {
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let index_name = index_name_from_file(file_name);

        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening {}", path.display()))?;
        let columns: Vec<String> = reader
            .headers()
            .with_context(|| format!("reading headers of {}", path.display()))?
            .iter()
            .map(String::from)
            .collect();
        for col in &columns {
            if !header.contains(col) && !ADDED_COLUMNS.contains(&col.as_str()) {
                header.push(col.clone());
            }
        }

        let mut rows = Vec::new();
        for (row_no, record) in reader.records().enumerate() {
            let record =
                record.with_context(|| format!("{} row {row_no}", path.display()))?;
            rows.push(
                columns
                    .iter()
                    .cloned()
                    .zip(record.iter().map(String::from))
                    .collect(),
            );
        }
        debug!("{}: {} rows of {index_name}", path.display(), rows.len());
        tables.push((index_name, rows));
    }

    let mut writer = csv::Writer::from_path(&output)
        .with_context(|| format!("creating {}", output.display()))?;
    let full_header: Vec<&str> = header
        .iter()
        .map(String::as_str)
        .chain(ADDED_COLUMNS)
        .collect();
    writer.write_record(&full_header).context("writing merged header")?;

    let mut total_rows = 0;
    for (index_name, rows) in &tables {
        for row in rows {
            let mut record: Vec<&str> = header
                .iter()
                .map(|col| row.get(col).map(String::as_str).unwrap_or(""))
                .collect();
            record.extend([index_name.as_str(), source_folder.as_str(), measurement, altitude]);
            writer.write_record(&record).context("writing merged row")?;
            total_rows += 1;
        }
    }
    writer.flush().context("flushing merged output")?;

    info!(
        "Merged {} files ({total_rows} rows) into {}",
        files.len(),
        output.display()
    );
    Ok(MergeReport {
        files: files.len(),
        rows: total_rows,
        output,
    })
}

/// CSV files of `folder` in name order, never including `output` itself.
fn csv_files(folder: &Path, output: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(folder).with_context(|| format!("listing {}", folder.display()))? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if is_csv && path.is_file() && path != output {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> MergeOptions {
        MergeOptions {
            measurement: "3".into(),
            altitude: "30".into(),
            output: None,
        }
    }

    #[test]
    fn test_index_name_from_file() {
        assert_eq!(index_name_from_file("GNDVI-annotation-export.csv"), "GNDVI");
        assert_eq!(index_name_from_file("MCARI2.csv"), "MCARI2");
    }

    #[test]
    fn test_merge_folder() {
        let root = tempfile::tempdir().unwrap();
        let folder = root.path().join("flight3");
        std::fs::create_dir(&folder).unwrap();
        std::fs::write(
            folder.join("GNDVI-annotation.csv"),
            "Name,Type,Mean index value\nA,Bounded,0.71\nB,Edges,0.69\n",
        )
        .unwrap();
        std::fs::write(
            folder.join("NDRE-annotation.csv"),
            "Name,Type,Mean index value,SD index value\nA,Bounded,0.31,0.02\n",
        )
        .unwrap();
        std::fs::write(folder.join("notes.txt"), "ignored").unwrap();

        let report = merge_folder(&folder, &options()).unwrap();
        assert_eq!(report.files, 2);
        assert_eq!(report.rows, 3);
        assert_eq!(report.output, folder.join("flight3_merged.csv"));

        let mut reader = csv::Reader::from_path(&report.output).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(
            header,
            vec![
                "Name",
                "Type",
                "Mean index value",
                "SD index value",
                "index_name",
                "source_folder",
                "measurement",
                "altitude_m",
            ]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(&rows[0][4], "GNDVI");
        assert_eq!(&rows[0][3], "");
        assert_eq!(&rows[2][3], "0.02");
        assert_eq!(&rows[2][4], "NDRE");
        assert_eq!(&rows[2][5], "flight3");
        assert_eq!(&rows[2][6], "3");
        assert_eq!(&rows[2][7], "30");

        // a second merge must not pick up its own output
        let again = merge_folder(&folder, &options()).unwrap();
        assert_eq!(again.files, 2);
        assert_eq!(again.rows, 3);
    }

    #[test]
    fn test_merge_requires_labels_and_files() {
        let root = tempfile::tempdir().unwrap();
        let empty = MergeOptions {
            measurement: " ".into(),
            ..options()
        };
        assert!(merge_folder(root.path(), &empty).is_err());
        assert!(merge_folder(root.path(), &options()).is_err());
    }
}
