use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, bail};

use super::model::{CellValue, MeasurementRow};
use crate::config::ColumnConfig;

// ---------------------------------------------------------------------------
// Selection predicate: which values are accepted per column
// ---------------------------------------------------------------------------

/// Per-column selection: maps column_name → set of accepted values.
/// Columns that are absent are unconstrained.
pub type Selection = BTreeMap<String, BTreeSet<CellValue>>;

/// Parse `COLUMN=VALUE[,VALUE...]` arguments into a [`Selection`].
///
/// Values are kept as text; [`CellValue::loosely_eq`] reads them as numbers
/// only against numeric cells. Repeating a column widens its accepted set.
pub fn parse_selection(args: &[String]) -> Result<Selection> {
    let mut selection = Selection::new();
    for arg in args {
        let Some((column, values)) = arg.split_once('=') else {
            bail!("selection '{arg}' must look like COLUMN=VALUE[,VALUE...]");
        };
        let column = column.trim();
        if column.is_empty() {
            bail!("selection '{arg}' has an empty column name");
        }
        let accepted = selection.entry(column.to_string()).or_default();
        for value in values.split(',').map(str::trim) {
            if value.is_empty() {
                bail!("selection '{arg}' has an empty value");
            }
            accepted.insert(CellValue::String(value.to_string()));
        }
    }
    Ok(selection)
}

/// Value of `column` in `row`, addressing the key fields by their configured names.
fn cell_of(row: &MeasurementRow, column: &str, columns: &ColumnConfig) -> Option<CellValue> {
    if column == columns.subject {
        Some(CellValue::String(row.subject.clone()))
    } else if column == columns.index_name {
        Some(CellValue::String(row.index_name.clone()))
    } else if column == columns.altitude {
        Some(row.altitude.clone())
    } else if column == columns.method {
        Some(CellValue::String(row.method.clone()))
    } else if column == columns.measurement {
        Some(CellValue::Float(row.measurement))
    } else {
        row.extra.get(column).cloned()
    }
}

/// Whether a row passes every constraint of `selection`.
///
/// A row passes a column constraint when:
/// * The accepted set is empty → nothing selected → fails
/// * The row's value for the column loosely equals an accepted value → passes
/// * The row has no such column → passes only if `Null` is accepted
pub fn row_passes(row: &MeasurementRow, selection: &Selection, columns: &ColumnConfig) -> bool {
    selection.iter().all(|(col, accepted)| {
        let cell = cell_of(row, col, columns).unwrap_or(CellValue::Null);
        accepted.iter().any(|v| v.loosely_eq(&cell))
    })
}
