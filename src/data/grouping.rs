use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::debug;

use super::filter::{Selection, row_passes};
use super::model::{CellValue, MeasurementRow, MeasurementTable};
use crate::config::ColumnConfig;
use crate::engine::MIN_VALUES;

// ---------------------------------------------------------------------------
// GroupKey
// ---------------------------------------------------------------------------

/// Identifies one independent measurement series.
///
/// Derived `Ord` compares subject, index, altitude, method in that order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub subject: String,
    pub index_name: String,
    pub altitude: CellValue,
    pub method: String,
}

impl GroupKey {
    fn of(row: &MeasurementRow) -> Self {
        GroupKey {
            subject: row.subject.clone(),
            index_name: row.index_name.clone(),
            altitude: row.altitude.clone(),
            method: row.method.clone(),
        }
    }

    /// Key fields as text, in output column order.
    pub fn fields(&self) -> [String; 4] {
        [
            self.subject.clone(),
            self.index_name.clone(),
            self.altitude.to_string(),
            self.method.clone(),
        ]
    }

    /// Order by index, altitude and method first, then subjects naturally
    /// ("Polonez 2" before "Polonez 10").
    pub fn index_first_cmp(&self, other: &Self) -> Ordering {
        self.index_name
            .cmp(&other.index_name)
            .then_with(|| self.altitude.cmp(&other.altitude))
            .then_with(|| self.method.cmp(&other.method))
            .then_with(|| natural_cmp(&self.subject, &other.subject))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} / {} / {}",
            self.subject, self.index_name, self.altitude, self.method
        )
    }
}

/// Compare strings treating runs of ASCII digits as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut xs = a.chars().peekable();
    let mut ys = b.chars().peekable();
    loop {
        match (xs.peek().copied(), ys.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let nx = take_digits(&mut xs);
                let ny = take_digits(&mut ys);
                let trimmed_x = nx.trim_start_matches('0');
                let trimmed_y = ny.trim_start_matches('0');
                let ord = trimmed_x
                    .len()
                    .cmp(&trimmed_y.len())
                    .then_with(|| trimmed_x.cmp(trimmed_y))
                    .then_with(|| nx.len().cmp(&ny.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                xs.next();
                ys.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        digits.push(c);
        chars.next();
    }
    digits
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// A group ready for the metrics engine.
#[derive(Debug, Clone)]
pub struct SeriesGroup {
    pub key: GroupKey,
    /// Index values in increasing measurement order.
    pub values: Vec<f64>,
    pub spread: Option<Vec<f64>>,
}

/// Why a group never reaches the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    TooShort(usize),
    UndefinedValue { measurement: f64 },
    DuplicateMeasurement(f64),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TooShort(n) => {
                write!(f, "only {n} measurement(s), need at least {MIN_VALUES}")
            }
            SkipReason::UndefinedValue { measurement } => {
                write!(f, "undefined value at measurement {measurement}")
            }
            SkipReason::DuplicateMeasurement(m) => write!(f, "measurement {m} appears more than once"),
        }
    }
}

/// Result of partitioning a table.
#[derive(Debug, Clone, Default)]
pub struct Grouping {
    /// Groups in key order.
    pub ready: Vec<SeriesGroup>,
    pub skipped: Vec<(GroupKey, SkipReason)>,
}

impl Grouping {
    pub fn total(&self) -> usize {
        self.ready.len() + self.skipped.len()
    }
}

/// Partition the selected rows by group key and order each group by
/// measurement index.
pub fn group_rows(table: &MeasurementTable, selection: &Selection, columns: &ColumnConfig) -> Grouping {
    let mut groups: BTreeMap<GroupKey, Vec<&MeasurementRow>> = BTreeMap::new();
    for row in table.rows.iter().filter(|r| row_passes(r, selection, columns)) {
        groups.entry(GroupKey::of(row)).or_default().push(row);
    }

    let mut grouping = Grouping::default();
    for (key, mut rows) in groups {
        rows.sort_by(|a, b| a.measurement.total_cmp(&b.measurement));
        match classify(&rows, table.has_spread) {
            Ok(()) => {
                debug!("Group {key}: {} measurements", rows.len());
                grouping.ready.push(SeriesGroup {
                    key,
                    values: rows.iter().map(|r| r.value).collect(),
                    spread: table
                        .has_spread
                        .then(|| rows.iter().map(|r| r.spread.unwrap_or(f64::NAN)).collect()),
                });
            }
            Err(reason) => grouping.skipped.push((key, reason)),
        }
    }
    grouping
}

/// Check one sorted group against the engine's input contract.
fn classify(rows: &[&MeasurementRow], has_spread: bool) -> Result<(), SkipReason> {
    if rows.len() < MIN_VALUES {
        return Err(SkipReason::TooShort(rows.len()));
    }
    if let Some(pair) = rows.windows(2).find(|w| w[0].measurement == w[1].measurement) {
        return Err(SkipReason::DuplicateMeasurement(pair[0].measurement));
    }
    if let Some(r) = rows.iter().find(|r| is_undefined(r, has_spread)) {
        return Err(SkipReason::UndefinedValue {
            measurement: r.measurement,
        });
    }
    Ok(())
}

fn is_undefined(row: &MeasurementRow, has_spread: bool) -> bool {
    !row.value.is_finite() || (has_spread && !row.spread.is_some_and(f64::is_finite))
}

// ---------------------------------------------------------------------------
// Coverage check
// ---------------------------------------------------------------------------

/// A group whose measurement indices differ from the expected set.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageGap {
    pub key: GroupKey,
    pub missing: Vec<i64>,
    pub unexpected: Vec<f64>,
}

/// Outcome of a coverage check.
#[derive(Debug, Clone, Default)]
pub struct Coverage {
    /// Number of groups inspected.
    pub groups: usize,
    pub gaps: Vec<CoverageGap>,
}

/// Report every group whose set of measurement indices is not exactly `expected`.
pub fn coverage(table: &MeasurementTable, expected: &BTreeSet<i64>) -> Coverage {
    let mut present: BTreeMap<GroupKey, Vec<f64>> = BTreeMap::new();
    for row in &table.rows {
        present.entry(GroupKey::of(row)).or_default().push(row.measurement);
    }

    let groups = present.len();
    let gaps = present
        .into_iter()
        .filter_map(|(key, mut seen)| {
            seen.sort_by(f64::total_cmp);
            seen.dedup();
            let missing: Vec<i64> = expected
                .iter()
                .copied()
                .filter(|e| !seen.contains(&(*e as f64)))
                .collect();
            let unexpected: Vec<f64> = seen
                .into_iter()
                .filter(|m| m.fract() != 0.0 || !expected.contains(&(*m as i64)))
                .collect();
            (!missing.is_empty() || !unexpected.is_empty()).then_some(CoverageGap {
                key,
                missing,
                unexpected,
            })
        })
        .collect();
    Coverage { groups, gaps }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(subject: &str, measurement: f64, value: f64) -> MeasurementRow {
        MeasurementRow {
            subject: subject.into(),
            index_name: "NDRE".into(),
            altitude: CellValue::Integer(30),
            method: "Bounded".into(),
            measurement,
            value,
            spread: None,
            extra: BTreeMap::new(),
        }
    }

    fn group(rows: Vec<MeasurementRow>) -> Grouping {
        let table = MeasurementTable::from_rows(rows, false);
        group_rows(&table, &Selection::new(), &ColumnConfig::default())
    }

    #[test]
    fn test_groups_are_sorted_by_measurement() {
        let g = group(vec![
            row("A", 3.0, 0.7),
            row("A", 1.0, 0.5),
            row("A", 2.0, 0.6),
        ]);
        assert_eq!(g.ready.len(), 1);
        assert_eq!(g.ready[0].values, vec![0.5, 0.6, 0.7]);
        assert!(g.ready[0].spread.is_none());
    }

    #[test]
    fn test_single_measurement_group_never_reaches_engine() {
        let g = group(vec![row("A", 1.0, 0.5), row("B", 1.0, 0.4), row("B", 2.0, 0.45)]);
        assert_eq!(g.ready.len(), 1);
        assert_eq!(g.ready[0].key.subject, "B");
        assert_eq!(g.skipped.len(), 1);
        assert_eq!(g.skipped[0].0.subject, "A");
        assert_eq!(g.skipped[0].1, SkipReason::TooShort(1));
        assert_eq!(g.total(), 2);
    }

    #[test]
    fn test_nan_value_skips_group() {
        let g = group(vec![row("A", 1.0, 0.5), row("A", 2.0, f64::NAN)]);
        assert!(g.ready.is_empty());
        assert_eq!(g.skipped[0].1, SkipReason::UndefinedValue { measurement: 2.0 });
    }

    #[test]
    fn test_nan_spread_skips_group() {
        let mut rows = vec![row("A", 1.0, 0.5), row("A", 2.0, 0.6)];
        rows[0].spread = Some(0.1);
        rows[1].spread = Some(f64::NAN);
        let table = MeasurementTable::from_rows(rows, true);
        let g = group_rows(&table, &Selection::new(), &ColumnConfig::default());
        assert!(g.ready.is_empty());
        assert_eq!(g.skipped[0].1, SkipReason::UndefinedValue { measurement: 2.0 });
    }

    #[test]
    fn test_spread_is_carried_when_configured() {
        let mut rows = vec![row("A", 2.0, 0.6), row("A", 1.0, 0.5)];
        rows[0].spread = Some(0.2);
        rows[1].spread = Some(0.1);
        let table = MeasurementTable::from_rows(rows, true);
        let g = group_rows(&table, &Selection::new(), &ColumnConfig::default());
        assert_eq!(g.ready[0].spread, Some(vec![0.1, 0.2]));
    }

    #[test]
    fn test_duplicate_measurement_skips_group() {
        let g = group(vec![row("A", 1.0, 0.5), row("A", 1.0, 0.6), row("A", 2.0, 0.6)]);
        assert_eq!(g.skipped[0].1, SkipReason::DuplicateMeasurement(1.0));
    }

    #[test]
    fn test_groups_split_on_every_key_field() {
        let mut other_alt = row("A", 1.0, 0.5);
        other_alt.altitude = CellValue::Integer(50);
        let mut other_method = row("A", 1.0, 0.5);
        other_method.method = "Edges".into();
        let g = group(vec![row("A", 1.0, 0.5), other_alt, other_method]);
        assert_eq!(g.skipped.len(), 3);
    }

    #[test]
    fn test_natural_cmp() {
        assert_eq!(natural_cmp("Polonez 2 Edges", "Polonez 10 Edges"), Ordering::Less);
        assert_eq!(natural_cmp("ENRO5", "ENRO5"), Ordering::Equal);
        assert_eq!(natural_cmp("ENRO", "POLO"), Ordering::Less);
        assert_eq!(natural_cmp("a", "a1"), Ordering::Less);
        assert_eq!(natural_cmp("x07", "x7"), Ordering::Greater);
    }

    #[test]
    fn test_index_first_order() {
        let a = GroupKey {
            subject: "Polonez 10".into(),
            index_name: "GNDVI".into(),
            altitude: CellValue::Integer(30),
            method: "Bounded".into(),
        };
        let b = GroupKey {
            subject: "Enrosadira 2".into(),
            index_name: "NDRE".into(),
            ..a.clone()
        };
        let c = GroupKey {
            subject: "Polonez 9".into(),
            ..a.clone()
        };
        assert_eq!(a.index_first_cmp(&b), Ordering::Less);
        assert_eq!(c.index_first_cmp(&a), Ordering::Less);
        assert_eq!(a.fields()[2], "30");
    }

    #[test]
    fn test_coverage_reports_missing_and_unexpected() {
        let table = MeasurementTable::from_rows(
            vec![
                row("A", 1.0, 0.5),
                row("A", 2.0, 0.5),
                row("A", 3.0, 0.5),
                row("B", 1.0, 0.5),
                row("B", 3.0, 0.5),
                row("B", 12.0, 0.5),
            ],
            false,
        );
        let expected: BTreeSet<i64> = (1..=3).collect();
        let report = coverage(&table, &expected);
        assert_eq!(report.groups, 2);
        let gaps = &report.gaps;
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].key.subject, "B");
        assert_eq!(gaps[0].missing, vec![2]);
        assert_eq!(gaps[0].unexpected, vec![12.0]);
    }
}
