use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// CellValue – a single cell of the input table
// ---------------------------------------------------------------------------

/// A dynamically-typed table cell mirroring common Pandas dtypes.
/// Used as a `BTreeMap` / `BTreeSet` key downstream so it must be `Ord`.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

// -- Manual Eq/Ord so we can put CellValue in BTreeSet --

impl Eq for CellValue {}

impl PartialOrd for CellValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CellValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use CellValue::*;
        fn discriminant(v: &CellValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        }
    }
}

impl std::hash::Hash for CellValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            CellValue::String(s) => s.hash(state),
            CellValue::Integer(i) => i.hash(state),
            CellValue::Float(f) => f.to_bits().hash(state),
            CellValue::Bool(b) => b.hash(state),
            CellValue::Null => {}
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::String(s) => write!(f, "{s}"),
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Null => Ok(()),
        }
    }
}

impl CellValue {
    /// Infer the cell type from raw text (CSV cells, CLI arguments).
    pub fn guess(s: &str) -> CellValue {
        let s = s.trim();
        if s.is_empty() {
            return CellValue::Null;
        }
        if let Ok(i) = s.parse::<i64>() {
            return CellValue::Integer(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return CellValue::Float(f);
        }
        if s == "true" || s == "false" {
            return CellValue::Bool(s == "true");
        }
        CellValue::String(s.to_string())
    }

    /// Interpret the value as an `f64` when it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Float(v) => Some(*v),
            CellValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Equality that treats `30`, `30.0` and the text `"30"` as the same altitude.
    ///
    /// Text is only read as a number when the other side is numeric, so the
    /// names `"007"` and `"7"` stay distinct.
    pub fn loosely_eq(&self, other: &CellValue) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            (Some(a), None) => other.parsed_f64() == Some(a),
            (None, Some(b)) => self.parsed_f64() == Some(b),
            (None, None) => self == other || self.to_string() == other.to_string(),
        }
    }

    fn parsed_f64(&self) -> Option<f64> {
        match self {
            CellValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// MeasurementRow – one row of the long-format table
// ---------------------------------------------------------------------------

/// One measurement of one index for one subject/altitude/method.
#[derive(Debug, Clone)]
pub struct MeasurementRow {
    pub subject: String,
    pub index_name: String,
    pub altitude: CellValue,
    pub method: String,
    /// Position in the measurement sequence.
    pub measurement: f64,
    /// Index value; NaN when the cell was empty or not numeric.
    pub value: f64,
    /// Within-measurement dispersion, present only when a spread column is configured.
    pub spread: Option<f64>,
    /// Every other column: column_name → value.
    pub extra: BTreeMap<String, CellValue>,
}

// ---------------------------------------------------------------------------
// MeasurementTable – the complete loaded table
// ---------------------------------------------------------------------------

/// The parsed long-format table.
#[derive(Debug, Clone)]
pub struct MeasurementTable {
    pub rows: Vec<MeasurementRow>,
    /// Whether rows carry a spread value.
    pub has_spread: bool,
}

impl MeasurementTable {
    pub fn from_rows(rows: Vec<MeasurementRow>, has_spread: bool) -> Self {
        MeasurementTable { rows, has_spread }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
