//! Run configuration: input/output locations, column names and policies.
//!
//! A run is described by [`RunConfig`], which can be read from a JSON file and
//! then overridden field by field from the command line.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::engine::{DEFAULT_TOLERANCE, DeltaConvention, EngineConfig};

// ---------------------------------------------------------------------------
// Column names
// ---------------------------------------------------------------------------

/// Names of the input columns the pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub subject: String,
    pub index_name: String,
    pub altitude: String,
    pub method: String,
    pub measurement: String,
    pub value: String,
    /// Per-measurement spread (e.g. SD across pixels); unset disables spread metrics.
    pub spread: Option<String>,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            subject: "Name".into(),
            index_name: "index_name".into(),
            altitude: "altitude_m".into(),
            method: "Type".into(),
            measurement: "measurement".into(),
            value: "Mean index value".into(),
            spread: None,
        }
    }
}

impl ColumnConfig {
    /// Group-key column names in output order.
    pub fn key_columns(&self) -> [&str; 4] {
        [
            self.subject.as_str(),
            self.index_name.as_str(),
            self.altitude.as_str(),
            self.method.as_str(),
        ]
    }

    /// Key columns that hold names and are never read as numbers.
    pub fn text_columns(&self) -> [&str; 3] {
        [self.subject.as_str(), self.index_name.as_str(), self.method.as_str()]
    }

    /// Every column the loader must find in the input.
    pub fn required(&self) -> Vec<&str> {
        let mut cols = self.key_columns().to_vec();
        cols.push(&self.measurement);
        cols.push(&self.value);
        if let Some(spread) = &self.spread {
            cols.push(spread);
        }
        cols
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// What to do with a group whose metrics cannot be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum InconsistencyPolicy {
    /// Fail the whole run.
    #[default]
    Abort,
    /// Drop the group and report it in the run summary.
    Exclude,
}

/// Row order of the results table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum ResultOrder {
    /// subject, index, altitude, method
    #[default]
    GroupKey,
    /// index, altitude, method, then subjects in natural order
    IndexFirst,
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// Everything one metrics run needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub columns: ColumnConfig,
    pub convention: DeltaConvention,
    pub tolerance: f64,
    pub on_inconsistency: InconsistencyPolicy,
    pub order: ResultOrder,
    /// Row selections in `COLUMN=VALUE[,VALUE...]` form.
    pub select: Vec<String>,
    pub parallel: bool,
    /// Text written for undefined metrics in CSV output.
    pub na_rep: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: PathBuf::new(),
            columns: ColumnConfig::default(),
            convention: DeltaConvention::default(),
            tolerance: DEFAULT_TOLERANCE,
            on_inconsistency: InconsistencyPolicy::default(),
            order: ResultOrder::default(),
            select: Vec::new(),
            parallel: false,
            na_rep: String::new(),
        }
    }
}

impl RunConfig {
    /// Read a JSON config file; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            convention: self.convention,
            tolerance: self.tolerance,
        }
    }

    /// Reject configurations a run cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.input.as_os_str().is_empty() {
            bail!("no input table configured");
        }
        if self.output.as_os_str().is_empty() {
            bail!("no output path configured");
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            bail!("tolerance must be a positive number, got {}", self.tolerance);
        }
        Ok(())
    }
}
