//! Metrics engine: temporal-dynamics summary of one ordered index sequence.
//!
//! ```text
//!   y[0..n]  (+ optional spread s[0..n])
//!        │
//!        ▼
//!   δ = differences (sign per DeltaConvention)
//!        │
//!        ├── level:          mean, SD, CV
//!        ├── amplitude:      Σ|δ|, growth/drop split (validated)
//!        ├── percentage:     δ / (y + EPS), same split
//!        ├── frequency:      #δ>0, #δ<0
//!        ├── roughness:      Σ|Δδ|
//!        ├── concentration:  Σ (|δ|/A)²
//!        ├── margin:         δ over headroom to 0 or 1
//!        ├── level-motion:   Spearman(midpoint, |δ|)
//!        └── spread:         mean CV, mean/SD of s
//! ```
//!
//! Ill-defined ratios resolve to [`MetricValue::Undefined`]; only a broken
//! amplitude decomposition is an error.

pub mod stats;

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Added to denominators that may reach zero.
pub const EPS: f64 = 1e-6;

/// Default tolerance for the growth + drop == total check.
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

/// Minimum sequence length the engine accepts.
pub const MIN_VALUES: usize = 2;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sign convention for the step difference `δ_i`.
///
/// The two conventions mirror each other: with `CurrentMinusNext` a fall in
/// the index is a positive `δ`, so it lands in the "growth" columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum DeltaConvention {
    /// `δ_i = y[i+1] - y[i]`
    #[default]
    NextMinusCurrent,
    /// `δ_i = y[i] - y[i+1]`
    CurrentMinusNext,
}

impl DeltaConvention {
    /// Step differences of `values` under this convention.
    pub fn differences(self, values: &[f64]) -> Vec<f64> {
        values
            .windows(2)
            .map(|w| match self {
                DeltaConvention::NextMinusCurrent => w[1] - w[0],
                DeltaConvention::CurrentMinusNext => w[0] - w[1],
            })
            .collect()
    }
}

/// Engine parameters shared by every group of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub convention: DeltaConvention,
    /// Relative tolerance of the amplitude decomposition check.
    pub tolerance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            convention: DeltaConvention::default(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Every metric the engine can emit, in output column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    MeanIndex,
    SdIndex,
    CvIndex,
    ATotal,
    AGrowth,
    ADrop,
    APctTotal,
    APctGrowth,
    APctDrop,
    NGrowth,
    NDrop,
    JRoughness,
    CConcentration,
    AUMargin,
    JUMargin,
    KLevelMotion,
    CvSpatialMean,
    MeanSpread,
    SdSpread,
}

impl Metric {
    /// Metrics derived from the index sequence alone.
    pub const TEMPORAL: [Metric; 16] = [
        Metric::MeanIndex,
        Metric::SdIndex,
        Metric::CvIndex,
        Metric::ATotal,
        Metric::AGrowth,
        Metric::ADrop,
        Metric::APctTotal,
        Metric::APctGrowth,
        Metric::APctDrop,
        Metric::NGrowth,
        Metric::NDrop,
        Metric::JRoughness,
        Metric::CConcentration,
        Metric::AUMargin,
        Metric::JUMargin,
        Metric::KLevelMotion,
    ];

    /// Metrics that need the spread sequence.
    pub const SPREAD: [Metric; 3] = [Metric::CvSpatialMean, Metric::MeanSpread, Metric::SdSpread];

    /// Output column list for a run with or without spread input.
    pub fn columns(with_spread: bool) -> Vec<Metric> {
        let mut cols = Self::TEMPORAL.to_vec();
        if with_spread {
            cols.extend(Self::SPREAD);
        }
        cols
    }

    /// Column label used in output tables.
    pub fn name(self) -> &'static str {
        match self {
            Metric::MeanIndex => "Mean_index",
            Metric::SdIndex => "SD_index",
            Metric::CvIndex => "CV_index",
            Metric::ATotal => "A_total",
            Metric::AGrowth => "A_growth",
            Metric::ADrop => "A_drop",
            Metric::APctTotal => "A_pct_total",
            Metric::APctGrowth => "A_pct_growth",
            Metric::APctDrop => "A_pct_drop",
            Metric::NGrowth => "n_growth",
            Metric::NDrop => "n_drop",
            Metric::JRoughness => "J_roughness",
            Metric::CConcentration => "C_concentration",
            Metric::AUMargin => "A_u_margin",
            Metric::JUMargin => "J_u_margin",
            Metric::KLevelMotion => "K_level_motion",
            Metric::CvSpatialMean => "CV_spatial_mean",
            Metric::MeanSpread => "Mean_spread",
            Metric::SdSpread => "SD_spread",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single metric result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Number(f64),
    Count(u64),
    /// The metric has no meaningful value for this sequence.
    Undefined,
}

impl MetricValue {
    fn from_option(v: Option<f64>) -> Self {
        match v {
            Some(x) if x.is_finite() => MetricValue::Number(x),
            _ => MetricValue::Undefined,
        }
    }
}

/// The metric mapping of one sequence, in [`Metric`] column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    entries: Vec<(Metric, MetricValue)>,
}

impl Metrics {
    fn with_capacity(n: usize) -> Self {
        Self {
            entries: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, metric: Metric, value: MetricValue) {
        self.entries.push((metric, value));
    }

    /// Value of `metric`, or `None` if it was not computed for this row.
    pub fn get(&self, metric: Metric) -> Option<MetricValue> {
        self.entries
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Metric, MetricValue)> {
        self.entries.iter()
    }

    /// Metric columns present in this row.
    pub fn columns(&self) -> Vec<Metric> {
        self.entries.iter().map(|(m, _)| *m).collect()
    }

    pub fn has_spread(&self) -> bool {
        self.get(Metric::MeanSpread).is_some()
    }
}

// ---------------------------------------------------------------------------
// Computation
// ---------------------------------------------------------------------------

/// Compute the metric row of one ordered sequence.
///
/// `values` must hold at least two finite numbers; `spread`, when given, must
/// be finite and of the same length. Violations are rejected with an
/// [`EngineError`] rather than computed.
pub fn compute_metrics(
    values: &[f64],
    spread: Option<&[f64]>,
    config: &EngineConfig,
) -> Result<Metrics> {
    check_preconditions(values, spread)?;

    let n = values.len();
    let mut out = Metrics::with_capacity(Metric::columns(spread.is_some()).len());

    // --- level ---
    let too_short = EngineError::TooShort { len: n, min: MIN_VALUES };
    let mean_index = stats::mean(values).ok_or_else(|| too_short.clone())?;
    let sd_index = stats::sample_sd(values).ok_or(too_short)?;
    let cv_index = (mean_index > 0.0).then(|| sd_index / mean_index);

    out.push(Metric::MeanIndex, MetricValue::Number(mean_index));
    out.push(Metric::SdIndex, MetricValue::Number(sd_index));
    out.push(Metric::CvIndex, MetricValue::from_option(cv_index));

    // --- absolute amplitude ---
    let delta = config.convention.differences(values);
    check_step_range(&delta)?;
    let abs_delta: Vec<f64> = delta.iter().map(|d| d.abs()).collect();
    let amplitude = Amplitude::split(&delta);
    amplitude.validate(config.tolerance)?;

    out.push(Metric::ATotal, MetricValue::Number(amplitude.total));
    out.push(Metric::AGrowth, MetricValue::Number(amplitude.growth));
    out.push(Metric::ADrop, MetricValue::Number(amplitude.drop));

    // --- percentage amplitude ---
    let pct: Vec<f64> = delta
        .iter()
        .zip(values)
        .map(|(d, y)| d / (y + EPS))
        .collect();
    let pct_amplitude = Amplitude::split(&pct);

    out.push(Metric::APctTotal, MetricValue::from_option(Some(pct_amplitude.total)));
    out.push(Metric::APctGrowth, MetricValue::from_option(Some(pct_amplitude.growth)));
    out.push(Metric::APctDrop, MetricValue::from_option(Some(pct_amplitude.drop)));

    // --- change frequency ---
    let n_growth = delta.iter().filter(|d| **d > 0.0).count() as u64;
    let n_drop = delta.iter().filter(|d| **d < 0.0).count() as u64;
    out.push(Metric::NGrowth, MetricValue::Count(n_growth));
    out.push(Metric::NDrop, MetricValue::Count(n_drop));

    // --- roughness & concentration ---
    out.push(Metric::JRoughness, MetricValue::from_option(roughness(&delta)));
    out.push(
        Metric::CConcentration,
        MetricValue::from_option(concentration(&abs_delta, amplitude.total)),
    );

    // --- margin-relative movement ---
    let u = margin_movement(&delta, values);
    out.push(Metric::AUMargin, MetricValue::from_option(Some(u.iter().sum())));
    out.push(Metric::JUMargin, MetricValue::from_option(roughness(&u)));

    // --- level vs motion ---
    out.push(
        Metric::KLevelMotion,
        MetricValue::from_option(level_motion_correlation(values, &abs_delta)),
    );

    if let Some(s) = spread {
        push_spread_metrics(&mut out, values, s);
    }

    Ok(out)
}

fn check_preconditions(values: &[f64], spread: Option<&[f64]>) -> Result<()> {
    if values.len() < MIN_VALUES {
        return Err(EngineError::TooShort {
            len: values.len(),
            min: MIN_VALUES,
        });
    }
    if let Some(position) = values.iter().position(|v| !v.is_finite()) {
        return Err(EngineError::NonFinite {
            series: "index",
            position,
        });
    }
    if let Some(s) = spread {
        if s.len() != values.len() {
            return Err(EngineError::SpreadLengthMismatch {
                values: values.len(),
                spread: s.len(),
            });
        }
        if let Some(position) = s.iter().position(|v| !v.is_finite()) {
            return Err(EngineError::NonFinite {
                series: "spread",
                position,
            });
        }
    }
    Ok(())
}

/// Finite inputs can still be far enough apart that `Σ|δ|` leaves the f64 range.
fn check_step_range(delta: &[f64]) -> Result<()> {
    let mut running = 0.0_f64;
    for (position, d) in delta.iter().enumerate() {
        running += d.abs();
        if !running.is_finite() {
            return Err(EngineError::StepOverflow { position });
        }
    }
    Ok(())
}

/// Total absolute change with its positive and negative parts.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Amplitude {
    total: f64,
    growth: f64,
    drop: f64,
}

impl Amplitude {
    fn split(steps: &[f64]) -> Self {
        Self {
            total: steps.iter().map(|d| d.abs()).sum(),
            growth: steps.iter().map(|d| d.max(0.0)).sum(),
            drop: steps.iter().map(|d| (-d).max(0.0)).sum(),
        }
    }

    /// growth + drop must rebuild total.
    fn validate(&self, tolerance: f64) -> Result<()> {
        let residual = (self.growth + self.drop - self.total).abs();
        if residual <= tolerance * self.total.abs().max(1.0) {
            Ok(())
        } else {
            Err(EngineError::Inconsistent {
                growth: self.growth,
                drop: self.drop,
                total: self.total,
            })
        }
    }
}

/// Sum of absolute first differences of `steps`; needs two steps.
fn roughness(steps: &[f64]) -> Option<f64> {
    if steps.len() < 2 {
        return None;
    }
    Some(steps.windows(2).map(|w| (w[1] - w[0]).abs()).sum())
}

/// Herfindahl index of the step shares `|δ_i| / A`.
fn concentration(abs_delta: &[f64], total: f64) -> Option<f64> {
    if total <= 0.0 {
        return None;
    }
    Some(abs_delta.iter().map(|a| (a / total).powi(2)).sum())
}

/// Step magnitude relative to the headroom toward the bound it moves to.
fn margin_movement(delta: &[f64], values: &[f64]) -> Vec<f64> {
    delta
        .iter()
        .zip(values)
        .map(|(&d, &y)| {
            if d > 0.0 {
                d / (1.0 - y + EPS)
            } else if d < 0.0 {
                -d / (y + EPS)
            } else {
                0.0
            }
        })
        .collect()
}

/// Spearman correlation between step midpoints and step magnitudes.
fn level_motion_correlation(values: &[f64], abs_delta: &[f64]) -> Option<f64> {
    if abs_delta.len() < 3 {
        return None;
    }
    let midpoints: Vec<f64> = values.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
    if !varies(abs_delta) || !varies(&midpoints) {
        return None;
    }
    stats::spearman(&midpoints, abs_delta)
}

fn varies(xs: &[f64]) -> bool {
    stats::population_sd(xs).is_some_and(|sd| sd > 0.0)
}

fn push_spread_metrics(out: &mut Metrics, values: &[f64], spread: &[f64]) {
    let cvs: Vec<f64> = spread
        .iter()
        .zip(values)
        .map(|(s, y)| s / (y + EPS))
        .collect();
    out.push(Metric::CvSpatialMean, MetricValue::from_option(stats::mean(&cvs)));
    out.push(Metric::MeanSpread, MetricValue::from_option(stats::mean(spread)));
    out.push(Metric::SdSpread, MetricValue::from_option(stats::sample_sd(spread)));
}
