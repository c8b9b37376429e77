//! Metrics run: load → select → group → engine per group → ordered table.

use anyhow::{Result, bail};
use log::{error, info, warn};
use rayon::prelude::*;

use crate::config::{InconsistencyPolicy, ResultOrder, RunConfig};
use crate::data::filter::parse_selection;
use crate::data::grouping::{GroupKey, SeriesGroup, SkipReason, group_rows};
use crate::data::loader::load_table;
use crate::engine::{EngineConfig, Metrics, compute_metrics};
use crate::error::EngineError;
use crate::output::{OutputOptions, ResultRow, write_results};

/// What a run did.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub rows_loaded: usize,
    pub groups: usize,
    pub computed: usize,
    pub skipped: Vec<(GroupKey, SkipReason)>,
    /// Groups dropped under [`InconsistencyPolicy::Exclude`].
    pub excluded: Vec<(GroupKey, EngineError)>,
}

/// Execute one metrics run end to end.
pub fn run(config: &RunConfig) -> Result<RunSummary> {
    config.validate()?;

    let table = load_table(&config.input, &config.columns)?;
    let selection = parse_selection(&config.select)?;
    let grouping = group_rows(&table, &selection, &config.columns);
    info!(
        "{} groups: {} ready, {} skipped",
        grouping.total(),
        grouping.ready.len(),
        grouping.skipped.len()
    );
    for (key, reason) in &grouping.skipped {
        warn!("Skipping {key}: {reason}");
    }

    let outcomes = compute_groups(&grouping.ready, &config.engine(), config.parallel);
    let (mut rows, excluded) = collect_results(outcomes, config.on_inconsistency)?;
    order_results(&mut rows, config.order);

    let options = OutputOptions {
        na_rep: config.na_rep.clone(),
        with_spread: table.has_spread,
    };
    write_results(&config.output, config.columns.key_columns(), &rows, &options)?;

    Ok(RunSummary {
        rows_loaded: table.len(),
        groups: grouping.total(),
        computed: rows.len(),
        skipped: grouping.skipped,
        excluded,
    })
}

/// Run the engine on every group; outcomes keep the order of `groups`.
pub fn compute_groups(
    groups: &[SeriesGroup],
    engine: &EngineConfig,
    parallel: bool,
) -> Vec<(GroupKey, std::result::Result<Metrics, EngineError>)> {
    let one = |g: &SeriesGroup| {
        let metrics = compute_metrics(&g.values, g.spread.as_deref(), engine);
        (g.key.clone(), metrics)
    };
    if parallel {
        groups.par_iter().map(one).collect()
    } else {
        groups.iter().map(one).collect()
    }
}

/// Apply the inconsistency policy to engine outcomes.
pub fn collect_results(
    outcomes: Vec<(GroupKey, std::result::Result<Metrics, EngineError>)>,
    policy: InconsistencyPolicy,
) -> Result<(Vec<ResultRow>, Vec<(GroupKey, EngineError)>)> {
    let mut rows = Vec::with_capacity(outcomes.len());
    let mut excluded = Vec::new();

    for (key, outcome) in outcomes {
        match outcome {
            Ok(metrics) => rows.push(ResultRow { key, metrics }),
            Err(err) => {
                let kind = if err.is_internal() {
                    "internal consistency failure"
                } else {
                    "rejected input"
                };
                match policy {
                    InconsistencyPolicy::Abort => bail!("{kind} in group {key}: {err}"),
                    InconsistencyPolicy::Exclude => {
                        error!("Excluding group {key}: {kind}: {err}");
                        excluded.push((key, err));
                    }
                }
            }
        }
    }
    Ok((rows, excluded))
}

/// Sort result rows; ties cannot occur since group keys are unique.
pub fn order_results(rows: &mut [ResultRow], order: ResultOrder) {
    match order {
        ResultOrder::GroupKey => rows.sort_by(|a, b| a.key.cmp(&b.key)),
        ResultOrder::IndexFirst => rows.sort_by(|a, b| a.key.index_first_cmp(&b.key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::CellValue;

    fn key(subject: &str, index: &str) -> GroupKey {
        GroupKey {
            subject: subject.into(),
            index_name: index.into(),
            altitude: CellValue::Integer(30),
            method: "Bounded".into(),
        }
    }

    fn series(subject: &str, index: &str, values: Vec<f64>) -> SeriesGroup {
        SeriesGroup {
            key: key(subject, index),
            values,
            spread: None,
        }
    }

    fn groups() -> Vec<SeriesGroup> {
        (0..40)
            .map(|i| {
                let base = 0.3 + i as f64 * 0.01;
                series(&format!("S{i}"), "NDRE", vec![base, base + 0.05, base - 0.02, base + 0.1])
            })
            .collect()
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let cfg = EngineConfig::default();
        let seq = compute_groups(&groups(), &cfg, false);
        let par = compute_groups(&groups(), &cfg, true);
        assert_eq!(seq, par);
    }

    #[test]
    fn test_abort_policy_names_the_group() {
        let outcomes = vec![
            (key("A", "NDRE"), compute_metrics(&[0.2, 0.4], None, &EngineConfig::default())),
            (
                key("B", "NDRE"),
                Err(EngineError::Inconsistent {
                    growth: 0.2,
                    drop: 0.2,
                    total: 0.3,
                }),
            ),
        ];
        let err = collect_results(outcomes, InconsistencyPolicy::Abort).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("internal consistency failure"));
        assert!(msg.contains("B / NDRE / 30 / Bounded"));
    }

    #[test]
    fn test_exclude_policy_reports_the_group() {
        let outcomes = vec![
            (key("A", "NDRE"), compute_metrics(&[0.2, 0.4], None, &EngineConfig::default())),
            (key("B", "NDRE"), Err(EngineError::TooShort { len: 1, min: 2 })),
        ];
        let (rows, excluded) = collect_results(outcomes, InconsistencyPolicy::Exclude).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.subject, "A");
        assert_eq!(excluded, vec![(key("B", "NDRE"), EngineError::TooShort { len: 1, min: 2 })]);
    }

    #[test]
    fn test_result_ordering() {
        let cfg = EngineConfig::default();
        let outcomes = compute_groups(
            &[
                series("Polonez 10", "GNDVI", vec![0.5, 0.6]),
                series("Enrosadira 2", "NDRE", vec![0.5, 0.6]),
                series("Polonez 9", "GNDVI", vec![0.5, 0.6]),
            ],
            &cfg,
            false,
        );
        let (mut rows, _) = collect_results(outcomes, InconsistencyPolicy::Abort).unwrap();

        order_results(&mut rows, ResultOrder::GroupKey);
        let subjects: Vec<&str> = rows.iter().map(|r| r.key.subject.as_str()).collect();
        assert_eq!(subjects, vec!["Enrosadira 2", "Polonez 10", "Polonez 9"]);

        order_results(&mut rows, ResultOrder::IndexFirst);
        let subjects: Vec<&str> = rows.iter().map(|r| r.key.subject.as_str()).collect();
        assert_eq!(subjects, vec!["Polonez 9", "Polonez 10", "Enrosadira 2"]);
    }
}
