use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};

use index_dynamics::config::{ColumnConfig, InconsistencyPolicy, ResultOrder, RunConfig};
use index_dynamics::data::grouping::coverage;
use index_dynamics::data::loader::load_table;
use index_dynamics::engine::DeltaConvention;
use index_dynamics::merge::{MergeOptions, merge_folder};
use index_dynamics::pipeline;

/// Temporal-dynamics metrics for vegetation-index measurement series
#[derive(Parser)]
#[command(name = "index-dynamics", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compute one metrics row per subject/index/altitude/method group
    Metrics(MetricsArgs),
    /// Report groups whose measurement indices are incomplete
    Check(CheckArgs),
    /// Merge a folder of per-index CSV exports into one table
    Merge(MergeArgs),
}

/// Input column names; unset flags keep the configured names.
#[derive(Args)]
struct ColumnArgs {
    #[arg(long)]
    subject_column: Option<String>,
    #[arg(long)]
    index_column: Option<String>,
    #[arg(long)]
    altitude_column: Option<String>,
    #[arg(long)]
    method_column: Option<String>,
    #[arg(long)]
    measurement_column: Option<String>,
    #[arg(long)]
    value_column: Option<String>,
    /// Per-measurement spread column; enables the spatial-spread metrics
    #[arg(long)]
    spread_column: Option<String>,
}

impl ColumnArgs {
    fn apply(self, columns: &mut ColumnConfig) {
        let overrides = [
            (self.subject_column, &mut columns.subject),
            (self.index_column, &mut columns.index_name),
            (self.altitude_column, &mut columns.altitude),
            (self.method_column, &mut columns.method),
            (self.measurement_column, &mut columns.measurement),
            (self.value_column, &mut columns.value),
        ];
        for (value, slot) in overrides {
            if let Some(v) = value {
                *slot = v;
            }
        }
        if self.spread_column.is_some() {
            columns.spread = self.spread_column;
        }
    }
}

#[derive(Args)]
struct MetricsArgs {
    /// Input table (.csv, .json or .parquet)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output table (.csv or .json)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON run configuration; flags given here override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    columns: ColumnArgs,

    /// Sign of the step difference: next-minus-current or current-minus-next
    #[arg(long, value_enum)]
    convention: Option<DeltaConvention>,

    /// Groups failing the engine's checks: abort or exclude
    #[arg(long, value_enum)]
    on_inconsistency: Option<InconsistencyPolicy>,

    /// Result row order: group-key or index-first
    #[arg(long, value_enum)]
    order: Option<ResultOrder>,

    /// Keep only rows with COLUMN=VALUE[,VALUE...] (repeatable)
    #[arg(long = "select", value_name = "COLUMN=VALUES")]
    select: Vec<String>,

    /// Compute groups in parallel
    #[arg(long)]
    parallel: bool,

    /// Text written for undefined metrics in CSV output
    #[arg(long)]
    na_rep: Option<String>,
}

impl MetricsArgs {
    fn into_config(self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_json_file(path)?,
            None => RunConfig::default(),
        };
        if let Some(input) = self.input {
            config.input = input;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        self.columns.apply(&mut config.columns);
        if let Some(convention) = self.convention {
            config.convention = convention;
        }
        if let Some(policy) = self.on_inconsistency {
            config.on_inconsistency = policy;
        }
        if let Some(order) = self.order {
            config.order = order;
        }
        config.select.extend(self.select);
        config.parallel |= self.parallel;
        if let Some(na_rep) = self.na_rep {
            config.na_rep = na_rep;
        }
        Ok(config)
    }
}

#[derive(Args)]
struct CheckArgs {
    /// Input table (.csv, .json or .parquet)
    #[arg(short, long)]
    input: PathBuf,

    #[command(flatten)]
    columns: ColumnArgs,

    /// First expected measurement index
    #[arg(long, default_value_t = 1)]
    first: i64,

    /// Last expected measurement index
    #[arg(long, default_value_t = 11)]
    last: i64,
}

#[derive(Args)]
struct MergeArgs {
    /// Folder holding the per-index CSV exports
    folder: PathBuf,

    /// Measurement name/number written to every row
    #[arg(short, long)]
    measurement: String,

    /// Flight altitude written to every row
    #[arg(short, long)]
    altitude: String,

    /// Output file (default: <folder>/<folder-name>_merged.csv)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Metrics(args) => {
            let config = args.into_config()?;
            let summary = pipeline::run(&config)?;
            println!(
                "Computed {} of {} groups ({} skipped, {} excluded) → {}",
                summary.computed,
                summary.groups,
                summary.skipped.len(),
                summary.excluded.len(),
                config.output.display()
            );
        }
        Command::Check(args) => {
            if args.first > args.last {
                bail!("--first {} is greater than --last {}", args.first, args.last);
            }
            let mut columns = ColumnConfig::default();
            args.columns.apply(&mut columns);
            let table = load_table(&args.input, &columns)?;
            let expected: BTreeSet<i64> = (args.first..=args.last).collect();
            let report = coverage(&table, &expected);
            for gap in &report.gaps {
                println!(
                    "{}: missing {:?}, unexpected {:?}",
                    gap.key, gap.missing, gap.unexpected
                );
            }
            println!("{} groups in total", report.groups);
            println!("{} groups with gaps", report.gaps.len());
        }
        Command::Merge(args) => {
            let report = merge_folder(
                &args.folder,
                &MergeOptions {
                    measurement: args.measurement,
                    altitude: args.altitude,
                    output: args.output,
                },
            )?;
            println!(
                "Merged {} files, {} rows → {}",
                report.files,
                report.rows,
                report.output.display()
            );
        }
    }
    Ok(())
}
