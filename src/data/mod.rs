/// Data layer: table model, loading, selection and grouping.
///
/// Architecture:
/// ```text
///  .csv / .json / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → MeasurementTable
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  --select predicates → accepted rows
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ grouping  │  GroupKey partitions, sorted by measurement,
///   └──────────┘  short / NaN / duplicate groups set aside
/// ```

pub mod filter;
pub mod grouping;
pub mod loader;
pub mod model;
