//! Temporal-dynamics metrics for repeated vegetation-index measurements.
//!
//! A long-format table of per-measurement index values is grouped by
//! (subject, index, altitude, annotation method); each group's ordered
//! sequence goes through the [`engine`] once and yields one summary row.

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod merge;
pub mod output;
pub mod pipeline;
