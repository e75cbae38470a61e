//! Repair library for Home Assistant recorder databases.
//!
//! A sensor reading is denormalized into three tables: raw text states in
//! `states`, and numeric aggregates in `statistics` and
//! `statistics_short_term`. [`RepairEngine`] resolves an entity to its
//! internal keys, previews what is stored, and removes one erroneous value
//! from all three tables in a single transaction.
//!
//! `statistics_short_term` rows are matched on value alone, not on entity, so
//! a deletion may also remove short-term aggregates of other entities that
//! share the value. The engine reports how many such rows were removed in
//! [`DeletionCounts::short_term_foreign`] and logs a warning.

pub mod errors;
pub mod models;
pub mod store;

pub use errors::{RecorderError, RecorderResult};
pub use models::{
    DeleteOutcome, DeletionCounts, EngineOptions, EntityRow, EntitySummary, StateRow,
};
pub use store::engine::{parse_numeric_value, RepairEngine};
