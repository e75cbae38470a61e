//! Shared typed models returned by the repair engine and rendered by the CLI.

use std::time::Duration;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Recorder database location inside a Home Assistant container.
pub const DEFAULT_DB_PATH: &str = "/config/home-assistant_v2.db";

/// Default number of rows returned by `list_recent_states`.
pub const DEFAULT_RECENT_LIMIT: i64 = 200;

/// Default number of rows shown by the `find` preview.
pub const DEFAULT_PREVIEW_LIMIT: i64 = 5;

/// Default time SQLite waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// EngineOptions
// ---------------------------------------------------------------------------

/// Tunables applied when a `RepairEngine` is opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineOptions {
    pub busy_timeout: Duration,
    pub recent_limit: i64,
    pub preview_limit: i64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            recent_limit: DEFAULT_RECENT_LIMIT,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
        }
    }
}

// ---------------------------------------------------------------------------
// Read models
// ---------------------------------------------------------------------------

/// One `states_meta` row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntityRow {
    pub entity_id: String,
    pub metadata_id: i64,
}

/// One raw `states` row as shown to the operator.
///
/// `state` is nullable in the recorder schema. `last_updated` is the legacy
/// text column or the rendered `last_updated_ts`, whichever the database
/// carries.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateRow {
    pub state_id: i64,
    pub state: Option<String>,
    pub last_updated: Option<String>,
}

/// Identifiers plus a short history preview for a single entity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntitySummary {
    pub entity_id: String,
    pub metadata_id: i64,
    pub statistic_id: Option<i64>,
    pub recent: Vec<StateRow>,
}

// ---------------------------------------------------------------------------
// Deletion results
// ---------------------------------------------------------------------------

/// Rows removed by one `delete_value_everywhere` call, per table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeletionCounts {
    pub states: u64,
    pub statistics: u64,
    pub statistics_short_term: u64,
    /// Subset of `statistics_short_term` whose `metadata_id` is not the
    /// target entity's statistic id. Already included in
    /// `statistics_short_term`; never add it to the total again.
    pub short_term_foreign: u64,
}

impl DeletionCounts {
    pub fn total(&self) -> u64 {
        self.states + self.statistics + self.statistics_short_term
    }
}

/// Result of `delete_value_everywhere`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The entity has no `states_meta` row; nothing was written.
    EntityNotFound,
    Deleted(DeletionCounts),
}

impl DeleteOutcome {
    /// Per-table counts, all zero when the entity was not found.
    pub fn counts(&self) -> DeletionCounts {
        match self {
            DeleteOutcome::EntityNotFound => DeletionCounts::default(),
            DeleteOutcome::Deleted(counts) => *counts,
        }
    }

    pub fn total(&self) -> u64 {
        self.counts().total()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_excludes_foreign_subset() {
        let counts = DeletionCounts {
            states: 2,
            statistics: 1,
            statistics_short_term: 3,
            short_term_foreign: 2,
        };
        assert_eq!(counts.total(), 6);
    }

    #[test]
    fn not_found_outcome_reports_zero() {
        let outcome = DeleteOutcome::EntityNotFound;
        assert_eq!(outcome.counts(), DeletionCounts::default());
        assert_eq!(outcome.total(), 0);
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let outcome = DeleteOutcome::Deleted(DeletionCounts {
            states: 1,
            ..DeletionCounts::default()
        });
        let json = serde_json::to_value(outcome).unwrap();
        assert_eq!(json["outcome"], "deleted");
        assert_eq!(json["states"], 1);

        let json = serde_json::to_value(DeleteOutcome::EntityNotFound).unwrap();
        assert_eq!(json["outcome"], "entity_not_found");
    }

    #[test]
    fn default_options() {
        let opts = EngineOptions::default();
        assert_eq!(opts.recent_limit, 200);
        assert_eq!(opts.preview_limit, 5);
        assert_eq!(opts.busy_timeout, Duration::from_secs(5));
    }
}
