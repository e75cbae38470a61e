//! Recorder schema inspection.
//!
//! The recorder tables are owned by Home Assistant. Nothing here creates or
//! alters them on a live database; the engine only checks that the tables it
//! touches are present and which timestamp column `states` carries.

use rusqlite::{params, Connection};

use crate::errors::{RecorderError, RecorderResult};

/// Tables the repair engine reads from or deletes in.
pub const REQUIRED_TABLES: &[&str] = &[
    "states_meta",
    "statistics_meta",
    "states",
    "statistics",
    "statistics_short_term",
];

/// Minimal subset of the recorder schema used to build fixture databases in
/// tests and benches. Column names and affinities follow the upstream
/// recorder; unrelated columns are omitted.
pub const FIXTURE_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS states_meta (
        metadata_id INTEGER PRIMARY KEY,
        entity_id VARCHAR(255)
    );",
    "CREATE TABLE IF NOT EXISTS statistics_meta (
        id INTEGER PRIMARY KEY,
        statistic_id VARCHAR(255),
        source VARCHAR(32),
        unit_of_measurement VARCHAR(255)
    );",
    "CREATE TABLE IF NOT EXISTS states (
        state_id INTEGER PRIMARY KEY,
        state VARCHAR(255),
        last_updated DATETIME,
        last_updated_ts FLOAT,
        metadata_id INTEGER REFERENCES states_meta(metadata_id)
    );",
    "CREATE TABLE IF NOT EXISTS statistics (
        id INTEGER PRIMARY KEY,
        created_ts FLOAT,
        metadata_id INTEGER REFERENCES statistics_meta(id) ON DELETE CASCADE,
        start_ts FLOAT,
        mean FLOAT,
        min FLOAT,
        max FLOAT,
        state FLOAT,
        sum FLOAT
    );",
    "CREATE TABLE IF NOT EXISTS statistics_short_term (
        id INTEGER PRIMARY KEY,
        created_ts FLOAT,
        metadata_id INTEGER REFERENCES statistics_meta(id) ON DELETE CASCADE,
        start_ts FLOAT,
        mean FLOAT,
        min FLOAT,
        max FLOAT,
        state FLOAT,
        sum FLOAT
    );",
    "CREATE INDEX IF NOT EXISTS ix_states_metadata_id_last_updated_ts \
         ON states(metadata_id, last_updated_ts);",
    "CREATE INDEX IF NOT EXISTS ix_states_meta_entity_id ON states_meta(entity_id);",
];

/// Which column of `states` orders readings in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimestampColumn {
    /// `last_updated_ts`, epoch seconds stored as REAL (recorder schema 30+).
    Epoch,
    /// `last_updated`, DATETIME text (older recorder schemas).
    Legacy,
}

impl TimestampColumn {
    /// Column to `ORDER BY`.
    pub fn order_column(self) -> &'static str {
        match self {
            TimestampColumn::Epoch => "last_updated_ts",
            TimestampColumn::Legacy => "last_updated",
        }
    }

    /// Select expression yielding the timestamp as text.
    pub fn select_expr(self) -> &'static str {
        match self {
            TimestampColumn::Epoch => {
                "strftime('%Y-%m-%d %H:%M:%f', last_updated_ts, 'unixepoch')"
            }
            TimestampColumn::Legacy => "last_updated",
        }
    }
}

/// Check that every table in [`REQUIRED_TABLES`] exists and detect the
/// timestamp column of `states`.
pub fn verify_schema(conn: &Connection) -> RecorderResult<TimestampColumn> {
    for table in REQUIRED_TABLES {
        if !table_exists(conn, table)? {
            return Err(RecorderError::Schema(format!(
                "required table '{table}' is missing; is this a recorder database?"
            )));
        }
    }
    detect_timestamp_column(conn)
}

fn table_exists(conn: &Connection, table: &str) -> RecorderResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1;",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Prefer `last_updated_ts` when present: migrated databases keep the legacy
/// column but stop filling it.
fn detect_timestamp_column(conn: &Connection) -> RecorderResult<TimestampColumn> {
    let mut stmt = conn.prepare("PRAGMA table_info(states);")?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;

    if columns.iter().any(|c| c == "last_updated_ts") {
        Ok(TimestampColumn::Epoch)
    } else if columns.iter().any(|c| c == "last_updated") {
        Ok(TimestampColumn::Legacy)
    } else {
        Err(RecorderError::Schema(
            "table 'states' has neither 'last_updated_ts' nor 'last_updated'".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        for stmt in FIXTURE_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        conn
    }

    #[test]
    fn fixture_schema_verifies_as_epoch() {
        let conn = fixture();
        assert_eq!(verify_schema(&conn).unwrap(), TimestampColumn::Epoch);
    }

    #[test]
    fn legacy_states_table_detected() {
        let conn = Connection::open_in_memory().unwrap();
        for stmt in FIXTURE_STATEMENTS {
            if stmt.contains("TABLE IF NOT EXISTS states (") {
                conn.execute_batch(
                    "CREATE TABLE states (
                        state_id INTEGER PRIMARY KEY,
                        state VARCHAR(255),
                        last_updated DATETIME,
                        metadata_id INTEGER
                    );",
                )
                .unwrap();
            } else if !stmt.contains("ON states(") {
                conn.execute_batch(stmt).unwrap();
            }
        }
        assert_eq!(verify_schema(&conn).unwrap(), TimestampColumn::Legacy);
    }

    #[test]
    fn missing_table_is_reported_by_name() {
        let conn = fixture();
        conn.execute_batch("DROP TABLE statistics_short_term;").unwrap();
        let err = verify_schema(&conn).unwrap_err();
        assert!(matches!(err, RecorderError::Schema(_)));
        assert!(err.to_string().contains("statistics_short_term"));
    }

    #[test]
    fn states_without_timestamp_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        for stmt in FIXTURE_STATEMENTS {
            if stmt.contains("TABLE IF NOT EXISTS states (") {
                conn.execute_batch(
                    "CREATE TABLE states (state_id INTEGER PRIMARY KEY, state TEXT, metadata_id INTEGER);",
                )
                .unwrap();
            } else if !stmt.contains("ON states(") {
                conn.execute_batch(stmt).unwrap();
            }
        }
        assert!(matches!(
            verify_schema(&conn),
            Err(RecorderError::Schema(_))
        ));
    }
}
