//! Repair engine over a recorder SQLite database.
//!
//! One engine owns one connection for its whole lifetime. The connection sits
//! behind a mutex, so an `Arc<RepairEngine>` may be shared between threads and
//! every operation (including the deletion transaction) runs serialized.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::errors::{RecorderError, RecorderResult};
use crate::models::{
    DeleteOutcome, DeletionCounts, EngineOptions, EntityRow, EntitySummary, StateRow,
};
use crate::store::schema::{self, TimestampColumn};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw == "~" || raw.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if raw.len() > 2 {
                expanded.push(&raw[2..]);
            }
            return expanded;
        }
    }
    path.to_path_buf()
}

/// Render a column as text whatever its storage class.
///
/// Recorder columns declared `DATETIME` have NUMERIC affinity, so a value
/// that looks like a number comes back as INTEGER or REAL rather than TEXT.
fn column_text(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Integer(v) => Some(v.to_string()),
        ValueRef::Real(v) => Some(v.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    })
}

fn validate_limit(name: &str, limit: i64) -> RecorderResult<i64> {
    if limit < 1 {
        return Err(RecorderError::InvalidArgument(format!(
            "{name} must be a positive integer, got {limit}"
        )));
    }
    Ok(limit)
}

/// Parse an operator-supplied value for matching against the numeric
/// aggregate columns.
///
/// Accepts `_` digit separators (`1_000.5`) as long as each one sits between
/// two digits. Returns `None` for text that is not a number and for NaN,
/// which SQLite binds as NULL and therefore never equals a stored aggregate.
pub fn parse_numeric_value(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    let parsed = if trimmed.contains('_') {
        strip_digit_separators(trimmed)?.parse::<f64>().ok()?
    } else {
        trimmed.parse::<f64>().ok()?
    };
    if parsed.is_nan() {
        None
    } else {
        Some(parsed)
    }
}

fn strip_digit_separators(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = String::with_capacity(value.len());
    for (i, ch) in value.char_indices() {
        if ch != '_' {
            out.push(ch);
            continue;
        }
        let before = i.checked_sub(1).map(|j| bytes[j]);
        let after = bytes.get(i + 1).copied();
        match (before, after) {
            (Some(b), Some(a)) if b.is_ascii_digit() && a.is_ascii_digit() => {}
            _ => return None,
        }
    }
    Some(out)
}

// ---------------------------------------------------------------------------
// RepairEngine
// ---------------------------------------------------------------------------

/// Reads and repairs a recorder database.
///
/// Only ever deletes rows; the schema is left untouched.
pub struct RepairEngine {
    db_path: PathBuf,
    conn: Mutex<Connection>,
    timestamp: TimestampColumn,
    options: EngineOptions,
}

impl std::fmt::Debug for RepairEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairEngine")
            .field("db_path", &self.db_path)
            .field("timestamp", &self.timestamp)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl RepairEngine {
    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open an existing recorder database with default options.
    pub fn open(db_path: impl AsRef<Path>) -> RecorderResult<Self> {
        Self::open_with(db_path, EngineOptions::default())
    }

    /// Open an existing recorder database.
    ///
    /// Fails with [`RecorderError::NotFound`] when the path is not an existing
    /// file; the database is never created.
    pub fn open_with(db_path: impl AsRef<Path>, options: EngineOptions) -> RecorderResult<Self> {
        let raw = db_path.as_ref();
        if raw.as_os_str().is_empty() {
            return Err(RecorderError::InvalidArgument(
                "database path is empty".to_string(),
            ));
        }
        validate_limit("recent_limit", options.recent_limit)?;
        validate_limit("preview_limit", options.preview_limit)?;

        let resolved = expand_tilde(raw);
        match std::fs::metadata(&resolved) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(RecorderError::NotFound(resolved)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RecorderError::NotFound(resolved))
            }
            Err(e) => return Err(RecorderError::Io(e)),
        }

        let conn = Connection::open_with_flags(
            &resolved,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(options.busy_timeout)?;
        let timestamp = schema::verify_schema(&conn)?;

        info!(
            path = %resolved.display(),
            timestamp_column = timestamp.order_column(),
            "Opened recorder database"
        );

        Ok(Self {
            db_path: resolved,
            conn: Mutex::new(conn),
            timestamp,
            options,
        })
    }

    /// Close the connection, reporting any error SQLite raises while doing
    /// so. Dropping the engine also releases the connection.
    pub fn close(self) -> RecorderResult<()> {
        let path = self.db_path;
        self.conn
            .into_inner()
            .close()
            .map_err(|(_, err)| RecorderError::from(err))?;
        debug!(path = %path.display(), "Closed recorder database");
        Ok(())
    }

    pub fn timestamp_column(&self) -> TimestampColumn {
        self.timestamp
    }

    // -----------------------------------------------------------------------
    // Identifier resolution
    // -----------------------------------------------------------------------

    /// `states_meta.metadata_id` for an entity, or `None` when unknown.
    pub fn resolve_metadata_id(&self, entity_id: &str) -> RecorderResult<Option<i64>> {
        let conn = self.conn.lock();
        Self::metadata_id(&conn, entity_id)
    }

    /// `statistics_meta.id` for an entity, or `None` when no statistics were
    /// ever compiled for it.
    pub fn resolve_statistic_id(&self, entity_id: &str) -> RecorderResult<Option<i64>> {
        let conn = self.conn.lock();
        Self::statistic_id(&conn, entity_id)
    }

    fn metadata_id(conn: &Connection, entity_id: &str) -> RecorderResult<Option<i64>> {
        let result: rusqlite::Result<i64> = conn.query_row(
            "SELECT metadata_id FROM states_meta WHERE entity_id = ?1 LIMIT 1;",
            params![entity_id],
            |row| row.get(0),
        );
        match result {
            Ok(id) => {
                debug!(entity_id, metadata_id = id, "Resolved metadata_id");
                Ok(Some(id))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn statistic_id(conn: &Connection, entity_id: &str) -> RecorderResult<Option<i64>> {
        let result: rusqlite::Result<i64> = conn.query_row(
            "SELECT id FROM statistics_meta WHERE statistic_id = ?1 LIMIT 1;",
            params![entity_id],
            |row| row.get(0),
        );
        match result {
            Ok(id) => {
                debug!(entity_id, statistic_id = id, "Resolved statistic id");
                Ok(Some(id))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Every entity with its metadata id, ordered by entity id.
    pub fn list_entities(&self) -> RecorderResult<Vec<EntityRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT entity_id, metadata_id FROM states_meta \
             WHERE entity_id IS NOT NULL \
             ORDER BY entity_id ASC;",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(EntityRow {
                    entity_id: row.get(0)?,
                    metadata_id: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Distinct recorded state values for an entity in ascending text order
    /// (`"10"` sorts before `"2"`). NULL states are skipped.
    pub fn list_unique_values(&self, entity_id: &str) -> RecorderResult<Vec<String>> {
        let conn = self.conn.lock();
        let Some(metadata_id) = Self::metadata_id(&conn, entity_id)? else {
            return Ok(Vec::new());
        };

        let mut stmt = conn.prepare(
            "SELECT DISTINCT state FROM states \
             WHERE metadata_id = ?1 AND state IS NOT NULL \
             ORDER BY state ASC;",
        )?;
        let mut values = Vec::new();
        let mut rows = stmt.query(params![metadata_id])?;
        while let Some(row) = rows.next()? {
            if let Some(value) = column_text(row, 0)? {
                values.push(value);
            }
        }
        Ok(values)
    }

    /// Most recent raw states of an entity, newest first.
    ///
    /// `limit` defaults to the configured `recent_limit` and must be positive.
    pub fn list_recent_states(
        &self,
        entity_id: &str,
        limit: Option<i64>,
    ) -> RecorderResult<Vec<StateRow>> {
        let limit = validate_limit("limit", limit.unwrap_or(self.options.recent_limit))?;
        let conn = self.conn.lock();
        match Self::metadata_id(&conn, entity_id)? {
            Some(metadata_id) => Self::query_states(&conn, self.timestamp, metadata_id, limit),
            None => Ok(Vec::new()),
        }
    }

    /// Most recent raw states for a metadata id, newest first.
    pub fn list_states_by_metadata_id(
        &self,
        metadata_id: i64,
        limit: Option<i64>,
    ) -> RecorderResult<Vec<StateRow>> {
        let limit = validate_limit("limit", limit.unwrap_or(self.options.recent_limit))?;
        let conn = self.conn.lock();
        Self::query_states(&conn, self.timestamp, metadata_id, limit)
    }

    /// Both identifiers of an entity plus a preview of its latest states.
    /// `None` when the entity has no `states_meta` row.
    pub fn find_entity(
        &self,
        entity_id: &str,
        preview: Option<i64>,
    ) -> RecorderResult<Option<EntitySummary>> {
        let preview = validate_limit("preview", preview.unwrap_or(self.options.preview_limit))?;
        let conn = self.conn.lock();
        let Some(metadata_id) = Self::metadata_id(&conn, entity_id)? else {
            return Ok(None);
        };
        let statistic_id = Self::statistic_id(&conn, entity_id)?;
        let recent = Self::query_states(&conn, self.timestamp, metadata_id, preview)?;
        Ok(Some(EntitySummary {
            entity_id: entity_id.to_string(),
            metadata_id,
            statistic_id,
            recent,
        }))
    }

    fn query_states(
        conn: &Connection,
        timestamp: TimestampColumn,
        metadata_id: i64,
        limit: i64,
    ) -> RecorderResult<Vec<StateRow>> {
        let sql = format!(
            "SELECT state_id, state, {} FROM states \
             WHERE metadata_id = ?1 \
             ORDER BY {} DESC \
             LIMIT ?2;",
            timestamp.select_expr(),
            timestamp.order_column(),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![metadata_id, limit], |row| {
                Ok(StateRow {
                    state_id: row.get(0)?,
                    state: column_text(row, 1)?,
                    last_updated: column_text(row, 2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Deletion
    // -----------------------------------------------------------------------

    /// Remove every record of `value` for an entity from `states`,
    /// `statistics` and `statistics_short_term` in one transaction.
    ///
    /// * `states` rows match on `metadata_id` and exact text.
    /// * `statistics` rows match on the entity's metadata id and any of
    ///   state/min/max/mean equal to the parsed value. They are only touched
    ///   when the entity also has a statistic id.
    /// * `statistics_short_term` rows match on min/max/mean alone, for every
    ///   entity. Rows belonging to other entities are counted in
    ///   [`DeletionCounts::short_term_foreign`] and logged as a warning.
    ///
    /// Aggregates are skipped when `value` is not numeric. Any storage error
    /// rolls the whole transaction back and is returned.
    pub fn delete_value_everywhere(
        &self,
        entity_id: &str,
        value: &str,
    ) -> RecorderResult<DeleteOutcome> {
        let mut conn = self.conn.lock();

        let Some(metadata_id) = Self::metadata_id(&conn, entity_id)? else {
            info!(entity_id, "Entity not found in states_meta; nothing deleted");
            return Ok(DeleteOutcome::EntityNotFound);
        };
        let statistic_id = Self::statistic_id(&conn, entity_id)?;
        let numeric = parse_numeric_value(value);

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = Self::delete_matching(&tx, metadata_id, statistic_id, value, numeric);

        match result {
            Ok(counts) => {
                tx.commit()?;
                info!(
                    entity_id,
                    value,
                    states = counts.states,
                    statistics = counts.statistics,
                    statistics_short_term = counts.statistics_short_term,
                    total = counts.total(),
                    "Deleted value from recorder tables"
                );
                Ok(DeleteOutcome::Deleted(counts))
            }
            Err(e) => {
                warn!(entity_id, value, "Deletion failed, rolling back: {e}");
                if let Err(rollback_err) = tx.rollback() {
                    warn!("Rollback failed: {rollback_err}");
                }
                Err(e)
            }
        }
    }

    fn delete_matching(
        conn: &Connection,
        metadata_id: i64,
        statistic_id: Option<i64>,
        value: &str,
        numeric: Option<f64>,
    ) -> RecorderResult<DeletionCounts> {
        let mut counts = DeletionCounts {
            states: conn.execute(
                "DELETE FROM states WHERE metadata_id = ?1 AND state = ?2;",
                params![metadata_id, value],
            )? as u64,
            ..DeletionCounts::default()
        };

        let Some(number) = numeric else {
            debug!(value, "Value is not numeric; statistics tables skipped");
            return Ok(counts);
        };

        // Gated on the statistic id but keyed by the states metadata id, the
        // scope the recorder fixer has always used.
        if statistic_id.is_some() {
            counts.statistics = conn.execute(
                "DELETE FROM statistics \
                 WHERE metadata_id = ?1 \
                   AND (state = ?2 OR min = ?2 OR max = ?2 OR mean = ?2);",
                params![metadata_id, number],
            )? as u64;
        }

        // Not scoped to the entity: min/max/mean equal to the value is enough.
        let foreign: i64 = conn.query_row(
            "SELECT COUNT(*) FROM statistics_short_term \
             WHERE (min = ?1 OR max = ?1 OR mean = ?1) \
               AND (?2 IS NULL OR metadata_id IS NOT ?2);",
            params![number, statistic_id],
            |row| row.get(0),
        )?;
        counts.statistics_short_term = conn.execute(
            "DELETE FROM statistics_short_term \
             WHERE min = ?1 OR max = ?1 OR mean = ?1;",
            params![number],
        )? as u64;
        counts.short_term_foreign = foreign as u64;

        if foreign > 0 {
            warn!(
                value = number,
                statistic_id,
                rows = foreign,
                "statistics_short_term deletion removed rows belonging to other entities"
            );
        }

        Ok(counts)
    }
}
