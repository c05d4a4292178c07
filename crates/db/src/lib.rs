//! The summary database: per-function facts persisted across runs so that
//! later passes can refine call sites from callee behavior and parameters
//! from caller behavior.
//!
//! All SQL lives in this crate. The engine and the checkers speak in terms
//! of [`FactKind`], [`KeyPath`], and typed row structs; nothing outside this
//! facade concatenates query strings.

use std::path::Path;

use rusqlite::{Connection, OpenFlags, params};

mod facts;
mod key;

pub use facts::{FactKind, PARAM_GLOBAL, PARAM_RETURN};
pub use key::{KeyPath, KeyPathError, KeySeg};

// ERRORS
// ================================================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("failed to open summary database at '{path}'")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("summary database query failed")]
    Query(#[from] rusqlite::Error),
}

// ROW TYPES
// ================================================================================================

/// A fact a caller recorded about an argument it passes. Picked up when the
/// callee is analyzed in a later pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallerInfoRow {
    pub file: String,
    pub function: String,
    pub is_static: bool,
    pub kind: FactKind,
    pub parameter: i32,
    pub key: String,
    pub value: String,
}

/// A fact about a function's behavior on one of its return paths. Applied at
/// call sites when callers are analyzed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReturnStateRow {
    pub file: String,
    pub function: String,
    pub is_static: bool,
    pub return_id: i32,
    pub return_ranges: String,
    pub kind: FactKind,
    pub parameter: i32,
    pub key: String,
    pub value: String,
}

/// A range constraint implied on an argument by the function returning at
/// all (or returning in a particular range).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReturnImpliesRow {
    pub file: String,
    pub function: String,
    pub is_static: bool,
    pub kind: FactKind,
    pub parameter: i32,
    pub key: String,
    pub value: String,
}

// DATABASE HANDLE
// ================================================================================================

/// Single process-wide connection, opened at startup and closed at shutdown.
/// Writes happen only during analysis (single-threaded); reads may be served
/// concurrently from read-only handles.
pub struct Db {
    conn: Connection,
}

impl Db {
    // OPEN / INIT
    // --------------------------------------------------------------------------------------------

    pub fn open(path: &Path) -> Result<Db, DbError> {
        let conn = Connection::open(path).map_err(|source| DbError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let db = Db { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_read_only(path: &Path) -> Result<Db, DbError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(
            |source| DbError::Open {
                path: path.display().to_string(),
                source,
            },
        )?;
        Ok(Db { conn })
    }

    /// In-memory database, used by tests and `--no-db` fallbacks that still
    /// want within-run cross-function facts.
    pub fn open_in_memory() -> Result<Db, DbError> {
        let conn = Connection::open_in_memory().map_err(|source| DbError::Open {
            path: ":memory:".to_string(),
            source,
        })?;
        let db = Db { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn init_schema(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS caller_info (
                 file TEXT, function TEXT, static INT, type INT,
                 parameter INT, key TEXT, value TEXT);
             CREATE TABLE IF NOT EXISTS return_states (
                 file TEXT, function TEXT, static INT, return_id INT,
                 return_ranges TEXT, type INT, parameter INT, key TEXT, value TEXT);
             CREATE TABLE IF NOT EXISTS return_implies (
                 file TEXT, function TEXT, static INT, type INT,
                 parameter INT, key TEXT, value TEXT);
             CREATE TABLE IF NOT EXISTS mtag_data (
                 tag INT8, data TEXT, offset INT, type INT, value TEXT);
             CREATE TABLE IF NOT EXISTS sink_info (
                 file TEXT, static INT, sink_name TEXT, type INT,
                 context TEXT, value TEXT);
             CREATE INDEX IF NOT EXISTS caller_fn_type ON caller_info (function, type);
             CREATE INDEX IF NOT EXISTS caller_fn_param ON caller_info (function, parameter);
             CREATE INDEX IF NOT EXISTS return_fn_type ON return_states (function, type);
             CREATE INDEX IF NOT EXISTS return_fn_param ON return_states (function, parameter);
             CREATE INDEX IF NOT EXISTS implies_fn_type ON return_implies (function, type);",
        )?;
        Ok(())
    }

    // WRITES
    // --------------------------------------------------------------------------------------------

    pub fn insert_caller_info(&self, row: &CallerInfoRow) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO caller_info (file, function, static, type, parameter, key, value)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.file,
                row.function,
                row.is_static as i32,
                row.kind.code(),
                row.parameter,
                row.key,
                row.value
            ],
        )?;
        Ok(())
    }

    pub fn insert_return_state(&self, row: &ReturnStateRow) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO return_states
                 (file, function, static, return_id, return_ranges, type, parameter, key, value)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.file,
                row.function,
                row.is_static as i32,
                row.return_id,
                row.return_ranges,
                row.kind.code(),
                row.parameter,
                row.key,
                row.value
            ],
        )?;
        Ok(())
    }

    pub fn insert_return_implies(&self, row: &ReturnImpliesRow) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO return_implies (file, function, static, type, parameter, key, value)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.file,
                row.function,
                row.is_static as i32,
                row.kind.code(),
                row.parameter,
                row.key,
                row.value
            ],
        )?;
        Ok(())
    }

    /// Drops all previously recorded facts about one function before the
    /// current analysis re-emits them. Called at the start of a function so
    /// stale rows from earlier runs never mix with fresh ones.
    pub fn forget_function(&self, file: &str, function: &str) -> Result<(), DbError> {
        for table in ["caller_info", "return_states", "return_implies"] {
            self.conn.execute(
                &format!(
                    "DELETE FROM {table}
                     WHERE function = ?1 AND (static = 0 OR file = ?2)"
                ),
                params![function, file],
            )?;
        }
        Ok(())
    }

    // QUERIES
    // --------------------------------------------------------------------------------------------

    /// Return-state facts for a callee. Static functions only match within
    /// their own file; extern functions match globally.
    pub fn return_states(&self, function: &str, file: &str) -> Result<Vec<ReturnStateRow>, DbError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT file, function, static, return_id, return_ranges, type, parameter, key, value
             FROM return_states
             WHERE function = ?1 AND (static = 0 OR file = ?2)
             ORDER BY return_id, type, parameter, rowid",
        )?;
        let rows = stmt
            .query_map(params![function, file], |r| {
                Ok(ReturnStateRow {
                    file: r.get(0)?,
                    function: r.get(1)?,
                    is_static: r.get::<_, i32>(2)? != 0,
                    return_id: r.get(3)?,
                    return_ranges: r.get(4)?,
                    kind: FactKind::from_code(r.get(5)?),
                    parameter: r.get(6)?,
                    key: r.get(7)?,
                    value: r.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Caller facts recorded against a function's parameters.
    pub fn caller_info(&self, function: &str, file: &str) -> Result<Vec<CallerInfoRow>, DbError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT file, function, static, type, parameter, key, value
             FROM caller_info
             WHERE function = ?1 AND (static = 0 OR file = ?2)
             ORDER BY type, parameter, rowid",
        )?;
        let rows = stmt
            .query_map(params![function, file], |r| {
                Ok(CallerInfoRow {
                    file: r.get(0)?,
                    function: r.get(1)?,
                    is_static: r.get::<_, i32>(2)? != 0,
                    kind: FactKind::from_code(r.get(3)?),
                    parameter: r.get(4)?,
                    key: r.get(5)?,
                    value: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn return_implies(
        &self,
        function: &str,
        file: &str,
    ) -> Result<Vec<ReturnImpliesRow>, DbError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT file, function, static, type, parameter, key, value
             FROM return_implies
             WHERE function = ?1 AND (static = 0 OR file = ?2)
             ORDER BY type, parameter, rowid",
        )?;
        let rows = stmt
            .query_map(params![function, file], |r| {
                Ok(ReturnImpliesRow {
                    file: r.get(0)?,
                    function: r.get(1)?,
                    is_static: r.get::<_, i32>(2)? != 0,
                    kind: FactKind::from_code(r.get(3)?),
                    parameter: r.get(4)?,
                    key: r.get(5)?,
                    value: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // MAINTENANCE
    // --------------------------------------------------------------------------------------------

    /// Removes superseded rows: for each logical key only the most recently
    /// written row survives. Returns the number of rows deleted.
    pub fn compact(&self) -> Result<usize, DbError> {
        let mut removed = 0;
        removed += self.conn.execute(
            "DELETE FROM caller_info WHERE rowid NOT IN (
                 SELECT MAX(rowid) FROM caller_info
                 GROUP BY file, function, static, type, parameter, key)",
            [],
        )?;
        removed += self.conn.execute(
            "DELETE FROM return_states WHERE rowid NOT IN (
                 SELECT MAX(rowid) FROM return_states
                 GROUP BY file, function, static, return_id, type, parameter, key)",
            [],
        )?;
        removed += self.conn.execute(
            "DELETE FROM return_implies WHERE rowid NOT IN (
                 SELECT MAX(rowid) FROM return_implies
                 GROUP BY file, function, static, type, parameter, key)",
            [],
        )?;
        tracing::debug!(removed, "compacted summary database");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ret_row(function: &str, value: &str) -> ReturnStateRow {
        ReturnStateRow {
            file: "a.c".into(),
            function: function.into(),
            is_static: false,
            return_id: 1,
            return_ranges: "0,4096-ptr_max".into(),
            kind: FactKind::ParamFreed,
            parameter: 0,
            key: "$".into(),
            value: value.into(),
        }
    }

    #[test]
    fn round_trip_rows() {
        let db = Db::open_in_memory().unwrap();
        let row = ret_row("kfree", "1");
        db.insert_return_state(&row).unwrap();
        let got = db.return_states("kfree", "b.c").unwrap();
        assert_eq!(got, vec![row]);
    }

    #[test]
    fn static_functions_stay_in_their_file() {
        let db = Db::open_in_memory().unwrap();
        let mut row = ret_row("helper", "1");
        row.is_static = true;
        db.insert_return_state(&row).unwrap();
        assert_eq!(db.return_states("helper", "a.c").unwrap().len(), 1);
        assert!(db.return_states("helper", "b.c").unwrap().is_empty());
    }

    #[test]
    fn compact_keeps_latest() {
        let db = Db::open_in_memory().unwrap();
        db.insert_return_state(&ret_row("f", "old")).unwrap();
        db.insert_return_state(&ret_row("f", "new")).unwrap();
        let removed = db.compact().unwrap();
        assert_eq!(removed, 1);
        let got = db.return_states("f", "x.c").unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].value, "new");
    }

    #[test]
    fn forget_function_scopes_by_linkage() {
        let db = Db::open_in_memory().unwrap();
        db.insert_return_state(&ret_row("f", "v")).unwrap();
        let mut other = ret_row("g", "v");
        other.is_static = true;
        db.insert_return_state(&other).unwrap();
        db.forget_function("a.c", "f").unwrap();
        assert!(db.return_states("f", "a.c").unwrap().is_empty());
        assert_eq!(db.return_states("g", "a.c").unwrap().len(), 1);
    }
}
