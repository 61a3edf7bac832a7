use crate::error::{EtlError, Result};
use rusqlite::{params, Connection, OpenFlags};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Fails if the store is missing; never creates one.
    ReadOnly,
    /// Creates the store (and its parent directory) when missing.
    ReadWrite,
}

fn open(path: &Path, mode: StoreMode) -> Result<Connection> {
    let conn = match mode {
        StoreMode::ReadOnly => Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?,
        StoreMode::ReadWrite => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(path)?
        }
    };
    Ok(conn)
}

/// Runs `f` against a connection to the store at `path` and closes it afterwards.
///
/// Store-level failures (opening, queries, writes) are logged and absorbed: the
/// caller gets `Ok(None)` and must treat the missing value as the failure signal.
/// Every other error kind propagates unchanged.
pub fn with_connection<T, F>(path: &Path, mode: StoreMode, f: F) -> Result<Option<T>>
where
    F: FnOnce(&mut Connection) -> Result<T>,
{
    let mut conn = match open(path, mode) {
        Ok(conn) => conn,
        Err(EtlError::Database(e)) => {
            error!("Database error opening {}: {}", path.display(), e);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    debug!("{} connected successfully", path.display());

    let outcome = f(&mut conn);

    debug!("Closing database connection to {}", path.display());
    if let Err((_, e)) = conn.close() {
        error!("Database error closing {}: {}", path.display(), e);
    }

    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(EtlError::Database(e)) => {
            error!("Database error: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// All values of `column` in `table`, or an empty set when the table is absent.
pub fn read_ids(conn: &Connection, table: &str, column: &str) -> Result<BTreeSet<i64>> {
    if !table_exists(conn, table)? {
        return Ok(BTreeSet::new());
    }
    let mut stmt = conn.prepare(&format!("SELECT {column} FROM {table} WHERE {column} IS NOT NULL"))?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<std::result::Result<BTreeSet<_>, _>>()?;
    Ok(ids)
}

/// Row count of `table`, `None` when it does not exist.
pub fn count_rows(conn: &Connection, table: &str) -> Result<Option<u64>> {
    if !table_exists(conn, table)? {
        return Ok(None);
    }
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(Some(count as u64))
}
