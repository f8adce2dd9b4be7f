use crate::infrastructure::error::InfraError;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// How long a connection waits on a lock held by another connection before failing.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Columns added after the first release. Older databases get them on start-up.
const LATE_COLUMNS: &[(&str, &str, &str)] = &[
    ("entries", "notes", "TEXT"),
    ("project_links", "remote_activity_id", "INTEGER"),
    ("project_links", "stale", "INTEGER NOT NULL DEFAULT 0"),
];

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = open_connection(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    for (table, column, declaration) in LATE_COLUMNS {
        ensure_column(&connection, table, column, declaration)?;
    }
    Ok(())
}

pub fn open_connection(path: &Path) -> Result<Connection, InfraError> {
    let connection = Connection::open(path)?;
    connection.busy_timeout(BUSY_TIMEOUT)?;
    Ok(connection)
}

fn has_column(connection: &Connection, table: &str, column: &str) -> Result<bool, InfraError> {
    let mut statement = connection.prepare(&format!("PRAGMA table_info('{table}')"))?;
    let names = statement.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn ensure_column(
    connection: &Connection,
    table: &str,
    column: &str,
    declaration: &str,
) -> Result<(), InfraError> {
    if has_column(connection, table, column)? {
        return Ok(());
    }
    connection.execute_batch(&format!(
        "ALTER TABLE {table} ADD COLUMN {column} {declaration};"
    ))?;
    info!(table, column, "added missing column");
    Ok(())
}
