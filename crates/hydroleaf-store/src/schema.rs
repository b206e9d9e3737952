//! Database schema and migrations.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if version < SCHEMA_VERSION {
        migrate(conn, version)?;
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Create the initial schema (version 1).
///
/// All timestamps are Unix epoch milliseconds.
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS device_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS devices (
            composite_id TEXT PRIMARY KEY,
            system TEXT NOT NULL,
            layer TEXT NOT NULL,
            device_id TEXT NOT NULL,
            group_id INTEGER NOT NULL REFERENCES device_groups(id),
            registered_at INTEGER NOT NULL
        );

        -- One row per (device, sensor type); overwritten on every reading
        CREATE TABLE IF NOT EXISTS latest_sensor_values (
            composite_id TEXT NOT NULL REFERENCES devices(composite_id),
            sensor_type TEXT NOT NULL,
            value REAL NOT NULL,
            unit TEXT,
            value_time INTEGER NOT NULL,
            PRIMARY KEY (composite_id, sensor_type)
        );

        -- Append-only flush output
        CREATE TABLE IF NOT EXISTS sensor_value_rollups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            composite_id TEXT NOT NULL,
            sensor_type TEXT NOT NULL,
            unit TEXT,
            value REAL NOT NULL,
            sample_count INTEGER NOT NULL,
            value_time INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rollups_device_time
            ON sensor_value_rollups(composite_id, value_time);
        CREATE INDEX IF NOT EXISTS idx_rollups_device_type_time
            ON sensor_value_rollups(composite_id, sensor_type, value_time);
        "#,
    )?;

    Ok(())
}

fn migrate(conn: &Connection, old_version: i32) -> Result<()> {
    tracing::info!("Migrating schema from v{} to v{}", old_version, SCHEMA_VERSION);
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}
