//! Schema creation and versioned migration.

use std::path::Path;
use std::time::Duration;

use log::{info, warn};
use rusqlite::{Connection, OptionalExtension};

use super::HistoryError;

/// Current schema version. Covering indexes, metadata tracking, eager
/// aggregation, sample_count, hardware-stats tables.
pub const DB_VERSION: i64 = 5;

pub(super) const SPEED_RAW: &str = "speed_history_raw";
pub(super) const SPEED_MINUTE: &str = "speed_history_minute";
pub(super) const SPEED_HOUR: &str = "speed_history_hour";
pub(super) const BANDWIDTH: &str = "bandwidth_history";
pub(super) const HW_RAW: &str = "hardware_stats_raw";
pub(super) const HW_MINUTE: &str = "hardware_stats_minute";

const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Opens the database and applies the connection PRAGMAs.
pub(super) fn open_connection(path: &Path) -> Result<Connection, rusqlite::Error> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let conn = Connection::open(path)?;
    apply_pragmas(&conn)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}

/// Brings the schema to [`DB_VERSION`].
///
/// An existing older database is backed up to a version-and-timestamp tagged
/// sibling file, then migrated one version bump at a time, each step in its
/// own transaction. A failed migration leaves the file on its previous
/// version and surfaces the error. A version of zero (fresh or unreadable
/// metadata) rebuilds from scratch.
pub(super) fn ensure_schema(
    conn: &mut Connection,
    db_path: Option<&Path>,
) -> Result<(), HistoryError> {
    let current = current_version(conn);
    if current == DB_VERSION {
        return Ok(());
    }

    if current > 0 && current < DB_VERSION {
        info!("migrating history database from v{current} to v{DB_VERSION}");
        if let Some(path) = db_path {
            backup_database(path, current);
        }
        migrate(conn, current)?;
        return Ok(());
    }

    if current > DB_VERSION {
        // Downgrade: keep the newer file intact and rebuild.
        warn!("history database is v{current}, newer than supported v{DB_VERSION}; rebuilding");
        if let Some(path) = db_path {
            backup_database(path, current);
        }
    }

    info!("building fresh history schema (v{DB_VERSION})");
    build_fresh(conn)?;
    Ok(())
}

pub(super) fn current_version(conn: &Connection) -> i64 {
    conn.query_row(
        "SELECT value FROM metadata WHERE key = 'db_version'",
        [],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .ok()
    .flatten()
    .and_then(|value| value.parse::<i64>().ok())
    .unwrap_or(0)
}

fn backup_database(path: &Path, version: i64) {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let backup = path.with_extension(format!("db.bak.v{version}_{stamp}"));
    match std::fs::copy(path, &backup) {
        Ok(_) => info!("backed up history database to {}", backup.display()),
        Err(err) => warn!("failed to back up history database: {err}"),
    }
}

fn migrate(conn: &mut Connection, from: i64) -> Result<(), HistoryError> {
    for version in from..DB_VERSION {
        let next = version + 1;
        conn.pragma_update(None, "foreign_keys", "OFF")
            .map_err(HistoryError::from)?;
        let result = migrate_step(conn, version);
        let _ = conn.pragma_update(None, "foreign_keys", "ON");
        result.map_err(|err| {
            HistoryError::Init(format!("migration v{version} -> v{next} failed: {err}"))
        })?;
        info!("migrated history database to v{next}");
    }
    Ok(())
}

fn migrate_step(conn: &mut Connection, version: i64) -> Result<(), rusqlite::Error> {
    let tx = conn.transaction()?;
    match version {
        2 => migrate_v2_to_v3(&tx)?,
        3 => migrate_v3_to_v4(&tx)?,
        4 => migrate_v4_to_v5(&tx)?,
        other => {
            warn!("no migration body for v{other}; bumping version only");
        }
    }
    tx.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('db_version', ?1)",
        [(version + 1).to_string()],
    )?;
    tx.commit()
}

/// v2 -> v3: covering indexes replace the simple per-column ones, plus
/// `created_at` metadata and the bandwidth-totals table.
fn migrate_v2_to_v3(tx: &rusqlite::Transaction<'_>) -> Result<(), rusqlite::Error> {
    tx.execute_batch(
        "DROP INDEX IF EXISTS idx_minute_interface_timestamp;
         DROP INDEX IF EXISTS idx_minute_timestamp;
         DROP INDEX IF EXISTS idx_hour_interface_timestamp;
         DROP INDEX IF EXISTS idx_hour_timestamp;",
    )?;
    tx.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS idx_minute_covering ON {SPEED_MINUTE} \
         (timestamp DESC, interface_name, upload_avg, download_avg);
         CREATE INDEX IF NOT EXISTS idx_hour_covering ON {SPEED_HOUR} \
         (timestamp DESC, interface_name, upload_avg, download_avg);"
    ))?;
    tx.execute(
        "INSERT OR IGNORE INTO metadata (key, value) VALUES ('created_at', ?1)",
        [chrono::Utc::now().timestamp().to_string()],
    )?;
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {BANDWIDTH} (
             interface_name TEXT PRIMARY KEY,
             total_upload_bytes REAL NOT NULL DEFAULT 0,
             total_download_bytes REAL NOT NULL DEFAULT 0
         );"
    ))?;
    Ok(())
}

/// v3 -> v4: `sample_count` on the aggregated tiers so averages stay
/// weighted through rollups. DEFAULT 1 approximates legacy rows.
fn migrate_v3_to_v4(tx: &rusqlite::Transaction<'_>) -> Result<(), rusqlite::Error> {
    for table in [SPEED_MINUTE, SPEED_HOUR] {
        let result = tx.execute(
            &format!("ALTER TABLE {table} ADD COLUMN sample_count INTEGER NOT NULL DEFAULT 1"),
            [],
        );
        if let Err(err) = result {
            if err.to_string().to_lowercase().contains("duplicate column name") {
                warn!("sample_count column already exists on {table}");
            } else {
                return Err(err);
            }
        }
    }
    Ok(())
}

/// v4 -> v5: hardware-stats tables.
fn migrate_v4_to_v5(tx: &rusqlite::Transaction<'_>) -> Result<(), rusqlite::Error> {
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {HW_RAW} (
             timestamp INTEGER NOT NULL,
             stat_type TEXT NOT NULL,
             value REAL NOT NULL,
             PRIMARY KEY (timestamp, stat_type)
         );
         CREATE INDEX IF NOT EXISTS idx_hw_raw_timestamp ON {HW_RAW} (timestamp DESC);

         CREATE TABLE IF NOT EXISTS {HW_MINUTE} (
             timestamp INTEGER NOT NULL,
             stat_type TEXT NOT NULL,
             avg_value REAL NOT NULL,
             max_value REAL NOT NULL,
             sample_count INTEGER NOT NULL,
             PRIMARY KEY (timestamp, stat_type)
         );
         CREATE INDEX IF NOT EXISTS idx_hw_minute_timestamp ON {HW_MINUTE} (timestamp DESC);"
    ))
}

fn build_fresh(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "foreign_keys", "OFF")?;
    let drop_result = conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {SPEED_RAW};
         DROP TABLE IF EXISTS {SPEED_MINUTE};
         DROP TABLE IF EXISTS {SPEED_HOUR};
         DROP TABLE IF EXISTS {BANDWIDTH};
         DROP TABLE IF EXISTS {HW_RAW};
         DROP TABLE IF EXISTS {HW_MINUTE};
         DROP TABLE IF EXISTS metadata;"
    ));
    conn.pragma_update(None, "foreign_keys", "ON")?;
    drop_result?;

    let now = chrono::Utc::now().timestamp();
    conn.execute_batch(&format!(
        "BEGIN;
         CREATE TABLE metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL);
         INSERT INTO metadata (key, value) VALUES ('db_version', '{DB_VERSION}');
         INSERT INTO metadata (key, value) VALUES ('created_at', '{now}');

         CREATE TABLE {SPEED_RAW} (
             timestamp INTEGER NOT NULL,
             interface_name TEXT NOT NULL,
             upload_bytes_sec REAL NOT NULL,
             download_bytes_sec REAL NOT NULL,
             PRIMARY KEY (timestamp, interface_name)
         );
         CREATE INDEX idx_raw_timestamp ON {SPEED_RAW} (timestamp DESC);

         CREATE TABLE {SPEED_MINUTE} (
             timestamp INTEGER NOT NULL,
             interface_name TEXT NOT NULL,
             upload_avg REAL NOT NULL,
             download_avg REAL NOT NULL,
             upload_max REAL NOT NULL,
             download_max REAL NOT NULL,
             sample_count INTEGER NOT NULL DEFAULT 1,
             PRIMARY KEY (timestamp, interface_name)
         );
         CREATE INDEX idx_minute_covering ON {SPEED_MINUTE} \
             (timestamp DESC, interface_name, upload_avg, download_avg);

         CREATE TABLE {SPEED_HOUR} (
             timestamp INTEGER NOT NULL,
             interface_name TEXT NOT NULL,
             upload_avg REAL NOT NULL,
             download_avg REAL NOT NULL,
             upload_max REAL NOT NULL,
             download_max REAL NOT NULL,
             sample_count INTEGER NOT NULL DEFAULT 1,
             PRIMARY KEY (timestamp, interface_name)
         );
         CREATE INDEX idx_hour_covering ON {SPEED_HOUR} \
             (timestamp DESC, interface_name, upload_avg, download_avg);

         CREATE TABLE {BANDWIDTH} (
             interface_name TEXT PRIMARY KEY,
             total_upload_bytes REAL NOT NULL DEFAULT 0,
             total_download_bytes REAL NOT NULL DEFAULT 0
         );

         CREATE TABLE {HW_RAW} (
             timestamp INTEGER NOT NULL,
             stat_type TEXT NOT NULL,
             value REAL NOT NULL,
             PRIMARY KEY (timestamp, stat_type)
         );
         CREATE INDEX idx_hw_raw_timestamp ON {HW_RAW} (timestamp DESC);

         CREATE TABLE {HW_MINUTE} (
             timestamp INTEGER NOT NULL,
             stat_type TEXT NOT NULL,
             avg_value REAL NOT NULL,
             max_value REAL NOT NULL,
             sample_count INTEGER NOT NULL,
             PRIMARY KEY (timestamp, stat_type)
         );
         CREATE INDEX idx_hw_minute_timestamp ON {HW_MINUTE} (timestamp DESC);
         COMMIT;"
    ))
}

// Metadata helpers shared with maintenance.

pub(super) fn meta_get(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        [key],
        |row| row.get::<_, String>(0),
    )
    .optional()
}

pub(super) fn meta_get_i64(conn: &Connection, key: &str) -> Result<Option<i64>, rusqlite::Error> {
    Ok(meta_get(conn, key)?.and_then(|value| value.parse::<i64>().ok()))
}

pub(super) fn meta_set(
    conn: &Connection,
    key: &str,
    value: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

pub(super) fn meta_delete(conn: &Connection, keys: &[&str]) -> Result<(), rusqlite::Error> {
    for key in keys {
        conn.execute("DELETE FROM metadata WHERE key = ?1", [*key])?;
    }
    Ok(())
}
