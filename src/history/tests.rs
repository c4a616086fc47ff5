use rusqlite::Connection;

use super::*;
use crate::events::StoreEvent;

fn test_conn() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    schema::ensure_schema(&mut conn, None).unwrap();
    conn
}

fn insert_raw(conn: &Connection, ts: i64, iface: &str, up: f64, down: f64) {
    conn.execute(
        "INSERT INTO speed_history_raw VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![ts, iface, up, down],
    )
    .unwrap();
}

fn insert_minute(
    conn: &Connection,
    ts: i64,
    iface: &str,
    avg: (f64, f64),
    max: (f64, f64),
    count: i64,
) {
    conn.execute(
        "INSERT INTO speed_history_minute VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![ts, iface, avg.0, avg.1, max.0, max.1, count],
    )
    .unwrap();
}

fn insert_hour(
    conn: &Connection,
    ts: i64,
    iface: &str,
    avg: (f64, f64),
    max: (f64, f64),
    count: i64,
) {
    conn.execute(
        "INSERT INTO speed_history_hour VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![ts, iface, avg.0, avg.1, max.0, max.1, count],
    )
    .unwrap();
}

fn table_names(conn: &Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
        .unwrap();
    stmt.query_map([], |row| row.get::<_, String>(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

const NOW: i64 = 1_750_000_000;

#[test]
fn fresh_schema_creates_tables_indexes_and_metadata() {
    let conn = test_conn();

    let tables = table_names(&conn);
    for expected in [
        "bandwidth_history",
        "hardware_stats_minute",
        "hardware_stats_raw",
        "metadata",
        "speed_history_hour",
        "speed_history_minute",
        "speed_history_raw",
    ] {
        assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
    }

    assert_eq!(schema::current_version(&conn), DB_VERSION);

    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='index'")
        .unwrap();
    let indexes: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    for expected in ["idx_raw_timestamp", "idx_minute_covering", "idx_hour_covering"] {
        assert!(indexes.iter().any(|i| i == expected), "missing index {expected}");
    }

    assert!(schema::meta_get(&conn, "created_at").unwrap().is_some());
}

#[test]
fn raw_rollup_aggregates_per_minute_and_prunes_sources() {
    let mut conn = test_conn();

    // Three raw rows 25 h old, all inside one minute.
    let old_base = NOW - 25 * 3_600;
    insert_raw(&conn, old_base + 1, "Wi-Fi", 100.0, 200.0);
    insert_raw(&conn, old_base + 2, "Wi-Fi", 300.0, 400.0);
    insert_raw(&conn, old_base + 3, "Ethernet", 50.0, 60.0);
    // Recent raw row must survive untouched.
    let recent = NOW - 3_600;
    insert_raw(&conn, recent, "Wi-Fi", 1_000.0, 2_000.0);

    maintenance::run_maintenance(&mut conn, 365, NOW).unwrap();

    let (avg_up, avg_down, max_up, max_down, count): (f64, f64, f64, f64, i64) = conn
        .query_row(
            "SELECT upload_avg, download_avg, upload_max, download_max, sample_count \
             FROM speed_history_minute WHERE interface_name = 'Wi-Fi'",
            [],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )
        .unwrap();
    assert_eq!(avg_up, 200.0);
    assert_eq!(avg_down, 300.0);
    assert_eq!(max_up, 300.0);
    assert_eq!(max_down, 400.0);
    assert_eq!(count, 2);

    let minute_rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM speed_history_minute", [], |row| row.get(0))
        .unwrap();
    assert_eq!(minute_rows, 2, "one Wi-Fi and one Ethernet bin expected");

    // Minute bins are floored to 60-second boundaries.
    let bins: Vec<i64> = {
        let mut stmt = conn
            .prepare("SELECT timestamp FROM speed_history_minute")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    };
    assert!(bins.iter().all(|b| b % 60 == 0));

    let remaining: Vec<i64> = {
        let mut stmt = conn.prepare("SELECT timestamp FROM speed_history_raw").unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    };
    assert_eq!(remaining, vec![recent]);
}

#[test]
fn minute_rollup_uses_sample_count_weighted_average() {
    let mut conn = test_conn();

    let old = NOW - 31 * 86_400;
    let hour_start = (old / 3_600) * 3_600;
    insert_minute(&conn, hour_start + 60, "Wi-Fi", (100.0, 100.0), (100.0, 100.0), 60);
    insert_minute(&conn, hour_start + 120, "Wi-Fi", (1_000.0, 1_000.0), (1_000.0, 1_000.0), 1);

    // Reconstructable byte total before the rollup.
    let total_before = 100.0 * 60.0 + 1_000.0 * 1.0;

    maintenance::run_maintenance(&mut conn, 365, NOW).unwrap();

    let (avg, max, count): (f64, f64, i64) = conn
        .query_row(
            "SELECT upload_avg, upload_max, sample_count FROM speed_history_hour \
             WHERE timestamp = ?1 AND interface_name = 'Wi-Fi'",
            [hour_start],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();

    let expected = (100.0 * 60.0 + 1_000.0) / 61.0;
    assert!((avg - expected).abs() < 1e-9, "weighted avg {avg} != {expected}");
    assert_eq!(max, 1_000.0, "peak must survive the rollup");
    assert_eq!(count, 61);
    assert!((avg * count as f64 - total_before).abs() < 1e-6, "integral must be preserved");

    let leftover: i64 = conn
        .query_row("SELECT COUNT(*) FROM speed_history_minute", [], |row| row.get(0))
        .unwrap();
    assert_eq!(leftover, 0);
}

#[test]
fn retention_reduction_respects_grace_period() {
    let mut conn = test_conn();

    let very_old = NOW - 40 * 86_400;
    let recent = NOW - 10 * 86_400;
    insert_hour(&conn, very_old, "Wi-Fi", (0.0, 0.0), (0.0, 0.0), 1);
    insert_hour(&conn, recent, "Wi-Fi", (0.0, 0.0), (0.0, 0.0), 1);
    schema::meta_set(&conn, "current_retention_days", "365").unwrap();

    // Reduction request: nothing deleted, prune scheduled 48 h out.
    let outcome = maintenance::run_maintenance(&mut conn, 30, NOW).unwrap();
    assert!(outcome.grace_scheduled);
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM speed_history_hour", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 2, "grace period must protect data");
    assert_eq!(
        schema::meta_get_i64(&conn, "prune_scheduled_at").unwrap(),
        Some(NOW + 48 * 3_600)
    );
    assert_eq!(
        schema::meta_get_i64(&conn, "pending_retention_days").unwrap(),
        Some(30)
    );

    // Re-running inside the window is a no-op for the reduction.
    maintenance::run_maintenance(&mut conn, 30, NOW + 3_600).unwrap();
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM speed_history_hour", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 2);

    // After the window the reduction executes and the schedule clears.
    maintenance::run_maintenance(&mut conn, 30, NOW + 49 * 3_600).unwrap();
    let remaining: Vec<i64> = {
        let mut stmt = conn.prepare("SELECT timestamp FROM speed_history_hour").unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    };
    assert_eq!(remaining, vec![recent]);
    assert_eq!(
        schema::meta_get_i64(&conn, "current_retention_days").unwrap(),
        Some(30)
    );
    assert!(schema::meta_get(&conn, "prune_scheduled_at").unwrap().is_none());
    assert!(schema::meta_get(&conn, "pending_retention_days").unwrap().is_none());
}

#[test]
fn retention_increase_cancels_pending_reduction() {
    let mut conn = test_conn();
    insert_hour(&conn, NOW - 100 * 86_400, "Wi-Fi", (0.0, 0.0), (0.0, 0.0), 1);
    schema::meta_set(&conn, "current_retention_days", "90").unwrap();

    maintenance::run_maintenance(&mut conn, 30, NOW).unwrap();
    assert!(schema::meta_get(&conn, "prune_scheduled_at").unwrap().is_some());

    maintenance::run_maintenance(&mut conn, 180, NOW + 3_600).unwrap();
    assert!(
        schema::meta_get(&conn, "prune_scheduled_at").unwrap().is_none(),
        "raising retention must cancel the pending reduction"
    );
    assert_eq!(
        schema::meta_get_i64(&conn, "current_retention_days").unwrap(),
        Some(180)
    );
    // The 100-day-old row is inside the new 180-day retention.
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM speed_history_hour", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn speed_history_unions_all_tiers() {
    let conn = test_conn();
    insert_raw(&conn, NOW - 10, "eth0", 100.0, 200.0);
    insert_minute(&conn, NOW - 2 * 86_400, "eth0", (50.0, 60.0), (70.0, 80.0), 60);
    insert_hour(&conn, NOW - 40 * 86_400, "eth0", (10.0, 20.0), (30.0, 40.0), 60);

    let points =
        query::speed_history(&conn, None, NOW, &InterfaceFilter::All, Resolution::Native).unwrap();
    assert!(points.len() >= 3);

    let uploads: Vec<f64> = points.iter().map(|p| p.upload_bps).collect();
    assert!(uploads.contains(&30.0), "hour tier peak missing");
    assert!(uploads.contains(&70.0), "minute tier peak missing");
    assert!(uploads.contains(&100.0), "raw tier value missing");
}

#[test]
fn minute_resolution_pads_missing_bins_with_zeros() {
    let conn = test_conn();
    let start = NOW - 6 * 3_600;

    let points = query::speed_history(
        &conn,
        Some(start),
        NOW,
        &InterfaceFilter::All,
        Resolution::Minute,
    )
    .unwrap();

    assert!(!points.is_empty(), "empty history must still yield grid points");
    assert!(points.iter().all(|p| p.timestamp % 60 == 0));
    assert!(points.iter().all(|p| p.upload_bps == 0.0 && p.download_bps == 0.0));
    let expected_bins = ((NOW / 60) * 60 - (start / 60) * 60) / 60 + 1;
    assert_eq!(points.len() as i64, expected_bins);
}

#[test]
fn overlapping_raw_and_minute_bins_do_not_double_count() {
    let conn = test_conn();
    let minute_start = (NOW / 60) * 60;
    insert_raw(&conn, minute_start + 59, "eth0", 100.0, 200.0);
    insert_minute(&conn, minute_start, "eth0", (100.0, 200.0), (100.0, 200.0), 59);

    let points = query::speed_history(
        &conn,
        Some(minute_start),
        minute_start + 59,
        &InterfaceFilter::All,
        Resolution::Minute,
    )
    .unwrap();

    let max_up = points.iter().map(|p| p.upload_bps).fold(0.0, f64::max);
    let max_down = points.iter().map(|p| p.download_bps).fold(0.0, f64::max);
    assert_eq!(max_up, 100.0, "overlap must merge as MAX, not sum");
    assert_eq!(max_down, 200.0);
}

#[test]
fn peak_is_consistent_across_resolutions() {
    let conn = test_conn();
    let hour_start = (NOW / 3_600) * 3_600;
    insert_raw(&conn, hour_start + 10, "eth0", 1.0, 2.0);
    insert_raw(&conn, hour_start + 20, "eth0", 200.0, 400.0);

    for resolution in [Resolution::Minute, Resolution::Hour, Resolution::Day] {
        let points = query::speed_history(
            &conn,
            Some(hour_start),
            hour_start + 59,
            &InterfaceFilter::All,
            resolution,
        )
        .unwrap();
        let max_up = points.iter().map(|p| p.upload_bps).fold(0.0, f64::max);
        let max_down = points.iter().map(|p| p.download_bps).fold(0.0, f64::max);
        assert_eq!(max_up, 200.0, "upload peak lost at {resolution:?}");
        assert_eq!(max_down, 400.0, "download peak lost at {resolution:?}");
    }
}

#[test]
fn specific_interface_filter_excludes_others() {
    let conn = test_conn();
    let minute_start = (NOW / 60) * 60;
    insert_raw(&conn, minute_start + 1, "eth0", 100.0, 100.0);
    insert_raw(&conn, minute_start + 2, "wlan0", 900.0, 900.0);

    let points = query::speed_history(
        &conn,
        Some(minute_start),
        minute_start + 59,
        &InterfaceFilter::Named("eth0".to_string()),
        Resolution::Minute,
    )
    .unwrap();
    let max_up = points.iter().map(|p| p.upload_bps).fold(0.0, f64::max);
    assert_eq!(max_up, 100.0);
}

#[test]
fn total_bandwidth_integrates_avg_times_count() {
    let conn = test_conn();
    insert_raw(&conn, NOW - 10, "eth0", 100.0, 50.0);
    insert_raw(&conn, NOW - 9, "eth0", 300.0, 150.0);
    insert_minute(&conn, NOW - 86_400, "eth0", (10.0, 5.0), (90.0, 45.0), 60);
    insert_hour(&conn, NOW - 40 * 86_400, "eth0", (2.0, 1.0), (8.0, 4.0), 3_600);

    let totals =
        query::total_bandwidth(&conn, None, NOW, &InterfaceFilter::All).unwrap();
    let expected_up = 100.0 + 300.0 + 10.0 * 60.0 + 2.0 * 3_600.0;
    let expected_down = 50.0 + 150.0 + 5.0 * 60.0 + 1.0 * 3_600.0;
    assert!((totals.upload_bytes - expected_up).abs() < 1e-9);
    assert!((totals.download_bytes - expected_down).abs() < 1e-9);
}

#[test]
fn distinct_interfaces_spans_all_tiers() {
    let conn = test_conn();
    insert_raw(&conn, NOW, "eth0", 1.0, 1.0);
    insert_minute(&conn, NOW - 86_400, "wlan0", (1.0, 1.0), (1.0, 1.0), 1);
    insert_hour(&conn, NOW - 40 * 86_400, "tun0", (1.0, 1.0), (1.0, 1.0), 1);

    let names = query::distinct_interfaces(&conn).unwrap();
    assert_eq!(names, vec!["eth0", "tun0", "wlan0"]);
}

#[test]
fn v2_database_migrates_to_current_version_with_backup() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("speed_history.db");

    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL);
             INSERT INTO metadata (key, value) VALUES ('db_version', '2');
             CREATE TABLE speed_history_raw (
                 timestamp INTEGER NOT NULL, interface_name TEXT NOT NULL,
                 upload_bytes_sec REAL NOT NULL, download_bytes_sec REAL NOT NULL,
                 PRIMARY KEY (timestamp, interface_name)
             );
             CREATE TABLE speed_history_minute (
                 timestamp INTEGER NOT NULL, interface_name TEXT NOT NULL,
                 upload_avg REAL NOT NULL, download_avg REAL NOT NULL,
                 upload_max REAL NOT NULL, download_max REAL NOT NULL,
                 PRIMARY KEY (timestamp, interface_name)
             );
             CREATE INDEX idx_minute_timestamp ON speed_history_minute (timestamp);
             CREATE TABLE speed_history_hour (
                 timestamp INTEGER NOT NULL, interface_name TEXT NOT NULL,
                 upload_avg REAL NOT NULL, download_avg REAL NOT NULL,
                 upload_max REAL NOT NULL, download_max REAL NOT NULL,
                 PRIMARY KEY (timestamp, interface_name)
             );
             INSERT INTO speed_history_minute VALUES (60, 'eth0', 5.0, 6.0, 7.0, 8.0);",
        )
        .unwrap();
    }

    let mut conn = schema::open_connection(&db_path).unwrap();
    schema::ensure_schema(&mut conn, Some(&db_path)).unwrap();

    assert_eq!(schema::current_version(&conn), DB_VERSION);

    // Legacy rows got a defaulted sample_count.
    let count: i64 = conn
        .query_row(
            "SELECT sample_count FROM speed_history_minute WHERE timestamp = 60",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 1);

    // Hardware tables arrived with v5, bandwidth table with v3.
    let tables = table_names(&conn);
    assert!(tables.iter().any(|t| t == "hardware_stats_raw"));
    assert!(tables.iter().any(|t| t == "bandwidth_history"));

    // The pre-migration file was preserved.
    let backups: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().contains("bak.v2"))
        .collect();
    assert_eq!(backups.len(), 1, "expected a tagged backup of the v2 file");
}

#[test]
fn store_handle_persists_and_queries_through_worker() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("speed_history.db");
    let (events_tx, events_rx) = std::sync::mpsc::channel();

    let store = HistoryStore::open(db_path.clone(), Some(events_tx));
    let batch = vec![
        SpeedSample {
            epoch_seconds: NOW,
            iface_name: "eth0".to_string(),
            upload_bps: 10.0,
            download_bps: 20.0,
        },
        SpeedSample {
            epoch_seconds: NOW + 1,
            iface_name: "eth0".to_string(),
            upload_bps: 30.0,
            download_bps: 40.0,
        },
    ];
    assert!(store.enqueue_persist(batch));

    // Tasks are FIFO on one worker, so this query observes the insert.
    let points = store
        .speed_history(
            Some(NOW - 60),
            NOW + 60,
            InterfaceFilter::All,
            Resolution::Native,
        )
        .unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].upload_bps, 10.0);

    let names = store.distinct_interfaces().unwrap();
    assert_eq!(names, vec!["eth0"]);

    assert!(matches!(
        events_rx.try_recv(),
        Ok(StoreEvent::DatabaseUpdated)
    ));

    store.shutdown();
    assert!(db_path.exists());
}

#[test]
fn idempotent_ingest_ignores_duplicate_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path().join("dup.db"), None);

    let sample = SpeedSample {
        epoch_seconds: NOW,
        iface_name: "eth0".to_string(),
        upload_bps: 10.0,
        download_bps: 20.0,
    };
    assert!(store.enqueue_persist(vec![sample.clone()]));
    assert!(store.enqueue_persist(vec![sample]));

    let points = store
        .speed_history(
            Some(NOW - 1),
            NOW + 1,
            InterfaceFilter::All,
            Resolution::Native,
        )
        .unwrap();
    assert_eq!(points.len(), 1, "INSERT OR IGNORE must dedupe (epoch, iface)");
    store.shutdown();
}
