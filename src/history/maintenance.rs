//! Periodic maintenance: eager tier rollups, retention, vacuum.

use log::{debug, info};
use rusqlite::Connection;

use super::schema::{self, HW_MINUTE, HW_RAW, SPEED_HOUR, SPEED_MINUTE, SPEED_RAW};

/// Raw rows older than this are rolled into the minute tier.
const RAW_HORIZON_SECS: i64 = 24 * 3_600;
/// Minute rows older than this are rolled into the hour tier.
const MINUTE_HORIZON_SECS: i64 = 30 * 86_400;
/// Hardware minute rows are kept this long.
const HW_RETENTION_SECS: i64 = 30 * 86_400;
/// Delay before a retention reduction actually deletes rows.
const RETENTION_GRACE_SECS: i64 = 48 * 3_600;

const DEFAULT_RETENTION_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceOutcome {
    pub aggregated_minute_rows: usize,
    pub aggregated_hour_rows: usize,
    pub pruned: bool,
    /// A retention reduction was newly scheduled this pass.
    pub grace_scheduled: bool,
}

/// Runs one full maintenance pass with `now` as the reference time.
///
/// Rollups and pruning commit in a single transaction; `VACUUM` (which
/// cannot run inside one) follows only when rows were actually pruned.
pub(super) fn run_maintenance(
    conn: &mut Connection,
    retention_days: u32,
    now: i64,
) -> Result<MaintenanceOutcome, rusqlite::Error> {
    let mut outcome = MaintenanceOutcome::default();

    let tx = conn.transaction()?;
    outcome.aggregated_minute_rows = aggregate_raw_to_minute(&tx, now)?;
    outcome.aggregated_hour_rows = aggregate_minute_to_hour(&tx, now)?;
    aggregate_hardware_raw_to_minute(&tx, now)?;
    prune_hardware(&tx, now)?;
    let (pruned, scheduled) = prune_with_grace_period(&tx, retention_days, now)?;
    outcome.pruned = pruned;
    outcome.grace_scheduled = scheduled;
    schema::meta_set(&tx, "last_maintenance_at", &now.to_string())?;
    tx.commit()?;

    if outcome.pruned {
        info!("significant data pruned, running VACUUM");
        conn.execute_batch("VACUUM;")?;
    }

    Ok(outcome)
}

/// Raw rows older than 24 h collapse into per-minute bins: AVG for the
/// averages, MAX for the peaks, COUNT(*) as the weight. The source rows are
/// deleted in the same transaction, keeping tier domains disjoint.
fn aggregate_raw_to_minute(
    tx: &rusqlite::Transaction<'_>,
    now: i64,
) -> Result<usize, rusqlite::Error> {
    let cutoff = now - RAW_HORIZON_SECS;
    let inserted = tx.execute(
        &format!(
            "INSERT OR IGNORE INTO {SPEED_MINUTE} \
             (timestamp, interface_name, upload_avg, download_avg, upload_max, download_max, sample_count) \
             SELECT (timestamp / 60) * 60 AS minute_timestamp, interface_name, \
                    AVG(upload_bytes_sec), AVG(download_bytes_sec), \
                    MAX(upload_bytes_sec), MAX(download_bytes_sec), COUNT(*) \
             FROM {SPEED_RAW} \
             WHERE timestamp < ?1 \
             GROUP BY minute_timestamp, interface_name"
        ),
        [cutoff],
    )?;
    let deleted = tx.execute(&format!("DELETE FROM {SPEED_RAW} WHERE timestamp < ?1"), [cutoff])?;
    if deleted > 0 {
        debug!("rolled {deleted} raw rows into {inserted} minute rows");
    }
    Ok(inserted)
}

/// Minute rows older than 30 d collapse into per-hour bins. The average is
/// weighted by sample_count so `SUM(avg * count)` is preserved exactly;
/// peaks carry through as `MAX(max)`.
fn aggregate_minute_to_hour(
    tx: &rusqlite::Transaction<'_>,
    now: i64,
) -> Result<usize, rusqlite::Error> {
    let cutoff = now - MINUTE_HORIZON_SECS;
    let inserted = tx.execute(
        &format!(
            "INSERT OR IGNORE INTO {SPEED_HOUR} \
             (timestamp, interface_name, upload_avg, download_avg, upload_max, download_max, sample_count) \
             SELECT (timestamp / 3600) * 3600 AS hour_timestamp, interface_name, \
                    SUM(upload_avg * sample_count) / NULLIF(SUM(sample_count), 0), \
                    SUM(download_avg * sample_count) / NULLIF(SUM(sample_count), 0), \
                    MAX(upload_max), MAX(download_max), SUM(sample_count) \
             FROM {SPEED_MINUTE} \
             WHERE timestamp < ?1 \
             GROUP BY hour_timestamp, interface_name"
        ),
        [cutoff],
    )?;
    let deleted = tx.execute(
        &format!("DELETE FROM {SPEED_MINUTE} WHERE timestamp < ?1"),
        [cutoff],
    )?;
    if deleted > 0 {
        debug!("rolled {deleted} minute rows into {inserted} hour rows");
    }
    Ok(inserted)
}

fn aggregate_hardware_raw_to_minute(
    tx: &rusqlite::Transaction<'_>,
    now: i64,
) -> Result<(), rusqlite::Error> {
    let cutoff = now - RAW_HORIZON_SECS;
    tx.execute(
        &format!(
            "INSERT OR IGNORE INTO {HW_MINUTE} (timestamp, stat_type, avg_value, max_value, sample_count) \
             SELECT (timestamp / 60) * 60, stat_type, AVG(value), MAX(value), COUNT(*) \
             FROM {HW_RAW} WHERE timestamp < ?1 \
             GROUP BY (timestamp / 60) * 60, stat_type"
        ),
        [cutoff],
    )?;
    tx.execute(&format!("DELETE FROM {HW_RAW} WHERE timestamp < ?1"), [cutoff])?;
    Ok(())
}

fn prune_hardware(tx: &rusqlite::Transaction<'_>, now: i64) -> Result<(), rusqlite::Error> {
    let cutoff = now - HW_RETENTION_SECS;
    tx.execute(&format!("DELETE FROM {HW_MINUTE} WHERE timestamp < ?1"), [cutoff])?;
    Ok(())
}

/// Retention with a 48 h grace window.
///
/// A reduction never deletes immediately: it is scheduled, and only a
/// maintenance pass after the window expires performs it. Raising retention
/// cancels a pending reduction. Returns `(pruned_any, newly_scheduled)`.
fn prune_with_grace_period(
    tx: &rusqlite::Transaction<'_>,
    retention_days: u32,
    now: i64,
) -> Result<(bool, bool), rusqlite::Error> {
    let current_retention = schema::meta_get_i64(tx, "current_retention_days")?
        .unwrap_or(DEFAULT_RETENTION_DAYS);
    let prune_scheduled_at = schema::meta_get_i64(tx, "prune_scheduled_at")?;
    let requested = i64::from(retention_days);

    if let Some(scheduled_at) = prune_scheduled_at {
        if scheduled_at <= now {
            return match schema::meta_get_i64(tx, "pending_retention_days")? {
                Some(pending) => {
                    info!("retention grace period expired; pruning data older than {pending} days");
                    let cutoff = now - pending * 86_400;
                    let pruned = tx.execute(
                        &format!("DELETE FROM {SPEED_HOUR} WHERE timestamp < ?1"),
                        [cutoff],
                    )?;
                    schema::meta_set(tx, "current_retention_days", &pending.to_string())?;
                    schema::meta_delete(tx, &["prune_scheduled_at", "pending_retention_days"])?;
                    Ok((pruned > 0, false))
                }
                None => {
                    // Schedule key without a pending value is stale state.
                    schema::meta_delete(tx, &["prune_scheduled_at"])?;
                    Ok((false, false))
                }
            };
        }
        if requested < current_retention {
            // Inside the grace window for an already-scheduled reduction.
            return Ok((false, false));
        }
    }

    if requested < current_retention {
        let grace_end = now + RETENTION_GRACE_SECS;
        schema::meta_set(tx, "prune_scheduled_at", &grace_end.to_string())?;
        schema::meta_set(tx, "pending_retention_days", &requested.to_string())?;
        info!("retention reduced to {requested} days; prune scheduled in 48 hours");
        return Ok((false, true));
    }

    if requested > current_retention {
        if prune_scheduled_at.is_some() {
            schema::meta_delete(tx, &["prune_scheduled_at", "pending_retention_days"])?;
            info!("retention increased; pending prune cancelled");
        }
        schema::meta_set(tx, "current_retention_days", &requested.to_string())?;
    }

    // Standard prune by the (possibly just-raised) effective retention.
    let effective = requested.max(current_retention);
    let cutoff = now - effective * 86_400;
    let pruned = tx.execute(
        &format!("DELETE FROM {SPEED_HOUR} WHERE timestamp < ?1"),
        [cutoff],
    )?;
    Ok((pruned > 0, false))
}
