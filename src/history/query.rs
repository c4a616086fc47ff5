//! Multi-tier read queries.

use log::warn;
use rusqlite::{Connection, OptionalExtension};

use super::schema::{SPEED_HOUR, SPEED_MINUTE, SPEED_RAW};
use super::{BandwidthTotals, InterfaceFilter, Resolution, SpeedPoint};

/// Hard ceiling on zero-padding; a window that would synthesize more bins
/// than this is returned unpadded.
const MAX_PADDED_BINS: i64 = 200_000;

/// Peak-preserving query across all three tiers.
///
/// Every tier contributes its own peak per `(bin, interface)`: the raw
/// value for the raw tier, the stored `*_max` for minute and hour. Where
/// tiers overlap in a bin the MAX of the sources wins (never a sum), so the
/// current minute cannot double-count. `"All"` sums across interfaces inside
/// each bin before peaks are taken across time. Missing bins of an explicit
/// resolution are padded with zeros on the resolution grid.
pub(super) fn speed_history(
    conn: &Connection,
    start: Option<i64>,
    end: i64,
    iface: &InterfaceFilter,
    resolution: Resolution,
) -> Result<Vec<SpeedPoint>, rusqlite::Error> {
    let period = resolution.period_seconds().unwrap_or(1);
    let start = match start {
        Some(start) => start,
        None => match earliest_timestamp(conn)? {
            Some(earliest) => earliest,
            None => return Ok(pad_empty(resolution, end)),
        },
    };

    let iface_clause = match iface {
        InterfaceFilter::All => "",
        InterfaceFilter::Named(_) => "AND interface_name = :iface",
    };

    let sql = format!(
        "WITH unified AS ( \
             SELECT (timestamp / :period) * :period AS bin, interface_name AS iface, \
                    MAX(upload_bytes_sec) AS up, MAX(download_bytes_sec) AS down \
             FROM {SPEED_RAW} \
             WHERE timestamp BETWEEN :start AND :end {iface_clause} \
             GROUP BY bin, iface \
             UNION ALL \
             SELECT (timestamp / :period) * :period AS bin, interface_name AS iface, \
                    MAX(upload_max) AS up, MAX(download_max) AS down \
             FROM {SPEED_MINUTE} \
             WHERE timestamp BETWEEN :start AND :end {iface_clause} \
             GROUP BY bin, iface \
             UNION ALL \
             SELECT (timestamp / :period) * :period AS bin, interface_name AS iface, \
                    MAX(upload_max) AS up, MAX(download_max) AS down \
             FROM {SPEED_HOUR} \
             WHERE timestamp BETWEEN :start AND :end {iface_clause} \
             GROUP BY bin, iface \
         ), merged AS ( \
             SELECT bin, iface, MAX(up) AS up, MAX(down) AS down \
             FROM unified GROUP BY bin, iface \
         ) \
         SELECT bin, SUM(up), SUM(down) FROM merged GROUP BY bin ORDER BY bin"
    );

    let mut stmt = conn.prepare(&sql)?;
    let mapper = |row: &rusqlite::Row<'_>| {
        Ok(SpeedPoint {
            timestamp: row.get(0)?,
            upload_bps: row.get(1)?,
            download_bps: row.get(2)?,
        })
    };
    let rows = match iface {
        InterfaceFilter::All => stmt.query_map(
            rusqlite::named_params! { ":period": period, ":start": start, ":end": end },
            mapper,
        )?,
        InterfaceFilter::Named(name) => stmt.query_map(
            rusqlite::named_params! {
                ":period": period,
                ":start": start,
                ":end": end,
                ":iface": name,
            },
            mapper,
        )?,
    };
    let points = rows.collect::<Result<Vec<_>, _>>()?;

    Ok(pad_to_grid(points, resolution, start, end))
}

/// Zero-fills missing bins on the resolution grid. Native-resolution results
/// are returned as stored; an explicit resolution always yields a timestamp
/// for every grid slot so callers never see holes or null timestamps.
fn pad_to_grid(
    points: Vec<SpeedPoint>,
    resolution: Resolution,
    start: i64,
    end: i64,
) -> Vec<SpeedPoint> {
    let Some(period) = resolution.period_seconds() else {
        return points;
    };
    let first_bin = start.div_euclid(period) * period;
    let last_bin = end.div_euclid(period) * period;
    if last_bin < first_bin {
        return points;
    }
    let bins = (last_bin - first_bin) / period + 1;
    if bins > MAX_PADDED_BINS {
        warn!("window spans {bins} bins at this resolution; skipping zero padding");
        return points;
    }

    let mut padded = Vec::with_capacity(bins as usize);
    let mut existing = points.into_iter().peekable();
    let mut bin = first_bin;
    while bin <= last_bin {
        while existing.peek().is_some_and(|point| point.timestamp < bin) {
            existing.next();
        }
        match existing.peek() {
            Some(point) if point.timestamp == bin => {
                padded.push(*point);
                existing.next();
            }
            _ => padded.push(SpeedPoint {
                timestamp: bin,
                upload_bps: 0.0,
                download_bps: 0.0,
            }),
        }
        bin += period;
    }
    padded
}

fn pad_empty(resolution: Resolution, end: i64) -> Vec<SpeedPoint> {
    // No stored data and no explicit start: a single zero point keeps the
    // caller's timeline non-empty without inventing a range.
    match resolution.period_seconds() {
        Some(period) => vec![SpeedPoint {
            timestamp: end.div_euclid(period) * period,
            upload_bps: 0.0,
            download_bps: 0.0,
        }],
        None => Vec::new(),
    }
}

/// Integral of transferred bytes over the window.
///
/// Raw rows integrate as one second each; aggregated tiers contribute
/// `avg * sample_count`, which reconstructs the underlying per-second sum
/// exactly regardless of how densely the bins were observed.
pub(super) fn total_bandwidth(
    conn: &Connection,
    start: Option<i64>,
    end: i64,
    iface: &InterfaceFilter,
) -> Result<BandwidthTotals, rusqlite::Error> {
    let start = start.unwrap_or(0);
    let iface_clause = match iface {
        InterfaceFilter::All => "",
        InterfaceFilter::Named(_) => "AND interface_name = :iface",
    };
    let sql = format!(
        "SELECT COALESCE(SUM(up), 0), COALESCE(SUM(down), 0) FROM ( \
             SELECT SUM(upload_bytes_sec) AS up, SUM(download_bytes_sec) AS down \
             FROM {SPEED_RAW} WHERE timestamp BETWEEN :start AND :end {iface_clause} \
             UNION ALL \
             SELECT SUM(upload_avg * sample_count), SUM(download_avg * sample_count) \
             FROM {SPEED_MINUTE} WHERE timestamp BETWEEN :start AND :end {iface_clause} \
             UNION ALL \
             SELECT SUM(upload_avg * sample_count), SUM(download_avg * sample_count) \
             FROM {SPEED_HOUR} WHERE timestamp BETWEEN :start AND :end {iface_clause} \
         )"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mapper = |row: &rusqlite::Row<'_>| {
        Ok(BandwidthTotals {
            upload_bytes: row.get(0)?,
            download_bytes: row.get(1)?,
        })
    };
    let totals = match iface {
        InterfaceFilter::All => stmt.query_row(
            rusqlite::named_params! { ":start": start, ":end": end },
            mapper,
        )?,
        InterfaceFilter::Named(name) => stmt.query_row(
            rusqlite::named_params! { ":start": start, ":end": end, ":iface": name },
            mapper,
        )?,
    };
    Ok(totals)
}

pub(super) fn distinct_interfaces(conn: &Connection) -> Result<Vec<String>, rusqlite::Error> {
    let sql = format!(
        "SELECT DISTINCT interface_name FROM ( \
             SELECT interface_name FROM {SPEED_RAW} \
             UNION SELECT interface_name FROM {SPEED_MINUTE} \
             UNION SELECT interface_name FROM {SPEED_HOUR} \
         ) ORDER BY interface_name"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect()
}

pub(super) fn earliest_timestamp(conn: &Connection) -> Result<Option<i64>, rusqlite::Error> {
    conn.query_row(
        &format!(
            "SELECT MIN(ts) FROM ( \
                 SELECT MIN(timestamp) AS ts FROM {SPEED_RAW} \
                 UNION ALL SELECT MIN(timestamp) FROM {SPEED_MINUTE} \
                 UNION ALL SELECT MIN(timestamp) FROM {SPEED_HOUR} \
             )",
            ),
        [],
        |row| row.get::<_, Option<i64>>(0),
    )
    .optional()
    .map(|value| value.flatten())
}
