//! Tiered persistent speed history.
//!
//! A cooperative single-writer engine on SQLite with WAL journaling. A
//! dedicated worker thread owns the connection and serializes every mutation
//! and query through a FIFO task queue; callers block on a reply channel for
//! reads so the connection never crosses threads.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::events::StoreEvent;

mod maintenance;
mod query;
mod schema;

#[cfg(test)]
mod tests;

pub use maintenance::MaintenanceOutcome;
pub use schema::DB_VERSION;

/// One per-interface speed measurement, as ingested by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedSample {
    pub epoch_seconds: i64,
    pub iface_name: String,
    pub upload_bps: f64,
    pub download_bps: f64,
}

/// One point of a history query result. Speeds are the peaks across the
/// underlying bin, in bytes per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedPoint {
    pub timestamp: i64,
    pub upload_bps: f64,
    pub download_bps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Rows at whatever granularity each tier stores; no grid padding.
    Native,
    Minute,
    Hour,
    Day,
}

impl Resolution {
    /// Bin width in seconds; `None` for native rows.
    pub fn period_seconds(self) -> Option<i64> {
        match self {
            Resolution::Native => None,
            Resolution::Minute => Some(60),
            Resolution::Hour => Some(3_600),
            Resolution::Day => Some(86_400),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceFilter {
    /// Sum across interfaces within each bin, then take peaks across time.
    All,
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BandwidthTotals {
    pub upload_bytes: f64,
    pub download_bytes: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database initialization failed: {0}")]
    Init(String),
    #[error("history worker is gone")]
    WorkerGone,
}

const TASK_QUEUE_DEPTH: usize = 64;
const WRITE_BUFFER_CAP: usize = 128;
const INIT_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
const SLOW_STATEMENT_BUDGET: Duration = Duration::from_millis(250);
const SHUTDOWN_WAIT: Duration = Duration::from_secs(2);

enum Task {
    PersistSpeed(Vec<SpeedSample>),
    Maintenance {
        retention_days: u32,
        now_override: Option<i64>,
    },
    SpeedHistory {
        start: Option<i64>,
        end: i64,
        iface: InterfaceFilter,
        resolution: Resolution,
        reply: Sender<Result<Vec<SpeedPoint>, HistoryError>>,
    },
    TotalBandwidth {
        start: Option<i64>,
        end: i64,
        iface: InterfaceFilter,
        reply: Sender<Result<BandwidthTotals, HistoryError>>,
    },
    DistinctInterfaces {
        reply: Sender<Result<Vec<String>, HistoryError>>,
    },
    EarliestTimestamp {
        reply: Sender<Result<Option<i64>, HistoryError>>,
    },
    Shutdown {
        ack: Sender<()>,
    },
}

/// Handle to the store worker. Cloneable sender side; the worker thread is
/// joined (bounded) when the owning handle shuts down.
pub struct HistoryStore {
    tx: SyncSender<Task>,
    handle: Option<JoinHandle<()>>,
}

impl HistoryStore {
    /// Opens (or creates) the database at `db_path` and starts the worker.
    ///
    /// Initialization failures inside the worker degrade to an in-memory
    /// database and are reported through `events`; the handle itself is
    /// always usable.
    pub fn open(db_path: PathBuf, events: Option<Sender<StoreEvent>>) -> Self {
        let (tx, rx) = mpsc::sync_channel(TASK_QUEUE_DEPTH);
        let handle = thread::Builder::new()
            .name("nst-history".to_string())
            .spawn(move || worker_main(&db_path, &rx, events.as_ref()))
            .ok();
        if handle.is_none() {
            error!("failed to spawn history worker thread");
        }
        Self { tx, handle }
    }

    /// Queues a batch of samples for insertion. Returns `false` when the
    /// task queue is full or the worker is gone; the caller decides what to
    /// drop.
    pub fn enqueue_persist(&self, batch: Vec<SpeedSample>) -> bool {
        if batch.is_empty() {
            return true;
        }
        match self.tx.try_send(Task::PersistSpeed(batch)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("history task queue full; dropping speed batch");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Queues a maintenance pass (rollups, retention, vacuum).
    pub fn run_maintenance(&self, retention_days: u32) {
        let _ = self.tx.try_send(Task::Maintenance {
            retention_days,
            now_override: None,
        });
    }

    /// Maintenance with an explicit "now", for deterministic testing of the
    /// retention grace protocol.
    pub fn run_maintenance_at(&self, retention_days: u32, now: i64) {
        let _ = self.tx.try_send(Task::Maintenance {
            retention_days,
            now_override: Some(now),
        });
    }

    /// Tiered multi-resolution history query. Blocks until the worker
    /// replies; call from a worker thread, never the UI thread.
    pub fn speed_history(
        &self,
        start: Option<i64>,
        end: i64,
        iface: InterfaceFilter,
        resolution: Resolution,
    ) -> Result<Vec<SpeedPoint>, HistoryError> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(Task::SpeedHistory {
                start,
                end,
                iface,
                resolution,
                reply,
            })
            .map_err(|_| HistoryError::WorkerGone)?;
        rx.recv().map_err(|_| HistoryError::WorkerGone)?
    }

    /// Integral of transferred bytes over `[start, end]`.
    pub fn total_bandwidth(
        &self,
        start: Option<i64>,
        end: i64,
        iface: InterfaceFilter,
    ) -> Result<BandwidthTotals, HistoryError> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(Task::TotalBandwidth {
                start,
                end,
                iface,
                reply,
            })
            .map_err(|_| HistoryError::WorkerGone)?;
        rx.recv().map_err(|_| HistoryError::WorkerGone)?
    }

    /// Union of interface names across all three tiers.
    pub fn distinct_interfaces(&self) -> Result<Vec<String>, HistoryError> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(Task::DistinctInterfaces { reply })
            .map_err(|_| HistoryError::WorkerGone)?;
        rx.recv().map_err(|_| HistoryError::WorkerGone)?
    }

    /// Oldest stored timestamp across all tiers, if any.
    pub fn earliest_timestamp(&self) -> Result<Option<i64>, HistoryError> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(Task::EarliestTimestamp { reply })
            .map_err(|_| HistoryError::WorkerGone)?;
        rx.recv().map_err(|_| HistoryError::WorkerGone)?
    }

    /// Flushes and stops the worker, waiting up to two seconds before
    /// abandoning the thread with a warning.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let (ack, ack_rx) = mpsc::channel();
        if self.tx.send(Task::Shutdown { ack }).is_ok() {
            match ack_rx.recv_timeout(SHUTDOWN_WAIT) {
                Ok(()) => {
                    let _ = handle.join();
                    return;
                }
                Err(_) => {
                    warn!("history worker did not stop within {SHUTDOWN_WAIT:?}; detaching");
                    return;
                }
            }
        }
        let _ = handle.join();
    }
}

impl Drop for HistoryStore {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Size of the database file in mebibytes, 0.0 when absent.
pub fn db_size_mb(path: &Path) -> f64 {
    std::fs::metadata(path)
        .map(|meta| meta.len() as f64 / (1024.0 * 1024.0))
        .unwrap_or(0.0)
}

struct WorkerState {
    conn: Connection,
    db_path: Option<PathBuf>,
    /// Batches buffered while the connection is unhealthy.
    write_buffer: VecDeque<Vec<SpeedSample>>,
}

fn worker_main(db_path: &Path, rx: &Receiver<Task>, events: Option<&Sender<StoreEvent>>) {
    let mut state = match initialize_with_retry(db_path) {
        Ok(conn) => WorkerState {
            conn,
            db_path: Some(db_path.to_path_buf()),
            write_buffer: VecDeque::new(),
        },
        Err(err) => {
            error!("history store initialization failed: {err}; using in-memory fallback");
            emit(events, StoreEvent::Degraded(err.to_string()));
            match in_memory_fallback() {
                Some(conn) => WorkerState {
                    conn,
                    db_path: None,
                    write_buffer: VecDeque::new(),
                },
                None => {
                    // Nothing to serve queries from; drain tasks with errors.
                    drain_with_errors(rx);
                    return;
                }
            }
        }
    };

    debug!("history worker started (db={})", db_path.display());

    loop {
        let task = match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(task) => task,
            Err(RecvTimeoutError::Timeout) => {
                flush_write_buffer(&mut state, events);
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match task {
            Task::PersistSpeed(batch) => {
                buffer_push(&mut state.write_buffer, batch);
                flush_write_buffer(&mut state, events);
            }
            Task::Maintenance {
                retention_days,
                now_override,
            } => {
                let now = now_override.unwrap_or_else(|| chrono::Utc::now().timestamp());
                match timed("maintenance", || {
                    maintenance::run_maintenance(&mut state.conn, retention_days, now)
                }) {
                    Ok(outcome) => {
                        info!(
                            "maintenance done: {} minute rows, {} hour rows, pruned={}",
                            outcome.aggregated_minute_rows,
                            outcome.aggregated_hour_rows,
                            outcome.pruned
                        );
                        emit(events, StoreEvent::DatabaseUpdated);
                    }
                    Err(err) => {
                        error!("maintenance failed: {err}");
                        try_reconnect(&mut state, &err);
                    }
                }
            }
            Task::SpeedHistory {
                start,
                end,
                iface,
                resolution,
                reply,
            } => {
                let result = timed("speed_history", || {
                    query::speed_history(&state.conn, start, end, &iface, resolution)
                })
                .map_err(HistoryError::from);
                let _ = reply.send(result);
            }
            Task::TotalBandwidth {
                start,
                end,
                iface,
                reply,
            } => {
                let result = timed("total_bandwidth", || {
                    query::total_bandwidth(&state.conn, start, end, &iface)
                })
                .map_err(HistoryError::from);
                let _ = reply.send(result);
            }
            Task::DistinctInterfaces { reply } => {
                let result = query::distinct_interfaces(&state.conn).map_err(HistoryError::from);
                let _ = reply.send(result);
            }
            Task::EarliestTimestamp { reply } => {
                let result = query::earliest_timestamp(&state.conn).map_err(HistoryError::from);
                let _ = reply.send(result);
            }
            Task::Shutdown { ack } => {
                flush_write_buffer(&mut state, events);
                let _ = ack.send(());
                break;
            }
        }
    }

    debug!("history worker stopped");
}

fn initialize_with_retry(db_path: &Path) -> Result<Connection, HistoryError> {
    let mut last_error = String::new();
    for attempt in 0..INIT_ATTEMPTS {
        match schema::open_connection(db_path)
            .map_err(HistoryError::from)
            .and_then(|mut conn| {
                schema::ensure_schema(&mut conn, Some(db_path))?;
                Ok(conn)
            }) {
            Ok(conn) => return Ok(conn),
            Err(err) => {
                let delay = backoff_delay(attempt);
                error!(
                    "database initialization attempt {} failed: {err}; retrying in {delay:?}",
                    attempt + 1
                );
                last_error = err.to_string();
                if attempt + 1 < INIT_ATTEMPTS {
                    thread::sleep(delay);
                }
            }
        }
    }
    Err(HistoryError::Init(last_error))
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(2u32.saturating_pow(attempt));
    exp.min(BACKOFF_MAX)
}

fn in_memory_fallback() -> Option<Connection> {
    let mut conn = Connection::open_in_memory().ok()?;
    schema::ensure_schema(&mut conn, None).ok()?;
    Some(conn)
}

fn buffer_push(buffer: &mut VecDeque<Vec<SpeedSample>>, batch: Vec<SpeedSample>) {
    if buffer.len() >= WRITE_BUFFER_CAP {
        warn!("history write buffer full; dropping oldest batch");
        buffer.pop_front();
    }
    buffer.push_back(batch);
}

fn flush_write_buffer(state: &mut WorkerState, events: Option<&Sender<StoreEvent>>) {
    while let Some(batch) = state.write_buffer.front() {
        match persist_batch(&mut state.conn, batch) {
            Ok(()) => {
                state.write_buffer.pop_front();
                emit(events, StoreEvent::DatabaseUpdated);
            }
            Err(err) => {
                error!("failed to persist speed batch: {err}");
                try_reconnect(state, &err);
                // Batch stays buffered for the next attempt.
                break;
            }
        }
    }
}

fn persist_batch(conn: &mut Connection, batch: &[SpeedSample]) -> Result<(), rusqlite::Error> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO speed_history_raw \
             (timestamp, interface_name, upload_bytes_sec, download_bytes_sec) \
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for sample in batch {
            stmt.execute(rusqlite::params![
                sample.epoch_seconds,
                sample.iface_name,
                sample.upload_bps,
                sample.download_bps,
            ])?;
        }
    }
    tx.commit()
}

/// Closes and re-opens the connection after a connection-level failure.
/// Pure statement errors (constraint violations and the like) do not warrant
/// a reconnect.
fn try_reconnect(state: &mut WorkerState, err: &rusqlite::Error) {
    if !is_connection_error(err) {
        return;
    }
    let Some(path) = state.db_path.clone() else {
        return;
    };
    for attempt in 0..INIT_ATTEMPTS {
        thread::sleep(backoff_delay(attempt));
        match schema::open_connection(&path) {
            Ok(conn) => {
                info!("reconnected to history database");
                state.conn = conn;
                return;
            }
            Err(reopen_err) => {
                warn!(
                    "reconnect attempt {} failed: {reopen_err}",
                    attempt + 1
                );
            }
        }
    }
    error!("giving up reconnecting to the history database for now");
}

fn is_connection_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy
                    | rusqlite::ffi::ErrorCode::DatabaseLocked
                    | rusqlite::ffi::ErrorCode::CannotOpen
                    | rusqlite::ffi::ErrorCode::DiskFull
                    | rusqlite::ffi::ErrorCode::SystemIoFailure,
                ..
            },
            _,
        )
    )
}

fn drain_with_errors(rx: &Receiver<Task>) {
    while let Ok(task) = rx.recv() {
        match task {
            Task::SpeedHistory { reply, .. } => {
                let _ = reply.send(Err(HistoryError::Init("no database".into())));
            }
            Task::TotalBandwidth { reply, .. } => {
                let _ = reply.send(Err(HistoryError::Init("no database".into())));
            }
            Task::DistinctInterfaces { reply } => {
                let _ = reply.send(Err(HistoryError::Init("no database".into())));
            }
            Task::EarliestTimestamp { reply } => {
                let _ = reply.send(Err(HistoryError::Init("no database".into())));
            }
            Task::Shutdown { ack } => {
                let _ = ack.send(());
                return;
            }
            Task::PersistSpeed(_) | Task::Maintenance { .. } => {}
        }
    }
}

fn emit(events: Option<&Sender<StoreEvent>>, event: StoreEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// Runs `f`, logging a warning when it exceeds the soft statement budget.
fn timed<T>(label: &str, f: impl FnOnce() -> T) -> T {
    let started = Instant::now();
    let result = f();
    let elapsed = started.elapsed();
    if elapsed > SLOW_STATEMENT_BUDGET {
        warn!("slow history task '{label}': {elapsed:?}");
    }
    result
}
