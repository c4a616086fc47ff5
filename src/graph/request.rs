use std::sync::atomic::{AtomicU64, Ordering};

/// Timeline choices offered by the graph window, in slider order.
pub const PERIOD_LABELS: [&str; 9] = [
    "System Uptime",
    "Session",
    "3 Hours",
    "6 Hours",
    "12 Hours",
    "24 Hours",
    "1 Week",
    "1 Month",
    "All",
];

/// System boot time as epoch seconds.
pub fn boot_time_epoch() -> i64 {
    sysinfo::System::boot_time() as i64
}

/// Resolves a period label into a query window ending at `now`.
///
/// `None` as start means "everything stored". "Session" uses the session
/// ring rather than a store window, so it reports the session start.
pub fn time_range_for_period(
    period: &str,
    now: i64,
    session_start: i64,
    boot_time: i64,
) -> (Option<i64>, i64) {
    let start = match period {
        "System Uptime" => Some(boot_time),
        "Session" => Some(session_start),
        "3 Hours" => Some(now - 3 * 3_600),
        "6 Hours" => Some(now - 6 * 3_600),
        "12 Hours" => Some(now - 12 * 3_600),
        "24 Hours" => Some(now - 86_400),
        "1 Week" => Some(now - 7 * 86_400),
        "1 Month" => Some(now - 30 * 86_400),
        _ => None,
    };
    (start, now)
}

/// Parameters of one graph data fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphRequest {
    /// Window start (epoch seconds); `None` means "everything stored".
    pub start: Option<i64>,
    /// Window end (epoch seconds).
    pub end: i64,
    /// Interface name filter; `None` aggregates across all interfaces.
    pub iface: Option<String>,
    /// Serve from the in-memory session ring instead of the store.
    pub is_session_view: bool,
    /// Strictly increasing per window; stale responses are dropped by it.
    pub sequence_id: u64,
}

/// Issues strictly increasing sequence ids.
#[derive(Debug, Default)]
pub struct RequestCounter {
    next: AtomicU64,
}

impl RequestCounter {
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Receiver-side ordering guard: a response older than the newest processed
/// one must never repaint the graph backwards.
#[derive(Debug, Default)]
pub struct SequenceGate {
    last_processed: u64,
}

impl SequenceGate {
    /// Accepts `sequence_id` if it is not older than anything processed,
    /// recording it as processed.
    pub fn accept(&mut self, sequence_id: u64) -> bool {
        if sequence_id < self.last_processed {
            return false;
        }
        self.last_processed = sequence_id;
        true
    }

    pub fn last_processed(&self) -> u64 {
        self.last_processed
    }
}
