//! Interaction-layer helpers: live-update throttling, zoom-reset clicks,
//! and the hover index.

use std::time::{Duration, Instant};

/// Rebuilds are throttled to this spacing during live updates.
pub const LIVE_REBUILD_MIN_SPACING: Duration = Duration::from_millis(150);
/// A brush this small (manhattan distance, px) is a click, which resets
/// zoom instead of zooming.
pub const CLICK_RESET_MANHATTAN_PX: i32 = 5;

pub fn is_click_reset(dx: i32, dy: i32) -> bool {
    dx.abs() + dy.abs() < CLICK_RESET_MANHATTAN_PX
}

/// Gates 1 Hz live re-renders: throttled, and suspended entirely while the
/// user is zooming or panning.
#[derive(Debug)]
pub struct LiveUpdatePolicy {
    last_rebuild: Option<Instant>,
    suspended: bool,
}

impl Default for LiveUpdatePolicy {
    fn default() -> Self {
        Self {
            last_rebuild: None,
            suspended: false,
        }
    }
}

impl LiveUpdatePolicy {
    /// User started interacting (brush selection, pan).
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    /// Interaction ended; live updates may resume.
    pub fn resume(&mut self) {
        self.suspended = false;
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Whether a rebuild may run now; records it when allowed.
    pub fn should_rebuild(&mut self, now: Instant) -> bool {
        if self.suspended {
            return false;
        }
        match self.last_rebuild {
            Some(last) if now.duration_since(last) < LIVE_REBUILD_MIN_SPACING => false,
            _ => {
                self.last_rebuild = Some(now);
                true
            }
        }
    }
}

/// Sorted-timestamp index for O(log n) nearest-point hover lookups.
#[derive(Debug, Default)]
pub struct HoverIndex {
    timestamps: Vec<f64>,
}

impl HoverIndex {
    /// Builds from timestamps already sorted ascending (the render series).
    pub fn new(timestamps: Vec<f64>) -> Self {
        Self { timestamps }
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Index of the point whose timestamp is closest to `ts`.
    pub fn nearest(&self, ts: f64) -> Option<usize> {
        if self.timestamps.is_empty() {
            return None;
        }
        let insertion = self
            .timestamps
            .partition_point(|candidate| *candidate < ts);
        let candidates = [insertion.checked_sub(1), Some(insertion)];
        candidates
            .into_iter()
            .flatten()
            .filter(|i| *i < self.timestamps.len())
            .min_by(|a, b| {
                let da = (self.timestamps[*a] - ts).abs();
                let db = (self.timestamps[*b] - ts).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}
