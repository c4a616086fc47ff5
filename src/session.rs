//! In-memory ring of the current session's aggregated samples.
//!
//! Backs the "Session" graph timeline without touching the database. One
//! producer (the controller thread) and one consumer (the graph worker)
//! share it behind a mutex; the ring is small and pushes are O(1).

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::sync_ext::MutexExt;

/// One aggregated (across monitored interfaces) sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSample {
    pub epoch_seconds: i64,
    pub upload_bps: f64,
    pub download_bps: f64,
}

#[derive(Debug)]
struct RingState {
    samples: VecDeque<SessionSample>,
    capacity: usize,
}

#[derive(Debug)]
pub struct SessionRing {
    state: Mutex<RingState>,
}

/// Ring capacity for a history window of `history_minutes` at one sample
/// every `update_rate_s` seconds.
pub fn capacity_for(history_minutes: u32, update_rate_s: f64) -> usize {
    let rate = if update_rate_s > 0.0 { update_rate_s } else { 1.0 };
    ((f64::from(history_minutes) * 60.0 / rate).round() as usize).clamp(10, 100_000)
}

impl SessionRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                samples: VecDeque::with_capacity(capacity.min(4_096)),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn with_settings(history_minutes: u32, update_rate_s: f64) -> Self {
        Self::new(capacity_for(history_minutes, update_rate_s))
    }

    pub fn push(&self, sample: SessionSample) {
        let mut state = self.state.lock_unpoisoned();
        while state.samples.len() >= state.capacity {
            state.samples.pop_front();
        }
        state.samples.push_back(sample);
    }

    /// Applies a new capacity, trimming the oldest samples if shrinking.
    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.state.lock_unpoisoned();
        state.capacity = capacity.max(1);
        while state.samples.len() > state.capacity {
            state.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock_unpoisoned().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples with `start <= epoch_seconds <= end`, oldest first.
    pub fn snapshot_range(&self, start: i64, end: i64) -> Vec<SessionSample> {
        let state = self.state.lock_unpoisoned();
        state
            .samples
            .iter()
            .filter(|sample| sample.epoch_seconds >= start && sample.epoch_seconds <= end)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(epoch: i64) -> SessionSample {
        SessionSample {
            epoch_seconds: epoch,
            upload_bps: 1.0,
            download_bps: 2.0,
        }
    }

    #[test]
    fn capacity_follows_history_window_and_rate() {
        assert_eq!(capacity_for(30, 1.0), 1_800);
        assert_eq!(capacity_for(30, 2.0), 900);
        assert_eq!(capacity_for(30, 0.0), 1_800, "degenerate rate defaults to 1s");
        assert_eq!(capacity_for(0, 1.0), 10, "floor keeps the graph drawable");
    }

    #[test]
    fn ring_drops_oldest_on_overflow() {
        let ring = SessionRing::new(3);
        for epoch in 0..5 {
            ring.push(sample(epoch));
        }
        let all = ring.snapshot_range(i64::MIN, i64::MAX);
        let epochs: Vec<i64> = all.iter().map(|s| s.epoch_seconds).collect();
        assert_eq!(epochs, vec![2, 3, 4]);
    }

    #[test]
    fn shrinking_capacity_trims_oldest() {
        let ring = SessionRing::new(10);
        for epoch in 0..10 {
            ring.push(sample(epoch));
        }
        ring.set_capacity(4);
        let epochs: Vec<i64> = ring
            .snapshot_range(i64::MIN, i64::MAX)
            .iter()
            .map(|s| s.epoch_seconds)
            .collect();
        assert_eq!(epochs, vec![6, 7, 8, 9]);
    }

    #[test]
    fn range_snapshot_filters_by_epoch() {
        let ring = SessionRing::new(100);
        for epoch in 0..50 {
            ring.push(sample(epoch));
        }
        let slice = ring.snapshot_range(10, 12);
        assert_eq!(slice.len(), 3);
        assert_eq!(slice[0].epoch_seconds, 10);
        assert_eq!(slice[2].epoch_seconds, 12);
    }
}
