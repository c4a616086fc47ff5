use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use sysinfo::Networks;

use super::{CounterSnapshot, IfaceCounters};
use crate::sync_ext::{CondvarExt, MutexExt};

pub const MIN_INTERVAL_S: f64 = 0.1;
pub const MAX_INTERVAL_S: f64 = 10.0;

/// Consecutive empty reads before the sampler gives up.
const MAX_CONSECUTIVE_FAILURES: u32 = 10;
/// The interface list itself is re-enumerated every N ticks so counters for
/// newly appeared adapters (VPN up, USB NIC) start flowing.
const RELIST_EVERY_TICKS: u64 = 30;

pub fn clamp_interval(interval_s: f64) -> f64 {
    if interval_s.is_finite() {
        interval_s.clamp(MIN_INTERVAL_S, MAX_INTERVAL_S)
    } else {
        1.0
    }
}

#[derive(Debug)]
pub enum SamplerMessage {
    Snapshot(CounterSnapshot),
    /// The circuit breaker tripped; the sampler thread has stopped.
    Fatal(String),
}

#[derive(Debug)]
struct SamplerShared {
    stop: AtomicBool,
    interval_ms: AtomicU64,
    wake_lock: Mutex<()>,
    wake_cv: Condvar,
}

/// Owns the counter-polling thread.
///
/// The loop sleeps `interval` between reads on a monotonic clock and never
/// compensates for drift; wall-clock changes cannot affect pacing. Snapshots
/// go out over a bounded channel and are dropped (not blocked on) when the
/// consumer is behind.
#[derive(Debug)]
pub struct CounterSampler {
    shared: Arc<SamplerShared>,
    handle: Option<JoinHandle<()>>,
}

impl CounterSampler {
    pub fn start(interval_s: f64, tx: SyncSender<SamplerMessage>) -> Self {
        let shared = Arc::new(SamplerShared {
            stop: AtomicBool::new(false),
            interval_ms: AtomicU64::new((clamp_interval(interval_s) * 1_000.0) as u64),
            wake_lock: Mutex::new(()),
            wake_cv: Condvar::new(),
        });

        let loop_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("nst-sampler".to_string())
            .spawn(move || sampler_loop(&loop_shared, &tx))
            .ok();
        if handle.is_none() {
            error!("failed to spawn sampler thread");
        }

        info!("counter sampler started (interval {:.2}s)", clamp_interval(interval_s));
        Self { shared, handle }
    }

    /// Applies a new polling interval without restarting the thread.
    pub fn set_interval(&self, interval_s: f64) {
        let clamped = clamp_interval(interval_s);
        self.shared
            .interval_ms
            .store((clamped * 1_000.0) as u64, Ordering::Relaxed);
        self.shared.wake_cv.notify_all();
        debug!("sampler interval updated to {clamped:.2}s");
    }

    /// Signals the loop to stop and joins it. The loop observes the flag
    /// within one interval because the sleep is a condvar wait.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        // Notify under the wake lock: the loop either sees the flag before
        // it sleeps or is already waiting and receives this wakeup.
        {
            let _guard = self.shared.wake_lock.lock_unpoisoned();
            self.shared.wake_cv.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("sampler thread panicked during shutdown");
            }
        }
    }
}

impl Drop for CounterSampler {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

fn sampler_loop(shared: &SamplerShared, tx: &SyncSender<SamplerMessage>) {
    let mut networks = Networks::new_with_refreshed_list();
    let started = Instant::now();
    let mut consecutive_failures = 0u32;
    let mut tick = 0u64;

    while !shared.stop.load(Ordering::SeqCst) {
        tick += 1;
        if tick % RELIST_EVERY_TICKS == 0 {
            networks.refresh_list();
        } else {
            networks.refresh();
        }

        let per_iface: Vec<(String, IfaceCounters)> = networks
            .iter()
            .map(|(name, data)| {
                (
                    name.clone(),
                    IfaceCounters {
                        bytes_sent: data.total_transmitted(),
                        bytes_recv: data.total_received(),
                    },
                )
            })
            .collect();

        if per_iface.is_empty() {
            consecutive_failures += 1;
            warn!(
                "no interface counters readable ({consecutive_failures}/{MAX_CONSECUTIVE_FAILURES})"
            );
            if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                error!("counter reads failed {MAX_CONSECUTIVE_FAILURES} times in a row; stopping sampler");
                let _ = tx.try_send(SamplerMessage::Fatal(
                    "network counters unavailable".to_string(),
                ));
                return;
            }
        } else {
            consecutive_failures = 0;
            let snapshot = CounterSnapshot {
                monotonic_s: started.elapsed().as_secs_f64(),
                epoch_seconds: chrono::Utc::now().timestamp(),
                per_iface,
            };
            match tx.try_send(SamplerMessage::Snapshot(snapshot)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!("dropping counter snapshot: consumer is behind");
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }

        let interval = Duration::from_millis(shared.interval_ms.load(Ordering::Relaxed));
        let guard = shared.wake_lock.lock_unpoisoned();
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        let _ = shared.wake_cv.wait_timeout_unpoisoned(guard, interval);
    }
}
