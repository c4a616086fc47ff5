use std::collections::{HashMap, VecDeque};

use log::{debug, warn};

use super::{CounterSnapshot, IfaceCounters, InterfaceSelector};
use crate::history::SpeedSample;

/// Guard against division by a degenerate time delta.
const MIN_TIME_DIFF_S: f64 = 1e-6;
/// Per-interface samples below this rate are negligible and not persisted.
const MIN_RECORDABLE_SPEED_BPS: f64 = 1.0;
/// Anything above ~10 Gbps in bytes/sec is a counter glitch, not traffic.
const MAX_REASONABLE_SPEED_BPS: f64 = 1_250_000_000.0;
/// Floor of the resume-from-sleep gap threshold.
const MIN_LONG_GAP_S: f64 = 10.0;
/// Batches kept locally when the store queue is refusing input.
const PENDING_BATCH_CAP: usize = 8;

/// Aggregate display rate in Mbps across the monitored interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DisplaySpeed {
    pub upload_mbps: f64,
    pub download_mbps: f64,
}

impl DisplaySpeed {
    pub const ZERO: Self = Self {
        upload_mbps: 0.0,
        download_mbps: 0.0,
    };

    fn from_bps(upload_bps: f64, download_bps: f64) -> Self {
        Self {
            upload_mbps: upload_bps * 8.0 / 1e6,
            download_mbps: download_bps * 8.0 / 1e6,
        }
    }
}

/// Receives display updates. Delivery is best-effort; implementations must
/// not propagate failures back into the controller.
pub trait DisplaySink {
    fn push(&self, speed: DisplaySpeed);
}

impl<F: Fn(DisplaySpeed)> DisplaySink for F {
    fn push(&self, speed: DisplaySpeed) {
        self(speed);
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Configured polling interval, used to size the resume-gap threshold.
    pub interval_s: f64,
    /// Seconds between store batch flushes.
    pub flush_interval_s: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval_s: 1.0,
            flush_interval_s: 5.0,
        }
    }
}

/// What one snapshot produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub display: DisplaySpeed,
    /// Samples appended to the pending store batch this tick.
    pub recorded_samples: usize,
    /// The baseline was (re)primed; no rates were derived.
    pub primed: bool,
}

#[derive(Debug)]
struct Baseline {
    monotonic_s: f64,
    counters: HashMap<String, IfaceCounters>,
}

/// Converts successive counter snapshots into per-interface rates, feeds the
/// display sink, and accumulates filtered samples for the history store.
///
/// Pure state machine: channels and threads live in the caller, which makes
/// the rate semantics directly testable.
#[derive(Debug)]
pub struct SpeedController {
    config: ControllerConfig,
    selector: InterfaceSelector,
    baseline: Option<Baseline>,
    batch: Vec<SpeedSample>,
    pending: VecDeque<Vec<SpeedSample>>,
    last_flush_monotonic_s: f64,
}

impl SpeedController {
    pub fn new(config: ControllerConfig, selector: InterfaceSelector) -> Self {
        Self {
            config,
            selector,
            baseline: None,
            batch: Vec::new(),
            pending: VecDeque::new(),
            last_flush_monotonic_s: 0.0,
        }
    }

    pub fn selector_mut(&mut self) -> &mut InterfaceSelector {
        &mut self.selector
    }

    /// Applies a changed polling interval without disturbing the baseline.
    pub fn set_interval(&mut self, interval_s: f64) {
        self.config.interval_s = super::clamp_interval(interval_s);
    }

    /// A gap longer than this means the host slept or the sampler stalled;
    /// deriving a rate across it would fabricate a burst that never happened.
    fn long_gap_threshold_s(&self) -> f64 {
        (5.0 * self.config.interval_s).max(MIN_LONG_GAP_S)
    }

    /// Processes one snapshot: derives rates, updates the display, and
    /// appends store samples. Never blocks.
    pub fn process(&mut self, snapshot: &CounterSnapshot, sink: &dyn DisplaySink) -> TickOutcome {
        let Some(baseline) = &self.baseline else {
            self.prime(snapshot);
            sink.push(DisplaySpeed::ZERO);
            return TickOutcome {
                display: DisplaySpeed::ZERO,
                recorded_samples: 0,
                primed: true,
            };
        };

        let dt = snapshot.monotonic_s - baseline.monotonic_s;
        if dt <= MIN_TIME_DIFF_S {
            // Same instant replayed; nothing to derive, keep the baseline.
            sink.push(DisplaySpeed::ZERO);
            return TickOutcome {
                display: DisplaySpeed::ZERO,
                recorded_samples: 0,
                primed: false,
            };
        }

        if dt > self.long_gap_threshold_s() {
            debug!("gap of {dt:.1}s detected; re-priming counters (resume from sleep)");
            self.prime(snapshot);
            sink.push(DisplaySpeed::ZERO);
            return TickOutcome {
                display: DisplaySpeed::ZERO,
                recorded_samples: 0,
                primed: true,
            };
        }

        let mut display_up_bps = 0.0;
        let mut display_down_bps = 0.0;
        let mut recorded = 0usize;

        for (name, current) in &snapshot.per_iface {
            let Some(previous) = baseline.counters.get(name) else {
                // Interface appeared mid-run; its first delta comes next tick.
                continue;
            };
            let upload_bps = rate_bps(previous.bytes_sent, current.bytes_sent, dt);
            let download_bps = rate_bps(previous.bytes_recv, current.bytes_recv, dt);

            if !self.selector.is_monitored(name) {
                continue;
            }
            display_up_bps += upload_bps;
            display_down_bps += download_bps;

            if upload_bps >= MIN_RECORDABLE_SPEED_BPS || download_bps >= MIN_RECORDABLE_SPEED_BPS {
                self.batch.push(SpeedSample {
                    epoch_seconds: snapshot.epoch_seconds,
                    iface_name: name.clone(),
                    upload_bps,
                    download_bps,
                });
                recorded += 1;
            }
        }

        self.prime(snapshot);

        let display = DisplaySpeed::from_bps(display_up_bps, display_down_bps);
        sink.push(display);
        TickOutcome {
            display,
            recorded_samples: recorded,
            primed: false,
        }
    }

    fn prime(&mut self, snapshot: &CounterSnapshot) {
        self.baseline = Some(Baseline {
            monotonic_s: snapshot.monotonic_s,
            counters: snapshot
                .per_iface
                .iter()
                .map(|(name, counters)| (name.clone(), *counters))
                .collect(),
        });
    }

    /// Returns batches due for the store: the accumulated batch once the
    /// flush interval elapsed, preceded by any batches a full store queue
    /// bounced earlier.
    pub fn take_due_batches(&mut self, monotonic_s: f64) -> Vec<Vec<SpeedSample>> {
        let mut due: Vec<Vec<SpeedSample>> = self.pending.drain(..).collect();
        if monotonic_s - self.last_flush_monotonic_s >= self.config.flush_interval_s {
            self.last_flush_monotonic_s = monotonic_s;
            if !self.batch.is_empty() {
                due.push(std::mem::take(&mut self.batch));
            }
        }
        due
    }

    /// Everything buffered, for the graceful-shutdown flush.
    pub fn drain_all(&mut self) -> Vec<Vec<SpeedSample>> {
        let mut all: Vec<Vec<SpeedSample>> = self.pending.drain(..).collect();
        if !self.batch.is_empty() {
            all.push(std::mem::take(&mut self.batch));
        }
        all
    }

    /// Re-buffers a batch the store refused. Bounded; the oldest batch is
    /// dropped on overflow.
    pub fn requeue_refused(&mut self, batch: Vec<SpeedSample>) {
        if self.pending.len() >= PENDING_BATCH_CAP {
            warn!("store refused batches beyond local cap; dropping oldest");
            self.pending.pop_front();
        }
        self.pending.push_back(batch);
    }

    pub fn batched_len(&self) -> usize {
        self.batch.len()
    }
}

/// `(curr - prev) / dt`, with counter decreases (adapter reset) and
/// implausible spikes treated as zero.
fn rate_bps(prev: u64, curr: u64, dt: f64) -> f64 {
    if curr < prev {
        return 0.0;
    }
    let bps = (curr - prev) as f64 / dt;
    if bps > MAX_REASONABLE_SPEED_BPS {
        debug!("discarding implausible rate of {bps:.0} B/s");
        return 0.0;
    }
    bps
}
