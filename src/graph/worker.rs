//! Graph data worker.
//!
//! Runs graph queries off the UI thread: resolves the tiered query (or the
//! session ring), caps the point count with stride downsampling that never
//! loses the global peaks, and ships the series plus bandwidth totals back
//! tagged with the request's sequence id.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};

use log::{debug, error, warn};

use super::request::GraphRequest;
use super::segments::SeriesPoint;
use crate::history::{BandwidthTotals, HistoryStore, InterfaceFilter, Resolution};
use crate::session::SessionRing;

/// Cap on points handed to the renderer.
pub const MAX_GRAPH_POINTS: usize = 2_000;

#[derive(Debug, Clone, PartialEq)]
pub struct GraphResponse {
    pub points: Vec<SeriesPoint>,
    pub totals: BandwidthTotals,
    pub sequence_id: u64,
}

/// Resolution adequate for a window span: raw under two hours, minute bins
/// up to two days, hour bins up to the minute tier's horizon, day beyond.
pub fn resolution_for_span(span_seconds: i64) -> Resolution {
    if span_seconds <= 2 * 3_600 {
        Resolution::Native
    } else if span_seconds <= 48 * 3_600 {
        Resolution::Minute
    } else if span_seconds <= 30 * 86_400 {
        Resolution::Hour
    } else {
        Resolution::Day
    }
}

/// Stride downsampling to `cap` points, then the global upload peak and the
/// global download peak are re-injected so zooming a timeline never changes
/// event amplitude. Averaging here would flatten exactly the bursts users
/// open the graph to see.
pub fn downsample_stride(points: Vec<SeriesPoint>, cap: usize) -> Vec<SeriesPoint> {
    if cap == 0 || points.len() <= cap {
        return points;
    }
    let stride = points.len() / cap;
    let peak_up = points
        .iter()
        .copied()
        .max_by(|a, b| {
            a.upload_bps
                .partial_cmp(&b.upload_bps)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or_default();
    let peak_down = points
        .iter()
        .copied()
        .max_by(|a, b| {
            a.download_bps
                .partial_cmp(&b.download_bps)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or_default();

    let mut sampled: Vec<SeriesPoint> = points.into_iter().step_by(stride.max(1)).collect();
    for peak in [peak_up, peak_down] {
        if !sampled.iter().any(|p| p.ts == peak.ts) {
            sampled.push(peak);
        }
    }
    sampled.sort_by(|a, b| a.ts.partial_cmp(&b.ts).unwrap_or(std::cmp::Ordering::Equal));
    sampled
}

enum WorkerMessage {
    Request(GraphRequest),
    Shutdown,
}

/// Owns the graph data thread.
pub struct GraphWorker {
    tx: Sender<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
}

impl GraphWorker {
    pub fn spawn(
        store: Arc<HistoryStore>,
        session: Arc<SessionRing>,
        responses: Sender<GraphResponse>,
    ) -> Self {
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = thread::Builder::new()
            .name("nst-graph".to_string())
            .spawn(move || worker_loop(&rx, &store, &session, &responses))
            .ok();
        if handle.is_none() {
            error!("failed to spawn graph worker thread");
        }
        Self { tx, handle }
    }

    pub fn submit(&self, request: GraphRequest) {
        let _ = self.tx.send(WorkerMessage::Request(request));
    }
}

impl Drop for GraphWorker {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    rx: &Receiver<WorkerMessage>,
    store: &HistoryStore,
    session: &SessionRing,
    responses: &Sender<GraphResponse>,
) {
    // Requests already superseded by a newer sequence id are dropped before
    // any query work happens.
    let mut last_received_id = 0u64;

    while let Ok(message) = rx.recv() {
        let request = match message {
            WorkerMessage::Request(request) => request,
            WorkerMessage::Shutdown => break,
        };
        if request.sequence_id < last_received_id {
            debug!("dropping obsolete graph request {}", request.sequence_id);
            continue;
        }
        last_received_id = request.sequence_id;

        let (points, totals) = if request.is_session_view {
            session_series(session, &request)
        } else {
            match stored_series(store, &request) {
                Ok(result) => result,
                Err(err) => {
                    warn!("graph query failed: {err}");
                    (Vec::new(), BandwidthTotals::default())
                }
            }
        };

        let points = downsample_stride(points, MAX_GRAPH_POINTS);
        let response = GraphResponse {
            points,
            totals,
            sequence_id: request.sequence_id,
        };
        if responses.send(response).is_err() {
            break;
        }
    }
}

fn session_series(session: &SessionRing, request: &GraphRequest) -> (Vec<SeriesPoint>, BandwidthTotals) {
    let start = request.start.unwrap_or(0);
    let samples = session.snapshot_range(start, request.end);
    let mut totals = BandwidthTotals::default();
    let points = samples
        .iter()
        .map(|sample| {
            totals.upload_bytes += sample.upload_bps;
            totals.download_bytes += sample.download_bps;
            SeriesPoint {
                ts: sample.epoch_seconds as f64,
                upload_bps: sample.upload_bps,
                download_bps: sample.download_bps,
            }
        })
        .collect();
    (points, totals)
}

fn stored_series(
    store: &HistoryStore,
    request: &GraphRequest,
) -> Result<(Vec<SeriesPoint>, BandwidthTotals), crate::history::HistoryError> {
    let iface = match &request.iface {
        Some(name) => InterfaceFilter::Named(name.clone()),
        None => InterfaceFilter::All,
    };
    let span = request
        .start
        .map_or(i64::MAX, |start| request.end.saturating_sub(start));
    let resolution = resolution_for_span(span);

    let history = store.speed_history(request.start, request.end, iface.clone(), resolution)?;
    let totals = store.total_bandwidth(request.start, request.end, iface)?;

    let points = history
        .iter()
        .map(|point| SeriesPoint {
            ts: point.timestamp as f64,
            upload_bps: point.upload_bps,
            download_bps: point.download_bps,
        })
        .collect();
    Ok((points, totals))
}
