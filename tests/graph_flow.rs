//! Graph worker flow: tiered fetch, downsampling, sequencing, and render
//! model assembly against a real on-disk store.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use netspeedtray::graph::{
    GraphRequest, RequestCounter, SequenceGate, StickyAxis, build_render_model,
};
use netspeedtray::graph::worker::GraphWorker;
use netspeedtray::{HistoryStore, SessionRing, SpeedSample};

const BASE: i64 = 1_750_000_000;

fn seeded_store(dir: &tempfile::TempDir) -> Arc<HistoryStore> {
    let store = Arc::new(HistoryStore::open(dir.path().join("graph.db"), None));
    let mut batch = Vec::new();
    // Two bursts separated by a 10-minute silence.
    for i in 0..60 {
        batch.push(SpeedSample {
            epoch_seconds: BASE + i,
            iface_name: "eth0".to_string(),
            upload_bps: 1_000.0,
            download_bps: 2_000.0,
        });
    }
    batch.push(SpeedSample {
        epoch_seconds: BASE + 30,
        iface_name: "eth1".to_string(),
        upload_bps: 9_000_000.0,
        download_bps: 500.0,
    });
    for i in 0..60 {
        batch.push(SpeedSample {
            epoch_seconds: BASE + 660 + i,
            iface_name: "eth0".to_string(),
            upload_bps: 1_500.0,
            download_bps: 2_500.0,
        });
    }
    assert!(store.enqueue_persist(batch));
    store
}

#[test]
fn worker_serves_requests_in_sequence_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);
    let session = Arc::new(SessionRing::new(100));
    let (response_tx, response_rx) = mpsc::channel();

    let counter = RequestCounter::default();
    let worker = GraphWorker::spawn(store.clone(), session, response_tx);

    let first_id = counter.next_id();
    let second_id = counter.next_id();
    worker.submit(GraphRequest {
        start: Some(BASE),
        end: BASE + 720,
        iface: None,
        is_session_view: false,
        sequence_id: first_id,
    });
    worker.submit(GraphRequest {
        start: Some(BASE),
        end: BASE + 720,
        iface: Some("eth0".to_string()),
        is_session_view: false,
        sequence_id: second_id,
    });

    let mut gate = SequenceGate::default();
    let first = response_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    let second = response_rx.recv_timeout(Duration::from_secs(10)).unwrap();

    assert!(gate.accept(first.sequence_id));
    assert!(gate.accept(second.sequence_id));
    assert!(!gate.accept(first_id), "older response must be rejected once 2 landed");

    // The all-interfaces response carries the eth1 spike; the filtered one
    // does not.
    // "All" sums interfaces inside the bin: eth1's spike rides on eth0's
    // 1000 B/s baseline.
    let max_up_all = first.points.iter().map(|p| p.upload_bps).fold(0.0, f64::max);
    let max_up_eth0 = second.points.iter().map(|p| p.upload_bps).fold(0.0, f64::max);
    assert_eq!(max_up_all, 9_001_000.0);
    assert_eq!(max_up_eth0, 1_500.0);

    drop(worker);
    match Arc::try_unwrap(store) {
        Ok(store) => store.shutdown(),
        Err(_) => panic!("worker must release its store handle on drop"),
    }
}

#[test]
fn render_model_reflects_gaps_and_peaks_from_stored_data() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);

    let points = store
        .speed_history(
            Some(BASE),
            BASE + 720,
            netspeedtray::InterfaceFilter::All,
            netspeedtray::Resolution::Native,
        )
        .unwrap();
    let series: Vec<netspeedtray::graph::SeriesPoint> = points
        .iter()
        .map(|p| netspeedtray::graph::SeriesPoint {
            ts: p.timestamp as f64,
            upload_bps: p.upload_bps,
            download_bps: p.download_bps,
        })
        .collect();

    let mut sticky_up = StickyAxis::default();
    let mut sticky_down = StickyAxis::default();
    let model = build_render_model(
        &series,
        &mut sticky_up,
        &mut sticky_down,
        (BASE as f64, (BASE + 720) as f64),
        None,
    );

    // The 10-minute silence splits both panels into two segments with one
    // zero-level bridge between them.
    assert_eq!(model.upload.segments.len(), 2);
    assert_eq!(model.upload.bridges.len(), 1);

    // The eth1 spike (9.001 MB/s summed = 72.008 Mbps) defines the upload
    // peak and the sticky axis top.
    let peak = model.upload.peak.as_ref().expect("upload peak");
    assert!((peak.value_mbps - 72.008).abs() < 1e-9);
    assert!(model.upload.axis_top_mbps >= 72.0);

    // Re-rendering with calmer data keeps the sticky top until the 70%
    // shrink threshold is crossed.
    let calm: Vec<netspeedtray::graph::SeriesPoint> = series
        .iter()
        .filter(|p| p.upload_bps < 1_000_000.0)
        .copied()
        .collect();
    let top_before = sticky_up.top();
    let model_calm = build_render_model(
        &calm,
        &mut sticky_up,
        &mut sticky_down,
        (BASE as f64, (BASE + 720) as f64),
        None,
    );
    assert!(model_calm.upload.axis_top_mbps < top_before, "calm data steps the axis down");

    match Arc::try_unwrap(store) {
        Ok(store) => store.shutdown(),
        Err(_) => unreachable!(),
    }
}
