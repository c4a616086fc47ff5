//! End-to-end pipeline: counter snapshots through the controller into the
//! store, and back out through the tiered query.

use netspeedtray::config::InterfaceMode;
use netspeedtray::net::{
    ControllerConfig, CounterSnapshot, DisplaySpeed, IfaceCounters, InterfaceSelector,
    SpeedController,
};
use netspeedtray::{HistoryStore, InterfaceFilter, Resolution};

use std::cell::Cell;

struct LastDisplay(Cell<DisplaySpeed>);

impl netspeedtray::net::DisplaySink for LastDisplay {
    fn push(&self, speed: DisplaySpeed) {
        self.0.set(speed);
    }
}

fn snapshot(monotonic_s: f64, epoch: i64, sent: u64, recv: u64) -> CounterSnapshot {
    CounterSnapshot {
        monotonic_s,
        epoch_seconds: epoch,
        per_iface: vec![(
            "Wi-Fi".to_string(),
            IfaceCounters {
                bytes_sent: sent,
                bytes_recv: recv,
            },
        )],
    }
}

#[test]
fn measured_speeds_survive_the_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path().join("speed_history.db"), None);

    let mut controller = SpeedController::new(
        ControllerConfig::default(),
        InterfaceSelector::new(InterfaceMode::AllPhysical, vec![], vec![]),
    );
    let sink = LastDisplay(Cell::new(DisplaySpeed::ZERO));

    let base_epoch = 1_750_000_000;
    controller.process(&snapshot(0.0, base_epoch, 1_000, 2_000), &sink);
    controller.process(&snapshot(2.0, base_epoch + 2, 3_000, 6_000), &sink);

    // 1000 B/s up and 2000 B/s down over the 2 s delta.
    let display = sink.0.get();
    assert!((display.upload_mbps - 0.008).abs() < 1e-9);
    assert!((display.download_mbps - 0.016).abs() < 1e-9);

    for batch in controller.drain_all() {
        assert!(store.enqueue_persist(batch));
    }

    let points = store
        .speed_history(
            Some(base_epoch),
            base_epoch + 60,
            InterfaceFilter::Named("Wi-Fi".to_string()),
            Resolution::Native,
        )
        .unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].upload_bps, 1_000.0);
    assert_eq!(points[0].download_bps, 2_000.0);

    let totals = store
        .total_bandwidth(Some(base_epoch), base_epoch + 60, InterfaceFilter::All)
        .unwrap();
    assert_eq!(totals.upload_bytes, 1_000.0);
    assert_eq!(totals.download_bytes, 2_000.0);

    store.shutdown();
}

#[test]
fn sleep_gap_never_reaches_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path().join("speed_history.db"), None);

    let mut controller = SpeedController::new(
        ControllerConfig::default(),
        InterfaceSelector::new(InterfaceMode::AllPhysical, vec![], vec![]),
    );
    let sink = LastDisplay(Cell::new(DisplaySpeed::ZERO));

    let base_epoch = 1_750_000_000;
    controller.process(&snapshot(0.0, base_epoch, 1_000, 2_000), &sink);
    // Huge counter jump across a 12 s stall: resume-from-sleep, no sample.
    let outcome = controller.process(
        &snapshot(12.0, base_epoch + 12, 900_000_000, 900_000_000),
        &sink,
    );
    assert!(outcome.primed);
    assert_eq!(sink.0.get(), DisplaySpeed::ZERO);

    for batch in controller.drain_all() {
        store.enqueue_persist(batch);
    }
    let points = store
        .speed_history(
            Some(base_epoch),
            base_epoch + 60,
            InterfaceFilter::All,
            Resolution::Native,
        )
        .unwrap();
    assert!(points.is_empty(), "no phantom speed may be persisted");

    store.shutdown();
}
