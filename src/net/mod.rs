//! Counter polling and per-interface speed derivation.

mod controller;
mod interfaces;
mod sampler;

pub use controller::{
    ControllerConfig, DisplaySink, DisplaySpeed, SpeedController, TickOutcome,
};
pub use interfaces::{InterfaceSelector, interface_addrs, is_excluded, primary_interface_name};
pub use sampler::{CounterSampler, SamplerMessage, clamp_interval};

/// Cumulative byte counters for one interface, as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IfaceCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

/// One polling pass over every interface.
///
/// `monotonic_s` comes from a monotonic clock and is the only time used for
/// rate math; `epoch_seconds` is carried along solely to timestamp persisted
/// samples.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterSnapshot {
    pub monotonic_s: f64,
    pub epoch_seconds: i64,
    pub per_iface: Vec<(String, IfaceCounters)>,
}
