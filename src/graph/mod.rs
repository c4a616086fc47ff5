//! Graph data pipeline.
//!
//! Turns tiered history (or the live session ring) into a render model:
//! stride-downsampled with global peaks re-injected, segmented across gaps,
//! optionally interpolated, with sticky dual-panel axis scaling. The actual
//! drawing layer consumes [`model::RenderModel`]; nothing here touches
//! pixels.

pub mod axis;
pub mod interaction;
pub mod interpolate;
pub mod model;
pub mod request;
pub mod segments;
pub mod worker;

pub use axis::StickyAxis;
pub use interaction::{HoverIndex, LiveUpdatePolicy, is_click_reset};
pub use model::{PanelModel, PeakMarker, RenderModel, build_render_model};
pub use request::{
    GraphRequest, PERIOD_LABELS, RequestCounter, SequenceGate, boot_time_epoch,
    time_range_for_period,
};
pub use segments::{Bridge, SeriesPoint, gap_threshold_seconds, split_into_segments};
pub use worker::{GraphResponse, GraphWorker, downsample_stride, resolution_for_span};
