//! Render-model assembly.
//!
//! The model is everything a drawing layer needs to paint the two stacked
//! panels: per-segment polylines (interpolated where cheap), zero-level gap
//! bridges, glowing peak markers with label placement, axis configuration,
//! the boot-time event line, and summary stats.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use super::axis::{StickyAxis, axis_ticks};
use super::interpolate::densify_segment;
use super::segments::{Bridge, SeriesPoint, bridges_for, split_into_segments};
use crate::sync_ext::MutexExt;

const MBPS_PER_BPS: f64 = 8.0 / 1e6;

/// Peaks below this amplitude get no marker.
pub const MIN_PEAK_MARKER_MBPS: f64 = 0.1;
const MAX_AXIS_TICKS: usize = 6;

const MARKER_SIZES_PTS: [f64; 3] = [14.0, 9.0, 5.0];
const MARKER_ALPHAS: [f64; 3] = [0.15, 0.35, 1.0];

/// Label falls inside the axis: near the edges it hugs the opposite side,
/// near the top it drops below the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VAlign {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerRing {
    pub size_pts: f64,
    pub alpha: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeakMarker {
    pub ts: f64,
    pub value_mbps: f64,
    /// Three concentric dots with decreasing alpha (the glow).
    pub rings: [MarkerRing; 3],
    pub label_text: String,
    pub h_align: HAlign,
    pub v_align: VAlign,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPlot {
    pub ts: Vec<f64>,
    pub values_mbps: Vec<f64>,
    pub interpolated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelModel {
    pub segments: Vec<SegmentPlot>,
    pub bridges: Vec<Bridge>,
    pub peak: Option<PeakMarker>,
    pub axis_top_mbps: f64,
    pub ticks: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SeriesStats {
    pub max_upload_mbps: f64,
    pub avg_upload_mbps: f64,
    pub max_download_mbps: f64,
    pub avg_download_mbps: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderModel {
    pub upload: PanelModel,
    pub download: PanelModel,
    /// Vertical dashed event line at system boot, when inside the range.
    pub boot_marker_ts: Option<f64>,
    pub stats: SeriesStats,
}

/// Max/average Mbps over the series, matching the rendered data exactly.
pub fn series_stats(points: &[SeriesPoint]) -> SeriesStats {
    if points.is_empty() {
        return SeriesStats::default();
    }
    let mut stats = SeriesStats::default();
    let mut sum_up = 0.0;
    let mut sum_down = 0.0;
    for point in points {
        stats.max_upload_mbps = stats.max_upload_mbps.max(point.upload_bps);
        stats.max_download_mbps = stats.max_download_mbps.max(point.download_bps);
        sum_up += point.upload_bps;
        sum_down += point.download_bps;
    }
    let count = points.len() as f64;
    stats.max_upload_mbps *= MBPS_PER_BPS;
    stats.max_download_mbps *= MBPS_PER_BPS;
    stats.avg_upload_mbps = sum_up / count * MBPS_PER_BPS;
    stats.avg_download_mbps = sum_down / count * MBPS_PER_BPS;
    stats
}

fn peak_marker(
    points: &[SeriesPoint],
    select: fn(&SeriesPoint) -> f64,
    range: (f64, f64),
    axis_top_mbps: f64,
) -> Option<PeakMarker> {
    let peak = points
        .iter()
        .max_by(|a, b| {
            select(a)
                .partial_cmp(&select(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
    let value_mbps = select(peak) * MBPS_PER_BPS;
    if value_mbps < MIN_PEAK_MARKER_MBPS {
        return None;
    }

    let (start, end) = range;
    let span = (end - start).max(1e-9);
    let fraction = ((peak.ts - start) / span).clamp(0.0, 1.0);
    let h_align = if fraction < 0.1 {
        HAlign::Left
    } else if fraction > 0.9 {
        HAlign::Right
    } else {
        HAlign::Center
    };
    let v_align = if value_mbps > axis_top_mbps * 0.85 {
        VAlign::Below
    } else {
        VAlign::Above
    };

    let rings = [
        MarkerRing {
            size_pts: MARKER_SIZES_PTS[0],
            alpha: MARKER_ALPHAS[0],
        },
        MarkerRing {
            size_pts: MARKER_SIZES_PTS[1],
            alpha: MARKER_ALPHAS[1],
        },
        MarkerRing {
            size_pts: MARKER_SIZES_PTS[2],
            alpha: MARKER_ALPHAS[2],
        },
    ];

    Some(PeakMarker {
        ts: peak.ts,
        value_mbps,
        rings,
        label_text: format!("{value_mbps:.1} Mbps"),
        h_align,
        v_align,
    })
}

fn build_panel(
    points: &[SeriesPoint],
    select: fn(&SeriesPoint) -> f64,
    sticky: &mut StickyAxis,
    range: (f64, f64),
) -> PanelModel {
    let (ranges, threshold) = split_into_segments(points);
    let bridges = bridges_for(points, &ranges, threshold, Some(range.1));

    let mut segments = Vec::with_capacity(ranges.len());
    let mut observed_max_bps = 0.0f64;
    for segment_range in &ranges {
        let slice = &points[segment_range.clone()];
        let xs: Vec<f64> = slice.iter().map(|p| p.ts).collect();
        let ys: Vec<f64> = slice.iter().map(|p| select(p) * MBPS_PER_BPS).collect();
        observed_max_bps = slice.iter().map(select).fold(observed_max_bps, f64::max);
        let input_len = xs.len();
        let (dense_xs, dense_ys) = densify_segment(&xs, &ys);
        segments.push(SegmentPlot {
            interpolated: dense_xs.len() > input_len,
            ts: dense_xs,
            values_mbps: dense_ys,
        });
    }

    let axis_top_mbps = sticky.update(observed_max_bps * MBPS_PER_BPS);
    PanelModel {
        peak: peak_marker(points, select, range, axis_top_mbps),
        segments,
        bridges,
        axis_top_mbps,
        ticks: axis_ticks(axis_top_mbps, MAX_AXIS_TICKS),
    }
}

/// Assembles the full two-panel model from a prepared (already capped)
/// series. `boot_ts` draws the boot event line when it falls in range.
pub fn build_render_model(
    points: &[SeriesPoint],
    sticky_upload: &mut StickyAxis,
    sticky_download: &mut StickyAxis,
    range: (f64, f64),
    boot_ts: Option<f64>,
) -> RenderModel {
    let boot_marker_ts =
        boot_ts.filter(|ts| *ts >= range.0 && *ts <= range.1 && !points.is_empty());
    RenderModel {
        upload: build_panel(points, |p| p.upload_bps, sticky_upload, range),
        download: build_panel(points, |p| p.download_bps, sticky_download, range),
        boot_marker_ts,
        stats: series_stats(points),
    }
}

/// Gradient-fill alpha ramp, cached per color hex and reused for the
/// lifetime of the process; regenerating it per frame was the original
/// renderer's hottest allocation.
#[derive(Debug, PartialEq)]
pub struct GradientStops {
    pub color_hex: String,
    /// 256 alpha stops from the line (0.35) down to transparent.
    pub alphas: Vec<f64>,
}

const GRADIENT_STEPS: usize = 256;
const GRADIENT_ALPHA_TOP: f64 = 0.35;

static GRADIENT_CACHE: Lazy<Mutex<HashMap<String, Arc<GradientStops>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub fn gradient_for_color(color_hex: &str) -> Arc<GradientStops> {
    let mut cache = GRADIENT_CACHE.lock_unpoisoned();
    cache
        .entry(color_hex.to_string())
        .or_insert_with(|| {
            let alphas = (0..GRADIENT_STEPS)
                .map(|i| GRADIENT_ALPHA_TOP * (1.0 - i as f64 / (GRADIENT_STEPS - 1) as f64))
                .collect();
            Arc::new(GradientStops {
                color_hex: color_hex.to_string(),
                alphas,
            })
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(ts: f64, up_bps: f64, down_bps: f64) -> SeriesPoint {
        SeriesPoint {
            ts,
            upload_bps: up_bps,
            download_bps: down_bps,
        }
    }

    fn mbps(bps: f64) -> f64 {
        bps * MBPS_PER_BPS
    }

    #[test]
    fn model_converts_to_mbps_and_finds_peaks() {
        let points: Vec<SeriesPoint> = (0..20)
            .map(|i| point(f64::from(i), 1_000_000.0, 2_000_000.0))
            .collect();
        let mut up = StickyAxis::default();
        let mut down = StickyAxis::default();
        let model = build_render_model(&points, &mut up, &mut down, (0.0, 19.0), None);

        assert!((model.stats.max_upload_mbps - mbps(1_000_000.0)).abs() < 1e-9);
        assert!((model.stats.max_download_mbps - mbps(2_000_000.0)).abs() < 1e-9);
        let peak = model.download.peak.as_ref().expect("peak marker");
        assert!((peak.value_mbps - 16.0).abs() < 1e-9);
        assert_eq!(peak.rings[2].alpha, 1.0, "inner dot is solid");
        assert!(peak.rings[0].size_pts > peak.rings[2].size_pts);
    }

    #[test]
    fn negligible_peaks_get_no_marker() {
        let points = vec![point(0.0, 10.0, 10.0), point(1.0, 12.0, 12.0)];
        let mut up = StickyAxis::default();
        let mut down = StickyAxis::default();
        let model = build_render_model(&points, &mut up, &mut down, (0.0, 1.0), None);
        assert!(model.upload.peak.is_none());
    }

    #[test]
    fn peak_labels_avoid_the_axis_edges() {
        let mut points: Vec<SeriesPoint> =
            (0..100).map(|i| point(f64::from(i), 1_000.0, 1_000.0)).collect();
        points[2].upload_bps = 5_000_000.0; // near the left edge
        points[97].download_bps = 5_000_000.0; // near the right edge

        let mut up = StickyAxis::default();
        let mut down = StickyAxis::default();
        let model = build_render_model(&points, &mut up, &mut down, (0.0, 99.0), None);

        assert_eq!(model.upload.peak.as_ref().unwrap().h_align, HAlign::Left);
        assert_eq!(model.download.peak.as_ref().unwrap().h_align, HAlign::Right);
    }

    #[test]
    fn boot_marker_only_inside_the_visible_range() {
        let points = vec![point(100.0, 1.0, 1.0), point(101.0, 1.0, 1.0)];
        let mut up = StickyAxis::default();
        let mut down = StickyAxis::default();

        let inside =
            build_render_model(&points, &mut up, &mut down, (90.0, 110.0), Some(95.0));
        assert_eq!(inside.boot_marker_ts, Some(95.0));

        let outside =
            build_render_model(&points, &mut up, &mut down, (90.0, 110.0), Some(50.0));
        assert_eq!(outside.boot_marker_ts, None);
    }

    #[test]
    fn short_segments_are_interpolated_long_ones_not() {
        let short: Vec<SeriesPoint> =
            (0..10).map(|i| point(f64::from(i), 1_000_000.0, 1.0)).collect();
        let mut up = StickyAxis::default();
        let mut down = StickyAxis::default();
        let model = build_render_model(&short, &mut up, &mut down, (0.0, 9.0), None);
        assert!(model.upload.segments[0].interpolated);
        assert!(model.upload.segments[0].ts.len() > 10);

        let long: Vec<SeriesPoint> =
            (0..700).map(|i| point(f64::from(i), 1_000_000.0, 1.0)).collect();
        up.reset();
        let model = build_render_model(&long, &mut up, &mut down, (0.0, 699.0), None);
        assert!(!model.upload.segments[0].interpolated);
        assert_eq!(model.upload.segments[0].ts.len(), 700);
    }

    #[test]
    fn gradient_cache_returns_the_same_instance_per_color() {
        let first = gradient_for_color("#00FF00");
        let second = gradient_for_color("#00FF00");
        assert!(Arc::ptr_eq(&first, &second), "gradient must be cached");
        assert_eq!(first.alphas.len(), 256);
        assert!((first.alphas[0] - 0.35).abs() < 1e-12);
        assert!(first.alphas[255].abs() < 1e-12);

        let other = gradient_for_color("#FFA500");
        assert!(!Arc::ptr_eq(&first, &other));
    }
}
