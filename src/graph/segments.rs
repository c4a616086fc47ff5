//! Gap detection and series segmentation.
//!
//! An interval markedly larger than the series' own median is a gap: the
//! app was off or the host asleep. Gaps split the plot into disjoint
//! segments joined by dashed zero-level bridges, so missing data reads as
//! "no traffic" instead of a straight interpolated line.

use std::ops::Range;

/// Gap = interval > `GAP_DETECTION_MULTIPLIER x median`, with a floor that
/// keeps ordinary jitter from fragmenting the plot.
pub const GAP_DETECTION_MULTIPLIER: f64 = 2.5;
pub const MIN_GAP_THRESHOLD_SECS: f64 = 10.0;

/// One timestamped sample in the graph pipeline, speeds in bytes/sec.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SeriesPoint {
    pub ts: f64,
    pub upload_bps: f64,
    pub download_bps: f64,
}

/// A dashed flat-line bridge drawn at zero across a gap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bridge {
    pub from_ts: f64,
    pub to_ts: f64,
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Threshold above which an inter-sample interval counts as a gap.
pub fn gap_threshold_seconds(points: &[SeriesPoint]) -> f64 {
    let mut intervals: Vec<f64> = points.windows(2).map(|w| w[1].ts - w[0].ts).collect();
    match median(&mut intervals) {
        Some(median_interval) => {
            (median_interval * GAP_DETECTION_MULTIPLIER).max(MIN_GAP_THRESHOLD_SECS)
        }
        None => MIN_GAP_THRESHOLD_SECS,
    }
}

/// Splits `points` (sorted by ts) into contiguous index ranges at gap
/// boundaries. Returns the ranges and the threshold used.
pub fn split_into_segments(points: &[SeriesPoint]) -> (Vec<Range<usize>>, f64) {
    let threshold = gap_threshold_seconds(points);
    if points.is_empty() {
        return (Vec::new(), threshold);
    }

    let mut ranges = Vec::new();
    let mut segment_start = 0usize;
    for i in 1..points.len() {
        if points[i].ts - points[i - 1].ts > threshold {
            ranges.push(segment_start..i);
            segment_start = i;
        }
    }
    ranges.push(segment_start..points.len());
    (ranges, threshold)
}

/// Bridges between consecutive segments, plus the trailing bridge from the
/// last point to `target_end` when the data stops short of it.
pub fn bridges_for(
    points: &[SeriesPoint],
    segments: &[Range<usize>],
    threshold: f64,
    target_end: Option<f64>,
) -> Vec<Bridge> {
    let mut bridges = Vec::new();
    for pair in segments.windows(2) {
        let previous_end = points[pair[0].end - 1].ts;
        let next_start = points[pair[1].start].ts;
        bridges.push(Bridge {
            from_ts: previous_end,
            to_ts: next_start,
        });
    }
    if let (Some(end), Some(last)) = (target_end, points.last()) {
        if end - last.ts > threshold {
            bridges.push(Bridge {
                from_ts: last.ts,
                to_ts: end,
            });
        }
    }
    bridges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(timestamps: &[f64]) -> Vec<SeriesPoint> {
        timestamps
            .iter()
            .map(|ts| SeriesPoint {
                ts: *ts,
                upload_bps: 1.0,
                download_bps: 1.0,
            })
            .collect()
    }

    #[test]
    fn threshold_tracks_median_with_floor() {
        // 1 s cadence: 2.5 * 1 = 2.5 < 10 -> floor wins.
        let points = series(&[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(gap_threshold_seconds(&points), 10.0);

        // 60 s cadence: 2.5 * 60 = 150.
        let points = series(&[0.0, 60.0, 120.0, 180.0]);
        assert_eq!(gap_threshold_seconds(&points), 150.0);
    }

    #[test]
    fn continuous_series_is_one_segment() {
        let points = series(&[0.0, 1.0, 2.0, 3.0, 4.0]);
        let (segments, _) = split_into_segments(&points);
        assert_eq!(segments, vec![0..5]);
    }

    #[test]
    fn gaps_split_segments_and_produce_bridges() {
        // 1 s cadence with a 60 s hole after index 2.
        let points = series(&[0.0, 1.0, 2.0, 62.0, 63.0, 64.0]);
        let (segments, threshold) = split_into_segments(&points);
        assert_eq!(segments, vec![0..3, 3..6]);

        let bridges = bridges_for(&points, &segments, threshold, None);
        assert_eq!(
            bridges,
            vec![Bridge {
                from_ts: 2.0,
                to_ts: 62.0
            }]
        );
    }

    #[test]
    fn trailing_bridge_reaches_the_requested_end() {
        let points = series(&[0.0, 1.0, 2.0]);
        let (segments, threshold) = split_into_segments(&points);
        let bridges = bridges_for(&points, &segments, threshold, Some(500.0));
        assert_eq!(
            bridges,
            vec![Bridge {
                from_ts: 2.0,
                to_ts: 500.0
            }]
        );

        // Data ending at the requested end needs no trailing bridge.
        let bridges = bridges_for(&points, &segments, threshold, Some(3.0));
        assert!(bridges.is_empty());
    }

    #[test]
    fn empty_series_yields_no_segments() {
        let (segments, threshold) = split_into_segments(&[]);
        assert!(segments.is_empty());
        assert_eq!(threshold, MIN_GAP_THRESHOLD_SECS);
    }
}
