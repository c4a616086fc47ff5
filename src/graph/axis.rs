//! Sticky y-axis scaling.
//!
//! The axis grows immediately when data exceeds it but resists shrinking:
//! only when the observed maximum falls below 70% of the current top does it
//! step down, and always to a "nice" value. This keeps the graph from
//! rescaling on every repaint.

/// Smallest axis top in Mbps; flat or empty data still gets a usable range.
pub const MIN_AXIS_TOP_MBPS: f64 = 1.0;
/// Headroom multiplier applied before rounding up to a nice step.
pub const PADDING_FACTOR: f64 = 1.12;
/// The axis shrinks only below this fraction of the current top.
pub const SHRINK_THRESHOLD: f64 = 0.7;

/// Rounds `max_value` (plus padding) up to the nearest nice step. The step
/// set {1, 5, 10, 50, 100, 250, 500, 1000} repeats per order of magnitude so
/// five to seven labels always fit.
pub fn nice_axis_top(max_value: f64) -> f64 {
    if !max_value.is_finite() || max_value <= MIN_AXIS_TOP_MBPS {
        return MIN_AXIS_TOP_MBPS;
    }
    let padded = max_value * PADDING_FACTOR;

    let mut magnitude = 1.0;
    while padded > 5_000.0 * magnitude {
        magnitude *= 10.0;
    }
    let scaled = padded / magnitude;
    let step = if scaled <= 10.0 {
        1.0
    } else if scaled <= 50.0 {
        5.0
    } else if scaled <= 100.0 {
        10.0
    } else if scaled <= 500.0 {
        50.0
    } else if scaled <= 1_000.0 {
        100.0
    } else if scaled <= 2_500.0 {
        250.0
    } else {
        500.0
    } * magnitude;

    (padded / step).ceil() * step
}

/// Tick positions for a panel with the given top, at most `max_ticks`.
pub fn axis_ticks(top: f64, max_ticks: usize) -> Vec<f64> {
    if top <= 0.0 || max_ticks == 0 {
        return vec![0.0];
    }
    let raw_step = top / max_ticks as f64;
    // Snap the step up to 1/2/2.5/5 x 10^k.
    let magnitude = 10f64.powf(raw_step.log10().floor());
    let normalized = raw_step / magnitude;
    let snapped = if normalized <= 1.0 {
        1.0
    } else if normalized <= 2.0 {
        2.0
    } else if normalized <= 2.5 {
        2.5
    } else if normalized <= 5.0 {
        5.0
    } else {
        10.0
    } * magnitude;

    let mut ticks = Vec::new();
    let mut value = 0.0;
    while value <= top + 1e-9 {
        ticks.push(value);
        value += snapped;
    }
    ticks
}

/// Per-panel sticky top state.
#[derive(Debug, Clone, Copy)]
pub struct StickyAxis {
    top: f64,
}

impl Default for StickyAxis {
    fn default() -> Self {
        Self {
            top: MIN_AXIS_TOP_MBPS,
        }
    }
}

impl StickyAxis {
    pub fn top(&self) -> f64 {
        self.top
    }

    /// Resets the sticky state (timeline switch invalidates old limits).
    pub fn reset(&mut self) {
        self.top = MIN_AXIS_TOP_MBPS;
    }

    /// Feeds the panel's observed maximum and returns the axis top to use.
    pub fn update(&mut self, observed_max: f64) -> f64 {
        if observed_max > self.top {
            self.top = nice_axis_top(observed_max);
        } else if observed_max < self.top * SHRINK_THRESHOLD {
            self.top = nice_axis_top(observed_max).max(MIN_AXIS_TOP_MBPS);
        }
        self.top
    }
}
