//! Monotone cubic interpolation (Fritsch-Carlson).
//!
//! Smooths short segments without the overshoot of a natural cubic spline:
//! the limiter keeps every interpolated value inside the range of its
//! neighboring samples, so a burst never grows a phantom peak.

/// Above this many points per segment, interpolation is visually redundant
/// and skipped.
pub const INTERPOLATION_POINT_THRESHOLD: usize = 600;
/// Subdivisions per input interval: 3 new points between each pair.
pub const INTERPOLATION_DENSITY: usize = 4;

/// Returns densified `(xs, ys)`. Inputs must be strictly increasing in `x`
/// and of equal length; degenerate inputs are returned unchanged.
pub fn monotone_cubic(xs: &[f64], ys: &[f64], density: usize) -> (Vec<f64>, Vec<f64>) {
    let n = xs.len();
    if n < 2 || n != ys.len() || density < 2 {
        return (xs.to_vec(), ys.to_vec());
    }

    // Secant slopes per interval.
    let mut secants = Vec::with_capacity(n - 1);
    for i in 0..n - 1 {
        let dx = xs[i + 1] - xs[i];
        if dx <= 0.0 {
            return (xs.to_vec(), ys.to_vec());
        }
        secants.push((ys[i + 1] - ys[i]) / dx);
    }

    // Tangents: endpoint slopes copy their secant; interior points average
    // adjacent secants, zeroed at local extrema to preserve monotonicity.
    let mut tangents = Vec::with_capacity(n);
    tangents.push(secants[0]);
    for i in 1..n - 1 {
        if secants[i - 1] * secants[i] <= 0.0 {
            tangents.push(0.0);
        } else {
            tangents.push((secants[i - 1] + secants[i]) / 2.0);
        }
    }
    tangents.push(secants[n - 2]);

    // Fritsch-Carlson limiter.
    for i in 0..n - 1 {
        if secants[i] == 0.0 {
            tangents[i] = 0.0;
            tangents[i + 1] = 0.0;
            continue;
        }
        let alpha = tangents[i] / secants[i];
        let beta = tangents[i + 1] / secants[i];
        let magnitude = alpha * alpha + beta * beta;
        if magnitude > 9.0 {
            let tau = 3.0 / magnitude.sqrt();
            tangents[i] = tau * alpha * secants[i];
            tangents[i + 1] = tau * beta * secants[i];
        }
    }

    // Cubic Hermite evaluation on the densified grid.
    let mut dense_xs = Vec::with_capacity((n - 1) * density + 1);
    let mut dense_ys = Vec::with_capacity((n - 1) * density + 1);
    for i in 0..n - 1 {
        let dx = xs[i + 1] - xs[i];
        for step in 0..density {
            let t = step as f64 / density as f64;
            let t2 = t * t;
            let t3 = t2 * t;
            let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
            let h10 = t3 - 2.0 * t2 + t;
            let h01 = -2.0 * t3 + 3.0 * t2;
            let h11 = t3 - t2;
            dense_xs.push(xs[i] + t * dx);
            dense_ys.push(
                h00 * ys[i] + h10 * dx * tangents[i] + h01 * ys[i + 1] + h11 * dx * tangents[i + 1],
            );
        }
    }
    dense_xs.push(xs[n - 1]);
    dense_ys.push(ys[n - 1]);

    (dense_xs, dense_ys)
}

/// Interpolates one plot segment, clipping negatives to zero. Falls through
/// to the raw data when the segment is too dense or too short.
pub fn densify_segment(xs: &[f64], ys: &[f64]) -> (Vec<f64>, Vec<f64>) {
    if xs.len() < 2 || xs.len() > INTERPOLATION_POINT_THRESHOLD {
        return (xs.to_vec(), ys.to_vec());
    }
    let (dense_xs, mut dense_ys) = monotone_cubic(xs, ys, INTERPOLATION_DENSITY);
    for y in &mut dense_ys {
        if *y < 0.0 {
            *y = 0.0;
        }
    }
    (dense_xs, dense_ys)
}
