//! Widget position math.
//!
//! All arithmetic stays in f64 logical pixels until one final rounding, so
//! repeated recomputation at fractional DPI scales is exactly idempotent and
//! cannot walk the widget across the screen.

use super::info::{Rect, TaskbarEdge, TaskbarInfo};

/// Inset of the safe-corner fallback used when the taskbar stays lost.
const FALLBACK_PADDING: f64 = 32.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidgetSize {
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionConfig {
    /// Logical-pixel gap between the widget and the tray boundary
    /// (horizontal taskbars).
    pub tray_offset_x: i32,
    /// Same for vertical taskbars, measured from the bottom boundary.
    pub tray_offset_y: i32,
}

/// What to persist when a drag ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavedPlacement {
    /// Free-move: absolute logical coordinates.
    Absolute { x: i32, y: i32 },
    /// Docked on a horizontal taskbar: offset from the tray boundary.
    HorizontalOffset { tray_offset_x: i32 },
    /// Docked on a vertical taskbar: offset from the bottom boundary.
    VerticalOffset { tray_offset_y: i32 },
}

/// The vertical (for horizontal taskbars) or horizontal (for vertical ones)
/// band the widget centers in, in physical pixels.
///
/// The window rect of the taskbar can include invisible padding on some DPI
/// configurations; when the monitor work area exposes a real shell
/// reservation on the taskbar edge, that reservation is the authoritative
/// visible band.
fn visible_band_phys(info: &TaskbarInfo) -> (f64, f64) {
    let monitor = info.monitor_rect_phys;
    let work = info.work_area_phys;
    let rect = info.rect_phys;
    match info.edge {
        TaskbarEdge::Bottom | TaskbarEdge::Unknown => {
            let reserved = monitor.bottom - work.bottom;
            if reserved > 0 {
                (f64::from(work.bottom), f64::from(reserved))
            } else {
                (f64::from(rect.top), f64::from(rect.height()))
            }
        }
        TaskbarEdge::Top => {
            let reserved = work.top - monitor.top;
            if reserved > 0 {
                (f64::from(monitor.top), f64::from(reserved))
            } else {
                (f64::from(rect.top), f64::from(rect.height()))
            }
        }
        TaskbarEdge::Left => {
            let reserved = work.left - monitor.left;
            if reserved > 0 {
                (f64::from(monitor.left), f64::from(reserved))
            } else {
                (f64::from(rect.left), f64::from(rect.width()))
            }
        }
        TaskbarEdge::Right => {
            let reserved = monitor.right - work.right;
            if reserved > 0 {
                (f64::from(work.right), f64::from(reserved))
            } else {
                (f64::from(rect.left), f64::from(rect.width()))
            }
        }
    }
}

/// Docked position adjacent to the tray, centered in the taskbar band.
pub fn calculate_position(
    info: &TaskbarInfo,
    size: WidgetSize,
    config: &PositionConfig,
) -> Point {
    let scale = info.safe_scale();
    let monitor = info.monitor_rect_phys;
    let width = f64::from(size.width);
    let height = f64::from(size.height);

    if info.edge.is_horizontal() {
        let right_boundary = match info.tray_rect_phys {
            Some(tray) => f64::from(tray.left) / scale,
            None => f64::from(info.rect_phys.right) / scale,
        };
        let x = right_boundary - width - f64::from(config.tray_offset_x);
        let min_x = f64::from(monitor.left) / scale;
        let max_x = f64::from(monitor.right) / scale - width;
        let x = x.clamp(min_x, max_x.max(min_x));

        let (band_top_phys, band_height_phys) = visible_band_phys(info);
        let y = band_top_phys / scale + (band_height_phys / scale - height) / 2.0;

        Point {
            x: x.round() as i32,
            y: y.round() as i32,
        }
    } else {
        let bottom_boundary = match info.tray_rect_phys {
            Some(tray) => f64::from(tray.top) / scale,
            None => f64::from(info.rect_phys.bottom) / scale,
        };
        let y = bottom_boundary - height - f64::from(config.tray_offset_y);
        let min_y = f64::from(monitor.top) / scale;
        let max_y = f64::from(monitor.bottom) / scale - height;
        let y = y.clamp(min_y, max_y.max(min_y));

        let (band_left_phys, band_width_phys) = visible_band_phys(info);
        let x = band_left_phys / scale + (band_width_phys / scale - width) / 2.0;

        Point {
            x: x.round() as i32,
            y: y.round() as i32,
        }
    }
}

/// Constrains an in-progress drag.
///
/// Free-move clamps to the screen currently containing the drag point (not
/// the taskbar's screen). Docked mode locks the minor axis to the centered
/// value and lets the major axis slide along the taskbar band.
pub fn constrain_drag(
    desired: Point,
    size: WidgetSize,
    free_move: bool,
    drag_screen_logical: Rect,
    info: Option<&TaskbarInfo>,
    config: &PositionConfig,
) -> Point {
    if free_move {
        return clamp_to_rect(desired, size, drag_screen_logical);
    }
    let Some(info) = info else {
        return clamp_to_rect(desired, size, drag_screen_logical);
    };
    let scale = info.safe_scale();
    let anchored = calculate_position(info, size, config);

    if info.edge.is_horizontal() {
        let band_left = (f64::from(info.rect_phys.left) / scale).round() as i32;
        let band_right = (f64::from(info.rect_phys.right) / scale).round() as i32 - size.width;
        Point {
            x: desired.x.clamp(band_left, band_right.max(band_left)),
            y: anchored.y,
        }
    } else {
        let band_top = (f64::from(info.rect_phys.top) / scale).round() as i32;
        let band_bottom = (f64::from(info.rect_phys.bottom) / scale).round() as i32 - size.height;
        Point {
            x: anchored.x,
            y: desired.y.clamp(band_top, band_bottom.max(band_top)),
        }
    }
}

fn clamp_to_rect(desired: Point, size: WidgetSize, bounds: Rect) -> Point {
    let max_x = bounds.right - size.width;
    let max_y = bounds.bottom - size.height;
    Point {
        x: desired.x.clamp(bounds.left, max_x.max(bounds.left)),
        y: desired.y.clamp(bounds.top, max_y.max(bounds.top)),
    }
}

/// Computes what to persist after a drag release so that replaying
/// [`calculate_position`] with the saved offsets reproduces this location.
pub fn placement_for_release(
    info: Option<&TaskbarInfo>,
    size: WidgetSize,
    released_at: Point,
    free_move: bool,
) -> SavedPlacement {
    let Some(info) = info.filter(|_| !free_move) else {
        return SavedPlacement::Absolute {
            x: released_at.x,
            y: released_at.y,
        };
    };
    let scale = info.safe_scale();

    if info.edge.is_horizontal() {
        let right_boundary = match info.tray_rect_phys {
            Some(tray) => f64::from(tray.left) / scale,
            None => f64::from(info.rect_phys.right) / scale,
        };
        let offset = right_boundary - f64::from(released_at.x) - f64::from(size.width);
        SavedPlacement::HorizontalOffset {
            tray_offset_x: offset.round() as i32,
        }
    } else {
        let bottom_boundary = match info.tray_rect_phys {
            Some(tray) => f64::from(tray.top) / scale,
            None => f64::from(info.rect_phys.bottom) / scale,
        };
        let offset = bottom_boundary - f64::from(released_at.y) - f64::from(size.height);
        SavedPlacement::VerticalOffset {
            tray_offset_y: offset.round() as i32,
        }
    }
}

/// Screen-corner position used after the taskbar has been unreachable for a
/// sustained stretch.
pub fn fallback_corner(work_area_logical: Rect, size: WidgetSize) -> Point {
    Point {
        x: (f64::from(work_area_logical.right) - f64::from(size.width) - FALLBACK_PADDING).round()
            as i32,
        y: (f64::from(work_area_logical.bottom) - f64::from(size.height) - FALLBACK_PADDING)
            .round() as i32,
    }
}
