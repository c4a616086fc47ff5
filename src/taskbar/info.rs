//! Taskbar geometry snapshot.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in physical pixels, `(left, top)` inclusive,
/// `(right, bottom)` exclusive, matching the Win32 RECT convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn width(&self) -> i32 {
        self.right - self.left
    }

    pub const fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub const fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}

/// Which side of the screen the taskbar occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskbarEdge {
    Top,
    #[default]
    Bottom,
    Left,
    Right,
    Unknown,
}

impl TaskbarEdge {
    pub fn is_horizontal(self) -> bool {
        matches!(self, TaskbarEdge::Top | TaskbarEdge::Bottom | TaskbarEdge::Unknown)
    }
}

/// A band narrower than this is an auto-hidden taskbar peeking through;
/// treat it as not visible for docking purposes.
pub const MIN_VISIBLE_BAND_PX: i32 = 10;

/// Everything the integrator needs to know about the taskbar, captured in
/// one query. Derived fresh each refresh tick and never cached beyond it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskbarInfo {
    /// Win32 handle as an opaque integer (0 when unreachable).
    pub hwnd: isize,
    pub rect_phys: Rect,
    /// Notification-area rectangle, when the child window resolves.
    pub tray_rect_phys: Option<Rect>,
    /// Running-apps band rectangle, when the child window resolves.
    pub tasklist_rect_phys: Option<Rect>,
    /// Full geometry of the monitor hosting the taskbar.
    pub monitor_rect_phys: Rect,
    /// Monitor work area (geometry minus shell reservations).
    pub work_area_phys: Rect,
    pub dpi_scale: f64,
    pub edge: TaskbarEdge,
}

impl TaskbarInfo {
    /// Scale guarded against zero/negative values from broken DPI queries.
    pub fn safe_scale(&self) -> f64 {
        if self.dpi_scale > 0.0 { self.dpi_scale } else { 1.0 }
    }

    /// The taskbar band is thick enough to be actually on screen.
    pub fn is_visible(&self) -> bool {
        let thickness = match self.edge {
            TaskbarEdge::Left | TaskbarEdge::Right => self.rect_phys.width(),
            _ => self.rect_phys.height(),
        };
        thickness >= MIN_VISIBLE_BAND_PX
    }
}

/// Classifies the taskbar edge from its rectangle relative to its monitor.
pub fn derive_edge(taskbar: Rect, monitor: Rect) -> TaskbarEdge {
    if taskbar.width() <= 0 || taskbar.height() <= 0 {
        return TaskbarEdge::Unknown;
    }
    if taskbar.width() >= taskbar.height() {
        let top_distance = (taskbar.top - monitor.top).abs();
        let bottom_distance = (monitor.bottom - taskbar.bottom).abs();
        if top_distance <= bottom_distance {
            TaskbarEdge::Top
        } else {
            TaskbarEdge::Bottom
        }
    } else {
        let left_distance = (taskbar.left - monitor.left).abs();
        let right_distance = (monitor.right - taskbar.right).abs();
        if left_distance <= right_distance {
            TaskbarEdge::Left
        } else {
            TaskbarEdge::Right
        }
    }
}

/// A window whose rect exactly covers its monitor is fullscreen.
pub fn is_fullscreen_rect(window: Rect, monitor: Rect) -> bool {
    window == monitor
}

#[cfg(test)]
mod tests {
    use super::*;

    const MONITOR: Rect = Rect::new(0, 0, 1920, 1080);

    #[test]
    fn edge_derivation_covers_all_sides() {
        assert_eq!(derive_edge(Rect::new(0, 1040, 1920, 1080), MONITOR), TaskbarEdge::Bottom);
        assert_eq!(derive_edge(Rect::new(0, 0, 1920, 40), MONITOR), TaskbarEdge::Top);
        assert_eq!(derive_edge(Rect::new(0, 0, 60, 1080), MONITOR), TaskbarEdge::Left);
        assert_eq!(derive_edge(Rect::new(1860, 0, 1920, 1080), MONITOR), TaskbarEdge::Right);
        assert_eq!(derive_edge(Rect::new(0, 0, 0, 0), MONITOR), TaskbarEdge::Unknown);
    }

    #[test]
    fn fullscreen_requires_exact_monitor_rect() {
        assert!(is_fullscreen_rect(MONITOR, MONITOR));
        assert!(!is_fullscreen_rect(Rect::new(0, 0, 1920, 1040), MONITOR));
        assert!(!is_fullscreen_rect(Rect::new(10, 10, 1910, 1070), MONITOR));
    }

    #[test]
    fn hairline_taskbar_counts_as_hidden() {
        let info = TaskbarInfo {
            hwnd: 1,
            rect_phys: Rect::new(0, 1078, 1920, 1080),
            tray_rect_phys: None,
            tasklist_rect_phys: None,
            monitor_rect_phys: MONITOR,
            work_area_phys: MONITOR,
            dpi_scale: 1.0,
            edge: TaskbarEdge::Bottom,
        };
        assert!(!info.is_visible(), "2px sliver is an auto-hidden taskbar");
    }
}
