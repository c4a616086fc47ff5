//! Taskbar tracking and widget placement.
//!
//! Geometry and the visibility state machine are platform-neutral and fully
//! testable; the Win32 queries and event hooks live behind `cfg(windows)`.

pub mod info;
pub mod integrator;
pub mod position;
pub mod visibility;

#[cfg(windows)]
pub mod events;
#[cfg(windows)]
pub mod widget_window;
#[cfg(windows)]
pub mod win;

pub use info::{Rect, TaskbarEdge, TaskbarInfo};
pub use position::{
    Point, PositionConfig, SavedPlacement, WidgetSize, calculate_position, constrain_drag,
    placement_for_release,
};
pub use visibility::{RefreshEngine, RefreshSettings, TaskbarProbe, WidgetSurface};
