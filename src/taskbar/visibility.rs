//! The authoritative refresh state machine.
//!
//! Exactly one routine decides visibility and placement; every trigger
//! (safety-net timer, foreground changes, taskbar moves, shell restarts)
//! funnels into [`RefreshEngine::execute_refresh`]. The engine talks to the
//! OS and the widget through narrow traits so the whole state machine runs
//! under test with plain data.

use std::time::{Duration, Instant};

use log::{debug, warn};

use super::info::TaskbarInfo;
use super::position::{
    Point, PositionConfig, WidgetSize, calculate_position, fallback_corner,
};

/// Consecutive failed taskbar queries tolerated before falling back to a
/// safe screen corner. At the 1 s safety-net cadence this is ~30 s of
/// coasting through explorer restarts without visual churn.
pub const TASKBAR_LOST_FALLBACK_THRESHOLD: u32 = 30;

/// Quiet time required on the non-emergency foreground path. Tunable, not a
/// contract.
pub const FOREGROUND_DEBOUNCE: Duration = Duration::from_millis(250);

/// Refresh passes scheduled after a shell restart, one second apart, to
/// stabilize against the new explorer instance.
pub const SHELL_RESTART_REFRESHES: u32 = 5;
pub const SHELL_RESTART_SPACING: Duration = Duration::from_secs(1);

/// Read side of the OS for the refresh pass.
pub trait TaskbarProbe {
    /// Fresh taskbar geometry; `None` when the taskbar is unreachable.
    fn query(&mut self) -> Option<TaskbarInfo>;
    /// Whether `hwnd` is a fullscreen window obstructing the taskbar's
    /// monitor (never the taskbar or the widget itself).
    fn is_obstructed_by(&mut self, info: &TaskbarInfo, hwnd: isize) -> bool;
}

/// Write side: the widget window being driven.
pub trait WidgetSurface {
    fn size(&self) -> WidgetSize;
    fn is_visible(&self) -> bool;
    fn set_visible(&mut self, visible: bool);
    fn move_to(&mut self, position: Point);
    /// Re-asserts z-order immediately above the taskbar.
    fn raise_above_taskbar(&mut self, taskbar_hwnd: isize);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshSettings {
    pub free_move: bool,
    pub keep_visible_fullscreen: bool,
    pub position: PositionConfig,
}

/// Mutable widget-tracking state owned by the integrator.
#[derive(Debug, Default)]
pub struct RefreshEngine {
    taskbar_lost_count: u32,
    pub dragging: bool,
    pub context_menu_open: bool,
    pub paused: bool,
    settings: RefreshSettings,
}

impl RefreshEngine {
    pub fn new(settings: RefreshSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn update_settings(&mut self, settings: RefreshSettings) {
        self.settings = settings;
    }

    pub fn taskbar_lost_count(&self) -> u32 {
        self.taskbar_lost_count
    }

    /// One authoritative refresh pass.
    ///
    /// `hwnd_of_interest` is the foreground window that triggered the pass,
    /// or 0 for timer-driven passes.
    pub fn execute_refresh(
        &mut self,
        probe: &mut dyn TaskbarProbe,
        surface: &mut dyn WidgetSurface,
        hwnd_of_interest: isize,
    ) {
        if self.dragging || self.context_menu_open || self.paused {
            return;
        }

        let Some(info) = probe.query() else {
            self.taskbar_lost_count += 1;
            if self.taskbar_lost_count % 10 == 0 {
                warn!(
                    "taskbar unreachable (failure count: {})",
                    self.taskbar_lost_count
                );
            }
            // Never hide on a failed query; the taskbar usually comes back.
            if self.taskbar_lost_count == TASKBAR_LOST_FALLBACK_THRESHOLD {
                warn!("taskbar lost for too long; parking widget in a safe corner");
                let corner = fallback_corner(last_known_work_area(), surface.size());
                surface.move_to(corner);
            }
            return;
        };
        self.taskbar_lost_count = 0;
        remember_work_area(&info);

        let obstructed = probe.is_obstructed_by(&info, hwnd_of_interest);
        let should_be_visible =
            info.is_visible() && (self.settings.keep_visible_fullscreen || !obstructed);

        if surface.is_visible() != should_be_visible {
            debug!("widget visibility -> {should_be_visible}");
            surface.set_visible(should_be_visible);
        }

        if should_be_visible {
            if !self.settings.free_move {
                let target = calculate_position(&info, surface.size(), &self.settings.position);
                surface.move_to(target);
            }
            surface.raise_above_taskbar(info.hwnd);
        }
    }
}

// The safe-corner fallback needs some screen geometry even while the
// taskbar is unreachable; remember the last good work area.
use std::sync::Mutex;

use once_cell::sync::Lazy;

use super::info::Rect;
use crate::sync_ext::MutexExt;

static LAST_WORK_AREA: Lazy<Mutex<Rect>> =
    Lazy::new(|| Mutex::new(Rect::new(0, 0, 1920, 1040)));

fn remember_work_area(info: &TaskbarInfo) {
    let scale = info.safe_scale();
    let area = Rect::new(
        (f64::from(info.work_area_phys.left) / scale) as i32,
        (f64::from(info.work_area_phys.top) / scale) as i32,
        (f64::from(info.work_area_phys.right) / scale) as i32,
        (f64::from(info.work_area_phys.bottom) / scale) as i32,
    );
    *LAST_WORK_AREA.lock_unpoisoned() = area;
}

fn last_known_work_area() -> Rect {
    *LAST_WORK_AREA.lock_unpoisoned()
}

/// Trailing-edge debouncer for the non-emergency foreground path.
#[derive(Debug)]
pub struct Debouncer {
    quiet: Duration,
    last_event: Option<Instant>,
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            last_event: None,
        }
    }

    /// Records an event occurrence.
    pub fn record(&mut self, at: Instant) {
        self.last_event = Some(at);
    }

    /// True once the quiet period elapsed after the last recorded event;
    /// consumes the pending event.
    pub fn fire_if_quiet(&mut self, now: Instant) -> bool {
        match self.last_event {
            Some(last) if now.duration_since(last) >= self.quiet => {
                self.last_event = None;
                true
            }
            _ => false,
        }
    }

    pub fn pending(&self) -> bool {
        self.last_event.is_some()
    }
}

/// Drives the five spaced refreshes that stabilize the widget after an
/// explorer restart.
#[derive(Debug, Default)]
pub struct RestartRecovery {
    remaining: u32,
    next_at: Option<Instant>,
}

impl RestartRecovery {
    pub fn begin(&mut self, now: Instant) {
        self.remaining = SHELL_RESTART_REFRESHES;
        self.next_at = Some(now + SHELL_RESTART_SPACING);
    }

    /// Returns true when a scheduled recovery refresh is due.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.next_at {
            Some(at) if now >= at => {
                self.remaining = self.remaining.saturating_sub(1);
                self.next_at = if self.remaining > 0 {
                    Some(now + SHELL_RESTART_SPACING)
                } else {
                    None
                };
                true
            }
            _ => false,
        }
    }

    pub fn active(&self) -> bool {
        self.next_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::super::info::TaskbarEdge;
    use super::*;

    struct FakeProbe {
        info: Option<TaskbarInfo>,
        obstructing_hwnd: Option<isize>,
        queries: u32,
    }

    impl TaskbarProbe for FakeProbe {
        fn query(&mut self) -> Option<TaskbarInfo> {
            self.queries += 1;
            self.info.clone()
        }

        fn is_obstructed_by(&mut self, _info: &TaskbarInfo, hwnd: isize) -> bool {
            self.obstructing_hwnd == Some(hwnd) && hwnd != 0
        }
    }

    #[derive(Default)]
    struct FakeWidget {
        visible: bool,
        position: Option<Point>,
        raised: u32,
    }

    impl WidgetSurface for FakeWidget {
        fn size(&self) -> WidgetSize {
            WidgetSize {
                width: 100,
                height: 30,
            }
        }

        fn is_visible(&self) -> bool {
            self.visible
        }

        fn set_visible(&mut self, visible: bool) {
            self.visible = visible;
        }

        fn move_to(&mut self, position: Point) {
            self.position = Some(position);
        }

        fn raise_above_taskbar(&mut self, _taskbar_hwnd: isize) {
            self.raised += 1;
        }
    }

    fn taskbar() -> TaskbarInfo {
        TaskbarInfo {
            hwnd: 77,
            rect_phys: Rect::new(0, 1040, 1920, 1080),
            tray_rect_phys: None,
            tasklist_rect_phys: None,
            monitor_rect_phys: Rect::new(0, 0, 1920, 1080),
            work_area_phys: Rect::new(0, 0, 1920, 1040),
            dpi_scale: 1.0,
            edge: TaskbarEdge::Bottom,
        }
    }

    fn engine() -> RefreshEngine {
        RefreshEngine::new(RefreshSettings::default())
    }

    #[test]
    fn healthy_refresh_shows_positions_and_raises() {
        let mut probe = FakeProbe {
            info: Some(taskbar()),
            obstructing_hwnd: None,
            queries: 0,
        };
        let mut widget = FakeWidget::default();
        let mut engine = engine();

        engine.execute_refresh(&mut probe, &mut widget, 0);

        assert!(widget.visible);
        assert!(widget.position.is_some());
        assert_eq!(widget.raised, 1);
        assert_eq!(engine.taskbar_lost_count(), 0);
    }

    #[test]
    fn refresh_is_a_no_op_during_drag_and_context_menu() {
        let mut probe = FakeProbe {
            info: Some(taskbar()),
            obstructing_hwnd: None,
            queries: 0,
        };
        let mut widget = FakeWidget::default();
        let mut engine = engine();

        engine.dragging = true;
        engine.execute_refresh(&mut probe, &mut widget, 0);
        engine.dragging = false;
        engine.context_menu_open = true;
        engine.execute_refresh(&mut probe, &mut widget, 0);

        assert_eq!(probe.queries, 0, "no taskbar query while interacting");
        assert!(!widget.visible);
    }

    #[test]
    fn lost_taskbar_coasts_then_falls_back_to_corner() {
        let mut probe = FakeProbe {
            info: None,
            obstructing_hwnd: None,
            queries: 0,
        };
        let mut widget = FakeWidget {
            visible: true,
            ..FakeWidget::default()
        };
        let mut engine = engine();

        for _ in 0..TASKBAR_LOST_FALLBACK_THRESHOLD - 1 {
            engine.execute_refresh(&mut probe, &mut widget, 0);
        }
        assert!(widget.visible, "failed queries must never hide the widget");
        assert!(widget.position.is_none(), "coasting does not move the widget");

        engine.execute_refresh(&mut probe, &mut widget, 0);
        assert!(widget.position.is_some(), "threshold reached: parked in corner");
        assert!(widget.visible);
    }

    #[test]
    fn successful_query_resets_the_lost_counter() {
        let mut probe = FakeProbe {
            info: None,
            obstructing_hwnd: None,
            queries: 0,
        };
        let mut widget = FakeWidget::default();
        let mut engine = engine();

        engine.execute_refresh(&mut probe, &mut widget, 0);
        engine.execute_refresh(&mut probe, &mut widget, 0);
        assert_eq!(engine.taskbar_lost_count(), 2);

        probe.info = Some(taskbar());
        engine.execute_refresh(&mut probe, &mut widget, 0);
        assert_eq!(engine.taskbar_lost_count(), 0);
    }

    #[test]
    fn fullscreen_obstruction_hides_and_clearing_reshows() {
        let mut probe = FakeProbe {
            info: Some(taskbar()),
            obstructing_hwnd: Some(555),
            queries: 0,
        };
        let mut widget = FakeWidget {
            visible: true,
            ..FakeWidget::default()
        };
        let mut engine = engine();

        engine.execute_refresh(&mut probe, &mut widget, 555);
        assert!(!widget.visible, "fullscreen window must hide the widget");

        probe.obstructing_hwnd = None;
        engine.execute_refresh(&mut probe, &mut widget, 555);
        assert!(widget.visible);
    }

    #[test]
    fn keep_visible_fullscreen_overrides_obstruction() {
        let mut probe = FakeProbe {
            info: Some(taskbar()),
            obstructing_hwnd: Some(555),
            queries: 0,
        };
        let mut widget = FakeWidget::default();
        let mut engine = RefreshEngine::new(RefreshSettings {
            keep_visible_fullscreen: true,
            ..RefreshSettings::default()
        });

        engine.execute_refresh(&mut probe, &mut widget, 555);
        assert!(widget.visible);
    }

    #[test]
    fn free_move_skips_repositioning_but_keeps_topmost() {
        let mut probe = FakeProbe {
            info: Some(taskbar()),
            obstructing_hwnd: None,
            queries: 0,
        };
        let mut widget = FakeWidget::default();
        let mut engine = RefreshEngine::new(RefreshSettings {
            free_move: true,
            ..RefreshSettings::default()
        });

        engine.execute_refresh(&mut probe, &mut widget, 0);
        assert!(widget.visible);
        assert!(widget.position.is_none(), "free-move widgets are not repositioned");
        assert_eq!(widget.raised, 1);
    }

    #[test]
    fn debouncer_fires_only_after_quiet_period() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(250));

        debouncer.record(start);
        assert!(!debouncer.fire_if_quiet(start + Duration::from_millis(100)));
        // A newer event restarts the quiet window.
        debouncer.record(start + Duration::from_millis(200));
        assert!(!debouncer.fire_if_quiet(start + Duration::from_millis(300)));
        assert!(debouncer.fire_if_quiet(start + Duration::from_millis(460)));
        // Fired once; nothing pending afterwards.
        assert!(!debouncer.fire_if_quiet(start + Duration::from_secs(10)));
    }

    #[test]
    fn restart_recovery_yields_five_spaced_refreshes() {
        let start = Instant::now();
        let mut recovery = RestartRecovery::default();
        recovery.begin(start);

        let mut fired = 0;
        let mut now = start;
        for _ in 0..20 {
            now += Duration::from_secs(1);
            if recovery.take_due(now) {
                fired += 1;
            }
        }
        assert_eq!(fired, SHELL_RESTART_REFRESHES);
        assert!(!recovery.active());
    }
}
