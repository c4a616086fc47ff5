//! Event loop that owns the refresh engine.
//!
//! Consumes [`RefreshTrigger`]s from the platform event source and runs the
//! authoritative refresh at the right moments: immediately for emergencies,
//! debounced for ordinary foreground churn, on a 1 s safety net regardless,
//! and on the spaced recovery schedule after shell restarts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use log::debug;

use super::visibility::{
    Debouncer, FOREGROUND_DEBOUNCE, RefreshEngine, RestartRecovery, TaskbarProbe, WidgetSurface,
};
use crate::events::RefreshTrigger;

/// Safety-net cadence: the refresh runs at least this often no matter what
/// events arrive.
pub const SAFETY_NET_INTERVAL: Duration = Duration::from_secs(1);

const LOOP_TICK: Duration = Duration::from_millis(100);

pub struct IntegratorLoop {
    engine: RefreshEngine,
    debouncer: Debouncer,
    recovery: RestartRecovery,
    pending_foreground_hwnd: isize,
    last_safety_net: Instant,
}

impl IntegratorLoop {
    pub fn new(engine: RefreshEngine) -> Self {
        Self {
            engine,
            debouncer: Debouncer::new(FOREGROUND_DEBOUNCE),
            recovery: RestartRecovery::default(),
            pending_foreground_hwnd: 0,
            last_safety_net: Instant::now(),
        }
    }

    pub fn engine_mut(&mut self) -> &mut RefreshEngine {
        &mut self.engine
    }

    /// Runs until `stop` is set or the trigger channel closes.
    pub fn run(
        &mut self,
        triggers: &Receiver<RefreshTrigger>,
        probe: &mut dyn TaskbarProbe,
        surface: &mut dyn WidgetSurface,
        stop: &Arc<AtomicBool>,
    ) {
        // An initial pass docks the widget without waiting for an event.
        self.engine.execute_refresh(probe, surface, 0);

        while !stop.load(Ordering::SeqCst) {
            match triggers.recv_timeout(LOOP_TICK) {
                Ok(trigger) => self.handle_trigger(trigger, Instant::now(), probe, surface),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.pump_timers(Instant::now(), probe, surface);
        }
    }

    /// Applies a single trigger. Split out of [`run`] for tests.
    pub fn handle_trigger(
        &mut self,
        trigger: RefreshTrigger,
        now: Instant,
        probe: &mut dyn TaskbarProbe,
        surface: &mut dyn WidgetSurface,
    ) {
        match trigger {
            RefreshTrigger::ImmediateHide { hwnd } => {
                // Emergency path: no debounce between fullscreen and hide.
                self.engine.execute_refresh(probe, surface, hwnd);
            }
            RefreshTrigger::ForegroundChanged { hwnd } => {
                self.pending_foreground_hwnd = hwnd;
                self.debouncer.record(now);
            }
            RefreshTrigger::TaskbarMovedOrSized => {
                self.engine.execute_refresh(probe, surface, 0);
            }
            RefreshTrigger::ShellRestarted => {
                debug!("shell restart: scheduling stabilization refreshes");
                self.recovery.begin(now);
            }
            RefreshTrigger::SafetyNet | RefreshTrigger::SettingsChanged => {
                self.engine.execute_refresh(probe, surface, 0);
            }
        }
    }

    /// Fires the debouncer, the recovery schedule, and the safety net.
    pub fn pump_timers(
        &mut self,
        now: Instant,
        probe: &mut dyn TaskbarProbe,
        surface: &mut dyn WidgetSurface,
    ) {
        if self.debouncer.fire_if_quiet(now) {
            let hwnd = std::mem::take(&mut self.pending_foreground_hwnd);
            self.engine.execute_refresh(probe, surface, hwnd);
        }
        if self.recovery.take_due(now) {
            self.engine.execute_refresh(probe, surface, 0);
        }
        if now.duration_since(self.last_safety_net) >= SAFETY_NET_INTERVAL {
            self.last_safety_net = now;
            self.engine.execute_refresh(probe, surface, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::info::{Rect, TaskbarEdge, TaskbarInfo};
    use super::super::position::{Point, WidgetSize};
    use super::super::visibility::RefreshSettings;
    use super::*;

    struct CountingProbe {
        info: Option<TaskbarInfo>,
        obstructing_hwnd: Option<isize>,
        queries: u32,
    }

    impl CountingProbe {
        fn healthy() -> Self {
            Self {
                info: Some(TaskbarInfo {
                    hwnd: 9,
                    rect_phys: Rect::new(0, 1040, 1920, 1080),
                    tray_rect_phys: None,
                    tasklist_rect_phys: None,
                    monitor_rect_phys: Rect::new(0, 0, 1920, 1080),
                    work_area_phys: Rect::new(0, 0, 1920, 1040),
                    dpi_scale: 1.0,
                    edge: TaskbarEdge::Bottom,
                }),
                obstructing_hwnd: None,
                queries: 0,
            }
        }
    }

    impl TaskbarProbe for CountingProbe {
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

        fn raise_above_taskbar(&mut self, _taskbar_hwnd: isize) {}
    }

    fn setup() -> (IntegratorLoop, CountingProbe, FakeWidget) {
        (
            IntegratorLoop::new(RefreshEngine::new(RefreshSettings::default())),
            CountingProbe::healthy(),
            FakeWidget::default(),
        )
    }

    #[test]
    fn immediate_hide_bypasses_the_debounce() {
        let (mut looper, mut probe, mut widget) = setup();
        widget.visible = true;
        probe.obstructing_hwnd = Some(42);

        looper.handle_trigger(
            RefreshTrigger::ImmediateHide { hwnd: 42 },
            Instant::now(),
            &mut probe,
            &mut widget,
        );
        assert!(!widget.visible, "emergency path must hide with no delay");
    }

    #[test]
    fn foreground_changes_are_debounced() {
        let (mut looper, mut probe, mut widget) = setup();
        let start = Instant::now();

        looper.handle_trigger(
            RefreshTrigger::ForegroundChanged { hwnd: 11 },
            start,
            &mut probe,
            &mut widget,
        );
        assert_eq!(probe.queries, 0, "no refresh before the quiet period");

        looper.pump_timers(start + Duration::from_millis(100), &mut probe, &mut widget);
        assert_eq!(probe.queries, 0);

        looper.pump_timers(start + Duration::from_millis(300), &mut probe, &mut widget);
        assert_eq!(probe.queries, 1, "debounced refresh fired once quiet");
    }

    #[test]
    fn safety_net_fires_without_any_events() {
        let (mut looper, mut probe, mut widget) = setup();
        let later = Instant::now() + SAFETY_NET_INTERVAL + Duration::from_millis(10);
        looper.pump_timers(later, &mut probe, &mut widget);
        assert_eq!(probe.queries, 1);
    }

    #[test]
    fn shell_restart_drives_spaced_recovery_refreshes() {
        let (mut looper, mut probe, mut widget) = setup();
        let start = Instant::now();

        looper.handle_trigger(
            RefreshTrigger::ShellRestarted,
            start,
            &mut probe,
            &mut widget,
        );
        assert_eq!(probe.queries, 0);

        let mut recovery_refreshes = 0;
        for second in 1..=8u64 {
            let now = start + Duration::from_secs(second) + Duration::from_millis(5);
            let before = probe.queries;
            looper.pump_timers(now, &mut probe, &mut widget);
            // Separate recovery refreshes from the 1 s safety net by running
            // the counter difference; each pump can fire both.
            let fired = probe.queries - before;
            assert!(fired >= 1, "safety net alone fires every second");
            if fired > 1 {
                recovery_refreshes += fired - 1;
            }
        }
        assert_eq!(recovery_refreshes, 5, "five stabilization refreshes expected");
    }
}
