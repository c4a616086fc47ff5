//! Typed messages exchanged between component threads.
//!
//! Each channel has exactly one owning sender side; receivers subscribe by
//! holding the matching `Receiver`. This replaces ad-hoc callback wiring with
//! messages that can be logged and tested.

/// Emitted by the history store worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A write or maintenance pass committed; listeners may re-query.
    DatabaseUpdated,
    /// The store could not be initialized and is running on the in-memory
    /// fallback, or died permanently.
    Degraded(String),
}

/// Reasons the taskbar integrator runs its authoritative refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// Periodic safety-net tick (1 s).
    SafetyNet,
    /// Foreground window changed (debounced path).
    ForegroundChanged { hwnd: isize },
    /// Unambiguous fullscreen obstruction; hide immediately, no debounce.
    ImmediateHide { hwnd: isize },
    /// The taskbar window finished a move or resize.
    TaskbarMovedOrSized,
    /// The watched taskbar handle went invalid (explorer restart).
    ShellRestarted,
    /// WM_SETTINGCHANGE (theme/accent may have changed).
    SettingsChanged,
}
