//! WinEvent hooks feeding the integrator's trigger channel.
//!
//! Hooks are installed on a dedicated thread that runs a message pump
//! (out-of-context WinEvent callbacks are delivered through it). Every hook
//! is unregistered on drop; a hook left behind after the owner dies would
//! keep firing into freed state.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::mpsc::Sender;

use log::{debug, warn};
use once_cell::sync::Lazy;
use windows::Win32::Foundation::{HMODULE, HWND, LPARAM, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Accessibility::{HWINEVENTHOOK, SetWinEventHook, UnhookWinEvent};
use windows::Win32::UI::WindowsAndMessaging::{
    DispatchMessageW, EVENT_SYSTEM_FOREGROUND, EVENT_SYSTEM_MOVESIZEEND, GetMessageW, MSG,
    PostThreadMessageW, TranslateMessage, WINEVENT_OUTOFCONTEXT, WM_QUIT,
};

use super::win;
use crate::events::RefreshTrigger;

/// Raw hook deliveries, routed by hook handle. The callback is a bare
/// `extern "system"` function with no user data, so routing goes through
/// this registry.
static HOOK_ROUTES: Lazy<Mutex<HashMap<isize, Sender<(u32, isize)>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

unsafe extern "system" fn win_event_callback(
    hook: HWINEVENTHOOK,
    event: u32,
    hwnd: HWND,
    _id_object: i32,
    _id_child: i32,
    _id_event_thread: u32,
    _dwms_event_time: u32,
) {
    let routes = match HOOK_ROUTES.lock() {
        Ok(routes) => routes,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(tx) = routes.get(&(hook.0 as isize)) {
        let _ = tx.send((event, hwnd.0 as isize));
    }
}

/// One registered WinEvent hook. Dropping it unhooks and unroutes.
pub struct WinEventHook {
    hook: isize,
    /// When set, only events for this window are forwarded.
    hwnd_filter: Option<isize>,
    event: u32,
}

impl WinEventHook {
    /// Registers a hook for `event` on the calling thread. The thread must
    /// pump messages for the callback to fire.
    pub fn install(
        event: u32,
        hwnd_filter: Option<isize>,
        tx: Sender<(u32, isize)>,
    ) -> Option<Self> {
        let hook = unsafe {
            SetWinEventHook(
                event,
                event,
                HMODULE::default(),
                Some(win_event_callback),
                0,
                0,
                WINEVENT_OUTOFCONTEXT,
            )
        };
        if hook.is_invalid() {
            warn!("SetWinEventHook failed for event {event:#x}");
            return None;
        }
        let raw = hook.0 as isize;
        match HOOK_ROUTES.lock() {
            Ok(mut routes) => {
                routes.insert(raw, tx);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(raw, tx);
            }
        }
        debug!("WinEvent hook {raw:#x} installed for event {event:#x}");
        Some(Self {
            hook: raw,
            hwnd_filter,
            event,
        })
    }

    pub fn matches(&self, event: u32, hwnd: isize) -> bool {
        event == self.event && self.hwnd_filter.is_none_or(|filter| filter == hwnd)
    }

    pub fn watched_hwnd(&self) -> Option<isize> {
        self.hwnd_filter
    }
}

impl Drop for WinEventHook {
    fn drop(&mut self) {
        unsafe {
            let _ = UnhookWinEvent(HWINEVENTHOOK(self.hook as *mut core::ffi::c_void));
        }
        match HOOK_ROUTES.lock() {
            Ok(mut routes) => {
                routes.remove(&self.hook);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&self.hook);
            }
        }
        debug!("WinEvent hook {:#x} removed", self.hook);
    }
}

/// Owns the hook set for one taskbar generation (the hooks watch a specific
/// taskbar HWND; a shell restart invalidates them all).
struct HookSet {
    /// Held for unhook-on-drop; deliveries route through the registry.
    _foreground: Option<WinEventHook>,
    movesize: Option<WinEventHook>,
}

impl HookSet {
    fn install(raw_tx: &Sender<(u32, isize)>) -> Self {
        let taskbar_hwnd = win::query_taskbar_info().map(|info| info.hwnd);
        Self {
            _foreground: WinEventHook::install(EVENT_SYSTEM_FOREGROUND, None, raw_tx.clone()),
            movesize: WinEventHook::install(EVENT_SYSTEM_MOVESIZEEND, taskbar_hwnd, raw_tx.clone()),
        }
    }

    fn watched_taskbar(&self) -> Option<isize> {
        self.movesize.as_ref().and_then(WinEventHook::watched_hwnd)
    }
}

/// Runs the hook thread: installs hooks, pumps messages, translates raw
/// deliveries into [`RefreshTrigger`]s, and reinstalls hooks when the
/// watched taskbar handle dies (explorer restart).
///
/// Returns when a `WM_QUIT` posted via [`post_quit`] arrives.
pub fn run_event_pump(triggers: Sender<RefreshTrigger>, widget_hwnd: isize) {
    let (raw_tx, raw_rx) = std::sync::mpsc::channel::<(u32, isize)>();
    let mut hooks = HookSet::install(&raw_tx);

    let mut msg = MSG::default();
    loop {
        let got = unsafe { GetMessageW(&mut msg, HWND::default(), 0, 0) };
        if got.0 <= 0 || msg.message == WM_QUIT {
            break;
        }
        unsafe {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }

        // The callback ran inside DispatchMessageW; drain what it queued.
        while let Ok((event, hwnd)) = raw_rx.try_recv() {
            match event {
                EVENT_SYSTEM_FOREGROUND => {
                    // Unambiguous fullscreen windows take the emergency
                    // path; everything else goes through the debounce.
                    let taskbar_hwnd = hooks.watched_taskbar().unwrap_or(0);
                    if win::is_fullscreen_window(hwnd, &[taskbar_hwnd, widget_hwnd]) {
                        let _ = triggers.send(RefreshTrigger::ImmediateHide { hwnd });
                    } else {
                        let _ = triggers.send(RefreshTrigger::ForegroundChanged { hwnd });
                    }
                }
                EVENT_SYSTEM_MOVESIZEEND => {
                    if hooks
                        .movesize
                        .as_ref()
                        .is_some_and(|hook| hook.matches(event, hwnd))
                    {
                        let _ = triggers.send(RefreshTrigger::TaskbarMovedOrSized);
                    }
                }
                _ => {}
            }
        }

        // Validity check: watched taskbar handle gone means explorer died.
        if let Some(watched) = hooks.watched_taskbar() {
            if !win::is_window_valid(watched) {
                warn!("watched taskbar handle invalid; reinstalling hooks");
                let _ = triggers.send(RefreshTrigger::ShellRestarted);
                hooks = HookSet::install(&raw_tx);
            }
        }
    }
}

/// Asks the pump thread to exit.
pub fn post_quit(thread_id: u32) {
    unsafe {
        let _ = PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
    }
}

/// Thread id helper for pairing with [`post_quit`].
pub fn current_thread_id() -> u32 {
    unsafe { GetCurrentThreadId() }
}
