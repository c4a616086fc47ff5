//! Win32 implementations of the taskbar probe and widget surface plumbing.

use log::debug;
use windows::Win32::Foundation::{HWND, RECT};
use windows::Win32::Graphics::Gdi::{
    GetMonitorInfoW, MONITOR_DEFAULTTONEAREST, MONITORINFO, MonitorFromWindow,
};
use windows::Win32::UI::HiDpi::GetDpiForWindow;
use windows::Win32::UI::WindowsAndMessaging::{
    FindWindowExW, FindWindowW, GetWindowRect, IsWindow, IsWindowVisible, SWP_NOACTIVATE,
    SWP_NOMOVE, SWP_NOSIZE, SetWindowPos,
};
use windows::core::{PCWSTR, w};

use super::info::{Rect, TaskbarInfo, derive_edge, is_fullscreen_rect};
use super::visibility::TaskbarProbe;

const BASE_DPI: f64 = 96.0;

fn to_hwnd(raw: isize) -> HWND {
    HWND(raw as *mut core::ffi::c_void)
}

fn from_hwnd(hwnd: HWND) -> isize {
    hwnd.0 as isize
}

fn to_rect(rect: RECT) -> Rect {
    Rect::new(rect.left, rect.top, rect.right, rect.bottom)
}

fn window_rect(hwnd: HWND) -> Option<Rect> {
    let mut rect = RECT::default();
    unsafe { GetWindowRect(hwnd, &mut rect) }.ok()?;
    Some(to_rect(rect))
}

fn monitor_rects(hwnd: HWND) -> Option<(Rect, Rect)> {
    let monitor = unsafe { MonitorFromWindow(hwnd, MONITOR_DEFAULTTONEAREST) };
    let mut info = MONITORINFO {
        cbSize: std::mem::size_of::<MONITORINFO>() as u32,
        ..Default::default()
    };
    if !unsafe { GetMonitorInfoW(monitor, &mut info) }.as_bool() {
        return None;
    }
    Some((to_rect(info.rcMonitor), to_rect(info.rcWork)))
}

pub fn is_window_valid(raw: isize) -> bool {
    raw != 0 && unsafe { IsWindow(to_hwnd(raw)) }.as_bool()
}

/// Queries the shell for a fresh [`TaskbarInfo`] snapshot.
pub fn query_taskbar_info() -> Option<TaskbarInfo> {
    unsafe {
        let taskbar = FindWindowW(w!("Shell_TrayWnd"), PCWSTR::null()).ok()?;
        if taskbar.is_invalid() {
            return None;
        }

        let rect_phys = window_rect(taskbar)?;
        let (monitor_rect_phys, work_area_phys) = monitor_rects(taskbar)?;

        let tray = FindWindowExW(taskbar, HWND::default(), w!("TrayNotifyWnd"), PCWSTR::null())
            .ok()
            .filter(|h| !h.is_invalid());
        let tray_rect_phys = tray.and_then(window_rect);

        // Shell_TrayWnd -> ReBarWindow32 -> MSTaskSwWClass -> MSTaskListWClass
        let tasklist_rect_phys = FindWindowExW(
            taskbar,
            HWND::default(),
            w!("ReBarWindow32"),
            PCWSTR::null(),
        )
        .ok()
        .and_then(|rebar| {
            FindWindowExW(rebar, HWND::default(), w!("MSTaskSwWClass"), PCWSTR::null()).ok()
        })
        .and_then(|sw| {
            FindWindowExW(sw, HWND::default(), w!("MSTaskListWClass"), PCWSTR::null()).ok()
        })
        .filter(|h| !h.is_invalid())
        .and_then(window_rect);

        let dpi = GetDpiForWindow(taskbar);
        let dpi_scale = if dpi > 0 { f64::from(dpi) / BASE_DPI } else { 1.0 };

        let mut info = TaskbarInfo {
            hwnd: from_hwnd(taskbar),
            rect_phys,
            tray_rect_phys,
            tasklist_rect_phys,
            monitor_rect_phys,
            work_area_phys,
            dpi_scale,
            edge: derive_edge(rect_phys, monitor_rect_phys),
        };
        if !IsWindowVisible(taskbar).as_bool() {
            // Auto-hidden taskbar: keep the geometry but mark the band gone.
            info.rect_phys = Rect::new(rect_phys.left, rect_phys.top, rect_phys.left, rect_phys.top);
        }
        Some(info)
    }
}

/// Probe backed by the live shell. `widget_hwnd` is excluded from
/// obstruction checks so the widget can never obstruct itself.
pub struct ShellProbe {
    pub widget_hwnd: isize,
}

impl TaskbarProbe for ShellProbe {
    fn query(&mut self) -> Option<TaskbarInfo> {
        query_taskbar_info()
    }

    fn is_obstructed_by(&mut self, info: &TaskbarInfo, hwnd: isize) -> bool {
        if hwnd == 0 || hwnd == info.hwnd || hwnd == self.widget_hwnd {
            return false;
        }
        if !is_window_valid(hwnd) {
            return false;
        }
        let handle = to_hwnd(hwnd);
        let Some(window) = window_rect(handle) else {
            return false;
        };
        let Some((monitor, _)) = monitor_rects(handle) else {
            return false;
        };
        let obstructing = is_fullscreen_rect(window, monitor);
        if obstructing {
            debug!("fullscreen obstruction by hwnd {hwnd}");
        }
        obstructing
    }
}

/// Whether `hwnd` is a valid window whose rect exactly covers its monitor,
/// excluding the handles in `exclude`.
pub fn is_fullscreen_window(hwnd: isize, exclude: &[isize]) -> bool {
    if hwnd == 0 || exclude.contains(&hwnd) || !is_window_valid(hwnd) {
        return false;
    }
    let handle = to_hwnd(hwnd);
    let Some(window) = window_rect(handle) else {
        return false;
    };
    let Some((monitor, _)) = monitor_rects(handle) else {
        return false;
    };
    is_fullscreen_rect(window, monitor)
}

/// Inserts the widget immediately below the taskbar in the z-order.
pub fn raise_widget_above_taskbar(widget_hwnd: isize, taskbar_hwnd: isize) {
    if widget_hwnd == 0 || taskbar_hwnd == 0 {
        return;
    }
    unsafe {
        let _ = SetWindowPos(
            to_hwnd(widget_hwnd),
            to_hwnd(taskbar_hwnd),
            0,
            0,
            0,
            0,
            SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE,
        );
    }
}
