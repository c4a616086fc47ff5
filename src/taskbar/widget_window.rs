//! The readout window: a borderless tool window drawn with plain GDI.
//!
//! Deliberately framework-free; the window only paints two short lines of
//! text and is driven entirely by the integrator (position, visibility,
//! z-order).

use std::sync::Mutex;

use anyhow::{Result, bail};
use log::warn;
use once_cell::sync::Lazy;
use windows::Win32::Foundation::{COLORREF, HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::Graphics::Gdi::{
    BeginPaint, EndPaint, HBRUSH, InvalidateRect, PAINTSTRUCT, SetBkMode, SetTextColor, TextOutW,
    TRANSPARENT,
};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CW_USEDEFAULT, CreateWindowExW, DefWindowProcW, DispatchMessageW, GetMessageW, IDC_ARROW,
    LoadCursorW, MSG, PostQuitMessage, RegisterClassW, SW_HIDE, SW_SHOWNOACTIVATE,
    SWP_NOACTIVATE, SWP_NOSIZE, SWP_NOZORDER, SetWindowPos, ShowWindow, TranslateMessage,
    WINDOW_EX_STYLE, WM_DESTROY, WM_PAINT, WNDCLASSW, WS_EX_NOACTIVATE, WS_EX_TOOLWINDOW,
    WS_EX_TOPMOST, WS_POPUP,
};
use windows::core::{PCWSTR, w};

use super::position::{Point, WidgetSize};
use super::visibility::WidgetSurface;
use super::win;
use crate::sync_ext::MutexExt;

const WIDGET_WIDTH: i32 = 100;
const WIDGET_HEIGHT: i32 = 30;
const TEXT_COLOR: COLORREF = COLORREF(0x00FF_FFFF);

static SPEED_TEXT: Lazy<Mutex<(String, String)>> =
    Lazy::new(|| Mutex::new(("0.00 Mbps".to_string(), "0.00 Mbps".to_string())));

static WINDOW_HWND: Lazy<Mutex<isize>> = Lazy::new(|| Mutex::new(0));

/// Updates the painted text and schedules a repaint. Callable from any
/// thread.
pub fn update_speed_text(up_text: &str, down_text: &str) {
    *SPEED_TEXT.lock_unpoisoned() = (up_text.to_string(), down_text.to_string());
    let hwnd = *WINDOW_HWND.lock_unpoisoned();
    if hwnd != 0 {
        unsafe {
            let _ = InvalidateRect(HWND(hwnd as *mut core::ffi::c_void), None, false);
        }
    }
}

unsafe extern "system" fn wnd_proc(
    hwnd: HWND,
    message: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match message {
        WM_PAINT => {
            let mut ps = PAINTSTRUCT::default();
            let hdc = unsafe { BeginPaint(hwnd, &mut ps) };
            let (up_text, down_text) = SPEED_TEXT.lock_unpoisoned().clone();
            unsafe {
                SetBkMode(hdc, TRANSPARENT);
                SetTextColor(hdc, TEXT_COLOR);
                let up_wide: Vec<u16> = format!("\u{2191} {up_text}").encode_utf16().collect();
                let down_wide: Vec<u16> = format!("\u{2193} {down_text}").encode_utf16().collect();
                let _ = TextOutW(hdc, 2, 1, &up_wide);
                let _ = TextOutW(hdc, 2, WIDGET_HEIGHT / 2, &down_wide);
                let _ = EndPaint(hwnd, &ps);
            }
            LRESULT(0)
        }
        WM_DESTROY => {
            unsafe { PostQuitMessage(0) };
            LRESULT(0)
        }
        _ => unsafe { DefWindowProcW(hwnd, message, wparam, lparam) },
    }
}

pub struct SpeedWindow {
    hwnd: isize,
}

impl SpeedWindow {
    /// Registers the window class and creates the (initially hidden)
    /// readout window. Must run on the thread that will pump its messages.
    pub fn create() -> Result<Self> {
        unsafe {
            let instance: HINSTANCE = GetModuleHandleW(PCWSTR::null())?.into();
            let class = WNDCLASSW {
                lpfnWndProc: Some(wnd_proc),
                hInstance: instance,
                lpszClassName: w!("NetSpeedTrayWidget"),
                hCursor: LoadCursorW(None, IDC_ARROW).unwrap_or_default(),
                hbrBackground: HBRUSH::default(),
                ..Default::default()
            };
            if RegisterClassW(&class) == 0 {
                bail!("RegisterClassW failed");
            }

            let hwnd = CreateWindowExW(
                WINDOW_EX_STYLE(
                    WS_EX_TOOLWINDOW.0 | WS_EX_TOPMOST.0 | WS_EX_NOACTIVATE.0,
                ),
                w!("NetSpeedTrayWidget"),
                w!("NetSpeedTray"),
                WS_POPUP,
                CW_USEDEFAULT,
                CW_USEDEFAULT,
                WIDGET_WIDTH,
                WIDGET_HEIGHT,
                None,
                None,
                instance,
                None,
            )?;
            if hwnd.is_invalid() {
                bail!("CreateWindowExW returned an invalid handle");
            }
            *WINDOW_HWND.lock_unpoisoned() = hwnd.0 as isize;
            Ok(Self {
                hwnd: hwnd.0 as isize,
            })
        }
    }

    pub fn hwnd(&self) -> isize {
        self.hwnd
    }

    /// Standard message pump; returns when the window is destroyed.
    pub fn run_message_loop(&self) {
        let mut msg = MSG::default();
        loop {
            let got = unsafe { GetMessageW(&mut msg, HWND::default(), 0, 0) };
            if got.0 <= 0 {
                break;
            }
            unsafe {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
        *WINDOW_HWND.lock_unpoisoned() = 0;
    }
}

/// [`WidgetSurface`] over the readout window; safe to drive from the
/// integrator thread.
pub struct WindowSurface {
    hwnd: isize,
    visible: bool,
}

impl WindowSurface {
    pub fn new(hwnd: isize) -> Self {
        Self {
            hwnd,
            visible: false,
        }
    }

    fn raw(&self) -> HWND {
        HWND(self.hwnd as *mut core::ffi::c_void)
    }
}

impl WidgetSurface for WindowSurface {
    fn size(&self) -> WidgetSize {
        WidgetSize {
            width: WIDGET_WIDTH,
            height: WIDGET_HEIGHT,
        }
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        unsafe {
            let _ = ShowWindow(self.raw(), if visible { SW_SHOWNOACTIVATE } else { SW_HIDE });
        }
    }

    fn move_to(&mut self, position: Point) {
        unsafe {
            if let Err(err) = SetWindowPos(
                self.raw(),
                HWND::default(),
                position.x,
                position.y,
                0,
                0,
                SWP_NOSIZE | SWP_NOACTIVATE | SWP_NOZORDER,
            ) {
                warn!("failed to move widget window: {err}");
            }
        }
    }

    fn raise_above_taskbar(&mut self, taskbar_hwnd: isize) {
        win::raise_widget_above_taskbar(self.hwnd, taskbar_hwnd);
    }
}
