//! Windows theme and accent readout.
//!
//! Read on startup and again on every settings-changed event so the widget
//! text and graph chrome can follow light/dark mode and the accent color.

use log::debug;
use windows::Win32::System::Registry::{
    HKEY_CURRENT_USER, RRF_RT_REG_DWORD, RegGetValueW,
};
use windows::core::PCWSTR;

const PERSONALIZE_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Themes\Personalize";
const DWM_KEY: &str = r"Software\Microsoft\Windows\DWM";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemTheme {
    pub apps_use_light: bool,
    pub system_uses_light: bool,
    /// DWM colorization color as ARGB.
    pub accent_argb: u32,
}

impl Default for SystemTheme {
    fn default() -> Self {
        Self {
            apps_use_light: false,
            system_uses_light: false,
            accent_argb: 0xFF00_78D7,
        }
    }
}

fn wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

fn read_dword(key_path: &str, value_name: &str) -> Option<u32> {
    let path = wide(key_path);
    let name = wide(value_name);
    let mut data: u32 = 0;
    let mut size = std::mem::size_of::<u32>() as u32;
    let status = unsafe {
        RegGetValueW(
            HKEY_CURRENT_USER,
            PCWSTR::from_raw(path.as_ptr()),
            PCWSTR::from_raw(name.as_ptr()),
            RRF_RT_REG_DWORD,
            None,
            Some(std::ptr::from_mut(&mut data).cast()),
            Some(&mut size),
        )
    };
    status.is_ok().then_some(data)
}

/// Current theme from the registry; missing values fall back to dark with
/// the stock accent.
pub fn read_system_theme() -> SystemTheme {
    let defaults = SystemTheme::default();
    let theme = SystemTheme {
        apps_use_light: read_dword(PERSONALIZE_KEY, "AppsUseLightTheme")
            .map_or(defaults.apps_use_light, |v| v != 0),
        system_uses_light: read_dword(PERSONALIZE_KEY, "SystemUsesLightTheme")
            .map_or(defaults.system_uses_light, |v| v != 0),
        accent_argb: read_dword(DWM_KEY, "ColorizationColor").unwrap_or(defaults.accent_argb),
    };
    debug!("system theme: {theme:?}");
    theme
}
