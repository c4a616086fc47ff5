//! Launch-at-login toggle via the per-user Run registry key.

use anyhow::{Context, Result, bail};
use log::info;
use windows::Win32::System::Registry::{
    HKEY, HKEY_CURRENT_USER, KEY_QUERY_VALUE, KEY_SET_VALUE, REG_SZ, RegCloseKey,
    RegDeleteValueW, RegOpenKeyExW, RegQueryValueExW, RegSetValueExW,
};
use windows::core::PCWSTR;

const RUN_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Run";
const VALUE_NAME: &str = "NetSpeedTray";

fn wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

struct RegKey(HKEY);

impl RegKey {
    fn open(access: windows::Win32::System::Registry::REG_SAM_FLAGS) -> Result<Self> {
        let mut key = HKEY::default();
        let path = wide(RUN_KEY);
        let status = unsafe {
            RegOpenKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR::from_raw(path.as_ptr()),
                0,
                access,
                &mut key,
            )
        };
        if status.is_err() {
            bail!("failed to open {RUN_KEY}: {status:?}");
        }
        Ok(Self(key))
    }
}

impl Drop for RegKey {
    fn drop(&mut self) {
        unsafe {
            let _ = RegCloseKey(self.0);
        }
    }
}

fn startup_command() -> Result<String> {
    let exe = std::env::current_exe().context("failed to resolve current executable")?;
    Ok(format!("\"{}\"", exe.display()))
}

/// Whether the Run value exists and points at this executable.
pub fn is_startup_enabled() -> bool {
    let Ok(key) = RegKey::open(KEY_QUERY_VALUE) else {
        return false;
    };
    let name = wide(VALUE_NAME);
    let mut size: u32 = 0;
    let status = unsafe {
        RegQueryValueExW(
            key.0,
            PCWSTR::from_raw(name.as_ptr()),
            None,
            None,
            None,
            Some(&mut size),
        )
    };
    if status.is_err() || size == 0 {
        return false;
    }
    let mut buffer = vec![0u8; size as usize];
    let mut written = size;
    let status = unsafe {
        RegQueryValueExW(
            key.0,
            PCWSTR::from_raw(name.as_ptr()),
            None,
            None,
            Some(buffer.as_mut_ptr()),
            Some(&mut written),
        )
    };
    if status.is_err() {
        return false;
    }
    let units: Vec<u16> = buffer
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|unit| *unit != 0)
        .collect();
    let stored = String::from_utf16_lossy(&units);
    startup_command().map(|cmd| stored == cmd).unwrap_or(false)
}

/// Writes or deletes the Run value.
pub fn set_startup_enabled(enable: bool) -> Result<()> {
    let key = RegKey::open(KEY_SET_VALUE)?;
    let name = wide(VALUE_NAME);
    if enable {
        let command = startup_command()?;
        let data = wide(&command);
        let bytes: &[u8] = unsafe {
            std::slice::from_raw_parts(data.as_ptr().cast::<u8>(), data.len() * 2)
        };
        let status = unsafe {
            RegSetValueExW(
                key.0,
                PCWSTR::from_raw(name.as_ptr()),
                0,
                REG_SZ,
                Some(bytes),
            )
        };
        if status.is_err() {
            bail!("failed to write startup value: {status:?}");
        }
        info!("start-with-windows enabled ({command})");
    } else {
        let status = unsafe { RegDeleteValueW(key.0, PCWSTR::from_raw(name.as_ptr())) };
        // Deleting an absent value is success for this toggle.
        if status.is_err() && status != windows::Win32::Foundation::ERROR_FILE_NOT_FOUND {
            bail!("failed to delete startup value: {status:?}");
        }
        info!("start-with-windows disabled");
    }
    Ok(())
}
