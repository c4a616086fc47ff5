//! One process per user session.
//!
//! A named global mutex on Windows; an advisory file lock elsewhere. The
//! secondary instance logs and exits nonzero; there is no window to focus,
//! the widget of the primary instance is already on screen.

use anyhow::Result;
#[cfg(not(windows))]
use anyhow::Context;
use log::info;

pub const INSTANCE_MUTEX_NAME: &str = "NetSpeedTray_SingleInstance";

#[derive(Debug)]
pub enum InstanceOutcome {
    /// This process holds the instance lock; keep the guard alive for the
    /// process lifetime.
    Primary(InstanceGuard),
    /// Another instance already owns the lock.
    AlreadyRunning,
}

#[derive(Debug)]
pub struct InstanceGuard {
    #[cfg(windows)]
    mutex: windows::Win32::Foundation::HANDLE,
    #[cfg(not(windows))]
    _lock_file: std::fs::File,
}

// HANDLE is a raw kernel handle owned exclusively by this guard.
#[cfg(windows)]
unsafe impl Send for InstanceGuard {}

#[cfg(windows)]
impl Drop for InstanceGuard {
    fn drop(&mut self) {
        unsafe {
            use windows::Win32::Foundation::CloseHandle;
            let _ = CloseHandle(self.mutex);
        }
    }
}

/// Tries to become the single running instance.
pub fn acquire() -> Result<InstanceOutcome> {
    #[cfg(windows)]
    {
        acquire_windows()
    }

    #[cfg(not(windows))]
    {
        acquire_with_lock_file()
    }
}

#[cfg(windows)]
fn acquire_windows() -> Result<InstanceOutcome> {
    use anyhow::Context;
    use windows::Win32::Foundation::{ERROR_ALREADY_EXISTS, GetLastError};
    use windows::Win32::System::Threading::CreateMutexW;
    use windows::core::PCWSTR;

    let name_wide: Vec<u16> = INSTANCE_MUTEX_NAME
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();
    let mutex = unsafe { CreateMutexW(None, false, PCWSTR::from_raw(name_wide.as_ptr())) }
        .with_context(|| format!("CreateMutexW({INSTANCE_MUTEX_NAME})"))?;

    let already_exists = unsafe { GetLastError() } == ERROR_ALREADY_EXISTS;
    if already_exists {
        unsafe {
            use windows::Win32::Foundation::CloseHandle;
            let _ = CloseHandle(mutex);
        }
        return Ok(InstanceOutcome::AlreadyRunning);
    }

    info!("single-instance mutex acquired");
    Ok(InstanceOutcome::Primary(InstanceGuard { mutex }))
}

#[cfg(not(windows))]
fn acquire_with_lock_file() -> Result<InstanceOutcome> {
    use fs2::FileExt;

    let lock_path = std::env::temp_dir().join(format!("{INSTANCE_MUTEX_NAME}.lock"));
    let lock_file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("open lock file {}", lock_path.display()))?;

    match lock_file.try_lock_exclusive() {
        Ok(()) => {
            info!("single-instance lock acquired ({})", lock_path.display());
            Ok(InstanceOutcome::Primary(InstanceGuard {
                _lock_file: lock_file,
            }))
        }
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
            Ok(InstanceOutcome::AlreadyRunning)
        }
        Err(err) => {
            Err(err).with_context(|| format!("acquire lock {}", lock_path.display()))
        }
    }
}
