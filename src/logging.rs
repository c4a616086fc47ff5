//! Rotating file logging.

use std::path::Path;

use anyhow::{Context, Result};
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};

use crate::app_dirs::LOG_BASENAME;

const LOG_FILE_MAX_BYTES: u64 = 10 * 1024 * 1024;
const LOG_BACKUP_COUNT: usize = 3;

/// Starts the global logger: 10 MiB per file, three numbered backups, under
/// the data directory. Keep the returned handle alive for the process
/// lifetime; dropping it flushes and shuts logging down.
///
/// `RUST_LOG`-style filtering comes from `NETSPEEDTRAY_LOG` (default
/// `info`).
pub fn init(log_dir: &Path) -> Result<LoggerHandle> {
    let spec = std::env::var("NETSPEEDTRAY_LOG").unwrap_or_else(|_| "info".to_string());
    let handle = Logger::try_with_str(&spec)
        .with_context(|| format!("invalid log spec '{spec}'"))?
        .log_to_file(
            FileSpec::default()
                .directory(log_dir)
                .basename(LOG_BASENAME)
                .suffix("log"),
        )
        .rotate(
            Criterion::Size(LOG_FILE_MAX_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(LOG_BACKUP_COUNT),
        )
        .duplicate_to_stderr(Duplicate::Warn)
        .start()
        .context("failed to start logger")?;
    Ok(handle)
}
