use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use fd_lock::RwLock;
use tracing::debug;
use vmpm_core::VmpmError;

/// Runs `run` while holding the exclusive advisory lock at `lock_path`.
///
/// The lock is tried once; if another process holds it the call fails with
/// [`VmpmError::Busy`] without waiting. It is released when `run` returns.
pub fn with_state_lock<T>(lock_path: &Path, run: impl FnOnce() -> Result<T>) -> Result<T> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .with_context(|| format!("failed to open lock file {}", lock_path.display()))?;

    let mut lock = RwLock::new(file);
    let _guard = match lock.try_write() {
        Ok(guard) => guard,
        Err(err) if is_contended(&err) => {
            return Err(VmpmError::Busy(lock_path.display().to_string()).into());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to lock {}", lock_path.display()));
        }
    };
    debug!(path = %lock_path.display(), "acquired state lock");

    run()
}

const ERROR_LOCK_VIOLATION: i32 = 33;

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || (cfg!(windows) && err.raw_os_error() == Some(ERROR_LOCK_VIOLATION))
}
