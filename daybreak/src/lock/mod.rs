//! Single-run process lock.
//!
//! The lock file records `{pid, acquired_at}` and is created with
//! `create_new`, so exactly one contender wins. A lock whose holder process is
//! gone, or which is older than the staleness threshold, is treated as
//! abandoned and superseded. The check-and-reclaim sequence runs under an
//! advisory `flock` on a sibling `.guard` file so two contenders can never both
//! reclaim the same stale lock.
//!
//! Release is tied to [`LockGuard`]'s `Drop`; a crash leaves the file behind
//! and the next run reclaims it once the holder is observably dead.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{AlreadyRunningError, DaybreakError, Result};
use crate::utils::{Clock, SystemClock};

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// PID of the holding process.
    pub pid: u32,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
}

/// What [`ProcessLock::inspect`] found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockState {
    /// The recorded holder.
    pub info: LockInfo,
    /// Whether the holder still counts as live.
    pub live: bool,
}

/// Exclusive, process-scoped lock backed by a file at a well-known path.
#[derive(Debug, Clone)]
pub struct ProcessLock {
    path: PathBuf,
    stale_after: Duration,
    clock: Arc<dyn Clock>,
}

impl ProcessLock {
    /// Creates a lock handle for `path`. Nothing is touched until [`acquire`](Self::acquire).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Uses a custom clock for timestamps and staleness.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquires the lock or fails fast with [`DaybreakError::AlreadyRunning`].
    pub fn acquire(&self) -> Result<LockGuard> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| lock_error(parent, &e))?;
        }
        let _critical = self.enter_critical_section()?;

        // One reclaim is enough: under the guard nobody else can recreate the
        // file between our remove and our create.
        for _ in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(file) => {
                    let info = LockInfo {
                        pid: std::process::id(),
                        acquired_at: self.clock.now(),
                    };
                    write_info(file, &info).map_err(|e| lock_error(&self.path, &e))?;
                    info!(pid = info.pid, path = %self.path.display(), "Lock acquired");
                    return Ok(LockGuard {
                        path: self.path.clone(),
                        info,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match self.read_info()? {
                        Some(info) if self.is_live(&info) => {
                            warn!(
                                pid = info.pid,
                                acquired_at = %info.acquired_at,
                                "Lock held by another run"
                            );
                            return Err(AlreadyRunningError::new(info.pid, info.acquired_at).into());
                        }
                        Some(info) => warn!(
                            pid = info.pid,
                            acquired_at = %info.acquired_at,
                            "Reclaiming stale lock"
                        ),
                        None => warn!(path = %self.path.display(), "Reclaiming unreadable lock file"),
                    }
                    match std::fs::remove_file(&self.path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(lock_error(&self.path, &e)),
                    }
                }
                Err(e) => return Err(lock_error(&self.path, &e)),
            }
        }

        Err(DaybreakError::Lock(format!(
            "{}: could not create lock file after reclaiming",
            self.path.display()
        )))
    }

    /// [`acquire`](Self::acquire) on the blocking pool, for async callers.
    pub async fn acquire_async(&self) -> Result<LockGuard> {
        let lock = self.clone();
        tokio::task::spawn_blocking(move || lock.acquire())
            .await
            .map_err(|e| DaybreakError::Internal(format!("lock worker join error: {e}")))?
    }

    /// Reports the current holder, if any, without acquiring.
    pub fn inspect(&self) -> Result<Option<LockState>> {
        Ok(self.read_info()?.map(|info| LockState {
            live: self.is_live(&info),
            info,
        }))
    }

    /// Returns true if `info` describes a holder that still counts as live.
    #[must_use]
    pub fn is_live(&self, info: &LockInfo) -> bool {
        let age = self
            .clock
            .now()
            .signed_duration_since(info.acquired_at)
            .to_std()
            .unwrap_or_default();
        if age > self.stale_after {
            debug!(pid = info.pid, age_secs = age.as_secs(), "Lock older than staleness threshold");
            return false;
        }
        process_alive(info.pid)
    }

    /// Reads the lock file. Unparseable content yields `None`.
    fn read_info(&self) -> Result<Option<LockInfo>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(lock_error(&self.path, &e)),
        }
    }

    fn enter_critical_section(&self) -> Result<File> {
        let path = guard_path(&self.path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| lock_error(&path, &e))?;
        file.lock_exclusive().map_err(|e| lock_error(&path, &e))?;
        Ok(file)
    }
}

/// Scoped ownership of the process lock.
///
/// Dropping the guard removes the lock file, unless another run has already
/// superseded it as stale.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    info: LockInfo,
    released: bool,
}

impl LockGuard {
    /// Returns what was written to the lock file.
    #[must_use]
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Releases the lock now, reporting any error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.remove_if_owned()
    }

    fn remove_if_owned(&self) -> Result<()> {
        let guard_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(guard_path(&self.path))
            .map_err(|e| lock_error(&self.path, &e))?;
        guard_file
            .lock_exclusive()
            .map_err(|e| lock_error(&self.path, &e))?;

        let current: Option<LockInfo> = match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).ok(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(lock_error(&self.path, &e)),
        };

        if current.as_ref() == Some(&self.info) {
            std::fs::remove_file(&self.path).map_err(|e| lock_error(&self.path, &e))?;
            info!(pid = self.info.pid, "Lock released");
        } else {
            warn!(path = %self.path.display(), "Lock was superseded; leaving it in place");
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.remove_if_owned() {
            warn!(error = %e, "Error releasing lock");
        }
    }
}

fn write_info(mut file: File, info: &LockInfo) -> std::io::Result<()> {
    serde_json::to_writer(&mut file, info)?;
    file.flush()?;
    file.sync_all()
}

fn guard_path(lock_path: &Path) -> PathBuf {
    let mut name = lock_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".guard");
    lock_path.with_file_name(name)
}

fn lock_error(path: &Path, err: &std::io::Error) -> DaybreakError {
    DaybreakError::Lock(format!("{}: {err}", path.display()))
}

/// Returns true if a process with `pid` exists.
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid == std::process::id() {
        return true;
    }
    // pid 0 and negative pids address process groups, never a single holder.
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Without a portable liveness probe only the age threshold can retire a lock.
#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
