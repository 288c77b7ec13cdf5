//! Single-instance guard.
//!
//! The filesystem backend's staged commit assumes exactly one process
//! owns the data root, so startup takes an advisory `fs2` lock on a
//! pid file under it. The guard is RAII: dropping it releases the lock
//! and cleans the file up, including on early-error paths out of
//! `run_server`.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Holds the advisory lock for the lifetime of the server.
pub struct InstanceGuard {
    path: PathBuf,
    // Keeps the locked handle alive; the OS drops the lock with it.
    _lock: File,
}

impl InstanceGuard {
    /// Lock `<data_root>/turnforge.pid`, refusing to start when another
    /// process already holds it.
    pub fn acquire(data_root: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_root)?;
        let path = data_root.join("turnforge.pid");

        // Truncate only after the lock is won, so a losing process
        // cannot wipe the winner's pid.
        let lock = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        if lock.try_lock_exclusive().is_err() {
            anyhow::bail!(
                "data root {} is in use by another turnforge process",
                data_root.display()
            );
        }
        lock.set_len(0)?;

        writeln!(&lock, "{}", std::process::id())?;
        lock.sync_all()?;
        tracing::info!(path = %path.display(), "instance lock acquired");

        Ok(Self { path, _lock: lock })
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "pid file left behind");
        }
    }
}
