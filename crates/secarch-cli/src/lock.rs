use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

/// Single-instance guard backed by a PID file. Removed on drop.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Refuses when the recorded PID belongs to a live process; a stale file
    /// is overwritten.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let own_pid = std::process::id();
        if let Ok(raw) = fs::read_to_string(&path) {
            match raw.trim().parse::<u32>() {
                Ok(pid) if pid != own_pid && process_alive(pid) => {
                    bail!(
                        "another instance is already running (pid {pid}, lock file {})",
                        path.display()
                    );
                }
                Ok(pid) => warn!(pid, path = %path.display(), "replacing stale pid file"),
                Err(_) => warn!(path = %path.display(), "replacing unreadable pid file"),
            }
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        fs::write(&path, own_pid.to_string())
            .with_context(|| format!("failed to write pid file {}", path.display()))?;
        info!(pid = own_pid, path = %path.display(), "instance lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove pid file");
            }
        }
    }
}

fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}
