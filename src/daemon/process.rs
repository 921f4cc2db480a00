// Daemon liveness tracking through a PID file and a companion lock file

use crate::error::{PresageError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};

/// Owns the daemon's PID file and its `.lock` sibling.
///
/// The lock file is created with `create_new`, so two daemons racing to
/// start cannot both win. The PID file is what `status` and `stop` read
/// back later to find the process.
#[derive(Clone)]
pub struct ProcessManager {
    pid_file: PathBuf,
    lock_file: PathBuf,
}

impl ProcessManager {
    pub fn new(pid_file: PathBuf) -> Self {
        let lock_file = pid_file.with_extension("lock");
        Self {
            pid_file,
            lock_file,
        }
    }

    /// Whether the process recorded in the PID file is alive.
    ///
    /// A missing or stale PID file counts as not running.
    pub fn is_running(&self) -> bool {
        match self.read_pid() {
            // Signal 0 probes for existence without delivering anything
            Ok(pid) => kill(Pid::from_raw(pid), None).is_ok(),
            Err(_) => false,
        }
    }

    /// Claim the lock file and record this process's PID.
    ///
    /// Fails when another daemon already holds the lock or is alive under
    /// the recorded PID.
    pub fn acquire(&self) -> Result<()> {
        if self.is_running() {
            return Err(PresageError::Daemon(
                "Daemon is already running".to_string(),
            ));
        }

        ensure_parent_dir(&self.lock_file)?;

        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_file)
            .map_err(|_| {
                PresageError::Daemon(
                    "Failed to acquire lock - daemon may already be running".to_string(),
                )
            })?;

        ensure_parent_dir(&self.pid_file)?;
        fs::write(&self.pid_file, std::process::id().to_string()).map_err(|e| {
            PresageError::Io {
                source: e,
                context: format!("Failed to write PID file: {:?}", self.pid_file),
            }
        })?;

        Ok(())
    }

    /// Remove the PID file and drop the lock
    pub fn release(&self) -> Result<()> {
        remove_if_present(&self.pid_file)?;
        remove_if_present(&self.lock_file)?;
        Ok(())
    }

    /// PID recorded in the PID file
    pub fn read_pid(&self) -> Result<i32> {
        let contents = fs::read_to_string(&self.pid_file).map_err(|e| PresageError::Io {
            source: e,
            context: format!("Failed to read PID file: {:?}", self.pid_file),
        })?;

        contents
            .trim()
            .parse()
            .map_err(|_| PresageError::Daemon("Invalid PID in file".to_string()))
    }

    /// Deliver a signal to the recorded process
    pub fn signal(&self, sig: Signal) -> Result<()> {
        let pid = self.read_pid()?;
        kill(Pid::from_raw(pid), sig).map_err(|_| {
            PresageError::Daemon(format!("Failed to send signal to process {}", pid))
        })
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PresageError::Io {
            source: e,
            context: format!("Failed to create directory: {:?}", parent),
        })?;
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PresageError::Io {
            source: e,
            context: format!("Failed to remove {:?}", path),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> ProcessManager {
        ProcessManager::new(temp.path().join("test.pid"))
    }

    #[test]
    fn test_lock_file_sits_next_to_pid_file() {
        let temp = TempDir::new().unwrap();
        let pm = manager(&temp);
        assert_eq!(pm.pid_file(), temp.path().join("test.pid"));
        assert_eq!(pm.lock_file(), temp.path().join("test.lock"));
    }

    #[test]
    fn test_not_running_without_pid_file() {
        let temp = TempDir::new().unwrap();
        assert!(!manager(&temp).is_running());
    }

    #[test]
    fn test_acquire_then_release() {
        let temp = TempDir::new().unwrap();
        let pm = manager(&temp);

        pm.acquire().unwrap();
        assert!(pm.pid_file().exists());
        assert!(pm.lock_file().exists());
        // We recorded our own PID, so the probe sees a live process
        assert!(pm.is_running());
        assert_eq!(pm.read_pid().unwrap(), std::process::id() as i32);

        pm.release().unwrap();
        assert!(!pm.pid_file().exists());
        assert!(!pm.lock_file().exists());
    }

    #[test]
    fn test_second_acquire_is_refused() {
        let temp = TempDir::new().unwrap();
        let pm1 = manager(&temp);
        let pm2 = manager(&temp);

        pm1.acquire().unwrap();
        assert!(pm2.acquire().is_err());
        pm1.release().unwrap();
    }

    #[test]
    fn test_release_tolerates_missing_files() {
        let temp = TempDir::new().unwrap();
        manager(&temp).release().unwrap();
    }
}
