//! PID lockfile
//!
//! Ensures a single daemon per torus root. The lock is a file holding the
//! owning pid; acquisition fails fast when another live process holds it,
//! and replaces the file when the recorded process is gone.

use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LockfileError {
    #[error("daemon already running with pid {0}")]
    Held(i32),
    #[error("unable to access lockfile: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    held: bool,
}

impl PidLock {
    /// Acquire the lock at `path`, writing our pid into it.
    pub fn acquire(path: PathBuf, group_shared: bool) -> Result<Self, LockfileError> {
        match Self::try_create(&path, group_shared) {
            Ok(lock) => Ok(lock),
            Err(LockfileError::Io(err)) if err.kind() == ErrorKind::AlreadyExists => {
                match read_pid(&path) {
                    Some(pid) if process_alive(pid) => Err(LockfileError::Held(pid)),
                    _ => {
                        // stale lock from a dead process
                        tracing::warn!(path = %path.display(), "replacing stale lockfile");
                        fs::remove_file(&path)?;
                        Self::try_create(&path, group_shared)
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    fn try_create(path: &PathBuf, group_shared: bool) -> Result<Self, LockfileError> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;

        let mode = if group_shared { 0o640 } else { 0o600 };
        file.set_permissions(fs::Permissions::from_mode(mode))?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;

        Ok(PidLock {
            path: path.clone(),
            held: true,
        })
    }

    /// Release the lock, removing the file.
    pub fn release(&mut self) -> Result<(), LockfileError> {
        if self.held {
            self.held = false;
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn read_pid(path: &PathBuf) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // Signal 0 probes for existence; EPERM still means the process exists.
    // SAFETY: kill with signal 0 performs no action beyond the check.
    let result = unsafe { libc::kill(pid, 0) };
    result == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_acquire_writes_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        let _lock = PidLock::acquire(path.clone(), false).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        let _lock = PidLock::acquire(path.clone(), false).unwrap();
        let second = PidLock::acquire(path, false);
        assert!(matches!(second, Err(LockfileError::Held(_))));
    }

    #[test]
    fn test_release_allows_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        let mut lock = PidLock::acquire(path.clone(), false).unwrap();
        lock.release().unwrap();
        assert!(!path.exists());

        let _again = PidLock::acquire(path, false).unwrap();
    }

    #[test]
    fn test_stale_lock_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        // No process with pid near i32::MAX should exist.
        fs::write(&path, format!("{}\n", i32::MAX - 1)).unwrap();
        let _lock = PidLock::acquire(path.clone(), false).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        {
            let _lock = PidLock::acquire(path.clone(), false).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_lockfile_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        let _lock = PidLock::acquire(path.clone(), false).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
