//! Advisory per-directory lock.
//!
//! A store directory is owned by at most one process at a time. The lock
//! file holds the owner's pid and stays on disk after release; only the
//! advisory lock on it matters.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Acquires the lock, failing immediately if another process holds it.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = File::options()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        lock_exclusive(&file).map_err(|e| {
            Error::IO(format!("directory lock {} is unavailable: {e}", path.display()))
        })?;

        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the advisory lock; the pid file
        // is left behind on purpose.
        let _ = self.file.flush();
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> std::io::Result<()> {
    // No advisory locking on this platform; open succeeds unguarded.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;

    #[test]
    fn test_acquire_writes_pid() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("store.lock");

        let lock = DirLock::acquire(&path).expect("failed to acquire lock");
        assert_eq!(lock.path(), path.as_path());

        let content = std::fs::read_to_string(&path).expect("failed to read lock file");
        assert!(content.contains(&std::process::id().to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_second_acquire_fails_until_release() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("store.lock");

        let first = DirLock::acquire(&path).expect("failed to acquire lock");
        assert!(DirLock::acquire(&path).is_err());

        drop(first);
        DirLock::acquire(&path).expect("lock should be free after release");
    }
}
