//! Lock files for shared JSON state written by several agent processes.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use crate::error::Error;

/// How long to keep retrying before giving up on a held lock.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// A lock file older than this is treated as left behind by a dead process.
const STALE_AFTER: Duration = Duration::from_secs(10);

const RETRY_DELAY: Duration = Duration::from_millis(20);

/// Path of the lock file guarding `path`.
pub fn lock_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.lock", path.display()))
}

/// Acquire an exclusive lock on a file, retrying until the timeout.
///
/// Retries sleep the calling thread. Async code should call this through
/// `spawn_blocking`.
pub fn acquire_lock(path: &Path) -> Result<LockHandle, Error> {
    acquire_lock_within(path, LOCK_TIMEOUT)
}

pub fn acquire_lock_within(path: &Path, timeout: Duration) -> Result<LockHandle, Error> {
    let lock_path = lock_path(path);
    let deadline = Instant::now() + timeout;

    loop {
        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(lock_file) => {
                let handle = claim(lock_path, lock_file, write_owner)?;
                tracing::debug!("Acquired lock: {}", handle.lock_path.display());
                return Ok(handle);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if is_stale(&lock_path) {
                    tracing::warn!("Removing stale lock: {}", lock_path.display());
                    if std::fs::remove_file(&lock_path).is_ok() {
                        continue;
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }

        if Instant::now() >= deadline {
            return Err(Error::Lock(format!(
                "Lock file is held: {}",
                lock_path.display()
            )));
        }
        std::thread::sleep(RETRY_DELAY);
    }
}

/// Take ownership of a freshly created lock file. If writing the owner
/// fails the file is removed again.
fn claim<W>(lock_path: PathBuf, mut lock_file: File, write: W) -> Result<LockHandle, Error>
where
    W: FnOnce(&mut File) -> io::Result<()>,
{
    let handle = LockHandle { lock_path };
    let written = write(&mut lock_file);
    drop(lock_file);
    written?;
    Ok(handle)
}

fn write_owner(lock_file: &mut File) -> io::Result<()> {
    lock_file.write_all(format!("{}\n", std::process::id()).as_bytes())?;
    lock_file.sync_all()
}

fn is_stale(lock_path: &Path) -> bool {
    lock_path
        .metadata()
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map_or(false, |age| age > STALE_AFTER)
}

/// Lock handle - releases lock when dropped.
pub struct LockHandle {
    lock_path: PathBuf,
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            tracing::warn!("Failed to release lock {}: {}", self.lock_path.display(), e);
        } else {
            tracing::debug!("Released lock: {}", self.lock_path.display());
        }
    }
}

/// Acquire lock, execute function, release lock.
pub fn with_lock<T, F>(path: &Path, f: F) -> Result<T, Error>
where
    F: FnOnce() -> Result<T, Error>,
{
    let _lock = acquire_lock(path)?;
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_lock() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("agent_registry.json");

        fs::write(&test_file, "{}").unwrap();

        let lock1 = acquire_lock(&test_file);
        assert!(lock1.is_ok());

        // Held lock times out
        let lock2 = acquire_lock_within(&test_file, Duration::from_millis(50));
        assert!(matches!(lock2, Err(Error::Lock(_))));

        drop(lock1);
        assert!(!lock_path(&test_file).exists());

        let lock3 = acquire_lock_within(&test_file, Duration::from_millis(50));
        assert!(lock3.is_ok());
    }

    #[test]
    fn test_waiter_gets_lock_after_release() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("agent_registry.json");

        let held = acquire_lock(&test_file).unwrap();
        let waiter_path = test_file.clone();
        let waiter = std::thread::spawn(move || {
            acquire_lock_within(&waiter_path, Duration::from_secs(2)).is_ok()
        });

        std::thread::sleep(Duration::from_millis(100));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_with_lock_runs_closure() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("agent_registry.json");

        let value = with_lock(&test_file, || Ok(42)).unwrap();
        assert_eq!(value, 42);
        assert!(!lock_path(&test_file).exists());
    }

    #[test]
    fn test_failed_owner_write_releases_lock() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("agent_registry.json");
        let path = lock_path(&test_file);
        let lock_file = OpenOptions::new().write(true).create_new(true).open(&path).unwrap();

        let claimed = claim(path.clone(), lock_file, |_| {
            Err(io::Error::new(ErrorKind::Other, "disk full"))
        });
        assert!(matches!(claimed, Err(Error::Io(_))));
        assert!(!path.exists());

        // Nothing left behind for the next caller to wait on
        assert!(acquire_lock_within(&test_file, Duration::from_millis(50)).is_ok());
    }
}
