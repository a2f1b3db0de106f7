//! Cross-process directory locking.
//!
//! A [`DirectoryLock`] guards a store directory with an advisory OS lock on a
//! lock file. The file additionally carries the holder's identity string.
//! Because a crashed process loses its OS lock but leaves its identity in the
//! file, a newcomer that obtains the OS lock and still finds foreign content
//! asks the validator whether that holder is alive. A dead holder's lock is
//! stale and is taken over; a live one is waited for.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fs4::FileExt;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Name of the lock file inside a locked directory.
pub const LOCK_FILE: &str = ".lock";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Decides whether content found in a lock file belongs to a live holder.
pub type LockValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Advisory lock over a directory.
#[derive(Clone)]
pub struct DirectoryLock {
    path: PathBuf,
    content: String,
    validator: LockValidator,
}

impl DirectoryLock {
    /// Lock `dir`, identifying the holder by `content`.
    ///
    /// The default validator treats any leftover content as stale, which is
    /// correct whenever the OS lock is honored.
    pub fn new(dir: impl AsRef<Path>, content: impl Into<String>) -> Self {
        Self {
            path: dir.as_ref().join(LOCK_FILE),
            content: content.into(),
            validator: Arc::new(|_| false),
        }
    }

    /// Replace the liveness check applied to leftover content.
    pub fn with_validator(mut self, validator: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Whether leftover lock content belongs to a live holder.
    pub fn validate(&self, content: &str) -> bool {
        (self.validator)(content)
    }

    /// Current content of the lock file, empty when unlocked.
    pub fn read_content(&self) -> StoreResult<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Block until the lock is held or `timeout` elapses.
    pub fn acquire(&self, timeout: Duration) -> StoreResult<LockHandle> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        let deadline = Instant::now() + timeout;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    let mut existing = String::new();
                    file.seek(SeekFrom::Start(0))?;
                    file.read_to_string(&mut existing)?;

                    let recovered_stale = !existing.is_empty();
                    if recovered_stale && self.validate(&existing) {
                        // The OS lock was free but a live holder claims the
                        // directory, e.g. on a filesystem without advisory locks.
                        file.unlock()?;
                    } else {
                        if recovered_stale {
                            warn!(
                                path = %self.path.display(),
                                previous = %existing.trim(),
                                "recovering stale lock"
                            );
                        }
                        file.set_len(0)?;
                        file.seek(SeekFrom::Start(0))?;
                        file.write_all(self.content.as_bytes())?;
                        file.sync_data()?;
                        debug!(path = %self.path.display(), "lock acquired");
                        return Ok(LockHandle {
                            file: Some(file),
                            path: self.path.clone(),
                            recovered_stale,
                        });
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline {
                return Err(StoreError::LockTimeout {
                    path: self.path.clone(),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Release a handle obtained from [`DirectoryLock::acquire`].
    pub fn release(&self, handle: LockHandle) -> StoreResult<()> {
        if handle.path != self.path {
            return Err(StoreError::LockMisuse(format!(
                "handle for {} released through lock {}",
                handle.path.display(),
                self.path.display()
            )));
        }
        handle.release()
    }
}

impl std::fmt::Debug for DirectoryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryLock")
            .field("path", &self.path)
            .field("content", &self.content)
            .finish_non_exhaustive()
    }
}

/// Proof of holding a [`DirectoryLock`]. Dropping it releases the lock.
#[derive(Debug)]
pub struct LockHandle {
    file: Option<File>,
    path: PathBuf,
    recovered_stale: bool,
}

impl LockHandle {
    /// `true` if acquiring this handle took over a stale lock.
    pub fn recovered_stale(&self) -> bool {
        self.recovered_stale
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clear the holder content and drop the OS lock.
    pub fn release(mut self) -> StoreResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> StoreResult<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        file.set_len(0)?;
        file.sync_data()?;
        file.unlock()?;
        debug!(path = %self.path.display(), "lock released");
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!(path = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn acquire_writes_content_and_release_clears_it() {
        let tmp = TempDir::new().unwrap();
        let lock = DirectoryLock::new(tmp.path(), "pid:1");
        let handle = lock.acquire(Duration::from_secs(1)).unwrap();
        assert!(!handle.recovered_stale());
        assert_eq!(lock.read_content().unwrap(), "pid:1");
        lock.release(handle).unwrap();
        assert_eq!(lock.read_content().unwrap(), "");
    }

    #[test]
    fn second_acquirer_times_out() {
        let tmp = TempDir::new().unwrap();
        let first = DirectoryLock::new(tmp.path(), "first");
        let second = DirectoryLock::new(tmp.path(), "second");
        let _held = first.acquire(Duration::from_secs(1)).unwrap();
        let err = second.acquire(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));
    }

    #[test]
    fn drop_releases() {
        let tmp = TempDir::new().unwrap();
        let lock = DirectoryLock::new(tmp.path(), "me");
        drop(lock.acquire(Duration::from_secs(1)).unwrap());
        let again = lock.acquire(Duration::from_millis(50)).unwrap();
        assert!(!again.recovered_stale());
    }

    #[test]
    fn stale_content_is_recovered() {
        let tmp = TempDir::new().unwrap();
        // A crashed holder leaves its identity behind without an OS lock.
        fs::write(tmp.path().join(LOCK_FILE), "pid:dead").unwrap();
        let lock = DirectoryLock::new(tmp.path(), "pid:alive")
            .with_validator(|content| content != "pid:dead");
        let handle = lock.acquire(Duration::from_secs(1)).unwrap();
        assert!(handle.recovered_stale());
        assert_eq!(lock.read_content().unwrap(), "pid:alive");
    }

    #[test]
    fn live_foreign_content_is_waited_for() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(LOCK_FILE), "pid:other").unwrap();
        let lock = DirectoryLock::new(tmp.path(), "pid:me").with_validator(|_| true);
        let err = lock.acquire(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));
        assert_eq!(lock.read_content().unwrap(), "pid:other");
    }

    #[test]
    fn release_through_wrong_lock_is_misuse() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let lock_a = DirectoryLock::new(a.path(), "a");
        let lock_b = DirectoryLock::new(b.path(), "b");
        let handle = lock_a.acquire(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            lock_b.release(handle),
            Err(StoreError::LockMisuse(_))
        ));
        // The misrouted handle was dropped, which still released it.
        assert!(lock_a.acquire(Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn eight_threads_never_overlap() {
        let tmp = TempDir::new().unwrap();
        let holders = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let dir = tmp.path().to_path_buf();
                let holders = holders.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    let lock = DirectoryLock::new(&dir, format!("thread-{i}"));
                    let mut stale = 0;
                    for _ in 0..5 {
                        let handle = lock.acquire(Duration::from_secs(30)).unwrap();
                        if handle.recovered_stale() {
                            stale += 1;
                        }
                        let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(2));
                        holders.fetch_sub(1, Ordering::SeqCst);
                        lock.release(handle).unwrap();
                    }
                    stale
                })
            })
            .collect();

        let stale: usize = threads.into_iter().map(|t| t.join().unwrap()).sum();
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(stale, 0);
    }
}
