//! Explicit cross-process locking of a directory.
//!
//! Write scopes of a store already hold its directory lock; these
//! operations are for coordinating other work on a directory, such as a
//! deployment target. Holding a store's own lock through them and then
//! opening a write scope on that store blocks until the timeout.

use std::path::Path;
use std::time::Duration;

use hive_store::{DirectoryLock, LockHandle};
use tracing::info;

use crate::error::OpsResult;

/// Acquire the lock on `dir`, writing `content` into the lock file.
///
/// `is_live` decides whether content left behind by another holder still
/// belongs to a running process; content it rejects is taken over.
pub fn directory_lock(
    dir: &Path,
    content: &str,
    is_live: impl Fn(&str) -> bool + Send + Sync + 'static,
    timeout: Duration,
) -> OpsResult<LockHandle> {
    let lock = DirectoryLock::new(dir, content).with_validator(is_live);
    let handle = lock.acquire(timeout)?;
    info!(dir = %dir.display(), "directory locked");
    Ok(handle)
}

/// Release a lock taken with [`directory_lock`].
pub fn directory_release(handle: LockHandle) -> OpsResult<()> {
    let path = handle.path().to_path_buf();
    handle.release()?;
    info!(lock = %path.display(), "directory released");
    Ok(())
}
