//! Per-working-directory locks.
//!
//! The engine's state for a working directory is shared mutable state:
//! two applies or destroys against it at the same time corrupt it. Every
//! `apply_and_run` holds the directory's lock from init to destroy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

static SHARED: Lazy<Arc<LockTable>> = Lazy::new(|| Arc::new(LockTable::new()));

/// Lock table keyed by resolved working-directory path.
///
/// Entries are created on demand and pruned once nothing holds or waits
/// on them, so the table only grows with concurrently used directories.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

/// Held lock on one working directory. Released on drop.
#[derive(Debug)]
pub struct WorkdirGuard {
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl WorkdirGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkdirGuard {
    fn drop(&mut self) {
        debug!("Released working directory lock {:?}", self.path);
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide table. Orchestrators default to it so that independent
    /// suites in one process still serialize on a shared directory.
    pub fn shared() -> Arc<LockTable> {
        SHARED.clone()
    }

    /// Wait for exclusive access to `dir`.
    pub async fn acquire(&self, dir: &Path) -> WorkdirGuard {
        let path = resolve(dir);
        let lock = {
            let mut locks = self.locks.lock();
            // The table's own reference is the only one left once every
            // guard and waiter for a directory is gone.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(path.clone()).or_default().clone()
        };
        debug!("Waiting for working directory lock {:?}", path);
        let guard = lock.lock_owned().await;
        debug!("Acquired working directory lock {:?}", path);
        WorkdirGuard {
            path,
            _guard: guard,
        }
    }

    /// Whether `dir` is currently locked.
    pub fn is_locked(&self, dir: &Path) -> bool {
        let path = resolve(dir);
        self.locks
            .lock()
            .get(&path)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of directories with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonical form of a directory, so `./stack` and `/abs/stack` share a lock.
pub fn resolve(dir: &Path) -> PathBuf {
    if let Ok(path) = std::fs::canonicalize(dir) {
        return path;
    }
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(dir))
            .unwrap_or_else(|_| dir.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_dir_is_exclusive() {
        let table = Arc::new(LockTable::new());
        let dir = tempfile::tempdir().unwrap();

        let guard = table.acquire(dir.path()).await;
        assert!(table.is_locked(dir.path()));

        let waiter = {
            let table = table.clone();
            let path = dir.path().to_path_buf();
            tokio::spawn(async move {
                let _g = table.acquire(&path).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!table.is_locked(dir.path()));
    }

    #[tokio::test]
    async fn test_different_dirs_do_not_block() {
        let table = LockTable::new();
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();

        let _ga = table.acquire(a.path()).await;
        let gb = tokio::time::timeout(Duration::from_millis(100), table.acquire(b.path())).await;
        assert!(gb.is_ok());
    }

    #[tokio::test]
    async fn test_equivalent_paths_share_a_lock() {
        let table = LockTable::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("stack")).unwrap();
        let direct = dir.path().join("stack");
        let dotted = dir.path().join("stack").join(".");

        let _g = table.acquire(&direct).await;
        assert!(table.is_locked(&dotted));
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let table = LockTable::new();
        let dirs: Vec<_> = (0..5).map(|_| tempfile::tempdir().unwrap()).collect();

        for dir in &dirs {
            let _g = table.acquire(dir.path()).await;
        }
        let held = table.acquire(dirs[0].path()).await;
        assert_eq!(table.len(), 1);

        let other = tempfile::tempdir().unwrap();
        let _g = table.acquire(other.path()).await;
        assert_eq!(table.len(), 2);
        assert!(table.is_locked(held.path()));
    }

    #[test]
    fn test_shared_table_is_one_instance() {
        assert!(Arc::ptr_eq(&LockTable::shared(), &LockTable::shared()));
    }
}
