use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use tokio::sync::OwnedMutexGuard;
use tracing::trace;

lazy_static! {
    static ref GLOBAL: PathLocks = PathLocks::new();
}

type LockTable = Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>;

/// Mutual exclusion per file system path. Locks are created lazily and removed from the table
///  when the last task holding or waiting for them lets go.
#[derive(Clone, Default)]
pub struct PathLocks {
    table: LockTable,
}

pub struct PathLockGuard {
    table: LockTable,
    key: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PathLocks {
    pub fn new() -> PathLocks {
        Default::default()
    }

    /// The process wide table. Everything writing into repository storage locks through it, so
    ///  independently created storages on the same root exclude each other.
    pub fn global() -> PathLocks {
        GLOBAL.clone()
    }

    pub async fn lock(&self, path: &Path) -> PathLockGuard {
        let key = canonical_key(path);
        let mutex = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table.entry(key.clone()).or_default().clone()
        };

        trace!("acquiring lock for {}", key.display());
        let guard = mutex.lock_owned().await;
        PathLockGuard {
            table: self.table.clone(),
            key,
            guard: Some(guard),
        }
    }

    /// number of paths with a live lock
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        // only the table itself still references the lock -> nobody is waiting for it
        if table.get(&self.key).map(|m| Arc::strong_count(m) == 1).unwrap_or(false) {
            table.remove(&self.key);
        }
    }
}

/// absolute, with '.' and '..' resolved lexically - the path need not exist yet
fn canonical_key(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

    let mut result = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                result.pop();
            }
            c => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod test {
    use std::time::Duration;
    use super::*;

    #[tokio::test]
    async fn test_same_path_is_exclusive() {
        let locks = PathLocks::new();
        let guard = locks.lock(Path::new("/repo/a/../b/file.jar")).await;
        assert_eq!(locks.len(), 1);

        let locks2 = locks.clone();
        let contender = tokio::spawn(async move {
            let _guard = locks2.lock(Path::new("/repo/b/./file.jar")).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_global_table_is_shared() {
        let path = Path::new("/repo/shared/global-test.jar");
        let _guard = PathLocks::global().lock(path).await;
        let contender = tokio::time::timeout(Duration::from_millis(100), PathLocks::global().lock(path)).await;
        assert!(contender.is_err());
    }

    #[tokio::test]
    async fn test_distinct_paths_are_independent() {
        let locks = PathLocks::new();
        let _a = locks.lock(Path::new("/repo/a.jar")).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock(Path::new("/repo/b.jar"))).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
