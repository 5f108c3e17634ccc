//! Reference-counted reader-writer locks keyed by path.
//!
//! [`PathLockTable`] hands out one `tokio::sync::RwLock` per distinct path and forgets it
//! again as soon as nobody holds or waits for it. All bookkeeping happens under a single
//! table guard, so two concurrent first acquisitions of a new path always share one entry.
//!
//! Acquiring returns a [`PathLockGuard`]; dropping the guard is the release. A caller that
//! gives up while still waiting (its `acquire` future is dropped) gives its reference back
//! the same way, so abandoned waits cannot leak entries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Access mode requested from a [`PathLockTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Any number of concurrent holders
    Shared,
    /// A single holder, excluding all shared holders
    Exclusive,
}

#[derive(Debug)]
struct LockEntry {
    lock: Arc<RwLock<()>>,
    refcount: usize,
}

/// Table of per-path reader-writer locks.
///
/// Cloning is cheap and yields a handle to the same table.
#[derive(Debug, Clone, Default)]
pub struct PathLockTable {
    entries: Arc<Mutex<HashMap<String, LockEntry>>>,
}

impl PathLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `path` in `mode`, waiting until it is available.
    pub async fn acquire(&self, path: &str, mode: LockMode) -> PathLockGuard {
        let lock = self.register(path);

        // The guard owns the reference from here on, even while still waiting.
        let mut guard = PathLockGuard {
            table: self.clone(),
            path: path.to_owned(),
            mode,
            held: None,
        };

        guard.held = Some(match mode {
            LockMode::Shared => Held::Shared(lock.read_owned().await),
            LockMode::Exclusive => Held::Exclusive(lock.write_owned().await),
        });

        tracing::trace!(path = %path, ?mode, "path lock acquired");
        guard
    }

    /// Number of paths currently tracked.
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Whether `path` has an entry, i.e. at least one holder or waiter.
    pub fn contains(&self, path: &str) -> bool {
        self.guard().contains_key(path)
    }

    /// Number of holders and waiters for `path`.
    pub fn refcount(&self, path: &str) -> usize {
        self.guard().get(path).map_or(0, |entry| entry.refcount)
    }

    fn register(&self, path: &str) -> Arc<RwLock<()>> {
        let mut entries = self.guard();
        let entry = entries
            .entry(path.to_owned())
            .or_insert_with(|| LockEntry {
                lock: Arc::new(RwLock::new(())),
                refcount: 0,
            });
        entry.refcount += 1;
        Arc::clone(&entry.lock)
    }

    fn release(&self, path: &str, mode: LockMode, held: Option<Held>) {
        let mut entries = self.guard();

        let Some(entry) = entries.get_mut(path) else {
            tracing::debug!(path = %path, ?mode, "release of untracked path ignored");
            return;
        };

        drop(held);
        entry.refcount = entry.refcount.saturating_sub(1);

        if entry.refcount == 0 {
            entries.remove(path);
            tracing::trace!(path = %path, "path lock entry removed");
        }
    }

    // Nothing panics while the table guard is held, so a poisoned map is still consistent.
    fn guard(&self) -> MutexGuard<'_, HashMap<String, LockEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
enum Held {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// A held (or still awaited) path lock. Dropping it releases the lock.
#[derive(Debug)]
#[must_use = "the path lock is released as soon as the guard is dropped"]
pub struct PathLockGuard {
    table: PathLockTable,
    path: String,
    mode: LockMode,
    held: Option<Held>,
}

impl PathLockGuard {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        self.table.release(&self.path, self.mode, self.held.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let table = PathLockTable::new();

        let guard = table.acquire("a.txt", LockMode::Shared).await;
        assert!(table.contains("a.txt"));
        assert_eq!(table.refcount("a.txt"), 1);

        drop(guard);
        assert!(!table.contains("a.txt"));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_shared_holders_share_one_entry() {
        let table = PathLockTable::new();

        let first = table.acquire("a.txt", LockMode::Shared).await;
        let second = table.acquire("a.txt", LockMode::Shared).await;
        assert_eq!(table.len(), 1);
        assert_eq!(table.refcount("a.txt"), 2);

        drop(first);
        assert_eq!(table.refcount("a.txt"), 1);
        drop(second);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_paths_are_independent() {
        let table = PathLockTable::new();

        let _a = table.acquire("a.txt", LockMode::Exclusive).await;
        let b = timeout(SHORT, table.acquire("b.txt", LockMode::Exclusive)).await;
        assert!(b.is_ok());
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_paths_are_case_sensitive() {
        let table = PathLockTable::new();

        let _lower = table.acquire("a.txt", LockMode::Exclusive).await;
        let upper = timeout(SHORT, table.acquire("A.txt", LockMode::Exclusive)).await;
        assert!(upper.is_ok());
    }

    #[tokio::test]
    async fn test_exclusive_waits_for_shared() {
        let table = PathLockTable::new();

        let reader = table.acquire("a.txt", LockMode::Shared).await;
        let blocked = timeout(SHORT, table.acquire("a.txt", LockMode::Exclusive)).await;
        assert!(blocked.is_err());

        drop(reader);
        let writer = timeout(SHORT, table.acquire("a.txt", LockMode::Exclusive)).await;
        assert!(writer.is_ok());
    }

    #[tokio::test]
    async fn test_shared_waits_for_exclusive() {
        let table = PathLockTable::new();

        let writer = table.acquire("a.txt", LockMode::Exclusive).await;
        let blocked = timeout(SHORT, table.acquire("a.txt", LockMode::Shared)).await;
        assert!(blocked.is_err());

        drop(writer);
        let reader = timeout(SHORT, table.acquire("a.txt", LockMode::Shared)).await;
        assert!(reader.is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_wait_does_not_leak() {
        let table = PathLockTable::new();

        let writer = table.acquire("a.txt", LockMode::Exclusive).await;
        let abandoned = timeout(SHORT, table.acquire("a.txt", LockMode::Exclusive)).await;
        assert!(abandoned.is_err());
        assert_eq!(table.refcount("a.txt"), 1);

        drop(writer);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_release_of_untracked_path_is_noop() {
        let table = PathLockTable::new();
        let _held = table.acquire("a.txt", LockMode::Shared).await;

        table.release("missing.txt", LockMode::Shared, None);

        assert_eq!(table.len(), 1);
        assert_eq!(table.refcount("a.txt"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_leak_under_contention() {
        let table = PathLockTable::new();
        let mut tasks = Vec::new();

        for i in 0..64 {
            let table = table.clone();
            tasks.push(tokio::spawn(async move {
                let path = format!("p{}", i % 4);
                let mode = if i % 3 == 0 {
                    LockMode::Exclusive
                } else {
                    LockMode::Shared
                };
                let guard = table.acquire(&path, mode).await;
                tokio::task::yield_now().await;
                drop(guard);
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert!(table.is_empty());
    }
}
