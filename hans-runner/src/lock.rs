//! Board lock
//!
//! The test board is a single physical device, so at most one pipeline may
//! use it at a time. Ownership is a marker file: it survives restarts of
//! the service, and a marker left behind by a crashed run is taken over
//! once it is older than the staleness threshold.
//!
//! The marker is created with create-if-absent semantics, so two
//! acquirers can never both observe the board as free. Acquirers inside
//! this process also serialize the stale-marker takeover behind a mutex.
//!
//! A held marker is kept fresh by a heartbeat that touches its
//! modification time every third of the staleness threshold, so only a
//! marker whose holder is gone ever goes stale. Inside this process the
//! live holder is also recorded in memory and is never taken over.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to create lock marker {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exclusive claim on the test board
#[derive(Debug)]
pub struct BoardLock {
    path: PathBuf,
    stale_after: Duration,
    poll_interval: Duration,
    /// Serializes check-and-create among acquirers in this process
    gate: Mutex<()>,
    /// Owner of the guard currently alive in this process
    live: Arc<std::sync::Mutex<Option<Uuid>>>,
}

impl BoardLock {
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
            poll_interval,
            gate: Mutex::new(()),
            live: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.lock_path.clone(),
            config.stale_lock_after,
            config.lock_poll_interval,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits until the board is free and claims it for `owner`
    ///
    /// A marker older than the staleness threshold is removed and the
    /// board claimed without further waiting.
    pub async fn acquire(&self, owner: Uuid) -> Result<BoardLockGuard, LockError> {
        let mut waiting = false;

        loop {
            if let Some(guard) = self.try_acquire(owner).await? {
                return Ok(guard);
            }

            if !waiting {
                info!("Board is busy, run {} waiting for {}", owner, self.path.display());
                waiting = true;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Claims the board if it is free or its marker is stale
    ///
    /// A marker held by a live guard of this process is never stale.
    pub async fn try_acquire(&self, owner: Uuid) -> Result<Option<BoardLockGuard>, LockError> {
        let _gate = self.gate.lock().await;

        if let Some(holder) = self.live_holder() {
            debug!("Board held by run {} in this process", holder);
            return Ok(None);
        }

        if self.create_marker(owner).await? {
            return Ok(Some(self.guard(owner)));
        }

        match self.marker_age().await {
            Some(age) if age > self.stale_after => {
                warn!(
                    "Lock marker {} is {}s old, taking it over",
                    self.path.display(),
                    age.as_secs()
                );
                self.release().await;

                if self.create_marker(owner).await? {
                    Ok(Some(self.guard(owner)))
                } else {
                    // Another process won the race for the freed board
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    /// Removes the marker whoever holds it; a missing marker is a no-op
    pub async fn release(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!("Removed lock marker {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove lock marker {}: {}", self.path.display(), e),
        }
    }

    /// Whether a marker currently exists
    pub async fn is_held(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Run id recorded in the marker, if any
    pub async fn holder(&self) -> Option<Uuid> {
        let content = tokio::fs::read_to_string(&self.path).await.ok()?;
        content.trim().parse().ok()
    }

    /// Returns false when the marker already exists
    async fn create_marker(&self, owner: Uuid) -> Result<bool, LockError> {
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(source) => {
                return Err(LockError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let written = async {
            file.write_all(owner.to_string().as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(source) = written {
            self.release().await;
            return Err(LockError::Io {
                path: self.path.clone(),
                source,
            });
        }

        Ok(true)
    }

    async fn marker_age(&self) -> Option<Duration> {
        let modified = tokio::fs::metadata(&self.path).await.ok()?.modified().ok()?;
        // A timestamp in the future counts as fresh
        Some(SystemTime::now().duration_since(modified).unwrap_or_default())
    }

    fn live_holder(&self) -> Option<Uuid> {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn guard(&self, owner: Uuid) -> BoardLockGuard {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = Some(owner);

        let every = (self.stale_after / 3).max(Duration::from_millis(1));
        BoardLockGuard {
            path: self.path.clone(),
            owner,
            released: false,
            live: Arc::clone(&self.live),
            heartbeat: spawn_heartbeat(self.path.clone(), owner, every),
        }
    }
}

/// Keeps `owner`'s marker fresh until aborted or the marker changes hands
fn spawn_heartbeat(path: PathBuf, owner: Uuid, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let marker = path.clone();
            match tokio::task::spawn_blocking(move || touch_marker(&marker, owner)).await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    warn!(
                        "Lock marker {} no longer names run {}, stopping heartbeat",
                        path.display(),
                        owner
                    );
                    return;
                }
                Ok(Err(e)) if e.kind() == ErrorKind::NotFound => return,
                Ok(Err(e)) => warn!("Failed to refresh lock marker {}: {}", path.display(), e),
                Err(e) => {
                    warn!("Lock heartbeat for run {} stopped: {}", owner, e);
                    return;
                }
            }
        }
    })
}

/// Bumps the marker's modification time if it still names `owner`
fn touch_marker(path: &Path, owner: Uuid) -> std::io::Result<bool> {
    let content = std::fs::read_to_string(path)?;
    if content.trim() != owner.to_string() {
        return Ok(false);
    }

    std::fs::File::options()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())?;
    Ok(true)
}

/// Held claim on the board
///
/// Dropping the guard releases the board as a last resort; the pipeline
/// releases it explicitly with [`BoardLockGuard::release`]. Either way the
/// marker is only removed while it still names this guard's owner.
///
/// The drop path uses blocking file calls, since `Drop` cannot await. The
/// marker is a few bytes on local disk.
#[derive(Debug)]
pub struct BoardLockGuard {
    path: PathBuf,
    owner: Uuid,
    released: bool,
    live: Arc<std::sync::Mutex<Option<Uuid>>>,
    heartbeat: JoinHandle<()>,
}

impl BoardLockGuard {
    pub fn owner(&self) -> Uuid {
        self.owner
    }

    pub async fn release(mut self) {
        self.released = true;
        self.heartbeat.abort();

        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if self.is_own(&content) => {
                if let Err(e) = tokio::fs::remove_file(&self.path).await {
                    if e.kind() != ErrorKind::NotFound {
                        warn!("Failed to remove lock marker {}: {}", self.path.display(), e);
                    }
                }
            }
            Ok(_) => warn!(
                "Lock marker {} was taken over, leaving it in place",
                self.path.display()
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to read lock marker {}: {}", self.path.display(), e),
        }

        self.clear_live();
    }

    fn is_own(&self, content: &str) -> bool {
        content.trim() == self.owner.to_string()
    }

    fn clear_live(&self) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if *live == Some(self.owner) {
            *live = None;
        }
    }
}

impl Drop for BoardLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.heartbeat.abort();

        if let Ok(content) = std::fs::read_to_string(&self.path) {
            if self.is_own(&content) {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!("Failed to release lock on drop: {}", e);
                }
            }
        }

        self.clear_live();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const POLL: Duration = Duration::from_millis(10);
    const STALE: Duration = Duration::from_secs(600);

    fn lock_in(dir: &Path) -> BoardLock {
        BoardLock::new(dir.join(".lockfile"), STALE, POLL)
    }

    fn age_marker(path: &Path, age: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn test_acquire_free_board() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path());
        let owner = Uuid::new_v4();

        let guard = lock.acquire(owner).await.unwrap();

        assert!(lock.is_held().await);
        assert_eq!(lock.holder().await, Some(owner));
        assert_eq!(guard.owner(), owner);

        guard.release().await;
        assert!(!lock.is_held().await);
    }

    #[tokio::test]
    async fn test_try_acquire_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path());

        let _guard = lock.acquire(Uuid::new_v4()).await.unwrap();
        assert!(lock.try_acquire(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_marker_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path());

        // Marker left behind by someone else entirely
        std::fs::write(lock.path(), "crashed worker").unwrap();
        age_marker(lock.path(), STALE + Duration::from_secs(1));

        let owner = Uuid::new_v4();
        let guard = tokio::time::timeout(Duration::from_secs(1), lock.acquire(owner))
            .await
            .expect("stale lock should not be waited on")
            .unwrap();

        assert_eq!(lock.holder().await, Some(owner));
        guard.release().await;
    }

    #[tokio::test]
    async fn test_fresh_marker_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path());

        std::fs::write(lock.path(), "busy").unwrap();
        age_marker(lock.path(), STALE - Duration::from_secs(60));

        let waited = tokio::time::timeout(Duration::from_millis(100), lock.acquire(Uuid::new_v4())).await;
        assert!(waited.is_err());
        assert_eq!(std::fs::read_to_string(lock.path()).unwrap(), "busy");
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path());

        lock.release().await;
        assert!(!lock.is_held().await);

        let _guard = lock.acquire(Uuid::new_v4()).await.unwrap();
        lock.release().await;
        lock.release().await;
        assert!(!lock.is_held().await);
    }

    #[tokio::test]
    async fn test_waiter_gets_board_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = Arc::new(lock_in(dir.path()));

        let first = lock.acquire(Uuid::new_v4()).await.unwrap();

        let second_owner = Uuid::new_v4();
        let waiter = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.acquire(second_owner).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        first.release().await;

        let second = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(second.owner(), second_owner);
        assert_eq!(lock.holder().await, Some(second_owner));
    }

    #[tokio::test]
    async fn test_superseded_guard_keeps_new_marker() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path());

        let old = lock.acquire(Uuid::new_v4()).await.unwrap();

        // Another service instance declared the marker stale and took over
        let new_owner = Uuid::new_v4();
        std::fs::write(lock.path(), new_owner.to_string()).unwrap();

        old.release().await;
        assert_eq!(lock.holder().await, Some(new_owner));
    }

    #[tokio::test]
    async fn test_live_holder_is_never_stale() {
        let dir = tempfile::tempdir().unwrap();
        let lock = BoardLock::new(dir.path().join(".lockfile"), Duration::from_millis(30), POLL);

        let owner = Uuid::new_v4();
        let guard = lock.acquire(owner).await.unwrap();
        age_marker(lock.path(), Duration::from_secs(3600));

        assert!(lock.try_acquire(Uuid::new_v4()).await.unwrap().is_none());
        assert_eq!(lock.holder().await, Some(owner));

        guard.release().await;
        assert!(lock.try_acquire(Uuid::new_v4()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_marker_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let stale = Duration::from_millis(150);
        let path = dir.path().join(".lockfile");
        let lock = BoardLock::new(&path, stale, POLL);
        // Same marker seen from another service instance
        let other = BoardLock::new(&path, stale, POLL);

        let owner = Uuid::new_v4();
        let guard = lock.acquire(owner).await.unwrap();

        for _ in 0..5 {
            tokio::time::sleep(stale / 2).await;
            assert!(other.try_acquire(Uuid::new_v4()).await.unwrap().is_none());
        }
        assert_eq!(other.holder().await, Some(owner));

        guard.release().await;
        assert!(!other.is_held().await);
    }

    #[tokio::test]
    async fn test_dropped_guard_frees_board_in_process() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path());

        drop(lock.acquire(Uuid::new_v4()).await.unwrap());

        let next = lock.try_acquire(Uuid::new_v4()).await.unwrap();
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn test_drop_releases_board() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path());

        {
            let _guard = lock.acquire(Uuid::new_v4()).await.unwrap();
            assert!(lock.is_held().await);
        }

        assert!(!lock.is_held().await);
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let lock = BoardLock::new(dir.path().join("missing/.lockfile"), STALE, POLL);

        let err = lock.acquire(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, LockError::Io { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion() {
        let dir = tempfile::tempdir().unwrap();
        let lock = Arc::new(lock_in(dir.path()));
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let active = Arc::clone(&active);
                let max_active = Arc::clone(&max_active);
                tokio::spawn(async move {
                    let guard = lock.acquire(Uuid::new_v4()).await.unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    guard.release().await;
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(!lock.is_held().await);
    }
}
