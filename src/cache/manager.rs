//! Background eviction for the expiry-ordered pool.
//!
//! A [`CacheManager`] owns one pool, one rearmable timer and one
//! cancellation token. After every insertion the timer is re-armed for the
//! head of the pool, so the single eviction task wakes exactly when the next
//! entry expires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::CacheError;

use super::pool::{CacheEntry, CachePool};

/// Lifecycle of the eviction task. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
}

struct Inner<T> {
    pool: RwLock<CachePool<T>>,
    /// Next wake-up for the eviction task; `None` means disarmed.
    timer: watch::Sender<Option<Instant>>,
    cancel: CancellationToken,
    state: Mutex<LoopState>,
    evicted: AtomicU64,
}

impl<T> Inner<T> {
    /// Apply `f` to the pool, then drop every expired head and re-arm the
    /// timer for the next one.
    ///
    /// The deadline is published before the write lock is released, so
    /// concurrent updates cannot publish out of order.
    fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut CachePool<T>),
    {
        let Ok(mut pool) = self.pool.write() else {
            return;
        };
        f(&mut pool);

        if self.cancel.is_cancelled() {
            return;
        }

        let now = Instant::now();
        let mut evicted = 0;
        while pool.pop_expired(now).is_some() {
            evicted += 1;
        }
        if evicted > 0 {
            self.evicted.fetch_add(evicted, Ordering::Relaxed);
            trace!(evicted, remaining = pool.len(), "evicted cache entries");
        }

        self.timer.send_replace(pool.head().map(|head| head.expires));
    }
}

/// Expiry-ordered cache with a single background eviction task.
///
/// The payload is matched with typed predicates through [`CacheManager::range`].
pub struct CacheManager<T> {
    inner: Arc<Inner<T>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T> CacheManager<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (timer, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                pool: RwLock::new(CachePool::new()),
                timer,
                cancel: CancellationToken::new(),
                state: Mutex::new(LoopState::Idle),
                evicted: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start the eviction task on the current tokio runtime.
    ///
    /// Only one task is ever started; a stopped manager cannot be restarted.
    pub fn run(&self) -> Result<(), CacheError> {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *state {
            LoopState::Running => return Err(CacheError::AlreadyStarted),
            LoopState::Stopped => return Err(CacheError::Stopped),
            LoopState::Idle => {}
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
        let handle = runtime.spawn(evict_loop(
            Arc::clone(&self.inner),
            self.inner.timer.subscribe(),
        ));
        *state = LoopState::Running;
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        // Entries pushed before the task existed still need a wake-up.
        drop(state);
        self.inner.update(|_| {});
        Ok(())
    }

    /// Request termination of the eviction task. The timer is never re-armed
    /// after this returns.
    pub fn stop(&self) {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Held so no update can publish a deadline after the disarm.
        let _pool = self
            .inner
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.cancel.cancel();
        self.inner.timer.send_replace(None);
        if *state != LoopState::Stopped {
            info!("cache eviction stopping");
        }
        *state = LoopState::Stopped;
    }

    /// Stop and wait for the eviction task to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "cache eviction task failed");
            }
        }
    }

    pub fn state(&self) -> LoopState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `data` expiring `ttl` from now and reschedule eviction.
    pub fn push(&self, data: T, ttl: Duration) {
        self.inner.update(|pool| {
            pool.push(CacheEntry {
                data,
                expires: Instant::now() + ttl,
            })
        });
    }

    /// First cached value satisfying `f`, scanning the whole pool.
    pub fn range<F>(&self, f: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let pool = self.inner.pool.read().ok()?;
        pool.range(f).cloned()
    }

    /// Empty the pool. The eviction task keeps running.
    pub fn clear(&self) {
        self.inner.update(CachePool::clear);
    }

    pub fn len(&self) -> usize {
        self.inner.pool.read().map(|pool| pool.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries evicted since the last call.
    pub fn take_evicted(&self) -> u64 {
        self.inner.evicted.swap(0, Ordering::Relaxed)
    }

    /// Instant the eviction task is currently armed for.
    pub fn next_wakeup(&self) -> Option<Instant> {
        *self.inner.timer.borrow()
    }
}

#[cfg(test)]
impl<T> CacheManager<T> {
    /// Heap order holds and the timer is armed for the current head.
    pub(crate) fn is_consistent(&self) -> bool {
        let pool = self
            .inner
            .pool
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        pool.is_heap() && *self.inner.timer.borrow() == pool.head().map(|head| head.expires)
    }
}

impl<T> Default for CacheManager<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for CacheManager<T> {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

async fn evict_loop<T>(inner: Arc<Inner<T>>, mut timer: watch::Receiver<Option<Instant>>) {
    debug!("cache eviction loop started");
    loop {
        let deadline = *timer.borrow_and_update();
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            changed = timer.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = sleep_until_deadline(deadline) => inner.update(|_| {}),
        }
    }
    *inner.state.lock().unwrap_or_else(PoisonError::into_inner) = LoopState::Stopped;
    debug!("cache eviction loop exited");
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
