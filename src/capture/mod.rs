//! Per-connection request/response capture.
//!
//! The [`CaptureRegistry`] maps connection ids to running session workers.
//! Callers open a session when a connection starts, feed it bytes as they
//! are read and written, and complete it when the connection ends. The
//! worker then writes both byte streams to the artifact directory.
//!
//! Writes go through a bounded queue per session: when the worker falls
//! behind, `write_request`/`write_response` wait until there is room again.

mod session;
mod sink;
mod types;

pub use sink::ArtifactDir;
pub use types::{CaptureCommand, Direction, SessionState};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::future::join_all;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::error::CaptureError;

use session::SessionWorker;

struct Registration {
    commands: mpsc::Sender<CaptureCommand>,
    task: JoinHandle<()>,
    generation: u64,
}

struct Registry {
    sessions: Mutex<FxHashMap<u64, Registration>>,
    sink: ArtifactDir,
    queue_capacity: usize,
    next_generation: AtomicU64,
}

impl Registry {
    fn sessions(&self) -> std::sync::MutexGuard<'_, FxHashMap<u64, Registration>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unregister `id` if it still belongs to the given registration.
    fn release(&self, id: u64, generation: u64) {
        let mut sessions = self.sessions();
        if sessions.get(&id).is_some_and(|r| r.generation == generation) {
            if let Some(registration) = sessions.remove(&id) {
                // A full queue is fine: dropping the sender closes it and the
                // worker flushes once it has drained.
                let _ = registration.commands.try_send(CaptureCommand::Close);
                debug!(id, "capture session released");
            }
        }
    }
}

/// Registry of capture sessions keyed by connection id.
///
/// Cheap to clone; clones share the same sessions and artifact directory.
#[derive(Clone)]
pub struct CaptureRegistry {
    inner: Arc<Registry>,
}

impl CaptureRegistry {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            inner: Arc::new(Registry {
                sessions: Mutex::new(FxHashMap::default()),
                sink: ArtifactDir::new(&config.dir),
                queue_capacity: config.queue_capacity,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn artifacts(&self) -> &ArtifactDir {
        &self.inner.sink
    }

    /// Start a capture session for `id` and spawn its worker.
    ///
    /// The returned guard completes the session when dropped, unless it was
    /// completed or cleared first. Initializing an id that is already active
    /// replaces the old registration; the old worker flushes what it has.
    ///
    /// Must be called from within a tokio runtime.
    pub fn init_session(&self, id: u64) -> SessionGuard {
        let (commands, task) =
            SessionWorker::spawn(id, self.inner.queue_capacity, self.inner.sink.clone());
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        let replaced = self.inner.sessions().insert(
            id,
            Registration {
                commands,
                task,
                generation,
            },
        );
        if replaced.is_some() {
            warn!(id, "capture session re-initialized while active");
        }
        debug!(id, "capture session started");

        SessionGuard {
            registry: Arc::downgrade(&self.inner),
            id,
            generation,
        }
    }

    /// Append to the request stream of `id`. Unknown ids are ignored.
    ///
    /// Returns the number of bytes accepted, which is always `data.len()`.
    pub async fn write_request(&self, id: u64, data: &[u8]) -> usize {
        self.write(id, Direction::Request, data).await
    }

    /// Append to the response stream of `id`. Unknown ids are ignored.
    pub async fn write_response(&self, id: u64, data: &[u8]) -> usize {
        self.write(id, Direction::Response, data).await
    }

    async fn write(&self, id: u64, direction: Direction, data: &[u8]) -> usize {
        let commands = self
            .inner
            .sessions()
            .get(&id)
            .map(|r| r.commands.clone());

        if let Some(commands) = commands {
            let command = CaptureCommand::Append {
                direction,
                data: data.to_vec(),
            };
            if commands.send(command).await.is_err() {
                debug!(id, "capture session closed, write dropped");
            }
        }
        data.len()
    }

    /// Unregister `id` and tell its worker to flush and exit.
    ///
    /// Returns the worker's handle so the caller can wait for the flush, or
    /// `None` if `id` was not active.
    pub async fn complete(&self, id: u64) -> Option<JoinHandle<()>> {
        let registration = self.inner.sessions().remove(&id)?;
        let _ = registration.commands.send(CaptureCommand::Close).await;
        debug!(id, "capture session completed");
        Some(registration.task)
    }

    /// Unregister and close every active session without waiting for the
    /// flushes, and wipe and recreate the artifact directory.
    ///
    /// The drained sessions are only closed once the directory has been
    /// reset, so their flushes never race with the removal.
    pub async fn clear(&self) -> Result<(), CaptureError> {
        let drained = std::mem::take(&mut *self.inner.sessions());
        let result = self.inner.sink.reset().await;

        let closed = drained.len();
        for (_, registration) in drained {
            let _ = registration.commands.try_send(CaptureCommand::Close);
        }

        result?;
        info!(closed, dir = %self.inner.sink.root().display(), "capture cleared");
        Ok(())
    }

    /// Complete every active session and wait until all of them have flushed.
    pub async fn shutdown(&self) {
        let drained = std::mem::take(&mut *self.inner.sessions());
        let mut tasks = Vec::with_capacity(drained.len());
        for (_, registration) in drained {
            let _ = registration.commands.send(CaptureCommand::Close).await;
            tasks.push(registration.task);
        }

        let flushed = join_all(tasks).await.len();
        info!(flushed, "capture sessions flushed");
    }

    pub async fn read_request(&self, id: u64) -> Result<Vec<u8>, CaptureError> {
        self.inner.sink.read(id, Direction::Request).await
    }

    pub async fn read_response(&self, id: u64) -> Result<Vec<u8>, CaptureError> {
        self.inner.sink.read(id, Direction::Response).await
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.sessions().len()
    }

    pub fn is_active(&self, id: u64) -> bool {
        self.inner.sessions().contains_key(&id)
    }
}

/// Scoped ownership of one capture session.
///
/// Dropping the guard completes the session if it is still the active
/// registration for its id.
#[must_use = "dropping the guard completes the capture session"]
pub struct SessionGuard {
    registry: Weak<Registry>,
    id: u64,
    generation: u64,
}

impl SessionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(self.id, self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn registry() -> (CaptureRegistry, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let registry = CaptureRegistry::new(&CaptureConfig::new(tmp.path().join("temp")));
        registry.clear().await.unwrap();
        (registry, tmp)
    }

    #[tokio::test]
    async fn flushed_artifacts_follow_write_order() {
        let (capture, _tmp) = registry().await;
        let _session = capture.init_session(1);

        capture.write_request(1, b"R1").await;
        capture.write_response(1, b"P1").await;
        capture.write_request(1, b"R2").await;
        capture.complete(1).await.unwrap().await.unwrap();

        assert_eq!(capture.read_request(1).await.unwrap(), b"R1R2");
        assert_eq!(capture.read_response(1).await.unwrap(), b"P1");
    }

    #[tokio::test]
    async fn write_to_unregistered_id_is_dropped() {
        let (capture, _tmp) = registry().await;

        let n = capture.write_request(99, b"lost").await;

        assert_eq!(n, 4);
        assert!(capture.complete(99).await.is_none());
        assert!(capture.read_request(99).await.unwrap().is_empty());
        assert!(!capture.artifacts().path(99, Direction::Request).exists());
    }

    #[tokio::test]
    async fn second_complete_is_noop() {
        let (capture, _tmp) = registry().await;
        let _session = capture.init_session(2);

        assert!(capture.complete(2).await.is_some());
        assert!(capture.complete(2).await.is_none());
        assert!(!capture.is_active(2));
    }

    #[tokio::test]
    async fn read_before_flush_is_empty() {
        let (capture, _tmp) = registry().await;
        let _session = capture.init_session(3);

        capture.write_request(3, b"pending").await;

        assert!(capture.read_request(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_unregisters_and_wipes_artifacts() {
        let (capture, _tmp) = registry().await;
        let _first = capture.init_session(1);
        capture.write_request(1, b"old").await;
        capture.complete(1).await.unwrap().await.unwrap();
        let _second = capture.init_session(2);
        let _third = capture.init_session(3);
        capture.write_request(2, b"in flight").await;

        capture.clear().await.unwrap();

        assert_eq!(capture.active_sessions(), 0);
        assert!(capture.read_request(1).await.unwrap().is_empty());
        assert!(capture.artifacts().root().is_dir());

        // Cleared sessions still flush, into the recreated directory. The
        // response artifact is written last, so its presence means the
        // worker is done.
        tokio::time::timeout(Duration::from_secs(2), async {
            while !(capture.artifacts().path(2, Direction::Response).exists()
                && capture.artifacts().path(3, Direction::Response).exists())
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("cleared sessions should flush");
        assert_eq!(capture.read_request(2).await.unwrap(), b"in flight");
        assert!(capture.read_request(3).await.unwrap().is_empty());
        assert!(!capture.is_active(2));
    }

    #[tokio::test]
    async fn dropping_guard_flushes_session() {
        let (capture, _tmp) = registry().await;
        let session = capture.init_session(4);
        capture.write_response(4, b"bye").await;

        drop(session);

        assert!(!capture.is_active(4));
        let path = capture.artifacts().path(4, Direction::Response);
        tokio::time::timeout(Duration::from_secs(2), async {
            while capture.read_response(4).await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("guard drop should flush");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn stale_guard_does_not_release_new_session() {
        let (capture, _tmp) = registry().await;
        let old = capture.init_session(5);
        let _new = capture.init_session(5);

        drop(old);

        assert!(capture.is_active(5));
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let tmp = tempfile::tempdir().unwrap();
        let config = CaptureConfig {
            dir: tmp.path().to_path_buf(),
            queue_capacity: 1,
        };
        let capture = CaptureRegistry::new(&config);
        let _session = capture.init_session(6);

        for chunk in 0..64u8 {
            capture.write_request(6, &[chunk]).await;
        }
        capture.complete(6).await.unwrap().await.unwrap();

        let expected: Vec<u8> = (0..64u8).collect();
        assert_eq!(capture.read_request(6).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn shutdown_waits_for_every_flush() {
        let (capture, _tmp) = registry().await;
        let _a = capture.init_session(7);
        let _b = capture.init_session(8);
        capture.write_request(7, b"seven").await;
        capture.write_request(8, b"eight").await;

        capture.shutdown().await;

        assert_eq!(capture.active_sessions(), 0);
        assert_eq!(capture.read_request(7).await.unwrap(), b"seven");
        assert_eq!(capture.read_request(8).await.unwrap(), b"eight");
    }
}
