//! Per-connection capture worker.
//!
//! Each session is a single task that owns its request and response buffers
//! and consumes [`CaptureCommand`]s from a bounded queue. Nothing else ever
//! touches the buffers, so the worker needs no locking. The worker flushes
//! on `Close` or when every sender has gone away, then exits.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, trace};

use super::sink::ArtifactDir;
use super::types::{CaptureCommand, Direction, SessionState};

pub(crate) struct SessionWorker {
    id: u64,
    request: Vec<u8>,
    response: Vec<u8>,
    commands: mpsc::Receiver<CaptureCommand>,
    sink: ArtifactDir,
    state: SessionState,
}

impl SessionWorker {
    /// Spawn a worker for `id` and return its queue and task handle.
    ///
    /// Panics if called outside a tokio runtime.
    pub(crate) fn spawn(
        id: u64,
        capacity: usize,
        sink: ArtifactDir,
    ) -> (mpsc::Sender<CaptureCommand>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = Self {
            id,
            request: Vec::new(),
            response: Vec::new(),
            commands: rx,
            sink,
            state: SessionState::Created,
        };
        (tx, tokio::spawn(worker.run()))
    }

    async fn run(mut self) {
        self.transition(SessionState::Accumulating);

        while let Some(command) = self.commands.recv().await {
            match command {
                CaptureCommand::Append { direction, data } => {
                    let buf = match direction {
                        Direction::Request => &mut self.request,
                        Direction::Response => &mut self.response,
                    };
                    buf.extend_from_slice(&data);
                    trace!(
                        id = self.id,
                        direction = direction.as_str(),
                        bytes = data.len(),
                        "captured"
                    );
                }
                CaptureCommand::Close => break,
            }
        }

        self.flush().await;
    }

    async fn flush(&mut self) {
        self.transition(SessionState::Flushing);
        self.commands.close();

        if let Err(e) = self.sink.write(self.id, Direction::Request, &self.request).await {
            error!(id = self.id, error = %e, "save request failed");
        }
        if let Err(e) = self.sink.write(self.id, Direction::Response, &self.response).await {
            error!(id = self.id, error = %e, "save response failed");
        }

        self.transition(SessionState::Terminated);
    }

    fn transition(&mut self, next: SessionState) {
        trace!(id = self.id, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}
