//! Blocking worker tasks
//!
//! The scanner, progress reporter and session all do blocking port I/O with
//! real timeouts, so each runs on tokio's blocking pool rather than as an
//! async task. A [`WorkerHandle`] pairs the join handle with the worker's
//! cancellation token. Dropping the handle cancels the worker.

use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::protocol::ProtocolError;

/// Longest uninterrupted sleep inside a worker
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Handle to a running worker
#[derive(Debug)]
pub struct WorkerHandle<T> {
    name: &'static str,
    token: CancellationToken,
    join: JoinHandle<T>,
    _cancel_on_drop: DropGuard,
}

impl<T: Send + 'static> WorkerHandle<T> {
    /// Run `work` on the blocking pool of the current tokio runtime.
    ///
    /// Fails when called outside a runtime.
    pub(crate) fn spawn<F>(
        name: &'static str,
        token: CancellationToken,
        work: F,
    ) -> Result<Self, ProtocolError>
    where
        F: FnOnce(CancellationToken) -> T + Send + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|e| ProtocolError::WorkerFailed(format!("{name}: {e}")))?;
        let worker_token = token.clone();
        let join = runtime.spawn_blocking(move || work(worker_token));
        tracing::trace!(worker = name, "Worker spawned");
        Ok(Self {
            name,
            _cancel_on_drop: token.clone().drop_guard(),
            token,
            join,
        })
    }

    /// Ask the worker to stop at its next cancellation point
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the worker to return.
    ///
    /// Dropping this future before it resolves cancels the worker.
    pub async fn join(self) -> Result<T, ProtocolError> {
        let name = self.name;
        self.join
            .await
            .map_err(|e| ProtocolError::WorkerFailed(format!("{name}: {e}")))
    }

    /// Cancel and wait
    pub async fn shutdown(self) -> Result<T, ProtocolError> {
        self.cancel();
        self.join().await
    }
}

/// Sleep for `duration` unless cancelled first.
///
/// Returns `false` if the token was cancelled before the time ran out.
pub(crate) fn sleep_cancellable(token: &CancellationToken, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
