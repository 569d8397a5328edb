//! Scan progress estimate
//!
//! Purely time based: the bar fills over `progress_steps * progress_tick`
//! regardless of what the scanner is doing. The only real event it reacts to
//! is the handshake succeeding, which jumps straight to 100%.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::config::DeviceConfig;
use crate::protocol::ProtocolError;
use crate::state::SharedState;
use crate::worker::{sleep_cancellable, WorkerHandle};

/// Events emitted by the reporter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Completion estimate, 0–100
    Progress(u8),
    /// The run is over; restart a fresh reporter if still not connected
    Finished,
}

/// How a reporter run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    /// The device connected during the run
    Connected,
    /// All steps elapsed without a connection
    Elapsed,
    /// Cancelled by the host
    Cancelled,
}

/// Time-based progress estimator for the scan phase
pub struct ProgressReporter {
    state: SharedState,
    steps: u32,
    tick: std::time::Duration,
}

/// Integer percentage after `step` (zero based) of `total`
pub fn percent(step: u32, total: u32) -> u8 {
    let pct = 100 * (u64::from(step) + 1) / u64::from(total.max(1));
    pct.min(100) as u8
}

impl ProgressReporter {
    pub fn new(state: SharedState, config: &DeviceConfig) -> Self {
        Self {
            state,
            steps: config.progress_steps.max(1),
            tick: config.progress_tick(),
        }
    }

    /// Tick through every step. Blocking.
    pub fn run(&self, events: &UnboundedSender<ProgressEvent>, token: &CancellationToken) -> ProgressOutcome {
        trace!("Progress reporter started");
        let emit = |event| {
            let _ = events.send(event);
        };

        let mut outcome = ProgressOutcome::Elapsed;
        for step in 0..self.steps {
            if token.is_cancelled() {
                warn!("Progress reporter cancelled while scan was running");
                return ProgressOutcome::Cancelled;
            }
            if self.state.is_connected() {
                emit(ProgressEvent::Progress(100));
                outcome = ProgressOutcome::Connected;
                break;
            }
            emit(ProgressEvent::Progress(percent(step, self.steps)));
            if !sleep_cancellable(token, self.tick) {
                warn!("Progress reporter cancelled while scan was running");
                return ProgressOutcome::Cancelled;
            }
        }

        emit(ProgressEvent::Finished);
        outcome
    }

    /// Run [`Self::run`] on the blocking pool
    pub fn spawn(
        self,
        token: CancellationToken,
    ) -> Result<(WorkerHandle<ProgressOutcome>, UnboundedReceiver<ProgressEvent>), ProtocolError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = WorkerHandle::spawn("progress-reporter", token, move |token| {
            self.run(&tx, &token)
        })?;
        Ok((handle, rx))
    }
}
