//! Protocol timer service
//!
//! A single-slot delayed-work primitive. Arming replaces whatever deadline
//! was outstanding, so there is never more than one. Each arm carries a
//! [`TimerId`]; the owner compares the id of a fire against the one it holds
//! and ignores anything else.
//!
//! Two implementations are provided: [`ManualTimer`], driven by a simulated
//! [`ManualClock`], and [`TokioTimer`], which posts expiries to a channel.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Identifies one armed deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Delayed-work primitive used for the protocol timeout
pub trait ProtocolTimer: Send {
    /// Schedule `id` to expire after `after`, replacing any outstanding deadline
    fn arm(&mut self, id: TimerId, after: Duration);

    /// Cancel the deadline for `id` if it is still outstanding
    fn cancel(&mut self, id: TimerId);
}

#[derive(Debug, Default)]
struct ClockState {
    now: Duration,
    pending: Option<(TimerId, Duration)>,
}

/// Simulated clock shared between a [`ManualTimer`] and whoever drives time
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ClockState>>,
}

impl ManualClock {
    /// Create a clock at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a timer scheduling on this clock
    pub fn timer(&self) -> ManualTimer {
        ManualTimer {
            clock: self.clone(),
        }
    }

    /// Current simulated time since the clock was created
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of outstanding deadlines (0 or 1)
    pub fn outstanding(&self) -> usize {
        usize::from(self.state.lock().pending.is_some())
    }

    /// Deadline of the outstanding timer, if any
    pub fn deadline(&self) -> Option<Duration> {
        self.state.lock().pending.map(|(_, deadline)| deadline)
    }

    /// Move time forward, returning the timer that expired on the way
    pub fn advance(&self, by: Duration) -> Option<TimerId> {
        let mut state = self.state.lock();
        state.now = state.now.saturating_add(by);
        match state.pending {
            Some((id, deadline)) if deadline <= state.now => {
                state.pending = None;
                trace!("Timer {} expired at {:?}", id, state.now);
                Some(id)
            }
            _ => None,
        }
    }
}

/// Timer scheduling on a [`ManualClock`]
#[derive(Debug, Clone)]
pub struct ManualTimer {
    clock: ManualClock,
}

impl ManualTimer {
    /// Create a timer with its own clock
    pub fn new() -> Self {
        ManualClock::new().timer()
    }

    /// Clock driving this timer
    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }
}

impl Default for ManualTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolTimer for ManualTimer {
    fn arm(&mut self, id: TimerId, after: Duration) {
        let mut state = self.clock.state.lock();
        let deadline = state.now.saturating_add(after);
        state.pending = Some((id, deadline));
    }

    fn cancel(&mut self, id: TimerId) {
        let mut state = self.clock.state.lock();
        if matches!(state.pending, Some((pending, _)) if pending == id) {
            state.pending = None;
        }
    }
}

/// Timer backed by a tokio sleeper task.
///
/// Expired ids are posted on the channel given at construction. Must be
/// armed from within a tokio runtime.
pub struct TokioTimer {
    expired_tx: mpsc::UnboundedSender<TimerId>,
    task: Option<(TimerId, JoinHandle<()>)>,
}

impl TokioTimer {
    /// Create a timer posting expiries to `expired_tx`
    pub fn new(expired_tx: mpsc::UnboundedSender<TimerId>) -> Self {
        Self {
            expired_tx,
            task: None,
        }
    }

    /// Create a timer together with the receiving end of its expiry channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TimerId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Whether a sleeper task is outstanding
    pub fn is_armed(&self) -> bool {
        self.task
            .as_ref()
            .map(|(_, task)| !task.is_finished())
            .unwrap_or(false)
    }
}

impl ProtocolTimer for TokioTimer {
    fn arm(&mut self, id: TimerId, after: Duration) {
        if let Some((_, task)) = self.task.take() {
            task.abort();
        }
        let tx = self.expired_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(id);
        });
        self.task = Some((id, task));
    }

    fn cancel(&mut self, id: TimerId) {
        if matches!(self.task, Some((armed, _)) if armed == id) {
            if let Some((_, task)) = self.task.take() {
                task.abort();
            }
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        if let Some((_, task)) = self.task.take() {
            task.abort();
        }
    }
}
