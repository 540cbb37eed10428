//! One-shot, re-armable suspension point for pause-for-input.
//!
//! A pause resolves exactly once: by [`PauseGate::submit`], by its deadline, or
//! by cancellation. The winner is picked by a compare-and-set on the
//! [`CompletionSlot`]; losers become no-ops. A submission never beats a
//! cancellation that was already requested or a deadline that already passed,
//! even if the waiting task has not observed them yet.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::event::{FieldSpec, InputValues};

/// Non-input outcome of a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PauseOutcome {
    #[error("pause deadline expired")]
    DeadlineExpired,
    #[error("pause cancelled")]
    Cancelled,
}

type Resolution = Result<InputValues, PauseOutcome>;

/// Write-once holder for the winner of a pause race.
pub struct CompletionSlot {
    resolved: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<Resolution>>>,
}

impl CompletionSlot {
    fn new() -> (Arc<Self>, oneshot::Receiver<Resolution>) {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Self {
            resolved: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
        });
        (slot, rx)
    }

    /// Claims the slot. Only the first caller ever gets `true`.
    fn claim(&self) -> bool {
        self.resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claims the slot and delivers `resolution` to the awaiting side.
    fn resolve(&self, resolution: Resolution) -> bool {
        if !self.claim() {
            return false;
        }
        if let Some(tx) = lock(&self.tx).take() {
            let _ = tx.send(resolution);
        }
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }
}

/// Snapshot of the pause currently awaiting input.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInput {
    pub message: String,
    pub fields: Vec<FieldSpec>,
    /// Absolute deadline; `None` waits indefinitely.
    pub deadline: Option<Instant>,
}

impl PendingInput {
    pub fn new(message: impl Into<String>, fields: Vec<FieldSpec>, deadline: Option<Instant>) -> Self {
        Self {
            message: message.into(),
            fields,
            deadline,
        }
    }
}

struct Armed {
    id: u64,
    pending: PendingInput,
    slot: Arc<CompletionSlot>,
    cancel: CancelToken,
}

impl Armed {
    /// Outcome that already owns this pause, before any task observes it.
    fn preempted(&self) -> Option<PauseOutcome> {
        if self.cancel.is_cancelled() {
            Some(PauseOutcome::Cancelled)
        } else if self.pending.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(PauseOutcome::DeadlineExpired)
        } else {
            None
        }
    }
}

/// Synchronization point between the session driver and whoever supplies input.
#[derive(Default)]
pub struct PauseGate {
    current: Mutex<Option<Armed>>,
    next_id: AtomicU64,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspends until input is submitted, the deadline elapses, or `cancel` fires.
    ///
    /// Exactly one of the three outcomes is returned. Dropping the future
    /// disarms the gate.
    pub async fn wait_for_input(
        &self,
        pending: PendingInput,
        cancel: &CancelToken,
    ) -> Result<InputValues, PauseOutcome> {
        let deadline = pending.deadline;
        let (id, slot, mut rx) = self.arm(pending, cancel.clone());
        let _disarm = Disarm { gate: self, id };

        if cancel.is_cancelled() && slot.resolve(Err(PauseOutcome::Cancelled)) {
            return Err(PauseOutcome::Cancelled);
        }

        let early = tokio::select! {
            biased;
            _ = cancel.cancelled() => PauseOutcome::Cancelled,
            received = &mut rx => return flatten(received),
            _ = sleep_until_opt(deadline) => PauseOutcome::DeadlineExpired,
        };

        if slot.resolve(Err(early)) {
            debug!(pause_id = id, outcome = ?early, "pause resolved without input");
            return Err(early);
        }
        // Another party claimed the slot first; its resolution is already in flight.
        flatten(rx.await)
    }

    /// Delivers `values` to the pause currently awaiting input.
    ///
    /// Returns `false` (and does nothing) when no pause is pending, the
    /// pending one was already resolved, or it was preempted by cancellation
    /// or its deadline. A preempted pause is resolved here with that outcome.
    pub fn submit(&self, values: InputValues) -> bool {
        let (slot, preempted) = match lock(&self.current).as_ref() {
            Some(armed) => (armed.slot.clone(), armed.preempted()),
            None => {
                debug!("submission ignored: no pause pending");
                return false;
            }
        };
        if let Some(outcome) = preempted {
            slot.resolve(Err(outcome));
            debug!(?outcome, "submission ignored: pause already preempted");
            return false;
        }
        let accepted = slot.resolve(Ok(values));
        if !accepted {
            debug!("submission ignored: pause already resolved");
        }
        accepted
    }

    /// The pause awaiting input, if any.
    pub fn pending(&self) -> Option<PendingInput> {
        lock(&self.current)
            .as_ref()
            .filter(|armed| !armed.slot.is_resolved() && armed.preempted().is_none())
            .map(|armed| armed.pending.clone())
    }

    pub fn is_armed(&self) -> bool {
        self.pending().is_some()
    }

    fn arm(
        &self,
        pending: PendingInput,
        cancel: CancelToken,
    ) -> (u64, Arc<CompletionSlot>, oneshot::Receiver<Resolution>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (slot, rx) = CompletionSlot::new();
        let previous = lock(&self.current).replace(Armed {
            id,
            pending,
            slot: slot.clone(),
            cancel,
        });
        if let Some(previous) = previous
            && previous.slot.resolve(Err(PauseOutcome::Cancelled))
        {
            warn!(pause_id = previous.id, "superseded an unresolved pause");
        }
        (id, slot, rx)
    }

    fn disarm(&self, id: u64) {
        let mut current = lock(&self.current);
        if current.as_ref().is_some_and(|armed| armed.id == id) {
            if let Some(armed) = current.take() {
                armed.slot.resolve(Err(PauseOutcome::Cancelled));
            }
        }
    }
}

struct Disarm<'a> {
    gate: &'a PauseGate,
    id: u64,
}

impl Drop for Disarm<'_> {
    fn drop(&mut self) {
        self.gate.disarm(self.id);
    }
}

fn flatten(received: Result<Resolution, oneshot::error::RecvError>) -> Resolution {
    received.unwrap_or(Err(PauseOutcome::Cancelled))
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
