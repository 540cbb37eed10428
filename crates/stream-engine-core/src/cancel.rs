use std::time::Duration;

use tokio::sync::watch;

/// Outcome of a suspension that lost its race against cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cancelled")]
pub struct Cancelled;

/// Creates a connected abort handle and cancellation token.
pub fn cancel_pair() -> (AbortHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx }, CancelToken { rx })
}

/// Handle used to request cancellation of a running session.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// Idempotent. Calling it after the session terminated has no effect.
    /// Dropping every clone of the handle has the same effect as aborting.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns a token observing this handle.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side of an [`AbortHandle`], raced against every suspension point.
#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// True once cancellation was requested or every `AbortHandle` was dropped.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once cancellation is requested.
    ///
    /// Dropping every `AbortHandle` counts as a request, so an abandoned
    /// session never outlives its owner.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleeps for `duration` unless cancellation fires first.
    ///
    /// A token that is already cancelled returns immediately, even for a zero
    /// duration.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
