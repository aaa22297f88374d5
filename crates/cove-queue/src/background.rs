use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;

/// Reports how much time the host still grants a background run.
pub trait RemainingTime: Send + 'static {
    fn remaining(&self) -> Duration;
}

impl<F> RemainingTime for F
where
    F: Fn() -> Duration + Send + 'static,
{
    fn remaining(&self) -> Duration {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundOutcome {
    /// The queue went idle within the budget.
    Drained,
    /// Remaining time dropped below the threshold with no dispatch in flight.
    TimeExceeded,
    /// The app returned to the foreground.
    Foregrounded,
    /// Another run replaced this one, or the manager shut down.
    Cancelled,
}

/// Resolves once the background run it belongs to is over.
#[derive(Debug)]
pub struct BackgroundCompletion {
    rx: oneshot::Receiver<BackgroundOutcome>,
}

impl BackgroundCompletion {
    pub async fn wait(self) -> BackgroundOutcome {
        self.rx.await.unwrap_or(BackgroundOutcome::Cancelled)
    }
}

pub(crate) struct BackgroundBudget {
    probe: Box<dyn RemainingTime>,
    notify: Option<oneshot::Sender<BackgroundOutcome>>,
}

impl BackgroundBudget {
    pub(crate) fn new(probe: impl RemainingTime) -> (Self, BackgroundCompletion) {
        let (tx, rx) = oneshot::channel();
        let budget = Self {
            probe: Box::new(probe),
            notify: Some(tx),
        };
        (budget, BackgroundCompletion { rx })
    }

    pub(crate) fn is_exhausted(&self, threshold: Duration) -> bool {
        self.probe.remaining() < threshold
    }

    pub(crate) fn time_until_exhausted(&self, threshold: Duration) -> Duration {
        self.probe.remaining().saturating_sub(threshold)
    }

    /// False once an outcome has been delivered.
    pub(crate) fn is_pending(&self) -> bool {
        self.notify.is_some()
    }

    /// Only the first outcome reaches the waiter.
    pub(crate) fn complete(&mut self, outcome: BackgroundOutcome) {
        if let Some(tx) = self.notify.take() {
            tracing::debug!(?outcome, "background run finished");
            let _ = tx.send(outcome);
        }
    }
}

impl fmt::Debug for BackgroundBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundBudget")
            .field("remaining", &self.probe.remaining())
            .field("pending", &self.notify.is_some())
            .finish()
    }
}
