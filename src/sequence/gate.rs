use crate::core::{CounterError, Result};
use tokio::sync::watch;

/// Lifecycle of a binding's counter record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyState {
    Uninitialized,
    Initializing,
    Ready,
    Failed(String),
}

impl ReadyState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed(_))
    }
}

/// One-shot readiness notification.
///
/// Resolves exactly once, to `Ready` or `Failed`; every waiter, early or
/// late, observes the same outcome.
#[derive(Debug)]
pub struct ReadyGate {
    tx: watch::Sender<ReadyState>,
}

impl ReadyGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ReadyState::Uninitialized);
        Self { tx }
    }

    pub fn state(&self) -> ReadyState {
        self.tx.borrow().clone()
    }

    /// Uninitialized -> Initializing. Returns false if already started.
    pub fn begin(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == ReadyState::Uninitialized {
                *state = ReadyState::Initializing;
                true
            } else {
                false
            }
        })
    }

    pub fn open(&self) -> bool {
        self.resolve(ReadyState::Ready)
    }

    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.resolve(ReadyState::Failed(reason.into()))
    }

    fn resolve(&self, outcome: ReadyState) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = outcome;
                true
            }
        })
    }

    /// Suspend until the gate resolves.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        let outcome = rx
            .wait_for(ReadyState::is_terminal)
            .await
            .map_err(|_| CounterError::Initialization("readiness channel closed".to_string()))?
            .clone();

        match outcome {
            ReadyState::Failed(reason) => Err(CounterError::Initialization(reason)),
            _ => Ok(()),
        }
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}
