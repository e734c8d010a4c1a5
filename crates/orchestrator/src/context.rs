//! Per-run context and operator abort.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use tenantflow_core::RunId;

/// Operator-side abort switch for the active run.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub(crate) fn new(tx: Arc<watch::Sender<bool>>) -> Self {
        Self { tx }
    }

    /// Stop dispatching and waiting; stages not yet started are skipped. The
    /// failure aggregator still runs on whatever results exist.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observer side of the abort switch.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
    // Keeps the channel open for signals that have no external handle.
    _tx: Option<Arc<watch::Sender<bool>>>,
}

impl AbortSignal {
    pub(crate) fn from_receiver(rx: watch::Receiver<bool>) -> Self {
        Self { rx, _tx: None }
    }

    /// A signal paired with a fresh handle.
    pub fn pair() -> (AbortHandle, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        let tx = Arc::new(tx);
        (
            AbortHandle::new(tx.clone()),
            AbortSignal {
                rx,
                _tx: Some(tx),
            },
        )
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self::pair().1
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once an abort is requested; never resolves otherwise.
    pub async fn aborted(&mut self) {
        if self.rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Immutable facts about the run in progress.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    /// Schedule tick this run belongs to; feeds idempotency tokens.
    pub run_ts: DateTime<Utc>,
    pub abort: AbortSignal,
}

impl RunContext {
    pub fn new(run_id: RunId, run_ts: DateTime<Utc>, abort: AbortSignal) -> Self {
        Self {
            run_id,
            run_ts,
            abort,
        }
    }
}
