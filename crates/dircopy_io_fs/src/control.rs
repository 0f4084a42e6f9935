//! Per-run cancellation token and pause gate.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Control-plane state of a single run.
///
/// Written from the caller context (`pause`/`resume`/`cancel`), read by the
/// worker at checkpoints. A fresh instance is built for every run.
#[derive(Debug)]
pub(crate) struct ControlRun {
    token_cancel: CancellationToken,
    tx_paused: watch::Sender<bool>,
}

impl ControlRun {
    pub(crate) fn new(if_start_paused: bool) -> Self {
        let (tx_paused, _) = watch::channel(if_start_paused);
        Self {
            token_cancel: CancellationToken::new(),
            tx_paused,
        }
    }

    pub(crate) fn cancel(&self) {
        self.token_cancel.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token_cancel.is_cancelled()
    }

    pub(crate) fn pause(&self) {
        self.tx_paused.send_replace(true);
    }

    pub(crate) fn resume(&self) {
        self.tx_paused.send_replace(false);
    }

    pub(crate) fn is_paused(&self) -> bool {
        *self.tx_paused.borrow()
    }

    /// File-boundary checkpoint.
    ///
    /// Blocks while the gate is engaged; the wait ends on resume OR cancel.
    /// Returns `false` when the run must stop.
    pub(crate) async fn should_proceed(&self) -> bool {
        if self.token_cancel.is_cancelled() {
            return false;
        }

        let mut rx_paused = self.tx_paused.subscribe();
        let mut if_waited = false;
        loop {
            let b_paused = *rx_paused.borrow_and_update();
            if !b_paused {
                break;
            }
            if !if_waited {
                debug!("Pause gate engaged, waiting for resume or cancel");
                if_waited = true;
            }
            tokio::select! {
                biased;
                _ = self.token_cancel.cancelled() => return false,
                res = rx_paused.changed() => {
                    if res.is_err() {
                        return false;
                    }
                }
            }
        }
        if if_waited {
            debug!("Pause gate released");
        }

        !self.token_cancel.is_cancelled()
    }
}
