//! Run lifecycle: `CopyEngine::start`, the control handle and progress streams.

use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};

use futures::{Stream, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::control::ControlRun;
use crate::copy::{SpecCopyContext, run_copy};
use crate::report::{ReportCopy, ReportCopyCounters};
use crate::spec::{CopyOutcome, CopyRunError, CopyStartError, SnapshotProgress, SpecCopyOptions};
use crate::util::{SpecCopyPatterns, validate_options, validate_paths};

type SlotProgressSender = Arc<Mutex<Option<broadcast::Sender<SnapshotProgress>>>>;

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owned by the worker. On drop, including unwind after a panic, the shared
/// progress sender is released so every stream ends, then the engine's
/// "run active" flag is cleared.
struct GuardRunActive {
    if_running: Arc<AtomicBool>,
    slot_tx_progress: SlotProgressSender,
}

impl Drop for GuardRunActive {
    fn drop(&mut self) {
        lock_ignoring_poison(&self.slot_tx_progress).take();
        self.if_running.store(false, Ordering::Release);
    }
}

/// Directory copy engine. At most one run is active per engine; clones share
/// that restriction.
#[derive(Debug, Clone, Default)]
pub struct CopyEngine {
    spec_cp_options: SpecCopyOptions,
    if_running: Arc<AtomicBool>,
}

impl CopyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(spec_cp_options: SpecCopyOptions) -> Self {
        Self {
            spec_cp_options,
            if_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn options(&self) -> &SpecCopyOptions {
        &self.spec_cp_options
    }

    /// Whether a run started by this engine has not reached its outcome yet.
    pub fn is_running(&self) -> bool {
        self.if_running.load(Ordering::Acquire)
    }

    /// Copy the tree under `dir_source` into `dir_destination`.
    ///
    /// Validates inputs synchronously and returns immediately; the copy runs
    /// on a background tokio task. Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// - [`CopyStartError::InvalidInput`] for an empty path,
    /// - [`CopyStartError::SourceNotFound`] when the source is not a directory,
    /// - [`CopyStartError::AlreadyRunning`] while a previous run is active,
    /// - option, pattern, overlap and runtime errors, see [`CopyStartError`].
    pub fn start<P, Q>(
        &self,
        dir_source: P,
        dir_destination: Q,
    ) -> Result<CopyHandle, CopyStartError>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let path_dir_src = dir_source.as_ref().to_path_buf();
        let path_dir_dst = dir_destination.as_ref().to_path_buf();

        validate_options(&self.spec_cp_options)?;
        let spec_cp_pats = SpecCopyPatterns::from_options(&self.spec_cp_options)?;
        validate_paths(&path_dir_src, &path_dir_dst)?;
        let handle_rt = Handle::try_current().map_err(|_| CopyStartError::RuntimeUnavailable)?;

        let (tx_progress, rx_progress_first) =
            broadcast::channel(self.spec_cp_options.n_progress_buffer);
        let slot_tx_progress: SlotProgressSender = Arc::new(Mutex::new(Some(tx_progress.clone())));

        if self
            .if_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CopyStartError::AlreadyRunning);
        }
        let guard_active = GuardRunActive {
            if_running: Arc::clone(&self.if_running),
            slot_tx_progress: Arc::clone(&slot_tx_progress),
        };

        let id_run = Uuid::new_v4();
        let control = Arc::new(ControlRun::new(self.spec_cp_options.if_start_paused));
        let counters = Arc::new(ReportCopyCounters::default());
        let (tx_outcome, rx_outcome) = watch::channel(None);

        let spec_cp_ctx = SpecCopyContext {
            path_dir_src: path_dir_src.clone(),
            path_dir_dst: path_dir_dst.clone(),
            spec_cp_options: self.spec_cp_options.clone(),
            spec_cp_pats,
            control: Arc::clone(&control),
            counters: Arc::clone(&counters),
            tx_progress,
        };

        let span = info_span!("copy_run", run_id = %id_run);
        let counters_worker = Arc::clone(&counters);
        handle_rt.spawn(
            async move {
                info!(
                    src = %spec_cp_ctx.path_dir_src.display(),
                    dst = %spec_cp_ctx.path_dir_dst.display(),
                    "Copy run started"
                );
                let outcome = run_copy(&spec_cp_ctx).await;

                // Close every progress stream before the outcome is visible.
                drop(spec_cp_ctx);
                drop(guard_active);

                let report = counters_worker.snapshot();
                match &outcome {
                    CopyOutcome::Completed => info!(%report, "Copy run completed"),
                    CopyOutcome::Cancelled => info!(%report, "Copy run cancelled"),
                    CopyOutcome::Failed(e) => warn!(%report, error = %e, "Copy run failed"),
                }
                tx_outcome.send_replace(Some(outcome));
            }
            .instrument(span),
        );

        Ok(CopyHandle {
            shared: Arc::new(RunShared {
                id_run,
                path_dir_src,
                path_dir_dst,
                control,
                counters,
                slot_tx_progress,
                rx_progress_first: Mutex::new(Some(rx_progress_first)),
                rx_outcome,
            }),
        })
    }
}

struct RunShared {
    id_run: Uuid,
    path_dir_src: PathBuf,
    path_dir_dst: PathBuf,
    control: Arc<ControlRun>,
    counters: Arc<ReportCopyCounters>,
    slot_tx_progress: SlotProgressSender,
    /// Registered before the worker was spawned, so it misses nothing.
    rx_progress_first: Mutex<Option<broadcast::Receiver<SnapshotProgress>>>,
    rx_outcome: watch::Receiver<Option<CopyOutcome>>,
}

/// Control handle of one run. Cheap to clone; all clones address the same run.
#[derive(Clone)]
pub struct CopyHandle {
    shared: Arc<RunShared>,
}

impl fmt::Debug for CopyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyHandle")
            .field("id_run", &self.shared.id_run)
            .field("path_dir_src", &self.shared.path_dir_src)
            .field("path_dir_dst", &self.shared.path_dir_dst)
            .field("is_finished", &self.is_finished())
            .finish()
    }
}

impl CopyHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id_run
    }

    pub fn source(&self) -> &Path {
        &self.shared.path_dir_src
    }

    pub fn destination(&self) -> &Path {
        &self.shared.path_dir_dst
    }

    /// Request cooperative cancellation. Idempotent; a no-op once the run
    /// has an outcome.
    pub fn cancel(&self) {
        if !self.shared.control.is_cancelled() && !self.is_finished() {
            info!(run_id = %self.shared.id_run, "Cancellation requested");
        }
        self.shared.control.cancel();
    }

    /// Same as [`CopyHandle::cancel`].
    pub fn stop(&self) {
        self.cancel();
    }

    /// Block the run at its next file checkpoint.
    pub fn pause(&self) {
        self.shared.control.pause();
    }

    pub fn resume(&self) {
        self.shared.control.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.control.is_paused()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.shared.control.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.rx_outcome.borrow().is_some()
    }

    /// Point-in-time counters of this run.
    pub fn report(&self) -> ReportCopy {
        self.shared.counters.snapshot()
    }

    /// Progress notifications of this run.
    ///
    /// The first call returns a stream that observes every snapshot of the
    /// run; later calls observe snapshots emitted after they subscribe. Every
    /// stream ends when the run reaches its outcome.
    pub fn subscribe(&self) -> StreamProgress {
        if let Some(rx_first) = lock_ignoring_poison(&self.shared.rx_progress_first).take() {
            return StreamProgress::from_receiver(rx_first);
        }
        match lock_ignoring_poison(&self.shared.slot_tx_progress).as_ref() {
            Some(tx_progress) => StreamProgress::from_receiver(tx_progress.subscribe()),
            None => StreamProgress::finished(),
        }
    }

    /// Outcome if the run already ended.
    pub fn try_outcome(&self) -> Option<CopyOutcome> {
        self.shared.rx_outcome.borrow().clone()
    }

    /// Wait for the terminal outcome. May be awaited any number of times.
    pub async fn outcome(&self) -> CopyOutcome {
        let mut rx_outcome = self.shared.rx_outcome.clone();
        loop {
            let outcome_current = rx_outcome.borrow_and_update().clone();
            if let Some(outcome) = outcome_current {
                return outcome;
            }
            if rx_outcome.changed().await.is_err() {
                let outcome_last = rx_outcome.borrow().clone();
                return outcome_last.unwrap_or_else(|| {
                    CopyOutcome::Failed(CopyRunError::WorkerLost(
                        "outcome channel closed without a result".to_string(),
                    ))
                });
            }
        }
    }
}

/// Push-based sequence of [`SnapshotProgress`] for one run.
///
/// A subscriber that falls more than the configured buffer behind skips the
/// oldest snapshots instead of stalling the copy. Skipped snapshots are
/// logged at `warn` and counted in [`StreamProgress::cnt_missed`]; the ones
/// delivered stay in completion order.
pub struct StreamProgress {
    inner: Option<BroadcastStream<SnapshotProgress>>,
    cnt_missed: u64,
}

impl StreamProgress {
    fn from_receiver(rx_progress: broadcast::Receiver<SnapshotProgress>) -> Self {
        Self {
            inner: Some(BroadcastStream::new(rx_progress)),
            cnt_missed: 0,
        }
    }

    fn finished() -> Self {
        Self {
            inner: None,
            cnt_missed: 0,
        }
    }

    /// Snapshots this stream skipped because it lagged behind the run.
    pub fn cnt_missed(&self) -> u64 {
        self.cnt_missed
    }
}

impl fmt::Debug for StreamProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamProgress")
            .field("is_terminated", &self.inner.is_none())
            .field("cnt_missed", &self.cnt_missed)
            .finish()
    }
}

impl Stream for StreamProgress {
    type Item = SnapshotProgress;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };
            match ready!(inner.poll_next_unpin(cx)) {
                Some(Ok(snapshot)) => return Poll::Ready(Some(snapshot)),
                Some(Err(BroadcastStreamRecvError::Lagged(n_skipped))) => {
                    this.cnt_missed += n_skipped;
                    warn!(n_skipped, "Progress subscriber lagged behind");
                }
                None => {
                    this.inner = None;
                    return Poll::Ready(None);
                }
            }
        }
    }
}
