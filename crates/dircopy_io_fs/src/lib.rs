//! `dircopy_io_fs` v1:
//! Cancellable, pausable, progress-reporting directory copy engine.
//!
//! Modules:
//! - `engine`  : run lifecycle, control handle, progress streams
//! - `copy`    : traversal and chunked transfer (worker side)
//! - `control` : per-run cancellation token and pause gate
//! - `spec`    : options, outcome, snapshot and error types
//! - `report`  : run-time report model
//! - `util`    : filters, validation and path helpers
//!
//! ```no_run
//! use dircopy_io_fs::{CopyEngine, CopyOutcome};
//! use futures::StreamExt;
//!
//! # async fn demo() -> Result<(), dircopy_io_fs::CopyStartError> {
//! let engine = CopyEngine::new();
//! let handle = engine.start("/data/src", "/backup/dst")?;
//! let mut progress = handle.subscribe();
//! while let Some(snapshot) = progress.next().await {
//!     println!("{}/{:?}", snapshot.cnt_files_done, snapshot.cnt_files_total);
//! }
//! assert!(matches!(handle.outcome().await, CopyOutcome::Completed));
//! # Ok(())
//! # }
//! ```

mod control;
mod copy;
pub mod engine;
pub mod report;
pub mod spec;
mod util;

pub use engine::{CopyEngine, CopyHandle, StreamProgress};
pub use report::ReportCopy;
pub use spec::{
    CopyOutcome, CopyRunError, CopyStartError, EnumCopyPatternMode, N_CHUNK_BYTES_DEFAULT,
    N_CHUNK_BYTES_MAX, N_PROGRESS_BUFFER_DEFAULT, N_PROGRESS_BUFFER_MAX, SnapshotProgress,
    SpecCopyOptions,
};
