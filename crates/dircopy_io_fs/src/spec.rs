//! Copy specification models, run results and top-level error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

////////////////////////////////////////////////////////////////////////////////
// #region EnumsInit

/// Pattern matching mode for include/exclude lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumCopyPatternMode {
    /// Shell-like wildcards (`*`, `?`, character classes).
    Glob,
    /// Regular expression pattern.
    Regex,
    /// Substring match.
    Literal,
}

/// Terminal result of one run. Produced exactly once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Traversal finished without a cancellation request being honored.
    Completed,
    /// A cancellation request was observed at a checkpoint and honored.
    Cancelled,
    /// An unrecoverable I/O error stopped the run.
    Failed(CopyRunError),
}

impl CopyOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Failure text for `Failed`, `None` otherwise.
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Failed(e) => Some(e.to_string()),
            Self::Completed | Self::Cancelled => None,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region StructsAndErrors

/// Default transfer chunk size in bytes.
pub const N_CHUNK_BYTES_DEFAULT: usize = 4096;
/// Default number of progress snapshots a subscriber may fall behind by.
pub const N_PROGRESS_BUFFER_DEFAULT: usize = 1024;
/// Largest accepted transfer chunk (64 MiB).
pub const N_CHUNK_BYTES_MAX: usize = 64 << 20;
/// Largest accepted progress channel capacity.
pub const N_PROGRESS_BUFFER_MAX: usize = 1 << 16;

/// Input options for [`crate::CopyEngine`].
#[derive(Debug, Clone)]
pub struct SpecCopyOptions {
    /// Include patterns applied to file basename.
    pub patterns_include_files: Option<Vec<String>>,
    /// Exclude patterns applied to file basename.
    pub patterns_exclude_files: Option<Vec<String>>,
    /// Include patterns applied to directory basename.
    pub patterns_include_dirs: Option<Vec<String>>,
    /// Exclude patterns applied to directory basename.
    pub patterns_exclude_dirs: Option<Vec<String>>,
    /// Pattern interpretation mode.
    pub rule_pattern: EnumCopyPatternMode,
    /// Bytes moved per read/write step, in `1..=N_CHUNK_BYTES_MAX`.
    pub n_chunk_bytes: usize,
    /// Capacity of the per-run progress channel, in `1..=N_PROGRESS_BUFFER_MAX`.
    pub n_progress_buffer: usize,
    /// Count matching files before copying so snapshots carry a total.
    pub if_scan_total: bool,
    /// Engage the pause gate before the first file checkpoint.
    pub if_start_paused: bool,
    /// Also honor cancellation between chunks, removing the partial file.
    pub if_abort_in_flight: bool,
}

impl Default for SpecCopyOptions {
    fn default() -> Self {
        Self {
            patterns_include_files: None,
            patterns_exclude_files: None,
            patterns_include_dirs: None,
            patterns_exclude_dirs: None,
            rule_pattern: EnumCopyPatternMode::Glob,
            n_chunk_bytes: N_CHUNK_BYTES_DEFAULT,
            n_progress_buffer: N_PROGRESS_BUFFER_DEFAULT,
            if_scan_total: true,
            if_start_paused: false,
            if_abort_in_flight: false,
        }
    }
}

/// One progress notification, emitted after each completed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotProgress {
    /// Files fully copied so far in this run.
    pub cnt_files_done: u64,
    /// Files expected in this run, `None` until known (or when scanning is off).
    pub cnt_files_total: Option<u64>,
    /// Bytes copied so far in this run.
    pub cnt_bytes_copied: u64,
    /// Source path of the file that just completed.
    pub path_file_current: PathBuf,
}

impl SnapshotProgress {
    /// Completed share in `[0, 1]`, if the total is known and non-zero.
    pub fn fraction(&self) -> Option<f64> {
        match self.cnt_files_total {
            Some(0) | None => None,
            Some(n_total) => Some((self.cnt_files_done as f64 / n_total as f64).min(1.0)),
        }
    }
}

/// "Start call failed" errors (input validation / setup stage).
///
/// None of these ever reach the asynchronous run; no filesystem entry is
/// created when one is returned.
#[derive(Debug, Error)]
pub enum CopyStartError {
    /// Empty source or destination path.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Source path is missing or not a directory.
    #[error("Source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    /// Another run of the same engine is still active.
    #[error("A copy run is already active on this engine")]
    AlreadyRunning,
    /// Source and destination overlap (`src` contains `dst` or vice versa).
    #[error(
        "Source and destination directories overlap: {} <-> {}",
        path_dir_src.display(),
        path_dir_dst.display()
    )]
    SourceDestinationOverlap {
        /// Normalized source directory.
        path_dir_src: PathBuf,
        /// Normalized destination directory.
        path_dir_dst: PathBuf,
    },
    /// Invalid include/exclude pattern.
    #[error("{0}")]
    InvalidPattern(String),
    /// Option value out of range.
    #[error("{0}")]
    InvalidOptions(String),
    /// `start` was called outside a tokio runtime.
    #[error("No tokio runtime available to drive the copy")]
    RuntimeUnavailable,
}

/// Mid-run failure carried by [`CopyOutcome::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CopyRunError {
    /// Creating a directory, listing, opening or transferring failed.
    #[error("I/O error at {}: {message}", path.display())]
    Io {
        /// Path the failing operation was applied to.
        path: PathBuf,
        /// Kind of the underlying error.
        kind: io::ErrorKind,
        /// Underlying error text.
        message: String,
    },
    /// The worker task ended without publishing an outcome.
    #[error("Copy worker terminated unexpectedly: {0}")]
    WorkerLost(String),
}

impl CopyRunError {
    pub(crate) fn from_io(path: impl Into<PathBuf>, e: &io::Error) -> Self {
        Self::Io {
            path: path.into(),
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
