//! Copy report models and the live counter block shared with the worker.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Aggregate counters for one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReportCopy {
    /// Regular files found by the pre-scan that matched filters.
    pub cnt_scanned: u64,
    /// Files fully copied.
    pub cnt_copied: u64,
    /// Bytes written to destination files, including the in-flight file.
    pub cnt_bytes: u64,
    /// Destination directories created by this run.
    pub cnt_dirs_created: u64,
    /// Entries skipped by filters or because they are not regular files/dirs.
    pub cnt_skipped: u64,
    /// Total file count, once known.
    pub cnt_files_total: Option<u64>,
}

impl ReportCopy {
    /// Machine-readable counters.
    pub fn to_dict(&self) -> BTreeMap<String, u64> {
        let mut dict_counts = BTreeMap::new();
        dict_counts.insert("cnt_scanned".to_string(), self.cnt_scanned);
        dict_counts.insert("cnt_copied".to_string(), self.cnt_copied);
        dict_counts.insert("cnt_bytes".to_string(), self.cnt_bytes);
        dict_counts.insert("cnt_dirs_created".to_string(), self.cnt_dirs_created);
        dict_counts.insert("cnt_skipped".to_string(), self.cnt_skipped);
        dict_counts
    }

    /// Human-readable one-line summary.
    pub fn format(&self, prefix: &str) -> String {
        let dict_counts = self.to_dict();
        let c_total = match self.cnt_files_total {
            Some(n) => n.to_string(),
            None => "?".to_string(),
        };
        format!(
            "{prefix} copied={}/{c_total} bytes={} dirs={} skipped={} scanned={}",
            dict_counts["cnt_copied"],
            dict_counts["cnt_bytes"],
            dict_counts["cnt_dirs_created"],
            dict_counts["cnt_skipped"],
            dict_counts["cnt_scanned"],
        )
    }
}

impl fmt::Display for ReportCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format("[COPY]"))
    }
}

/// Live counters written by the worker and read from the control plane.
///
/// Only the worker of the owning run mutates these; readers get a
/// point-in-time [`ReportCopy`] through [`ReportCopyCounters::snapshot`].
#[derive(Debug, Default)]
pub(crate) struct ReportCopyCounters {
    cnt_scanned: AtomicU64,
    cnt_copied: AtomicU64,
    cnt_bytes: AtomicU64,
    cnt_dirs_created: AtomicU64,
    cnt_skipped: AtomicU64,
    cnt_files_total: AtomicU64,
    if_total_known: AtomicBool,
}

impl ReportCopyCounters {
    pub(crate) fn add_scanned(&self) {
        self.cnt_scanned.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment copied count by one, returning the new value.
    pub(crate) fn add_copied(&self) -> u64 {
        self.cnt_copied.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Add `n` copied bytes, returning the new running total.
    pub(crate) fn add_bytes(&self, n: u64) -> u64 {
        self.cnt_bytes.fetch_add(n, Ordering::AcqRel) + n
    }

    pub(crate) fn add_dir_created(&self) {
        self.cnt_dirs_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_skipped(&self) {
        self.cnt_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.cnt_bytes.load(Ordering::Acquire)
    }

    pub(crate) fn set_total(&self, n_total: u64) {
        self.cnt_files_total.store(n_total, Ordering::Release);
        self.if_total_known.store(true, Ordering::Release);
    }

    /// Current total, raised to `n_done` when the tree grew during the run.
    pub(crate) fn total_at_least(&self, n_done: u64) -> Option<u64> {
        if !self.if_total_known.load(Ordering::Acquire) {
            return None;
        }
        let n_total = self.cnt_files_total.load(Ordering::Acquire);
        if n_done > n_total {
            self.cnt_files_total.store(n_done, Ordering::Release);
            return Some(n_done);
        }
        Some(n_total)
    }

    pub(crate) fn snapshot(&self) -> ReportCopy {
        let cnt_files_total = self
            .if_total_known
            .load(Ordering::Acquire)
            .then(|| self.cnt_files_total.load(Ordering::Acquire));
        ReportCopy {
            cnt_scanned: self.cnt_scanned.load(Ordering::Acquire),
            cnt_copied: self.cnt_copied.load(Ordering::Acquire),
            cnt_bytes: self.cnt_bytes.load(Ordering::Acquire),
            cnt_dirs_created: self.cnt_dirs_created.load(Ordering::Acquire),
            cnt_skipped: self.cnt_skipped.load(Ordering::Acquire),
            cnt_files_total,
        }
    }
}
