//! Filesystem tree traversal and chunked copy, driven by one worker task.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::control::ControlRun;
use crate::report::ReportCopyCounters;
use crate::spec::{CopyOutcome, CopyRunError, SnapshotProgress, SpecCopyOptions};
use crate::util::SpecCopyPatterns;

#[derive(Debug, Clone)]
struct SpecDirEntry {
    path_dir_src_sub: PathBuf,
    name_dir: OsString,
}

#[derive(Debug, Clone)]
struct SpecFileEntry {
    path_file_src: PathBuf,
    name_file: OsString,
}

/// Immediate children of one source directory, split and sorted by name.
#[derive(Debug, Default)]
struct SpecDirListing {
    l_dirs: Vec<SpecDirEntry>,
    l_files: Vec<SpecFileEntry>,
    cnt_skipped: u64,
}

#[derive(Debug)]
enum EnumWalkFlow {
    /// Directory finished; descend into these next.
    Descend(Vec<SpecDirEntry>),
    Cancelled,
}

#[derive(Debug)]
enum EnumFileFlow {
    Done,
    Aborted,
}

/// Everything one run's worker owns.
#[derive(Debug)]
pub(crate) struct SpecCopyContext {
    pub(crate) path_dir_src: PathBuf,
    pub(crate) path_dir_dst: PathBuf,
    pub(crate) spec_cp_options: SpecCopyOptions,
    pub(crate) spec_cp_pats: SpecCopyPatterns,
    pub(crate) control: Arc<ControlRun>,
    pub(crate) counters: Arc<ReportCopyCounters>,
    pub(crate) tx_progress: broadcast::Sender<SnapshotProgress>,
}

/// Run the whole copy and fold the result into the terminal outcome.
///
/// 1. Optional pre-scan for the total file count.
/// 2. Depth-first traversal: a directory's files, then its subdirectories.
pub(crate) async fn run_copy(spec_cp_ctx: &SpecCopyContext) -> CopyOutcome {
    if spec_cp_ctx.spec_cp_options.if_scan_total {
        match scan_total_files(spec_cp_ctx).await {
            Ok(Some(n_total)) => {
                debug!(n_total, "Pre-scan finished");
                spec_cp_ctx.counters.set_total(n_total);
            }
            Ok(None) => return CopyOutcome::Cancelled,
            Err(e) => return CopyOutcome::Failed(e),
        }
    }

    match walk_tree(spec_cp_ctx).await {
        Ok(true) => CopyOutcome::Completed,
        Ok(false) => CopyOutcome::Cancelled,
        Err(e) => CopyOutcome::Failed(e),
    }
}

async fn list_directory(
    path_root: &Path,
    spec_cp_pats: &SpecCopyPatterns,
) -> Result<SpecDirListing, CopyRunError> {
    let mut listing = SpecDirListing::default();
    let mut iter_entries = fs::read_dir(path_root)
        .await
        .map_err(|e| CopyRunError::from_io(path_root, &e))?;

    while let Some(entry) = iter_entries
        .next_entry()
        .await
        .map_err(|e| CopyRunError::from_io(path_root, &e))?
    {
        let path_entry = entry.path();
        let name_entry = entry.file_name();
        let c_name = name_entry.to_string_lossy();
        let cfg_file_type = entry
            .file_type()
            .await
            .map_err(|e| CopyRunError::from_io(&path_entry, &e))?;

        if cfg_file_type.is_dir() {
            if spec_cp_pats.should_skip_dir(&c_name) {
                debug!(path = %path_entry.display(), "Directory filtered out");
                listing.cnt_skipped += 1;
                continue;
            }
            listing.l_dirs.push(SpecDirEntry {
                path_dir_src_sub: path_entry,
                name_dir: name_entry,
            });
        } else if cfg_file_type.is_file() {
            if spec_cp_pats.should_skip_file(&c_name) {
                debug!(path = %path_entry.display(), "File filtered out");
                listing.cnt_skipped += 1;
                continue;
            }
            listing.l_files.push(SpecFileEntry {
                path_file_src: path_entry,
                name_file: name_entry,
            });
        } else {
            warn!(path = %path_entry.display(), "Special file skipped");
            listing.cnt_skipped += 1;
        }
    }

    listing.l_dirs.sort_by(|a, b| a.name_dir.cmp(&b.name_dir));
    listing.l_files.sort_by(|a, b| a.name_file.cmp(&b.name_file));
    Ok(listing)
}

/// Count files the traversal will copy. `None` when cancelled mid-scan.
async fn scan_total_files(spec_cp_ctx: &SpecCopyContext) -> Result<Option<u64>, CopyRunError> {
    let mut n_total = 0_u64;
    let mut l_pending = vec![spec_cp_ctx.path_dir_src.clone()];
    while let Some(path_dir) = l_pending.pop() {
        if spec_cp_ctx.control.is_cancelled() {
            return Ok(None);
        }
        let listing = list_directory(&path_dir, &spec_cp_ctx.spec_cp_pats).await?;
        for _ in &listing.l_files {
            spec_cp_ctx.counters.add_scanned();
        }
        n_total += listing.l_files.len() as u64;
        l_pending.extend(listing.l_dirs.into_iter().map(|d| d.path_dir_src_sub));
    }
    Ok(Some(n_total))
}

/// Returns `Ok(true)` when the whole tree was visited, `Ok(false)` when a
/// cancellation stopped it.
async fn walk_tree(spec_cp_ctx: &SpecCopyContext) -> Result<bool, CopyRunError> {
    // Stack of (source, destination); children pushed in reverse so the
    // first sibling by name is visited first.
    let mut l_pending = vec![(
        spec_cp_ctx.path_dir_src.clone(),
        spec_cp_ctx.path_dir_dst.clone(),
    )];

    while let Some((path_dir_src, path_dir_dst)) = l_pending.pop() {
        if spec_cp_ctx.control.is_cancelled() {
            return Ok(false);
        }
        match copy_directory_files(&path_dir_src, &path_dir_dst, spec_cp_ctx).await? {
            EnumWalkFlow::Cancelled => return Ok(false),
            EnumWalkFlow::Descend(l_dirs) => {
                for spec_dir_entry in l_dirs.into_iter().rev() {
                    let path_dir_dst_sub = path_dir_dst.join(&spec_dir_entry.name_dir);
                    l_pending.push((spec_dir_entry.path_dir_src_sub, path_dir_dst_sub));
                }
            }
        }
    }
    Ok(true)
}

async fn ensure_directory(
    path_dir_dst: &Path,
    counters: &ReportCopyCounters,
) -> Result<(), CopyRunError> {
    match fs::metadata(path_dir_dst).await {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            return Err(CopyRunError::from_io(
                path_dir_dst,
                &io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "destination exists and is not a directory",
                ),
            ));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(CopyRunError::from_io(path_dir_dst, &e)),
    }

    fs::create_dir_all(path_dir_dst)
        .await
        .map_err(|e| CopyRunError::from_io(path_dir_dst, &e))?;
    counters.add_dir_created();
    debug!(path = %path_dir_dst.display(), "Destination directory created");
    Ok(())
}

async fn copy_directory_files(
    path_dir_src: &Path,
    path_dir_dst: &Path,
    spec_cp_ctx: &SpecCopyContext,
) -> Result<EnumWalkFlow, CopyRunError> {
    ensure_directory(path_dir_dst, &spec_cp_ctx.counters).await?;

    let listing = list_directory(path_dir_src, &spec_cp_ctx.spec_cp_pats).await?;
    for _ in 0..listing.cnt_skipped {
        spec_cp_ctx.counters.add_skipped();
    }
    debug!(
        path = %path_dir_src.display(),
        n_files = listing.l_files.len(),
        n_dirs = listing.l_dirs.len(),
        "Copying directory"
    );

    for spec_file_entry in listing.l_files {
        if !spec_cp_ctx.control.should_proceed().await {
            return Ok(EnumWalkFlow::Cancelled);
        }

        let path_file_dst = path_dir_dst.join(&spec_file_entry.name_file);
        match copy_file_chunked(&spec_file_entry.path_file_src, &path_file_dst, spec_cp_ctx)
            .await?
        {
            EnumFileFlow::Aborted => return Ok(EnumWalkFlow::Cancelled),
            EnumFileFlow::Done => emit_progress(spec_file_entry.path_file_src, spec_cp_ctx),
        }

        if spec_cp_ctx.control.is_cancelled() {
            return Ok(EnumWalkFlow::Cancelled);
        }
    }

    Ok(EnumWalkFlow::Descend(listing.l_dirs))
}

fn emit_progress(path_file_src: PathBuf, spec_cp_ctx: &SpecCopyContext) {
    let counters = &spec_cp_ctx.counters;
    let cnt_files_done = counters.add_copied();
    let snapshot = SnapshotProgress {
        cnt_files_done,
        cnt_files_total: counters.total_at_least(cnt_files_done),
        cnt_bytes_copied: counters.bytes(),
        path_file_current: path_file_src,
    };
    // No receivers is fine: progress is optional for the caller.
    let _ = spec_cp_ctx.tx_progress.send(snapshot);
}

/// Stream one file through a fixed-size buffer. The destination is created
/// or truncated; on failure or abort the partial destination is removed.
async fn copy_file_chunked(
    path_file_src: &Path,
    path_file_dst: &Path,
    spec_cp_ctx: &SpecCopyContext,
) -> Result<EnumFileFlow, CopyRunError> {
    let mut file_src = File::open(path_file_src)
        .await
        .map_err(|e| CopyRunError::from_io(path_file_src, &e))?;
    let mut file_dst = File::create(path_file_dst)
        .await
        .map_err(|e| CopyRunError::from_io(path_file_dst, &e))?;

    let res_transfer = transfer_chunks(
        &mut file_src,
        &mut file_dst,
        path_file_src,
        path_file_dst,
        spec_cp_ctx,
    )
    .await;
    drop(file_dst);

    match res_transfer {
        Ok(EnumFileFlow::Done) => {
            debug!(path = %path_file_dst.display(), "File copied");
            Ok(EnumFileFlow::Done)
        }
        Ok(EnumFileFlow::Aborted) => {
            debug!(path = %path_file_dst.display(), "Transfer aborted by cancellation");
            remove_partial_file(path_file_dst).await;
            Ok(EnumFileFlow::Aborted)
        }
        Err(e) => {
            remove_partial_file(path_file_dst).await;
            Err(e)
        }
    }
}

async fn transfer_chunks(
    file_src: &mut File,
    file_dst: &mut File,
    path_file_src: &Path,
    path_file_dst: &Path,
    spec_cp_ctx: &SpecCopyContext,
) -> Result<EnumFileFlow, CopyRunError> {
    let if_abort_in_flight = spec_cp_ctx.spec_cp_options.if_abort_in_flight;
    let mut buf_chunk = vec![0_u8; spec_cp_ctx.spec_cp_options.n_chunk_bytes];

    loop {
        if if_abort_in_flight && spec_cp_ctx.control.is_cancelled() {
            return Ok(EnumFileFlow::Aborted);
        }
        let n_read = file_src
            .read(&mut buf_chunk)
            .await
            .map_err(|e| CopyRunError::from_io(path_file_src, &e))?;
        if n_read == 0 {
            break;
        }
        file_dst
            .write_all(&buf_chunk[..n_read])
            .await
            .map_err(|e| CopyRunError::from_io(path_file_dst, &e))?;
        spec_cp_ctx.counters.add_bytes(n_read as u64);
    }

    // tokio defers the last write to a blocking task; flush waits for it.
    file_dst
        .flush()
        .await
        .map_err(|e| CopyRunError::from_io(path_file_dst, &e))?;
    Ok(EnumFileFlow::Done)
}

async fn remove_partial_file(path_file_dst: &Path) {
    if let Err(e) = fs::remove_file(path_file_dst).await
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %path_file_dst.display(), error = %e, "Failed to remove partial file");
    }
}
