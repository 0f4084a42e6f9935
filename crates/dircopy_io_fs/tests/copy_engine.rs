use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dircopy_io_fs::{
    CopyEngine, CopyOutcome, CopyStartError, SnapshotProgress, SpecCopyOptions, StreamProgress,
};
use futures::StreamExt;
use tempfile::TempDir;

const N_TIMEOUT: Duration = Duration::from_secs(30);

fn write_bytes(path: &Path, raw: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(path, raw).expect("write bytes");
}

/// Relative path -> `None` for directories, file bytes otherwise.
fn collect_tree(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Option<Vec<u8>>>) {
        for entry in std::fs::read_dir(dir).expect("read dir") {
            let path = entry.expect("entry").path();
            let rel = path.strip_prefix(root).expect("relative").to_path_buf();
            if path.is_dir() {
                out.insert(rel, None);
                walk(root, &path, out);
            } else {
                out.insert(rel, Some(std::fs::read(&path).expect("read file")));
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

fn build_sample_tree(src: &Path) {
    write_bytes(&src.join("root.txt"), b"root");
    write_bytes(&src.join("a/one.txt"), b"one");
    write_bytes(&src.join("a/two.bin"), &[0_u8, 1, 2, 255, 254]);
    write_bytes(&src.join("b/c/deep.txt"), b"deep");
    write_bytes(
        &src.join("b/large.bin"),
        &(0..50_000_u32).map(|n| (n % 253) as u8).collect::<Vec<_>>(),
    );
    std::fs::create_dir_all(src.join("empty/nested")).expect("empty dirs");
}

async fn collect_progress(mut stream: StreamProgress) -> Vec<SnapshotProgress> {
    let mut l_snapshots = Vec::new();
    while let Some(snapshot) = tokio::time::timeout(N_TIMEOUT, stream.next())
        .await
        .expect("progress stream stalled")
    {
        l_snapshots.push(snapshot);
    }
    l_snapshots
}

fn setup() -> (TempDir, PathBuf, PathBuf) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    std::fs::create_dir_all(&src).expect("mkdir src");
    (tmp, src, dst)
}

#[tokio::test]
async fn copy_into_empty_destination_mirrors_tree() {
    let (_tmp, src, dst) = setup();
    build_sample_tree(&src);

    let engine = CopyEngine::new();
    let handle = engine.start(&src, &dst).expect("start");
    assert_eq!(handle.outcome().await, CopyOutcome::Completed);

    assert_eq!(collect_tree(&src), collect_tree(&dst));
    let report = handle.report();
    assert_eq!(report.cnt_copied, 5);
    assert_eq!(report.cnt_files_total, Some(5));
}

#[tokio::test]
async fn two_file_scenario_reports_progress_in_traversal_order() {
    let (_tmp, src, dst) = setup();
    write_bytes(&src.join("a.txt"), b"alpha");
    write_bytes(&src.join("sub/b.txt"), b"beta");

    let engine = CopyEngine::new();
    let handle = engine.start(&src, &dst).expect("start");
    let l_snapshots = collect_progress(handle.subscribe()).await;
    assert_eq!(handle.outcome().await, CopyOutcome::Completed);

    assert_eq!(std::fs::read(dst.join("a.txt")).expect("a"), b"alpha");
    assert_eq!(std::fs::read(dst.join("sub/b.txt")).expect("b"), b"beta");

    assert_eq!(l_snapshots.len(), 2);
    assert_eq!(l_snapshots[0].cnt_files_done, 1);
    assert_eq!(l_snapshots[0].path_file_current, src.join("a.txt"));
    assert_eq!(l_snapshots[1].cnt_files_done, 2);
    assert_eq!(l_snapshots[1].path_file_current, src.join("sub/b.txt"));
    assert!(l_snapshots.iter().all(|s| s.cnt_files_total == Some(2)));
    assert_eq!(l_snapshots[1].cnt_bytes_copied, 9);
    assert_eq!(l_snapshots[1].fraction(), Some(1.0));
}

#[tokio::test]
async fn existing_destination_files_are_overwritten() {
    let (_tmp, src, dst) = setup();
    write_bytes(&src.join("same.txt"), b"new");
    write_bytes(&src.join("sub/inner.txt"), b"fresh");
    write_bytes(&dst.join("same.txt"), b"a much longer previous content");
    write_bytes(&dst.join("sub/inner.txt"), b"stale stale stale");
    write_bytes(&dst.join("untouched.txt"), b"keep me");

    let engine = CopyEngine::new();
    let handle = engine.start(&src, &dst).expect("start");
    assert_eq!(handle.outcome().await, CopyOutcome::Completed);

    assert_eq!(std::fs::read(dst.join("same.txt")).expect("same"), b"new");
    assert_eq!(std::fs::read(dst.join("sub/inner.txt")).expect("inner"), b"fresh");
    assert_eq!(std::fs::read(dst.join("untouched.txt")).expect("other"), b"keep me");
    assert_eq!(handle.report().cnt_dirs_created, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_mid_directory_keeps_completed_files_only() {
    let (_tmp, src, dst) = setup();
    let n_files = 1000;
    for n_idx in 0..n_files {
        write_bytes(&src.join(format!("f_{n_idx:04}.txt")), b"payload");
    }
    write_bytes(&src.join("sub/inner.txt"), b"inner");

    let engine = CopyEngine::new();
    let handle = engine.start(&src, &dst).expect("start");
    let mut stream = handle.subscribe();
    let snapshot_first = tokio::time::timeout(N_TIMEOUT, stream.next())
        .await
        .expect("first snapshot")
        .expect("stream open");
    handle.cancel();
    handle.cancel();

    let n_done = 1 + collect_progress(stream).await.len();
    assert_eq!(snapshot_first.cnt_files_done, 1);
    assert_eq!(handle.outcome().await, CopyOutcome::Cancelled);
    assert!(n_done < n_files, "cancellation was not honored");

    for n_idx in 0..n_files {
        let path_file = dst.join(format!("f_{n_idx:04}.txt"));
        assert_eq!(path_file.exists(), n_idx < n_done, "{}", path_file.display());
    }
    assert!(!dst.join("sub").exists());
    assert_eq!(handle.report().cnt_copied as usize, n_done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_paused_blocks_until_resume() {
    let (_tmp, src, dst) = setup();
    build_sample_tree(&src);

    let engine = CopyEngine::with_options(SpecCopyOptions {
        if_start_paused: true,
        ..SpecCopyOptions::default()
    });
    let handle = engine.start(&src, &dst).expect("start");
    assert!(handle.is_paused());
    let mut stream = handle.subscribe();

    let res_next = tokio::time::timeout(Duration::from_millis(200), stream.next()).await;
    assert!(res_next.is_err(), "no file may complete while paused");
    assert_eq!(handle.report().cnt_copied, 0);
    assert!(!handle.is_finished());

    handle.resume();
    let l_snapshots = collect_progress(stream).await;
    assert_eq!(handle.outcome().await, CopyOutcome::Completed);
    assert_eq!(collect_tree(&src), collect_tree(&dst));
    assert_eq!(l_snapshots.len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_mid_run_then_resume_finishes_identical_tree() {
    let (_tmp, src, dst) = setup();
    for n_idx in 0..300 {
        write_bytes(&src.join(format!("d_{}/f_{n_idx:03}.txt", n_idx % 3)), b"xyz");
    }

    let engine = CopyEngine::new();
    let handle = engine.start(&src, &dst).expect("start");
    let mut stream = handle.subscribe();
    tokio::time::timeout(N_TIMEOUT, stream.next())
        .await
        .expect("first snapshot")
        .expect("stream open");
    handle.pause();

    // Let an in-flight file finish, then the count must stay put.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let n_paused = handle.report().cnt_copied;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.report().cnt_copied, n_paused);
    assert!(n_paused < 300);

    handle.resume();
    let l_snapshots = collect_progress(stream).await;
    assert_eq!(handle.outcome().await, CopyOutcome::Completed);
    assert_eq!(collect_tree(&src), collect_tree(&dst));
    assert_eq!(l_snapshots.last().map(|s| s.cnt_files_done), Some(300));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_unblocks_paused_run() {
    let (_tmp, src, dst) = setup();
    build_sample_tree(&src);

    let engine = CopyEngine::with_options(SpecCopyOptions {
        if_start_paused: true,
        ..SpecCopyOptions::default()
    });
    let handle = engine.start(&src, &dst).expect("start");
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.stop();

    let outcome = tokio::time::timeout(N_TIMEOUT, handle.outcome())
        .await
        .expect("cancel must not deadlock behind pause");
    assert_eq!(outcome, CopyOutcome::Cancelled);
    assert_eq!(handle.report().cnt_copied, 0);
    if dst.exists() {
        assert!(collect_tree(&dst).is_empty());
    }
}

#[tokio::test]
async fn missing_source_is_rejected_without_touching_destination() {
    let (tmp, _src, dst) = setup();

    let engine = CopyEngine::new();
    let err = engine
        .start(tmp.path().join("does-not-exist"), &dst)
        .expect_err("missing source");
    assert!(matches!(err, CopyStartError::SourceNotFound(_)));
    assert!(!dst.exists());
    assert!(!engine.is_running());
}

#[tokio::test]
async fn empty_paths_are_invalid_input() {
    let (_tmp, src, dst) = setup();
    let engine = CopyEngine::new();

    let err = engine.start("", &dst).expect_err("empty source");
    assert!(matches!(err, CopyStartError::InvalidInput(_)));
    let err = engine.start(&src, "").expect_err("empty destination");
    assert!(matches!(err, CopyStartError::InvalidInput(_)));
}

#[tokio::test]
async fn nested_destination_is_rejected() {
    let (_tmp, src, _dst) = setup();
    write_bytes(&src.join("a.txt"), b"a");

    let engine = CopyEngine::new();
    let err = engine
        .start(&src, src.join("backup"))
        .expect_err("overlap");
    assert!(matches!(
        err,
        CopyStartError::SourceDestinationOverlap { .. }
    ));
    assert!(!src.join("backup").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_start_while_active_is_rejected() {
    let (tmp, src, dst) = setup();
    write_bytes(&src.join("a.txt"), b"a");
    write_bytes(&src.join("b.txt"), b"b");

    let engine = CopyEngine::with_options(SpecCopyOptions {
        if_start_paused: true,
        ..SpecCopyOptions::default()
    });
    let handle = engine.start(&src, &dst).expect("start");
    assert!(engine.is_running());

    let err = engine
        .start(&src, tmp.path().join("other"))
        .expect_err("already running");
    assert!(matches!(err, CopyStartError::AlreadyRunning));
    let err = engine
        .clone()
        .start(&src, tmp.path().join("other"))
        .expect_err("clones share the run slot");
    assert!(matches!(err, CopyStartError::AlreadyRunning));
    assert!(!tmp.path().join("other").exists());

    handle.cancel();
    assert_eq!(handle.outcome().await, CopyOutcome::Cancelled);
    assert!(!engine.is_running());

    // A fresh run gets fresh control state and counters.
    let handle_next = engine.start(&src, &dst).expect("restart");
    assert_ne!(handle_next.id(), handle.id());
    assert!(handle_next.is_paused());
    assert!(!handle_next.is_cancel_requested());
    let stream = handle_next.subscribe();
    handle_next.resume();
    let l_snapshots = collect_progress(stream).await;
    assert_eq!(handle_next.outcome().await, CopyOutcome::Completed);
    let l_done: Vec<u64> = l_snapshots.iter().map(|s| s.cnt_files_done).collect();
    assert_eq!(l_done, vec![1, 2]);
}

#[tokio::test]
async fn progress_is_monotonic_and_bounded_by_total() {
    let (_tmp, src, dst) = setup();
    for n_idx in 0..40 {
        let rel = match n_idx % 4 {
            0 => format!("f_{n_idx}.txt"),
            1 => format!("x/f_{n_idx}.txt"),
            2 => format!("x/y/f_{n_idx}.txt"),
            _ => format!("z/f_{n_idx}.txt"),
        };
        write_bytes(&src.join(rel), n_idx.to_string().as_bytes());
    }

    let engine = CopyEngine::new();
    let handle = engine.start(&src, &dst).expect("start");
    let l_snapshots = collect_progress(handle.subscribe()).await;
    assert_eq!(handle.outcome().await, CopyOutcome::Completed);

    assert_eq!(l_snapshots.len(), 40);
    for pair in l_snapshots.windows(2) {
        assert!(pair[0].cnt_files_done <= pair[1].cnt_files_done);
        assert!(pair[0].cnt_bytes_copied <= pair[1].cnt_bytes_copied);
    }
    for snapshot in &l_snapshots {
        let n_total = snapshot.cnt_files_total.expect("total known after scan");
        assert!(snapshot.cnt_files_done <= n_total);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn multiple_subscribers_observe_the_same_run() {
    let (_tmp, src, dst) = setup();
    build_sample_tree(&src);

    let engine = CopyEngine::with_options(SpecCopyOptions {
        if_start_paused: true,
        ..SpecCopyOptions::default()
    });
    let handle = engine.start(&src, &dst).expect("start");
    let stream_a = handle.subscribe();
    let stream_b = handle.clone().subscribe();
    handle.resume();

    let (l_a, l_b) = tokio::join!(collect_progress(stream_a), collect_progress(stream_b));
    assert_eq!(handle.outcome().await, CopyOutcome::Completed);
    assert_eq!(l_a, l_b);
    assert_eq!(l_a.len(), 5);
}

#[tokio::test]
async fn lagging_subscriber_counts_missed_snapshots() {
    let (_tmp, src, dst) = setup();
    build_sample_tree(&src);

    let engine = CopyEngine::with_options(SpecCopyOptions {
        n_progress_buffer: 1,
        ..SpecCopyOptions::default()
    });
    let handle = engine.start(&src, &dst).expect("start");
    let mut stream_progress = handle.subscribe();
    // Nothing is read until the run is over, so only the newest snapshot fits.
    assert_eq!(handle.outcome().await, CopyOutcome::Completed);

    let mut l_snapshots = Vec::new();
    while let Some(snapshot) = tokio::time::timeout(N_TIMEOUT, stream_progress.next())
        .await
        .expect("progress stream stalled")
    {
        l_snapshots.push(snapshot);
    }

    assert_eq!(l_snapshots.len() as u64 + stream_progress.cnt_missed(), 5);
    assert!(stream_progress.cnt_missed() > 0);
    assert_eq!(l_snapshots.last().map(|s| s.cnt_files_done), Some(5));
    assert!(
        l_snapshots
            .windows(2)
            .all(|w| w[0].cnt_files_done < w[1].cnt_files_done)
    );
}

#[tokio::test]
async fn io_failure_aborts_run_with_reason() {
    let (_tmp, src, dst) = setup();
    write_bytes(&src.join("a.txt"), b"a");
    write_bytes(&src.join("sub/b.txt"), b"b");
    write_bytes(&src.join("sub2/c.txt"), b"c");
    // A plain file where the engine needs a directory.
    write_bytes(&dst.join("sub"), b"in the way");

    let engine = CopyEngine::new();
    let handle = engine.start(&src, &dst).expect("start");
    let l_snapshots = collect_progress(handle.subscribe()).await;
    let outcome = handle.outcome().await;

    assert!(outcome.is_failed());
    assert!(outcome.reason().expect("reason").contains("sub"));
    assert_eq!(l_snapshots.len(), 1);
    assert!(dst.join("a.txt").exists());
    assert!(!dst.join("sub2").exists());
    assert!(!engine.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abort_in_flight_removes_partial_file() {
    let (_tmp, src, dst) = setup();
    let raw: Vec<u8> = (0..4 * 1024 * 1024_u32).map(|n| (n % 241) as u8).collect();
    write_bytes(&src.join("huge.bin"), &raw);
    write_bytes(&src.join("z_after.txt"), b"never");

    let engine = CopyEngine::with_options(SpecCopyOptions {
        n_chunk_bytes: 64,
        if_abort_in_flight: true,
        ..SpecCopyOptions::default()
    });
    let handle = engine.start(&src, &dst).expect("start");

    tokio::time::timeout(N_TIMEOUT, async {
        while handle.report().cnt_bytes == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("transfer started");
    handle.cancel();

    assert_eq!(handle.outcome().await, CopyOutcome::Cancelled);
    assert!(!dst.join("huge.bin").exists());
    assert!(!dst.join("z_after.txt").exists());
    assert_eq!(handle.report().cnt_copied, 0);
}
