use std::io::BufRead;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use dircopy_io_fs::{CopyEngine, CopyHandle, CopyOutcome, SnapshotProgress};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

mod cli;
mod logging;

use cli::{Cli, EnumControlCommand};

const N_EXIT_FAILED: u8 = 1;
const N_EXIT_CANCELLED: u8 = 130;

/// Forward stdin lines from a plain thread; a detached thread never holds
/// the runtime open at exit.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx_lines, rx_lines) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx_lines.send(line).is_err() {
                break;
            }
        }
    });
    rx_lines
}

fn print_progress(snapshot: &SnapshotProgress) {
    let c_total = snapshot
        .cnt_files_total
        .map_or_else(|| "?".to_string(), |n| n.to_string());
    match snapshot.fraction() {
        Some(fraction) => println!(
            "[{}/{c_total} {:>5.1}%] {}",
            snapshot.cnt_files_done,
            fraction * 100.0,
            snapshot.path_file_current.display()
        ),
        None => println!(
            "[{}/{c_total}] {}",
            snapshot.cnt_files_done,
            snapshot.path_file_current.display()
        ),
    }
}

fn apply_command(handle: &CopyHandle, line: &str) {
    let Some(command) = EnumControlCommand::parse(line) else {
        eprintln!("unknown command {line:?} (p = pause, r = resume, c/s = cancel, ? = status)");
        return;
    };
    debug!(?command, "Control command");
    match command {
        EnumControlCommand::Pause => {
            handle.pause();
            eprintln!("paused after the current file");
        }
        EnumControlCommand::Resume => {
            handle.resume();
            eprintln!("resumed");
        }
        EnumControlCommand::Cancel => {
            handle.cancel();
            eprintln!("cancelling...");
        }
        EnumControlCommand::Status => {
            let c_state = if handle.is_paused() { "paused" } else { "running" };
            eprintln!("{c_state}: {}", handle.report());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let engine = CopyEngine::with_options(cli.to_options());
    let handle = engine.start(&cli.source, &cli.destination).with_context(|| {
        format!(
            "cannot copy {} -> {}",
            cli.source.display(),
            cli.destination.display()
        )
    })?;
    if handle.is_paused() {
        eprintln!("start paused; type `r` + Enter to begin");
    }

    let mut stream_progress = handle.subscribe();
    let mut rx_lines = spawn_stdin_reader();
    let mut if_stdin_open = true;
    let mut if_signal_ok = true;
    loop {
        tokio::select! {
            snapshot = stream_progress.next() => match snapshot {
                Some(snapshot) => print_progress(&snapshot),
                None => break,
            },
            line = rx_lines.recv(), if if_stdin_open => match line {
                Some(line) => apply_command(&handle, &line),
                None => if_stdin_open = false,
            },
            res_signal = tokio::signal::ctrl_c(), if if_signal_ok => match res_signal {
                Ok(()) => {
                    eprintln!("interrupted, cancelling...");
                    handle.cancel();
                }
                Err(e) => {
                    debug!(error = %e, "Ctrl-C handler unavailable");
                    if_signal_ok = false;
                }
            },
        }
    }

    if stream_progress.cnt_missed() > 0 {
        eprintln!(
            "{} progress lines skipped (output fell behind)",
            stream_progress.cnt_missed()
        );
    }

    let outcome = handle.outcome().await;
    println!("{}", handle.report());
    let n_exit = match outcome {
        CopyOutcome::Completed => {
            println!("copy completed");
            return Ok(ExitCode::SUCCESS);
        }
        CopyOutcome::Cancelled => {
            println!("copy cancelled");
            N_EXIT_CANCELLED
        }
        CopyOutcome::Failed(e) => {
            eprintln!("copy failed: {e}");
            N_EXIT_FAILED
        }
    };
    Ok(ExitCode::from(n_exit))
}
