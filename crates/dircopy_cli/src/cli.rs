use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use dircopy_io_fs::{EnumCopyPatternMode, N_CHUNK_BYTES_DEFAULT, SpecCopyOptions};

#[derive(Parser, Debug)]
#[command(
    name = "dircopy",
    version,
    about = "Copy a directory tree; type p/r/c (pause/resume/cancel) + Enter while it runs"
)]
pub struct Cli {
    /// Directory to copy from
    pub source: PathBuf,

    /// Directory to copy into (created if missing, same-named files are overwritten)
    pub destination: PathBuf,

    /// Bytes per read/write step
    #[arg(long, default_value_t = N_CHUNK_BYTES_DEFAULT)]
    pub chunk_size: usize,

    /// On cancel, stop the file being copied and remove its partial copy
    #[arg(long)]
    pub abort_in_flight: bool,

    /// Skip the initial file count (progress shows no total)
    #[arg(long)]
    pub no_scan: bool,

    /// Start with the pause gate engaged; resume with `r`
    #[arg(long)]
    pub start_paused: bool,

    /// Only copy files whose name matches (repeatable)
    #[arg(long = "include", value_name = "PATTERN")]
    pub patterns_include_files: Vec<String>,

    /// Never copy files whose name matches (repeatable)
    #[arg(long = "exclude", value_name = "PATTERN")]
    pub patterns_exclude_files: Vec<String>,

    /// Only descend into directories whose name matches (repeatable)
    #[arg(long = "include-dir", value_name = "PATTERN")]
    pub patterns_include_dirs: Vec<String>,

    /// Never descend into directories whose name matches (repeatable)
    #[arg(long = "exclude-dir", value_name = "PATTERN")]
    pub patterns_exclude_dirs: Vec<String>,

    /// How include/exclude patterns are interpreted
    #[arg(long, value_enum, default_value_t = ArgPatternMode::Glob)]
    pub pattern_mode: ArgPatternMode,

    /// Log engine activity to stderr (RUST_LOG overrides)
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPatternMode {
    Glob,
    Regex,
    Literal,
}

impl From<ArgPatternMode> for EnumCopyPatternMode {
    fn from(mode: ArgPatternMode) -> Self {
        match mode {
            ArgPatternMode::Glob => Self::Glob,
            ArgPatternMode::Regex => Self::Regex,
            ArgPatternMode::Literal => Self::Literal,
        }
    }
}

fn non_empty(patterns: &[String]) -> Option<Vec<String>> {
    (!patterns.is_empty()).then(|| patterns.to_vec())
}

impl Cli {
    pub fn to_options(&self) -> SpecCopyOptions {
        SpecCopyOptions {
            patterns_include_files: non_empty(&self.patterns_include_files),
            patterns_exclude_files: non_empty(&self.patterns_exclude_files),
            patterns_include_dirs: non_empty(&self.patterns_include_dirs),
            patterns_exclude_dirs: non_empty(&self.patterns_exclude_dirs),
            rule_pattern: self.pattern_mode.into(),
            n_chunk_bytes: self.chunk_size,
            if_scan_total: !self.no_scan,
            if_start_paused: self.start_paused,
            if_abort_in_flight: self.abort_in_flight,
            ..SpecCopyOptions::default()
        }
    }
}

/// One line typed on stdin while a run is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumControlCommand {
    Pause,
    Resume,
    Cancel,
    Status,
}

impl EnumControlCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "p" | "pause" => Some(Self::Pause),
            "r" | "resume" => Some(Self::Resume),
            // Stop is a real cancellation, not a UI reset.
            "c" | "cancel" | "s" | "stop" => Some(Self::Cancel),
            "?" | "status" => Some(Self::Status),
            _ => None,
        }
    }
}
