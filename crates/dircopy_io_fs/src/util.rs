use std::fs;
use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobMatcher};
use regex::Regex;

use crate::spec::{
    CopyStartError, EnumCopyPatternMode, N_CHUNK_BYTES_MAX, N_PROGRESS_BUFFER_MAX, SpecCopyOptions,
};

////////////////////////////////////////////////////////////////////////////////
// #region PatternMatching

#[derive(Debug, Clone)]
pub(crate) enum TypeCopyPatternSeq {
    Literal(Vec<String>),
    Glob(Vec<GlobMatcher>),
    Regex(Vec<Regex>),
}

impl TypeCopyPatternSeq {
    fn is_match(&self, value: &str) -> bool {
        match self {
            Self::Literal(v) => v.iter().any(|p| value.contains(p.as_str())),
            Self::Glob(v) => v.iter().any(|p| p.is_match(value)),
            Self::Regex(v) => v.iter().any(|p| p.is_match(value)),
        }
    }
}

/// Compiled include/exclude filters for one run.
#[derive(Debug, Clone, Default)]
pub(crate) struct SpecCopyPatterns {
    pub(crate) patterns_include_files: Option<TypeCopyPatternSeq>,
    pub(crate) patterns_exclude_files: Option<TypeCopyPatternSeq>,
    pub(crate) patterns_include_dirs: Option<TypeCopyPatternSeq>,
    pub(crate) patterns_exclude_dirs: Option<TypeCopyPatternSeq>,
}

impl SpecCopyPatterns {
    pub(crate) fn from_options(
        spec_cp_options: &SpecCopyOptions,
    ) -> Result<Self, CopyStartError> {
        let rule_pattern = spec_cp_options.rule_pattern;
        Ok(Self {
            patterns_include_files: compile_patterns(
                spec_cp_options.patterns_include_files.as_deref(),
                rule_pattern,
            )?,
            patterns_exclude_files: compile_patterns(
                spec_cp_options.patterns_exclude_files.as_deref(),
                rule_pattern,
            )?,
            patterns_include_dirs: compile_patterns(
                spec_cp_options.patterns_include_dirs.as_deref(),
                rule_pattern,
            )?,
            patterns_exclude_dirs: compile_patterns(
                spec_cp_options.patterns_exclude_dirs.as_deref(),
                rule_pattern,
            )?,
        })
    }

    pub(crate) fn should_skip_file(&self, name_file: &str) -> bool {
        should_exclude_by_patterns(
            name_file,
            self.patterns_include_files.as_ref(),
            self.patterns_exclude_files.as_ref(),
        )
    }

    pub(crate) fn should_skip_dir(&self, name_dir: &str) -> bool {
        should_exclude_by_patterns(
            name_dir,
            self.patterns_include_dirs.as_ref(),
            self.patterns_exclude_dirs.as_ref(),
        )
    }
}

fn compile_patterns(
    patterns: Option<&[String]>,
    rule_pattern: EnumCopyPatternMode,
) -> Result<Option<TypeCopyPatternSeq>, CopyStartError> {
    let Some(patterns) = patterns else {
        return Ok(None);
    };
    if patterns.is_empty() {
        return Ok(None);
    }

    let seq = match rule_pattern {
        EnumCopyPatternMode::Literal => TypeCopyPatternSeq::Literal(patterns.to_vec()),
        EnumCopyPatternMode::Glob => TypeCopyPatternSeq::Glob(
            patterns
                .iter()
                .map(|p| Glob::new(p).map(|g| g.compile_matcher()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| {
                    CopyStartError::InvalidPattern(format!(
                        "Invalid pattern in include/exclude: {e}"
                    ))
                })?,
        ),
        EnumCopyPatternMode::Regex => TypeCopyPatternSeq::Regex(
            patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| {
                    CopyStartError::InvalidPattern(format!(
                        "Invalid pattern in include/exclude: {e}"
                    ))
                })?,
        ),
    };
    Ok(Some(seq))
}

/// An entry is excluded when an include list exists and misses it, or when
/// an exclude list hits it.
fn should_exclude_by_patterns(
    value: &str,
    patterns_include: Option<&TypeCopyPatternSeq>,
    patterns_exclude: Option<&TypeCopyPatternSeq>,
) -> bool {
    let b_included = patterns_include.is_none_or(|p| p.is_match(value));
    let b_excluded = patterns_exclude.is_some_and(|p| p.is_match(value));
    !b_included || b_excluded
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Validation

pub(crate) fn validate_options(spec_cp_options: &SpecCopyOptions) -> Result<(), CopyStartError> {
    if !(1..=N_CHUNK_BYTES_MAX).contains(&spec_cp_options.n_chunk_bytes) {
        return Err(CopyStartError::InvalidOptions(format!(
            "Arg `n_chunk_bytes` must be in 1..={N_CHUNK_BYTES_MAX}, got {}.",
            spec_cp_options.n_chunk_bytes
        )));
    }
    if !(1..=N_PROGRESS_BUFFER_MAX).contains(&spec_cp_options.n_progress_buffer) {
        return Err(CopyStartError::InvalidOptions(format!(
            "Arg `n_progress_buffer` must be in 1..={N_PROGRESS_BUFFER_MAX}, got {}.",
            spec_cp_options.n_progress_buffer
        )));
    }
    Ok(())
}

/// Rejects empty paths and missing sources. Touches nothing on disk besides
/// a metadata lookup of the source.
pub(crate) fn validate_paths(
    path_dir_src: &Path,
    path_dir_dst: &Path,
) -> Result<(), CopyStartError> {
    if path_dir_src.as_os_str().is_empty() {
        return Err(CopyStartError::InvalidInput(
            "Source path must not be empty.".to_string(),
        ));
    }
    if path_dir_dst.as_os_str().is_empty() {
        return Err(CopyStartError::InvalidInput(
            "Destination path must not be empty.".to_string(),
        ));
    }
    if !path_dir_src.is_dir() {
        return Err(CopyStartError::SourceNotFound(path_dir_src.to_path_buf()));
    }
    if is_overlap(path_dir_src, path_dir_dst) {
        return Err(CopyStartError::SourceDestinationOverlap {
            path_dir_src: normalize_path(path_dir_src),
            path_dir_dst: normalize_path(path_dir_dst),
        });
    }
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PathUtilities

fn absolutize_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

/// Canonicalize the deepest existing ancestor and re-append the rest, so a
/// not-yet-created destination still compares against resolved sources.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let path_abs = absolutize_path(path);
    let mut l_tail: Vec<Component> = Vec::new();
    let mut path_cursor = path_abs.as_path();
    loop {
        if let Ok(path_resolved) = fs::canonicalize(path_cursor) {
            let mut path_out = path_resolved;
            for part in l_tail.iter().rev() {
                match part {
                    Component::ParentDir => {
                        path_out.pop();
                    }
                    Component::CurDir => {}
                    _ => path_out.push(part.as_os_str()),
                }
            }
            return path_out;
        }
        let Some(path_parent) = path_cursor.parent() else {
            return path_abs;
        };
        if let Some(part) = path_cursor.components().next_back() {
            l_tail.push(part);
        }
        path_cursor = path_parent;
    }
}

pub(crate) fn is_overlap(src: &Path, dst: &Path) -> bool {
    let src_resolved = normalize_path(src);
    let dst_resolved = normalize_path(dst);
    dst_resolved.starts_with(&src_resolved) || src_resolved.starts_with(&dst_resolved)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
