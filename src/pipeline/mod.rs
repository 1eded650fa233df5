//! Pipeline stages for LLM post-correction of the directory pages.
//!
//! Each submodule implements one step of the batch workflow. The stages
//! communicate only through files on disk (request JSONL, mapping JSONL,
//! sidecars, output JSONL, TSV trees), so any step can be rerun alone.
//!
//! ## Data Flow
//!
//! ```text
//! benchmark.tsv ──▶ upload ──▶ requests ──▶ batch ──▶ extract ──▶ repair
//!   (OCR text)     (images)    (JSONL)    (vendor)   (<key>.tsv)  (fix tabs)
//! ```
//!
//! 1. [`upload`]   — bounded worker pool pushing page images to the vendor
//!    file store; appends one mapping line per image
//! 2. [`requests`] — one request line per page for the chosen vendor and
//!    request family; optional size-based chunking; local validation
//! 3. [`batch`]    — submit, poll and download through [`vendor`]; the only
//!    stages besides `upload` with network I/O
//! 4. [`extract`]  — first usable text of each response line to `<key>.tsv`
//! 5. [`repair`]   — deterministic reconstruction of rows with broken tab
//!    structure

pub mod batch;
pub mod extract;
pub mod repair;
pub mod requests;
pub mod upload;
pub mod vendor;

use crate::error::PipelineError;
use std::path::{Path, PathBuf};

/// Files under `dir` matching the glob `pattern`, sorted by path.
pub fn discover_files(
    dir: &Path,
    pattern: &str,
    recursive: bool,
) -> Result<Vec<PathBuf>, PipelineError> {
    let prefix = glob::Pattern::escape(&dir.to_string_lossy());
    let full = if recursive {
        format!("{prefix}/**/{pattern}")
    } else {
        format!("{prefix}/{pattern}")
    };
    let paths = glob::glob(&full).map_err(|e| PipelineError::InvalidPattern {
        pattern: pattern.to_string(),
        detail: e.to_string(),
    })?;
    let mut files: Vec<PathBuf> = paths
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_respects_recursion_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("1887")).unwrap();
        std::fs::write(dir.path().join("b.tsv"), "").unwrap();
        std::fs::write(dir.path().join("a.tsv"), "").unwrap();
        std::fs::write(dir.path().join("1887/c.tsv"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let flat = discover_files(dir.path(), "*.tsv", false).unwrap();
        assert_eq!(flat.len(), 2);
        assert!(flat[0].ends_with("a.tsv"));

        let deep = discover_files(dir.path(), "*.tsv", true).unwrap();
        assert_eq!(deep.len(), 3);
    }

    #[test]
    fn bad_pattern_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_files(dir.path(), "[", false).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPattern { .. }));
    }
}
