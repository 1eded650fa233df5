//! Stage summaries: what each pipeline stage wrote, skipped and failed.
//!
//! Every stage returns one of these instead of printing, so the binary can
//! render a final tally and library callers can assert on counts. Item
//! failures are kept as [`ItemError`] values; nothing is silently dropped.

use crate::error::ItemError;
use serde::Serialize;
use std::path::PathBuf;

/// Result of building batch request files.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildSummary {
    /// Request lines written across all files.
    pub written: usize,
    /// Files written, in order (one unless chunking rotated).
    pub files: Vec<PathBuf>,
    /// Benchmark rows skipped for a missing year or page.
    pub skipped_rows: usize,
    /// Rows written with an empty OCR text.
    pub missing_text: usize,
    /// Rows not written because their image or uploaded id is missing.
    pub problems: Vec<ItemError>,
}

/// Result of the image upload pool.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadSummary {
    pub uploaded: usize,
    /// Keys skipped because the mapping file already had them (resume mode).
    pub skipped_existing: usize,
    /// Keys whose image is missing on disk.
    pub missing_images: Vec<String>,
    /// Uploads that failed after retries.
    pub failed: Vec<ItemError>,
}

impl UploadSummary {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Result of extracting TSV text from a vendor output file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractSummary {
    /// Directory the `.tsv` files were written to.
    pub out_dir: PathBuf,
    pub written: usize,
    /// Lines that parsed but carried no usable text.
    pub missing: usize,
    /// Lines that were not valid JSON.
    pub parse_errors: usize,
    pub problems: Vec<ItemError>,
}

impl ExtractSummary {
    /// Fold another file's counts into this one.
    pub fn merge(&mut self, other: ExtractSummary) {
        self.written += other.written;
        self.missing += other.missing;
        self.parse_errors += other.parse_errors;
        self.problems.extend(other.problems);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_summary_merge_adds_counts() {
        let mut a = ExtractSummary {
            written: 2,
            missing: 1,
            ..Default::default()
        };
        let b = ExtractSummary {
            written: 3,
            parse_errors: 1,
            problems: vec![ItemError::InvalidJson {
                line: 4,
                detail: "eof".into(),
            }],
            ..Default::default()
        };
        a.merge(b);
        assert_eq!(a.written, 5);
        assert_eq!(a.missing, 1);
        assert_eq!(a.parse_errors, 1);
        assert_eq!(a.problems.len(), 1);
    }
}
