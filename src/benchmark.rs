//! Readers for the benchmark and target-page TSV files.
//!
//! Both files are tab-separated with a header row. Columns are looked up by
//! name so extra columns (notes, localisation) are ignored.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One scanned page's OCR text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkRow {
    pub year: String,
    pub page: String,
    /// OCR text with `\n` / `\t` escapes already restored.
    pub text: String,
}

impl BenchmarkRow {
    /// Correlation key shared by requests, uploads and outputs: `"{year}-{page}"`.
    pub fn key(&self) -> String {
        format!("{}-{}", self.year, self.page)
    }
}

/// Rows read from a benchmark TSV plus the number skipped for a missing year or page.
#[derive(Debug, Clone, Default)]
pub struct Benchmark {
    pub rows: Vec<BenchmarkRow>,
    pub skipped: usize,
}

/// Restore literal `\n` and `\t` escapes to real control characters.
pub fn normalize_ocr_text(text: &str) -> String {
    text.replace("\\n", "\n").replace("\\t", "\t")
}

/// Split `text` into a header and rows of cells.
fn split_tsv(text: &str) -> (Vec<&str>, Vec<Vec<&str>>) {
    let text = text.strip_prefix('\u{FEFF}').unwrap_or(text);
    let mut lines = text.lines();
    let header = lines
        .next()
        .map(|h| h.split('\t').map(str::trim).collect())
        .unwrap_or_default();
    let rows = lines
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.split('\t').collect())
        .collect();
    (header, rows)
}

fn column(header: &[&str], name: &str, path: &Path) -> Result<usize, PipelineError> {
    header
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .ok_or_else(|| PipelineError::MissingColumn {
            path: path.to_path_buf(),
            column: name.to_string(),
        })
}

/// Parse benchmark TSV content (`year`, `page`, optional `text`).
pub fn parse_benchmark(content: &str, path: &Path) -> Result<Benchmark, PipelineError> {
    let (header, rows) = split_tsv(content);
    let year_col = column(&header, "year", path)?;
    let page_col = column(&header, "page", path)?;
    let text_col = column(&header, "text", path).ok();

    let mut out = Benchmark::default();
    for cells in rows {
        let year = cells.get(year_col).map(|s| s.trim()).unwrap_or_default();
        let page = cells.get(page_col).map(|s| s.trim()).unwrap_or_default();
        if year.is_empty() || page.is_empty() {
            out.skipped += 1;
            continue;
        }
        let text = text_col
            .and_then(|c| cells.get(c))
            .map(|t| normalize_ocr_text(t))
            .unwrap_or_default();
        out.rows.push(BenchmarkRow {
            year: year.to_string(),
            page: page.to_string(),
            text,
        });
    }
    debug!(
        "Parsed {} benchmark rows ({} skipped) from {}",
        out.rows.len(),
        out.skipped,
        path.display()
    );
    Ok(out)
}

/// Read a benchmark TSV from disk.
pub fn read_benchmark(path: impl AsRef<Path>) -> Result<Benchmark, PipelineError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::read(path, e))?;
    parse_benchmark(&content, path)
}

/// A contiguous page range of one year's directory to digitise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRange {
    pub year: String,
    pub page_begin: u32,
    pub page_end: u32,
}

impl TargetRange {
    /// Pages in the range, inclusive.
    pub fn pages(&self) -> impl Iterator<Item = u32> {
        self.page_begin..=self.page_end
    }
}

/// Parse target-page TSV content (`year`, `page_begin`, `page_end`).
///
/// Rows with non-numeric pages, `page_begin == 0` or an inverted range are
/// skipped with a warning. A non-empty `years` filter keeps only those years.
pub fn parse_targets(
    content: &str,
    path: &Path,
    years: &[String],
) -> Result<Vec<TargetRange>, PipelineError> {
    let (header, rows) = split_tsv(content);
    let year_col = column(&header, "year", path)?;
    let begin_col = column(&header, "page_begin", path)?;
    let end_col = column(&header, "page_end", path)?;

    let mut targets = Vec::new();
    for cells in rows {
        let year = cells.get(year_col).map(|s| s.trim()).unwrap_or_default();
        if !years.is_empty() && !years.iter().any(|y| y == year) {
            continue;
        }
        let parse = |col: usize| -> Option<u32> {
            let raw = cells.get(col).map(|s| s.trim()).unwrap_or_default();
            if raw.is_empty() {
                Some(0)
            } else {
                raw.parse().ok()
            }
        };
        let (Some(begin), Some(end)) = (parse(begin_col), parse(end_col)) else {
            warn!("skip row with non-numeric pages: {:?}", cells);
            continue;
        };
        if year.is_empty() || begin == 0 || end < begin {
            warn!("skip malformed row: {:?}", cells);
            continue;
        }
        targets.push(TargetRange {
            year: year.to_string(),
            page_begin: begin,
            page_end: end,
        });
    }
    Ok(targets)
}

/// Read a target-page TSV from disk.
pub fn read_targets(
    path: impl AsRef<Path>,
    years: &[String],
) -> Result<Vec<TargetRange>, PipelineError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::read(path, e))?;
    parse_targets(&content, path, years)
}

/// Image extensions tried, in order, when locating a rendered page.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Locate `<root>/<year>/<year>-page-<page>.{png,jpg,jpeg}`.
pub fn find_image(images_root: &Path, year: &str, page: &str) -> Option<PathBuf> {
    let stem = format!("{year}-page-{page}");
    IMAGE_EXTENSIONS
        .iter()
        .map(|ext| images_root.join(year).join(format!("{stem}.{ext}")))
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benchmark_skips_rows_without_year_or_page() {
        let content = "year\tpage\ttext\n1887\t0032\tDupont\\nMartin\n\t0033\tx\n1888\t\ty\n";
        let b = parse_benchmark(content, Path::new("b.tsv")).unwrap();
        assert_eq!(b.rows.len(), 1);
        assert_eq!(b.skipped, 2);
        assert_eq!(b.rows[0].key(), "1887-0032");
        assert_eq!(b.rows[0].text, "Dupont\nMartin");
    }

    #[test]
    fn benchmark_without_text_column() {
        let content = "page\tyear\n12\t1890\n";
        let b = parse_benchmark(content, Path::new("b.tsv")).unwrap();
        assert_eq!(b.rows[0].key(), "1890-12");
        assert!(b.rows[0].text.is_empty());
    }

    #[test]
    fn benchmark_missing_year_column_is_fatal() {
        let err = parse_benchmark("page\ttext\n1\tx\n", Path::new("b.tsv")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { ref column, .. } if column == "year"));
    }

    #[test]
    fn targets_filter_and_validate() {
        let content = "year\tpage_begin\tpage_end\tnote\n\
                       1887\t30\t32\t\n\
                       1888\tx\t4\t\n\
                       1889\t5\t3\t\n\
                       1890\t1\t1\tok\n";
        let all = parse_targets(content, Path::new("t.tsv"), &[]).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].pages().collect::<Vec<_>>(), vec![30, 31, 32]);

        let only = parse_targets(content, Path::new("t.tsv"), &["1890".to_string()]).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].year, "1890");
    }

    #[test]
    fn find_image_prefers_png() {
        let dir = tempfile::tempdir().unwrap();
        let year_dir = dir.path().join("1887");
        std::fs::create_dir_all(&year_dir).unwrap();
        std::fs::write(year_dir.join("1887-page-0032.jpg"), b"jpg").unwrap();
        std::fs::write(year_dir.join("1887-page-0032.png"), b"png").unwrap();

        let found = find_image(dir.path(), "1887", "0032").unwrap();
        assert_eq!(found.extension().unwrap(), "png");
        assert!(find_image(dir.path(), "1887", "0099").is_none());
    }
}
