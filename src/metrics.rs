//! Word and character error rates against hand-labelled ground truth.
//!
//! Both texts go through the same normalisation (lowercase, Unicode
//! punctuation removed, whitespace trimmed and collapsed) before a
//! Levenshtein alignment over words (WER) or characters, spaces included
//! (CER). Rates are edit distance over reference length and can exceed 1.

use crate::error::PipelineError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

static RE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{P}").unwrap());

/// Lowercase, drop punctuation, trim and collapse whitespace.
pub fn normalise(text: &str) -> String {
    let lower = text.to_lowercase();
    let stripped = RE_PUNCT.replace_all(&lower, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Levenshtein distance between two sequences.
pub fn edit_distance<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, x) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(x != y);
            cur[j + 1] = substitution.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Word error rate; None when the normalised reference is empty.
pub fn wer(reference: &str, hypothesis: &str) -> Option<f64> {
    let reference = normalise(reference);
    let hypothesis = normalise(hypothesis);
    let r: Vec<&str> = reference.split(' ').filter(|w| !w.is_empty()).collect();
    let h: Vec<&str> = hypothesis.split(' ').filter(|w| !w.is_empty()).collect();
    if r.is_empty() {
        return None;
    }
    Some(edit_distance(&r, &h) as f64 / r.len() as f64)
}

/// Character error rate; None when the normalised reference is empty.
pub fn cer(reference: &str, hypothesis: &str) -> Option<f64> {
    let r: Vec<char> = normalise(reference).chars().collect();
    let h: Vec<char> = normalise(hypothesis).chars().collect();
    if r.is_empty() {
        return None;
    }
    Some(edit_distance(&r, &h) as f64 / r.len() as f64)
}

/// TSV content as comparable text: header dropped, tabs and line breaks become spaces.
pub fn tsv_body_text(content: &str) -> String {
    content
        .trim()
        .replace('\t', " ")
        .lines()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Non-blank data lines, header excluded.
pub fn count_entries(content: &str) -> usize {
    content
        .trim()
        .lines()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .count()
}

/// Scores for one hypothesis TSV against its reference.
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub reference: PathBuf,
    pub hypothesis: PathBuf,
    pub wer: Option<f64>,
    pub cer: Option<f64>,
    pub reference_rows: usize,
    pub hypothesis_rows: usize,
}

fn read(path: &Path) -> Result<String, PipelineError> {
    std::fs::read_to_string(path).map_err(|e| PipelineError::read(path, e))
}

/// Score `hypothesis` against `reference`; both are TSV files with a header.
pub fn compare_files(reference: &Path, hypothesis: &Path) -> Result<Comparison, PipelineError> {
    let ref_content = read(reference)?;
    let hyp_content = read(hypothesis)?;
    let ref_text = tsv_body_text(&ref_content);
    let hyp_text = tsv_body_text(&hyp_content);
    Ok(Comparison {
        reference: reference.to_path_buf(),
        hypothesis: hypothesis.to_path_buf(),
        wer: wer(&ref_text, &hyp_text),
        cer: cer(&ref_text, &hyp_text),
        reference_rows: count_entries(&ref_content),
        hypothesis_rows: count_entries(&hyp_content),
    })
}

fn rate(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

impl Comparison {
    /// `hyp_rows/ref_rows`.
    pub fn entries(&self) -> String {
        format!("{}/{}", self.hypothesis_rows, self.reference_rows)
    }

    /// Plain-text report.
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Reference: {}", self.reference.display());
        let _ = writeln!(out, "Hypothesis: {}", self.hypothesis.display());
        let _ = writeln!(out, "{}", "=".repeat(70));
        let _ = writeln!(out, "Word Error Rate (WER): {}", rate(self.wer));
        let _ = writeln!(out, "Character Error Rate (CER): {}", rate(self.cer));
        let _ = writeln!(out, "Entries: {}", self.entries());
        out
    }

    /// One table row: name, WER, CER, entries.
    pub fn table_row(&self) -> String {
        let name = self
            .hypothesis
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!(
            "{:<40} {:>8} {:>8} {:>9}",
            name,
            rate(self.wer),
            rate(self.cer),
            self.entries()
        )
    }

    /// Write the report to `<dir>/<hypothesis stem>-comparison.txt`.
    pub fn write_report(&self, dir: &Path) -> Result<PathBuf, PipelineError> {
        std::fs::create_dir_all(dir).map_err(|e| PipelineError::write(dir, e))?;
        let stem = self
            .hypothesis
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "hypothesis".to_string());
        let path = dir.join(format!("{stem}-comparison.txt"));
        std::fs::write(&path, self.report()).map_err(|e| PipelineError::write(&path, e))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalise_strips_case_punctuation_and_spaces() {
        assert_eq!(normalise("  Dupont,  Méd. (Hôp.)\n 2 à 4 "), "dupont méd hôp 2 à 4");
        assert_eq!(normalise("«l’Acad.»"), "lacad");
    }

    #[test]
    fn edit_distance_basics() {
        assert_eq!(edit_distance(&['k', 'i', 't'], &['s', 'i', 't', 's']), 2);
        assert_eq!(edit_distance::<char>(&[], &['a']), 1);
        assert_eq!(edit_distance(&["a", "b"], &["a", "b"]), 0);
    }

    #[test]
    fn wer_and_cer() {
        assert_eq!(wer("le chat dort", "le chien dort"), Some(1.0 / 3.0));
        assert_eq!(wer("Dupont, Méd.", "dupont med"), Some(0.5));
        assert_eq!(cer("abcd", "abed"), Some(0.25));
        assert_eq!(wer("a b", ""), Some(1.0));
    }

    #[test]
    fn empty_reference_has_no_score() {
        assert_eq!(wer("...", "x"), None);
        assert_eq!(cer("", "x"), None);
    }

    #[test]
    fn tsv_text_drops_header() {
        let tsv = "nom\tannée\nDupont\t1885\nMartin\t1887\n";
        assert_eq!(tsv_body_text(tsv), "Dupont 1885 Martin 1887");
        assert_eq!(count_entries("nom\n\nA\nB\n"), 2);
    }

    #[test]
    fn compare_files_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("1887-page-0032.tsv");
        let hypothesis = dir.path().join("hyp.tsv");
        std::fs::write(&reference, "nom\tannée\nDupont\t1885\nMartin\t1887\n").unwrap();
        std::fs::write(&hypothesis, "nom\tannée\nDupont\t1885\n").unwrap();

        let cmp = compare_files(&reference, &hypothesis).unwrap();
        assert_eq!(cmp.wer, Some(0.5));
        assert_eq!(cmp.entries(), "1/2");

        let path = cmp.write_report(&dir.path().join("reports")).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("Word Error Rate (WER): 0.5000"));
    }
}
