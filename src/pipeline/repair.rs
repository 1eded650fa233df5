//! TSV repair: rebuild directory entries whose tab structure the LLM broke.
//!
//! Correction models are asked for five tab-separated columns
//! (`nom, année, notes, adresse, horaires`). Now and then a row comes back
//! with a missing or extra tab, or with every field run together on one
//! line. Well-formed rows pass through untouched; each malformed row is
//! rebuilt by a greedy, ordered heuristic:
//!
//! 1. split on tabs and drop empty tokens (a line with no tab structure is
//!    first segmented around its year and opening-hours spans)
//! 2. the first token is the name
//! 3. the first token holding four digits gives the year
//! 4. the last token that reads like opening hours is the hours field
//! 5. each remaining token is a note (first matching abbreviation pattern
//!    wins; a comma splits note from address) or else an address fragment
//! 6. the fields are padded or truncated to the header length
//!
//! Years and hours are removed from the pool before classification, so no
//! token lands in two fields. There is no backtracking and no randomness:
//! repairing the same line twice yields the same record.

use crate::error::PipelineError;
use crate::pipeline::discover_files;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Header used when a file has none.
pub const DEFAULT_HEADERS: [&str; 5] = ["nom", "année", "notes", "adresse", "horaires"];

/// One malformed line and whether a record was rebuilt from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairIssue {
    /// 1-based line number in the source file.
    pub line_number: usize,
    pub tab_count: usize,
    pub raw_line: String,
    pub repaired: bool,
}

/// A parsed TSV: header, records (original or rebuilt) and the malformed lines seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub issues: Vec<RepairIssue>,
}

impl TsvTable {
    /// Malformed lines no record could be rebuilt from.
    pub fn failed(&self) -> usize {
        self.issues.iter().filter(|i| !i.repaired).count()
    }

    /// Render header and records as TSV text, one trailing newline.
    pub fn to_tsv(&self) -> String {
        let mut out = self.headers.join("\t");
        out.push('\n');
        for row in &self.rows {
            out.push_str(&row.join("\t"));
            out.push('\n');
        }
        out
    }
}

// ── Patterns ─────────────────────────────────────────────────────────────────

static RE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}").unwrap());

static RE_WIDE_GAP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Day abbreviations, `2 à 4` ranges (with halves and an optional `h`), `midi`, `soir`.
///
/// Deliberately lenient: the trailing `h` may be present (`2 à 4h`), and a
/// half hour is accepted as `½` or as the full `1/2`.
static RE_HOURS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\b(?:Lun|Mar|Mer|Jeu|Ven|Sam|Dim)\b",
        r"|\b\d{1,2}(?:\s*(?:½|1/2))?\s*h?\s*à\s*\d{1,2}(?:\s*(?:½|1/2))?\s*h?\b",
        r"|\bmidi\b",
        r"|\bsoir\b",
    ))
    .unwrap()
});

/// Hospital affiliations, academic titles and specialities, in priority order.
static NOTE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bA\s*cc?\.?\s*(?:d[eu]s?\s*)?H[ôo0]p\.?\b",
        r"\bM\.?\s*(?:d[eu]s?\s*)?H[ôo0]p\.?\b",
        r"\bCh?\.?\s*(?:d[eu]s?\s*)?H[ôo0]p\.?\b",
        r"\bAgr[ée]?(?:g[ée])?\.?\b",
        r"\bP\.?\s*F\.?\s*P\.?\b",
        r"\bM\.?\s*A\.?\s*M\.?\b",
        r"\bM\.?\s*A\.?\s*S\.?\b",
        r"\bEx[\-\s]*(?:ou\s+anc\.?\s*)?(?:Int|Intern[ei])\.?\s*d[eu]s?\s*H[ôo0]p\.?\b",
        r"\bLaur?\.?\s*d[eu]\s*l[’']?Acad\.?\b",
        r"\bDent?\.?\b",
        r"\bH[ôo0]p\.?\b",
        r"\bM[ée]d\.?\b",
        r"\bChir?\.?\b",
        r"\bProf?\.?\b",
        r"\bPros?\.?\b",
        r"\bPr[ée]p\.?\b",
        r"\bClin?\.?\b",
        r"\bMal\.?\b",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
    .collect()
});

/// Index of the first note pattern matching `token`, if any.
fn note_pattern(token: &str) -> Option<usize> {
    NOTE_PATTERNS.iter().position(|re| re.is_match(token))
}

fn looks_like_header(cells: &[String]) -> bool {
    cells
        .iter()
        .map(|c| c.trim().to_lowercase())
        .any(|c| DEFAULT_HEADERS.contains(&c.as_str()))
}

// ── Line repair ──────────────────────────────────────────────────────────────

/// Cut a line with no tab structure into tokens.
///
/// Runs of two or more spaces are taken as column gaps first. A line with
/// single spaces only is cut before and after its first four-digit year and
/// before its last opening-hours match, which runs to the end of the line.
fn segment_untabbed(line: &str) -> Vec<String> {
    let gaps: Vec<&str> = RE_WIDE_GAP
        .split(line)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if gaps.len() > 1 {
        return gaps.into_iter().map(String::from).collect();
    }

    let line = line.trim();
    let year = RE_YEAR.find(line);
    let after_year = year.map_or(0, |m| m.end());
    let hours_start = RE_HOURS
        .find_iter(&line[after_year..])
        .last()
        .map(|m| after_year + m.start());

    let name_end = year.map(|m| m.start()).or(hours_start).unwrap_or(line.len());
    let mut pieces = vec![&line[..name_end]];
    let mut cursor = name_end;
    if let Some(m) = year {
        pieces.push(m.as_str());
        cursor = m.end();
    }
    match hours_start {
        Some(h) => {
            pieces.push(&line[cursor..h]);
            pieces.push(&line[h..]);
        }
        None => pieces.push(&line[cursor..]),
    }

    pieces
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Rebuild a record from a malformed line.
///
/// Returns `None` only when there is nothing to rebuild from: an empty
/// header or a line with no non-blank token. Otherwise a record of exactly
/// `headers.len()` fields is always produced.
pub fn repair_line(raw_line: &str, headers: &[String]) -> Option<Vec<String>> {
    if headers.is_empty() {
        return None;
    }

    let mut tokens: Vec<String> = raw_line
        .split('\t')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if tokens.len() == 1 {
        tokens = segment_untabbed(&tokens[0]);
    }
    if tokens.is_empty() {
        return None;
    }

    let name = tokens.remove(0);
    let mut remaining = tokens;

    let mut year = String::new();
    if let Some(idx) = remaining.iter().position(|t| RE_YEAR.is_match(t)) {
        if let Some(m) = RE_YEAR.find(&remaining[idx]) {
            year = m.as_str().to_string();
        }
        remaining.remove(idx);
    }

    let mut hours = String::new();
    if let Some(idx) = remaining.iter().rposition(|t| RE_HOURS.is_match(t)) {
        hours = remaining.remove(idx);
    }

    let mut notes: Vec<&str> = Vec::new();
    let mut address: Vec<&str> = Vec::new();
    for token in &remaining {
        match note_pattern(token) {
            Some(pattern) => {
                debug!("note pattern {} matched {:?}", pattern, token);
                match token.split_once(',') {
                    Some((note, addr)) => {
                        notes.push(note.trim());
                        let addr = addr.trim();
                        if !addr.is_empty() {
                            address.push(addr);
                        }
                    }
                    None => notes.push(token),
                }
            }
            None => address.push(token),
        }
    }

    let mut fields = vec![name, year, notes.join(", "), address.join(", "), hours];
    fields.resize(headers.len(), String::new());
    Some(fields)
}

// ── Table reading ────────────────────────────────────────────────────────────

/// Parse TSV text, passing well-formed lines through and repairing the rest.
///
/// If the first line does not look like a header and has exactly five
/// columns, [`DEFAULT_HEADERS`] is assumed and every line is data.
pub fn parse_tsv(text: &str) -> TsvTable {
    let text = text.strip_prefix('\u{FEFF}').unwrap_or(text);
    let lines: Vec<&str> = text.lines().collect();
    let Some(first) = lines.first() else {
        return TsvTable::default();
    };

    let candidate: Vec<String> = if first.is_empty() {
        Vec::new()
    } else {
        first.split('\t').map(String::from).collect()
    };

    let (headers, data, first_line_number) =
        if !looks_like_header(&candidate) && candidate.len() == DEFAULT_HEADERS.len() {
            let defaults = DEFAULT_HEADERS.iter().map(|h| h.to_string()).collect();
            (defaults, &lines[..], 1)
        } else {
            (candidate, &lines[1..], 2)
        };

    let expected_tabs = headers.len().saturating_sub(1);
    let mut table = TsvTable {
        headers,
        ..Default::default()
    };

    for (offset, raw_line) in data.iter().enumerate() {
        if raw_line.trim().is_empty() {
            continue;
        }
        let line_number = first_line_number + offset;
        let tab_count = raw_line.matches('\t').count();

        if tab_count == expected_tabs && !table.headers.is_empty() {
            table
                .rows
                .push(raw_line.split('\t').map(String::from).collect());
            continue;
        }

        let repaired = repair_line(raw_line, &table.headers);
        table.issues.push(RepairIssue {
            line_number,
            tab_count,
            raw_line: raw_line.to_string(),
            repaired: repaired.is_some(),
        });
        if let Some(record) = repaired {
            table.rows.push(record);
        }
    }
    table
}

// ── File and tree repair ─────────────────────────────────────────────────────

/// How a file came out of repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RepairOutcome {
    NoIssues,
    FullyRepaired,
    Unrepaired(usize),
}

impl fmt::Display for RepairOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairOutcome::NoIssues => f.write_str("no issues detected"),
            RepairOutcome::FullyRepaired => f.write_str("fully repaired"),
            RepairOutcome::Unrepaired(n) => write!(f, "{n} line(s) unrepaired"),
        }
    }
}

/// Per-file result of a repair run.
#[derive(Debug, Clone, Serialize)]
pub struct FileRepairReport {
    pub source: PathBuf,
    /// Where the repaired TSV was written; None when the file had no header.
    pub output: Option<PathBuf>,
    pub headers: Vec<String>,
    pub total_rows: usize,
    pub issues: Vec<RepairIssue>,
}

impl FileRepairReport {
    pub fn failed(&self) -> usize {
        self.issues.iter().filter(|i| !i.repaired).count()
    }

    pub fn outcome(&self) -> RepairOutcome {
        match (self.failed(), self.issues.len()) {
            (0, 0) => RepairOutcome::NoIssues,
            (0, _) => RepairOutcome::FullyRepaired,
            (n, _) => RepairOutcome::Unrepaired(n),
        }
    }
}

/// Repair one file, mirroring its path under `input_root` into `output_root`.
///
/// The source file is never modified.
pub fn repair_file(
    tsv_path: &Path,
    input_root: &Path,
    output_root: &Path,
) -> Result<FileRepairReport, PipelineError> {
    let text = std::fs::read_to_string(tsv_path).map_err(|e| PipelineError::read(tsv_path, e))?;
    let table = parse_tsv(&text);

    let rel = tsv_path.strip_prefix(input_root).unwrap_or(tsv_path);
    let rel = if rel.is_absolute() {
        Path::new(rel.file_name().unwrap_or_default())
    } else {
        rel
    };
    let output_path = output_root.join(rel);

    let output = if table.headers.is_empty() {
        warn!("{}: TSV missing header row, not written", tsv_path.display());
        None
    } else {
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::write(parent, e))?;
        }
        std::fs::write(&output_path, table.to_tsv())
            .map_err(|e| PipelineError::write(&output_path, e))?;
        Some(output_path)
    };

    for issue in &table.issues {
        if issue.repaired {
            debug!(
                "{}: line {} ({} tab(s)) repaired",
                tsv_path.display(),
                issue.line_number,
                issue.tab_count
            );
        } else {
            warn!(
                "{}: line {} ({} tab(s)) could not be repaired",
                tsv_path.display(),
                issue.line_number,
                issue.tab_count
            );
        }
    }

    Ok(FileRepairReport {
        source: tsv_path.to_path_buf(),
        output,
        total_rows: table.rows.len(),
        headers: table.headers,
        issues: table.issues,
    })
}

/// Options for [`repair_tree`].
#[derive(Debug, Clone)]
pub struct RepairOptions {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Glob relative to `input_dir`. Default: `*.tsv`.
    pub pattern: String,
    /// Search subdirectories too.
    pub recursive: bool,
    /// Process at most this many files.
    pub limit: Option<usize>,
}

impl RepairOptions {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            pattern: "*.tsv".to_string(),
            recursive: false,
            limit: None,
        }
    }
}

/// Repair every matching TSV under `options.input_dir`.
///
/// A missing input directory is fatal; an empty match list is not.
pub fn repair_tree(options: &RepairOptions) -> Result<Vec<FileRepairReport>, PipelineError> {
    if !options.input_dir.is_dir() {
        return Err(PipelineError::FileNotFound {
            path: options.input_dir.clone(),
        });
    }

    let mut files = discover_files(&options.input_dir, &options.pattern, options.recursive)?;
    if let Some(limit) = options.limit {
        files.truncate(limit);
    }
    info!(
        "Repairing {} TSV file(s) from {} into {}",
        files.len(),
        options.input_dir.display(),
        options.output_dir.display()
    );

    files
        .iter()
        .map(|path| repair_file(path, &options.input_dir, &options.output_dir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> Vec<String> {
        DEFAULT_HEADERS.iter().map(|h| h.to_string()).collect()
    }

    #[test]
    fn well_formed_line_passes_through() {
        let text = "nom\tannée\tnotes\tadresse\thoraires\nDupont\t1885\tMéd.\t12 rue de la Paix\t2 à 4\n";
        let table = parse_tsv(text);
        assert!(table.issues.is_empty());
        assert_eq!(
            table.rows,
            vec![vec!["Dupont", "1885", "Méd.", "12 rue de la Paix", "2 à 4"]]
        );
    }

    #[test]
    fn four_column_header_keeps_matching_line_unchanged() {
        let text = "nom\tannée\tadresse\thoraires\nDupont\t1885\tMédecin, 12 rue de la Paix\t2 à 4h\n";
        let table = parse_tsv(text);
        assert!(table.issues.is_empty());
        assert_eq!(
            table.rows[0],
            vec!["Dupont", "1885", "Médecin, 12 rue de la Paix", "2 à 4h"]
        );
    }

    #[test]
    fn untabbed_line_is_segmented() {
        let record = repair_line("Dupont 1885 Médecin 12 rue de la Paix 2 à 4h", &headers()).unwrap();
        assert_eq!(record.len(), 5);
        assert_eq!(record[0], "Dupont");
        assert_eq!(record[1], "1885");
        assert_eq!(record[3], "Médecin 12 rue de la Paix");
        assert_eq!(record[4], "2 à 4h");
    }

    #[test]
    fn wide_gaps_act_as_columns() {
        let record = repair_line("Martin   1890   Chir.   rue Lafayette, 3", &headers()).unwrap();
        assert_eq!(record[0], "Martin");
        assert_eq!(record[1], "1890");
        assert_eq!(record[2], "Chir.");
        assert_eq!(record[3], "rue Lafayette, 3");
        assert_eq!(record[4], "");
    }

    #[test]
    fn year_extracted_from_inside_token() {
        let line = "Martin\tAnc. Int. Hôp.\treçu 1887\t12 rue X\t3 à 5\textra";
        let record = repair_line(line, &headers()).unwrap();
        assert_eq!(record[1], "1887");
        assert!(!record[2].contains("1887"));
        assert!(!record[3].contains("1887"));
        assert_eq!(record[2], "Anc. Int. Hôp.");
        assert_eq!(record[3], "12 rue X, extra");
        assert_eq!(record[4], "3 à 5");
    }

    #[test]
    fn hours_token_moved_verbatim() {
        let record = repair_line("Durand\t1888\t2 à 4\tbd Haussmann\tx", &headers()).unwrap();
        assert_eq!(record[4], "2 à 4");
        assert!(!record[3].contains("2 à 4"));
        assert_eq!(record[3], "bd Haussmann, x");
    }

    #[test]
    fn hours_prefers_last_matching_token() {
        let record = repair_line("Roux\tLun\tr. de Rivoli\tmidi", &headers()).unwrap();
        assert_eq!(record[4], "midi");
        assert_eq!(record[3], "Lun, r. de Rivoli");
    }

    #[test]
    fn note_with_comma_splits_into_address() {
        let record = repair_line("Petit\tAnc. Int. Hôp., 12 rue de la Paix", &headers()).unwrap();
        assert_eq!(record[2], "Anc. Int. Hôp.");
        assert_eq!(record[3], "12 rue de la Paix");
    }

    #[test]
    fn note_without_comma_is_whole_token() {
        let record = repair_line("Blanc\tProf. agr.\tquai Voltaire\tx\ty\tz", &headers()).unwrap();
        assert_eq!(record[2], "Prof. agr.");
        assert_eq!(record[3], "quai Voltaire, x, y, z");
    }

    #[test]
    fn note_patterns_first_match_wins() {
        assert_eq!(note_pattern("Hôp."), Some(10));
        // "Ch. Hôp." and "M. Hôp." also match the bare "Hôp." rule; the earlier pattern is reported.
        assert!(NOTE_PATTERNS[10].is_match("Ch. Hôp."));
        assert_eq!(note_pattern("Ch. Hôp."), Some(2));
        assert_eq!(note_pattern("M. Hôp."), Some(1));
        assert_eq!(note_pattern("rue de la Paix"), None);
        assert_eq!(note_pattern("méd."), Some(11));
    }

    #[test]
    fn overlapping_note_patterns_split_the_same_way() {
        for note in ["Ch. Hôp.", "M. Hôp.", "Hôp."] {
            let line = format!("Martin\t1890\t{note}, 3 rue Jacob\tLun. 2 à 4");
            let record = repair_line(&line, &headers()).unwrap();
            assert_eq!(record[2], note);
            assert_eq!(record[3], "3 rue Jacob");
            assert_eq!(record[4], "Lun. 2 à 4");
        }
    }

    #[test]
    fn fields_padded_to_header_length() {
        let mut wide = headers();
        wide.push("remarques".into());
        let record = repair_line("Dupont\t1885", &wide).unwrap();
        assert_eq!(record.len(), 6);

        let narrow: Vec<String> = vec!["nom".into(), "année".into()];
        let record = repair_line("Dupont\t1885\tx\ty\tz", &narrow).unwrap();
        assert_eq!(record, vec!["Dupont", "1885"]);
    }

    #[test]
    fn repair_is_deterministic() {
        let line = "Lévy  1886  Ex-Int. des Hôp., 4 place Vendôme  Mar. Jeu. 2 à 4";
        let a = repair_line(line, &headers());
        let b = repair_line(line, &headers());
        assert_eq!(a, b);
        assert_eq!(a.unwrap().len(), 5);
    }

    #[test]
    fn nothing_to_repair_fails() {
        assert_eq!(repair_line(" \t \t", &headers()), None);
        assert_eq!(repair_line("Dupont\t1885", &[]), None);
    }

    #[test]
    fn headerless_five_column_file_uses_default_header() {
        let text = "Dupont\t1885\t\t12 rue X\t2 à 4\nMartin 1887 rue Y\n";
        let table = parse_tsv(text);
        assert_eq!(table.headers, headers());
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.issues.len(), 1);
        assert_eq!(table.issues[0].line_number, 2);
        assert_eq!(table.issues[0].tab_count, 0);
        assert!(table.issues[0].repaired);
    }

    #[test]
    fn header_line_numbers_start_at_two() {
        let text = "\u{FEFF}nom\tannée\tnotes\tadresse\thoraires\n\nDupont\t1885\n";
        let table = parse_tsv(text);
        assert_eq!(table.headers[0], "nom");
        assert_eq!(table.issues[0].line_number, 3);
        assert_eq!(table.rows[0][1], "1885");
    }

    #[test]
    fn empty_header_line_leaves_lines_unrepaired() {
        let table = parse_tsv("\nDupont\t1885\n");
        assert!(table.headers.is_empty());
        assert!(table.rows.is_empty());
        assert_eq!(table.failed(), 1);
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(RepairOutcome::NoIssues.to_string(), "no issues detected");
        assert_eq!(RepairOutcome::FullyRepaired.to_string(), "fully repaired");
        assert_eq!(RepairOutcome::Unrepaired(2).to_string(), "2 line(s) unrepaired");
    }

    #[test]
    fn to_tsv_round_trips_header_and_rows() {
        let table = parse_tsv("nom\tannée\nA\t1\n");
        assert_eq!(table.to_tsv(), "nom\tannée\nA\t1\n");
    }
}
