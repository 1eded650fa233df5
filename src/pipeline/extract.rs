//! Turn vendor batch output lines into one `<key>.tsv` per page.
//!
//! OpenAI lines look like
//! `{"custom_id", "response": {"status_code": 200, "body": {...}}}` and
//! Gemini lines like `{"key", "response": {"candidates": [...]}}`; the
//! shape is detected per line so mixed or renamed files still extract.
//! A line that is not JSON, failed on the vendor side, or carries no text
//! is counted and reported; it never stops the file.

use crate::config::Vendor;
use crate::error::{ItemError, PipelineError};
use crate::output::ExtractSummary;
use crate::pipeline::discover_files;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Restrict a key to `[A-Za-z0-9._-]`, replacing everything else with `_`.
pub fn safe_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Output folder name for `<source>-requests-<model>.output.jsonl`: `<source>-<model>`.
///
/// Files not following that pattern give `unknown-<name>`.
pub fn infer_bucket_name(output_file: &Path) -> String {
    let name = output_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = [".output.jsonl", ".errors.jsonl", ".jsonl"]
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .unwrap_or(&name);
    match base.split_once("-requests-") {
        Some((source, model)) => format!("{source}-{model}"),
        None => format!("unknown-{base}"),
    }
}

/// Which vendor wrote a response line.
fn line_vendor(obj: &Value) -> Vendor {
    let response = &obj["response"];
    if response.get("candidates").is_some() || obj.get("key").is_some() {
        Vendor::Gemini
    } else {
        Vendor::OpenAi
    }
}

/// Text of an OpenAI Responses API batch line.
fn openai_text(obj: &Value) -> Result<String, String> {
    let response = &obj["response"];
    if !response.is_object() {
        return Err("missing response".into());
    }
    match response["status_code"].as_u64() {
        Some(200) => {}
        other => {
            return Err(format!(
                "status_code {}",
                other.map_or_else(|| "missing".to_string(), |c| c.to_string())
            ))
        }
    }
    let body = &response["body"];
    if let Some(text) = body["output_text"].as_str().filter(|t| !t.trim().is_empty()) {
        return Ok(text.to_string());
    }
    let output = body["output"]
        .as_array()
        .ok_or_else(|| "missing output list".to_string())?;
    let message = output
        .iter()
        .find(|item| item["type"] == "message")
        .ok_or_else(|| "no message output".to_string())?;
    message["content"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|c| c["type"] == "output_text")
        .filter_map(|c| c["text"].as_str())
        .find(|t| !t.trim().is_empty())
        .map(String::from)
        .ok_or_else(|| "no output_text content".to_string())
}

/// First non-empty text part of the first candidate of a Gemini line.
fn gemini_text(obj: &Value) -> Result<String, String> {
    if let Some(message) = obj["error"]["message"].as_str() {
        return Err(message.to_string());
    }
    let response = &obj["response"];
    if !response.is_object() {
        return Err("missing response".into());
    }
    let parts = response["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| "no candidate parts".to_string())?;
    parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .find(|t| !t.trim().is_empty())
        .map(String::from)
        .ok_or_else(|| "no text part".to_string())
}

/// Key and text of one parsed output line.
pub fn extract_line(obj: &Value, line_number: usize) -> (String, Result<String, String>) {
    let key = obj["key"]
        .as_str()
        .or_else(|| obj["custom_id"].as_str())
        .filter(|k| !k.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("row-{line_number}"));
    let text = match line_vendor(obj) {
        Vendor::OpenAi => openai_text(obj),
        Vendor::Gemini => gemini_text(obj),
    };
    (key, text)
}

/// Extract every line of `output_file` into `out_dir`.
pub fn extract_output_file(
    output_file: &Path,
    out_dir: &Path,
) -> Result<ExtractSummary, PipelineError> {
    let text =
        std::fs::read_to_string(output_file).map_err(|e| PipelineError::read(output_file, e))?;
    std::fs::create_dir_all(out_dir).map_err(|e| PipelineError::write(out_dir, e))?;

    let name = output_file.display();
    let mut summary = ExtractSummary {
        out_dir: out_dir.to_path_buf(),
        ..Default::default()
    };
    for (idx, line) in text.lines().enumerate() {
        let line_number = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let obj: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!("{}: skip line {}: invalid JSON ({})", name, line_number, e);
                summary.parse_errors += 1;
                summary.problems.push(ItemError::InvalidJson {
                    line: line_number,
                    detail: e.to_string(),
                });
                continue;
            }
        };

        let (key, extracted) = extract_line(&obj, line_number);
        match extracted {
            Ok(text) => {
                let path = out_dir.join(format!("{}.tsv", safe_stem(&key)));
                std::fs::write(&path, format!("{}\n", text.trim()))
                    .map_err(|e| PipelineError::write(&path, e))?;
                debug!("{} -> {}", key, path.display());
                summary.written += 1;
            }
            Err(detail) => {
                warn!("{}: missing text for {} (line {}): {}", name, key, line_number, detail);
                summary.missing += 1;
                summary.problems.push(ItemError::MissingText {
                    key,
                    line: line_number,
                    detail,
                });
            }
        }
    }

    info!(
        "{}: written={} missing={} parse_errors={} -> {}",
        name,
        summary.written,
        summary.missing,
        summary.parse_errors,
        out_dir.display()
    );
    Ok(summary)
}

/// Extract several output files into one folder. Missing files are skipped.
pub fn extract_output_files(
    output_files: &[PathBuf],
    out_dir: &Path,
) -> Result<ExtractSummary, PipelineError> {
    let mut total = ExtractSummary {
        out_dir: out_dir.to_path_buf(),
        ..Default::default()
    };
    for file in output_files {
        if !file.is_file() {
            warn!("skip missing file: {}", file.display());
            continue;
        }
        total.merge(extract_output_file(file, out_dir)?);
    }
    Ok(total)
}

/// Output files in `dir` matching `pattern` (e.g. `*.output.jsonl`).
pub fn find_output_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::FileNotFound {
            path: dir.to_path_buf(),
        });
    }
    let files = discover_files(dir, pattern, false)?;
    if files.is_empty() {
        return Err(PipelineError::InvalidConfig(format!(
            "no files matching '{}' in {}",
            pattern,
            dir.display()
        )));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn safe_stem_replaces_unsafe_chars() {
        assert_eq!(safe_stem("1887-0032"), "1887-0032");
        assert_eq!(safe_stem("a/b c:é"), "a_b_c__");
    }

    #[test]
    fn bucket_from_request_naming() {
        assert_eq!(
            infer_bucket_name(Path::new("raw/original-requests-gpt-5-mini.output.jsonl")),
            "original-gpt-5-mini"
        );
        assert_eq!(infer_bucket_name(Path::new("foo.jsonl")), "unknown-foo");
    }

    #[test]
    fn openai_output_text_and_message_forms() {
        let direct = json!({"custom_id": "a", "response": {"status_code": 200, "body": {"output_text": "x\ty"}}});
        assert_eq!(extract_line(&direct, 1).1.unwrap(), "x\ty");

        let nested = json!({"custom_id": "b", "response": {"status_code": 200, "body": {"output": [
            {"type": "reasoning"},
            {"type": "message", "content": [{"type": "output_text", "text": "nom\tannée"}]}
        ]}}});
        let (key, text) = extract_line(&nested, 2);
        assert_eq!(key, "b");
        assert_eq!(text.unwrap(), "nom\tannée");
    }

    #[test]
    fn openai_non_200_is_missing() {
        let line = json!({"custom_id": "c", "response": {"status_code": 500, "body": {}}});
        assert_eq!(extract_line(&line, 1).1.unwrap_err(), "status_code 500");
    }

    #[test]
    fn gemini_first_non_empty_part() {
        let line = json!({"key": "1887-1", "response": {"candidates": [
            {"content": {"parts": [{"text": "  "}, {"text": "Dupont\t1885"}]}}
        ]}});
        assert_eq!(extract_line(&line, 1).1.unwrap(), "Dupont\t1885");

        let failed = json!({"key": "1887-2", "error": {"message": "blocked"}});
        assert_eq!(extract_line(&failed, 2).1.unwrap_err(), "blocked");
    }

    #[test]
    fn missing_key_falls_back_to_row_number() {
        let line = json!({"response": {"candidates": [{"content": {"parts": [{"text": "t"}]}}]}});
        assert_eq!(extract_line(&line, 7).0, "row-7");
    }

    #[test]
    fn extract_file_counts_everything() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("original-requests-m.output.jsonl");
        std::fs::write(
            &input,
            concat!(
                "{\"key\":\"1887/1\",\"response\":{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"\\nA\\tB\\n\\n\"}]}}]}}\n",
                "oops\n",
                "\n",
                "{\"key\":\"1887-2\",\"response\":{\"candidates\":[]}}\n",
            ),
        )
        .unwrap();
        let out = dir.path().join("tsv");
        let summary = extract_output_file(&input, &out).unwrap();
        assert_eq!(summary.written, 1);
        assert_eq!(summary.parse_errors, 1);
        assert_eq!(summary.missing, 1);
        assert_eq!(std::fs::read_to_string(out.join("1887_1.tsv")).unwrap(), "A\tB\n");
    }

    #[test]
    fn multiple_files_combine_and_skip_missing() {
        let dir = tempfile::tempdir().unwrap();
        let line = |k: &str| {
            format!("{{\"key\":\"{k}\",\"response\":{{\"candidates\":[{{\"content\":{{\"parts\":[{{\"text\":\"x\"}}]}}}}]}}}}\n")
        };
        std::fs::write(dir.path().join("a.output.jsonl"), line("1")).unwrap();
        std::fs::write(dir.path().join("b.output.jsonl"), line("2")).unwrap();
        let mut files = find_output_files(dir.path(), "*.output.jsonl").unwrap();
        files.push(dir.path().join("gone.output.jsonl"));

        let out = dir.path().join("combined");
        let summary = extract_output_files(&files, &out).unwrap();
        assert_eq!(summary.written, 2);
        assert!(out.join("1.tsv").is_file() && out.join("2.tsv").is_file());
    }
}
