//! Batch request files: one JSONL line per benchmark page.
//!
//! Two wire shapes are produced, one per vendor:
//!
//! ```text
//! OpenAI  {"custom_id": "1887-0032", "method": "POST", "url": "/v1/responses", "body": {...}}
//! Gemini  {"key": "1887-0032", "request": {"contents": [{"parts": [...]}]}}
//! ```
//!
//! and three request families: OCR text only, page image only, and page
//! image plus OCR text. Images are referenced either by an uploaded file id
//! (from the mapping written by [`crate::pipeline::upload`]) or inlined as
//! base64 read from disk.
//!
//! Large image batches exceed the vendors' input-file limits, so the
//! writer can rotate into `<stem>-part-NNNN.jsonl` chunks once a chunk
//! reaches a byte budget.

use crate::benchmark::{find_image, BenchmarkRow};
use crate::config::{ReasoningEffort, Vendor};
use crate::error::{ItemError, PipelineError};
use crate::output::BuildSummary;
use crate::pipeline::upload::UploadRecord;
use crate::prompts::{image_text_prompt, text_prompt, InstructionKind};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Endpoint every OpenAI batch line targets.
pub const OPENAI_ENDPOINT: &str = "/v1/responses";

// ── Wire shapes ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiRequest {
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: OpenAiBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiBody {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub input: OpenAiInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reasoning {
    pub effort: ReasoningEffort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAiInput {
    Text(String),
    Messages(Vec<OpenAiMessage>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    pub content: Vec<OpenAiContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAiContent {
    InputText {
        text: String,
    },
    InputImage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        /// `data:` URL for inlined images.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiRequestLine {
    pub key: String,
    pub request: GeminiRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(
        rename = "generationConfig",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiContent {
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeminiPart {
    Text(String),
    InlineData { mime_type: String, data: String },
    FileData {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        file_uri: String,
    },
}

/// One request line of either vendor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BatchRequest {
    OpenAi(OpenAiRequest),
    Gemini(GeminiRequestLine),
}

impl BatchRequest {
    pub fn key(&self) -> &str {
        match self {
            BatchRequest::OpenAi(r) => &r.custom_id,
            BatchRequest::Gemini(r) => &r.key,
        }
    }
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Which inputs a request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Text,
    Image,
    ImageText,
}

impl RequestKind {
    pub fn instruction_kind(self) -> InstructionKind {
        match self {
            RequestKind::Text => InstructionKind::Text,
            RequestKind::Image | RequestKind::ImageText => InstructionKind::Image,
        }
    }

    fn needs_image(self) -> bool {
        !matches!(self, RequestKind::Text)
    }
}

/// Where page images come from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Previously uploaded files, keyed by custom id.
    Uploaded(HashMap<String, UploadRecord>),
    /// Read `<root>/<year>/<year>-page-<page>.*` and inline it as base64.
    Inline { images_root: PathBuf },
    /// Text-only requests.
    TextOnly,
}

/// Result of building one row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Ready(BatchRequest),
    Skipped(ItemError),
}

/// Builds request lines for one vendor, model and request family.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    pub vendor: Vendor,
    pub model: String,
    pub kind: RequestKind,
    /// Assembled instructions (see [`crate::prompts`]).
    pub instructions: String,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub images: ImageSource,
}

impl RequestBuilder {
    /// Build the request for `row`.
    ///
    /// A missing image or uploaded id skips the row; an image that exists
    /// but cannot be read is fatal.
    pub fn build(&self, row: &BenchmarkRow) -> Result<RowOutcome, PipelineError> {
        let key = row.key();
        let image = if self.kind.needs_image() {
            match self.image_ref(row)? {
                Ok(image) => Some(image),
                Err(problem) => return Ok(RowOutcome::Skipped(problem)),
            }
        } else {
            None
        };

        let request = match self.vendor {
            Vendor::OpenAi => BatchRequest::OpenAi(self.openai_request(key, row, image)),
            Vendor::Gemini => BatchRequest::Gemini(self.gemini_request(key, row, image)),
        };
        Ok(RowOutcome::Ready(request))
    }

    fn prompt_for(&self, row: &BenchmarkRow) -> String {
        match self.kind {
            RequestKind::Text => text_prompt(&self.instructions, &row.text),
            RequestKind::Image => self.instructions.clone(),
            RequestKind::ImageText => image_text_prompt(&self.instructions, &row.text),
        }
    }

    fn image_ref(&self, row: &BenchmarkRow) -> Result<Result<ImageRef, ItemError>, PipelineError> {
        let key = row.key();
        match &self.images {
            ImageSource::Uploaded(mapping) => {
                let record = mapping.get(&key).filter(|r| !r.file_id.is_empty());
                Ok(match record {
                    Some(r) => Ok(ImageRef::Uploaded {
                        file_id: r.file_id.clone(),
                        uri: r.uri.clone().unwrap_or_else(|| r.file_id.clone()),
                        mime_type: r.mime_type.clone(),
                    }),
                    None => Err(ItemError::MissingFileId { key }),
                })
            }
            ImageSource::Inline { images_root } => {
                let Some(path) = find_image(images_root, &row.year, &row.page) else {
                    return Ok(Err(ItemError::ImageNotFound { key }));
                };
                let bytes = std::fs::read(&path).map_err(|e| PipelineError::read(&path, e))?;
                Ok(Ok(ImageRef::Inline {
                    mime_type: image_mime_type(&path),
                    data: base64::engine::general_purpose::STANDARD.encode(bytes),
                }))
            }
            ImageSource::TextOnly => Ok(Err(ItemError::ImageNotFound { key })),
        }
    }

    fn openai_request(&self, key: String, row: &BenchmarkRow, image: Option<ImageRef>) -> OpenAiRequest {
        let body = match image {
            None => OpenAiBody {
                model: self.model.clone(),
                reasoning: self.reasoning_effort.map(|effort| Reasoning { effort }),
                instructions: Some(self.instructions.clone()),
                input: OpenAiInput::Text(row.text.clone()),
            },
            Some(image) => {
                let image = match image {
                    ImageRef::Uploaded { file_id, .. } => OpenAiContent::InputImage {
                        file_id: Some(file_id),
                        image_url: None,
                    },
                    ImageRef::Inline { mime_type, data } => OpenAiContent::InputImage {
                        file_id: None,
                        image_url: Some(format!("data:{mime_type};base64,{data}")),
                    },
                };
                OpenAiBody {
                    model: self.model.clone(),
                    reasoning: None,
                    instructions: None,
                    input: OpenAiInput::Messages(vec![OpenAiMessage {
                        role: "user".to_string(),
                        content: vec![
                            OpenAiContent::InputText {
                                text: self.prompt_for(row),
                            },
                            image,
                        ],
                    }]),
                }
            }
        };
        OpenAiRequest {
            custom_id: key,
            method: "POST".to_string(),
            url: OPENAI_ENDPOINT.to_string(),
            body,
        }
    }

    fn gemini_request(&self, key: String, row: &BenchmarkRow, image: Option<ImageRef>) -> GeminiRequestLine {
        let mut parts = vec![GeminiPart::Text(self.prompt_for(row))];
        let mut generation_config = None;
        match image {
            Some(ImageRef::Uploaded { uri, mime_type, .. }) => {
                parts.push(GeminiPart::FileData {
                    mime_type,
                    file_uri: uri,
                });
                if self.kind == RequestKind::Image {
                    generation_config = Some(GenerationConfig { temperature: 0.0 });
                }
            }
            Some(ImageRef::Inline { mime_type, data }) => {
                parts.push(GeminiPart::InlineData { mime_type, data });
            }
            None => {}
        }
        GeminiRequestLine {
            key,
            request: GeminiRequest {
                contents: vec![GeminiContent { parts }],
                generation_config,
            },
        }
    }
}

#[derive(Debug, Clone)]
enum ImageRef {
    Uploaded {
        file_id: String,
        uri: String,
        mime_type: Option<String>,
    },
    Inline {
        mime_type: String,
        data: String,
    },
}

/// MIME type from the file extension; PNG when unknown.
pub fn image_mime_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "image/png".to_string())
}

// ── Writing ──────────────────────────────────────────────────────────────────

/// Writes JSONL lines to one file, or rotates across chunk files.
pub struct JsonlWriter {
    out_path: PathBuf,
    chunk_dir: Option<PathBuf>,
    max_bytes: u64,
    current: Option<BufWriter<File>>,
    current_bytes: u64,
    next_index: usize,
    files: Vec<PathBuf>,
}

impl JsonlWriter {
    /// Single output file at `out_path`.
    pub fn single(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            chunk_dir: None,
            max_bytes: u64::MAX,
            current: None,
            current_bytes: 0,
            next_index: 1,
            files: Vec::new(),
        }
    }

    /// Chunks `<stem>-part-NNNN.jsonl` in `<out_dir>/<stem>-chunks/`, each
    /// closed once it reaches `max_bytes`.
    pub fn chunked(out_path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        let out_path = out_path.into();
        let chunk_dir = out_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{}-chunks", file_stem(&out_path)));
        Self {
            chunk_dir: Some(chunk_dir),
            max_bytes: max_bytes.max(1),
            ..Self::single(out_path)
        }
    }

    fn open_next(&mut self) -> Result<(), PipelineError> {
        let path = match &self.chunk_dir {
            Some(dir) => dir.join(format!(
                "{}-part-{:04}.jsonl",
                file_stem(&self.out_path),
                self.next_index
            )),
            None => self.out_path.clone(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::write(parent, e))?;
        }
        let file = File::create(&path).map_err(|e| PipelineError::write(&path, e))?;
        debug!("Writing requests to {}", path.display());
        self.files.push(path);
        self.next_index += 1;
        self.current_bytes = 0;
        self.current = Some(BufWriter::new(file));
        Ok(())
    }

    pub fn write_line(&mut self, line: &str) -> Result<(), PipelineError> {
        if self.current.is_none() {
            self.open_next()?;
        }
        let Some(writer) = self.current.as_mut() else {
            return Err(PipelineError::Internal("request writer not open".into()));
        };
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.write_all(b"\n"))
            .map_err(|e| PipelineError::write(&self.out_path, e))?;
        self.current_bytes += line.len() as u64 + 1;
        if self.chunk_dir.is_some() && self.current_bytes >= self.max_bytes {
            self.close_current()?;
        }
        Ok(())
    }

    fn close_current(&mut self) -> Result<(), PipelineError> {
        if let Some(mut writer) = self.current.take() {
            writer
                .flush()
                .map_err(|e| PipelineError::write(&self.out_path, e))?;
        }
        Ok(())
    }

    /// Flush and return the files written, in order.
    ///
    /// An unchunked writer always produces its file, even when empty.
    pub fn finish(mut self) -> Result<Vec<PathBuf>, PipelineError> {
        if self.files.is_empty() && self.chunk_dir.is_none() {
            self.open_next()?;
        }
        self.close_current()?;
        Ok(self.files)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "requests".to_string())
}

/// Build every row's request and write them to `out_path` (or chunks of it).
pub fn write_requests(
    rows: &[BenchmarkRow],
    builder: &RequestBuilder,
    out_path: &Path,
    chunk_max_bytes: Option<u64>,
) -> Result<BuildSummary, PipelineError> {
    let mut writer = match chunk_max_bytes {
        Some(max) => JsonlWriter::chunked(out_path, max),
        None => JsonlWriter::single(out_path),
    };
    let mut summary = BuildSummary::default();

    for row in rows {
        if row.text.trim().is_empty() {
            summary.missing_text += 1;
        }
        match builder.build(row)? {
            RowOutcome::Ready(request) => {
                let line = serde_json::to_string(&request)
                    .map_err(|e| PipelineError::Internal(format!("serialise request: {e}")))?;
                writer.write_line(&line)?;
                summary.written += 1;
            }
            RowOutcome::Skipped(problem) => {
                warn!("{problem}");
                summary.problems.push(problem);
            }
        }
    }

    summary.files = writer.finish()?;
    info!(
        "Wrote {} {} request(s) across {} file(s)",
        summary.written,
        builder.vendor,
        summary.files.len()
    );
    Ok(summary)
}

/// Default request file name: `<source>-requests-<model>.jsonl`.
pub fn default_request_file_name(source: &str, model: &str) -> String {
    format!("{source}-requests-{model}.jsonl")
}

/// Source label of a benchmark file: the last `-` segment of its stem
/// (`rosenwald-benchmark-original.tsv` → `original`).
pub fn source_label(benchmark: &Path) -> String {
    let stem = file_stem(benchmark);
    stem.rsplit('-').next().unwrap_or(&stem).to_string()
}

// ── Validation ───────────────────────────────────────────────────────────────

const OPENAI_REQUIRED: &[&str] = &["custom_id", "method", "url", "body"];
const GEMINI_REQUIRED: &[&str] = &["key", "request"];

/// Top-level keys every request line must carry, the key naming the row and the payload key.
fn required_keys(vendor: Vendor) -> (&'static [&'static str], &'static str, &'static str) {
    match vendor {
        Vendor::OpenAi => (OPENAI_REQUIRED, "custom_id", "body"),
        Vendor::Gemini => (GEMINI_REQUIRED, "key", "request"),
    }
}

/// Check a request file before anything is uploaded.
///
/// Each non-blank line must be a JSON object with the vendor's required
/// keys, an object payload and a key not seen before. Returns the number of
/// requests. Any violation is fatal.
pub fn validate_request_file(path: &Path, vendor: Vendor) -> Result<usize, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::read(path, e))?;
    let (required, id_key, payload_key) = required_keys(vendor);
    let invalid = |line: usize, reason: String| PipelineError::InvalidRequestFile {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let mut seen = HashSet::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line_number = idx + 1;
        let line = line.map_err(|e| PipelineError::read(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .map_err(|e| invalid(line_number, format!("invalid JSON: {e}")))?;
        let Some(obj) = value.as_object() else {
            return Err(invalid(line_number, "not a JSON object".into()));
        };
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|k| !obj.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            return Err(invalid(line_number, format!("missing keys: {missing:?}")));
        }
        if !obj[payload_key].is_object() {
            return Err(invalid(line_number, format!("non-object {payload_key}")));
        }
        let id = match &obj[id_key] {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if !seen.insert(id.clone()) {
            return Err(invalid(line_number, format!("duplicate {id_key} '{id}'")));
        }
    }

    if seen.is_empty() {
        return Err(invalid(0, "no requests".into()));
    }
    debug!("Validated {} request(s) in {}", seen.len(), path.display());
    Ok(seen.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(year: &str, page: &str, text: &str) -> BenchmarkRow {
        BenchmarkRow {
            year: year.into(),
            page: page.into(),
            text: text.into(),
        }
    }

    fn builder(vendor: Vendor, kind: RequestKind, images: ImageSource) -> RequestBuilder {
        RequestBuilder {
            vendor,
            model: "m".into(),
            kind,
            instructions: "INSTR".into(),
            reasoning_effort: Some(ReasoningEffort::High),
            images,
        }
    }

    fn ready(outcome: RowOutcome) -> serde_json::Value {
        match outcome {
            RowOutcome::Ready(r) => serde_json::to_value(r).unwrap(),
            RowOutcome::Skipped(e) => panic!("skipped: {e}"),
        }
    }

    #[test]
    fn openai_text_request_shape() {
        let b = builder(Vendor::OpenAi, RequestKind::Text, ImageSource::TextOnly);
        let v = ready(b.build(&row("1887", "0032", "Dupont\nMartin")).unwrap());
        assert_eq!(
            v,
            json!({
                "custom_id": "1887-0032",
                "method": "POST",
                "url": "/v1/responses",
                "body": {
                    "model": "m",
                    "reasoning": {"effort": "high"},
                    "instructions": "INSTR",
                    "input": "Dupont\nMartin"
                }
            })
        );
    }

    #[test]
    fn gemini_text_request_shape() {
        let b = builder(Vendor::Gemini, RequestKind::Text, ImageSource::TextOnly);
        let v = ready(b.build(&row("1887", "0032", "Dupont")).unwrap());
        assert_eq!(
            v,
            json!({
                "key": "1887-0032",
                "request": {"contents": [{"parts": [{"text": "INSTR\n\n### TEXTE OCR\nDupont"}]}]}
            })
        );
    }

    fn uploaded(key: &str) -> ImageSource {
        let mut map = HashMap::new();
        map.insert(
            key.to_string(),
            UploadRecord {
                custom_id: key.to_string(),
                file_id: "files/abc".into(),
                uri: Some("https://files/abc".into()),
                mime_type: Some("image/png".into()),
                source_path: None,
            },
        );
        ImageSource::Uploaded(map)
    }

    #[test]
    fn openai_image_text_uses_file_id() {
        let b = builder(Vendor::OpenAi, RequestKind::ImageText, uploaded("1887-0032"));
        let v = ready(b.build(&row("1887", "0032", "")).unwrap());
        let content = &v["body"]["input"][0]["content"];
        assert_eq!(v["body"]["input"][0]["role"], "user");
        assert!(content[0]["text"].as_str().unwrap().ends_with("(aucun texte OCR fourni)"));
        assert_eq!(content[1], json!({"type": "input_image", "file_id": "files/abc"}));
        assert!(v["body"].get("reasoning").is_none());
    }

    #[test]
    fn gemini_image_uses_file_uri_and_zero_temperature() {
        let b = builder(Vendor::Gemini, RequestKind::Image, uploaded("1887-0032"));
        let v = ready(b.build(&row("1887", "0032", "x")).unwrap());
        let parts = &v["request"]["contents"][0]["parts"];
        assert_eq!(parts[0], json!({"text": "INSTR"}));
        assert_eq!(
            parts[1],
            json!({"file_data": {"mime_type": "image/png", "file_uri": "https://files/abc"}})
        );
        assert_eq!(v["request"]["generationConfig"]["temperature"], 0.0);
    }

    #[test]
    fn gemini_inline_image_is_base64() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("1887")).unwrap();
        std::fs::write(dir.path().join("1887/1887-page-0032.jpg"), b"abc").unwrap();
        let b = builder(
            Vendor::Gemini,
            RequestKind::ImageText,
            ImageSource::Inline {
                images_root: dir.path().to_path_buf(),
            },
        );
        let v = ready(b.build(&row("1887", "0032", "Dupont")).unwrap());
        let parts = &v["request"]["contents"][0]["parts"];
        assert_eq!(
            parts[1],
            json!({"inline_data": {"mime_type": "image/jpeg", "data": "YWJj"}})
        );
        assert!(parts[0]["text"]
            .as_str()
            .unwrap()
            .ends_with("### TEXTE OCR SUPPLÉMENTAIRE\nDupont"));
    }

    #[test]
    fn missing_image_or_id_skips_row() {
        let b = builder(Vendor::OpenAi, RequestKind::Image, uploaded("1887-0032"));
        let outcome = b.build(&row("1887", "0099", "")).unwrap();
        assert_eq!(
            outcome,
            RowOutcome::Skipped(ItemError::MissingFileId {
                key: "1887-0099".into()
            })
        );

        let dir = tempfile::tempdir().unwrap();
        let b = builder(
            Vendor::Gemini,
            RequestKind::Image,
            ImageSource::Inline {
                images_root: dir.path().to_path_buf(),
            },
        );
        assert!(matches!(
            b.build(&row("1887", "1", "")).unwrap(),
            RowOutcome::Skipped(ItemError::ImageNotFound { .. })
        ));
    }

    #[test]
    fn write_requests_counts_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("original-requests-m.jsonl");
        let rows = vec![row("1887", "1", "a"), row("1887", "2", "")];
        let b = builder(Vendor::Gemini, RequestKind::Text, ImageSource::TextOnly);
        let summary = write_requests(&rows, &b, &out, None).unwrap();
        assert_eq!(summary.written, 2);
        assert_eq!(summary.missing_text, 1);
        assert_eq!(summary.files, vec![out.clone()]);
        assert_eq!(validate_request_file(&out, Vendor::Gemini).unwrap(), 2);
    }

    #[test]
    fn chunked_writer_rotates_on_budget() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("reqs.jsonl");
        let mut w = JsonlWriter::chunked(&out, 10);
        w.write_line("0123456789").unwrap();
        w.write_line("short").unwrap();
        w.write_line("x").unwrap();
        let files = w.finish().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("reqs-chunks/reqs-part-0001.jsonl"));
        assert!(files[1].ends_with("reqs-chunks/reqs-part-0002.jsonl"));
        assert_eq!(std::fs::read_to_string(&files[1]).unwrap(), "short\nx\n");
    }

    #[test]
    fn validation_rejects_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.jsonl");

        std::fs::write(&path, "{\"key\":\"a\",\"request\":{}}\nnot json\n").unwrap();
        let err = validate_request_file(&path, Vendor::Gemini).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequestFile { line: 2, .. }));

        std::fs::write(&path, "{\"key\":\"a\"}\n").unwrap();
        let err = validate_request_file(&path, Vendor::Gemini).unwrap_err();
        assert!(err.to_string().contains("missing keys"));

        std::fs::write(&path, "{\"key\":\"a\",\"request\":\"x\"}\n").unwrap();
        assert!(validate_request_file(&path, Vendor::Gemini).is_err());

        std::fs::write(
            &path,
            "{\"key\":\"a\",\"request\":{}}\n\n{\"key\":\"a\",\"request\":{}}\n",
        )
        .unwrap();
        let err = validate_request_file(&path, Vendor::Gemini).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequestFile { line: 3, .. }));

        std::fs::write(&path, "\n").unwrap();
        assert!(validate_request_file(&path, Vendor::OpenAi).is_err());
    }

    #[test]
    fn source_label_takes_last_segment() {
        assert_eq!(
            source_label(Path::new("batch/rosenwald-benchmark-tesseract.tsv")),
            "tesseract"
        );
        assert_eq!(
            default_request_file_name("original", "gpt-5-mini"),
            "original-requests-gpt-5-mini.jsonl"
        );
    }
}
