//! Vendor batch APIs: file upload, batch creation, status and download.
//!
//! Both vendors are reached over their public REST endpoints:
//!
//! ```text
//!            upload_file          create_batch          get_batch             download_file
//! OpenAI  POST /files          POST /batches         GET /batches/{id}     GET /files/{id}/content
//! Gemini  POST upload/files    POST models/{m}:      GET {batch name}      GET download/{file}:download
//!         (resumable)          batchGenerateContent
//! ```
//!
//! The pipeline stages are generic over [`FileStore`] and [`BatchApi`] so
//! they can be driven by [`VendorClient`] in production and by in-memory
//! fakes in tests. Vendor states are folded into one [`JobState`].

use crate::config::{PipelineConfig, Vendor};
use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

// ── Shared types ─────────────────────────────────────────────────────────────

/// What an uploaded file is for. OpenAI needs it; Gemini ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePurpose {
    /// A JSONL batch request file.
    Batch,
    /// A page image referenced from requests.
    Vision,
}

impl FilePurpose {
    fn as_openai(self) -> &'static str {
        match self {
            FilePurpose::Batch => "batch",
            FilePurpose::Vision => "vision",
        }
    }
}

/// A file stored on the vendor side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    /// OpenAI file id or Gemini file name (`files/...`).
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A submitted batch job, persisted as the `.batch.json` sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub vendor: Vendor,
    /// OpenAI batch id or Gemini batch name (`batches/...`).
    pub id: String,
    pub model: String,
    pub input_file_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounts {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
}

/// One status poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStatus {
    pub state: JobState,
    /// The vendor's own state string.
    pub raw_state: String,
    pub output_file: Option<String>,
    pub error_file: Option<String>,
    pub request_counts: Option<RequestCounts>,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Job-level error messages reported by the vendor.
    pub errors: Vec<String>,
}

impl BatchStatus {
    pub fn new(state: JobState, raw_state: impl Into<String>) -> Self {
        Self {
            state,
            raw_state: raw_state.into(),
            output_file: None,
            error_file: None,
            request_counts: None,
            created_at: None,
            completed_at: None,
            errors: Vec::new(),
        }
    }
}

// ── Traits ───────────────────────────────────────────────────────────────────

/// Vendor file storage.
pub trait FileStore: Send + Sync {
    fn upload_file(
        &self,
        path: &Path,
        purpose: FilePurpose,
        display_name: &str,
    ) -> impl Future<Output = Result<UploadedFile, PipelineError>> + Send;

    fn download_file(
        &self,
        file_id: &str,
    ) -> impl Future<Output = Result<Vec<u8>, PipelineError>> + Send;
}

/// Vendor batch jobs over an uploaded request file.
pub trait BatchApi: FileStore {
    fn vendor(&self) -> Vendor;

    fn create_batch(
        &self,
        input: &UploadedFile,
        model: &str,
        display_name: &str,
    ) -> impl Future<Output = Result<JobHandle, PipelineError>> + Send;

    fn get_batch(
        &self,
        handle: &JobHandle,
    ) -> impl Future<Output = Result<BatchStatus, PipelineError>> + Send;
}

// ── HTTP helpers ─────────────────────────────────────────────────────────────

fn http_client(vendor: Vendor, timeout_secs: u64) -> Result<reqwest::Client, PipelineError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::VendorNotConfigured {
            vendor,
            hint: format!("could not build HTTP client: {e}"),
        })
}

fn transport(vendor: Vendor) -> impl Fn(reqwest::Error) -> PipelineError {
    move |e| PipelineError::Transport {
        vendor,
        reason: e.to_string(),
    }
}

fn unexpected(vendor: Vendor, detail: impl Into<String>) -> PipelineError {
    PipelineError::UnexpectedResponse {
        vendor,
        detail: detail.into(),
    }
}

/// Pull `error.message` out of a vendor error body, else the body itself.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.chars().take(500).collect())
}

/// Map a non-success response to the matching error.
async fn check_status(
    vendor: Vendor,
    resp: reqwest::Response,
) -> Result<reqwest::Response, PipelineError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = api_error_message(&body);
    Err(match status.as_u16() {
        401 | 403 => PipelineError::AuthError {
            vendor,
            detail: message,
        },
        429 => PipelineError::RateLimitExceeded { vendor },
        code => PipelineError::ApiError {
            vendor,
            status: code,
            message,
        },
    })
}

async fn json_body(vendor: Vendor, resp: reqwest::Response) -> Result<Value, PipelineError> {
    let resp = check_status(vendor, resp).await?;
    resp.json::<Value>()
        .await
        .map_err(|e| unexpected(vendor, format!("invalid JSON body: {e}")))
}

/// MIME type sent with an upload.
fn upload_mime_type(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("jsonl") => "application/jsonl".to_string(),
        _ => mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

async fn open_for_upload(path: &Path) -> Result<(tokio::fs::File, u64), PipelineError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| PipelineError::read(path, e))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| PipelineError::read(path, e))?
        .len();
    Ok((file, len))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}

/// Integer fields arrive as numbers or, from Gemini, as decimal strings.
fn as_u64(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn rfc3339(v: &Value) -> Option<DateTime<Utc>> {
    v.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn unix_seconds(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

// ── OpenAI ───────────────────────────────────────────────────────────────────

/// Fold an OpenAI batch status into a [`JobState`].
pub fn openai_state(raw: &str) -> JobState {
    match raw {
        "validating" => JobState::Pending,
        "in_progress" | "finalizing" => JobState::Running,
        "completed" => JobState::Succeeded,
        "failed" | "expired" => JobState::Failed,
        "cancelling" | "cancelled" => JobState::Cancelled,
        _ => JobState::Pending,
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiFileObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiBatchObject {
    id: String,
    status: String,
    #[serde(default)]
    output_file_id: Option<String>,
    #[serde(default)]
    error_file_id: Option<String>,
    #[serde(default)]
    request_counts: Option<RequestCounts>,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    completed_at: Option<i64>,
    #[serde(default)]
    errors: Option<OpenAiBatchErrors>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiBatchErrors {
    #[serde(default)]
    data: Vec<OpenAiBatchError>,
}

#[derive(Debug, Deserialize)]
struct OpenAiBatchError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    line: Option<u64>,
}

impl OpenAiBatchObject {
    fn into_status(self) -> BatchStatus {
        let errors = self
            .errors
            .unwrap_or_default()
            .data
            .into_iter()
            .map(|e| {
                let mut msg = e.message.unwrap_or_else(|| "unknown error".into());
                if let Some(code) = e.code {
                    msg = format!("{code}: {msg}");
                }
                match e.line {
                    Some(line) => format!("line {line}: {msg}"),
                    None => msg,
                }
            })
            .collect();
        BatchStatus {
            state: openai_state(&self.status),
            raw_state: self.status,
            output_file: self.output_file_id,
            error_file: self.error_file_id,
            request_counts: self.request_counts,
            created_at: unix_seconds(self.created_at),
            completed_at: unix_seconds(self.completed_at),
            errors,
        }
    }
}

/// OpenAI Files + Batches client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    completion_window: String,
}

impl OpenAiClient {
    const VENDOR: Vendor = Vendor::OpenAi;

    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            http: http_client(Self::VENDOR, config.http_timeout_secs)?,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            completion_window: config.completion_window.clone(),
        })
    }

    /// Read `OPENAI_API_KEY` (and `OPENAI_BASE_URL`, if set).
    pub fn from_env(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let api_key = non_empty_env("OPENAI_API_KEY").ok_or_else(|| {
            PipelineError::VendorNotConfigured {
                vendor: Self::VENDOR,
                hint: "Set OPENAI_API_KEY.".into(),
            }
        })?;
        let base_url = non_empty_env("OPENAI_BASE_URL").unwrap_or_else(|| OPENAI_BASE_URL.into());
        Self::new(api_key, base_url, config)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl FileStore for OpenAiClient {
    async fn upload_file(
        &self,
        path: &Path,
        purpose: FilePurpose,
        _display_name: &str,
    ) -> Result<UploadedFile, PipelineError> {
        let (file, len) = open_for_upload(path).await?;
        let mime_type = upload_mime_type(path);
        let part = reqwest::multipart::Part::stream_with_length(reqwest::Body::from(file), len)
            .file_name(file_name_of(path))
            .mime_str(&mime_type)
            .map_err(transport(Self::VENDOR))?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", purpose.as_openai())
            .part("file", part);

        debug!("OpenAI upload {} ({} bytes)", path.display(), len);
        let resp = self
            .http
            .post(self.url("files"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(transport(Self::VENDOR))?;
        let body = json_body(Self::VENDOR, resp).await?;
        let file: OpenAiFileObject = serde_json::from_value(body)
            .map_err(|e| unexpected(Self::VENDOR, format!("file object: {e}")))?;
        Ok(UploadedFile {
            id: file.id,
            uri: None,
            mime_type: Some(mime_type),
        })
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, PipelineError> {
        let resp = self
            .http
            .get(self.url(&format!("files/{file_id}/content")))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport(Self::VENDOR))?;
        let resp = check_status(Self::VENDOR, resp).await?;
        let bytes = resp.bytes().await.map_err(transport(Self::VENDOR))?;
        Ok(bytes.to_vec())
    }
}

impl BatchApi for OpenAiClient {
    fn vendor(&self) -> Vendor {
        Self::VENDOR
    }

    async fn create_batch(
        &self,
        input: &UploadedFile,
        model: &str,
        display_name: &str,
    ) -> Result<JobHandle, PipelineError> {
        let payload = json!({
            "input_file_id": input.id,
            "endpoint": crate::pipeline::requests::OPENAI_ENDPOINT,
            "completion_window": self.completion_window,
            "metadata": {"description": display_name},
        });
        let resp = self
            .http
            .post(self.url("batches"))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(transport(Self::VENDOR))?;
        let body = json_body(Self::VENDOR, resp).await?;
        let batch: OpenAiBatchObject = serde_json::from_value(body)
            .map_err(|e| unexpected(Self::VENDOR, format!("batch object: {e}")))?;
        Ok(JobHandle {
            vendor: Self::VENDOR,
            id: batch.id,
            model: model.to_string(),
            input_file_id: input.id.clone(),
            display_name: display_name.to_string(),
            created_at: unix_seconds(batch.created_at),
        })
    }

    async fn get_batch(&self, handle: &JobHandle) -> Result<BatchStatus, PipelineError> {
        let resp = self
            .http
            .get(self.url(&format!("batches/{}", handle.id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport(Self::VENDOR))?;
        let body = json_body(Self::VENDOR, resp).await?;
        let batch: OpenAiBatchObject = serde_json::from_value(body)
            .map_err(|e| unexpected(Self::VENDOR, format!("batch object: {e}")))?;
        Ok(batch.into_status())
    }
}

// ── Gemini ───────────────────────────────────────────────────────────────────

/// Fold a Gemini batch state (`JOB_STATE_*` or `BATCH_STATE_*`) into a [`JobState`].
pub fn gemini_state(raw: &str) -> JobState {
    let bare = raw
        .strip_prefix("JOB_STATE_")
        .or_else(|| raw.strip_prefix("BATCH_STATE_"))
        .unwrap_or(raw);
    match bare {
        "PENDING" | "QUEUED" | "UNSPECIFIED" => JobState::Pending,
        "RUNNING" => JobState::Running,
        "SUCCEEDED" => JobState::Succeeded,
        "FAILED" | "EXPIRED" => JobState::Failed,
        "CANCELLED" | "CANCELLING" => JobState::Cancelled,
        _ => JobState::Pending,
    }
}

/// Parse a Gemini batch operation (`GET v1beta/batches/...`).
pub fn parse_gemini_batch(body: &Value) -> BatchStatus {
    let meta = &body["metadata"];
    let raw_state = meta["state"]
        .as_str()
        .or_else(|| body["state"].as_str())
        .unwrap_or("STATE_UNSPECIFIED")
        .to_string();
    let mut status = BatchStatus::new(gemini_state(&raw_state), raw_state);

    status.output_file = body["response"]["responsesFile"]
        .as_str()
        .or_else(|| meta["output"]["responsesFile"].as_str())
        .map(String::from);

    let stats = &meta["batchStats"];
    if stats.is_object() {
        status.request_counts = Some(RequestCounts {
            total: as_u64(&stats["requestCount"]).unwrap_or(0),
            completed: as_u64(&stats["successfulRequestCount"]).unwrap_or(0),
            failed: as_u64(&stats["failedRequestCount"]).unwrap_or(0),
        });
    }
    status.created_at = rfc3339(&meta["createTime"]);
    status.completed_at = rfc3339(&meta["endTime"]);
    if let Some(message) = body["error"]["message"].as_str() {
        status.errors.push(message.to_string());
    }
    status
}

/// Gemini Files + Batch client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    const VENDOR: Vendor = Vendor::Gemini;

    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            http: http_client(Self::VENDOR, config.http_timeout_secs)?,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Read `GEMINI_API_KEY` or `GOOGLE_API_KEY` (and `GEMINI_BASE_URL`, if set).
    pub fn from_env(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let api_key = non_empty_env("GEMINI_API_KEY")
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
            .ok_or_else(|| PipelineError::VendorNotConfigured {
                vendor: Self::VENDOR,
                hint: "Set GEMINI_API_KEY (or GOOGLE_API_KEY).".into(),
            })?;
        let base_url = non_empty_env("GEMINI_BASE_URL").unwrap_or_else(|| GEMINI_BASE_URL.into());
        Self::new(api_key, base_url, config)
    }

    fn api_headers(&self) -> Result<HeaderMap, PipelineError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&self.api_key).map_err(|_| {
            PipelineError::VendorNotConfigured {
                vendor: Self::VENDOR,
                hint: "API key contains characters not allowed in a header".into(),
            }
        })?;
        headers.insert("x-goog-api-key", key);
        Ok(headers)
    }
}

fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

impl FileStore for GeminiClient {
    async fn upload_file(
        &self,
        path: &Path,
        _purpose: FilePurpose,
        display_name: &str,
    ) -> Result<UploadedFile, PipelineError> {
        let (file, len) = open_for_upload(path).await?;
        let mime_type = upload_mime_type(path);

        // Resumable protocol: start a session, then send the bytes and finalise.
        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .headers(self.api_headers()?)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", len.to_string())
            .header("X-Goog-Upload-Header-Content-Type", &mime_type)
            .json(&json!({"file": {"display_name": display_name}}))
            .send()
            .await
            .map_err(transport(Self::VENDOR))?;
        let start = check_status(Self::VENDOR, start).await?;
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or_else(|| unexpected(Self::VENDOR, "upload session returned no upload URL"))?;

        debug!("Gemini upload {} ({} bytes)", path.display(), len);
        let resp = self
            .http
            .post(upload_url)
            .header(CONTENT_LENGTH, len)
            .header(CONTENT_TYPE, &mime_type)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(reqwest::Body::from(file))
            .send()
            .await
            .map_err(transport(Self::VENDOR))?;
        let body = json_body(Self::VENDOR, resp).await?;
        let file = &body["file"];
        let id = file["name"]
            .as_str()
            .ok_or_else(|| unexpected(Self::VENDOR, "uploaded file has no name"))?;
        Ok(UploadedFile {
            id: id.to_string(),
            uri: file["uri"].as_str().map(String::from),
            mime_type: file["mimeType"]
                .as_str()
                .map(String::from)
                .or(Some(mime_type)),
        })
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, PipelineError> {
        let resp = self
            .http
            .get(format!(
                "{}/download/v1beta/{}:download",
                self.base_url, file_id
            ))
            .query(&[("alt", "media")])
            .headers(self.api_headers()?)
            .send()
            .await
            .map_err(transport(Self::VENDOR))?;
        let resp = check_status(Self::VENDOR, resp).await?;
        let bytes = resp.bytes().await.map_err(transport(Self::VENDOR))?;
        Ok(bytes.to_vec())
    }
}

impl BatchApi for GeminiClient {
    fn vendor(&self) -> Vendor {
        Self::VENDOR
    }

    async fn create_batch(
        &self,
        input: &UploadedFile,
        model: &str,
        display_name: &str,
    ) -> Result<JobHandle, PipelineError> {
        let payload = json!({
            "batch": {
                "display_name": display_name,
                "input_config": {"file_name": input.id},
            }
        });
        let resp = self
            .http
            .post(format!(
                "{}/v1beta/{}:batchGenerateContent",
                self.base_url,
                model_path(model)
            ))
            .headers(self.api_headers()?)
            .json(&payload)
            .send()
            .await
            .map_err(transport(Self::VENDOR))?;
        let body = json_body(Self::VENDOR, resp).await?;
        let name = body["name"]
            .as_str()
            .ok_or_else(|| unexpected(Self::VENDOR, "batch operation has no name"))?;
        Ok(JobHandle {
            vendor: Self::VENDOR,
            id: name.to_string(),
            model: model.to_string(),
            input_file_id: input.id.clone(),
            display_name: display_name.to_string(),
            created_at: rfc3339(&body["metadata"]["createTime"]),
        })
    }

    async fn get_batch(&self, handle: &JobHandle) -> Result<BatchStatus, PipelineError> {
        let resp = self
            .http
            .get(format!("{}/v1beta/{}", self.base_url, handle.id))
            .headers(self.api_headers()?)
            .send()
            .await
            .map_err(transport(Self::VENDOR))?;
        let body = json_body(Self::VENDOR, resp).await?;
        Ok(parse_gemini_batch(&body))
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// The configured vendor's client.
#[derive(Debug, Clone)]
pub enum VendorClient {
    OpenAi(OpenAiClient),
    Gemini(GeminiClient),
}

impl VendorClient {
    /// Client for `vendor`, keyed from the environment.
    pub fn from_env(vendor: Vendor, config: &PipelineConfig) -> Result<Self, PipelineError> {
        Ok(match vendor {
            Vendor::OpenAi => VendorClient::OpenAi(OpenAiClient::from_env(config)?),
            Vendor::Gemini => VendorClient::Gemini(GeminiClient::from_env(config)?),
        })
    }
}

impl FileStore for VendorClient {
    async fn upload_file(
        &self,
        path: &Path,
        purpose: FilePurpose,
        display_name: &str,
    ) -> Result<UploadedFile, PipelineError> {
        match self {
            VendorClient::OpenAi(c) => c.upload_file(path, purpose, display_name).await,
            VendorClient::Gemini(c) => c.upload_file(path, purpose, display_name).await,
        }
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, PipelineError> {
        match self {
            VendorClient::OpenAi(c) => c.download_file(file_id).await,
            VendorClient::Gemini(c) => c.download_file(file_id).await,
        }
    }
}

impl BatchApi for VendorClient {
    fn vendor(&self) -> Vendor {
        match self {
            VendorClient::OpenAi(c) => c.vendor(),
            VendorClient::Gemini(c) => c.vendor(),
        }
    }

    async fn create_batch(
        &self,
        input: &UploadedFile,
        model: &str,
        display_name: &str,
    ) -> Result<JobHandle, PipelineError> {
        match self {
            VendorClient::OpenAi(c) => c.create_batch(input, model, display_name).await,
            VendorClient::Gemini(c) => c.create_batch(input, model, display_name).await,
        }
    }

    async fn get_batch(&self, handle: &JobHandle) -> Result<BatchStatus, PipelineError> {
        match self {
            VendorClient::OpenAi(c) => c.get_batch(handle).await,
            VendorClient::Gemini(c) => c.get_batch(handle).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_states_fold() {
        assert_eq!(openai_state("validating"), JobState::Pending);
        assert_eq!(openai_state("finalizing"), JobState::Running);
        assert_eq!(openai_state("completed"), JobState::Succeeded);
        assert_eq!(openai_state("expired"), JobState::Failed);
        assert_eq!(openai_state("cancelling"), JobState::Cancelled);
        assert!(!openai_state("in_progress").is_terminal());
    }

    #[test]
    fn gemini_states_accept_both_prefixes() {
        assert_eq!(gemini_state("JOB_STATE_SUCCEEDED"), JobState::Succeeded);
        assert_eq!(gemini_state("BATCH_STATE_RUNNING"), JobState::Running);
        assert_eq!(gemini_state("BATCH_STATE_PENDING"), JobState::Pending);
        assert_eq!(gemini_state("JOB_STATE_CANCELLED"), JobState::Cancelled);
        assert!(gemini_state("JOB_STATE_FAILED").is_terminal());
    }

    #[test]
    fn openai_batch_object_to_status() {
        let body = json!({
            "id": "batch_1",
            "status": "completed",
            "output_file_id": "file-out",
            "error_file_id": null,
            "request_counts": {"total": 3, "completed": 2, "failed": 1},
            "created_at": 1_700_000_000,
            "errors": {"data": [{"code": "invalid", "message": "bad line", "line": 4}]}
        });
        let batch: OpenAiBatchObject = serde_json::from_value(body).unwrap();
        let status = batch.into_status();
        assert_eq!(status.state, JobState::Succeeded);
        assert_eq!(status.output_file.as_deref(), Some("file-out"));
        assert!(status.error_file.is_none());
        assert_eq!(status.request_counts.unwrap().failed, 1);
        assert_eq!(status.created_at.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(status.errors, vec!["line 4: invalid: bad line"]);
    }

    #[test]
    fn gemini_operation_to_status() {
        let body = json!({
            "name": "batches/abc",
            "metadata": {
                "state": "BATCH_STATE_SUCCEEDED",
                "createTime": "2025-11-02T10:00:00Z",
                "batchStats": {"requestCount": "5", "successfulRequestCount": "4", "failedRequestCount": "1"}
            },
            "response": {"responsesFile": "files/out-1"}
        });
        let status = parse_gemini_batch(&body);
        assert_eq!(status.state, JobState::Succeeded);
        assert_eq!(status.output_file.as_deref(), Some("files/out-1"));
        let counts = status.request_counts.unwrap();
        assert_eq!((counts.total, counts.completed, counts.failed), (5, 4, 1));
        assert!(status.created_at.is_some());
    }

    #[test]
    fn gemini_operation_without_state_is_pending() {
        let status = parse_gemini_batch(&json!({"name": "batches/x"}));
        assert_eq!(status.state, JobState::Pending);
        assert!(status.output_file.is_none());
    }

    #[test]
    fn api_error_message_prefers_error_field() {
        assert_eq!(
            api_error_message(r#"{"error": {"message": "quota"}}"#),
            "quota"
        );
        assert_eq!(api_error_message("plain text"), "plain text");
    }

    #[test]
    fn upload_mime_types() {
        assert_eq!(upload_mime_type(Path::new("r.jsonl")), "application/jsonl");
        assert_eq!(upload_mime_type(Path::new("p.png")), "image/png");
    }

    #[test]
    fn model_path_prefixes_once() {
        assert_eq!(model_path("gemini-3-pro-preview"), "models/gemini-3-pro-preview");
        assert_eq!(model_path("models/gemini-2.5-flash"), "models/gemini-2.5-flash");
    }

    #[test]
    fn job_handle_round_trips_as_sidecar_json() {
        let handle = JobHandle {
            vendor: Vendor::Gemini,
            id: "batches/abc".into(),
            model: "gemini-3-flash-preview".into(),
            input_file_id: "files/in".into(),
            display_name: "reqs".into(),
            created_at: None,
        };
        let text = serde_json::to_string(&handle).unwrap();
        assert!(text.contains("\"vendor\":\"gemini\""));
        let back: JobHandle = serde_json::from_str(&text).unwrap();
        assert_eq!(back, handle);
    }
}
