//! Batch job lifecycle: submit a request file, poll it, fetch its results.
//!
//! Submission leaves two sidecars next to the request file so later
//! commands can pick the job up without extra arguments:
//!
//! ```text
//! original-requests-gpt-5-mini.jsonl
//! original-requests-gpt-5-mini.jsonl.file_id.txt   uploaded input file id
//! original-requests-gpt-5-mini.jsonl.batch.json    JobHandle as JSON
//! ```
//!
//! Results are downloaded to `<base>.output.jsonl` and, when the vendor
//! reports one, `<base>.errors.jsonl`.

use crate::config::PipelineConfig;
use crate::error::{ItemError, PipelineError};
use crate::pipeline::discover_files;
use crate::pipeline::requests::validate_request_file;
use crate::pipeline::vendor::{BatchApi, BatchStatus, FilePurpose, FileStore, JobHandle};
use serde_json::Value;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

pub const FILE_ID_SUFFIX: &str = ".file_id.txt";
pub const BATCH_SUFFIX: &str = ".batch.json";

/// `path` with `suffix` appended to its file name.
pub fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Retry policy for single vendor calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Run `call`, retrying retryable errors with exponential backoff.
    pub async fn run<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = self.backoff_ms * 2u64.pow(attempt - 1);
                    warn!(
                        "{}: {} (retry {}/{} after {}ms)",
                        what, e, attempt, self.max_retries, backoff
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
                other => return other,
            }
        }
    }
}

// ── Submit ───────────────────────────────────────────────────────────────────

/// Validate, upload and submit one request file; write its sidecars.
pub async fn submit_request_file<A: BatchApi>(
    api: &A,
    request_path: &Path,
    model: &str,
    display_name: &str,
    validate: bool,
    retry: RetryPolicy,
) -> Result<JobHandle, PipelineError> {
    if !request_path.is_file() {
        return Err(PipelineError::FileNotFound {
            path: request_path.to_path_buf(),
        });
    }
    if validate {
        let n = validate_request_file(request_path, api.vendor())?;
        info!("Validated {} request(s) in {}", n, request_path.display());
    }

    info!("Uploading {} ...", request_path.display());
    let uploaded = retry
        .run("upload request file", || {
            api.upload_file(request_path, FilePurpose::Batch, display_name)
        })
        .await?;
    let id_path = sidecar_path(request_path, FILE_ID_SUFFIX);
    std::fs::write(&id_path, &uploaded.id).map_err(|e| PipelineError::write(&id_path, e))?;
    info!("Uploaded input file {}", uploaded.id);

    let handle = retry
        .run("create batch", || api.create_batch(&uploaded, model, display_name))
        .await?;
    let batch_path = sidecar_path(request_path, BATCH_SUFFIX);
    let json = serde_json::to_string_pretty(&handle)
        .map_err(|e| PipelineError::Internal(format!("serialise job handle: {e}")))?;
    std::fs::write(&batch_path, json).map_err(|e| PipelineError::write(&batch_path, e))?;
    info!(
        "Created {} batch {} ({}); saved to {}",
        handle.vendor,
        handle.id,
        handle.display_name,
        batch_path.display()
    );
    Ok(handle)
}

/// Display name for chunk `index` (1-based) of `count`.
pub fn chunk_display_name(base: &str, index: usize, count: usize) -> String {
    if count > 1 {
        format!("{base}-chunk-{index:04}")
    } else {
        base.to_string()
    }
}

/// Submit every file in `dir` matching `pattern`, in name order.
pub async fn submit_chunk_dir<A: BatchApi>(
    api: &A,
    dir: &Path,
    pattern: &str,
    model: &str,
    display_name: Option<&str>,
    validate: bool,
    retry: RetryPolicy,
) -> Result<Vec<JobHandle>, PipelineError> {
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
    info!("Found {} chunk(s) in {}", files.len(), dir.display());

    let mut handles = Vec::with_capacity(files.len());
    for (idx, path) in files.iter().enumerate() {
        let base = display_name
            .map(String::from)
            .unwrap_or_else(|| file_stem(path));
        let name = chunk_display_name(&base, idx + 1, files.len());
        handles.push(submit_request_file(api, path, model, &name, validate, retry).await?);
    }
    Ok(handles)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ── Poll ─────────────────────────────────────────────────────────────────────

/// Read a `.batch.json` sidecar. `path` may be the sidecar or its request file.
pub fn load_job_handle(path: &Path) -> Result<JobHandle, PipelineError> {
    let sidecar = if path.to_string_lossy().ends_with(BATCH_SUFFIX) {
        path.to_path_buf()
    } else {
        sidecar_path(path, BATCH_SUFFIX)
    };
    let text = std::fs::read_to_string(&sidecar).map_err(|e| PipelineError::read(&sidecar, e))?;
    serde_json::from_str(&text).map_err(|e| PipelineError::InvalidSidecar {
        path: sidecar,
        detail: e.to_string(),
    })
}

/// Base name for result files: the request file name without `.jsonl`.
pub fn result_base_name(handle_path: &Path) -> String {
    let name = handle_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = name.strip_suffix(BATCH_SUFFIX).unwrap_or(&name);
    name.strip_suffix(".jsonl").unwrap_or(name).to_string()
}

/// Poll until the job reaches a terminal state. No timeout.
///
/// `on_status` sees every poll. Retryable poll errors are logged and the
/// loop carries on; anything else is returned.
pub async fn wait_for_completion<A: BatchApi>(
    api: &A,
    handle: &JobHandle,
    interval: Duration,
    mut on_status: impl FnMut(&BatchStatus),
) -> Result<BatchStatus, PipelineError> {
    loop {
        match api.get_batch(handle).await {
            Ok(status) => {
                on_status(&status);
                if status.state.is_terminal() {
                    return Ok(status);
                }
                debug!("{} is {}; next poll in {:?}", handle.id, status.raw_state, interval);
            }
            Err(e) if e.is_retryable() => warn!("poll of {} failed: {}", handle.id, e),
            Err(e) => return Err(e),
        }
        sleep(interval).await;
    }
}

// ── Fetch ────────────────────────────────────────────────────────────────────

/// Files saved for a finished job.
#[derive(Debug, Clone, Default)]
pub struct FetchedResults {
    pub output: Option<PathBuf>,
    pub errors: Option<PathBuf>,
    /// Failed requests found in the error file or flagged in the output.
    pub failed_requests: Vec<ItemError>,
}

/// Write `bytes` to `path` through a temporary file in the same directory.
pub fn save_atomically(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| PipelineError::write(parent, e))?;
    let mut tmp =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| PipelineError::write(parent, e))?;
    tmp.write_all(bytes)
        .map_err(|e| PipelineError::write(path, e))?;
    tmp.persist(path)
        .map_err(|e| PipelineError::write(path, e.error))?;
    Ok(())
}

/// Download the output and error files `status` names.
pub async fn fetch_results<A: FileStore>(
    api: &A,
    status: &BatchStatus,
    output_path: &Path,
    errors_path: &Path,
    retry: RetryPolicy,
) -> Result<FetchedResults, PipelineError> {
    let mut fetched = FetchedResults::default();

    if let Some(file_id) = &status.output_file {
        let bytes = retry
            .run("download output", || api.download_file(file_id))
            .await?;
        save_atomically(output_path, &bytes)?;
        info!("Downloaded output file to {}", output_path.display());
        fetched
            .failed_requests
            .extend(failed_requests(&String::from_utf8_lossy(&bytes), false));
        fetched.output = Some(output_path.to_path_buf());
    }

    if let Some(file_id) = &status.error_file {
        let bytes = retry
            .run("download errors", || api.download_file(file_id))
            .await?;
        save_atomically(errors_path, &bytes)?;
        info!("Downloaded error file to {}", errors_path.display());
        fetched
            .failed_requests
            .extend(failed_requests(&String::from_utf8_lossy(&bytes), true));
        fetched.errors = Some(errors_path.to_path_buf());
    }
    Ok(fetched)
}

fn error_message(err: &Value) -> Option<String> {
    match err {
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("error"))
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| Some(err.to_string())),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Failed requests in a result file, as `key: message` items.
///
/// Every line of an error file is a failure (`every_line_failed`); in an
/// output file only lines carrying an error object are.
pub fn failed_requests(text: &str, every_line_failed: bool) -> Vec<ItemError> {
    let mut failed = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(obj) = serde_json::from_str::<Value>(line) else {
            if every_line_failed {
                warn!("skip malformed error line: {}", line.chars().take(80).collect::<String>());
            }
            continue;
        };
        let key = obj["key"]
            .as_str()
            .or_else(|| obj["custom_id"].as_str())
            .unwrap_or("(no key)")
            .to_string();
        let response = &obj["response"];
        let message = error_message(&obj["error"])
            .or_else(|| error_message(&response["error"]))
            .or_else(|| error_message(&response["body"]["error"]));
        match message {
            Some(message) => failed.push(ItemError::RequestFailed { key, message }),
            None if every_line_failed => failed.push(ItemError::RequestFailed {
                key,
                message: "(no error message found)".into(),
            }),
            None => {}
        }
    }
    failed
}
