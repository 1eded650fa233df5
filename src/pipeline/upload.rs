//! Bounded image upload pool and the JSONL mapping it appends to.
//!
//! Every benchmark page whose image exists is uploaded to the vendor file
//! store; each success appends one [`UploadRecord`] line to the mapping
//! file, which the image request builders read back. Up to `workers`
//! uploads are in flight at once. Completion order is arbitrary, so the
//! mapping file is not sorted.
//!
//! ## Failure handling
//!
//! Transient errors (429, 5xx, transport) are retried with exponential
//! backoff (`retry_backoff_ms * 2^attempt`); anything else fails the item
//! immediately. A failed item is logged with its key and counted but never
//! cancels its siblings. Only a mapping-file write error aborts the run,
//! since continuing would upload images nobody can reference.

use crate::benchmark::{find_image, BenchmarkRow};
use crate::config::PipelineConfig;
use crate::error::{ItemError, PipelineError};
use crate::output::UploadSummary;
use crate::pipeline::vendor::{FilePurpose, FileStore, UploadedFile};
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// One uploaded image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub custom_id: String,
    /// Vendor file id; older Gemini mappings call it `file_name`.
    #[serde(alias = "file_name")]
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
}

impl UploadRecord {
    fn new(custom_id: &str, file: UploadedFile, source_path: &Path) -> Self {
        Self {
            custom_id: custom_id.to_string(),
            file_id: file.id,
            uri: file.uri,
            mime_type: file.mime_type,
            source_path: Some(source_path.to_path_buf()),
        }
    }
}

// ── Mapping file ─────────────────────────────────────────────────────────────

fn parse_mapping(text: &str, path: &Path) -> HashMap<String, UploadRecord> {
    let mut mapping = HashMap::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<UploadRecord>(line) {
            Ok(record) if !record.file_id.is_empty() => {
                mapping.insert(record.custom_id.clone(), record);
            }
            Ok(_) => debug!("{}:{}: record without file id", path.display(), idx + 1),
            Err(e) => warn!("{}:{}: skipping unreadable record ({})", path.display(), idx + 1, e),
        }
    }
    mapping
}

/// Read a mapping file; later lines for the same key win. A missing file is fatal.
pub fn load_mapping(path: &Path) -> Result<HashMap<String, UploadRecord>, PipelineError> {
    let text = std::fs::read_to_string(path).map_err(|e| PipelineError::read(path, e))?;
    Ok(parse_mapping(&text, path))
}

/// Keys already present in the mapping; empty when the file does not exist yet.
pub fn existing_keys(path: &Path) -> Result<HashSet<String>, PipelineError> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    Ok(load_mapping(path)?.into_keys().collect())
}

// ── Planning ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadJob {
    pub key: String,
    pub path: PathBuf,
}

/// The uploads to run, plus what was skipped while planning them.
#[derive(Debug, Clone, Default)]
pub struct UploadPlan {
    pub jobs: Vec<UploadJob>,
    pub skipped_existing: usize,
    pub missing_images: Vec<String>,
}

/// Decide which rows to upload.
///
/// Keys in `existing` are skipped (resume mode), rows without an image on
/// disk are listed as missing, duplicate keys are planned once and `limit`
/// caps the number of uploads.
pub fn plan_uploads(
    rows: &[BenchmarkRow],
    images_root: &Path,
    existing: &HashSet<String>,
    limit: Option<usize>,
) -> Result<UploadPlan, PipelineError> {
    if !images_root.is_dir() {
        return Err(PipelineError::FileNotFound {
            path: images_root.to_path_buf(),
        });
    }

    let mut plan = UploadPlan::default();
    let mut planned = HashSet::new();
    for row in rows {
        let key = row.key();
        if existing.contains(&key) {
            plan.skipped_existing += 1;
            continue;
        }
        if planned.contains(&key) {
            continue;
        }
        let Some(path) = find_image(images_root, &row.year, &row.page) else {
            plan.missing_images.push(key);
            continue;
        };
        if limit.is_some_and(|l| plan.jobs.len() >= l) {
            info!("Reached upload limit of {}", plan.jobs.len());
            break;
        }
        planned.insert(key.clone());
        plan.jobs.push(UploadJob { key, path });
    }
    Ok(plan)
}

// ── Pool ─────────────────────────────────────────────────────────────────────

/// Pool knobs, usually taken from [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub workers: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub purpose: FilePurpose,
}

impl UploadOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            purpose: FilePurpose::Vision,
        }
    }
}

/// Upload one file, retrying transient failures.
async fn upload_with_retry<S: FileStore>(
    store: &S,
    job: &UploadJob,
    options: &UploadOptions,
) -> Result<UploadedFile, ItemError> {
    let display_name = job
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| job.key.clone());

    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let backoff = options.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "{}: retry {}/{} after {}ms",
                job.key, attempt, options.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }
        match store
            .upload_file(&job.path, options.purpose, &display_name)
            .await
        {
            Ok(file) => return Ok(file),
            Err(e) if e.is_retryable() && attempt < options.max_retries => {
                warn!("{}: attempt {} failed: {}", job.key, attempt + 1, e);
                attempt += 1;
            }
            Err(e) => {
                return Err(ItemError::UploadFailed {
                    key: job.key.clone(),
                    retries: attempt,
                    detail: e.to_string(),
                })
            }
        }
    }
}

/// Upload one image and append its record under the mapping lock.
async fn upload_one<S: FileStore>(
    store: &S,
    job: &UploadJob,
    options: &UploadOptions,
    mapping: &Mutex<tokio::fs::File>,
    mapping_path: &Path,
    progress: Option<&ProgressCallback>,
) -> Result<Result<UploadRecord, ItemError>, PipelineError> {
    let file = match upload_with_retry(store, job, options).await {
        Ok(file) => file,
        Err(problem) => {
            warn!(
                "upload failed for {} ({}): {}",
                job.key,
                job.path.display(),
                problem
            );
            if let Some(cb) = progress {
                cb.on_item_error(&job.key, &problem.to_string());
            }
            return Ok(Err(problem));
        }
    };

    let record = UploadRecord::new(&job.key, file, &job.path);
    let mut line = serde_json::to_string(&record)
        .map_err(|e| PipelineError::Internal(format!("serialise record: {e}")))?;
    line.push('\n');
    {
        let mut out = mapping.lock().await;
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| PipelineError::write(mapping_path, e))?;
        out.flush()
            .await
            .map_err(|e| PipelineError::write(mapping_path, e))?;
    }

    debug!("{} -> {}", record.custom_id, record.file_id);
    if let Some(cb) = progress {
        cb.on_item_complete(&record.custom_id, &record.file_id);
    }
    Ok(Ok(record))
}

/// Run the upload pool and append each success to `mapping_path`.
pub async fn upload_images<S: FileStore>(
    store: &S,
    plan: UploadPlan,
    mapping_path: &Path,
    options: &UploadOptions,
    progress: Option<ProgressCallback>,
) -> Result<UploadSummary, PipelineError> {
    if let Some(parent) = mapping_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::write(parent, e))?;
    }
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(mapping_path)
        .await
        .map_err(|e| PipelineError::write(mapping_path, e))?;
    let mapping = Mutex::new(file);

    let total = plan.jobs.len();
    info!(
        "Uploading {} image(s) with {} worker(s) ({} already uploaded, {} missing)",
        total,
        options.workers,
        plan.skipped_existing,
        plan.missing_images.len()
    );
    if let Some(cb) = &progress {
        cb.on_upload_start(total);
    }

    let results: Vec<Result<Result<UploadRecord, ItemError>, PipelineError>> =
        stream::iter(plan.jobs.iter().map(|job| {
            upload_one(store, job, options, &mapping, mapping_path, progress.as_ref())
        }))
        .buffer_unordered(options.workers.max(1))
        .collect()
        .await;

    let mut summary = UploadSummary {
        skipped_existing: plan.skipped_existing,
        missing_images: plan.missing_images,
        ..Default::default()
    };
    for result in results {
        match result? {
            Ok(_) => summary.uploaded += 1,
            Err(problem) => summary.failed.push(problem),
        }
    }

    if let Some(cb) = &progress {
        cb.on_upload_complete(total, summary.uploaded);
    }
    info!(
        "Uploaded {} image(s), {} failed",
        summary.uploaded,
        summary.failed_count()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Vendor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn row(year: &str, page: &str) -> BenchmarkRow {
        BenchmarkRow {
            year: year.into(),
            page: page.into(),
            text: String::new(),
        }
    }

    fn images(keys: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (year, page) in keys {
            std::fs::create_dir_all(dir.path().join(year)).unwrap();
            std::fs::write(
                dir.path().join(year).join(format!("{year}-page-{page}.png")),
                b"png",
            )
            .unwrap();
        }
        dir
    }

    /// Fails the first `flaky` calls with a 503, then succeeds; names
    /// containing "bad" always fail with a 400.
    struct FakeStore {
        calls: AtomicUsize,
        flaky: usize,
    }

    impl FileStore for FakeStore {
        async fn upload_file(
            &self,
            path: &Path,
            _purpose: FilePurpose,
            display_name: &str,
        ) -> Result<UploadedFile, PipelineError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if display_name.contains("bad") {
                return Err(PipelineError::ApiError {
                    vendor: Vendor::OpenAi,
                    status: 400,
                    message: "rejected".into(),
                });
            }
            if n < self.flaky {
                return Err(PipelineError::ApiError {
                    vendor: Vendor::OpenAi,
                    status: 503,
                    message: "busy".into(),
                });
            }
            Ok(UploadedFile {
                id: format!("file-{}", path.file_stem().unwrap().to_string_lossy()),
                uri: None,
                mime_type: Some("image/png".into()),
            })
        }

        async fn download_file(&self, _file_id: &str) -> Result<Vec<u8>, PipelineError> {
            Ok(Vec::new())
        }
    }

    fn options() -> UploadOptions {
        UploadOptions {
            workers: 4,
            max_retries: 2,
            retry_backoff_ms: 1,
            purpose: FilePurpose::Vision,
        }
    }

    #[test]
    fn mapping_accepts_file_name_alias_and_skips_garbage() {
        let text = "{\"custom_id\":\"1887-1\",\"file_name\":\"files/a\",\"uri\":\"u\"}\n\
                    not json\n\
                    {\"custom_id\":\"1887-2\",\"file_id\":\"file-b\"}\n\
                    {\"custom_id\":\"1887-2\",\"file_id\":\"file-c\"}\n";
        let mapping = parse_mapping(text, Path::new("m.jsonl"));
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping["1887-1"].file_id, "files/a");
        assert_eq!(mapping["1887-2"].file_id, "file-c");
    }

    #[test]
    fn plan_skips_existing_missing_and_duplicates() {
        let dir = images(&[("1887", "1"), ("1887", "2"), ("1887", "3")]);
        let rows = vec![row("1887", "1"), row("1887", "2"), row("1887", "2"), row("1887", "9"), row("1887", "3")];
        let existing: HashSet<String> = ["1887-1".to_string()].into();
        let plan = plan_uploads(&rows, dir.path(), &existing, None).unwrap();
        assert_eq!(plan.skipped_existing, 1);
        assert_eq!(plan.missing_images, vec!["1887-9"]);
        let keys: Vec<_> = plan.jobs.iter().map(|j| j.key.as_str()).collect();
        assert_eq!(keys, vec!["1887-2", "1887-3"]);

        let limited = plan_uploads(&rows, dir.path(), &HashSet::new(), Some(1)).unwrap();
        assert_eq!(limited.jobs.len(), 1);
    }

    #[test]
    fn plan_requires_images_root() {
        let err = plan_uploads(&[], Path::new("/no/such/root"), &HashSet::new(), None).unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn pool_retries_transient_errors_and_appends_mapping() {
        let dir = images(&[("1887", "1"), ("1887", "2")]);
        let rows = vec![row("1887", "1"), row("1887", "2")];
        let plan = plan_uploads(&rows, dir.path(), &HashSet::new(), None).unwrap();
        let mapping_path = dir.path().join("out/uploaded-image-ids.jsonl");
        let store = FakeStore {
            calls: AtomicUsize::new(0),
            flaky: 1,
        };

        let summary = upload_images(&store, plan, &mapping_path, &options(), None)
            .await
            .unwrap();
        assert_eq!(summary.uploaded, 2);
        assert!(summary.failed.is_empty());

        let mapping = load_mapping(&mapping_path).unwrap();
        assert_eq!(mapping["1887-2"].file_id, "file-1887-page-2");
        assert!(mapping["1887-1"].source_path.is_some());
    }

    #[tokio::test]
    async fn permanent_failure_is_counted_not_fatal() {
        let dir = images(&[("bad", "1"), ("1887", "1")]);
        let rows = vec![row("bad", "1"), row("1887", "1")];
        let plan = plan_uploads(&rows, dir.path(), &HashSet::new(), None).unwrap();
        let mapping_path = dir.path().join("ids.jsonl");
        let store = FakeStore {
            calls: AtomicUsize::new(0),
            flaky: 0,
        };

        let summary = upload_images(&store, plan, &mapping_path, &options(), None)
            .await
            .unwrap();
        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.failed_count(), 1);
        assert!(matches!(
            &summary.failed[0],
            ItemError::UploadFailed { key, retries: 0, .. } if key == "bad-1"
        ));
        assert_eq!(existing_keys(&mapping_path).unwrap().len(), 1);
    }

    #[test]
    fn existing_keys_of_missing_file_is_empty() {
        assert!(existing_keys(Path::new("/no/such/mapping.jsonl"))
            .unwrap()
            .is_empty());
    }
}
