//! Error types for the rosenwald-batch library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal**: the stage cannot proceed at all
//!   (missing input file, malformed request file, vendor not configured).
//!   Returned as `Err(PipelineError)` from stage entry points.
//!
//! * [`ItemError`] — **Non-fatal**: a single row, line or upload failed but
//!   every other item is fine. Stored inside the stage summaries in
//!   [`crate::output`] so callers see partial success and can print a
//!   tally at the end of the run.

use crate::config::Vendor;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the rosenwald-batch library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// An input file or directory was not found.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// A TSV input lacks a column the stage needs.
    #[error("TSV '{path}' has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },

    /// A batch request file failed local validation; nothing was uploaded.
    #[error("Invalid request file '{path}' at line {line}: {reason}")]
    InvalidRequestFile {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A sidecar or mapping file could not be interpreted.
    #[error("Could not read '{path}': {detail}")]
    InvalidSidecar { path: PathBuf, detail: String },

    // ── Vendor errors ─────────────────────────────────────────────────────
    /// The vendor client is not initialised (missing API key etc.).
    #[error("Vendor '{vendor}' is not configured.\n{hint}")]
    VendorNotConfigured { vendor: Vendor, hint: String },

    /// The vendor API returned a non-retryable error.
    #[error("{vendor} API error (HTTP {status}): {message}")]
    ApiError {
        vendor: Vendor,
        status: u16,
        message: String,
    },

    /// HTTP 429; back off before retrying.
    #[error("Rate limit exceeded for vendor '{vendor}'")]
    RateLimitExceeded { vendor: Vendor },

    /// 401/403 from the vendor.
    #[error("Authentication error from vendor '{vendor}': {detail}")]
    AuthError { vendor: Vendor, detail: String },

    /// Transport-level failure (DNS, TLS, timeout, connection reset).
    #[error("HTTP request to {vendor} failed: {reason}")]
    Transport { vendor: Vendor, reason: String },

    /// The vendor answered with a body we could not interpret.
    #[error("Unexpected {vendor} response: {detail}")]
    UnexpectedResponse { vendor: Vendor, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not read an input file.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid glob pattern for file discovery.
    #[error("Invalid file pattern '{pattern}': {detail}")]
    InvalidPattern { pattern: String, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether another attempt at the same call could succeed.
    ///
    /// Rate limits, transport failures and 5xx answers are transient;
    /// authentication and 4xx validation errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::RateLimitExceeded { .. } | PipelineError::Transport { .. } => true,
            PipelineError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            PipelineError::FileNotFound { path }
        } else {
            PipelineError::ReadFailed { path, source }
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::OutputWriteFailed {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single item (row, output line, upload).
///
/// Collected in stage summaries; the stage keeps going.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    /// No page image exists for the key.
    #[error("{key}: no image found")]
    ImageNotFound { key: String },

    /// No uploaded file id is recorded for the key.
    #[error("{key}: no uploaded file id in mapping")]
    MissingFileId { key: String },

    /// An image upload failed after retries.
    #[error("{key}: upload failed after {retries} retries: {detail}")]
    UploadFailed {
        key: String,
        retries: u32,
        detail: String,
    },

    /// A JSONL line could not be parsed.
    #[error("line {line}: invalid JSON ({detail})")]
    InvalidJson { line: usize, detail: String },

    /// A response line carried no usable text.
    #[error("line {line}: missing text for {key} ({detail})")]
    MissingText {
        key: String,
        line: usize,
        detail: String,
    },

    /// The vendor reported a failed request for the key.
    #[error("{key}: {message}")]
    RequestFailed { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_retryable() {
        let e = PipelineError::RateLimitExceeded {
            vendor: Vendor::Gemini,
        };
        assert!(e.is_retryable());
        assert!(e.to_string().contains("gemini"));
    }

    #[test]
    fn server_error_retryable_client_error_not() {
        let server = PipelineError::ApiError {
            vendor: Vendor::OpenAi,
            status: 503,
            message: "overloaded".into(),
        };
        let client = PipelineError::ApiError {
            vendor: Vendor::OpenAi,
            status: 400,
            message: "bad request".into(),
        };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
    }

    #[test]
    fn auth_error_not_retryable() {
        let e = PipelineError::AuthError {
            vendor: Vendor::OpenAi,
            detail: "invalid key".into(),
        };
        assert!(!e.is_retryable());
        assert!(e.to_string().contains("invalid key"));
    }

    #[test]
    fn not_found_read_maps_to_file_not_found() {
        let e = PipelineError::read(
            "missing.tsv",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(e, PipelineError::FileNotFound { .. }));
    }

    #[test]
    fn upload_failed_display_names_key() {
        let e = ItemError::UploadFailed {
            key: "1887-32".into(),
            retries: 2,
            detail: "HTTP 500".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("1887-32"), "got: {msg}");
        assert!(msg.contains("2 retries"), "got: {msg}");
    }
}
