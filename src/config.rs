//! Configuration types for the batch pipeline.
//!
//! Every stage reads its knobs from one [`PipelineConfig`], built via
//! [`PipelineConfigBuilder`]. Keeping the knobs together makes it easy to
//! log the effective configuration at the start of a run and to share it
//! between the upload pool and the vendor clients.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default model when none is given.
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

/// Configuration shared by the pipeline stages.
///
/// # Example
/// ```rust
/// use rosenwald_batch::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .model("gpt-5-mini-2025-08-07")
///     .workers(8)
///     .build()
///     .unwrap();
/// assert_eq!(config.vendor().as_str(), "openai");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Model identifier written into requests and used to name outputs.
    pub model: String,

    /// Explicit vendor. If None, inferred from the model name.
    pub vendor: Option<Vendor>,

    /// Parallel image uploads. Default: 16.
    ///
    /// Uploads are network-bound; the vendor files endpoints tolerate this
    /// many concurrent requests without rate limiting in practice.
    pub workers: usize,

    /// Seconds between batch status polls. Default: 15.
    pub poll_interval_secs: u64,

    /// Retry attempts for a transient upload or API failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-HTTP-request timeout in seconds. Default: 300.
    ///
    /// Batch request files for image prompts can be close to 2 GB, so the
    /// upload of a single file may take minutes.
    pub http_timeout_secs: u64,

    /// OpenAI batch completion window. Default: "24h".
    pub completion_window: String,

    /// Reasoning effort hint for OpenAI text requests. Default: None.
    pub reasoning_effort: Option<ReasoningEffort>,

    /// Rotate request files once a chunk reaches this many bytes. Default: None (single file).
    ///
    /// The Gemini batch endpoint rejects input files above 2 GB; 1.8 GB
    /// chunks leave headroom for inline base64 images.
    pub chunk_max_bytes: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            vendor: None,
            workers: 16,
            poll_interval_secs: 15,
            max_retries: 3,
            retry_backoff_ms: 500,
            http_timeout_secs: 300,
            completion_window: "24h".to_string(),
            reasoning_effort: None,
            chunk_max_bytes: None,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The vendor serving `model`: the explicit one, or inferred from the name.
    pub fn vendor(&self) -> Vendor {
        self.vendor
            .unwrap_or_else(|| Vendor::from_model(&self.model).unwrap_or(Vendor::Gemini))
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn vendor(mut self, vendor: Vendor) -> Self {
        self.config.vendor = Some(vendor);
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_interval_secs = secs.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs;
        self
    }

    pub fn completion_window(mut self, window: impl Into<String>) -> Self {
        self.config.completion_window = window.into();
        self
    }

    pub fn reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.config.reasoning_effort = Some(effort);
        self
    }

    pub fn chunk_max_bytes(mut self, bytes: u64) -> Self {
        self.config.chunk_max_bytes = Some(bytes.max(1));
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("model must not be empty".into()));
        }
        if c.vendor.is_none() && Vendor::from_model(&c.model).is_none() {
            return Err(PipelineError::InvalidConfig(format!(
                "cannot infer vendor from model '{}'; pass a vendor explicitly",
                c.model
            )));
        }
        if c.workers == 0 {
            return Err(PipelineError::InvalidConfig("workers must be ≥ 1".into()));
        }
        if c.poll_interval_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "poll interval must be ≥ 1 second".into(),
            ));
        }
        if c.http_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "HTTP timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Batch API vendor. One variant per supported batch endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    /// OpenAI `/v1/batches` over the Responses API.
    #[serde(rename = "openai")]
    OpenAi,
    /// Google Gemini `batchGenerateContent`.
    Gemini,
}

impl Vendor {
    /// Infer the vendor from a model identifier.
    pub fn from_model(model: &str) -> Option<Self> {
        let m = model.trim().to_ascii_lowercase();
        let m = m.rsplit('/').next().unwrap_or(&m);
        if m.starts_with("gemini") {
            Some(Vendor::Gemini)
        } else if m.starts_with("gpt")
            || m.starts_with("o1")
            || m.starts_with("o3")
            || m.starts_with("o4")
        {
            Some(Vendor::OpenAi)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::OpenAi => "openai",
            Vendor::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Vendor::OpenAi),
            "gemini" | "google" => Ok(Vendor::Gemini),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown vendor '{other}' (expected openai or gemini)"
            ))),
        }
    }
}

/// Reasoning effort hint passed to OpenAI reasoning models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_inferred_from_model_prefix() {
        assert_eq!(Vendor::from_model("gpt-5-mini-2025-08-07"), Some(Vendor::OpenAi));
        assert_eq!(Vendor::from_model("gemini-3-pro-preview"), Some(Vendor::Gemini));
        assert_eq!(Vendor::from_model("models/gemini-2.5-flash"), Some(Vendor::Gemini));
        assert_eq!(Vendor::from_model("llava"), None);
    }

    #[test]
    fn vendor_from_str() {
        assert_eq!("OpenAI".parse::<Vendor>().unwrap(), Vendor::OpenAi);
        assert_eq!("gemini".parse::<Vendor>().unwrap(), Vendor::Gemini);
        assert!("anthropic".parse::<Vendor>().is_err());
    }

    #[test]
    fn builder_defaults() {
        let config = PipelineConfig::builder().build().unwrap();
        assert_eq!(config.workers, 16);
        assert_eq!(config.poll_interval_secs, 15);
        assert_eq!(config.vendor(), Vendor::Gemini);
        assert!(config.chunk_max_bytes.is_none());
    }

    #[test]
    fn builder_clamps_workers() {
        let config = PipelineConfig::builder().workers(0).build().unwrap();
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn unknown_model_without_vendor_rejected() {
        let err = PipelineConfig::builder().model("llava").build().unwrap_err();
        assert!(err.to_string().contains("llava"));

        let ok = PipelineConfig::builder()
            .model("llava")
            .vendor(Vendor::OpenAi)
            .build()
            .unwrap();
        assert_eq!(ok.vendor(), Vendor::OpenAi);
    }

    #[test]
    fn reasoning_effort_serialises_lowercase() {
        let json = serde_json::to_string(&ReasoningEffort::High).unwrap();
        assert_eq!(json, "\"high\"");
    }
}
