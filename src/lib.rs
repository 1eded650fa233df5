//! # rosenwald-batch
//!
//! LLM post-correction of OCR'd 19th-century French medical directories
//! (the Rosenwald annuals) through vendor batch APIs.
//!
//! Each scanned page has noisy OCR text. This crate turns the pages into
//! OpenAI or Gemini batch request files, uploads the page images the
//! requests point at, submits and polls the batch jobs, writes every
//! response back out as one TSV file per page, repairs rows whose tab
//! structure the model broke, and scores the result against hand-labelled
//! ground truth.
//!
//! ## Pipeline Overview
//!
//! ```text
//! benchmark.tsv (year, page, text)
//!  │
//!  ├─ 1. Upload   page images to the vendor file store (worker pool)
//!  ├─ 2. Build    one JSONL request line per page, optionally chunked
//!  ├─ 3. Submit   validate, upload the request file, create the batch
//!  ├─ 4. Poll     fixed-interval status loop until a terminal state
//!  ├─ 5. Extract  first usable text of each response → <key>.tsv
//!  ├─ 6. Repair   rebuild rows with broken tab structure
//!  └─ 7. Compare  WER / CER against ground truth
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rosenwald_batch::pipeline::batch::{self, RetryPolicy};
//! use rosenwald_batch::pipeline::requests::{ImageSource, RequestBuilder, RequestKind};
//! use rosenwald_batch::pipeline::vendor::VendorClient;
//! use rosenwald_batch::prompts::InstructionFiles;
//! use rosenwald_batch::{read_benchmark, PipelineConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder().model("gpt-5-mini").build()?;
//!     let benchmark = read_benchmark("rosenwald-benchmark-original.tsv")?;
//!
//!     let builder = RequestBuilder {
//!         vendor: config.vendor(),
//!         model: config.model.clone(),
//!         kind: RequestKind::Text,
//!         instructions: InstructionFiles::in_dir(".").load(RequestKind::Text.instruction_kind())?,
//!         reasoning_effort: None,
//!         images: ImageSource::TextOnly,
//!     };
//!     let out = Path::new("original-requests-gpt-5-mini.jsonl");
//!     rosenwald_batch::pipeline::requests::write_requests(&benchmark.rows, &builder, out, None)?;
//!
//!     // Reads OPENAI_API_KEY or GEMINI_API_KEY
//!     let client = VendorClient::from_env(config.vendor(), &config)?;
//!     let retry = RetryPolicy::from_config(&config);
//!     let handle =
//!         batch::submit_request_file(&client, out, &config.model, "original", true, retry).await?;
//!     eprintln!("submitted {}", handle.id);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `rosenwald` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! rosenwald-batch = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod benchmark;
pub mod config;
pub mod error;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use benchmark::{read_benchmark, read_targets, Benchmark, BenchmarkRow, TargetRange};
pub use config::{PipelineConfig, PipelineConfigBuilder, ReasoningEffort, Vendor, DEFAULT_MODEL};
pub use error::{ItemError, PipelineError};
pub use metrics::{compare_files, Comparison};
pub use output::{BuildSummary, ExtractSummary, UploadSummary};
pub use pipeline::repair::{parse_tsv, repair_line, repair_tree, RepairOptions};
pub use progress::{NoopProgressCallback, ProgressCallback, UploadProgressCallback};
