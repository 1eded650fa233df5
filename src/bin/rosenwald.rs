//! CLI binary for rosenwald-batch.
//!
//! One subcommand per pipeline stage. Each maps its flags to
//! `PipelineConfig` and the stage's options, runs it, and prints a tally.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use rosenwald_batch::benchmark::find_image;
use rosenwald_batch::pipeline::batch::{self, RetryPolicy};
use rosenwald_batch::pipeline::extract;
use rosenwald_batch::pipeline::repair::{self, RepairOutcome};
use rosenwald_batch::pipeline::requests::{self, ImageSource, RequestBuilder, RequestKind};
use rosenwald_batch::pipeline::upload::{self, UploadOptions};
use rosenwald_batch::pipeline::vendor::{BatchApi, BatchStatus, JobState, VendorClient};
use rosenwald_batch::prompts::InstructionFiles;
use rosenwald_batch::{
    compare_files, read_benchmark, read_targets, PipelineConfig, PipelineConfigBuilder,
    ProgressCallback, ReasoningEffort, RepairOptions, UploadProgressCallback, Vendor, DEFAULT_MODEL,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders the upload pool as a progress bar with one log line per image.
/// Uploads complete out of order, so lines are keyed, not numbered.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_upload_start` gives the total.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Planning uploads…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} images  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Uploading");
        self.bar.reset_eta();
    }
}

impl UploadProgressCallback for CliProgressCallback {
    fn on_upload_start(&self, total: usize) {
        self.activate_bar(total);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Uploading {total} images…"))
        ));
    }

    fn on_item_complete(&self, key: &str, file_id: &str) {
        self.bar.println(format!(
            "  {} {:<14}  {}",
            green("✓"),
            key,
            dim(file_id)
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, key: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {:<14}  {}", red("✗"), key, red(&msg)));
        self.bar.inc(1);
    }

    fn on_upload_complete(&self, total: usize, success_count: usize) {
        let failed = total.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} images uploaded",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} images uploaded  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Text-only Gemini requests from the OCR benchmark
  rosenwald build --benchmark rosenwald-benchmark-original.tsv --model gemini-3-flash-preview

  # Upload page images, then build image+text OpenAI requests against them
  rosenwald upload-images --benchmark rosenwald-benchmark-original.tsv \
      --images-root rosenwald-images --mapping openai-uploads.jsonl --model gpt-5-mini
  rosenwald build --benchmark rosenwald-benchmark-original.tsv --kind image-text \
      --mapping openai-uploads.jsonl --model gpt-5-mini

  # Submit, wait, download
  rosenwald submit original-requests-gpt-5-mini.jsonl --model gpt-5-mini
  rosenwald status original-requests-gpt-5-mini.jsonl --wait

  # Per-page TSVs, repair, score
  rosenwald extract raw-batch-output/original-requests-gpt-5-mini.output.jsonl
  rosenwald repair --input-dir raw-output-tsv --output-dir repaired-tsv --recursive
  rosenwald compare golden-truth/1887-0032.tsv repaired-tsv/original-gpt-5-mini/1887-0032.tsv

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY            OpenAI API key
  GEMINI_API_KEY            Google Gemini API key (GOOGLE_API_KEY also accepted)
  OPENAI_BASE_URL           Override the OpenAI endpoint
  GEMINI_BASE_URL           Override the Gemini endpoint
  RUST_LOG                  tracing filter, e.g. rosenwald_batch=debug
"#;

/// Batch LLM post-correction of OCR'd Rosenwald directory pages.
#[derive(Parser, Debug)]
#[command(
    name = "rosenwald",
    version,
    about = "Batch LLM post-correction of OCR'd Rosenwald directory pages",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "ROSENWALD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "ROSENWALD_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a JSONL batch request file from a benchmark TSV.
    Build(BuildArgs),
    /// Upload page images to the vendor file store.
    UploadImages(UploadArgs),
    /// Validate, upload and submit request files as batch jobs.
    Submit(SubmitArgs),
    /// Show (and optionally wait for) batch jobs; download finished results.
    Status(StatusArgs),
    /// Write one TSV per page from vendor output files.
    Extract(ExtractArgs),
    /// Repair TSV rows with broken tab structure.
    Repair(RepairArgs),
    /// Score hypothesis TSVs against a ground-truth TSV (WER / CER).
    Compare(CompareArgs),
    /// List the page images expected for a target-page TSV.
    Targets(TargetsArgs),
}

/// Model, vendor and retry flags shared by the vendor-facing commands.
#[derive(Args, Debug, Clone)]
struct VendorArgs {
    /// Model identifier; also selects the vendor unless --vendor is given.
    #[arg(long, env = "ROSENWALD_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Vendor: openai or gemini.
    #[arg(long, env = "ROSENWALD_VENDOR")]
    vendor: Option<Vendor>,

    /// Retries for a transient vendor failure.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt.
    #[arg(long, default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Per-HTTP-request timeout in seconds.
    #[arg(long, default_value_t = 300)]
    http_timeout: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Text,
    Image,
    ImageText,
}

impl From<KindArg> for RequestKind {
    fn from(v: KindArg) -> Self {
        match v {
            KindArg::Text => RequestKind::Text,
            KindArg::Image => RequestKind::Image,
            KindArg::ImageText => RequestKind::ImageText,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum EffortArg {
    Low,
    Medium,
    High,
}

impl From<EffortArg> for ReasoningEffort {
    fn from(v: EffortArg) -> Self {
        match v {
            EffortArg::Low => ReasoningEffort::Low,
            EffortArg::Medium => ReasoningEffort::Medium,
            EffortArg::High => ReasoningEffort::High,
        }
    }
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Benchmark TSV with year, page and text columns.
    #[arg(long)]
    benchmark: PathBuf,

    /// Request family.
    #[arg(long, value_enum, default_value = "text")]
    kind: KindArg,

    /// Directory holding the instruction files.
    #[arg(long, default_value = ".")]
    instructions_dir: PathBuf,

    /// Upload mapping JSONL; image requests reference the uploaded files.
    #[arg(long)]
    mapping: Option<PathBuf>,

    /// Images root; image requests inline the page image when no mapping is given.
    #[arg(long)]
    images_root: Option<PathBuf>,

    /// Output file. Default: <source>-requests-<model>.jsonl
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Reasoning effort for OpenAI text requests.
    #[arg(long, value_enum)]
    reasoning_effort: Option<EffortArg>,

    /// Rotate into chunk files once one reaches this many bytes.
    #[arg(long)]
    chunk_max_bytes: Option<u64>,

    #[command(flatten)]
    vendor: VendorArgs,
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// Benchmark TSV naming the pages to upload.
    #[arg(long)]
    benchmark: PathBuf,

    /// Root holding <year>/<year>-page-<page>.png.
    #[arg(long, default_value = "rosenwald-images")]
    images_root: PathBuf,

    /// Mapping JSONL appended with one record per upload.
    #[arg(long)]
    mapping: PathBuf,

    /// Parallel uploads.
    #[arg(short, long, env = "ROSENWALD_WORKERS", default_value_t = 16)]
    workers: usize,

    /// Upload at most this many images.
    #[arg(long)]
    limit: Option<usize>,

    /// Upload every image even if the mapping already has its key.
    #[arg(long)]
    no_resume: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    #[command(flatten)]
    vendor: VendorArgs,
}

#[derive(Args, Debug)]
struct SubmitArgs {
    /// Request JSONL files or chunk directories.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Display name for the job. Default: the request file stem.
    #[arg(long)]
    display_name: Option<String>,

    /// Glob selecting chunk files inside a directory.
    #[arg(long, default_value = "*.jsonl")]
    pattern: String,

    /// Skip local validation of the request lines.
    #[arg(long)]
    no_validate: bool,

    /// OpenAI completion window.
    #[arg(long, default_value = "24h")]
    completion_window: String,

    #[command(flatten)]
    vendor: VendorArgs,
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// `.batch.json` sidecars or the request files they sit beside.
    #[arg(required = true)]
    handles: Vec<PathBuf>,

    /// Poll until every job reaches a terminal state.
    #[arg(long)]
    wait: bool,

    /// Seconds between polls.
    #[arg(long, default_value_t = 15)]
    interval: u64,

    /// Directory for downloaded output and error files.
    #[arg(long, default_value = "raw-batch-output")]
    output_dir: PathBuf,

    /// Do not download results of finished jobs.
    #[arg(long)]
    no_download: bool,

    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    #[arg(long, default_value_t = 300)]
    http_timeout: u64,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Output JSONL files or directories holding them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Glob selecting output files inside a directory.
    #[arg(long, default_value = "*.output.jsonl")]
    pattern: String,

    /// Folder for the TSVs. Default: <root>/<source>-<model> per input file.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Parent of the inferred per-file folders.
    #[arg(long, default_value = "raw-output-tsv")]
    root: PathBuf,
}

#[derive(Args, Debug)]
struct RepairArgs {
    #[arg(long, default_value = "raw-output-tsv")]
    input_dir: PathBuf,

    #[arg(long, default_value = "repaired-tsv")]
    output_dir: PathBuf,

    /// Glob relative to the input directory.
    #[arg(long, default_value = "*.tsv")]
    pattern: String,

    /// Search subdirectories too.
    #[arg(short, long)]
    recursive: bool,

    /// Repair at most this many files.
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args, Debug)]
struct CompareArgs {
    /// Ground-truth TSV.
    reference: PathBuf,

    /// TSVs to score.
    #[arg(required = true)]
    hypotheses: Vec<PathBuf>,

    /// Also write one <stem>-comparison.txt per hypothesis here.
    #[arg(long)]
    report_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct TargetsArgs {
    /// Target-page TSV with year, page_begin and page_end columns.
    #[arg(long)]
    targets: PathBuf,

    #[arg(long, default_value = "rosenwald-images")]
    images_root: PathBuf,

    /// Keep only these years.
    #[arg(long = "year")]
    years: Vec<String>,

    /// Print only pages with no image on disk.
    #[arg(long)]
    missing_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Build(args) => run_build(args, cli.quiet),
        Commands::UploadImages(args) => run_upload(args, cli.quiet).await,
        Commands::Submit(args) => run_submit(args, cli.quiet).await,
        Commands::Status(args) => run_status(args, cli.quiet).await,
        Commands::Extract(args) => run_extract(args, cli.quiet),
        Commands::Repair(args) => run_repair(args, cli.quiet),
        Commands::Compare(args) => run_compare(args),
        Commands::Targets(args) => run_targets(args),
    }
}

/// Map the shared vendor flags to a `PipelineConfig` builder.
fn config_builder(args: &VendorArgs) -> PipelineConfigBuilder {
    let builder = PipelineConfig::builder()
        .model(args.model.clone())
        .max_retries(args.max_retries)
        .retry_backoff_ms(args.retry_backoff_ms)
        .http_timeout_secs(args.http_timeout);
    match args.vendor {
        Some(vendor) => builder.vendor(vendor),
        None => builder,
    }
}

fn build_config(args: &VendorArgs) -> Result<PipelineConfig> {
    config_builder(args).build().context("Invalid configuration")
}

// ── build ────────────────────────────────────────────────────────────────────

fn run_build(args: BuildArgs, quiet: bool) -> Result<()> {
    let mut builder = config_builder(&args.vendor);
    if let Some(effort) = args.reasoning_effort {
        builder = builder.reasoning_effort(effort.into());
    }
    if let Some(bytes) = args.chunk_max_bytes {
        builder = builder.chunk_max_bytes(bytes);
    }
    let config = builder.build().context("Invalid configuration")?;

    let benchmark = read_benchmark(&args.benchmark)
        .with_context(|| format!("Failed to read benchmark {}", args.benchmark.display()))?;
    let kind: RequestKind = args.kind.into();
    let instructions = InstructionFiles::in_dir(&args.instructions_dir)
        .load(kind.instruction_kind())
        .context("Failed to load instructions")?;

    let images = match (kind, &args.mapping, &args.images_root) {
        (RequestKind::Text, _, _) => ImageSource::TextOnly,
        (_, Some(mapping), _) => ImageSource::Uploaded(
            upload::load_mapping(mapping)
                .with_context(|| format!("Failed to read mapping {}", mapping.display()))?,
        ),
        (_, None, Some(root)) => ImageSource::Inline {
            images_root: root.clone(),
        },
        (_, None, None) => bail!("image requests need --mapping or --images-root"),
    };

    let output = args.output.clone().unwrap_or_else(|| {
        PathBuf::from(requests::default_request_file_name(
            &requests::source_label(&args.benchmark),
            &config.model,
        ))
    });
    let request_builder = RequestBuilder {
        vendor: config.vendor(),
        model: config.model.clone(),
        kind,
        instructions,
        reasoning_effort: config.reasoning_effort,
        images,
    };

    let mut summary =
        requests::write_requests(&benchmark.rows, &request_builder, &output, config.chunk_max_bytes)
            .context("Failed to write requests")?;
    summary.skipped_rows = benchmark.skipped;

    if !quiet {
        eprintln!(
            "{}  {} requests  →  {}",
            if summary.problems.is_empty() { green("✔") } else { cyan("⚠") },
            bold(&summary.written.to_string()),
            summary
                .files
                .iter()
                .map(|f| f.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        );
        eprintln!(
            "   {} rows skipped (no year/page)  /  {} with empty OCR text  /  {} without image",
            dim(&summary.skipped_rows.to_string()),
            dim(&summary.missing_text.to_string()),
            dim(&summary.problems.len().to_string()),
        );
    }
    Ok(())
}

// ── upload-images ────────────────────────────────────────────────────────────

async fn run_upload(args: UploadArgs, quiet: bool) -> Result<()> {
    let config = config_builder(&args.vendor)
        .workers(args.workers)
        .build()
        .context("Invalid configuration")?;

    let benchmark = read_benchmark(&args.benchmark)
        .with_context(|| format!("Failed to read benchmark {}", args.benchmark.display()))?;
    let existing = if args.no_resume {
        Default::default()
    } else {
        upload::existing_keys(&args.mapping).context("Failed to read existing mapping")?
    };
    let plan = upload::plan_uploads(&benchmark.rows, &args.images_root, &existing, args.limit)
        .context("Failed to plan uploads")?;

    let client = VendorClient::from_env(config.vendor(), &config)
        .context("Failed to configure vendor client")?;

    let progress: Option<ProgressCallback> = if !quiet && !args.no_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn UploadProgressCallback>)
    } else {
        None
    };

    let summary = upload::upload_images(
        &client,
        plan,
        &args.mapping,
        &UploadOptions::from_config(&config),
        progress,
    )
    .await
    .context("Upload failed")?;

    if !quiet {
        eprintln!(
            "   {} uploaded  /  {} already in mapping  /  {} missing images  /  {} failed",
            bold(&summary.uploaded.to_string()),
            dim(&summary.skipped_existing.to_string()),
            dim(&summary.missing_images.len().to_string()),
            red(&summary.failed_count().to_string()),
        );
        for problem in &summary.failed {
            eprintln!("   {} {}", red("✗"), problem);
        }
    }
    Ok(())
}

// ── submit ───────────────────────────────────────────────────────────────────

async fn run_submit(args: SubmitArgs, quiet: bool) -> Result<()> {
    let config = config_builder(&args.vendor)
        .completion_window(args.completion_window.clone())
        .build()
        .context("Invalid configuration")?;
    let client = VendorClient::from_env(config.vendor(), &config)
        .context("Failed to configure vendor client")?;
    let retry = RetryPolicy::from_config(&config);
    let validate = !args.no_validate;

    let mut handles = Vec::new();
    for input in &args.inputs {
        if input.is_dir() {
            let submitted = batch::submit_chunk_dir(
                &client,
                input,
                &args.pattern,
                &config.model,
                args.display_name.as_deref(),
                validate,
                retry,
            )
            .await
            .with_context(|| format!("Failed to submit chunks in {}", input.display()))?;
            handles.extend(submitted);
        } else {
            let display_name = args
                .display_name
                .clone()
                .unwrap_or_else(|| requests_stem(input));
            let handle = batch::submit_request_file(
                &client,
                input,
                &config.model,
                &display_name,
                validate,
                retry,
            )
            .await
            .with_context(|| format!("Failed to submit {}", input.display()))?;
            handles.push(handle);
        }
    }

    if !quiet {
        for handle in &handles {
            eprintln!(
                "{}  {} batch {}  {}",
                green("✔"),
                handle.vendor,
                bold(&handle.id),
                dim(&handle.display_name)
            );
        }
    }
    Ok(())
}

fn requests_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "requests".to_string())
}

// ── status ───────────────────────────────────────────────────────────────────

fn status_line(name: &str, status: &BatchStatus) -> String {
    let counts = status
        .request_counts
        .map(|c| format!("  {}/{} done, {} failed", c.completed, c.total, c.failed))
        .unwrap_or_default();
    let marker = match status.state {
        JobState::Succeeded => green("✔"),
        JobState::Failed | JobState::Cancelled => red("✘"),
        JobState::Pending | JobState::Running => cyan("◆"),
    };
    format!("{marker}  {name}  {}{}", bold(&status.raw_state), dim(&counts))
}

async fn run_status(args: StatusArgs, quiet: bool) -> Result<()> {
    let mut failures = 0usize;
    for path in &args.handles {
        let handle = batch::load_job_handle(path)
            .with_context(|| format!("Failed to read job handle for {}", path.display()))?;
        let config = PipelineConfig::builder()
            .model(handle.model.clone())
            .vendor(handle.vendor)
            .max_retries(args.max_retries)
            .http_timeout_secs(args.http_timeout)
            .poll_interval_secs(args.interval)
            .build()
            .context("Invalid configuration")?;
        let client = VendorClient::from_env(handle.vendor, &config)
            .context("Failed to configure vendor client")?;
        let name = batch::result_base_name(path);

        let polled = if args.wait {
            batch::wait_for_completion(
                &client,
                &handle,
                Duration::from_secs(config.poll_interval_secs),
                |s| {
                    if !quiet {
                        eprintln!("{}", status_line(&name, s));
                    }
                },
            )
            .await
        } else {
            client.get_batch(&handle).await
        };
        let status = polled.with_context(|| format!("Failed to get status of {}", handle.id))?;

        if !args.wait && !quiet {
            eprintln!("{}", status_line(&name, &status));
        }
        for err in &status.errors {
            eprintln!("   {} {}", red("✗"), err);
        }

        if args.no_download || !status.state.is_terminal() {
            continue;
        }
        let output_path = args.output_dir.join(format!("{name}.output.jsonl"));
        let errors_path = args.output_dir.join(format!("{name}.errors.jsonl"));
        let fetched = batch::fetch_results(
            &client,
            &status,
            &output_path,
            &errors_path,
            RetryPolicy::from_config(&config),
        )
        .await
        .with_context(|| format!("Failed to download results of {}", handle.id))?;

        if !quiet {
            for saved in fetched.output.iter().chain(fetched.errors.iter()) {
                eprintln!("   → {}", bold(&saved.display().to_string()));
            }
        }
        for problem in &fetched.failed_requests {
            println!("{problem}");
        }
        failures += fetched.failed_requests.len();
    }

    if failures > 0 && !quiet {
        eprintln!("{} {} failed request(s)", cyan("⚠"), red(&failures.to_string()));
    }
    Ok(())
}

// ── extract ──────────────────────────────────────────────────────────────────

fn run_extract(args: ExtractArgs, quiet: bool) -> Result<()> {
    let mut files = Vec::new();
    for input in &args.inputs {
        if input.is_dir() {
            files.extend(
                extract::find_output_files(input, &args.pattern)
                    .with_context(|| format!("Failed to list {}", input.display()))?,
            );
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            bail!("File not found: {}", input.display());
        }
    }

    let summaries = match &args.out_dir {
        Some(out_dir) => vec![extract::extract_output_files(&files, out_dir)
            .context("Extraction failed")?],
        None => files
            .iter()
            .map(|f| {
                let out_dir = args.root.join(extract::infer_bucket_name(f));
                extract::extract_output_file(f, &out_dir)
                    .with_context(|| format!("Failed to extract {}", f.display()))
            })
            .collect::<Result<Vec<_>>>()?,
    };

    if !quiet {
        for summary in &summaries {
            eprintln!(
                "{}  {} pages  →  {}",
                if summary.problems.is_empty() { green("✔") } else { cyan("⚠") },
                bold(&summary.written.to_string()),
                summary.out_dir.display(),
            );
            eprintln!(
                "   {} missing text  /  {} invalid lines",
                dim(&summary.missing.to_string()),
                dim(&summary.parse_errors.to_string()),
            );
        }
    }
    Ok(())
}

// ── repair ───────────────────────────────────────────────────────────────────

fn run_repair(args: RepairArgs, quiet: bool) -> Result<()> {
    let options = RepairOptions {
        pattern: args.pattern,
        recursive: args.recursive,
        limit: args.limit,
        ..RepairOptions::new(&args.input_dir, &args.output_dir)
    };
    let reports = repair::repair_tree(&options).context("Repair failed")?;

    let mut with_issues = 0usize;
    let mut unrepaired = 0usize;
    for report in &reports {
        let outcome = report.outcome();
        if outcome != RepairOutcome::NoIssues {
            with_issues += 1;
        }
        unrepaired += report.failed();
        if quiet {
            continue;
        }
        let marker = match outcome {
            RepairOutcome::NoIssues => green("✓"),
            RepairOutcome::FullyRepaired => cyan("↻"),
            RepairOutcome::Unrepaired(_) => red("✗"),
        };
        println!(
            "  {} {}  {}",
            marker,
            report.source.display(),
            dim(&format!("{} rows, {}", report.total_rows, outcome))
        );
        for issue in report.issues.iter().filter(|i| !i.repaired) {
            println!(
                "      line {} ({} tabs): {}",
                issue.line_number,
                issue.tab_count,
                dim(&issue.raw_line)
            );
        }
    }

    if !quiet {
        eprintln!(
            "{}  {} files  /  {} with issues  /  {} lines unrepaired  →  {}",
            if unrepaired == 0 { green("✔") } else { cyan("⚠") },
            bold(&reports.len().to_string()),
            with_issues,
            unrepaired,
            options.output_dir.display(),
        );
    }
    Ok(())
}

// ── compare ──────────────────────────────────────────────────────────────────

fn run_compare(args: CompareArgs) -> Result<()> {
    println!("{:<40} {:>8} {:>8} {:>9}", "file", "WER", "CER", "entries");
    println!("{}", "─".repeat(68));
    for hypothesis in &args.hypotheses {
        let comparison = compare_files(&args.reference, hypothesis)
            .with_context(|| format!("Failed to compare {}", hypothesis.display()))?;
        println!("{}", comparison.table_row());
        if let Some(dir) = &args.report_dir {
            comparison
                .write_report(dir)
                .with_context(|| format!("Failed to write report to {}", dir.display()))?;
        }
    }
    Ok(())
}

// ── targets ──────────────────────────────────────────────────────────────────

fn run_targets(args: TargetsArgs) -> Result<()> {
    let targets = read_targets(&args.targets, &args.years)
        .with_context(|| format!("Failed to read targets {}", args.targets.display()))?;

    let (mut found, mut missing) = (0usize, 0usize);
    for target in &targets {
        for page in target.pages() {
            let page = format!("{page:04}");
            match find_image(&args.images_root, &target.year, &page) {
                Some(path) => {
                    found += 1;
                    if !args.missing_only {
                        println!("{} {}", green("✓"), path.display());
                    }
                }
                None => {
                    missing += 1;
                    let expected = args
                        .images_root
                        .join(&target.year)
                        .join(format!("{}-page-{page}.png", target.year));
                    println!("{} {}", red("✗"), expected.display());
                }
            }
        }
    }
    eprintln!(
        "{}  {} ranges  /  {} images found  /  {} missing",
        if missing == 0 { green("✔") } else { cyan("⚠") },
        targets.len(),
        bold(&found.to_string()),
        red(&missing.to_string()),
    );
    Ok(())
}
