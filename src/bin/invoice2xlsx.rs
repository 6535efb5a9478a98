//! CLI binary for invoice-sheets.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints per-file results.

use anyhow::{Context, Result};
use clap::Parser;
use invoice_sheets::{
    Batch, BatchConverter, BatchFile, BatchProgressCallback, BatchResult, PipelineConfig,
    ProgressCallback, TaskState,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished file. Files finish out
/// of order, so start times are tracked per index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:32.green/238}] {pos:>2}/{len} files  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut t| t.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
    }

    fn on_stage(&self, index: usize, name: &str, state: &TaskState) {
        if *state == TaskState::Recognizing {
            if let Ok(mut times) = self.start_times.lock() {
                times.insert(index, Instant::now());
            }
        }
        self.bar.set_message(format!("{name}: {}", state.label()));
    }

    fn on_file_complete(&self, index: usize, name: &str, total: usize, degraded: bool) {
        let secs = self.elapsed_secs(index);
        let mark = if degraded { yellow("~") } else { green("✓") };
        self.bar.println(format!(
            "  {} {:>2}/{:<2}  {}{}  {}",
            mark,
            index + 1,
            total,
            name,
            if degraded {
                dim("  (raw model output)")
            } else {
                String::new()
            },
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, index: usize, name: &str, total: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>2}/{:<2}  {}  {}  {}",
            red("✗"),
            index + 1,
            total,
            name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _total_files: usize, _success_count: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert three photos for one user
  invoice2xlsx --owner u_123 scan-1.jpg scan-2.jpg scan-3.png

  # Keep the spreadsheets somewhere else and attach the photos to the records
  invoice2xlsx --owner u_123 --output-dir sheets --attach-image *.jpg

  # Machine-readable result
  invoice2xlsx --owner u_123 --json scan.jpg > result.json

ENVIRONMENT VARIABLES:
  API_ENDPOINT            OCR "read" endpoint
  API_TOKEN               OCR subscription key
  OPENAI_API_KEY          OpenAI API key (default LLM provider)
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  STORAGE_URL             Storage backend base URL
  STORAGE_TOKEN           Bearer token for the storage backend

  A .env file in the working directory is loaded first.

EXIT STATUS:
  0  every file was stored
  1  at least one file failed, or the batch was rejected
"#;

/// Convert photographed invoices into stored spreadsheets.
#[derive(Parser, Debug)]
#[command(
    name = "invoice2xlsx",
    version,
    about = "Convert photographed invoices into stored spreadsheets",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Invoice images (at most 10).
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Owner id recorded on every stored spreadsheet.
    #[arg(long, env = "INVOICE_OWNER")]
    owner: String,

    /// OCR "read" endpoint.
    #[arg(long, env = "API_ENDPOINT")]
    ocr_endpoint: String,

    /// OCR subscription key.
    #[arg(long, env = "API_TOKEN", hide_env_values = true)]
    ocr_key: String,

    /// Seconds to wait before fetching OCR results.
    #[arg(long, env = "INVOICE_OCR_DELAY", default_value_t = 2)]
    ocr_delay: u64,

    /// LLM model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Max LLM output tokens per file.
    #[arg(long, env = "INVOICE_MAX_TOKENS", default_value_t = 1500)]
    max_tokens: usize,

    /// Path to a text file with a custom prompt (must contain `{text}`).
    #[arg(long, env = "INVOICE_PROMPT")]
    prompt: Option<PathBuf>,

    /// Storage backend base URL.
    #[arg(long, env = "STORAGE_URL", default_value = "http://localhost:8090")]
    storage_url: String,

    /// Storage collection receiving one record per file.
    #[arg(long, env = "STORAGE_COLLECTION", default_value = "excel_files")]
    collection: String,

    /// Bearer token for the storage backend.
    #[arg(long, env = "STORAGE_TOKEN", hide_env_values = true)]
    storage_token: Option<String>,

    /// Also upload the source image with each record.
    #[arg(long)]
    attach_image: bool,

    /// Directory for generated spreadsheets.
    #[arg(short, long, env = "INVOICE_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Maximum files processed at once.
    #[arg(short, long, env = "INVOICE_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "INVOICE_HTTP_TIMEOUT", default_value_t = 60)]
    http_timeout: u64,

    /// Print the batch result as JSON.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; explicit env vars and flags still apply.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    let config = build_config(&cli).await?;
    let batch = admit(&cli, &config)?;

    let mut converter = BatchConverter::from_config(config).context("Failed to set up services")?;
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        converter = converter.with_progress(cb);
    }

    let result = converter.convert_batch(batch).await;

    if cli.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
        println!("{json}");
    } else if !cli.quiet {
        print_report(&result);
    }

    if result.failed() > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Reject an oversized batch before any provider or HTTP client is set up.
fn admit(cli: &Cli, config: &PipelineConfig) -> Result<Batch> {
    let files = cli.images.iter().cloned().map(BatchFile::from_path).collect();
    Batch::new(files, cli.owner.clone(), config.max_batch_size).context("Batch rejected")
}

/// One stdout line per file, then the summary on stderr.
fn print_report(result: &BatchResult) {
    for file in &result.files {
        match &file.result {
            Ok(record) => println!("{}\t{}\t{}", file.name, record.id, record.file_name),
            Err(e) => println!("{}\t-\t{}", file.name, e),
        }
    }

    let mark = if result.failed() == 0 {
        green("✔")
    } else if result.succeeded() == 0 {
        red("✘")
    } else {
        yellow("⚠")
    };
    eprintln!(
        "{} {}  {}",
        mark,
        bold(&result.summary()),
        dim(&format!("{}ms", result.total_duration_ms))
    );
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .ocr_endpoint(cli.ocr_endpoint.clone())
        .ocr_key(cli.ocr_key.clone())
        .ocr_settle_delay(Duration::from_secs(cli.ocr_delay))
        .max_tokens(cli.max_tokens)
        .storage_base_url(cli.storage_url.clone())
        .storage_collection(cli.collection.clone())
        .attach_source_image(cli.attach_image)
        .output_dir(cli.output_dir.clone())
        .concurrency(cli.concurrency)
        .http_timeout_secs(cli.http_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref token) = cli.storage_token {
        builder = builder.storage_token(token.clone());
    }
    if let Some(ref path) = cli.prompt {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.prompt_template(template);
    }

    builder.build().context("Invalid configuration")
}
