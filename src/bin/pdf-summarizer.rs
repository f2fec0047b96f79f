//! CLI binary for pdf-summarizer.
//!
//! `serve` runs the HTTP service; `summarize` runs one task in-process and
//! prints the result. Both map CLI flags onto `SummarizerConfig`.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdf_summarizer::server::{self, ServerOptions};
use pdf_summarizer::{
    ImageFormat, Orchestrator, Pipeline, SummarizerConfig, TaskStatus, TaskStore, Upload,
};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service on port 8000
  pdf-summarizer serve

  # Summarise one file in the terminal
  pdf-summarizer summarize report.pdf

  # Use a specific model, JSON output
  pdf-summarizer --model gpt-4o --provider openai summarize report.pdf --json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium, skips auto-download
  RUST_LOG                Log filter (overrides -v / -q)
"#;

/// Summarise PDF documents with Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-summarizer",
    version,
    about = "Summarise PDF documents with Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF_SUMMARIZER_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF_SUMMARIZER_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "PDF_SUMMARIZER_BIND", default_value = "0.0.0.0:8000")]
        bind: SocketAddr,

        /// Allowed CORS origins (comma separated, `*` for any).
        #[arg(
            long,
            env = "PDF_SUMMARIZER_CORS_ORIGINS",
            value_delimiter = ',',
            default_value = "http://localhost:3000,http://localhost:5173"
        )]
        cors_origins: Vec<String>,
    },

    /// Summarise a single PDF and print the result.
    Summarize {
        /// PDF file to summarise.
        input: PathBuf,

        /// Print the final task as JSON instead of the summary text.
        #[arg(long)]
        json: bool,

        /// Disable progress bar.
        #[arg(long, env = "PDF_SUMMARIZER_NO_PROGRESS")]
        no_progress: bool,
    },
}

#[derive(Args, Debug)]
struct Settings {
    /// LLM model ID (default: gpt-4o-mini).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, global = true, env = "PDF_SUMMARIZER_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Page image format: png or jpeg.
    #[arg(long, global = true, env = "PDF_SUMMARIZER_IMAGE_FORMAT", default_value = "png")]
    image_format: ImageFormat,

    /// Maximum number of pages per document.
    #[arg(long, global = true, env = "PDF_SUMMARIZER_MAX_PAGES", default_value_t = 100)]
    max_pages: usize,

    /// Maximum upload size in bytes.
    #[arg(long, global = true, env = "PDF_SUMMARIZER_MAX_FILE_SIZE", default_value_t = 50 * 1024 * 1024)]
    max_file_size: u64,

    /// Directory for uploaded PDFs.
    #[arg(long, global = true, env = "PDF_SUMMARIZER_UPLOAD_DIR", default_value = "./uploads")]
    upload_dir: PathBuf,

    /// Directory for rendered page images (summarize: a fresh temp dir when unset).
    #[arg(long, global = true, env = "PDF_SUMMARIZER_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Number of completed documents kept in history.
    #[arg(long, global = true, env = "PDF_SUMMARIZER_HISTORY_SIZE", default_value_t = 5)]
    history_size: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "PDF_SUMMARIZER_TEMPERATURE", default_value_t = 0.3)]
    temperature: f32,

    /// Max LLM output tokens per call.
    #[arg(long, global = true, env = "PDF_SUMMARIZER_MAX_TOKENS", default_value_t = 1000)]
    max_tokens: usize,

    /// Vision detail level: low, high or auto.
    #[arg(long, global = true, env = "PDF_SUMMARIZER_VISION_DETAIL", default_value = "auto")]
    vision_detail: String,

    /// Attempts per page when rate-limited (1-10).
    #[arg(
        long,
        global = true,
        env = "PDF_SUMMARIZER_MAX_ATTEMPTS",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..=10)
    )]
    max_attempts: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, global = true, env = "PDF_SUMMARIZER_API_TIMEOUT", default_value_t = 300)]
    api_timeout: u64,

    /// Hours a finished task stays queryable (serve only).
    #[arg(long, global = true, env = "PDF_SUMMARIZER_TASK_TTL_HOURS", default_value_t = 24)]
    task_ttl_hours: u64,
}

impl Settings {
    fn to_config(&self, temp_dir: PathBuf) -> Result<SummarizerConfig> {
        let mut builder = SummarizerConfig::builder()
            .dpi(self.dpi)
            .image_format(self.image_format)
            .max_pages(self.max_pages)
            .max_file_size(self.max_file_size)
            .upload_dir(&self.upload_dir)
            .temp_dir(temp_dir)
            .max_history_size(self.history_size)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .vision_detail(&self.vision_detail)
            .max_attempts(self.max_attempts)
            .api_timeout_secs(self.api_timeout)
            .task_ttl_hours(self.task_ttl_hours);
        if let Some(model) = &self.model {
            builder = builder.model(model);
        }
        if let Some(provider) = &self.provider {
            builder = builder.provider_name(provider);
        }
        builder.build().context("Invalid configuration")
    }
}

fn build_orchestrator(config: SummarizerConfig) -> Result<Orchestrator> {
    let pipeline = Pipeline::from_config(&config).context("Failed to initialise LLM provider")?;
    let store = Arc::new(TaskStore::new(config.max_history_size));
    Ok(Orchestrator::new(store, Arc::new(config), pipeline))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The summarize progress bar replaces INFO-level logs.
    let show_progress = matches!(
        cli.command,
        Command::Summarize { json: false, no_progress: false, .. }
    ) && !cli.quiet;
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

    ensure_pdfium(cli.quiet)?;

    match cli.command {
        Command::Serve { bind, cors_origins } => {
            let temp_dir = cli
                .settings
                .temp_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("./temp"));
            let orchestrator = build_orchestrator(cli.settings.to_config(temp_dir)?)?;
            server::serve(orchestrator, ServerOptions { bind, cors_origins })
                .await
                .context("HTTP server failed")
        }
        Command::Summarize {
            input,
            json,
            no_progress,
        } => {
            // Keep the TempDir guard alive until the run is over.
            let (temp_dir, _guard) = match &cli.settings.temp_dir {
                Some(dir) => (dir.clone(), None),
                None => {
                    let dir = tempfile::tempdir().context("Failed to create temp directory")?;
                    (dir.path().to_path_buf(), Some(dir))
                }
            };
            let config = cli.settings.to_config(temp_dir)?;
            let show_bar = !cli.quiet && !json && !no_progress;
            summarize(config, input, json, show_bar).await
        }
    }
}

/// Make sure the pdfium library is present before any work starts.
fn ensure_pdfium(quiet: bool) -> Result<()> {
    #[cfg(feature = "bundled")]
    {
        let _ = quiet;
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_bundled())
            .context("Failed to extract bundled PDFium engine")?;
    }

    #[cfg(not(feature = "bundled"))]
    if !pdfium_auto::is_pdfium_cached() {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {bytes}/{total_bytes}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_strings(SPINNER),
        );
        bar.set_prefix("PDF engine");
        bar.enable_steady_tick(Duration::from_millis(80));

        let progress = bar.clone();
        tokio::task::block_in_place(|| {
            pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
                if let Some(t) = total {
                    progress.set_length(t);
                }
                progress.set_position(downloaded);
            }))
        })
        .context("Failed to download PDFium engine")?;
        bar.finish_and_clear();
    }
    Ok(())
}

async fn summarize(config: SummarizerConfig, input: PathBuf, json: bool, show_bar: bool) -> Result<()> {
    let filename = input
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .context("Input path has no file name")?;
    if !config.is_file_allowed(&filename) {
        bail!(
            "Invalid file type. Allowed extensions: {:?}",
            config.allowed_extensions
        );
    }
    let size = tokio::fs::metadata(&input)
        .await
        .with_context(|| format!("Cannot read '{}'", input.display()))?
        .len();
    if size > config.max_file_size {
        bail!("File too large ({size} bytes). Maximum is {} bytes", config.max_file_size);
    }

    let orchestrator = build_orchestrator(config)?;
    let store = orchestrator.store().clone();
    let id = orchestrator.submit(Upload {
        filename: filename.clone(),
        path: input,
        size,
    })?;

    let bar = if show_bar {
        ProgressBar::new(100)
    } else {
        ProgressBar::hidden()
    };
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER),
    );
    bar.set_prefix("Summarising");
    bar.set_message(filename);
    bar.enable_steady_tick(Duration::from_millis(80));

    let task = loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let Some(task) = store.get(&id) else {
            bail!("Task {id} disappeared from the store");
        };
        bar.set_position(u64::from(task.progress));
        if task.status.is_terminal() {
            break task;
        }
    };
    bar.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
        return match task.status {
            TaskStatus::Failed => bail!("{}", task.error.unwrap_or_default()),
            _ => Ok(()),
        };
    }

    match (task.status, task.result, task.error) {
        (TaskStatus::Completed, Some(result), _) => {
            eprintln!(
                "{} {} ({} pages)",
                green("✓"),
                bold(&result.filename),
                result.page_count
            );
            println!("{}", result.summary);
            Ok(())
        }
        (_, _, error) => {
            let message = error.unwrap_or_else(|| "unknown error".to_string());
            eprintln!("{} {}", red("✗"), message);
            bail!(message)
        }
    }
}
