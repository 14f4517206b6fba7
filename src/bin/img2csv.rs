//! CLI binary for edgequake-img2csv.
//!
//! A thin shim over the library crate that maps CLI flags to `RunConfig` and
//! `VisionConfig`, renders progress, and turns the run outcome into an exit
//! status: 0 when every image was recorded or skipped, 2 when any image
//! failed, 1 on a fatal error.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_img2csv::{
    collect, CollectProgressCallback, ImageSource, ProgressCallback, RunConfig, RunReport,
    RunStats, VisionConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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

/// Terminal progress callback: a bar over the pending images plus one log
/// line per extracted image.
struct CliProgressCallback {
    bar: ProgressBar,
    started: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_run_start

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Scanning images…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, pending: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(pending as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self) -> f64 {
        self.started
            .lock()
            .ok()
            .and_then(|mut s| s.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl CollectProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total: usize, pending: usize) {
        self.activate_bar(pending);
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(&format!("{pending} of {total} images to extract…")),
            dim(&format!("({} already recorded)", total - pending)),
        ));
    }

    fn on_image_start(&self, _index: usize, _total: usize, identifier: &str) {
        if let Ok(mut s) = self.started.lock() {
            *s = Some(Instant::now());
        }
        self.bar.set_message(identifier.to_string());
    }

    fn on_image_complete(&self, index: usize, total: usize, identifier: &str) {
        let secs = self.elapsed_secs();
        self.bar.println(format!(
            "  {} {:>4}/{:<4}  {}  {}",
            green("✓"),
            index,
            total,
            identifier,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_image_error(&self, index: usize, total: usize, identifier: &str, error: &str) {
        let secs = self.elapsed_secs();
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg = match error.char_indices().nth(80) {
            Some((i, _)) => format!("{}\u{2026}", &error[..i]),
            None => error.to_string(),
        };

        self.bar.println(format!(
            "  {} {:>4}/{:<4}  {}  {}  {}",
            red("✗"),
            index,
            total,
            identifier,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, stats: &RunStats) {
        self.bar.finish_and_clear();

        if stats.failed == 0 {
            eprintln!(
                "{} {} recorded, {} skipped",
                green("✔"),
                bold(&stats.recorded.to_string()),
                stats.skipped,
            );
        } else {
            eprintln!(
                "{} {}/{} recorded, {} skipped  ({} failed, rerun to retry them)",
                if stats.recorded == 0 { red("✘") } else { cyan("⚠") },
                bold(&stats.recorded.to_string()),
                stats.attempted(),
                stats.skipped,
                red(&self.errors.load(Ordering::SeqCst).to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract the visible text of every image in a folder
  img2csv --input-dir images -o results.csv

  # Resume after an interruption: already-recorded images are skipped
  img2csv --input-dir images -o results.csv

  # Several fields, half a second between API calls
  img2csv --input-dir receipts --fields merchant,date,total --delay 0.5 -o receipts.csv

  # One image only
  img2csv --input-file images/label-042.jpg -o results.csv

  # Throw away previous results and start again
  img2csv --input-dir images -o results.csv --overwrite

  # JSON run report on stdout
  img2csv --input-dir images --json > report.json

EXIT STATUS:
  0  every image was recorded or already present
  2  at least one image failed extraction (it stays pending for the next run)
  1  fatal error (missing input, corrupt or mismatched CSV, no provider)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Override log filter (e.g. edgequake_img2csv=debug)
"#;

/// Extract structured fields from images into a resumable CSV using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "img2csv",
    version,
    about = "Extract structured fields from images into a resumable CSV using Vision LLMs",
    long_about = "Send each image of a folder (or a single image) to a Vision Language Model, \
ask for the configured fields as JSON, and append one row per image to a CSV file. \
Images already in the CSV are skipped, so rerunning the same command resumes an interrupted job.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP,
    group(
        clap::ArgGroup::new("input")
            .required(true)
            .args(["input_dir", "input_file"])
    )
)]
struct Cli {
    /// CSV file the results are appended to.
    #[arg(short, long, env = "IMG2CSV_OUTPUT", default_value = "results.csv")]
    output: PathBuf,

    /// Process every image file in this directory.
    #[arg(long, env = "IMG2CSV_INPUT_DIR")]
    input_dir: Option<PathBuf>,

    /// Process this single file.
    #[arg(long, env = "IMG2CSV_INPUT_FILE")]
    input_file: Option<PathBuf>,

    /// Seconds to wait between consecutive API calls.
    #[arg(long, env = "IMG2CSV_DELAY", default_value_t = 1.0)]
    delay: f64,

    /// Discard previous results in the CSV and rebuild it from this run.
    #[arg(long, env = "IMG2CSV_OVERWRITE")]
    overwrite: bool,

    /// Comma-separated fields to extract; they become the CSV columns.
    #[arg(long, env = "IMG2CSV_FIELDS", value_delimiter = ',', default_value = "text")]
    fields: Vec<String>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "IMG2CSV_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per image.
    #[arg(long, env = "IMG2CSV_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "IMG2CSV_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per image on API failure.
    #[arg(long, env = "IMG2CSV_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call API timeout in seconds.
    #[arg(long, env = "IMG2CSV_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Print the run report as JSON on stdout.
    #[arg(long, env = "IMG2CSV_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "IMG2CSV_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "IMG2CSV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "IMG2CSV_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn CollectProgressCallback>)
    } else {
        None
    };

    let run = build_run_config(&cli, progress_cb)?;
    let vision = build_vision_config(&cli).await?;

    // ── Run ──────────────────────────────────────────────────────────────
    let report = collect(&run, &vision).await.context("Collection failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet && !show_progress {
        // The callback prints its own summary when the bar is active.
        let s = &report.stats;
        eprintln!(
            "{} recorded, {} skipped, {} failed in {}ms  →  {}",
            s.recorded,
            s.skipped,
            s.failed,
            s.total_duration_ms,
            report.store_path.display()
        );
        for id in report.failed_identifiers() {
            eprintln!("  failed: {id}");
        }
    }

    Ok(ExitCode::from(exit_status(&report)))
}

/// 0 when every image was recorded or skipped, 2 when any failed.
/// Fatal errors leave `main` through `Err` and exit with 1.
fn exit_status(report: &RunReport) -> u8 {
    if report.is_success() {
        0
    } else {
        2
    }
}

/// Map CLI args to `RunConfig`.
fn build_run_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<RunConfig> {
    let source = match (&cli.input_dir, &cli.input_file) {
        (Some(dir), None) => ImageSource::Directory(dir.clone()),
        (None, Some(file)) => ImageSource::File(file.clone()),
        _ => anyhow::bail!("Exactly one of --input-dir or --input-file is required"),
    };

    let mut builder = RunConfig::builder()
        .store_path(&cli.output)
        .source(source)
        .delay_secs(cli.delay)
        .overwrite(cli.overwrite)
        .fields(cli.fields.iter().cloned());

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Map CLI args to `VisionConfig`.
async fn build_vision_config(cli: &Cli) -> Result<VisionConfig> {
    let mut builder = VisionConfig::builder()
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}
