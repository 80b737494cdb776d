//! CLI binary for checkmate-submit.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `SubmissionConfig` and prints evaluation results.

use anyhow::{Context, Result};
use clap::Parser;
use checkmate_submit::{
    ChecksumMode, ProgressCallback, SubmissionConfig, SubmissionError, SubmissionOutput,
    SubmissionProgressCallback, SubmissionState, Submitter,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One byte-progress bar per file. Files finish out of order when several
/// are submitted at once, so bars are looked up by the full path the library
/// reports; only the file name is printed.
struct CliProgressCallback {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self::with_multi(MultiProgress::new()))
    }

    fn with_multi(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            failures: AtomicUsize::new(0),
        }
    }

    fn bar(&self, file: &str) -> Option<ProgressBar> {
        self.bars.lock().ok()?.get(file).cloned()
    }

    fn take_bar(&self, file: &str) -> Option<ProgressBar> {
        self.bars.lock().ok()?.remove(file)
    }

    fn println(&self, line: String) {
        if self.multi.println(&line).is_err() {
            eprintln!("{line}");
        }
    }
}

impl SubmissionProgressCallback for CliProgressCallback {
    fn on_submission_start(&self, file: &str, size_bytes: u64) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] \
             {bytes}/{total_bytes}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        let bar = self.multi.add(ProgressBar::new(size_bytes));
        bar.set_style(style);
        bar.set_prefix(label(file).to_string());
        bar.set_message("starting…");
        bar.enable_steady_tick(Duration::from_millis(80));

        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(file.to_string(), bar);
        }
    }

    fn on_state_change(&self, file: &str, state: SubmissionState) {
        if let Some(bar) = self.bar(file) {
            bar.set_message(state.to_string());
        }
    }

    fn on_upload_progress(&self, file: &str, sent: u64, _total: u64) {
        if let Some(bar) = self.bar(file) {
            bar.set_position(sent);
        }
    }

    fn on_auth_refresh(&self, file: &str) {
        self.println(format!(
            "  {} {}  {}",
            cyan("↻"),
            label(file),
            dim("storage credential rejected, re-authorizing")
        ));
    }

    fn on_submission_complete(&self, file: &str, public_url: &str) {
        if let Some(bar) = self.take_bar(file) {
            bar.finish_and_clear();
        }
        self.println(format!(
            "  {} {}  {}",
            green("✓"),
            bold(label(file)),
            dim(public_url)
        ));
    }

    fn on_submission_failed(&self, file: &str, stage: SubmissionState, stored: bool, error: &str) {
        if let Some(bar) = self.take_bar(file) {
            bar.finish_and_clear();
        }
        self.failures.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        let note = if stored { " (file is stored)" } else { "" };
        self.println(format!(
            "  {} {}  {} {}{}",
            red("✗"),
            bold(label(file)),
            dim(&format!("while {stage}:")),
            red(&msg),
            dim(note),
        ));
    }
}

/// File-name part of a progress key.
fn label(file: &str) -> &str {
    Path::new(file)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file)
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Submit one answer sheet
  checkmate answers.pdf

  # Several files, two at a time, JSON on stdout
  checkmate --concurrency 2 --json q1.pdf q2.pdf q3.pdf > results.json

  # A path handed over by a document picker
  checkmate 'file:///storage/emulated/0/Download/scan%201.pdf'

  # Evaluate a document that is already public (no upload)
  checkmate --url https://f005.backblazeb2.com/file/CheckMate/report_123.pdf

ENVIRONMENT VARIABLES:
  B2_KEY_ID                  Storage application key id (required unless --url)
  B2_APPLICATION_KEY         Storage application key (required unless --url)
  B2_BUCKET_ID               Target bucket id (required unless --url)
  B2_BUCKET_NAME             Bucket name used in public URLs (default: CheckMate)
  B2_DOWNLOAD_URL            Public download base (default: https://f005.backblazeb2.com)
  B2_AUTH_URL                Authorization base (default: https://api.backblazeb2.com)
  CHECKMATE_BACKEND_URL      Evaluation backend base URL (required)
  CHECKMATE_EVALUATION_PATH  Evaluation endpoint path (default: /api/main-answer)
  RUST_LOG                   Overrides the log filter
"#;

/// Submit documents for automated evaluation.
#[derive(Parser, Debug)]
#[command(
    name = "checkmate",
    version,
    about = "Upload documents to public storage and request their evaluation",
    long_about = "Store each document in a public Backblaze B2 bucket, then ask the \
evaluation backend to fetch and grade it by URL. Prints the backend's JSON answer.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file paths or file:// URIs.
    #[arg(required_unless_present = "url", conflicts_with = "url")]
    inputs: Vec<String>,

    /// Skip the upload and evaluate an already public document URL.
    #[arg(long)]
    url: Option<String>,

    #[arg(long, env = "B2_KEY_ID", hide_env_values = true, required_unless_present = "url")]
    key_id: Option<String>,

    #[arg(
        long,
        env = "B2_APPLICATION_KEY",
        hide_env_values = true,
        required_unless_present = "url"
    )]
    application_key: Option<String>,

    #[arg(long, env = "B2_BUCKET_ID", required_unless_present = "url")]
    bucket_id: Option<String>,

    #[arg(long, env = "B2_BUCKET_NAME", default_value = "CheckMate")]
    bucket_name: String,

    #[arg(long, env = "B2_DOWNLOAD_URL", default_value = "https://f005.backblazeb2.com")]
    download_url: String,

    #[arg(long, env = "B2_AUTH_URL", default_value = "https://api.backblazeb2.com")]
    auth_url: String,

    /// Evaluation backend base URL.
    #[arg(long, env = "CHECKMATE_BACKEND_URL")]
    backend_url: String,

    #[arg(long, env = "CHECKMATE_EVALUATION_PATH", default_value = "/api/main-answer")]
    evaluation_path: String,

    /// Send the provider's "do_not_verify" sentinel instead of a real SHA-1.
    #[arg(long)]
    do_not_verify: bool,

    /// Reject files larger than this many bytes before uploading.
    #[arg(long, env = "CHECKMATE_MAX_FILE_BYTES", default_value_t = 512 * 1024 * 1024)]
    max_file_bytes: u64,

    /// Number of files submitted at the same time.
    #[arg(short, long, env = "CHECKMATE_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries for authorization and upload-target requests on transient errors.
    #[arg(long, env = "CHECKMATE_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Timeout in seconds for every request except the upload.
    #[arg(long, env = "CHECKMATE_REQUEST_TIMEOUT", default_value_t = 30)]
    request_timeout: u64,

    /// Timeout in seconds for the upload itself.
    #[arg(long, env = "CHECKMATE_UPLOAD_TIMEOUT", default_value_t = 600)]
    upload_timeout: u64,

    /// Print structured JSON (outputs and errors) instead of evaluation bodies.
    #[arg(long)]
    json: bool,

    /// Disable progress bars.
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
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bars cover what INFO logs would say.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && cli.url.is_none();
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

    // ── URL-only mode ────────────────────────────────────────────────────
    if let Some(ref url) = cli.url {
        let submitter =
            Submitter::evaluation_only(evaluation_config(&cli)).context("Invalid configuration")?;
        let evaluation = submitter
            .evaluate_url(url)
            .await
            .context("Evaluation failed")?;
        println!(
            "{}",
            serde_json::to_string_pretty(evaluation.as_json())
                .context("Failed to serialise evaluation")?
        );
        return Ok(());
    }

    // ── Submit files ─────────────────────────────────────────────────────
    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(
        &cli,
        progress
            .clone()
            .map(|cb| cb as Arc<dyn SubmissionProgressCallback>),
    )?;
    let submitter = Submitter::new(config).context("Invalid configuration")?;
    let results = submitter.submit_all(&cli.inputs).await;
    let failed = results.iter().filter(|r| r.is_err()).count();

    if cli.json {
        let rendered: Vec<serde_json::Value> = results.iter().map(to_json).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&rendered).context("Failed to serialise output")?
        );
    } else {
        for result in &results {
            match result {
                Ok(output) => println!(
                    "{}",
                    serde_json::to_string_pretty(output.evaluation.as_json())
                        .context("Failed to serialise evaluation")?
                ),
                // Already reported by the progress callback.
                Err(_) if show_progress => {}
                Err(e) => eprintln!("{} {}", red("✗"), e),
            }
        }
    }

    if !cli.quiet && !cli.json {
        let ok = results.len() - failed;
        eprintln!(
            "{} {}/{} submitted",
            if failed == 0 { green("✔") } else { red("✘") },
            bold(&ok.to_string()),
            results.len(),
        );
        if let Some(stored) = results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .find_map(|e| e.stored.as_ref())
        {
            eprintln!(
                "   {} re-run with --url {} to retry only the evaluation",
                dim("hint:"),
                stored.public_url
            );
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} submissions failed", results.len());
    }
    Ok(())
}

/// Map CLI args to `SubmissionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<SubmissionConfig> {
    let checksum = if cli.do_not_verify {
        ChecksumMode::DoNotVerify
    } else {
        ChecksumMode::Sha1
    };

    let mut builder = SubmissionConfig::builder()
        .key_id(cli.key_id.clone().unwrap_or_default())
        .application_key(cli.application_key.clone().unwrap_or_default())
        .bucket_id(cli.bucket_id.clone().unwrap_or_default())
        .bucket_name(&cli.bucket_name)
        .download_url(&cli.download_url)
        .auth_url(&cli.auth_url)
        .backend_url(&cli.backend_url)
        .evaluation_path(&cli.evaluation_path)
        .checksum(checksum)
        .max_file_bytes(cli.max_file_bytes)
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .request_timeout_secs(cli.request_timeout)
        .upload_timeout_secs(cli.upload_timeout);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Backend settings only; `--url` never touches storage.
fn evaluation_config(cli: &Cli) -> SubmissionConfig {
    SubmissionConfig {
        backend_url: cli.backend_url.clone(),
        evaluation_path: cli.evaluation_path.clone(),
        request_timeout_secs: cli.request_timeout,
        ..Default::default()
    }
}

fn to_json(result: &Result<SubmissionOutput, SubmissionError>) -> serde_json::Value {
    match result {
        Ok(output) => serde_json::json!({
            "ok": true,
            "file": output.source.display_name,
            "stored": output.stored,
            "evaluation": output.evaluation,
            "stats": output.stats,
        }),
        Err(e) => serde_json::json!({
            "ok": false,
            "stage": e.stage,
            "stored": e.stored,
            "error": e.source.to_string(),
        }),
    }
}
