//! CLI binary for edgequake-pdf-insight.
//!
//! A thin shim over the library crate: maps CLI flags and environment
//! onto `InsightConfig`, builds the collaborators once, then analyses one
//! PDF (`analyze`) or a stream of them (`interactive`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use edgequake_pdf_insight::logging::{log_path, open_log_file, read_log};
use edgequake_pdf_insight::pipeline::query::derive_research_query;
use edgequake_pdf_insight::{
    extract_text, page_count, InsightConfig, LlmCompletionClient, PipelineProgressCallback,
    PipelineState, ProgressCallback, Session, SessionOutcome, SmtpMailer, UploadedDocument,
    WebSearchCrawler,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar per document, one step per pipeline
/// stage, then a spinner while the report is emailed.
struct CliProgressCallback {
    bar: Mutex<Option<ProgressBar>>,
    stage_started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: Mutex::new(None),
            stage_started: Mutex::new(None),
        })
    }

    fn stage_bar() -> ProgressBar {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:24.green/238}] {pos}/{len}  {msg}  ⏱ {elapsed}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        let bar = ProgressBar::new(PipelineState::STAGES.len() as u64);
        bar.set_style(style);
        bar.set_prefix("Analysing");
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    }

    fn spinner(msg: String) -> ProgressBar {
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        let bar = ProgressBar::new_spinner();
        bar.set_style(style);
        bar.set_prefix("Delivering");
        bar.set_message(msg);
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    }

    fn println(&self, line: String) {
        match self.bar.lock().unwrap().as_ref() {
            Some(bar) => bar.println(line),
            None => eprintln!("{line}"),
        }
    }

    fn stage_elapsed(&self) -> f64 {
        self.stage_started
            .lock()
            .unwrap()
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn finish(&self) {
        if let Some(bar) = self.bar.lock().unwrap().take() {
            bar.finish_and_clear();
        }
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, state: PipelineState) {
        {
            let mut slot = self.bar.lock().unwrap();
            if state == PipelineState::ExtractingText || slot.is_none() {
                if let Some(old) = slot.take() {
                    old.finish_and_clear();
                }
                *slot = Some(Self::stage_bar());
            }
            if let Some(bar) = slot.as_ref() {
                bar.set_message(format!("{state}…"));
            }
        }
        *self.stage_started.lock().unwrap() = Some(Instant::now());
    }

    fn on_stage_complete(&self, state: PipelineState, output_len: usize) {
        let secs = self.stage_elapsed();
        self.println(format!(
            "  {} {:<22} {:<14} {}",
            green("✓"),
            state.to_string(),
            dim(&format!("{output_len:>6} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        if let Some(bar) = self.bar.lock().unwrap().as_ref() {
            bar.inc(1);
        }
    }

    fn on_failed(&self, state: PipelineState, error: &str) {
        let secs = self.stage_elapsed();
        let msg = match error.char_indices().nth(100) {
            Some((idx, _)) => format!("{}\u{2026}", &error[..idx]),
            None => error.to_string(),
        };
        self.println(format!(
            "  {} {:<22} {}  {}",
            red("✗"),
            state.to_string(),
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.finish();
    }

    fn on_done(&self, total_ms: u64) {
        self.finish();
        eprintln!(
            "{} analysis complete in {}",
            green("✔"),
            bold(&format!("{:.1}s", total_ms as f64 / 1000.0))
        );
    }

    fn on_delivery_start(&self, recipient: &str) {
        *self.bar.lock().unwrap() = Some(Self::spinner(format!("emailing report to {recipient}…")));
    }

    fn on_delivery_complete(&self, error: Option<&str>) {
        self.finish();
        if error.is_none() {
            eprintln!("{} report emailed", green("✔"));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Interactive session: paste PDF paths, one per line
  pdf-insight

  # Analyse one PDF and email the report
  pdf-insight analyze quarterly-report.pdf

  # Structured output for scripting
  pdf-insight --json analyze paper.pdf > analysis.json

  # Fewer crawled pages, a specific model
  pdf-insight --crawl-cap 3 --model gpt-4.1 analyze whitepaper.pdf

  # Check what would be extracted (no API key or SMTP needed)
  pdf-insight inspect scan.pdf

  # Last 50 lines of the activity log
  pdf-insight logs --tail 50

ENVIRONMENT VARIABLES:
  EMAIL_USER              SMTP login, also the From: address (required)
  EMAIL_PASSWORD          SMTP password / app password (required)
  RECIPIENT_EMAIL         Where reports are sent (required)
  EMAIL_HOST              SMTP relay (default: smtp.gmail.com)
  EMAIL_PORT              SMTP STARTTLS port (default: 587)
  COMPANY_NAME            Report branding (default: EdgeQuake)
  LOGO_PATH               Image embedded in the HTML report
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDF_INSIGHT_LOG_FILE    Activity log location (default: app.log)

  A .env file in the working directory is loaded automatically.
"#;

/// Analyse PDFs with an LLM, corroborate with web research, email the report.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-insight",
    version,
    about = "Analyse PDFs with an LLM, corroborate with web research, and email the report",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// LLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, global = true)]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Maximum number of web pages to crawl per document.
    #[arg(long, global = true)]
    crawl_cap: Option<usize>,

    /// Per-page fetch timeout in seconds.
    #[arg(long, global = true)]
    fetch_timeout: Option<u64>,

    /// Per-call LLM timeout in seconds.
    #[arg(long, global = true)]
    api_timeout: Option<u64>,

    /// Search endpoint (DuckDuckGo HTML-compatible).
    #[arg(long, global = true)]
    search_url: Option<String>,

    /// Activity log file.
    #[arg(long, global = true, env = "PDF_INSIGHT_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Output structured JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "PDF_INSIGHT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except results and errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Analyse one PDF and email the report.
    Analyze {
        /// Path to the PDF.
        file: PathBuf,
    },
    /// Prompt for PDF paths and process each one (default).
    Interactive,
    /// Print the activity log.
    Logs {
        /// Only the last N lines.
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Page count, extracted text size and research query; no LLM or SMTP.
    Inspect {
        /// Path to the PDF.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let command = cli.command.clone().unwrap_or(Command::Interactive);
    let log_file = cli.log_file.clone().unwrap_or_else(log_path);

    // The log viewer only reads the activity log.
    if let Command::Logs { tail } = command {
        let text = read_log(&log_file, tail)
            .await
            .with_context(|| format!("Failed to read {}", log_file.display()))?;
        print!("{text}");
        return Ok(ExitCode::SUCCESS);
    }

    init_logging(&cli, &log_file)?;

    match &command {
        Command::Inspect { file } => inspect(file, cli.json).await,
        Command::Analyze { file } => {
            let session = build_session(&cli)?;
            let document = load_document(file).await?;
            let outcome = session.process(&document).await;
            render_outcome(&document, &outcome, &cli)
        }
        Command::Interactive => {
            let session = build_session(&cli)?;
            interactive(&session, &cli, &log_file).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Logs { .. } => Ok(ExitCode::SUCCESS),
    }
}

/// Stderr layer filtered like the rest of the CLI; file layer always at INFO.
fn init_logging(cli: &Cli, log_file: &Path) -> Result<()> {
    // Suppress INFO-level library logs on stderr when the progress bar is
    // active; the log file still records them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    let file = open_log_file(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(
            fmt::layer().with_writer(io::stderr).with_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
            ),
        )
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false)
                .with_filter(LevelFilter::INFO),
        )
        .init();
    Ok(())
}

/// Configuration from the environment, with CLI flags layered on top.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<InsightConfig> {
    let mut config = InsightConfig::from_env().context("Invalid configuration")?;

    if let Some(ref model) = cli.model {
        config.model = Some(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        config.provider_name = Some(provider.clone());
    }
    if let Some(cap) = cli.crawl_cap {
        config.crawl_cap = cap.max(1);
    }
    if let Some(secs) = cli.fetch_timeout {
        if secs == 0 {
            bail!("--fetch-timeout must be at least 1 second");
        }
        config.fetch_timeout_secs = secs;
    }
    if let Some(secs) = cli.api_timeout {
        if secs == 0 {
            bail!("--api-timeout must be at least 1 second");
        }
        config.api_timeout_secs = secs;
    }
    if let Some(ref url) = cli.search_url {
        config.search_url = url.clone();
    }
    config.progress_callback = progress;
    Ok(config)
}

/// Build every collaborator up front so bad credentials fail before any PDF.
fn build_session(cli: &Cli) -> Result<Session> {
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(cli, progress)?;

    let llm = LlmCompletionClient::from_config(&config).context("LLM provider is not usable")?;
    let crawler = WebSearchCrawler::new(&config).context("Web crawler could not be set up")?;
    let mailer = SmtpMailer::new(&config).context("SMTP mailer could not be set up")?;

    Ok(Session::new(
        config,
        Arc::new(llm),
        Arc::new(crawler),
        Arc::new(mailer),
    ))
}

/// Read a PDF from disk, rejecting anything that is clearly not one.
async fn load_document(path: &Path) -> Result<UploadedDocument> {
    if !path.is_file() {
        bail!("{} does not exist or is not a file", path.display());
    }
    let document = UploadedDocument::from_path(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let has_pdf_ext = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    if !has_pdf_ext && !document.bytes.starts_with(b"%PDF") {
        bail!("{} is not a PDF", path.display());
    }
    Ok(document)
}

/// Print the outcome; analysis and delivery are reported separately.
fn render_outcome(
    document: &UploadedDocument,
    outcome: &SessionOutcome,
    cli: &Cli,
) -> Result<ExitCode> {
    match outcome {
        SessionOutcome::AnalysisFailed(e) => {
            if cli.json {
                let json = serde_json::json!({
                    "file": document.filename,
                    "status": "failed",
                    "stage": e.stage,
                    "error": e.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&json).context("Failed to serialise output")?);
            } else {
                eprintln!("{} {}", red("✘"), red(&e.to_string()));
            }
            Ok(ExitCode::FAILURE)
        }
        SessionOutcome::Completed { output, delivery } => {
            if cli.json {
                let json = serde_json::json!({
                    "file": document.filename,
                    "status": "done",
                    "output": output,
                    "delivered": delivery.is_ok(),
                    "delivery_error": delivery.as_ref().err().map(|e| e.to_string()),
                });
                println!("{}", serde_json::to_string_pretty(&json).context("Failed to serialise output")?);
            } else {
                print_report(output);
            }

            match delivery {
                Ok(()) => Ok(ExitCode::SUCCESS),
                Err(e) => {
                    if !cli.json {
                        eprintln!(
                            "{} analysis succeeded but the report could not be emailed: {}",
                            yellow("⚠"),
                            e
                        );
                    }
                    Ok(ExitCode::from(2))
                }
            }
        }
    }
}

fn print_report(output: &edgequake_pdf_insight::AnalysisOutput) {
    println!("{}\n", bold("PDF Analysis"));
    println!("{}\n", output.pdf_analysis.trim());

    println!("{}", bold("Crawled Sources"));
    if output.crawl.urls.is_empty() {
        println!("  {}", dim("no web pages could be retrieved"));
    }
    for url in &output.crawl.urls {
        println!("  {} {}", cyan("•"), url);
    }
    println!();

    println!("{}\n", bold("Final Synthesis"));
    println!("{}", output.final_synthesis.trim());
    println!(
        "\n{}",
        dim(&format!(
            "query: \"{}\"  ·  {} chars extracted  ·  {} pages skipped  ·  {}ms total",
            output.query,
            output.stats.extracted_chars,
            output.crawl.skipped.len(),
            output.stats.total_ms
        ))
    );
}

/// Offline look at a PDF: what extraction yields and what would be searched.
async fn inspect(path: &Path, json: bool) -> Result<ExitCode> {
    let document = load_document(path).await?;
    let pages = page_count(&document.bytes)
        .await
        .context("Failed to inspect PDF")?;
    let text = extract_text(&document.bytes)
        .await
        .context("Failed to extract text")?;
    let query = derive_research_query(&text, InsightConfig::default().query_max_words, &document.filename);

    if json {
        let meta = serde_json::json!({
            "file": document.filename,
            "bytes": document.bytes.len(),
            "pages": pages,
            "extracted_chars": text.chars().count(),
            "research_query": query,
        });
        println!("{}", serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?);
    } else {
        println!("File:            {}", document.filename);
        println!("Size:            {} bytes", document.bytes.len());
        println!("Pages:           {}", pages);
        println!("Extracted chars: {}", text.chars().count());
        println!("Research query:  {}", query);
    }
    Ok(ExitCode::SUCCESS)
}

/// Prompt loop: one PDF path per line, `:logs`, `:help`, `:quit`.
async fn interactive(session: &Session, cli: &Cli, log_file: &Path) -> Result<()> {
    eprintln!(
        "{} {}",
        cyan("◆"),
        bold(&format!(
            "pdf-insight: reports go to {}",
            session.config().recipient
        ))
    );
    eprintln!("{}", dim("Enter a PDF path to analyse it, :logs to view the log, :quit to exit."));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("{} ", cyan("pdf>"));
        io::stderr().flush().ok();

        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            ":quit" | ":q" | "quit" | "exit" => break,
            ":help" | ":h" => {
                eprintln!("  <path.pdf>     analyse the PDF and email the report");
                eprintln!("  :logs [N]      show the last N log lines (default 40)");
                eprintln!("  :quit          leave");
                continue;
            }
            _ => {}
        }

        if let Some(rest) = input.strip_prefix(":logs") {
            let tail = rest.trim().parse().unwrap_or(40);
            match read_log(log_file, Some(tail)).await {
                Ok(text) if text.is_empty() => eprintln!("{}", dim("(log is empty)")),
                Ok(text) => print!("{text}"),
                Err(e) => eprintln!("{} could not read {}: {}", red("✘"), log_file.display(), e),
            }
            continue;
        }

        let path = PathBuf::from(input.trim_matches(|c| c == '"' || c == '\''));
        let document = match load_document(&path).await {
            Ok(d) => d,
            Err(e) => {
                eprintln!("{} {:#}", red("✘"), e);
                continue;
            }
        };
        let outcome = session.process(&document).await;
        render_outcome(&document, &outcome, cli)?;
    }
    Ok(())
}
