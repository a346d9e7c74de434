//! # edgequake-pdf-insight
//!
//! Analyse a PDF with a hosted LLM, corroborate it with a small web crawl,
//! and email the resulting report with the PDF attached.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF upload
//!  │
//!  ├─ 1. Extract     lopdf text extraction (CPU-bound, spawn_blocking)
//!  ├─ 2. Analyse     LLM pass over the PDF text
//!  ├─ 3. Research    search + fetch ≤ crawl_cap pages, strip markup
//!  ├─ 4. Synthesise  LLM pass over analysis + crawled text
//!  └─ 5. Deliver     HTML/plain report + PDF attachment over SMTP
//! ```
//!
//! Steps 1–4 are [`AnalysisPipeline`]; [`Session`] adds delivery. Each
//! external service sits behind a small async trait
//! ([`CompletionClient`], [`WebResearcher`], [`ReportSender`]) so the
//! pipeline can be driven by fakes in tests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf_insight::{
//!     InsightConfig, LlmCompletionClient, Session, SessionOutcome, SmtpMailer,
//!     UploadedDocument, WebSearchCrawler,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // EMAIL_USER, EMAIL_PASSWORD, RECIPIENT_EMAIL, OPENAI_API_KEY, ...
//!     let config = InsightConfig::from_env()?;
//!     let session = Session::new(
//!         config.clone(),
//!         Arc::new(LlmCompletionClient::from_config(&config)?),
//!         Arc::new(WebSearchCrawler::new(&config)?),
//!         Arc::new(SmtpMailer::new(&config)?),
//!     );
//!
//!     let doc = UploadedDocument::from_path("report.pdf").await?;
//!     match session.process(&doc).await {
//!         SessionOutcome::Completed { output, delivery } => {
//!             println!("{}", output.final_synthesis);
//!             delivery?;
//!         }
//!         SessionOutcome::AnalysisFailed(e) => eprintln!("{e}"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf-insight` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod report;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::AnalysisPipeline;
pub use config::{InsightConfig, InsightConfigBuilder, SmtpSettings};
pub use error::{
    CompletionError, ConfigError, CrawlError, DeliveryError, ExtractionError, PipelineError,
    StageFailure,
};
pub use output::{AnalysisOutput, AnalysisStats, CrawlResult, PipelineState, UploadedDocument};
pub use pipeline::crawl::{WebResearcher, WebSearchCrawler};
pub use pipeline::extract::{extract_text, page_count};
pub use pipeline::llm::{CompletionClient, LlmCompletionClient};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use report::{Attachment, EmailReport, ReportSections, ReportSender, SmtpMailer};
pub use session::{Session, SessionOutcome};
