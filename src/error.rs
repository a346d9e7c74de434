//! Error types for the edgequake-pdf-insight library.
//!
//! Each collaborator fails with its own error type so callers can tell the
//! failure domains apart:
//!
//! * [`ExtractionError`]: the upload is not a readable PDF. **Fatal** for
//!   the analysis run.
//! * [`CompletionError`]: the LLM call failed (auth, rate limit, network).
//!   **Fatal** for the analysis run.
//! * [`CrawlError`]: one search result page could not be used. **Non-fatal**:
//!   recorded inside [`crate::output::CrawlResult::skipped`] and the crawl
//!   carries on with the next result.
//! * [`DeliveryError`]: the report email could not be sent. Reported
//!   separately from the analysis outcome, because the analysis itself may
//!   have fully succeeded.
//! * [`ConfigError`]: startup configuration is missing or invalid.
//!
//! [`PipelineError`] ties a fatal stage error to the [`PipelineState`] in
//! which it happened.

use crate::output::PipelineState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// ── Extraction ───────────────────────────────────────────────────────────

/// The uploaded bytes could not be turned into text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Zero-byte upload.
    #[error("Uploaded file is empty (0 bytes)")]
    Empty,

    /// The buffer does not start with the `%PDF` magic.
    #[error("Uploaded file is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { magic: Vec<u8> },

    /// Header/xref/trailer could not be parsed.
    #[error("PDF is corrupt: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    Corrupt { detail: String },

    /// The document needs a user password; the empty one was rejected.
    #[error("PDF is password-protected and its text cannot be extracted")]
    Encrypted,

    /// The blocking extraction task panicked or was cancelled.
    #[error("Text extraction task failed: {0}")]
    Internal(String),
}

// ── Completion ───────────────────────────────────────────────────────────

/// The hosted language model did not return a usable answer.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// No provider could be built (missing API key, unknown provider name).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// 401/403 from the API: retrying will not help.
    #[error("Authentication error from provider '{provider}': {detail}")]
    Auth { provider: String, detail: String },

    /// HTTP 429 from the API.
    #[error("Rate limit exceeded for provider '{provider}': {detail}")]
    RateLimited { provider: String, detail: String },

    /// Connection-level failure before a response arrived.
    #[error("Network error talking to provider '{provider}': {detail}")]
    Network { provider: String, detail: String },

    /// The call did not finish within the configured timeout.
    #[error("LLM call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Any other API error.
    #[error("LLM API error: {message}")]
    Api { message: String },

    /// The call succeeded but the model produced no text.
    #[error("LLM returned an empty response")]
    EmptyResponse,
}

impl CompletionError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CompletionError::RateLimited { .. }
                | CompletionError::Network { .. }
                | CompletionError::Timeout { .. }
        )
    }
}

// ── Crawl ────────────────────────────────────────────────────────────────

/// A non-fatal failure for one search result page (or the search itself).
///
/// Stored in [`crate::output::CrawlResult::skipped`]; the crawl continues.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum CrawlError {
    /// The search provider request failed.
    #[error("Web search failed: {detail}")]
    Search { detail: String },

    /// The page could not be fetched at all.
    #[error("{url}: fetch failed: {detail}")]
    Fetch { url: String, detail: String },

    /// The page request exceeded the per-request timeout.
    #[error("{url}: timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    /// Non-2xx response.
    #[error("{url}: HTTP {status}")]
    Status { url: String, status: u16 },

    /// Response is not an HTML/text document (PDF, image, …).
    #[error("{url}: unsupported content type '{content_type}'")]
    NotHtml { url: String, content_type: String },

    /// The page had no visible text once markup was removed.
    #[error("{url}: no visible text")]
    NoText { url: String },
}

// ── Delivery ─────────────────────────────────────────────────────────────

/// The report email could not be built or sent.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// A sender or recipient address does not parse.
    #[error("Invalid email address '{address}': {detail}")]
    InvalidAddress { address: String, detail: String },

    /// The MIME message could not be assembled.
    #[error("Failed to build report email: {0}")]
    Build(String),

    /// SMTP login was refused.
    #[error("SMTP authentication failed: {0}\nCheck EMAIL_USER / EMAIL_PASSWORD.")]
    Auth(String),

    /// Could not reach or talk to the SMTP host (including timeouts).
    #[error("SMTP connection failed: {0}")]
    Connection(String),

    /// The server accepted the session but rejected the message.
    #[error("SMTP server rejected the report: {0}")]
    Rejected(String),

    /// Staging the attachment on disk failed.
    #[error("Failed to stage attachment '{path}': {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeliveryError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Connection(_))
    }
}

// ── Config ───────────────────────────────────────────────────────────────

/// Startup configuration problems. Raised before any pipeline work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable / flag is absent or empty.
    #[error("Missing required configuration: {var}\n{hint}")]
    Missing { var: &'static str, hint: &'static str },

    /// A value is present but unusable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// The fatal error that moved the pipeline into [`PipelineState::Failed`].
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Completion(#[from] CompletionError),
}

/// A pipeline run that ended in [`PipelineState::Failed`].
#[derive(Debug, Error)]
#[error("Analysis failed while {stage}: {failure}")]
pub struct PipelineError {
    /// The state the pipeline was in when the error occurred.
    pub stage: PipelineState,
    #[source]
    pub failure: StageFailure,
}
