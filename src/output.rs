//! Values that flow through one analysis run.
//!
//! Everything here lives for a single [`crate::session::Session::process`]
//! call; nothing is cached or persisted between runs.

use crate::error::CrawlError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// A PDF handed to the tool by the user.
#[derive(Clone)]
pub struct UploadedDocument {
    /// Original file name (no directories), used in the subject line and
    /// the attachment name.
    pub filename: String,
    /// Raw PDF bytes.
    pub bytes: Vec<u8>,
}

impl UploadedDocument {
    /// Any directory part of `filename`, `/` or `\` separated, is dropped.
    pub fn new(filename: impl AsRef<str>, bytes: Vec<u8>) -> Self {
        Self {
            filename: base_name(filename.as_ref()),
            bytes,
        }
    }

    /// Read a document from disk, keeping only the file name component.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(filename, bytes))
    }
}

fn base_name(raw: &str) -> String {
    match raw.rsplit(['/', '\\']).next().map(str::trim) {
        Some(name) if !name.is_empty() && name != "." && name != ".." => name.to_string(),
        _ => "document.pdf".to_string(),
    }
}

impl fmt::Debug for UploadedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedDocument")
            .field("filename", &self.filename)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

/// Where the analysis pipeline currently is.
///
/// ```text
/// ExtractingText → AnalyzingPdf → ResearchingWeb → Synthesizing → Done
///        └──────────────┴──────────────┴───────────────┴──────▶ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    ExtractingText,
    AnalyzingPdf,
    ResearchingWeb,
    Synthesizing,
    Done,
    Failed,
}

impl PipelineState {
    /// The four working stages, in execution order.
    pub const STAGES: [PipelineState; 4] = [
        PipelineState::ExtractingText,
        PipelineState::AnalyzingPdf,
        PipelineState::ResearchingWeb,
        PipelineState::Synthesizing,
    ];

    /// 1-indexed position among [`Self::STAGES`]; `None` for terminal states.
    pub fn step(self) -> Option<usize> {
        Self::STAGES.iter().position(|s| *s == self).map(|i| i + 1)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineState::ExtractingText => "extracting text",
            PipelineState::AnalyzingPdf => "analyzing PDF",
            PipelineState::ResearchingWeb => "researching the web",
            PipelineState::Synthesizing => "synthesizing",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Text and sources gathered by the web research stage.
///
/// Invariants, upheld by [`CrawlResult::push_page`]:
/// - every entry in `urls` is unique and contributed non-empty text;
/// - `text` holds the contributions in the same order as `urls`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlResult {
    /// Concatenated visible text of every page that was fetched.
    pub text: String,
    /// Source URLs, in fetch order.
    pub urls: Vec<String>,
    /// Pages (or the search itself) that were skipped, with the reason.
    pub skipped: Vec<CrawlError>,
}

impl CrawlResult {
    /// An empty result with a single recorded failure.
    pub fn failed(error: CrawlError) -> Self {
        Self {
            skipped: vec![error],
            ..Self::default()
        }
    }

    /// Append one page. Returns `false` (and changes nothing) if the text is
    /// blank or the URL was already recorded.
    pub fn push_page(&mut self, url: &str, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() || self.urls.iter().any(|u| u == url) {
            return false;
        }
        if !self.text.is_empty() {
            self.text.push_str("\n\n");
        }
        self.text.push_str("Source: ");
        self.text.push_str(url);
        self.text.push('\n');
        self.text.push_str(text);
        self.urls.push(url.to_string());
        true
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Sanity check used in tests and debug assertions.
    pub fn is_consistent(&self) -> bool {
        let unique: HashSet<&String> = self.urls.iter().collect();
        unique.len() == self.urls.len() && (self.urls.is_empty() == self.text.is_empty())
    }
}

/// Wall-clock cost of each stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisStats {
    /// Characters of text extracted from the PDF.
    pub extracted_chars: usize,
    pub extraction_ms: u64,
    pub pdf_analysis_ms: u64,
    pub research_ms: u64,
    pub synthesis_ms: u64,
    pub total_ms: u64,
}

/// Everything a successful pipeline run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutput {
    /// Web search query derived from the PDF text.
    pub query: String,
    /// Stage 1 result: LLM analysis of the PDF text.
    pub pdf_analysis: String,
    /// Stage 2 result: crawled corroborating context.
    pub crawl: CrawlResult,
    /// Stage 3 result: synthesis of the analysis and the crawl.
    pub final_synthesis: String,
    pub stats: AnalysisStats,
}
