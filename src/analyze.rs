//! The analysis state machine.
//!
//! [`AnalysisPipeline::run`] walks the stages strictly in order:
//!
//! ```text
//! ExtractingText → AnalyzingPdf → ResearchingWeb → Synthesizing → Done
//! ```
//!
//! Extraction and completion errors move the run to `Failed` and stop it;
//! no later stage executes. The research stage never fails: a crawl that
//! found nothing is an empty [`CrawlResult`](crate::output::CrawlResult)
//! and synthesis proceeds on the PDF analysis alone.

use crate::config::InsightConfig;
use crate::error::{PipelineError, StageFailure};
use crate::output::{AnalysisOutput, AnalysisStats, PipelineState, UploadedDocument};
use crate::pipeline::crawl::WebResearcher;
use crate::pipeline::extract;
use crate::pipeline::llm::{truncate_context, CompletionClient};
use crate::pipeline::query::derive_research_query;
use crate::prompts::{synthesis_context, PDF_ANALYSIS_PROMPT, SYNTHESIS_PROMPT};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Sequences extraction, analysis, research and synthesis for one document.
pub struct AnalysisPipeline<'a> {
    llm: &'a dyn CompletionClient,
    researcher: &'a dyn WebResearcher,
    config: &'a InsightConfig,
}

impl<'a> AnalysisPipeline<'a> {
    pub fn new(
        llm: &'a dyn CompletionClient,
        researcher: &'a dyn WebResearcher,
        config: &'a InsightConfig,
    ) -> Self {
        Self {
            llm,
            researcher,
            config,
        }
    }

    /// Run every stage for `document`.
    ///
    /// # Errors
    /// Returns [`PipelineError`] naming the state the run was in when an
    /// extraction or completion error occurred.
    #[instrument(skip_all, fields(file = %document.filename))]
    pub async fn run(&self, document: &UploadedDocument) -> Result<AnalysisOutput, PipelineError> {
        let total_start = Instant::now();
        info!(
            "Starting analysis of {} ({} bytes)",
            document.filename,
            document.bytes.len()
        );
        let mut stats = AnalysisStats::default();

        // ── ExtractingText ───────────────────────────────────────────────
        self.enter(PipelineState::ExtractingText);
        let start = Instant::now();
        let text = extract::extract_text(&document.bytes)
            .await
            .map_err(|e| self.fail(PipelineState::ExtractingText, e))?;
        stats.extraction_ms = elapsed_ms(start);
        stats.extracted_chars = text.chars().count();
        if text.is_empty() {
            info!("No extractable text in {}; analysis will see an empty document", document.filename);
        }
        let query = derive_research_query(&text, self.config.query_max_words, &document.filename);
        debug!(%query, "research query derived");
        self.leave(PipelineState::ExtractingText, text.len());

        // ── AnalyzingPdf ─────────────────────────────────────────────────
        self.enter(PipelineState::AnalyzingPdf);
        let start = Instant::now();
        let context = truncate_context(&text, self.config.max_context_chars);
        let pdf_analysis = self
            .llm
            .complete(PDF_ANALYSIS_PROMPT, &context)
            .await
            .map_err(|e| self.fail(PipelineState::AnalyzingPdf, e))?;
        stats.pdf_analysis_ms = elapsed_ms(start);
        self.leave(PipelineState::AnalyzingPdf, pdf_analysis.len());

        // ── ResearchingWeb ───────────────────────────────────────────────
        self.enter(PipelineState::ResearchingWeb);
        let start = Instant::now();
        let crawl = self.researcher.research(&query).await;
        stats.research_ms = elapsed_ms(start);
        info!(
            "Web research: {} pages used, {} skipped",
            crawl.urls.len(),
            crawl.skipped.len()
        );
        self.leave(PipelineState::ResearchingWeb, crawl.text.len());

        // ── Synthesizing ─────────────────────────────────────────────────
        self.enter(PipelineState::Synthesizing);
        let start = Instant::now();
        let combined = synthesis_context(&pdf_analysis, &crawl.text);
        let context = truncate_context(&combined, self.config.max_context_chars);
        let final_synthesis = self
            .llm
            .complete(SYNTHESIS_PROMPT, &context)
            .await
            .map_err(|e| self.fail(PipelineState::Synthesizing, e))?;
        stats.synthesis_ms = elapsed_ms(start);
        self.leave(PipelineState::Synthesizing, final_synthesis.len());

        // ── Done ─────────────────────────────────────────────────────────
        stats.total_ms = elapsed_ms(total_start);
        info!("Analysis of {} done in {}ms", document.filename, stats.total_ms);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_done(stats.total_ms);
        }

        Ok(AnalysisOutput {
            query,
            pdf_analysis,
            crawl,
            final_synthesis,
            stats,
        })
    }

    fn enter(&self, state: PipelineState) {
        info!("Stage {}/{}: {}", state.step().unwrap_or(0), PipelineState::STAGES.len(), state);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_start(state);
        }
    }

    fn leave(&self, state: PipelineState, output_len: usize) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_complete(state, output_len);
        }
    }

    fn fail(&self, stage: PipelineState, failure: impl Into<StageFailure>) -> PipelineError {
        let err = PipelineError {
            stage,
            failure: failure.into(),
        };
        warn!("{}", err);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_failed(stage, &err.failure.to_string());
        }
        err
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CompletionError, ExtractionError};
    use crate::output::CrawlResult;
    use crate::pipeline::extract::tests::make_pdf;
    use crate::progress::PipelineProgressCallback;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Answers by stage; records every context it was given.
    #[derive(Default)]
    struct ScriptedLlm {
        contexts: Mutex<Vec<(String, String)>>,
        fail_analysis: bool,
    }

    #[async_trait]
    impl CompletionClient for ScriptedLlm {
        async fn complete(&self, instruction: &str, context: &str) -> Result<String, CompletionError> {
            self.contexts
                .lock()
                .unwrap()
                .push((instruction.to_string(), context.to_string()));
            if instruction == PDF_ANALYSIS_PROMPT {
                if self.fail_analysis {
                    return Err(CompletionError::Auth {
                        provider: "openai".into(),
                        detail: "invalid key".into(),
                    });
                }
                Ok("ANALYSIS".into())
            } else {
                Ok("SYNTHESIS".into())
            }
        }
    }

    #[derive(Default)]
    struct OnePageResearcher {
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WebResearcher for OnePageResearcher {
        async fn research(&self, query: &str) -> CrawlResult {
            self.queries.lock().unwrap().push(query.to_string());
            let mut crawl = CrawlResult::default();
            crawl.push_page("https://example.com/", "WEBTEXT");
            crawl
        }
    }

    #[derive(Default)]
    struct Events {
        started: Mutex<Vec<PipelineState>>,
        failed: Mutex<Option<PipelineState>>,
        done: AtomicUsize,
    }

    impl PipelineProgressCallback for Events {
        fn on_stage_start(&self, state: PipelineState) {
            self.started.lock().unwrap().push(state);
        }
        fn on_failed(&self, state: PipelineState, _error: &str) {
            *self.failed.lock().unwrap() = Some(state);
        }
        fn on_done(&self, _total_ms: u64) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(events: Arc<Events>) -> InsightConfig {
        InsightConfig::builder()
            .smtp_credentials("reports@example.com", "pw")
            .recipient("team@example.com")
            .progress_callback(events)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn stages_run_in_order_and_feed_each_other() {
        let events = Arc::new(Events::default());
        let config = config(events.clone());
        let llm = ScriptedLlm::default();
        let web = OnePageResearcher::default();
        let doc = UploadedDocument::new("hello.pdf", make_pdf(&["Hello World"]));

        let out = AnalysisPipeline::new(&llm, &web, &config).run(&doc).await.unwrap();

        assert_eq!(out.pdf_analysis, "ANALYSIS");
        assert_eq!(out.final_synthesis, "SYNTHESIS");
        assert_eq!(out.crawl.urls, vec!["https://example.com/"]);
        assert_eq!(out.query, "Hello World");
        assert_eq!(*web.queries.lock().unwrap(), vec!["Hello World"]);

        let contexts = llm.contexts.lock().unwrap();
        assert_eq!(contexts.len(), 2);
        assert!(contexts[0].1.contains("Hello World"));
        assert!(contexts[1].1.contains("ANALYSIS"));
        assert!(contexts[1].1.contains("WEBTEXT"));

        assert_eq!(*events.started.lock().unwrap(), PipelineState::STAGES.to_vec());
        assert_eq!(events.done.load(Ordering::SeqCst), 1);
        assert!(events.failed.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn auth_failure_stops_before_research() {
        let events = Arc::new(Events::default());
        let config = config(events.clone());
        let llm = ScriptedLlm {
            fail_analysis: true,
            ..Default::default()
        };
        let web = OnePageResearcher::default();
        let doc = UploadedDocument::new("hello.pdf", make_pdf(&["Hello World"]));

        let err = AnalysisPipeline::new(&llm, &web, &config).run(&doc).await.unwrap_err();

        assert_eq!(err.stage, PipelineState::AnalyzingPdf);
        assert!(matches!(
            err.failure,
            StageFailure::Completion(CompletionError::Auth { .. })
        ));
        assert!(web.queries.lock().unwrap().is_empty());
        assert_eq!(llm.contexts.lock().unwrap().len(), 1);
        assert_eq!(*events.failed.lock().unwrap(), Some(PipelineState::AnalyzingPdf));
        assert_eq!(events.done.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreadable_upload_fails_in_extraction() {
        let events = Arc::new(Events::default());
        let config = config(events.clone());
        let llm = ScriptedLlm::default();
        let web = OnePageResearcher::default();
        let doc = UploadedDocument::new("notes.pdf", b"plain text, not a pdf".to_vec());

        let err = AnalysisPipeline::new(&llm, &web, &config).run(&doc).await.unwrap_err();

        assert_eq!(err.stage, PipelineState::ExtractingText);
        assert!(matches!(
            err.failure,
            StageFailure::Extraction(ExtractionError::NotAPdf { .. })
        ));
        assert!(llm.contexts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn textless_pdf_still_completes() {
        let events = Arc::new(Events::default());
        let config = config(events);
        let llm = ScriptedLlm::default();
        let web = OnePageResearcher::default();
        let doc = UploadedDocument::new("scanned_invoice.pdf", make_pdf(&[]));

        let out = AnalysisPipeline::new(&llm, &web, &config).run(&doc).await.unwrap();
        assert_eq!(out.stats.extracted_chars, 0);
        assert_eq!(out.query, "scanned invoice");
    }
}
