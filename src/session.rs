//! One upload, end to end: analyse, then email the report.
//!
//! A [`Session`] owns the long-lived collaborators (LLM client, web
//! researcher, mail sender) built once at startup; [`Session::process`] is
//! called once per uploaded PDF and keeps no state between calls.

use crate::analyze::AnalysisPipeline;
use crate::config::InsightConfig;
use crate::error::{DeliveryError, PipelineError};
use crate::output::{AnalysisOutput, UploadedDocument};
use crate::pipeline::crawl::WebResearcher;
use crate::pipeline::llm::CompletionClient;
use crate::report::{load_logo, Attachment, EmailReport, ReportSections, ReportSender};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{info, instrument, warn};

/// What happened to one upload.
///
/// Analysis failure and delivery failure are separate outcomes: a report
/// that could not be emailed still carries the full analysis.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The pipeline ended in `Failed`; nothing was sent.
    AnalysisFailed(PipelineError),
    /// The pipeline reached `Done`; `delivery` says whether the email went out.
    Completed {
        output: AnalysisOutput,
        delivery: Result<(), DeliveryError>,
    },
}

impl SessionOutcome {
    /// Analysis finished and the report was delivered.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SessionOutcome::Completed {
                delivery: Ok(()),
                ..
            }
        )
    }
}

/// Interactive-session core: collaborators plus configuration.
pub struct Session {
    config: InsightConfig,
    llm: Arc<dyn CompletionClient>,
    researcher: Arc<dyn WebResearcher>,
    sender: Arc<dyn ReportSender>,
}

impl Session {
    pub fn new(
        config: InsightConfig,
        llm: Arc<dyn CompletionClient>,
        researcher: Arc<dyn WebResearcher>,
        sender: Arc<dyn ReportSender>,
    ) -> Self {
        Self {
            config,
            llm,
            researcher,
            sender,
        }
    }

    pub fn config(&self) -> &InsightConfig {
        &self.config
    }

    /// Analyse `document` and, if that succeeds, email the report.
    #[instrument(skip_all, fields(file = %document.filename))]
    pub async fn process(&self, document: &UploadedDocument) -> SessionOutcome {
        let pipeline = AnalysisPipeline::new(self.llm.as_ref(), self.researcher.as_ref(), &self.config);
        let output = match pipeline.run(document).await {
            Ok(output) => output,
            Err(e) => {
                warn!("No report sent for {}: {}", document.filename, e);
                return SessionOutcome::AnalysisFailed(e);
            }
        };

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_delivery_start(self.sender.recipient());
        }
        let delivery = self.deliver(document, &output).await;
        match &delivery {
            Ok(()) => info!("Report for {} delivered", document.filename),
            Err(e) => warn!("Analysis of {} succeeded but delivery failed: {}", document.filename, e),
        }
        if let Some(ref cb) = self.config.progress_callback {
            let msg = delivery.as_ref().err().map(|e| e.to_string());
            cb.on_delivery_complete(msg.as_deref());
        }

        SessionOutcome::Completed { output, delivery }
    }

    /// Stage the attachment in a private temp directory, compose, send.
    ///
    /// The directory is removed when `staging` drops, on every path out.
    async fn deliver(
        &self,
        document: &UploadedDocument,
        output: &AnalysisOutput,
    ) -> Result<(), DeliveryError> {
        let attachment_name = self.config.attachment_name(&document.filename);
        let staging = self.staging_dir()?;
        let attachment = stage_attachment(staging.path(), &attachment_name, &document.bytes).await?;

        let logo = match self.config.logo_path {
            Some(ref path) => load_logo(path).await,
            None => None,
        };
        let report = EmailReport::compose(
            self.config.report_subject(&document.filename),
            &ReportSections::from(output),
            attachment,
            &self.config.company_name,
            logo,
        );

        let result = self.sender.send(&report).await;
        drop(staging);
        result
    }

    fn staging_dir(&self) -> Result<TempDir, DeliveryError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pdf-insight-");
        let dir = match self.config.temp_dir {
            Some(ref parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        dir.map_err(|source| DeliveryError::Attachment {
            path: self
                .config
                .temp_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            source,
        })
    }
}

/// Write the upload under `dir` as `name` and read it back.
async fn stage_attachment(dir: &Path, name: &str, bytes: &[u8]) -> Result<Attachment, DeliveryError> {
    let path = dir.join(name);
    let io_err = |source| DeliveryError::Attachment {
        path: path.clone(),
        source,
    };
    tokio::fs::write(&path, bytes).await.map_err(io_err)?;
    let staged = tokio::fs::read(&path).await.map_err(io_err)?;
    if staged.len() != bytes.len() {
        warn!(
            "Staged attachment {} has {} bytes, expected {}",
            path.display(),
            staged.len(),
            bytes.len()
        );
    }
    Ok(Attachment {
        filename: name.to_string(),
        bytes: staged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn staged_attachment_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let a = stage_attachment(dir.path(), "insight_analysis_x.pdf", b"%PDF-1.7 body")
            .await
            .unwrap();
        assert_eq!(a.filename, "insight_analysis_x.pdf");
        assert_eq!(a.bytes, b"%PDF-1.7 body");
        assert!(dir.path().join("insight_analysis_x.pdf").exists());
    }

    #[tokio::test]
    async fn staging_into_missing_dir_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = stage_attachment(&missing, "a.pdf", b"%PDF").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Attachment { .. }));
    }
}
