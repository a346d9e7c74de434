//! Shared helpers for integration tests: an in-memory PDF builder and fake
//! collaborators for the LLM, the web researcher and the mail sender.

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_pdf_insight::prompts::PDF_ANALYSIS_PROMPT;
use edgequake_pdf_insight::{
    CompletionClient, CompletionError, CrawlResult, DeliveryError, EmailReport, InsightConfig,
    ReportSender, WebResearcher,
};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Build a PDF with one Courier text line per page.
pub fn make_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for body in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 18.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*body)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

/// A valid config with SMTP values that are never contacted.
pub fn test_config(temp_root: &Path) -> InsightConfig {
    InsightConfig::builder()
        .smtp_credentials("reports@example.com", "app-password")
        .recipient("team@example.com")
        .company_name("Acme")
        .temp_dir(temp_root)
        .build()
        .unwrap()
}

/// Number of entries directly under `dir`.
pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

// ── LLM ──────────────────────────────────────────────────────────────────

/// Canned LLM: `analysis` for the first stage, `synthesis` for the second.
pub struct FakeLlm {
    pub analysis: Result<String, fn() -> CompletionError>,
    pub synthesis: String,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl FakeLlm {
    pub fn ok(analysis: &str, synthesis: &str) -> Self {
        Self {
            analysis: Ok(analysis.to_string()),
            synthesis: synthesis.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_analysis(err: fn() -> CompletionError) -> Self {
        Self {
            analysis: Err(err),
            synthesis: String::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Context passed on the `n`th call.
    pub fn context(&self, n: usize) -> String {
        self.calls.lock().unwrap()[n].1.clone()
    }
}

#[async_trait]
impl CompletionClient for FakeLlm {
    async fn complete(&self, instruction: &str, context: &str) -> Result<String, CompletionError> {
        self.calls
            .lock()
            .unwrap()
            .push((instruction.to_string(), context.to_string()));
        if instruction == PDF_ANALYSIS_PROMPT {
            match &self.analysis {
                Ok(text) => Ok(text.clone()),
                Err(make) => Err(make()),
            }
        } else {
            Ok(self.synthesis.clone())
        }
    }
}

// ── Web ──────────────────────────────────────────────────────────────────

/// Returns fixed pages and records the queries it received.
#[derive(Default)]
pub struct FakeResearcher {
    pub pages: Vec<(String, String)>,
    pub queries: Mutex<Vec<String>>,
}

impl FakeResearcher {
    pub fn with_pages(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(u, t)| (u.to_string(), t.to_string()))
                .collect(),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl WebResearcher for FakeResearcher {
    async fn research(&self, query: &str) -> CrawlResult {
        self.queries.lock().unwrap().push(query.to_string());
        let mut crawl = CrawlResult::default();
        for (url, text) in &self.pages {
            crawl.push_page(url, text);
        }
        crawl
    }
}

// ── Mail ─────────────────────────────────────────────────────────────────

/// Captures reports instead of sending them; can be told to fail.
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<EmailReport>>,
    pub attempts: AtomicUsize,
    pub fail_with: Option<fn() -> DeliveryError>,
    /// Snapshot of the staging root's entry count at send time.
    pub staging_root: Option<std::path::PathBuf>,
    pub staged_during_send: AtomicUsize,
}

impl RecordingSender {
    pub fn failing(err: fn() -> DeliveryError) -> Self {
        Self {
            fail_with: Some(err),
            ..Self::default()
        }
    }

    pub fn watching(root: &Path) -> Self {
        Self {
            staging_root: Some(root.to_path_buf()),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportSender for RecordingSender {
    async fn send(&self, report: &EmailReport) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(ref root) = self.staging_root {
            self.staged_during_send.store(entries(root), Ordering::SeqCst);
        }
        if let Some(make) = self.fail_with {
            return Err(make());
        }
        self.sent.lock().unwrap().push(report.clone());
        Ok(())
    }

    fn recipient(&self) -> &str {
        "team@example.com"
    }
}
