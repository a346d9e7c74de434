//! PDF text extraction: uploaded bytes → one plain-text string.
//!
//! Pages are read in document order; each page's text is right-trimmed and
//! terminated by a single `\n`. A document with no pages, or only scanned
//! images, yields an empty string rather than an error: image-only PDFs are
//! legitimate uploads, there is simply nothing for the LLM to read.
//!
//! Parsing runs inside `spawn_blocking`; `lopdf` is synchronous and a large
//! document would otherwise stall a Tokio worker thread.

use crate::error::ExtractionError;
use lopdf::Document;
use tracing::{debug, info, warn};

/// Extract the text of every page, in order.
///
/// # Errors
/// - [`ExtractionError::Empty`] / [`ExtractionError::NotAPdf`]: the bytes
///   are not a PDF at all
/// - [`ExtractionError::Corrupt`]: the PDF structure cannot be parsed
/// - [`ExtractionError::Encrypted`]: the text is not readable without a
///   user password
pub async fn extract_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    check_magic(bytes)?;
    let owned = bytes.to_vec();
    tokio::task::spawn_blocking(move || extract_text_blocking(&owned))
        .await
        .map_err(|e| ExtractionError::Internal(format!("extraction task panicked: {e}")))?
}

/// Number of pages in the document, without extracting any text.
pub async fn page_count(bytes: &[u8]) -> Result<usize, ExtractionError> {
    check_magic(bytes)?;
    let owned = bytes.to_vec();
    tokio::task::spawn_blocking(move || load(&owned).map(|doc| doc.get_pages().len()))
        .await
        .map_err(|e| ExtractionError::Internal(format!("extraction task panicked: {e}")))?
}

/// Reject buffers that do not start with `%PDF`.
pub fn check_magic(bytes: &[u8]) -> Result<(), ExtractionError> {
    if bytes.is_empty() {
        return Err(ExtractionError::Empty);
    }
    if !bytes.starts_with(b"%PDF") {
        return Err(ExtractionError::NotAPdf {
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

/// Parse the document. Encrypted files are opened with the empty user
/// password, which is how permission-restricted PDFs are distributed; only
/// files that need a real password are rejected.
fn load(bytes: &[u8]) -> Result<Document, ExtractionError> {
    let mut doc = Document::load_mem(bytes).map_err(|e| {
        let detail = e.to_string();
        let lower = detail.to_lowercase();
        if lower.contains("encrypt") || lower.contains("decrypt") {
            ExtractionError::Encrypted
        } else {
            ExtractionError::Corrupt { detail }
        }
    })?;
    if doc.is_encrypted() {
        doc.decrypt("").map_err(|e| {
            debug!("Empty user password rejected: {}", e);
            ExtractionError::Encrypted
        })?;
        info!("Encrypted PDF opened with the empty user password");
    }
    Ok(doc)
}

fn extract_text_blocking(bytes: &[u8]) -> Result<String, ExtractionError> {
    let doc = load(bytes)?;
    let pages = doc.get_pages();
    info!("PDF loaded: {} pages", pages.len());

    let mut text = String::new();
    for page_num in pages.keys() {
        let page_text = match doc.extract_text(&[*page_num]) {
            Ok(t) => sanitize(&t),
            Err(e) => {
                warn!("Page {}: text extraction failed, skipping: {}", page_num, e);
                String::new()
            }
        };
        debug!("Page {}: {} chars", page_num, page_text.len());
        text.push_str(page_text.trim_end());
        text.push('\n');
    }

    // Pages that carried no text at all should not leave a run of blank lines.
    if text.trim().is_empty() {
        text.clear();
    }
    Ok(text)
}

/// Drop control characters other than newline and tab.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}
