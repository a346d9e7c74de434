//! Report composition and delivery.
//!
//! [`EmailReport::compose`] turns a finished analysis into a plain-text and
//! an HTML body plus the original PDF as an attachment. [`ReportSender`] is
//! the delivery seam; [`SmtpMailer`] implements it over STARTTLS with
//! `lettre`.
//!
//! ## MIME layout
//!
//! ```text
//! multipart/mixed
//!  ├─ multipart/alternative
//!  │   ├─ text/plain
//!  │   └─ text/html            (or multipart/related: html + inline logo)
//!  └─ application/pdf          (attachment, "<prefix>_<filename>")
//! ```

use crate::config::InsightConfig;
use crate::error::DeliveryError;
use crate::output::AnalysisOutput;
use async_trait::async_trait;
use chrono::Local;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::Error as SmtpError;
use lettre::transport::stub::Error as StubError;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Content-ID of the inline logo inside the HTML part.
const LOGO_CID: &str = "company-logo";

/// A file carried by the report email.
#[derive(Clone)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

/// Company logo embedded in the HTML body.
#[derive(Debug, Clone)]
pub struct Logo {
    pub bytes: Vec<u8>,
    /// MIME type guessed from the file extension.
    pub content_type: String,
}

/// Read the logo at `path`. Any failure is logged and the report is sent
/// without a logo.
pub async fn load_logo(path: &Path) -> Option<Logo> {
    let content_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        other => {
            warn!("Logo {}: unsupported image type {:?}, skipping", path.display(), other);
            return None;
        }
    };
    match tokio::fs::read(path).await {
        Ok(bytes) if !bytes.is_empty() => Some(Logo {
            bytes,
            content_type: content_type.to_string(),
        }),
        Ok(_) => {
            warn!("Logo {} is empty, skipping", path.display());
            None
        }
        Err(e) => {
            warn!("Logo {} could not be read, skipping: {}", path.display(), e);
            None
        }
    }
}

/// The three report sections.
#[derive(Debug, Clone, Default)]
pub struct ReportSections {
    pub pdf_analysis: String,
    pub urls: Vec<String>,
    pub final_synthesis: String,
}

impl From<&AnalysisOutput> for ReportSections {
    fn from(output: &AnalysisOutput) -> Self {
        Self {
            pdf_analysis: output.pdf_analysis.clone(),
            urls: output.crawl.urls.clone(),
            final_synthesis: output.final_synthesis.clone(),
        }
    }
}

/// A composed, ready-to-send report.
#[derive(Debug, Clone)]
pub struct EmailReport {
    pub subject: String,
    pub plain_body: String,
    pub html_body: String,
    pub attachment: Attachment,
    pub logo: Option<Logo>,
}

impl EmailReport {
    /// Render both bodies. The generation date is taken from the local clock.
    pub fn compose(
        subject: impl Into<String>,
        sections: &ReportSections,
        attachment: Attachment,
        company_name: &str,
        logo: Option<Logo>,
    ) -> Self {
        let subject = subject.into();
        let date = Local::now().format("%Y-%m-%d").to_string();

        let plain_body = render_plain(&subject, sections, company_name, &date);
        let html_body = render_html(&subject, sections, company_name, &date, logo.is_some());

        Self {
            subject,
            plain_body,
            html_body,
            attachment,
            logo,
        }
    }

    /// Assemble the MIME message from `from` to `to`.
    pub fn to_message(&self, from: &str, to: &str) -> Result<Message, DeliveryError> {
        let from = parse_mailbox(from)?;
        let to = parse_mailbox(to)?;

        let html_part = match &self.logo {
            None => MultiPart::alternative()
                .singlepart(SinglePart::plain(self.plain_body.clone()))
                .singlepart(SinglePart::html(self.html_body.clone())),
            Some(logo) => {
                let logo_type = content_type(&logo.content_type)?;
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(self.plain_body.clone()))
                    .multipart(
                        MultiPart::related()
                            .singlepart(SinglePart::html(self.html_body.clone()))
                            .singlepart(
                                MimeAttachment::new_inline(LOGO_CID.to_string())
                                    .body(logo.bytes.clone(), logo_type),
                            ),
                    )
            }
        };

        let pdf = MimeAttachment::new(self.attachment.filename.clone())
            .body(self.attachment.bytes.clone(), content_type("application/pdf")?);

        Message::builder()
            .from(from)
            .to(to)
            .subject(self.subject.clone())
            .multipart(MultiPart::mixed().multipart(html_part).singlepart(pdf))
            .map_err(|e| DeliveryError::Build(e.to_string()))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| DeliveryError::InvalidAddress {
            address: address.to_string(),
            detail: e.to_string(),
        })
}

fn content_type(raw: &str) -> Result<ContentType, DeliveryError> {
    ContentType::parse(raw).map_err(|e| DeliveryError::Build(format!("content type '{raw}': {e}")))
}

fn render_plain(subject: &str, sections: &ReportSections, company: &str, date: &str) -> String {
    let mut out = String::new();
    out.push_str(subject);
    out.push('\n');
    out.push_str(&format!("Generated by {company} on {date}\n\n"));

    out.push_str("== PDF Analysis ==\n\n");
    out.push_str(sections.pdf_analysis.trim());
    out.push_str("\n\n== Crawled Sources ==\n\n");
    if sections.urls.is_empty() {
        out.push_str("No web pages could be retrieved.\n");
    } else {
        for url in &sections.urls {
            out.push_str("- ");
            out.push_str(url);
            out.push('\n');
        }
    }
    out.push_str("\n== Final Synthesis ==\n\n");
    out.push_str(sections.final_synthesis.trim());
    out.push_str("\n\nThe analysed PDF is attached to this email.\n");
    out
}

fn render_html(
    subject: &str,
    sections: &ReportSections,
    company: &str,
    date: &str,
    with_logo: bool,
) -> String {
    let mut out = String::from(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"></head>\
         <body style=\"font-family:Arial,sans-serif;line-height:1.5;color:#222;max-width:800px;margin:auto\">\n",
    );
    if with_logo {
        out.push_str(&format!(
            "<img src=\"cid:{LOGO_CID}\" alt=\"{}\" style=\"max-height:60px\">\n",
            escape_html(company)
        ));
    }
    out.push_str(&format!("<h1>{}</h1>\n", escape_html(subject)));
    out.push_str(&format!(
        "<p style=\"color:#666\">Generated by {} on {}</p>\n",
        escape_html(company),
        escape_html(date)
    ));

    out.push_str("<h2>PDF Analysis</h2>\n");
    out.push_str(&paragraphs(&sections.pdf_analysis));

    out.push_str("<h2>Crawled Sources</h2>\n");
    if sections.urls.is_empty() {
        out.push_str("<p><em>No web pages could be retrieved.</em></p>\n");
    } else {
        out.push_str("<ul>\n");
        for url in &sections.urls {
            let url = escape_html(url);
            out.push_str(&format!("<li><a href=\"{url}\">{url}</a></li>\n"));
        }
        out.push_str("</ul>\n");
    }

    out.push_str("<h2>Final Synthesis</h2>\n");
    out.push_str(&paragraphs(&sections.final_synthesis));
    out.push_str("<p style=\"color:#666\">The analysed PDF is attached to this email.</p>\n");
    out.push_str("</body></html>\n");
    out
}

/// Blank-line separated blocks become `<p>`; single newlines become `<br>`.
fn paragraphs(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>\n", escape_html(p).replace('\n', "<br>\n")))
        .collect()
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ── Delivery ─────────────────────────────────────────────────────────────

/// Sends a composed report to the configured recipient.
#[async_trait]
pub trait ReportSender: Send + Sync {
    async fn send(&self, report: &EmailReport) -> Result<(), DeliveryError>;

    /// Address the report goes to; shown in progress output.
    fn recipient(&self) -> &str;
}

/// [`ReportSender`] over an authenticated STARTTLS SMTP relay.
///
/// Generic over the lettre transport so the full send path, MIME included,
/// can run against `AsyncStubTransport`.
pub struct SmtpMailer<T = AsyncSmtpTransport<Tokio1Executor>> {
    transport: T,
    from: String,
    to: String,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl SmtpMailer {
    /// Build the transport from `config.smtp`. No connection is opened yet.
    pub fn new(config: &InsightConfig) -> Result<Self, DeliveryError> {
        let smtp = &config.smtp;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
            .map_err(|e| DeliveryError::Connection(format!("{}: {e}", smtp.host)))?
            .port(smtp.port)
            .credentials(Credentials::new(smtp.username.clone(), smtp.password.clone()))
            .timeout(Some(Duration::from_secs(smtp.timeout_secs)))
            .build();
        Self::with_transport(transport, config)
    }
}

impl<T> SmtpMailer<T>
where
    T: AsyncTransport + Send + Sync,
    T::Ok: fmt::Debug,
    T::Error: Into<DeliveryError>,
{
    /// Use an already-built transport with the addresses and retry policy
    /// from `config`.
    pub fn with_transport(transport: T, config: &InsightConfig) -> Result<Self, DeliveryError> {
        // Validate both ends up front so a typo fails at startup.
        parse_mailbox(config.sender())?;
        parse_mailbox(&config.recipient)?;

        Ok(Self {
            transport,
            from: config.sender().to_string(),
            to: config.recipient.clone(),
            max_retries: config.smtp.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        })
    }

    async fn attempt(&self, message: &Message) -> Result<(), DeliveryError> {
        self.transport
            .send(message.clone())
            .await
            .map(|response| debug!("SMTP accepted: {:?}", response))
            .map_err(Into::into)
    }
}

#[async_trait]
impl<T> ReportSender for SmtpMailer<T>
where
    T: AsyncTransport + Send + Sync,
    T::Ok: fmt::Debug,
    T::Error: Into<DeliveryError>,
{
    #[instrument(skip_all, fields(to = %self.to))]
    async fn send(&self, report: &EmailReport) -> Result<(), DeliveryError> {
        let message = report.to_message(&self.from, &self.to)?;

        let mut attempt = 0u32;
        loop {
            match self.attempt(&message).await {
                Ok(()) => {
                    info!("Report '{}' sent to {}", report.subject, self.to);
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                    warn!(
                        "SMTP send failed ({}); retry {}/{} after {}ms",
                        e, attempt, self.max_retries, backoff
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn recipient(&self) -> &str {
        &self.to
    }
}

impl From<SmtpError> for DeliveryError {
    fn from(e: SmtpError) -> Self {
        let detail = e.to_string();
        let code = e.status().map(|c| c.to_string());
        match code.as_deref() {
            Some(c) if c.starts_with("53") => DeliveryError::Auth(detail),
            _ if e.is_permanent() => DeliveryError::Rejected(detail),
            _ => DeliveryError::Connection(detail),
        }
    }
}

/// The stub transport has a single failure mode; it stands in for a relay
/// that could not be reached.
impl From<StubError> for DeliveryError {
    fn from(e: StubError) -> Self {
        DeliveryError::Connection(e.to_string())
    }
}
