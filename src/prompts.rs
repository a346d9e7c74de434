//! Instruction prompts for the two LLM stages.
//!
//! Both prompts are sent as the system message; the stage input (PDF text,
//! or analysis plus crawled text) goes in the user message. Keeping them
//! here means wording changes never touch retry or pipeline code.

/// Stage 1: analyse the extracted PDF text.
pub const PDF_ANALYSIS_PROMPT: &str = r#"You are a senior analyst. The user message contains the full text extracted from a PDF document.

Write a detailed analysis that covers:
1. The main topic or purpose of the document
2. Its key points or arguments
3. Significant data, figures, or statistics
4. The intended audience
5. The overall tone and style
6. Notable findings or insights

Structure the answer with short headed sections. Base every statement on the document text; if something cannot be determined from it, say so."#;

/// Stage 3: combine the PDF analysis with the crawled web context.
pub const SYNTHESIS_PROMPT: &str = r#"You are a senior analyst. The user message contains an analysis of a PDF document followed by text crawled from related web pages.

Write a comprehensive summary that:
1. Synthesises the main ideas from the PDF and the web sources
2. Highlights new insights or perspectives contributed by the web sources
3. Identifies contradictions or confirmations between the PDF and the web data
4. Suggests areas for further research or exploration
5. Gives actionable recommendations based on the overall analysis

If no web data is available, say so and base the summary on the PDF analysis alone."#;

/// Placeholder used in the synthesis context when the crawl found nothing.
pub const NO_WEB_DATA: &str = "(no corroborating web pages could be retrieved)";

/// Build the user message for the synthesis stage.
pub fn synthesis_context(pdf_analysis: &str, web_data: &str) -> String {
    let web_data = if web_data.trim().is_empty() {
        NO_WEB_DATA
    } else {
        web_data
    };
    format!("PDF Analysis:\n{pdf_analysis}\n\nCrawled Web Data:\n{web_data}")
}
