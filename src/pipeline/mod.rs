//! Leaf components used by the analysis pipeline.
//!
//! Each submodule wraps exactly one external capability behind a narrow
//! contract, so [`crate::analyze::AnalysisPipeline`] can sequence them and
//! tests can swap in fakes.
//!
//! ## Data Flow
//!
//! ```text
//! extract ──▶ query ──▶ llm (analysis) ──▶ crawl ──▶ llm (synthesis)
//! (lopdf)    (text)     (edgequake-llm)    (reqwest   (edgequake-llm)
//!                                           + scraper)
//! ```
//!
//! 1. [`extract`]: PDF bytes to plain text; runs in `spawn_blocking`
//!    because parsing is CPU-bound
//! 2. [`query`]: derive a web search query from the extracted text
//! 3. [`llm`]: one instruction + context completion, with timeout and
//!    retry/backoff
//! 4. [`crawl`]: search, fetch a capped number of result pages, strip
//!    markup; per-page failures are skipped, never fatal

pub mod crawl;
pub mod extract;
pub mod llm;
pub mod query;
