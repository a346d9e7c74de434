//! Web research: search, fetch a capped number of result pages, keep the
//! visible text.
//!
//! The crawl is fixed-depth (result pages only, links are not followed) and
//! sequential. At most `crawl_cap` pages are requested, whether or not they
//! succeed, and every request has its own timeout. A page that fails to
//! fetch or has no visible text is recorded as a [`CrawlError`] in
//! [`CrawlResult::skipped`] and the crawl moves on; even a failed search is
//! an empty result, not an error.

use crate::config::InsightConfig;
use crate::error::CrawlError;
use crate::output::CrawlResult;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use scraper::{Html, Node, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// User-Agent string for search and page requests.
const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; edgequake-pdf-insight/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Elements whose text is never visible.
const HIDDEN_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "head", "iframe", "object",
];

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SEL_RESULT: Lazy<Selector> = Lazy::new(|| Selector::parse("a.result__a").unwrap());
static SEL_ANY_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static SEL_BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

/// Gathers corroborating web context for a query.
#[async_trait]
pub trait WebResearcher: Send + Sync {
    async fn research(&self, query: &str) -> CrawlResult;
}

/// Search-then-fetch crawler over plain HTTP.
pub struct WebSearchCrawler {
    client: Client,
    search_url: Url,
    crawl_cap: usize,
    timeout_secs: u64,
    max_page_chars: usize,
}

impl WebSearchCrawler {
    /// Build a crawler from the web-research settings in `config`.
    pub fn new(config: &InsightConfig) -> Result<Self, CrawlError> {
        let search_url = Url::parse(&config.search_url).map_err(|e| CrawlError::Search {
            detail: format!("invalid search URL '{}': {e}", config.search_url),
        })?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| CrawlError::Search {
                detail: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            search_url,
            crawl_cap: config.crawl_cap,
            timeout_secs: config.fetch_timeout_secs,
            max_page_chars: config.max_page_chars,
        })
    }

    /// Ask the search provider for result URLs, in result order.
    async fn search(&self, query: &str) -> Result<Vec<Url>, CrawlError> {
        let response = self
            .client
            .get(self.search_url.clone())
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| CrawlError::Search {
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(CrawlError::Search {
                detail: format!("HTTP {}", response.status()),
            });
        }

        let body = response.text().await.map_err(|e| CrawlError::Search {
            detail: e.to_string(),
        })?;
        let links = parse_search_results(&body, &self.search_url);
        debug!("Search returned {} candidate links", links.len());
        Ok(links)
    }

    /// Fetch one page and return its visible text.
    async fn fetch_page(&self, url: &Url) -> Result<String, CrawlError> {
        let url_str = url.to_string();
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                CrawlError::Timeout {
                    url: url_str.clone(),
                    secs: self.timeout_secs,
                }
            } else {
                CrawlError::Fetch {
                    url: url_str.clone(),
                    detail: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::Status {
                url: url_str,
                status: status.as_u16(),
            });
        }

        if let Some(ct) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            let ct = ct.to_lowercase();
            if !(ct.contains("html") || ct.starts_with("text/")) {
                return Err(CrawlError::NotHtml {
                    url: url_str,
                    content_type: ct,
                });
            }
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                CrawlError::Timeout {
                    url: url_str.clone(),
                    secs: self.timeout_secs,
                }
            } else {
                CrawlError::Fetch {
                    url: url_str.clone(),
                    detail: e.to_string(),
                }
            }
        })?;

        let text = extract_visible_text(&body);
        if text.is_empty() {
            return Err(CrawlError::NoText { url: url_str });
        }
        Ok(truncate_chars(&text, self.max_page_chars))
    }
}

#[async_trait]
impl WebResearcher for WebSearchCrawler {
    #[instrument(skip_all, fields(query = %query))]
    async fn research(&self, query: &str) -> CrawlResult {
        let query = query.trim();
        if query.is_empty() {
            warn!("Empty research query; skipping web search");
            return CrawlResult::default();
        }

        let candidates = match self.search(query).await {
            Ok(links) => links,
            Err(e) => {
                warn!("{}", e);
                return CrawlResult::failed(e);
            }
        };

        // The cap bounds fetch attempts, so failed pages count against it.
        let mut result = CrawlResult::default();
        for url in candidates.into_iter().take(self.crawl_cap) {
            match self.fetch_page(&url).await {
                Ok(text) => {
                    debug!(%url, chars = text.len(), "page fetched");
                    result.push_page(url.as_str(), &text);
                }
                Err(e) => {
                    warn!("Skipping page: {}", e);
                    result.skipped.push(e);
                }
            }
        }

        info!(
            fetched = result.urls.len(),
            skipped = result.skipped.len(),
            "web research complete"
        );
        debug_assert!(result.is_consistent());
        result
    }
}

/// Pull result links out of a search results page.
///
/// DuckDuckGo marks organic results with `a.result__a` and wraps targets in
/// a `/l/?uddg=<target>` redirect; both are handled. Pages without that
/// markup fall back to every absolute off-site link.
pub fn parse_search_results(html: &str, base: &Url) -> Vec<Url> {
    let doc = Html::parse_document(html);
    let mut hrefs: Vec<&str> = doc
        .select(&SEL_RESULT)
        .filter_map(|a| a.value().attr("href"))
        .collect();
    let fallback = hrefs.is_empty();
    if fallback {
        hrefs = doc
            .select(&SEL_ANY_LINK)
            .filter_map(|a| a.value().attr("href"))
            .collect();
    }

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for href in hrefs {
        let Ok(joined) = base.join(href) else {
            continue;
        };
        let mut target = unwrap_redirect(&joined).unwrap_or(joined);
        if !matches!(target.scheme(), "http" | "https") {
            continue;
        }
        if fallback && target.host_str() == base.host_str() {
            continue;
        }
        target.set_fragment(None);
        if seen.insert(target.to_string()) {
            links.push(target);
        }
    }
    links
}

/// Resolve a search-engine redirect link to its real target.
fn unwrap_redirect(url: &Url) -> Option<Url> {
    let path = url.path();
    if !(path == "/l/" || path == "/l") {
        return None;
    }
    url.query_pairs()
        .find(|(k, _)| k == "uddg")
        .and_then(|(_, v)| Url::parse(&v).ok())
}

/// Visible text of an HTML document, whitespace-collapsed.
pub fn extract_visible_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let root = doc
        .select(&SEL_BODY)
        .next()
        .unwrap_or_else(|| doc.root_element());

    let mut parts: Vec<&str> = Vec::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|el| HIDDEN_ELEMENTS.contains(&el.name()))
        });
        if !hidden {
            let t = text.trim();
            if !t.is_empty() {
                parts.push(t);
            }
        }
    }

    RE_WHITESPACE
        .replace_all(&parts.join(" "), " ")
        .trim()
        .to_string()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((idx, _)) => text[..idx].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_and_styles() {
        let html = r#"<html><head><title>T</title><style>body{color:red}</style></head>
            <body><h1>Heading</h1><script>var x = 1;</script>
            <p>First   paragraph.</p><noscript>enable js</noscript><p>Second</p></body></html>"#;
        let text = extract_visible_text(html);
        assert_eq!(text, "Heading First paragraph. Second");
    }

    #[test]
    fn parses_duckduckgo_results() {
        let base = Url::parse("https://html.duckduckgo.com/html/").unwrap();
        let html = r#"<div>
            <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fa&rut=x">A</a>
            <a class="result__a" href="https://example.org/b#frag">B</a>
            <a class="result__a" href="https://example.org/b">B again</a>
            <a class="result__a" href="javascript:void(0)">bad</a>
            <a href="https://ads.example.net/">ad</a>
        </div>"#;
        let links: Vec<String> = parse_search_results(html, &base)
            .into_iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(links, vec!["https://example.com/a", "https://example.org/b"]);
    }

    #[test]
    fn fallback_skips_search_host_links() {
        let base = Url::parse("https://search.example/html/").unwrap();
        let html = r#"<a href="/settings">s</a><a href="https://news.example/story">n</a>"#;
        let links = parse_search_results(html, &base);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].as_str(), "https://news.example/story");
    }

    #[test]
    fn truncate_chars_on_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 5), "hi");
    }
}
