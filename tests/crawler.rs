//! `WebSearchCrawler` against a local mock search engine and mock pages.

use edgequake_pdf_insight::{CrawlError, InsightConfig, WebResearcher, WebSearchCrawler};
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer, cap: usize) -> InsightConfig {
    InsightConfig::builder()
        .smtp_credentials("reports@example.com", "pw")
        .recipient("team@example.com")
        .search_url(format!("{}/html/", server.uri()))
        .crawl_cap(cap)
        .fetch_timeout_secs(1)
        .build()
        .unwrap()
}

fn results_page(server: &MockServer, paths: &[&str]) -> String {
    let links: String = paths
        .iter()
        .map(|p| format!(r#"<div class="result"><a class="result__a" href="{}{}">r</a></div>"#, server.uri(), p))
        .collect();
    format!("<html><body>{links}</body></html>")
}

async fn mount_search(server: &MockServer, query: &str, body: String) {
    Mock::given(method("GET"))
        .and(path("/html/"))
        .and(query_param("q", query))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"))
        .mount(server)
        .await;
}

async fn mount_page(server: &MockServer, at: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html.to_string(), "text/html; charset=utf-8"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn stops_at_crawl_cap_in_result_order() {
    let server = MockServer::start().await;
    mount_search(
        &server,
        "solar panels",
        results_page(&server, &["/one", "/two", "/three", "/four"]),
    )
    .await;
    for (p, text) in [("/one", "First"), ("/two", "Second"), ("/three", "Third"), ("/four", "Fourth")] {
        mount_page(&server, p, &format!("<html><body><p>{text} page body</p></body></html>")).await;
    }

    let crawler = WebSearchCrawler::new(&config(&server, 2)).unwrap();
    let crawl = crawler.research("solar panels").await;

    assert_eq!(crawl.urls.len(), 2);
    assert!(crawl.urls[0].ends_with("/one"));
    assert!(crawl.urls[1].ends_with("/two"));
    assert!(crawl.text.contains("First page body"));
    assert!(crawl.text.contains("Second page body"));
    assert!(!crawl.text.contains("Third"));
    assert!(crawl.is_consistent());
}

#[tokio::test]
async fn failing_pages_are_skipped_not_fatal() {
    let server = MockServer::start().await;
    mount_search(
        &server,
        "quarterly results",
        results_page(&server, &["/missing", "/scripts", "/good", "/file.pdf"]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mount_page(&server, "/scripts", "<html><body><script>var a = 1;</script></body></html>").await;
    mount_page(&server, "/good", "<html><body><h1>Results</h1><p>Revenue up.</p></body></html>").await;
    Mock::given(method("GET"))
        .and(path("/file.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"%PDF-1.4".to_vec(), "application/pdf"))
        .mount(&server)
        .await;

    let crawler = WebSearchCrawler::new(&config(&server, 5)).unwrap();
    let crawl = crawler.research("quarterly results").await;

    assert_eq!(crawl.urls.len(), 1);
    assert!(crawl.urls[0].ends_with("/good"));
    assert!(crawl.text.contains("Results Revenue up."));
    assert_eq!(crawl.skipped.len(), 3);
    assert!(matches!(crawl.skipped[0], CrawlError::Status { status: 404, .. }));
    assert!(matches!(crawl.skipped[1], CrawlError::NoText { .. }));
    assert!(matches!(crawl.skipped[2], CrawlError::NotHtml { .. }));
}

#[tokio::test]
async fn slow_page_times_out_and_is_skipped() {
    let server = MockServer::start().await;
    mount_search(&server, "slow", results_page(&server, &["/slow", "/fast"])).await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<p>late</p>", "text/html")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    mount_page(&server, "/fast", "<p>on time</p>").await;

    let crawler = WebSearchCrawler::new(&config(&server, 5)).unwrap();
    let crawl = crawler.research("slow").await;

    assert_eq!(crawl.urls.len(), 1);
    assert!(crawl.urls[0].ends_with("/fast"));
    assert!(matches!(crawl.skipped[0], CrawlError::Timeout { .. }));
}

#[tokio::test]
async fn search_failure_is_an_empty_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/html/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let crawler = WebSearchCrawler::new(&config(&server, 5)).unwrap();
    let crawl = crawler.research("anything").await;

    assert!(crawl.is_empty());
    assert!(crawl.text.is_empty());
    assert!(matches!(crawl.skipped.as_slice(), [CrawlError::Search { .. }]));
}

#[tokio::test]
async fn blank_query_makes_no_requests() {
    let server = MockServer::start().await;
    let crawler = WebSearchCrawler::new(&config(&server, 5)).unwrap();
    let crawl = crawler.research("   ").await;

    assert!(crawl.is_empty());
    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.is_empty());
}

#[tokio::test]
async fn duplicate_results_are_fetched_once() {
    let server = MockServer::start().await;
    mount_search(
        &server,
        "dupes",
        results_page(&server, &["/same", "/same#section", "/other"]),
    )
    .await;
    mount_page(&server, "/same", "<p>same page</p>").await;
    mount_page(&server, "/other", "<p>other page</p>").await;

    let crawler = WebSearchCrawler::new(&config(&server, 5)).unwrap();
    let crawl = crawler.research("dupes").await;

    assert_eq!(crawl.urls.len(), 2);
    assert!(crawl.is_consistent());
}

#[tokio::test]
async fn failed_pages_count_against_the_cap() {
    let server = MockServer::start().await;
    let paths: Vec<String> = (0..20).map(|i| format!("/gone{i}")).collect();
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    mount_search(&server, "dead links", results_page(&server, &refs)).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/gone\d+$"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let crawler = WebSearchCrawler::new(&config(&server, 2)).unwrap();
    let crawl = crawler.research("dead links").await;

    assert!(crawl.is_empty());
    assert!(crawl.is_consistent());
    assert_eq!(crawl.skipped.len(), 2);
    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 1 + 2, "one search plus at most crawl_cap page fetches");
}
