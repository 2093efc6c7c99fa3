//! End-to-end runs of `Pipeline::run`.
//!
//! The primary site is served by a scripted in-memory browser session;
//! the search and completion APIs are `wiremock` servers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use uatu_compare::comparison::ComparisonSynthesizer;
use uatu_compare::config::{LlmConfig, PipelineConfig, PrimarySiteConfig, ReportsConfig, SearchConfig};
use uatu_compare::llm::CompletionClient;
use uatu_compare::models::GenerationStatus;
use uatu_compare::price_parser::PriceParser;
use uatu_compare::primary_extractor::PrimarySiteExtractor;
use uatu_compare::report::ReportWriter;
use uatu_compare::scraper::{BrowserLauncher, BrowserSession, LoadStrategy, SessionOptions};
use uatu_compare::search_aggregator::{SearchAggregator, SearchClient};
use uatu_compare::utils::RetryPolicy;
use uatu_compare::{AppError, ErrorKind, Pipeline, RunOptions, RunStatus};

const LISTING_HTML: &str = r#"<html><body>
    <div class="card"><a href="//www.daraz.pk/products/logitech-g102-i100.html" title="Logitech G102 Lightsync Gaming Mouse">img</a></div>
    <div class="card"><a href="//www.daraz.pk/products/redragon-m602-i101.html" title="Redragon M602 Griffin Gaming Mouse">img</a></div>
</body></html>"#;

const DETAIL_HTML: &str = r#"<html><body>
    <h1 class="pdp-mod-product-badge-title">Logitech G102 Lightsync Gaming Mouse</h1>
    <div class="pdp-product-price"><span class="currency">Rs. 8,000</span></div>
    <div class="pdp-seller-name"><a>Computer Zone</a></div>
    <button class="add-to-cart-buy-now-btn">Add to Cart</button>
</body></html>"#;

/// Serves the listing page on the first read and the detail page after.
struct ScriptedSession {
    reads: AtomicUsize,
    visited: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
}

impl BrowserSession for ScriptedSession {
    fn navigate(&self, url: &str, _strategy: LoadStrategy, _timeout: Duration) -> uatu_compare::Result<()> {
        self.visited.lock().unwrap().push(url.to_string());
        Ok(())
    }

    fn wait_for_selector(&self, _selector: &str, _timeout: Duration) -> uatu_compare::Result<()> {
        Ok(())
    }

    fn content(&self) -> uatu_compare::Result<String> {
        match self.reads.fetch_add(1, Ordering::SeqCst) {
            0 => Ok(LISTING_HTML.to_string()),
            _ => Ok(DETAIL_HTML.to_string()),
        }
    }

    fn close(&mut self) -> uatu_compare::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedLauncher {
    unreachable: bool,
    crashes: bool,
    visited: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
}

impl BrowserLauncher for ScriptedLauncher {
    fn launch(&self, _options: &SessionOptions) -> uatu_compare::Result<Box<dyn BrowserSession>> {
        if self.crashes {
            panic!("driver crashed inside primary stage");
        }
        if self.unreachable {
            return Err(AppError::Browser("no browser available".to_string()));
        }
        Ok(Box::new(ScriptedSession {
            reads: AtomicUsize::new(0),
            visited: Arc::clone(&self.visited),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct Harness {
    search: MockServer,
    completion: MockServer,
    reports: TempDir,
}

impl Harness {
    async fn start() -> Result<Self> {
        Ok(Self {
            search: MockServer::start().await,
            completion: MockServer::start().await,
            reports: TempDir::new()?,
        })
    }

    async fn mount_search_hits(&self) {
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("X-API-KEY", "search-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organic": [
                    {"title": "Redragon M711 Gaming Mouse", "link": "https://priceoye.pk/mouse/m711", "snippet": "Rs. 7,500 free delivery"},
                    {"title": "Logitech G502 Gaming Mouse", "link": "https://www.telemart.pk/g502", "snippet": "Price: Rs. 9,000"},
                    {"title": "Razer Gaming Mouse", "link": "https://olx.com.pk/item/razer", "snippet": "Used, contact seller"}
                ]
            })))
            .mount(&self.search)
            .await;
    }

    fn pipeline(&self, launcher: ScriptedLauncher) -> Result<Pipeline> {
        let parser = Arc::new(PriceParser::new());
        let retry = RetryPolicy::new(2, 0, 0);

        let primary = PrimarySiteExtractor::new(
            PrimarySiteConfig {
                retry_pause_ms: 0,
                settle_ms: 0,
                ..PrimarySiteConfig::default()
            },
            Arc::new(launcher),
            Arc::clone(&parser),
        )?;

        let search_config = SearchConfig {
            endpoint: format!("{}/search", self.search.uri()),
            api_key: Some("search-key".to_string()),
            courtesy_delay_ms: 0,
            ..SearchConfig::default()
        };
        let aggregator = SearchAggregator::new(
            search_config.clone(),
            Arc::new(SearchClient::new(&search_config)?),
            Arc::clone(&parser),
            retry.clone(),
        );

        let completion = CompletionClient::new(LlmConfig {
            endpoint: format!("{}/chat/completions", self.completion.uri()),
            api_key: Some("llm-key".to_string()),
            ..LlmConfig::default()
        })?;
        let synthesizer = ComparisonSynthesizer::new(
            Arc::new(completion),
            retry,
            ReportWriter::new(&ReportsConfig {
                dir: self.reports.path().to_string_lossy().to_string(),
                extension: "md".to_string(),
            }),
        );

        Ok(Pipeline::new(
            Arc::new(primary),
            Arc::new(aggregator),
            Arc::new(synthesizer),
            PipelineConfig::default(),
        ))
    }
}

fn options() -> RunOptions {
    RunOptions {
        selection_index: 0,
        headless: true,
        timeout_ms: 1_000,
        max_results: 10,
    }
}

#[tokio::test]
async fn test_rate_limited_generation_falls_back_to_templated_report() -> Result<()> {
    let harness = Harness::start().await?;
    harness.mount_search_hits().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&harness.completion)
        .await;

    let launcher = ScriptedLauncher::default();
    let closed = Arc::clone(&launcher.closed);
    let envelope = harness.pipeline(launcher)?.run("Gaming Mouse", options()).await;

    assert_eq!(envelope.status, RunStatus::Completed);
    assert_eq!(envelope.query, "Gaming Mouse");
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    let results = &envelope.results;
    let primary = results.primary_product.as_ref().expect("primary record");
    assert_eq!(primary.price_numeric(), Some(8_000));
    assert_eq!(primary.price_text(), "Rs. 8,000");
    assert_eq!(primary.platform(), "Daraz.pk");

    assert_eq!(results.marketplace_products.len(), 3);
    assert_eq!(results.total_products_found, 4);

    let deals = results.best_deals.as_ref().expect("best deals");
    assert_eq!(deals.cheapest.price, 7_500);
    assert_eq!(deals.cheapest.platform, "PriceOye");
    assert_eq!(deals.most_expensive.price, 9_000);
    assert_eq!(deals.price_difference, 1_500);

    let range = results.price_range.as_ref().expect("price range");
    assert_eq!(range.min_price, 7_500);
    assert_eq!(range.max_price, 9_000);
    assert_eq!(range.price_count, 3, "the unpriced listing is left out");
    assert_eq!(range.total_records, 4);

    let report = results.comparison_report.as_ref().expect("comparison report");
    assert_eq!(report.status, GenerationStatus::FailedWithFallback);
    assert!(report.error.is_some());
    assert!(report.full_report.contains("Rs. 7,500"));

    assert_eq!(results.reports_generated.len(), 1);
    let saved = std::fs::read_to_string(&results.reports_generated[0].path)?;
    assert!(saved.contains("Gaming Mouse"));
    assert!(saved.contains("Templated statistical summary"));
    Ok(())
}

#[tokio::test]
async fn test_generated_narrative_is_persisted() -> Result<()> {
    let harness = Harness::start().await?;
    harness.mount_search_hits().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer llm-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "## Summary\nPriceOye is cheapest.\n\n## Buying Recommendations\nBuy from PriceOye."
                }
            }]
        })))
        .expect(1)
        .mount(&harness.completion)
        .await;

    let envelope = harness
        .pipeline(ScriptedLauncher::default())?
        .run("Gaming Mouse", options())
        .await;

    assert_eq!(envelope.status, RunStatus::Completed);
    let report = envelope
        .results
        .comparison_report
        .as_ref()
        .expect("comparison report");
    assert_eq!(report.status, GenerationStatus::Success);
    assert!(report.error.is_none());
    assert!(report.buying_recommendations.contains("Buy from PriceOye."));

    let stages = envelope.stages.as_ref().expect("stage summaries");
    assert!(stages.primary.succeeded);
    assert!(stages.aggregation.succeeded);
    assert!(stages.synthesis.succeeded);

    let entries = std::fs::read_dir(harness.reports.path())?.count();
    assert_eq!(entries, 1);
    Ok(())
}

#[tokio::test]
async fn test_browser_failure_does_not_stop_the_run() -> Result<()> {
    let harness = Harness::start().await?;
    harness.mount_search_hits().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&harness.completion)
        .await;

    let launcher = ScriptedLauncher {
        unreachable: true,
        ..ScriptedLauncher::default()
    };
    let envelope = harness.pipeline(launcher)?.run("Gaming Mouse", options()).await;

    assert_eq!(envelope.status, RunStatus::Completed);
    assert!(envelope.results.primary_product.is_none());
    assert_eq!(envelope.results.total_products_found, 3);

    let stages = envelope.stages.as_ref().expect("stage summaries");
    assert!(!stages.primary.succeeded);
    assert_eq!(
        stages.primary.failure.as_ref().map(|f| f.kind),
        Some(ErrorKind::Fatal)
    );

    let deals = envelope.results.best_deals.as_ref().expect("best deals");
    assert_eq!(deals.cheapest.price, 7_500);
    assert_eq!(deals.most_expensive.price, 9_000);
    Ok(())
}

#[tokio::test]
async fn test_browser_panic_is_contained_to_primary_stage() -> Result<()> {
    let harness = Harness::start().await?;
    harness.mount_search_hits().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&harness.completion)
        .await;

    let launcher = ScriptedLauncher {
        crashes: true,
        ..ScriptedLauncher::default()
    };
    let envelope = harness.pipeline(launcher)?.run("Gaming Mouse", options()).await;

    assert_eq!(envelope.status, RunStatus::Completed);
    assert!(envelope.error.is_none());

    let stages = envelope.stages.as_ref().expect("stage summaries");
    let primary = stages.primary.failure.as_ref().expect("primary failure");
    assert_eq!(primary.kind, ErrorKind::Fatal);
    assert!(primary.reason.contains("driver crashed inside primary stage"));
    assert!(stages.aggregation.succeeded);
    assert!(stages.synthesis.succeeded);

    assert!(envelope.results.primary_product.is_none());
    assert_eq!(envelope.results.marketplace_products.len(), 3);
    assert!(!harness.search.received_requests().await.unwrap_or_default().is_empty());
    let report = envelope.results.comparison_report.as_ref().expect("comparison report");
    assert_eq!(report.status, GenerationStatus::FailedWithFallback);
    Ok(())
}

#[tokio::test]
async fn test_primary_search_uses_query_and_first_listing() -> Result<()> {
    let harness = Harness::start().await?;
    harness.mount_search_hits().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&harness.completion)
        .await;

    let launcher = ScriptedLauncher::default();
    let visited = Arc::clone(&launcher.visited);
    let envelope = harness.pipeline(launcher)?.run("  Gaming Mouse  ", options()).await;
    assert_eq!(envelope.query, "Gaming Mouse");

    let visited = visited.lock().unwrap().clone();
    assert_eq!(visited.len(), 2);
    assert_eq!(visited[0], "https://www.daraz.pk/catalog/?q=Gaming+Mouse");
    assert_eq!(visited[1], "https://www.daraz.pk/products/logitech-g102-i100.html");
    Ok(())
}

#[tokio::test]
async fn test_blank_query_fails_without_touching_services() -> Result<()> {
    let harness = Harness::start().await?;
    let launcher = ScriptedLauncher::default();
    let visited = Arc::clone(&launcher.visited);

    let envelope = harness.pipeline(launcher)?.run("   ", options()).await;

    assert_eq!(envelope.status, RunStatus::Failed);
    assert_eq!(envelope.error.as_deref(), Some("Query must not be empty"));
    assert!(visited.lock().unwrap().is_empty());
    assert!(harness.search.received_requests().await.unwrap_or_default().is_empty());
    Ok(())
}
