//! Sequences primary extraction, aggregation and synthesis for one query.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::comparison::ComparisonSynthesizer;
use crate::config::{AppConfig, PipelineConfig};
use crate::llm::CompletionClient;
use crate::models::comparison::ComparisonResult;
use crate::models::envelope::{
    AnalysisEnvelope, AnalysisResults, ComparisonReport, ReportRef, RunStatus, StageSummaries,
    StageSummary,
};
use crate::models::product::ProductRecord;
use crate::price_parser::PriceParser;
use crate::primary_extractor::{ExtractionRequest, PrimarySiteExtractor};
use crate::report::ReportWriter;
use crate::scraper::ChromeLauncher;
use crate::search_aggregator::{SearchAggregator, SearchClient, SearchOutcome};
use crate::utils::error::{Result, StageFailure, StageResult};

pub const REPORT_TYPE: &str = "comprehensive_comparison";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    NotStarted,
    PrimaryDone,
    AggregationDone,
    SynthesisDone,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub selection_index: usize,
    pub headless: bool,
    pub timeout_ms: u64,
    pub max_results: u32,
}

impl RunOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            selection_index: 0,
            headless: config.primary.headless,
            timeout_ms: config.primary.timeout_ms,
            max_results: config.search.results_per_query,
        }
    }
}

/// Outputs of the three stages, each captured as data.
#[derive(Debug, Clone)]
pub struct StageOutputs {
    pub primary: StageResult<ProductRecord>,
    pub aggregation: StageResult<SearchOutcome>,
    pub synthesis: StageResult<ComparisonResult>,
    pub state: PipelineState,
}

#[derive(Clone)]
pub struct Pipeline {
    primary: Arc<PrimarySiteExtractor>,
    aggregator: Arc<SearchAggregator>,
    synthesizer: Arc<ComparisonSynthesizer>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        primary: Arc<PrimarySiteExtractor>,
        aggregator: Arc<SearchAggregator>,
        synthesizer: Arc<ComparisonSynthesizer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            primary,
            aggregator,
            synthesizer,
            config,
        }
    }

    /// Builds every external-service client once.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let parser = Arc::new(PriceParser::new());

        let primary = PrimarySiteExtractor::new(
            config.primary.clone(),
            Arc::new(ChromeLauncher),
            Arc::clone(&parser),
        )?;

        let search_client = Arc::new(SearchClient::new(&config.search)?);
        if !search_client.has_api_key() {
            tracing::warn!("search API key not set, aggregation will be skipped");
        }
        let aggregator = SearchAggregator::new(
            config.search.clone(),
            search_client,
            Arc::clone(&parser),
            config.retry.clone(),
        );

        let completion = CompletionClient::new(config.llm.clone())?;
        tracing::info!(model = completion.model(), "completion client ready");
        let synthesizer = ComparisonSynthesizer::new(
            Arc::new(completion),
            config.retry.clone(),
            ReportWriter::new(&config.reports),
        );

        Ok(Self::new(
            Arc::new(primary),
            Arc::new(aggregator),
            Arc::new(synthesizer),
            config.pipeline.clone(),
        ))
    }

    /// Runs the full analysis. Stage failures are reported inside the
    /// envelope, panics included; only a blank query or an aborted run task
    /// yields `failed`.
    pub async fn run(&self, query: &str, options: RunOptions) -> AnalysisEnvelope {
        let query_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let query = query.trim().to_string();

        tracing::info!(%query_id, query = %query, "starting analysis");

        let outcome = if query.is_empty() {
            Err("Query must not be empty".to_string())
        } else {
            let pipeline = self.clone();
            let stage_query = query.clone();
            tokio::spawn(async move { pipeline.run_stages(&stage_query, &options).await })
                .await
                .map_err(|e| {
                    tracing::error!(%query_id, error = %e, "pipeline aborted");
                    format!("Pipeline aborted: {}", e)
                })
        };

        let execution_time = Utc::now();
        let duration_seconds = clock.elapsed().as_secs_f64();

        match outcome {
            Ok(outputs) => {
                tracing::info!(%query_id, duration_seconds, "analysis completed");
                AnalysisEnvelope {
                    query_id,
                    status: RunStatus::Completed,
                    query,
                    stages: Some(StageSummaries {
                        primary: StageSummary::of(&outputs.primary),
                        aggregation: StageSummary::of(&outputs.aggregation),
                        synthesis: StageSummary::of(&outputs.synthesis),
                    }),
                    results: build_results(outputs),
                    error: None,
                    started_at,
                    execution_time,
                    duration_seconds,
                }
            }
            Err(error) => {
                tracing::warn!(%query_id, state = ?PipelineState::Failed, error = %error, "analysis failed");
                AnalysisEnvelope {
                    query_id,
                    status: RunStatus::Failed,
                    query,
                    results: AnalysisResults::default(),
                    stages: None,
                    error: Some(error),
                    started_at,
                    execution_time,
                    duration_seconds,
                }
            }
        }
    }

    pub async fn run_stages(&self, query: &str, options: &RunOptions) -> StageOutputs {
        let mut state = PipelineState::NotStarted;

        let primary = isolated(
            "primary",
            self.primary.extract(ExtractionRequest {
                query: query.to_string(),
                selection_index: options.selection_index,
                headless: options.headless,
                timeout_ms: options.timeout_ms,
            }),
        )
        .await;
        advance(&mut state, PipelineState::PrimaryDone);

        let search_query = match &primary {
            Ok(record) if self.config.refine_with_primary_title => record.title().to_string(),
            _ => query.to_string(),
        };
        let aggregation = isolated(
            "aggregation",
            self.aggregator.search(&search_query, options.max_results),
        )
        .await;
        advance(&mut state, PipelineState::AggregationDone);

        let aggregated = aggregation
            .as_ref()
            .map(|outcome| outcome.records.clone())
            .map_err(Clone::clone);
        let synthesis = isolated(
            "synthesis",
            self.synthesizer.synthesize(&primary, &aggregated, query),
        )
        .await;
        advance(&mut state, PipelineState::SynthesisDone);
        advance(&mut state, PipelineState::Completed);

        StageOutputs {
            primary,
            aggregation,
            synthesis,
            state,
        }
    }
}

/// Turns a panic inside one stage into that stage's failure so the
/// remaining stages still run.
async fn isolated<T>(
    stage: &'static str,
    work: impl Future<Output = StageResult<T>>,
) -> StageResult<T> {
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => {
            let failure = StageFailure::from_panic(stage, payload);
            tracing::error!(stage, reason = %failure.reason, "stage panicked");
            Err(failure)
        }
    }
}

fn advance(state: &mut PipelineState, next: PipelineState) {
    tracing::debug!(from = ?*state, to = ?next, "pipeline transition");
    *state = next;
}

fn build_results(outputs: StageOutputs) -> AnalysisResults {
    let StageOutputs {
        primary,
        aggregation,
        synthesis,
        ..
    } = outputs;

    let primary_product = primary.ok();
    let marketplace_products = aggregation.map(|o| o.records).unwrap_or_default();

    match synthesis {
        Ok(result) => {
            let reports_generated = result
                .report_path
                .as_ref()
                .map(|path| ReportRef {
                    report_type: REPORT_TYPE.to_string(),
                    path: path.to_string_lossy().to_string(),
                    status: result.status,
                })
                .into_iter()
                .collect();

            AnalysisResults {
                primary_product,
                marketplace_products,
                total_products_found: result.pool.len(),
                best_deals: result.best_deals.clone(),
                price_range: result.statistics.clone(),
                reports_generated,
                comparison_report: Some(ComparisonReport {
                    full_report: result.narrative,
                    status: result.status,
                    best_deals: result.best_deals,
                    market_insights: result.market_insights,
                    buying_recommendations: result.buying_recommendations,
                    error: result.generation_error,
                }),
            }
        }
        Err(_) => AnalysisResults {
            total_products_found: primary_product.iter().count() + marketplace_products.len(),
            primary_product,
            marketplace_products,
            ..AnalysisResults::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PrimarySiteConfig, ReportsConfig, SearchConfig};
    use crate::llm::{ChatMessage, MockNarrativeGenerator, NarrativeGenerator};
    use crate::scraper::{BrowserLauncher, BrowserSession, MockBrowserLauncher, MockBrowserSession, SessionOptions};
    use crate::utils::error::{AppError, ErrorKind};
    use crate::utils::retry::RetryPolicy;
    use tempfile::TempDir;

    fn pipeline_with(
        launcher: impl BrowserLauncher + 'static,
        generator: impl NarrativeGenerator + 'static,
        dir: &TempDir,
    ) -> Pipeline {
        let parser = Arc::new(PriceParser::new());
        let primary = PrimarySiteExtractor::new(
            PrimarySiteConfig {
                retry_pause_ms: 0,
                settle_ms: 0,
                ..PrimarySiteConfig::default()
            },
            Arc::new(launcher),
            Arc::clone(&parser),
        )
        .unwrap();
        let search_config = SearchConfig::default();
        let aggregator = SearchAggregator::new(
            search_config.clone(),
            Arc::new(SearchClient::new(&search_config).unwrap()),
            parser,
            RetryPolicy::no_retry(),
        );
        let synthesizer = ComparisonSynthesizer::new(
            Arc::new(generator),
            RetryPolicy::no_retry(),
            ReportWriter::new(&ReportsConfig {
                dir: dir.path().to_string_lossy().to_string(),
                extension: "md".to_string(),
            }),
        );
        Pipeline::new(
            Arc::new(primary),
            Arc::new(aggregator),
            Arc::new(synthesizer),
            PipelineConfig::default(),
        )
    }

    fn options() -> RunOptions {
        RunOptions {
            selection_index: 0,
            headless: true,
            timeout_ms: 1_000,
            max_results: 10,
        }
    }

    fn working_launcher() -> MockBrowserLauncher {
        let mut session = MockBrowserSession::new();
        session.expect_navigate().returning(|_, _, _| Ok(()));
        session.expect_wait_for_selector().returning(|_, _| Ok(()));
        let mut served = 0;
        session.expect_content().returning(move || {
            served += 1;
            Ok(if served == 1 {
                r#"<a href="/products/mouse-i1.html" title="Redragon Gaming Mouse">x</a>"#.to_string()
            } else {
                r#"<div class="pdp-price"><span class="currency">Rs. 8,000</span></div>"#.to_string()
            })
        });
        session.expect_close().times(1).returning(|| Ok(()));

        let mut launcher = MockBrowserLauncher::new();
        launcher
            .expect_launch()
            .return_once(move |_| Ok(Box::new(session) as Box<dyn BrowserSession>));
        launcher
    }

    struct CrashingLauncher;

    impl BrowserLauncher for CrashingLauncher {
        fn launch(&self, _options: &SessionOptions) -> Result<Box<dyn BrowserSession>> {
            panic!("browser driver crashed")
        }
    }

    struct CrashingGenerator;

    #[async_trait::async_trait]
    impl NarrativeGenerator for CrashingGenerator {
        fn name(&self) -> &'static str {
            "completion"
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            panic!("generator exploded")
        }
    }

    fn echo_generator() -> MockNarrativeGenerator {
        let mut generator = MockNarrativeGenerator::new();
        generator.expect_name().return_const("completion");
        generator
            .expect_complete()
            .returning(|_| Ok("## Buying Recommendations\nBuy locally.".to_string()));
        generator
    }

    #[tokio::test]
    async fn test_blank_query_fails_without_running_stages() {
        let dir = TempDir::new().unwrap();
        let mut launcher = MockBrowserLauncher::new();
        launcher.expect_launch().never();
        let pipeline = pipeline_with(launcher, MockNarrativeGenerator::new(), &dir);

        let envelope = pipeline.run("   ", options()).await;

        assert_eq!(envelope.status, RunStatus::Failed);
        assert_eq!(envelope.error.as_deref(), Some("Query must not be empty"));
        assert!(envelope.stages.is_none());
    }

    #[tokio::test]
    async fn test_stage_failures_still_complete() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_with(working_launcher(), echo_generator(), &dir);

        let envelope = pipeline.run("Gaming Mouse", options()).await;

        assert_eq!(envelope.status, RunStatus::Completed);
        let stages = envelope.stages.unwrap();
        assert!(stages.primary.succeeded);
        assert!(!stages.aggregation.succeeded);
        assert_eq!(stages.aggregation.failure.unwrap().kind, ErrorKind::Configuration);
        assert!(stages.synthesis.succeeded);

        let results = envelope.results;
        assert_eq!(results.primary_product.unwrap().price_numeric(), Some(8_000));
        assert!(results.marketplace_products.is_empty());
        assert_eq!(results.total_products_found, 1);
        assert_eq!(results.reports_generated.len(), 1);
        assert_eq!(results.reports_generated[0].report_type, REPORT_TYPE);
        let report = results.comparison_report.unwrap();
        assert_eq!(report.buying_recommendations, "\nBuy locally.");
    }

    #[tokio::test]
    async fn test_all_stages_failing_is_still_completed() {
        let dir = TempDir::new().unwrap();
        let mut launcher = MockBrowserLauncher::new();
        launcher
            .expect_launch()
            .returning(|_| Err(AppError::Browser("no chrome".to_string())));
        let pipeline = pipeline_with(launcher, MockNarrativeGenerator::new(), &dir);

        let envelope = pipeline.run("Gaming Mouse", options()).await;

        assert_eq!(envelope.status, RunStatus::Completed);
        let stages = envelope.stages.unwrap();
        assert!(!stages.primary.succeeded);
        assert_eq!(stages.synthesis.failure.unwrap().kind, ErrorKind::NoData);
        assert!(envelope.results.comparison_report.is_none());
        assert_eq!(envelope.results.total_products_found, 0);
    }

    #[tokio::test]
    async fn test_panicking_primary_stage_is_isolated() {
        let dir = TempDir::new().unwrap();
        let mut generator = MockNarrativeGenerator::new();
        generator.expect_name().return_const("completion");
        generator.expect_complete().never();
        let pipeline = pipeline_with(CrashingLauncher, generator, &dir);

        let envelope = pipeline.run("Gaming Mouse", options()).await;

        assert_eq!(envelope.status, RunStatus::Completed);
        assert!(envelope.error.is_none());
        let stages = envelope.stages.unwrap();
        let primary = stages.primary.failure.unwrap();
        assert_eq!(primary.kind, ErrorKind::Fatal);
        assert!(primary.reason.contains("browser driver crashed"));
        // Aggregation still ran and failed on its own missing key.
        assert_eq!(stages.aggregation.failure.unwrap().kind, ErrorKind::Configuration);
        assert_eq!(stages.synthesis.failure.unwrap().kind, ErrorKind::NoData);
    }

    #[tokio::test]
    async fn test_panicking_synthesis_keeps_earlier_stages() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_with(working_launcher(), CrashingGenerator, &dir);

        let outputs = pipeline.run_stages("Gaming Mouse", &options()).await;

        assert_eq!(outputs.state, PipelineState::Completed);
        assert_eq!(outputs.primary.unwrap().price_numeric(), Some(8_000));
        let failure = outputs.synthesis.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Fatal);
        assert_eq!(failure.reason, "synthesis stage panicked: generator exploded");
    }

    #[tokio::test]
    async fn test_run_stages_reaches_completed() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_with(working_launcher(), echo_generator(), &dir);

        let outputs = pipeline.run_stages("Gaming Mouse", &options()).await;
        assert_eq!(outputs.state, PipelineState::Completed);
    }

    #[test]
    fn test_from_config_builds_without_keys() {
        let config = AppConfig::default();
        assert!(Pipeline::from_config(&config).is_ok());
        let options = RunOptions::from_config(&config);
        assert_eq!(options.timeout_ms, 60_000);
        assert_eq!(options.max_results, 10);
    }

    #[test]
    fn test_launcher_trait_object_is_shareable() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn BrowserLauncher>();
    }
}
