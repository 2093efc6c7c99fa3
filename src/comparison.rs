//! Merges stage outputs into a ranked comparison with a narrative report.
//!
//! Synthesis degrades rather than fails: a failed generative call falls
//! back to a templated report and an unwritable report directory only
//! loses the artifact. An empty candidate pool is the one hard failure.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::llm::{ChatMessage, NarrativeGenerator};
use crate::models::comparison::{
    BestDeals, CandidatePool, ComparisonResult, GenerationStatus, MarketInsights, PriceStatistics,
    RankedOffer, rank_offers,
};
use crate::models::product::ProductRecord;
use crate::price_parser::format_rupees;
use crate::report::{ReportMethod, ReportWriter};
use crate::utils::error::{ErrorKind, StageFailure, StageResult};
use crate::utils::retry::RetryPolicy;

pub const RECOMMENDATIONS_HEADING: &str = "Buying Recommendations";
pub const RECOMMENDATIONS_PLACEHOLDER: &str = "See full report";
const RECOMMENDATIONS_MAX_CHARS: usize = 500;

pub const SYSTEM_PROMPT: &str = "You are an expert Pakistani e-commerce analyst. Create a comprehensive comparison report that helps consumers make informed purchasing decisions.

Your report should include:
1. Executive Summary
2. Price Comparison (lowest to highest)
3. Platform Analysis (reliability, reputation)
4. Best Value Recommendations
5. Market Insights specific to Pakistan
6. Buying Recommendations

Focus on Pakistani market conditions, local seller reliability, and consumer preferences.
Use Pakistani Rupees (PKR) for all price discussions.
Consider factors like:
- PTA approval (for electronics)
- Local warranty vs international warranty
- Shipping costs and delivery time in Pakistan
- Payment methods available in Pakistan

Return structured analysis as plain text (not JSON) formatted for markdown.";

pub struct ComparisonSynthesizer {
    generator: Arc<dyn NarrativeGenerator>,
    retry: RetryPolicy,
    writer: ReportWriter,
}

impl ComparisonSynthesizer {
    pub fn new(generator: Arc<dyn NarrativeGenerator>, retry: RetryPolicy, writer: ReportWriter) -> Self {
        Self {
            generator,
            retry,
            writer,
        }
    }

    pub async fn synthesize(
        &self,
        primary: &StageResult<ProductRecord>,
        aggregated: &StageResult<Vec<ProductRecord>>,
        query: &str,
    ) -> StageResult<ComparisonResult> {
        let pool = CandidatePool::build(
            primary.as_ref().ok().cloned(),
            aggregated.as_ref().ok().cloned().unwrap_or_default(),
        );

        if pool.is_empty() {
            tracing::warn!(query, "no product data available for report generation");
            return Err(StageFailure::new(
                ErrorKind::NoData,
                "No product data available for report generation",
            ));
        }

        let statistics = PriceStatistics::compute(&pool);
        let best_deals = BestDeals::from_pool(&pool);
        let market_insights = MarketInsights::from_pool(&pool, statistics.as_ref());
        let ranked_offers = rank_offers(&pool);

        tracing::info!(
            query,
            products = pool.len(),
            priced = statistics.as_ref().map(|s| s.price_count).unwrap_or(0),
            "generating comparison report"
        );

        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(user_prompt(query, &pool)),
        ];
        let generated = self
            .retry
            .run(self.generator.name(), || self.generator.complete(&messages))
            .await;

        let (narrative, method, generation_error) = match generated {
            Ok(text) => (text, ReportMethod::Generated, None),
            Err(e) => {
                tracing::warn!(error = %e, "narrative generation failed, using templated report");
                let fallback = fallback_report(query, &pool, statistics.as_ref(), &ranked_offers);
                (fallback, ReportMethod::TemplatedFallback, Some(e.to_string()))
            }
        };

        let report_path = match self.writer.write(query, &narrative, pool.len(), method).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!(error = %e, "failed to save report");
                None
            }
        };

        let status = match (method, report_path.is_some()) {
            (ReportMethod::TemplatedFallback, _) => GenerationStatus::FailedWithFallback,
            (ReportMethod::Generated, true) => GenerationStatus::Success,
            (ReportMethod::Generated, false) => GenerationStatus::PartialSuccess,
        };

        Ok(ComparisonResult {
            query: query.to_string(),
            buying_recommendations: recommendations_excerpt(&narrative),
            pool,
            statistics,
            best_deals,
            market_insights,
            ranked_offers,
            narrative,
            status,
            report_path,
            generation_error,
        })
    }
}

fn user_prompt(query: &str, pool: &CandidatePool) -> String {
    let mut summary = String::new();
    for record in pool.records() {
        let numeric = record
            .price_numeric()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let _ = writeln!(
            summary,
            "Platform: {}\nTitle: {}\nPrice: {} (Numeric: {})\nURL: {}\nConfidence: {}\n---",
            record.platform(),
            record.title(),
            record.price_text(),
            numeric,
            record.url(),
            record.confidence()
        );
    }

    format!(
        "Generate a comprehensive comparison report for: \"{query}\"\n\n\
         Product Data:\n{summary}\n\
         Generate detailed analysis focusing on Pakistani market conditions, local sellers, and consumer preferences."
    )
}

/// Deterministic report built only from the structured data.
pub fn fallback_report(
    query: &str,
    pool: &CandidatePool,
    statistics: Option<&PriceStatistics>,
    ranked: &[RankedOffer],
) -> String {
    let mut report = String::new();
    let _ = writeln!(report, "# Price Comparison Report: {query}\n");
    let _ = writeln!(report, "## Summary");
    let _ = writeln!(report, "Total products found: {}", pool.len());
    let _ = writeln!(report, "Platforms: {}", pool.platforms().join(", "));

    match statistics {
        Some(stats) => {
            let _ = writeln!(report, "Products with verified prices: {}", stats.price_count);
            let _ = writeln!(report, "Lowest price: {}", format_rupees(stats.min_price));
            let _ = writeln!(report, "Highest price: {}", format_rupees(stats.max_price));
            let _ = writeln!(
                report,
                "Average price: {}\n",
                format_rupees(stats.average_price.round() as u64)
            );
        }
        None => {
            let _ = writeln!(report, "No listing carried a verifiable price.\n");
        }
    }

    if !ranked.is_empty() {
        let _ = writeln!(report, "## Price Ranking\n");
        let _ = writeln!(report, "| Rank | Platform | Price | Above cheapest | Title |");
        let _ = writeln!(report, "|---|---|---|---|---|");
        for offer in ranked {
            let _ = writeln!(
                report,
                "| {} | {} | {} | {} | {} |",
                offer.rank,
                offer.platform,
                format_rupees(offer.price),
                format_rupees(offer.delta_from_cheapest),
                offer.title.replace('|', "/")
            );
        }
        let _ = writeln!(report);
    }

    let _ = writeln!(report, "## Product Listings\n");
    for (i, record) in pool.records().iter().enumerate() {
        let _ = writeln!(report, "### {}. {}", i + 1, record.platform());
        let _ = writeln!(report, "**Title:** {}", record.title());
        let _ = writeln!(report, "**Price:** {}", record.price_text());
        let _ = writeln!(report, "**URL:** {}\n", record.url());
    }

    report
}

/// Text following the last "Buying Recommendations" heading, capped at
/// 500 characters.
pub fn recommendations_excerpt(narrative: &str) -> String {
    match narrative.rfind(RECOMMENDATIONS_HEADING) {
        Some(idx) => narrative[idx + RECOMMENDATIONS_HEADING.len()..]
            .chars()
            .take(RECOMMENDATIONS_MAX_CHARS)
            .collect(),
        None => RECOMMENDATIONS_PLACEHOLDER.to_string(),
    }
}
