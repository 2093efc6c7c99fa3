use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::comparison::{BestDeals, GenerationStatus, MarketInsights, PriceStatistics};
use crate::models::product::ProductRecord;
use crate::utils::error::StageFailure;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Outcome of one stage as reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
}

impl StageSummary {
    pub fn of<T>(outcome: &Result<T, StageFailure>) -> Self {
        match outcome {
            Ok(_) => Self {
                succeeded: true,
                failure: None,
            },
            Err(failure) => Self {
                succeeded: false,
                failure: Some(failure.clone()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageSummaries {
    pub primary: StageSummary,
    pub aggregation: StageSummary,
    pub synthesis: StageSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub full_report: String,
    pub status: GenerationStatus,
    pub best_deals: Option<BestDeals>,
    pub market_insights: MarketInsights,
    pub buying_recommendations: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportRef {
    #[serde(rename = "type")]
    pub report_type: String,
    pub path: String,
    pub status: GenerationStatus,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResults {
    pub primary_product: Option<ProductRecord>,
    pub marketplace_products: Vec<ProductRecord>,
    pub comparison_report: Option<ComparisonReport>,
    pub total_products_found: usize,
    pub best_deals: Option<BestDeals>,
    pub price_range: Option<PriceStatistics>,
    pub reports_generated: Vec<ReportRef>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisEnvelope {
    pub query_id: Uuid,
    pub status: RunStatus,
    pub query: String,
    pub results: AnalysisResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stages: Option<StageSummaries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub execution_time: DateTime<Utc>,
    pub duration_seconds: f64,
}
