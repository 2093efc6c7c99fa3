use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::product::ProductRecord;

/// Ordered, URL-deduplicated set of records: the primary-site record first
/// when present, then aggregated records in discovery order.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CandidatePool {
    records: Vec<ProductRecord>,
}

impl CandidatePool {
    pub fn build(primary: Option<ProductRecord>, aggregated: Vec<ProductRecord>) -> Self {
        let mut seen = HashSet::new();
        let records = primary
            .into_iter()
            .chain(aggregated)
            .filter(|record| seen.insert(record.url().to_string()))
            .collect();
        Self { records }
    }

    pub fn records(&self) -> &[ProductRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn priced(&self) -> impl Iterator<Item = (&ProductRecord, u64)> {
        self.records
            .iter()
            .filter_map(|r| r.price_numeric().map(|price| (r, price)))
    }

    /// Distinct platforms in first-seen order.
    pub fn platforms(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .filter(|r| seen.insert(r.platform()))
            .map(|r| r.platform().to_string())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceStatistics {
    pub min_price: u64,
    pub max_price: u64,
    pub average_price: f64,
    /// Records that carried a validated price; the average's denominator.
    pub price_count: usize,
    pub total_records: usize,
}

impl PriceStatistics {
    /// `None` when no record in the pool is priced.
    pub fn compute(pool: &CandidatePool) -> Option<Self> {
        let prices: Vec<u64> = pool.priced().map(|(_, price)| price).collect();
        let min_price = *prices.iter().min()?;
        let max_price = *prices.iter().max()?;
        let sum: u128 = prices.iter().map(|p| *p as u128).sum();
        Some(Self {
            min_price,
            max_price,
            average_price: sum as f64 / prices.len() as f64,
            price_count: prices.len(),
            total_records: pool.len(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DealSummary {
    pub platform: String,
    pub price: u64,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BestDeals {
    pub cheapest: DealSummary,
    pub most_expensive: DealSummary,
    pub price_difference: u64,
}

impl BestDeals {
    pub fn from_pool(pool: &CandidatePool) -> Option<Self> {
        // First-seen record wins ties at both ends.
        let mut priced = pool.priced();
        let first = priced.next()?;
        let (cheapest, most_expensive) = priced.fold((first, first), |(lo, hi), item| {
            (
                if item.1 < lo.1 { item } else { lo },
                if item.1 > hi.1 { item } else { hi },
            )
        });
        Some(Self {
            price_difference: most_expensive.1 - cheapest.1,
            cheapest: summarize(cheapest),
            most_expensive: summarize(most_expensive),
        })
    }
}

fn summarize((record, price): (&ProductRecord, u64)) -> DealSummary {
    DealSummary {
        platform: record.platform().to_string(),
        price,
        title: record.title().chars().take(50).collect(),
        url: record.url().to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketInsights {
    pub total_products: usize,
    pub platforms_found: Vec<String>,
    pub platform_count: usize,
    pub price_range: Option<PriceStatistics>,
}

impl MarketInsights {
    pub fn from_pool(pool: &CandidatePool, statistics: Option<&PriceStatistics>) -> Self {
        let platforms_found = pool.platforms();
        Self {
            total_products: pool.len(),
            platform_count: platforms_found.len(),
            platforms_found,
            price_range: statistics.cloned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedOffer {
    pub rank: usize,
    pub platform: String,
    pub title: String,
    pub price: u64,
    pub delta_from_cheapest: u64,
    pub url: String,
}

/// Priced records cheapest first; ties keep pool order.
pub fn rank_offers(pool: &CandidatePool) -> Vec<RankedOffer> {
    let mut priced: Vec<(&ProductRecord, u64)> = pool.priced().collect();
    priced.sort_by_key(|(_, price)| *price);
    let cheapest = priced.first().map(|(_, p)| *p).unwrap_or_default();
    priced
        .into_iter()
        .enumerate()
        .map(|(i, (record, price))| RankedOffer {
            rank: i + 1,
            platform: record.platform().to_string(),
            title: record.title().to_string(),
            price,
            delta_from_cheapest: price - cheapest,
            url: record.url().to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// Narrative generated and persisted.
    Success,
    /// Narrative generated but the artifact could not be persisted.
    PartialSuccess,
    /// Generation failed; the templated report was used.
    FailedWithFallback,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ComparisonResult {
    pub query: String,
    pub pool: CandidatePool,
    pub statistics: Option<PriceStatistics>,
    pub best_deals: Option<BestDeals>,
    pub market_insights: MarketInsights,
    pub ranked_offers: Vec<RankedOffer>,
    pub narrative: String,
    pub buying_recommendations: String,
    pub status: GenerationStatus,
    pub report_path: Option<PathBuf>,
    pub generation_error: Option<String>,
}
