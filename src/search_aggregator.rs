//! Secondary-marketplace discovery through a web search API.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::SearchConfig;
use crate::models::product::{Availability, NewProductRecord, ProductRecord, RecordSource};
use crate::price_parser::PriceParser;
use crate::utils::error::{AppError, Result, StageFailure, StageResult};
use crate::utils::retry::RetryPolicy;

pub const SEARCH_SERVICE: &str = "search";

const PRICED_CONFIDENCE: f32 = 0.8;
const UNPRICED_CONFIDENCE: f32 = 0.5;
const UNKNOWN_TITLE: &str = "Unknown Product";

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
    num: u32,
    hl: &'a str,
    gl: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<SearchHit>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

/// Client for the organic web search endpoint.
pub struct SearchClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    hl: String,
    gl: String,
}

impl SearchClient {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            hl: config.hl.clone(),
            gl: config.gl.clone(),
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Issues one search and returns its organic hits.
    pub async fn search(&self, query: &str, num: u32) -> Result<Vec<SearchHit>> {
        let api_key = self.api_key.as_deref().ok_or_else(|| AppError::MissingApiKey {
            service: SEARCH_SERVICE.to_string(),
        })?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", api_key)
            .json(&SearchRequest {
                q: query,
                num,
                hl: &self.hl,
                gl: &self.gl,
            })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimited {
                service: SEARCH_SERVICE.to_string(),
            });
        }
        if !status.is_success() {
            return Err(AppError::UnexpectedStatus {
                status: status.as_u16(),
                service: SEARCH_SERVICE.to_string(),
            });
        }

        let body: SearchResponse = response.json().await?;
        Ok(body.organic)
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SearchOutcome {
    pub records: Vec<ProductRecord>,
    pub validated_price_count: usize,
}

pub struct SearchAggregator {
    config: SearchConfig,
    client: Arc<SearchClient>,
    parser: Arc<PriceParser>,
    retry: RetryPolicy,
}

impl SearchAggregator {
    pub fn new(
        config: SearchConfig,
        client: Arc<SearchClient>,
        parser: Arc<PriceParser>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            config,
            client,
            parser,
            retry,
        }
    }

    /// The fixed battery of queries issued for one product, site-restricted
    /// directives first.
    pub fn queries(product_name: &str) -> Vec<String> {
        let name = product_name.trim();
        vec![
            format!("{name} site:priceoye.pk"),
            format!("{name} site:olx.com.pk"),
            format!("{name} site:telemart.pk"),
            format!("{name} site:shophive.pk"),
            format!("{name} site:daraz.pk"),
            format!("{name} price Pakistan buy online"),
            format!("buy {name} Pakistan online"),
            format!("{name} Pakistan price comparison"),
        ]
    }

    pub async fn search(&self, product_name: &str, max_results_per_query: u32) -> StageResult<SearchOutcome> {
        if !self.client.has_api_key() {
            tracing::error!("search API key is not configured");
            return Err(StageFailure::from(AppError::MissingApiKey {
                service: SEARCH_SERVICE.to_string(),
            }));
        }

        let queries = Self::queries(product_name);
        let num = max_results_per_query.max(1);
        let mut collected = Vec::new();
        let mut failed_queries = 0usize;
        let mut last_error = None;

        for (i, query) in queries.iter().enumerate() {
            if i > 0 && self.config.courtesy_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.courtesy_delay_ms)).await;
            }

            tracing::info!(query = %query, "issuing search query");
            match self
                .retry
                .run(SEARCH_SERVICE, || self.client.search(query, num))
                .await
            {
                Ok(hits) => {
                    let before = collected.len();
                    collected.extend(
                        hits.iter()
                            .filter(|hit| self.is_relevant(hit))
                            .filter_map(|hit| self.to_record(hit)),
                    );
                    tracing::debug!(
                        query = %query,
                        hits = hits.len(),
                        accepted = collected.len() - before,
                        "search query processed"
                    );
                }
                Err(e) => {
                    tracing::warn!(query = %query, error = %e, "search query failed");
                    failed_queries += 1;
                    last_error = Some(e);
                }
            }
        }

        if failed_queries == queries.len() {
            if let Some(e) = last_error {
                tracing::error!(error = %e, "every search query failed");
                return Err(StageFailure::from(e));
            }
        }

        let records = dedupe_by_url(collected);
        let validated_price_count = records.iter().filter(|r| r.is_priced()).count();
        tracing::info!(
            unique = records.len(),
            priced = validated_price_count,
            "search aggregation finished"
        );

        Ok(SearchOutcome {
            records,
            validated_price_count,
        })
    }

    /// A hit is kept when its domain is allow-listed or its text mentions
    /// the target locale.
    pub fn is_relevant(&self, hit: &SearchHit) -> bool {
        let host = host_of(&hit.link).unwrap_or_default();
        let allowed = self
            .config
            .allowed_domains
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")));
        if allowed {
            return true;
        }

        let text = format!("{} {}", hit.title, hit.snippet).to_lowercase();
        let mentions_locale = self
            .config
            .locale_markers
            .iter()
            .any(|marker| text.contains(&marker.to_lowercase()));
        let locale_domain = !self.config.locale_domain_suffix.is_empty()
            && host.ends_with(&self.config.locale_domain_suffix);

        mentions_locale || locale_domain
    }

    fn to_record(&self, hit: &SearchHit) -> Option<ProductRecord> {
        let title = match hit.title.trim() {
            "" => UNKNOWN_TITLE.to_string(),
            t => t.to_string(),
        };
        let price = self
            .parser
            .read(&title, &format!("{} {}", title, hit.snippet));
        let confidence = if price.is_priced() {
            PRICED_CONFIDENCE
        } else {
            UNPRICED_CONFIDENCE
        };

        let record = ProductRecord::new(NewProductRecord {
            platform: platform_name(&hit.link),
            title,
            url: hit.link.clone(),
            price,
            seller: None,
            rating: None,
            confidence,
            availability: Availability::Unknown,
            source: RecordSource::SearchResult,
        });

        match record {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!(link = %hit.link, error = %e, "skipping hit with unusable link");
                None
            }
        }
    }
}

/// Keeps the first record for each canonical URL.
pub fn dedupe_by_url(records: Vec<ProductRecord>) -> Vec<ProductRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.url().to_string()))
        .collect()
}

fn host_of(link: &str) -> Option<String> {
    let url = Url::parse(link.trim()).ok()?;
    let host = url.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// Display name for the marketplace behind a link.
pub fn platform_name(link: &str) -> String {
    match host_of(link) {
        Some(host) => match host.as_str() {
            "priceoye.pk" => "PriceOye".to_string(),
            "olx.com.pk" => "OLX Pakistan".to_string(),
            "telemart.pk" => "Telemart".to_string(),
            "shophive.pk" => "Shophive".to_string(),
            "daraz.pk" => "Daraz.pk".to_string(),
            _ => host,
        },
        None => "unknown".to_string(),
    }
}
