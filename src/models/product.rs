use serde::{Deserialize, Serialize};
use url::Url;

use crate::price_parser::PriceReading;
use crate::utils::error::{AppError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    InStock,
    OutOfStock,
    Unknown,
}

/// Where a record was discovered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    PrimarySite,
    SearchResult,
}

/// One product observation. Records are created once by an extractor through
/// [`ProductRecord::new`] and only read afterwards.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProductRecord {
    platform: String,
    title: String,
    price_numeric: Option<u64>,
    price_text: String,
    /// Canonical absolute URL; the deduplication key.
    url: String,
    seller: Option<String>,
    rating: Option<f32>,
    confidence: f32,
    availability: Availability,
    source: RecordSource,
}

#[derive(Debug, Clone)]
pub struct NewProductRecord {
    pub platform: String,
    pub title: String,
    pub url: String,
    pub price: PriceReading,
    pub seller: Option<String>,
    pub rating: Option<f32>,
    pub confidence: f32,
    pub availability: Availability,
    pub source: RecordSource,
}

impl ProductRecord {
    pub fn new(new_record: NewProductRecord) -> Result<Self> {
        let url = canonical_url(&new_record.url)?;
        Ok(Self {
            platform: new_record.platform,
            title: new_record.title.trim().to_string(),
            price_numeric: new_record.price.amount(),
            price_text: new_record.price.text().to_string(),
            url,
            seller: new_record.seller,
            rating: new_record.rating.filter(|r| is_valid_rating(*r)),
            confidence: new_record.confidence.clamp(0.0, 1.0),
            availability: new_record.availability,
            source: new_record.source,
        })
    }

    pub fn is_priced(&self) -> bool {
        self.price_numeric.is_some()
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Validated whole-rupee price, `None` when no plausible price was found.
    pub fn price_numeric(&self) -> Option<u64> {
        self.price_numeric
    }

    pub fn price_text(&self) -> &str {
        &self.price_text
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn seller(&self) -> Option<&str> {
        self.seller.as_deref()
    }

    pub fn rating(&self) -> Option<f32> {
        self.rating
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn availability(&self) -> Availability {
        self.availability
    }

    pub fn source(&self) -> RecordSource {
        self.source
    }
}

#[cfg(test)]
impl ProductRecord {
    /// Builds a search-result record directly from field values for unit tests.
    pub(crate) fn fixture(platform: &str, url: &str, price: Option<u64>) -> Self {
        Self {
            platform: platform.to_string(),
            title: format!("{platform} listing"),
            price_numeric: price,
            price_text: String::new(),
            url: url.to_string(),
            seller: None,
            rating: None,
            confidence: 0.8,
            availability: Availability::Unknown,
            source: RecordSource::SearchResult,
        }
    }

    pub(crate) fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub(crate) fn with_price_text(mut self, text: &str) -> Self {
        self.price_text = text.to_string();
        self
    }

    pub(crate) fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub(crate) fn with_source(mut self, source: RecordSource) -> Self {
        self.source = source;
        self
    }
}

pub fn is_valid_rating(rating: f32) -> bool {
    (0.0..=5.0).contains(&rating)
}

/// Normalizes an absolute URL for deduplication: the fragment and
/// `utm_*` tracking parameters are dropped and a trailing slash on a
/// non-root path is removed.
pub fn canonical_url(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw.trim()).map_err(|e| AppError::InvalidUrl {
        url: raw.to_string(),
        message: e.to_string(),
    })?;
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    Ok(url.to_string())
}

/// Resolves protocol-relative and relative links against `base`.
pub fn absolutize(base: &Url, href: &str) -> Result<String> {
    base.join(href.trim())
        .map(|u| u.to_string())
        .map_err(|e| AppError::InvalidUrl {
            url: href.to_string(),
            message: e.to_string(),
        })
}
