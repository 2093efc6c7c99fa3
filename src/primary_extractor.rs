//! Structured extraction of one product from the primary marketplace.
//!
//! Every call owns exactly one browser session, released on every exit
//! path including panics.

use std::sync::Arc;
use std::time::Duration;

use scraper::Html;
use url::Url;

use crate::config::PrimarySiteConfig;
use crate::element_finder::{self, FieldCascade, ListingCascade, ListingLink};
use crate::models::product::{Availability, NewProductRecord, ProductRecord, RecordSource, absolutize};
use crate::price_parser::{PriceParser, PriceReading};
use crate::scraper::{BrowserLauncher, BrowserSession, LoadStrategy, SessionOptions};
use crate::utils::error::{AppError, Result, StageFailure, StageResult};

pub const LOAD_ATTEMPTS: u32 = 3;
const LISTING_READY_SELECTOR: &str = "a[href*=\"/products/\"]";
const PRICED_CONFIDENCE: f32 = 0.95;
const UNPRICED_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRequest {
    pub query: String,
    pub selection_index: usize,
    pub headless: bool,
    pub timeout_ms: u64,
}

struct Cascades {
    listing: ListingCascade,
    title: FieldCascade,
    price: FieldCascade,
    seller: FieldCascade,
    rating: FieldCascade,
    availability: FieldCascade,
}

impl Default for Cascades {
    fn default() -> Self {
        Self {
            listing: element_finder::listing_cascade(),
            title: element_finder::title_cascade(),
            price: element_finder::price_cascade(),
            seller: element_finder::seller_cascade(),
            rating: element_finder::rating_cascade(),
            availability: element_finder::availability_cascade(),
        }
    }
}

pub struct PrimarySiteExtractor {
    config: PrimarySiteConfig,
    base_url: Url,
    launcher: Arc<dyn BrowserLauncher>,
    parser: Arc<PriceParser>,
    cascades: Cascades,
}

/// Closes the wrapped session when dropped.
struct SessionGuard {
    session: Box<dyn BrowserSession>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        match self.session.close() {
            Ok(()) => tracing::debug!("browser session closed"),
            Err(e) => tracing::warn!(error = %e, "failed to close browser session"),
        }
    }
}

impl PrimarySiteExtractor {
    pub fn new(
        config: PrimarySiteConfig,
        launcher: Arc<dyn BrowserLauncher>,
        parser: Arc<PriceParser>,
    ) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| AppError::InvalidUrl {
            url: config.base_url.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            config,
            base_url,
            launcher,
            parser,
            cascades: Cascades::default(),
        })
    }

    /// Runs the blocking browser work on the blocking pool.
    pub async fn extract(self: &Arc<Self>, request: ExtractionRequest) -> StageResult<ProductRecord> {
        let extractor = Arc::clone(self);
        match tokio::task::spawn_blocking(move || extractor.extract_blocking(&request)).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                let failure = StageFailure::from_panic("primary", e.into_panic());
                tracing::error!(reason = %failure.reason, "primary extraction panicked");
                Err(failure)
            }
            Err(e) => Err(StageFailure::from(AppError::Internal(format!(
                "Primary extraction task cancelled: {}",
                e
            )))),
        }
    }

    pub fn extract_blocking(&self, request: &ExtractionRequest) -> StageResult<ProductRecord> {
        tracing::info!(query = %request.query, index = request.selection_index, "starting primary extraction");

        let options = SessionOptions::from_config(&self.config, request.headless);
        let guard = SessionGuard {
            session: self.launcher.launch(&options).map_err(|e| {
                tracing::error!(error = %e, "could not start browser session");
                StageFailure::from(e)
            })?,
        };

        let outcome = self.extract_with(guard.session.as_ref(), request);
        drop(guard);

        match outcome {
            Ok(record) => {
                tracing::info!(
                    title = %record.title(),
                    price = ?record.price_numeric(),
                    "primary extraction finished"
                );
                Ok(record)
            }
            Err(e) => {
                tracing::warn!(error = %e, "primary extraction failed");
                Err(StageFailure::from(e))
            }
        }
    }

    fn extract_with(&self, session: &dyn BrowserSession, request: &ExtractionRequest) -> Result<ProductRecord> {
        let timeout = Duration::from_millis(request.timeout_ms.max(1));

        let search_url = self.search_url(&request.query)?;
        self.load_with_retries(session, search_url.as_str(), timeout)?;

        let listing_wait = timeout.min(Duration::from_millis(self.config.listing_wait_ms));
        if let Err(e) = session.wait_for_selector(LISTING_READY_SELECTOR, listing_wait) {
            tracing::debug!(error = %e, "listing wait timed out, trying selectors anyway");
        }

        let listing_page = Html::parse_document(&session.content()?);
        let links = self.cascades.listing.discover(&listing_page);
        let link = select_listing(&links, request.selection_index).ok_or_else(|| AppError::ElementNotFound {
            selector: "product listing".to_string(),
        })?;

        let product_url = absolutize(&self.base_url, &link.href)?;
        tracing::info!(url = %product_url, "opening product page");
        self.load_with_retries(session, &product_url, timeout)?;

        if self.config.settle_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.config.settle_ms));
        }

        let detail_page = Html::parse_document(&session.content()?);
        self.build_record(&detail_page, link, &product_url)
    }

    fn search_url(&self, query: &str) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&self.config.search_path)
            .map_err(|e| AppError::InvalidUrl {
                url: self.config.search_path.clone(),
                message: e.to_string(),
            })?;
        url.query_pairs_mut().append_pair("q", query.trim());
        Ok(url)
    }

    fn load_with_retries(&self, session: &dyn BrowserSession, url: &str, timeout: Duration) -> Result<()> {
        let mut last_error = String::new();
        for attempt in 1..=LOAD_ATTEMPTS {
            let strategy = LoadStrategy::for_attempt(attempt);
            let ceiling = strategy.ceiling(timeout);
            match session.navigate(url, strategy, ceiling) {
                Ok(()) => {
                    tracing::debug!(url, attempt, ?strategy, "page loaded");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(url, attempt, ?strategy, error = %e, "page load attempt failed");
                    last_error = e.to_string();
                    if attempt < LOAD_ATTEMPTS && self.config.retry_pause_ms > 0 {
                        std::thread::sleep(Duration::from_millis(self.config.retry_pause_ms));
                    }
                }
            }
        }
        Err(AppError::PageLoad {
            url: url.to_string(),
            attempts: LOAD_ATTEMPTS,
            message: last_error,
        })
    }

    fn build_record(&self, page: &Html, link: &ListingLink, url: &str) -> Result<ProductRecord> {
        let title = self
            .cascades
            .title
            .extract(page)
            .map(|m| m.value)
            .unwrap_or_else(|| link.title.clone());

        let price = match self.cascades.price.extract(page) {
            Some(found) => self.parser.read_display(&title, &found.value),
            None => PriceReading::unavailable(),
        };

        let seller = self.cascades.seller.extract(page).map(|m| m.value);
        let rating = self
            .cascades
            .rating
            .extract(page)
            .and_then(|m| element_finder::parse_rating(&m.value));
        let availability = match self.cascades.availability.extract(page) {
            Some(m) if m.value == element_finder::OUT_OF_STOCK => Availability::OutOfStock,
            Some(m) if m.value == element_finder::IN_STOCK => Availability::InStock,
            _ => Availability::Unknown,
        };

        let confidence = if price.is_priced() {
            PRICED_CONFIDENCE
        } else {
            UNPRICED_CONFIDENCE
        };

        ProductRecord::new(NewProductRecord {
            platform: self.config.platform_name.clone(),
            title,
            url: url.to_string(),
            price,
            seller,
            rating,
            confidence,
            availability,
            source: RecordSource::PrimarySite,
        })
    }
}

/// Picks the requested listing, falling back to the first one when the
/// index is out of range.
fn select_listing(links: &[ListingLink], index: usize) -> Option<&ListingLink> {
    if index >= links.len() && !links.is_empty() {
        tracing::info!(index, available = links.len(), "selection index out of range, using first listing");
        return links.first();
    }
    links.get(index)
}
