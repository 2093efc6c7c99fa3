//! Ordered fallback strategies for locating fields in a rendered page.
//!
//! A cascade tries its strategies in order and the first one that yields
//! an acceptable value wins. Markup drift is handled by adding strategies,
//! not by branching in the extractor.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Title,
    Price,
    Seller,
    Rating,
    Availability,
}

/// One way of reading a value out of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// Whitespace-normalized text of the first element matching the selector.
    Text { selector: String },
    /// An attribute of the first element matching the selector.
    Attribute { selector: String, attribute: String },
    /// A fixed value when any element matches the selector.
    Marker { selector: String, value: String },
}

impl ExtractionStrategy {
    pub fn text(selector: &str) -> Self {
        Self::Text {
            selector: selector.to_string(),
        }
    }

    pub fn attribute(selector: &str, attribute: &str) -> Self {
        Self::Attribute {
            selector: selector.to_string(),
            attribute: attribute.to_string(),
        }
    }

    pub fn marker(selector: &str, value: &str) -> Self {
        Self::Marker {
            selector: selector.to_string(),
            value: value.to_string(),
        }
    }

    pub fn selector(&self) -> &str {
        match self {
            Self::Text { selector } | Self::Attribute { selector, .. } | Self::Marker { selector, .. } => {
                selector
            }
        }
    }

    pub fn apply(&self, document: &Html) -> Option<String> {
        let selector = parse_selector(self.selector())?;
        let element = document.select(&selector).next()?;
        let value = match self {
            Self::Text { .. } => element_text(&element),
            Self::Attribute { attribute, .. } => element.value().attr(attribute)?.trim().to_string(),
            Self::Marker { value, .. } => value.clone(),
        };
        (!value.is_empty()).then_some(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldMatch {
    pub field: Field,
    pub value: String,
    /// Position of the winning strategy in the cascade.
    pub strategy_index: usize,
}

/// Ordered strategies for one field plus the acceptance test a candidate
/// value must pass. A rejected candidate lets the cascade continue.
#[derive(Debug, Clone)]
pub struct FieldCascade {
    pub field: Field,
    pub strategies: Vec<ExtractionStrategy>,
    accept: fn(&str) -> bool,
}

impl FieldCascade {
    pub fn new(field: Field, strategies: Vec<ExtractionStrategy>, accept: fn(&str) -> bool) -> Self {
        Self {
            field,
            strategies,
            accept,
        }
    }

    pub fn extract(&self, document: &Html) -> Option<FieldMatch> {
        self.strategies
            .iter()
            .enumerate()
            .find_map(|(strategy_index, strategy)| {
                let value = strategy.apply(document)?;
                if (self.accept)(&value) {
                    Some(FieldMatch {
                        field: self.field,
                        value,
                        strategy_index,
                    })
                } else {
                    tracing::debug!(
                        field = ?self.field,
                        selector = strategy.selector(),
                        value = %value,
                        "candidate rejected, trying next strategy"
                    );
                    None
                }
            })
    }
}

/// A product link found on a results page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingLink {
    pub href: String,
    pub title: String,
}

/// Ordered selectors for product links on a results page. The first
/// selector that yields at least one usable link wins.
#[derive(Debug, Clone)]
pub struct ListingCascade {
    pub selectors: Vec<String>,
}

impl ListingCascade {
    pub fn new(selectors: &[&str]) -> Self {
        Self {
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn discover(&self, document: &Html) -> Vec<ListingLink> {
        for selector_str in &self.selectors {
            let Some(selector) = parse_selector(selector_str) else {
                continue;
            };
            let links: Vec<ListingLink> = document
                .select(&selector)
                .filter_map(|element| {
                    let href = element.value().attr("href")?.trim();
                    let title = element
                        .value()
                        .attr("title")
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| element_text(&element));
                    (!href.is_empty() && !title.is_empty()).then(|| ListingLink {
                        href: href.to_string(),
                        title,
                    })
                })
                .collect();
            if !links.is_empty() {
                tracing::debug!(selector = %selector_str, count = links.len(), "listing selector matched");
                return links;
            }
        }
        Vec::new()
    }
}

fn parse_selector(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(selector, error = ?e, "invalid CSS selector skipped");
            None
        }
    }
}

fn element_text(element: &ElementRef) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

const SELLER_NOISE: &[&str] = &["chat", "store", "rating", "response", "%"];

fn accept_title(value: &str) -> bool {
    value.chars().count() > 10
}

fn accept_price(value: &str) -> bool {
    value.chars().any(|c| c.is_ascii_digit())
}

fn accept_seller(value: &str) -> bool {
    let lower = value.to_lowercase();
    !SELLER_NOISE.iter().any(|noise| lower.contains(noise))
}

fn accept_rating(value: &str) -> bool {
    parse_rating(value).is_some()
}

fn accept_any(_value: &str) -> bool {
    true
}

/// Leading `d` or `d.d` number in the text, kept only inside [0, 5].
pub fn parse_rating(text: &str) -> Option<f32> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = &text[start..];
    let end = rest
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || (*c == '.' && *i > 0))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    let rating: f32 = rest[..end].trim_end_matches('.').parse().ok()?;
    crate::models::product::is_valid_rating(rating).then_some(rating)
}

pub fn title_cascade() -> FieldCascade {
    FieldCascade::new(
        Field::Title,
        vec![
            ExtractionStrategy::text("[data-testid=\"pdp-product-title\"]"),
            ExtractionStrategy::text("h1[data-testid=\"pdp-product-title\"]"),
            ExtractionStrategy::text(".pdp-product-title"),
            ExtractionStrategy::text("h1.pdp-mod-product-badge-title"),
            ExtractionStrategy::text("h1"),
            ExtractionStrategy::attribute("meta[property=\"og:title\"]", "content"),
        ],
        accept_title,
    )
}

pub fn price_cascade() -> FieldCascade {
    FieldCascade::new(
        Field::Price,
        vec![
            ExtractionStrategy::text("[data-testid=\"pdp-price\"] .currency"),
            ExtractionStrategy::text(".pdp-price .currency"),
            ExtractionStrategy::text(".pdp-product-price .currency"),
            ExtractionStrategy::text(".price-current"),
            ExtractionStrategy::text("[class*=\"price\"]:not([class*=\"original\"]):not([class*=\"discount\"])"),
        ],
        accept_price,
    )
}

pub fn seller_cascade() -> FieldCascade {
    FieldCascade::new(
        Field::Seller,
        vec![
            ExtractionStrategy::text("[data-testid=\"seller-name\"] a"),
            ExtractionStrategy::text(".seller-name a"),
            ExtractionStrategy::text(".pdp-seller-name a"),
            ExtractionStrategy::text("[class*=\"seller\"] a"),
            ExtractionStrategy::text(".seller-link"),
        ],
        accept_seller,
    )
}

pub fn rating_cascade() -> FieldCascade {
    FieldCascade::new(
        Field::Rating,
        vec![
            ExtractionStrategy::text("[data-testid=\"pdp-review-summary\"] .score"),
            ExtractionStrategy::text(".review-summary .score"),
            ExtractionStrategy::text(".pdp-review .score"),
            ExtractionStrategy::text("[class*=\"rating\"] .score"),
            ExtractionStrategy::text(".rating-average"),
        ],
        accept_rating,
    )
}

pub const OUT_OF_STOCK: &str = "out_of_stock";
pub const IN_STOCK: &str = "in_stock";

pub fn availability_cascade() -> FieldCascade {
    FieldCascade::new(
        Field::Availability,
        vec![
            ExtractionStrategy::marker("[data-testid=\"out-of-stock\"]", OUT_OF_STOCK),
            ExtractionStrategy::marker(".quantity-content-warning", OUT_OF_STOCK),
            ExtractionStrategy::marker("[class*=\"out-of-stock\"]", OUT_OF_STOCK),
            ExtractionStrategy::marker("[data-testid=\"add-to-cart\"]", IN_STOCK),
            ExtractionStrategy::marker(".add-to-cart-buy-now-btn", IN_STOCK),
            ExtractionStrategy::marker("button.add-to-cart", IN_STOCK),
        ],
        accept_any,
    )
}

pub fn listing_cascade() -> ListingCascade {
    ListingCascade::new(&[
        "a[href*=\"/products/\"][title]",
        "a[title][href^=\"//www.daraz.pk/products/\"]",
        "a[href*=\"/products/\"]",
    ])
}
