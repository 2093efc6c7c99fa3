use std::str::FromStr;

use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::price_bands::{self, Verdict};

pub const PRICE_NOT_AVAILABLE: &str = "Price not available";

/// Which pattern of the cascade produced a match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    CurrencyPrefixed,
    CurrencySuffixed,
    Labeled,
    SymbolPrefixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceMatch {
    pub amount: u64,
    pub kind: PatternKind,
}

/// A price as stored on a record. The numeric amount is only present when
/// it passed the plausibility band for the title it belongs to; instances
/// with an amount can only be produced by [`PriceParser`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PriceReading {
    amount: Option<u64>,
    text: String,
}

impl PriceReading {
    pub fn unavailable() -> Self {
        Self {
            amount: None,
            text: PRICE_NOT_AVAILABLE.to_string(),
        }
    }

    fn validated(amount: u64, text: String) -> Self {
        Self {
            amount: Some(amount),
            text,
        }
    }

    pub fn amount(&self) -> Option<u64> {
        self.amount
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_priced(&self) -> bool {
        self.amount.is_some()
    }
}

// Amount group accepts both 45,000 and 1,23,456 style grouping.
const AMOUNT: &str = r"(\d+(?:,\d{2,3})*(?:\.\d{1,2})?)";

pub struct PriceParser {
    cascade: Vec<(PatternKind, Regex)>,
    listing_rupees: Regex,
    leading_number: Regex,
}

impl Default for PriceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceParser {
    pub fn new() -> Self {
        let pattern = |p: String| Regex::new(&p).expect("price pattern is valid");
        PriceParser {
            cascade: vec![
                (
                    PatternKind::CurrencyPrefixed,
                    pattern(format!(r"(?i)\b(?:Rs|PKR)\.?\s*{AMOUNT}")),
                ),
                (
                    PatternKind::CurrencySuffixed,
                    pattern(format!(r"(?i){AMOUNT}\s*(?:Rs|PKR)\b")),
                ),
                (
                    PatternKind::Labeled,
                    pattern(format!(r"(?i)\bprice\s*:?\s*{AMOUNT}")),
                ),
                (
                    PatternKind::SymbolPrefixed,
                    pattern(format!(r"₨\s*{AMOUNT}")),
                ),
            ],
            listing_rupees: pattern(r"(?i)Rs[\s.]*([0-9,]+)".to_string()),
            leading_number: pattern(r"\d[\d,]*".to_string()),
        }
    }

    /// Runs the pattern cascade over free text; the first pattern that
    /// matches wins. No plausibility check is applied.
    pub fn extract(&self, text: &str) -> Option<PriceMatch> {
        self.cascade.iter().find_map(|(kind, regex)| {
            let captures = regex.captures(text)?;
            let amount = parse_amount(captures.get(1)?.as_str())?;
            Some(PriceMatch {
                amount,
                kind: *kind,
            })
        })
    }

    /// Extracts a price from search-hit text and validates it against the
    /// band for `title`.
    pub fn read(&self, title: &str, text: &str) -> PriceReading {
        match self.extract(text) {
            Some(found) => validate(title, found.amount, format_rupees(found.amount)),
            None => PriceReading::unavailable(),
        }
    }

    /// Canonicalizes a price element's display text from a product page:
    /// currency symbols and thousands separators are dropped and the
    /// leading numeric group is taken.
    pub fn canonicalize(&self, display: &str) -> Option<u64> {
        if let Some(captures) = self.listing_rupees.captures(display) {
            if let Some(amount) = captures.get(1).and_then(|m| parse_amount(m.as_str())) {
                return Some(amount);
            }
        }
        self.leading_number
            .find(display)
            .and_then(|m| parse_amount(m.as_str()))
    }

    /// Canonicalizes and validates a product-page price. The display text
    /// is kept as shown on the page.
    pub fn read_display(&self, title: &str, display: &str) -> PriceReading {
        match self.canonicalize(display) {
            Some(amount) => validate(title, amount, display.trim().to_string()),
            None => PriceReading::unavailable(),
        }
    }
}

fn validate(title: &str, amount: u64, text: String) -> PriceReading {
    match price_bands::check(title, amount) {
        Verdict::Accepted => PriceReading::validated(amount, text),
        Verdict::OutOfCategoryBand(band) => {
            tracing::info!(
                title,
                price = amount,
                keyword = band.keyword,
                min = band.min,
                max = band.max,
                "rejected price outside category band"
            );
            PriceReading::unavailable()
        }
        Verdict::OutOfGenericBand => {
            tracing::info!(title, price = amount, "rejected unrealistic price");
            PriceReading::unavailable()
        }
    }
}

fn parse_amount(raw: &str) -> Option<u64> {
    let cleaned = raw.replace(',', "");
    let cleaned = cleaned.trim_end_matches('.');
    Decimal::from_str(cleaned).ok()?.trunc().to_u64()
}

/// "Rs. 45,000" style display text.
pub fn format_rupees(amount: u64) -> String {
    let digits = amount.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("Rs. {grouped}")
}
