//! Static plausibility bands per product category.
//!
//! The table is scanned top to bottom and the first keyword found in the
//! title decides the band. Accessory keywords come first so that
//! "iPhone 14 case" is judged as a case, then specific models and brands,
//! then generic category words. Keywords match whole words only ("hp" does
//! not match inside "headphones").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Accessory,
    Phone,
    Laptop,
    Tablet,
    Watch,
    Audio,
    Gaming,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CategoryBand {
    pub keyword: &'static str,
    pub category: Category,
    pub min: u64,
    pub max: u64,
}

impl CategoryBand {
    const fn new(keyword: &'static str, category: Category, min: u64, max: u64) -> Self {
        Self {
            keyword,
            category,
            min,
            max,
        }
    }

    pub fn contains(&self, price: u64) -> bool {
        (self.min..=self.max).contains(&price)
    }
}

use Category::*;

pub static CATEGORY_BANDS: &[CategoryBand] = &[
    // Accessories
    CategoryBand::new("screen protector", Accessory, 200, 5_000),
    CategoryBand::new("protector", Accessory, 200, 5_000),
    CategoryBand::new("case", Accessory, 300, 20_000),
    CategoryBand::new("cover", Accessory, 300, 20_000),
    CategoryBand::new("cable", Accessory, 200, 10_000),
    CategoryBand::new("charger", Accessory, 500, 20_000),
    CategoryBand::new("adapter", Accessory, 300, 15_000),
    CategoryBand::new("strap", Accessory, 300, 15_000),
    // Specific models
    CategoryBand::new("apple watch", Watch, 50_000, 300_000),
    CategoryBand::new("macbook", Laptop, 150_000, 1_000_000),
    CategoryBand::new("ipad", Tablet, 50_000, 500_000),
    CategoryBand::new("iphone", Phone, 50_000, 500_000),
    CategoryBand::new("airpods", Audio, 5_000, 100_000),
    CategoryBand::new("ps5", Gaming, 100_000, 300_000),
    CategoryBand::new("ps4", Gaming, 30_000, 150_000),
    CategoryBand::new("playstation", Gaming, 50_000, 300_000),
    CategoryBand::new("xbox", Gaming, 50_000, 300_000),
    // Brands
    CategoryBand::new("oneplus", Phone, 40_000, 200_000),
    CategoryBand::new("redmi", Phone, 15_000, 100_000),
    CategoryBand::new("xiaomi", Phone, 15_000, 150_000),
    CategoryBand::new("samsung", Phone, 15_000, 400_000),
    CategoryBand::new("oppo", Phone, 15_000, 150_000),
    CategoryBand::new("vivo", Phone, 15_000, 150_000),
    CategoryBand::new("realme", Phone, 15_000, 100_000),
    CategoryBand::new("huawei", Phone, 20_000, 200_000),
    CategoryBand::new("dell", Laptop, 30_000, 500_000),
    CategoryBand::new("hp", Laptop, 30_000, 500_000),
    CategoryBand::new("lenovo", Laptop, 30_000, 500_000),
    CategoryBand::new("asus", Laptop, 30_000, 500_000),
    // Generic categories
    CategoryBand::new("laptop", Laptop, 30_000, 1_000_000),
    CategoryBand::new("tablet", Tablet, 15_000, 300_000),
    CategoryBand::new("smartphone", Phone, 10_000, 500_000),
    CategoryBand::new("phone", Phone, 10_000, 500_000),
    CategoryBand::new("mobile", Phone, 10_000, 500_000),
    CategoryBand::new("watch", Watch, 2_000, 500_000),
    CategoryBand::new("earbuds", Audio, 1_000, 100_000),
    CategoryBand::new("headphones", Audio, 1_000, 100_000),
    CategoryBand::new("speaker", Audio, 2_000, 200_000),
];

/// Band applied to titles that match no keyword.
pub const GENERIC_MIN: u64 = 1_000;
pub const GENERIC_MAX: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    /// Outside the band of the first matching keyword.
    OutOfCategoryBand(&'static CategoryBand),
    /// No keyword matched and the price is outside the generic band.
    OutOfGenericBand,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_phrase(title_words: &[String], keyword: &str) -> bool {
    let needle: Vec<&str> = keyword.split_whitespace().collect();
    if needle.is_empty() || needle.len() > title_words.len() {
        return false;
    }
    title_words
        .windows(needle.len())
        .any(|window| window.iter().zip(&needle).all(|(w, n)| w == n))
}

/// First band whose keyword appears in `title`.
pub fn classify(title: &str) -> Option<&'static CategoryBand> {
    let title_words = words(title);
    CATEGORY_BANDS
        .iter()
        .find(|band| contains_phrase(&title_words, band.keyword))
}

pub fn check(title: &str, price: u64) -> Verdict {
    match classify(title) {
        Some(band) if band.contains(price) => Verdict::Accepted,
        Some(band) => Verdict::OutOfCategoryBand(band),
        None if (GENERIC_MIN..=GENERIC_MAX).contains(&price) => Verdict::Accepted,
        None => Verdict::OutOfGenericBand,
    }
}
