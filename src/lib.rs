pub mod comparison;
pub mod config;
pub mod element_finder;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod price_bands;
pub mod price_parser;
pub mod primary_extractor;
pub mod report;
pub mod scraper;
pub mod search_aggregator;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use models::{AnalysisEnvelope, ProductRecord, RunStatus};
pub use pipeline::{Pipeline, RunOptions};
pub use utils::error::{AppError, ErrorKind, StageFailure, StageResult};

pub type Result<T> = std::result::Result<T, AppError>;
