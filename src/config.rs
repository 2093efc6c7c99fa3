use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use url::Url;

use crate::utils::retry::RetryPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub primary: PrimarySiteConfig,
    pub search: SearchConfig,
    pub llm: LlmConfig,
    pub retry: RetryPolicy,
    pub reports: ReportsConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimarySiteConfig {
    pub base_url: String,
    pub search_path: String,
    pub platform_name: String,
    pub user_agent: String,
    pub chrome_path: Option<String>,
    pub headless: bool,
    pub timeout_ms: u64,
    /// Pause between page-load attempts.
    pub retry_pause_ms: u64,
    /// Wait after reaching the detail page for dynamic content.
    pub settle_ms: u64,
    pub listing_wait_ms: u64,
}

impl Default for PrimarySiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.daraz.pk".to_string(),
            search_path: "/catalog/".to_string(),
            platform_name: "Daraz.pk".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            chrome_path: None,
            headless: true,
            timeout_ms: 60_000,
            retry_pause_ms: 3_000,
            settle_ms: 2_000,
            listing_wait_ms: 20_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub results_per_query: u32,
    pub courtesy_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub gl: String,
    pub hl: String,
    pub allowed_domains: Vec<String>,
    pub locale_markers: Vec<String>,
    pub locale_domain_suffix: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://google.serper.dev/search".to_string(),
            api_key: None,
            results_per_query: 10,
            courtesy_delay_ms: 500,
            request_timeout_secs: 30,
            gl: "pk".to_string(),
            hl: "en".to_string(),
            allowed_domains: [
                "daraz.pk",
                "priceoye.pk",
                "olx.com.pk",
                "telemart.pk",
                "shophive.pk",
                "homeshopping.pk",
                "symbios.pk",
                "goto.com.pk",
                "yayvo.com",
                "mega.pk",
            ]
            .iter()
            .map(|d| d.to_string())
            .collect(),
            locale_markers: vec!["pakistan".to_string()],
            locale_domain_suffix: ".pk".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            api_key: None,
            model: "llama-3.1-8b-instant".to_string(),
            temperature: 0.1,
            max_tokens: 4000,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    pub dir: String,
    pub extension: String,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            dir: "data/reports".to_string(),
            extension: "md".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Search the secondary sites with the primary record's resolved title
    /// instead of the raw query when the primary stage succeeds.
    pub refine_with_primary_title: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "UATU_"
            .add_source(Environment::with_prefix("UATU").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;
        config.apply_env_fallbacks();
        config.validate()?;
        Ok(config)
    }

    /// Fills credentials and the browser path from their conventional
    /// environment variables when configuration leaves them unset.
    pub fn apply_env_fallbacks(&mut self) {
        if self.primary.chrome_path.is_none() {
            self.primary.chrome_path = env::var("CHROME_PATH").ok();
        }
        if self.search.api_key.is_none() {
            self.search.api_key = env::var("SERPER_API_KEY").ok().filter(|k| !k.is_empty());
        }
        if self.llm.api_key.is_none() {
            self.llm.api_key = env::var("GROQ_API_KEY").ok().filter(|k| !k.is_empty());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if Url::parse(&self.primary.base_url).is_err() {
            return Err(ConfigError::Message("Invalid primary site base_url".into()));
        }

        if self.primary.timeout_ms == 0 {
            return Err(ConfigError::Message("Primary timeout_ms must be greater than 0".into()));
        }

        if Url::parse(&self.search.endpoint).is_err() {
            return Err(ConfigError::Message("Invalid search endpoint URL".into()));
        }

        if self.search.results_per_query == 0 {
            return Err(ConfigError::Message("Search results_per_query must be greater than 0".into()));
        }

        if Url::parse(&self.llm.endpoint).is_err() {
            return Err(ConfigError::Message("Invalid llm endpoint URL".into()));
        }

        if self.llm.max_tokens == 0 {
            return Err(ConfigError::Message("LLM max_tokens must be greater than 0".into()));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Message("LLM temperature must be between 0 and 2".into()));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Message("Retry max_attempts must be greater than 0".into()));
        }

        if self.reports.extension.is_empty()
            || !self.reports.extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ConfigError::Message("Report extension must be alphanumeric".into()));
        }

        Ok(())
    }
}
