use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PrimarySiteConfig;
use crate::utils::error::{AppError, Result};

/// How long a navigation waits before the page counts as loaded. Each
/// retry relaxes the criterion and raises the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    /// Full load event.
    Load,
    /// A `body` element is present; subresources may still be loading.
    BodyReady,
    /// Navigation committed by the browser.
    Committed,
}

impl LoadStrategy {
    /// Strategy for the 1-based `attempt`; 0 is treated as the first attempt.
    pub fn for_attempt(attempt: u32) -> Self {
        match attempt {
            0 | 1 => Self::Load,
            2 => Self::BodyReady,
            _ => Self::Committed,
        }
    }

    pub fn ceiling(self, base: Duration) -> Duration {
        match self {
            Self::Load => base,
            Self::BodyReady => base + Duration::from_secs(10),
            Self::Committed => base + Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub headless: bool,
    pub user_agent: String,
    pub accept_language: String,
    pub chrome_path: Option<PathBuf>,
    pub window_size: (u32, u32),
}

impl SessionOptions {
    pub fn from_config(config: &PrimarySiteConfig, headless: bool) -> Self {
        Self {
            headless,
            user_agent: config.user_agent.clone(),
            accept_language: "en-US,en;q=0.9".to_string(),
            chrome_path: config.chrome_path.as_ref().map(PathBuf::from),
            window_size: (1920, 1080),
        }
    }
}

/// One live browser tab. Closing is idempotent.
#[cfg_attr(test, mockall::automock)]
pub trait BrowserSession: Send {
    fn navigate(&self, url: &str, strategy: LoadStrategy, timeout: Duration) -> Result<()>;
    fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;
    fn content(&self) -> Result<String>;
    fn close(&mut self) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
pub trait BrowserLauncher: Send + Sync {
    fn launch(&self, options: &SessionOptions) -> Result<Box<dyn BrowserSession>>;
}

/// Launches a dedicated Chrome process per session.
#[derive(Debug, Default, Clone)]
pub struct ChromeLauncher;

impl BrowserLauncher for ChromeLauncher {
    fn launch(&self, options: &SessionOptions) -> Result<Box<dyn BrowserSession>> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(options.headless)
            .sandbox(false) // Often needed in containerized environments
            .window_size(Some(options.window_size))
            .args(vec![
                OsStr::new("--no-sandbox"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-background-timer-throttling"),
                OsStr::new("--disable-backgrounding-occluded-windows"),
                OsStr::new("--disable-renderer-backgrounding"),
            ])
            .build()
            .map_err(|e| AppError::Browser(format!("Failed to create launch options: {}", e)))?;

        if let Some(chrome_path) = &options.chrome_path {
            launch_options.path = Some(chrome_path.clone());
        }

        let browser = Browser::new(launch_options)
            .map_err(|e| AppError::Browser(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| AppError::Browser(format!("Failed to create tab: {}", e)))?;

        tab.set_user_agent(&options.user_agent, Some(&options.accept_language), None)
            .map_err(|e| AppError::Browser(format!("Failed to set user agent: {}", e)))?;

        tracing::debug!(headless = options.headless, "browser session started");

        Ok(Box::new(ChromeSession {
            browser: Some(browser),
            tab: Some(tab),
        }))
    }
}

pub struct ChromeSession {
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

impl ChromeSession {
    fn tab(&self) -> Result<&Arc<Tab>> {
        self.tab
            .as_ref()
            .ok_or_else(|| AppError::Browser("Session already closed".to_string()))
    }
}

impl BrowserSession for ChromeSession {
    fn navigate(&self, url: &str, strategy: LoadStrategy, timeout: Duration) -> Result<()> {
        let tab = self.tab()?;
        tab.set_default_timeout(timeout);
        tab.navigate_to(url)
            .map_err(|e| AppError::Browser(format!("Navigation failed: {}", e)))?;

        match strategy {
            LoadStrategy::Load => {
                tab.wait_until_navigated()
                    .map_err(|e| AppError::Browser(format!("Page load failed: {}", e)))?;
            }
            LoadStrategy::BodyReady => {
                tab.wait_for_element_with_custom_timeout("body", timeout)
                    .map_err(|e| AppError::Browser(format!("Document not ready: {}", e)))?;
            }
            LoadStrategy::Committed => {}
        }
        Ok(())
    }

    fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        self.tab()?
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map(|_| ())
            .map_err(|_| AppError::ElementNotFound {
                selector: selector.to_string(),
            })
    }

    fn content(&self) -> Result<String> {
        self.tab()?
            .get_content()
            .map_err(|e| AppError::Browser(format!("Failed to get page content: {}", e)))
    }

    fn close(&mut self) -> Result<()> {
        let closed_tab = match self.tab.take() {
            Some(tab) => tab
                .close(true)
                .map(|_| ())
                .map_err(|e| AppError::Browser(format!("Failed to close tab: {}", e))),
            None => Ok(()),
        };
        // Dropping the browser terminates the Chrome process.
        self.browser.take();
        closed_tab
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if self.browser.is_some() {
            let _ = self.close();
        }
    }
}
