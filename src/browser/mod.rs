//! Owned browser session resource.
//!
//! Every navigation, wait and scroll goes through [`BrowserSession`], so the
//! scraper never touches global browser state. A session is owned by exactly
//! one worker for its lifetime and torn down on drop.

#[cfg(test)]
pub mod fake;

use crate::config::ScraperConfig;
use anyhow::{Context, Result};
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Minimum `<td>` count for a row to count as a price row while loading.
pub const PRICE_ROW_MIN_CELLS: usize = 6;

/// Operations the scraper needs from a live page.
pub trait BrowserSession: Send {
    /// Load `url` into the session, replacing the current document.
    fn navigate(&mut self, url: &str) -> Result<()>;

    /// `Ok(true)` once an element matching the CSS `selector` exists,
    /// `Ok(false)` if none appeared within `timeout`.
    fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool>;

    /// Click the first element matching `xpath` once it appears.
    /// `Ok(false)` when nothing matched within `timeout`; `Err` when a match
    /// was found but the click failed.
    fn click(&mut self, xpath: &str, timeout: Duration) -> Result<bool>;

    fn scroll_to_bottom(&mut self) -> Result<()>;

    /// Rows under `table tbody` having at least `min_cells` cells.
    fn count_rows(&mut self, min_cells: usize) -> Result<usize>;

    /// Serialised current document.
    fn content(&mut self) -> Result<String>;
}

/// Opens fresh sessions; one per worker.
pub trait SessionFactory: Send + Sync + 'static {
    type Session: BrowserSession + 'static;

    fn open(&self) -> Result<Self::Session>;
}

/// Bounded wait between polling steps.
pub trait Pause: Send + Sync {
    fn pause(&self, duration: Duration);
}

/// Real wall-clock pause; blocks the worker thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// ── Chrome ────────────────────────────────────────────────────────────────────

pub struct ChromeFactory {
    config: ScraperConfig,
}

impl ChromeFactory {
    pub fn new(config: &ScraperConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl SessionFactory for ChromeFactory {
    type Session = ChromeSession;

    fn open(&self) -> Result<ChromeSession> {
        ChromeSession::launch(&self.config)
    }
}

/// Headless Chrome with a single tab.
pub struct ChromeSession {
    // Dropping the browser kills the Chrome process.
    tab: Arc<Tab>,
    _browser: Browser,
}

impl ChromeSession {
    pub fn launch(config: &ScraperConfig) -> Result<Self> {
        info!("Launching Chrome (headless: {})", config.headless);

        let user_agent = config.user_agent.as_ref().map(|ua| format!("--user-agent={}", ua));
        let mut args: Vec<&OsStr> = vec![
            OsStr::new("--lang=en-US"),
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-gpu"),
        ];
        if let Some(ua) = &user_agent {
            args.push(OsStr::new(ua.as_str()));
        }

        let options = LaunchOptions {
            headless: config.headless,
            sandbox: false,
            window_size: Some((config.window_width, config.window_height)),
            idle_browser_timeout: Duration::from_secs(config.page_load_timeout_secs * 2),
            args,
            ..Default::default()
        };

        let browser = Browser::new(options)
            .context("Failed to launch Chrome. Is Chrome/Chromium installed?")?;
        let tab = browser.new_tab().context("Failed to open browser tab")?;
        tab.set_default_timeout(Duration::from_secs(config.page_load_timeout_secs));

        Ok(Self {
            tab,
            _browser: browser,
        })
    }
}

impl BrowserSession for ChromeSession {
    fn navigate(&mut self, url: &str) -> Result<()> {
        debug!("GET {}", url);
        self.tab
            .navigate_to(url)
            .with_context(|| format!("navigate to {}", url))?
            .wait_until_navigated()
            .with_context(|| format!("page load for {}", url))?;
        Ok(())
    }

    fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool> {
        Ok(self
            .tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .is_ok())
    }

    fn click(&mut self, xpath: &str, timeout: Duration) -> Result<bool> {
        let Ok(element) = self.tab.wait_for_xpath_with_custom_timeout(xpath, timeout) else {
            return Ok(false);
        };
        element.click().context("click")?;
        Ok(true)
    }

    fn scroll_to_bottom(&mut self) -> Result<()> {
        self.tab
            .evaluate("window.scrollTo(0, document.body.scrollHeight);", false)
            .context("scroll")?;
        Ok(())
    }

    fn count_rows(&mut self, min_cells: usize) -> Result<usize> {
        let js = format!(
            "Array.from(document.querySelectorAll('table tbody tr'))\
             .filter(r => r.querySelectorAll('td').length >= {}).length",
            min_cells
        );
        let remote = self.tab.evaluate(&js, false).context("count rows")?;
        let n = remote
            .value
            .and_then(|v| v.as_u64())
            .context("row count script returned no number")?;
        Ok(n as usize)
    }

    fn content(&mut self) -> Result<String> {
        self.tab.get_content().context("read page source")
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(false) {
            warn!("Closing browser tab: {:#}", e);
        }
        debug!("Browser session closed");
    }
}
