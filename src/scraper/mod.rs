pub mod cleaner;
pub mod lazy_load;
pub mod navigator;
pub mod parsers;
pub mod ratio;

use crate::browser::{BrowserSession, Pause};
use crate::config::{AppConfig, ScraperConfig};
use crate::error::ScrapeError;
use crate::utils::sheet_name;
use chrono::Utc;
use std::path::Path;
use tracing::{debug, info, warn};

use self::lazy_load::{LazyLoader, LoadOutcome};
use self::navigator::{Navigator, Target};
use self::parsers::{Extraction, parse_history_page};
use self::ratio::{LabelMatcher, RatioExtractor};

// ── Per-session scraper ───────────────────────────────────────────────────────

/// Components bound to one browser session. Recreate (or `reset_session`)
/// whenever the underlying session is replaced.
pub struct SessionScraper {
    navigator: Navigator,
    loader: LazyLoader,
    ratio: RatioExtractor,
    config: ScraperConfig,
    lookback_years: u32,
}

impl SessionScraper {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            navigator: Navigator::new(&config.scraper),
            loader: LazyLoader::new(&config.loader),
            ratio: RatioExtractor::new(
                LabelMatcher::ev_ebitda(),
                &config.scraper.statistics_url_template,
                config.scraper.stats_wait(),
            ),
            config: config.scraper.clone(),
            lookback_years: config.lookback_years,
        }
    }

    /// Fresh session: consent has to be handled again.
    pub fn reset_session(&mut self) {
        self.navigator = Navigator::new(&self.config);
    }

    /// Resolve the target and load its history page.
    pub fn open_history<S, P>(&mut self, session: &mut S, pause: &P, target: &Target) -> Result<(), ScrapeError>
    where
        S: BrowserSession + ?Sized,
        P: Pause + ?Sized,
    {
        let url = target.history_url(&self.config.history_url_template, self.lookback_years, Utc::now());
        info!("Processing '{}' ({} years)", target.name(), self.lookback_years);
        self.navigator.open_history(session, pause, &url)
    }

    pub fn load_rows<S, P>(&self, session: &mut S, pause: &P) -> LoadOutcome
    where
        S: BrowserSession + ?Sized,
        P: Pause + ?Sized,
    {
        self.loader.load_all(session, pause)
    }

    /// Parse the current document. On `NoDataFound` the page source is
    /// saved to `dump_html_dir`, if configured.
    pub fn extract<S>(&self, session: &mut S, target: &Target) -> Result<Extraction, ScrapeError>
    where
        S: BrowserSession + ?Sized,
    {
        let html = session.content().map_err(ScrapeError::browser)?;
        debug!("{}: page source is {} bytes", target.name(), html.len());

        let result = parse_history_page(&html);
        if let (Err(ScrapeError::NoDataFound(_)), Some(dir)) = (&result, &self.config.dump_html_dir) {
            dump_html(dir, target.name(), &html);
        }
        result
    }

    pub fn fetch_ratio<S, P>(&mut self, session: &mut S, pause: &P, symbol: &str) -> Result<Option<f64>, ScrapeError>
    where
        S: BrowserSession + ?Sized,
        P: Pause + ?Sized,
    {
        self.ratio.fetch(&mut self.navigator, session, pause, symbol)
    }
}

fn dump_html(dir: &Path, name: &str, html: &str) {
    let path = dir.join(format!("{}.html", sheet_name(name, "_page")));
    let written = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, html));
    match written {
        Ok(()) => info!("Saved page source to {:?}", path),
        Err(e) => warn!("Failed to save page source to {:?}: {}", path, e),
    }
}
