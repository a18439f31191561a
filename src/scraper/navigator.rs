//! Resolves inputs to page addresses and loads them into a session.

use crate::browser::{BrowserSession, Pause};
use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Consent buttons seen on the quote pages, tried as one XPath union.
const CONSENT_XPATH: &str = "//button[.//span[contains(., 'Accept all')]] \
    | //button[contains(., 'Accept')] \
    | //button[.//span[contains(., 'I agree')]] \
    | //button[contains(., 'I agree')] \
    | //button[contains(., 'Agree')] \
    | //button[@name='agree']";

/// Primary data region of the history page.
const HISTORY_READY: &str = "table";

const CONSENT_SETTLE: Duration = Duration::from_secs(1);

// ── Targets ───────────────────────────────────────────────────────────────────

/// One requested input, resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Symbol(String),
    /// Direct URL; `symbol` is the `/quote/<symbol>/` segment when present.
    Url {
        url: String,
        name: String,
        symbol: Option<String>,
    },
}

impl Target {
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if !input.starts_with("http://") && !input.starts_with("https://") {
            return Target::Symbol(input.to_uppercase());
        }

        let symbol = symbol_from_url(input);
        let name = symbol
            .clone()
            .unwrap_or_else(|| format!("custom_url_{}", Utc::now().timestamp()));
        if symbol.is_none() {
            warn!("Could not derive a ticker from {}; using {}", input, name);
        }
        Target::Url {
            url: input.to_string(),
            name,
            symbol,
        }
    }

    /// Name used for reporting and sheet naming.
    pub fn name(&self) -> &str {
        match self {
            Target::Symbol(s) => s,
            Target::Url { name, .. } => name,
        }
    }

    /// Symbol for the statistics page, if one is known.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Target::Symbol(s) => Some(s),
            Target::Url { symbol, .. } => symbol.as_deref(),
        }
    }

    pub fn history_url(&self, template: &str, lookback_years: u32, now: DateTime<Utc>) -> String {
        match self {
            Target::Symbol(s) => history_url(template, s, lookback_years, now),
            Target::Url { url, .. } => url.clone(),
        }
    }
}

fn symbol_from_url(input: &str) -> Option<String> {
    let url = Url::parse(input).ok()?;
    let mut segments = url.path_segments()?;
    segments.find(|s| *s == "quote")?;
    segments
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_uppercase())
}

/// Fill the history template for the window `[now - years, now]`.
pub fn history_url(template: &str, symbol: &str, lookback_years: u32, now: DateTime<Utc>) -> String {
    let start = now - chrono::Duration::days(365 * i64::from(lookback_years));
    template
        .replace("{ticker}", symbol)
        .replace("{start}", &start.timestamp().to_string())
        .replace("{end}", &now.timestamp().to_string())
}

pub fn statistics_url(template: &str, symbol: &str) -> String {
    template.replace("{ticker}", symbol)
}

// ── Navigator ─────────────────────────────────────────────────────────────────

/// Page loading for one session. Consent is handled on the session's first
/// load only.
pub struct Navigator {
    table_wait: Duration,
    consent_wait: Duration,
    settle: Duration,
    consent_handled: bool,
}

impl Navigator {
    pub fn new(config: &ScraperConfig) -> Self {
        Self {
            table_wait: config.table_wait(),
            consent_wait: config.consent_wait(),
            settle: config.settle(),
            consent_handled: false,
        }
    }

    /// Load the history page and wait for its table.
    pub fn open_history<S, P>(&mut self, session: &mut S, pause: &P, url: &str) -> Result<(), ScrapeError>
    where
        S: BrowserSession + ?Sized,
        P: Pause + ?Sized,
    {
        self.open(session, pause, url, HISTORY_READY, self.table_wait)
    }

    /// Load `url` and wait up to `wait` for `ready` to appear.
    pub fn open<S, P>(
        &mut self,
        session: &mut S,
        pause: &P,
        url: &str,
        ready: &str,
        wait: Duration,
    ) -> Result<(), ScrapeError>
    where
        S: BrowserSession + ?Sized,
        P: Pause + ?Sized,
    {
        info!("Navigating to: {}", url);
        session
            .navigate(url)
            .map_err(|e| ScrapeError::navigation(url, format!("{:#}", e)))?;

        if !self.consent_handled {
            self.consent_handled = true;
            if let Err(e) = self.dismiss_consent(session, pause) {
                warn!("{}; reloading without consent handling", e);
                session
                    .navigate(url)
                    .map_err(|e| ScrapeError::navigation(url, format!("{:#}", e)))?;
            }
        }

        let present = session
            .wait_for(ready, wait)
            .map_err(|e| ScrapeError::navigation(url, format!("{:#}", e)))?;
        if !present {
            return Err(ScrapeError::navigation(
                url,
                format!("{} not present after {:?}", ready, wait),
            ));
        }

        pause.pause(self.settle);
        Ok(())
    }

    /// Absent overlay is not an error.
    fn dismiss_consent<S, P>(&self, session: &mut S, pause: &P) -> Result<(), ScrapeError>
    where
        S: BrowserSession + ?Sized,
        P: Pause + ?Sized,
    {
        match session.click(CONSENT_XPATH, self.consent_wait) {
            Ok(true) => {
                info!("Accepted cookies/consent banner");
                pause.pause(CONSENT_SETTLE);
                Ok(())
            }
            Ok(false) => {
                debug!("No consent banner found");
                Ok(())
            }
            Err(e) => Err(ScrapeError::ConsentDismiss(format!("{:#}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{Consent, FakePage, FakeSession, FakeSite, NoPause};
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 3, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_symbol_resolves_to_history_template() {
        let t = Target::parse("d05.si");
        assert_eq!(t, Target::Symbol("D05.SI".into()));
        let url = t.history_url(
            "https://x.test/quote/{ticker}/history?period1={start}&period2={end}",
            5,
            fixed_now(),
        );
        let end = fixed_now().timestamp();
        let start = end - 5 * 365 * 86_400;
        assert_eq!(
            url,
            format!("https://x.test/quote/D05.SI/history?period1={}&period2={}", start, end)
        );
    }

    #[test]
    fn test_url_input_keeps_url_and_derives_symbol() {
        let input = "https://sg.finance.yahoo.com/quote/O39.SI/history/?period1=1599127119&period2=1756881590";
        let t = Target::parse(input);
        assert_eq!(t.name(), "O39.SI");
        assert_eq!(t.symbol(), Some("O39.SI"));
        assert_eq!(t.history_url("unused {ticker}", 5, fixed_now()), input);
    }

    #[test]
    fn test_url_without_quote_segment_gets_generated_name() {
        let t = Target::parse("https://example.test/some/page");
        assert!(t.name().starts_with("custom_url_"));
        assert_eq!(t.symbol(), None);
    }

    #[test]
    fn test_consent_xpath_covers_button_labels() {
        for label in ["'Accept'", "'Accept all'", "'I agree'", "'Agree'"] {
            assert!(
                CONSENT_XPATH.contains(&format!("//button[contains(., {})]", label))
                    || CONSENT_XPATH.contains(&format!("//button[.//span[contains(., {})]]", label)),
                "no button clause for {}",
                label
            );
        }
        assert!(CONSENT_XPATH.contains("//button[contains(., 'Accept')]"));
        assert!(CONSENT_XPATH.contains("//button[contains(., 'I agree')]"));
    }

    #[test]
    fn test_statistics_url() {
        assert_eq!(
            statistics_url("https://x.test/quote/{ticker}/key-statistics", "U11.SI"),
            "https://x.test/quote/U11.SI/key-statistics"
        );
    }

    fn history_site(consent: Consent) -> FakeSite {
        FakeSite::new().page(
            "/quote/A/history",
            FakePage::history("<table></table>".into(), vec![0]).with_consent(consent),
        )
    }

    #[test]
    fn test_consent_dismissed_once_per_session() {
        let mut s = FakeSession::new(history_site(Consent::Dismissable));
        let pause = NoPause::default();
        let mut nav = Navigator::new(&ScraperConfig::default());

        nav.open_history(&mut s, &pause, "https://x.test/quote/A/history").unwrap();
        assert!(nav.consent_handled);
        nav.open_history(&mut s, &pause, "https://x.test/quote/A/history").unwrap();
        assert_eq!(s.visited.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_stuck_consent_reloads_without_consent_step() {
        let mut s = FakeSession::new(history_site(Consent::Stuck));
        let mut nav = Navigator::new(&ScraperConfig::default());

        nav.open_history(&mut s, &NoPause::default(), "https://x.test/quote/A/history")
            .unwrap();
        // first load, then the retry
        assert_eq!(s.visited.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_table_is_navigation_error() {
        let mut s = FakeSession::new(FakeSite::new());
        let mut nav = Navigator::new(&ScraperConfig::default());
        let err = nav
            .open_history(&mut s, &NoPause::default(), "https://x.test/quote/B/history")
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Navigation { .. }));
    }
}
