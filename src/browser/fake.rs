//! Scripted in-memory session and HTML fixtures for tests.

use super::{BrowserSession, Pause, SessionFactory};
use anyhow::{Result, bail};
use chrono::{Duration as Days, NaiveDate};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Consent {
    Absent,
    Dismissable,
    Stuck,
}

#[derive(Debug, Clone)]
pub struct FakePage {
    pub html: String,
    /// Row count after 0, 1, 2... scrolls; the last value repeats.
    pub row_counts: Vec<usize>,
    pub selectors: Vec<String>,
    pub consent: Consent,
}

impl FakePage {
    pub fn history(html: String, row_counts: Vec<usize>) -> Self {
        Self {
            html,
            row_counts,
            selectors: vec!["table".to_string()],
            consent: Consent::Absent,
        }
    }

    pub fn statistics(html: String) -> Self {
        Self {
            html,
            row_counts: vec![0],
            selectors: vec![
                "table".to_string(),
                r#"section[data-test="qsp-statistics"]"#.to_string(),
            ],
            consent: Consent::Absent,
        }
    }

    pub fn with_consent(mut self, consent: Consent) -> Self {
        self.consent = consent;
        self
    }
}

/// Pages keyed by a URL fragment; first match wins.
#[derive(Debug, Default)]
pub struct FakeSite {
    pages: Vec<(String, FakePage)>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, fragment: &str, page: FakePage) -> Self {
        self.pages.push((fragment.to_string(), page));
        self
    }

    fn lookup(&self, url: &str) -> Option<FakePage> {
        self.pages
            .iter()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
            .map(|(_, page)| page.clone())
    }
}

pub struct FakeSession {
    site: Arc<FakeSite>,
    current: Option<FakePage>,
    scrolls: usize,
    consent_dismissed: bool,
    pub visited: Arc<Mutex<Vec<String>>>,
}

impl FakeSession {
    pub fn new(site: FakeSite) -> Self {
        Self::shared(Arc::new(site), Arc::default())
    }

    fn shared(site: Arc<FakeSite>, visited: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            site,
            current: None,
            scrolls: 0,
            consent_dismissed: false,
            visited,
        }
    }

    pub fn scrolls(&self) -> usize {
        self.scrolls
    }
}

impl BrowserSession for FakeSession {
    fn navigate(&mut self, url: &str) -> Result<()> {
        if let Ok(mut visited) = self.visited.lock() {
            visited.push(url.to_string());
        }
        self.current = self.site.lookup(url);
        self.scrolls = 0;
        self.consent_dismissed = false;
        Ok(())
    }

    fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<bool> {
        Ok(self
            .current
            .as_ref()
            .is_some_and(|p| p.selectors.iter().any(|s| s == selector)))
    }

    fn click(&mut self, _xpath: &str, _timeout: Duration) -> Result<bool> {
        match self.current.as_ref().map(|p| p.consent) {
            Some(Consent::Dismissable) if !self.consent_dismissed => {
                self.consent_dismissed = true;
                Ok(true)
            }
            Some(Consent::Stuck) => bail!("element is not clickable"),
            _ => Ok(false),
        }
    }

    fn scroll_to_bottom(&mut self) -> Result<()> {
        self.scrolls += 1;
        Ok(())
    }

    fn count_rows(&mut self, _min_cells: usize) -> Result<usize> {
        let Some(page) = &self.current else {
            return Ok(0);
        };
        let idx = self.scrolls.min(page.row_counts.len().saturating_sub(1));
        Ok(page.row_counts.get(idx).copied().unwrap_or(0))
    }

    fn content(&mut self) -> Result<String> {
        Ok(self
            .current
            .as_ref()
            .map(|p| p.html.clone())
            .unwrap_or_default())
    }
}

pub struct FakeFactory {
    site: Arc<FakeSite>,
    pub opened: Arc<AtomicUsize>,
    pub visited: Arc<Mutex<Vec<String>>>,
}

impl FakeFactory {
    pub fn new(site: FakeSite) -> Self {
        Self {
            site: Arc::new(site),
            opened: Arc::default(),
            visited: Arc::default(),
        }
    }
}

impl SessionFactory for FakeFactory {
    type Session = FakeSession;

    fn open(&self) -> Result<FakeSession> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession::shared(
            Arc::clone(&self.site),
            Arc::clone(&self.visited),
        ))
    }
}

/// Returns immediately; counts calls.
#[derive(Debug, Default)]
pub struct NoPause {
    pub calls: AtomicUsize,
}

impl Pause for NoPause {
    fn pause(&self, _duration: Duration) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Fixtures ──────────────────────────────────────────────────────────────────

const HISTORY_HEAD: &str = r#"<thead><tr><th>Date</th><th>Open</th><th>High</th><th>Low</th><th>Close<span>*</span></th><th>Adj. close<span>**</span></th><th>Volume</th></tr></thead>"#;

/// Most-recent-first table of `n` trading rows ending at `last`, with an
/// optional dividend annotation row inserted before row `dividend_at`.
pub fn history_html(n: usize, last: NaiveDate, dividend_at: Option<usize>) -> String {
    let mut body = String::new();
    for i in 0..n {
        if dividend_at == Some(i) {
            body.push_str(&format!(
                r#"<tr><td>{}</td><td colspan="6">0.54 Dividend</td></tr>"#,
                (last - Days::days(i as i64)).format("%d %b %Y")
            ));
        }
        let date = last - Days::days(i as i64);
        let open = 30.0 + (i % 11) as f64 * 0.1;
        body.push_str(&format!(
            "<tr><td>{}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{}</td></tr>",
            date.format("%d %b %Y"),
            open,
            open + 0.5,
            open - 0.5,
            open + 0.2,
            open + 0.1,
            "1,234,567",
        ));
    }
    format!(
        r#"<html><body><div id="main-content-wrapper"><table data-test="historical-prices">{}<tbody>{}</tbody></table></div></body></html>"#,
        HISTORY_HEAD, body
    )
}

pub fn statistics_html(label: &str, value: &str) -> String {
    format!(
        r#"<html><body><section data-test="qsp-statistics">
        <h3>Valuation measures</h3>
        <table><tbody>
          <tr><td>Market cap (intra-day)</td><td>112.35B</td></tr>
          <tr><td>Trailing P/E</td><td>10.52</td></tr>
          <tr><td>{}</td><td>{}</td></tr>
        </tbody></table></section></body></html>"#,
        label, value
    )
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("fixture date")
}
