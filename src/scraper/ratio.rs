//! Best-effort EV/EBITDA lookup on the key-statistics page.
//!
//! The statistics page omits the metric for a good share of tickers, and the
//! label wording differs between locales. A missing label is reported as
//! `Ok(None)`; only an unloadable page is an error.

use crate::browser::{BrowserSession, Pause};
use crate::error::ScrapeError;
use crate::scraper::navigator::{Navigator, statistics_url};
use crate::scraper::parsers::normalise_ws;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Label variants for EV/EBITDA, compared after [`normalise_label`].
pub const EV_EBITDA_LABELS: [&str; 6] = [
    "Enterprise value/EBITDA",
    "EV/EBITDA",
    "Enterprise value to EBITDA",
    "EV to EBITDA",
    "Enterprise value / EBITDA",
    "Valeur d'entreprise/EBITDA",
];

/// Sanity bound on a plausible ratio.
const MAX_RATIO: f64 = 1000.0;

const STATS_READY: &str = "table";

// ── Label matching ────────────────────────────────────────────────────────────

/// Lower-cased, parenthesised qualifiers and footnote digits dropped, only
/// letters, digits and '/' kept. "Enterprise value/EBITDA 6" and
/// "enterprise value / ebitda (ttm)" both become "enterprisevalue/ebitda".
pub fn normalise_label(label: &str) -> String {
    let mut out = String::new();
    let mut depth = 0usize;
    for c in label.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            c if c.is_alphanumeric() || c == '/' => out.extend(c.to_lowercase()),
            _ => {}
        }
    }
    out.trim_end_matches(|c: char| c.is_ascii_digit()).to_string()
}

#[derive(Debug, Clone)]
pub struct LabelMatcher {
    synonyms: Vec<String>,
}

impl LabelMatcher {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            synonyms: labels
                .into_iter()
                .map(|l| normalise_label(l.as_ref()))
                .filter(|l| !l.is_empty())
                .collect(),
        }
    }

    pub fn ev_ebitda() -> Self {
        Self::new(EV_EBITDA_LABELS)
    }

    pub fn matches(&self, label: &str) -> bool {
        let label = normalise_label(label);
        !label.is_empty() && self.synonyms.iter().any(|s| *s == label)
    }
}

/// "6.52" → 6.52 | "12.3 (ttm)" → 12.3 | "N/A" → None.
/// Only finite values in (0, 1000) are accepted: a ratio of 1000 or more
/// comes from a near-zero EBITDA and is reported as absent, as are
/// negative values.
pub fn parse_ratio(text: &str) -> Option<f64> {
    let text = text.split('(').next().unwrap_or_default().trim().replace(',', "");
    if matches!(text.as_str(), "" | "-" | "--" | "N/A" | "NA" | "n/a") {
        return None;
    }
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0 && *v < MAX_RATIO)
}

/// Scan a statistics document for the first matching label/value pair.
pub fn find_ratio(html: &str, matcher: &LabelMatcher) -> Option<f64> {
    let doc = Html::parse_document(html);

    // Label in the first cell, current value in the second
    if let (Ok(tr_sel), Ok(cell_sel)) = (Selector::parse("tr"), Selector::parse("td, th")) {
        for tr in doc.select(&tr_sel) {
            let cells: Vec<ElementRef> = tr.select(&cell_sel).collect();
            if cells.len() < 2 {
                continue;
            }
            let label = normalise_ws(&cells[0].text().collect::<String>());
            if !matcher.matches(&label) {
                continue;
            }
            let value = normalise_ws(&cells[1].text().collect::<String>());
            debug!("Matched label {:?} with value {:?}", label, value);
            // A matched label with a placeholder value is a definite "absent"
            return parse_ratio(&value);
        }
    }

    // Card layouts: label element followed by a value sibling
    let Ok(any_sel) = Selector::parse("body *") else {
        return None;
    };
    for el in doc.select(&any_sel) {
        let own: String = el
            .children()
            .filter_map(|n| n.value().as_text())
            .map(|t| &**t)
            .collect();
        if !matcher.matches(&normalise_ws(&own)) {
            continue;
        }
        let value = el
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .take(5)
            .map(|sib| normalise_ws(&sib.text().collect::<String>()))
            .find_map(|text| parse_ratio(&text));
        if value.is_some() {
            return value;
        }
    }

    None
}

// ── Extractor ─────────────────────────────────────────────────────────────────

pub struct RatioExtractor {
    matcher: LabelMatcher,
    url_template: String,
    wait: Duration,
}

impl RatioExtractor {
    pub fn new(matcher: LabelMatcher, url_template: &str, wait: Duration) -> Self {
        Self {
            matcher,
            url_template: url_template.to_string(),
            wait,
        }
    }

    /// `Ok(None)` when the page loads but carries no usable value.
    pub fn fetch<S, P>(
        &self,
        navigator: &mut Navigator,
        session: &mut S,
        pause: &P,
        symbol: &str,
    ) -> Result<Option<f64>, ScrapeError>
    where
        S: BrowserSession + ?Sized,
        P: Pause + ?Sized,
    {
        let url = statistics_url(&self.url_template, symbol);
        info!("Fetching EV/EBITDA for {} from: {}", symbol, url);

        let unavailable = |reason: String| ScrapeError::RatioPageUnavailable {
            ticker: symbol.to_string(),
            reason,
        };

        navigator
            .open(session, pause, &url, STATS_READY, self.wait)
            .map_err(|e| unavailable(e.to_string()))?;
        let html = session
            .content()
            .map_err(|e| unavailable(format!("{:#}", e)))?;

        let value = find_ratio(&html, &self.matcher);
        match value {
            Some(v) => info!("EV/EBITDA for {}: {}", symbol, v),
            None => warn!("EV/EBITDA not found for {} - metric may not be available", symbol),
        }
        Ok(value)
    }
}
