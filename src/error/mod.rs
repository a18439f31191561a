//! Failure taxonomy of a single ticker's scrape.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Page unreachable or not the expected page type. Fatal for the ticker.
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// Overlay found but could not be dismissed. Recoverable by reloading
    /// without the consent step.
    #[error("consent overlay could not be dismissed: {0}")]
    ConsentDismiss(String),

    /// Iteration cap hit before the row count settled. Rows loaded so far
    /// are still extracted.
    #[error("lazy loading incomplete: {rows} rows after {iterations} iterations")]
    LoadIncomplete { rows: usize, iterations: usize },

    /// Zero valid trading-day rows. Fatal for the ticker.
    #[error("no data found: {0}")]
    NoDataFound(String),

    /// Row failed coercion or validation. Skipped and counted, never fatal.
    #[error("malformed row {index}: {reason}")]
    MalformedRow { index: usize, reason: String },

    /// Statistics page could not be loaded. Fatal for the ratio only.
    #[error("statistics page unavailable for {ticker}: {reason}")]
    RatioPageUnavailable { ticker: String, reason: String },

    /// Run deadline passed before this ticker was started.
    #[error("run deadline exceeded before processing started")]
    DeadlineExceeded,

    /// Raw browser session fault.
    #[error("browser session error: {0}")]
    Browser(String),
}

impl ScrapeError {
    pub fn navigation(url: &str, reason: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn browser(err: anyhow::Error) -> Self {
        Self::Browser(format!("{:#}", err))
    }

    /// Whether the ticker can still be reported with data after this error.
    pub fn is_fatal_for_ticker(&self) -> bool {
        !matches!(
            self,
            Self::LoadIncomplete { .. } | Self::MalformedRow { .. } | Self::RatioPageUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(ScrapeError::navigation("http://x", "timeout").is_fatal_for_ticker());
        assert!(ScrapeError::NoDataFound("empty".into()).is_fatal_for_ticker());
        assert!(!ScrapeError::LoadIncomplete { rows: 5, iterations: 50 }.is_fatal_for_ticker());
        assert!(
            !ScrapeError::RatioPageUnavailable {
                ticker: "D05.SI".into(),
                reason: "timeout".into()
            }
            .is_fatal_for_ticker()
        );
    }

    #[test]
    fn test_messages_carry_context() {
        let e = ScrapeError::navigation("https://example.test/q", "table not present after 20s");
        assert_eq!(
            e.to_string(),
            "navigation to https://example.test/q failed: table not present after 20s"
        );
    }
}
