use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Symbols and/or direct history URLs, scraped in this order.
    pub tickers: Vec<String>,
    /// Display names for the summary sheet.
    pub ticker_names: BTreeMap<String, String>,
    pub output_file: String,
    pub lookback_years: u32,
    pub scraper: ScraperConfig,
    pub loader: LoaderConfig,
    pub pipeline: PipelineConfig,
}

/// Browser and page configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// `{ticker}`, `{start}` and `{end}` are substituted.
    pub history_url_template: String,
    /// `{ticker}` is substituted.
    pub statistics_url_template: String,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub user_agent: Option<String>,
    pub page_load_timeout_secs: u64,
    pub table_wait_secs: u64,
    pub consent_wait_secs: u64,
    pub stats_wait_secs: u64,
    pub settle_ms: u64,
    /// Page source is written here when a ticker yields no rows.
    pub dump_html_dir: Option<PathBuf>,
}

/// Lazy-load driver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub stable_threshold: u32,
    pub max_iterations: u32,
    pub pause_ms: u64,
}

/// Run coordinator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of independent browser sessions. 1 = sequential.
    pub concurrency: usize,
    pub fetch_ratio: bool,
    pub deadline_secs: Option<u64>,
    pub request_delay_ms: u64,
    pub jitter_ms: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

const DEFAULT_HISTORY_URL: &str = "https://sg.finance.yahoo.com/quote/{ticker}/history?period1={start}&period2={end}&interval=1d&frequency=1d&includeAdjustedClose=true";
const DEFAULT_STATISTICS_URL: &str = "https://sg.finance.yahoo.com/quote/{ticker}/key-statistics";

fn default_tickers() -> Vec<String> {
    ["D05.SI", "O39.SI", "U11.SI"].iter().map(|s| s.to_string()).collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tickers: default_tickers(),
            ticker_names: BTreeMap::new(),
            output_file: "sgx_stocks_5Y_history".to_string(),
            lookback_years: 5,
            scraper: ScraperConfig::default(),
            loader: LoaderConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            history_url_template: DEFAULT_HISTORY_URL.to_string(),
            statistics_url_template: DEFAULT_STATISTICS_URL.to_string(),
            headless: true,
            window_width: 1400,
            window_height: 1000,
            user_agent: None,
            page_load_timeout_secs: 60,
            table_wait_secs: 20,
            consent_wait_secs: 10,
            stats_wait_secs: 15,
            settle_ms: 2000,
            dump_html_dir: None,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            stable_threshold: 3,
            max_iterations: 50,
            pause_ms: 1500,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            fetch_ratio: true,
            deadline_secs: None,
            request_delay_ms: 2000,
            jitter_ms: 500,
        }
    }
}

impl ScraperConfig {
    pub fn table_wait(&self) -> Duration {
        Duration::from_secs(self.table_wait_secs)
    }
    pub fn consent_wait(&self) -> Duration {
        Duration::from_secs(self.consent_wait_secs)
    }
    pub fn stats_wait(&self) -> Duration {
        Duration::from_secs(self.stats_wait_secs)
    }
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl LoaderConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Defaults, then `config.json`, then `extra` (if given), then `SGX__*` env.
    pub fn load(extra: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("config")
                    .required(false)
                    .format(config::FileFormat::Json),
            );

        if let Some(path) = extra {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let cfg = builder
            .add_source(config::Environment::with_prefix("SGX").separator("__"))
            .build()
            .context("Failed to read configuration sources")?;

        let app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;
        app_cfg.validate()?;
        Ok(app_cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.loader.stable_threshold == 0 {
            anyhow::bail!("loader.stable_threshold must be at least 1");
        }
        if self.loader.max_iterations == 0 {
            anyhow::bail!("loader.max_iterations must be at least 1");
        }
        if self.loader.max_iterations < self.loader.stable_threshold {
            anyhow::bail!(
                "loader.max_iterations ({}) is below loader.stable_threshold ({}); loading could never settle",
                self.loader.max_iterations,
                self.loader.stable_threshold
            );
        }
        if self.pipeline.concurrency == 0 {
            anyhow::bail!("pipeline.concurrency must be at least 1");
        }
        if self.lookback_years == 0 {
            anyhow::bail!("lookback_years must be at least 1");
        }
        if !self.scraper.history_url_template.contains("{ticker}") {
            anyhow::bail!("scraper.history_url_template has no {{ticker}} placeholder");
        }
        Ok(())
    }

    /// Company name for the summary; config sources may fold key case.
    pub fn display_name<'a>(&'a self, ticker: &'a str) -> &'a str {
        self.ticker_names
            .get(ticker)
            .or_else(|| {
                self.ticker_names
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(ticker))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
            .unwrap_or(ticker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{
            "tickers": ["C38U.SI", "Z74.SI"],
            "ticker_names": {"Z74.SI": "Singtel"},
            "lookback_years": 3,
            "loader": {"stable_threshold": 2}
        }"#;
        let cfg = config::Config::builder()
            .add_source(config::File::from_str(json, config::FileFormat::Json))
            .build()
            .unwrap()
            .try_deserialize::<AppConfig>()
            .unwrap();

        assert_eq!(cfg.tickers, vec!["C38U.SI", "Z74.SI"]);
        assert_eq!(cfg.lookback_years, 3);
        assert_eq!(cfg.loader.stable_threshold, 2);
        assert_eq!(cfg.loader.max_iterations, 50);
        assert_eq!(cfg.pipeline.concurrency, 1);
        assert_eq!(cfg.display_name("Z74.SI"), "Singtel");
        assert_eq!(cfg.display_name("C38U.SI"), "C38U.SI");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut cfg = AppConfig::default();
        cfg.loader.stable_threshold = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_cap_below_threshold() {
        let mut cfg = AppConfig::default();
        cfg.loader.stable_threshold = 3;
        cfg.loader.max_iterations = 2;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_iterations"));

        cfg.loader.max_iterations = 3;
        assert!(cfg.validate().is_ok());
    }
}
