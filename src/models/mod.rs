use crate::utils::round_dp;
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Daily record ──────────────────────────────────────────────────────────────

/// One trading day for one ticker. `date` never carries a time component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adjusted_close: f64,
    pub volume: u64,
    /// close - open, rounded to 4 dp
    pub daily_return: f64,
}

impl DailyRecord {
    /// `low <= open, close <= high` and every price strictly positive.
    pub fn is_consistent(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close, self.adjusted_close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return false;
        }
        self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
    }
}

// ── Ticker outcome ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TickerStatus {
    Succeeded,
    Partial,
    Failed,
}

impl fmt::Display for TickerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TickerStatus::Succeeded => "succeeded",
            TickerStatus::Partial => "partial",
            TickerStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Scrape outcome for one requested input.
///
/// Created empty when processing starts, filled by the extractors, and
/// finalised exactly once. `error_detail` is `Some` iff `status` is not
/// `Succeeded`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickerResult {
    /// Symbol, or the name derived from a direct URL input.
    pub ticker: String,
    /// The input exactly as requested.
    pub source: String,
    pub records: Vec<DailyRecord>,
    pub ev_ebitda: Option<f64>,
    pub status: TickerStatus,
    pub error_detail: Option<String>,
    /// Annotation or malformed rows skipped by the table extractor.
    pub skipped_rows: usize,
}

impl TickerResult {
    pub fn pending(ticker: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            source: source.into(),
            records: Vec::new(),
            ev_ebitda: None,
            status: TickerStatus::Failed,
            error_detail: Some("not processed".to_string()),
            skipped_rows: 0,
        }
    }

    pub fn succeed(&mut self) {
        self.status = TickerStatus::Succeeded;
        self.error_detail = None;
    }

    pub fn partial(&mut self, detail: impl Into<String>) {
        self.status = TickerStatus::Partial;
        self.error_detail = Some(detail.into());
    }

    pub fn fail(&mut self, detail: impl Into<String>) {
        self.status = TickerStatus::Failed;
        self.error_detail = Some(detail.into());
    }

    pub fn has_data(&self) -> bool {
        !self.records.is_empty()
    }
}

// ── Run result ────────────────────────────────────────────────────────────────

/// All ticker outcomes of one run, in request order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub tickers: Vec<TickerResult>,
}

impl RunResult {
    pub fn count(&self, status: TickerStatus) -> usize {
        self.tickers.iter().filter(|t| t.status == status).count()
    }

    pub fn total_records(&self) -> usize {
        self.tickers.iter().map(|t| t.records.len()).sum()
    }

    pub fn any_data(&self) -> bool {
        self.tickers.iter().any(TickerResult::has_data)
    }

    pub fn failed_inputs(&self) -> Vec<&str> {
        self.tickers
            .iter()
            .filter(|t| t.status == TickerStatus::Failed)
            .map(|t| t.source.as_str())
            .collect()
    }
}

// ── Per-ticker state machine ──────────────────────────────────────────────────

/// pending → navigating → loading → extracting → (ratio) → done.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Navigating,
    Loading,
    Extracting,
    RatioExtracting,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Pending => "pending",
            Phase::Navigating => "navigating",
            Phase::Loading => "loading",
            Phase::Extracting => "extracting",
            Phase::RatioExtracting => "ratio_extracting",
            Phase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Event handed to the logging collaborator on every phase transition.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressEvent {
    pub ticker: String,
    pub phase: Phase,
    pub status: Option<TickerStatus>,
    pub error: Option<String>,
}

// ── Raw rows ──────────────────────────────────────────────────────────────────

/// Historical table row as cell text, before coercion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawHistoricalRow {
    pub date: Option<String>,
    pub open: Option<String>,
    pub high: Option<String>,
    pub low: Option<String>,
    pub close: Option<String>,
    pub adj_close: Option<String>,
    pub volume: Option<String>,
}

// ── Summary ───────────────────────────────────────────────────────────────────

/// Per-ticker figures for the summary sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickerSummary {
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub latest_close: Option<f64>,
    pub max_close: Option<f64>,
    pub min_close: Option<f64>,
    pub avg_volume: Option<u64>,
    pub one_year_return_pct: Option<f64>,
}

impl TickerSummary {
    /// Records must already be in ascending date order.
    pub fn from_records(records: &[DailyRecord]) -> Self {
        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            return Self::default();
        };

        let closes = records.iter().map(|r| r.close);
        let max_close = closes.clone().fold(f64::MIN, f64::max);
        let min_close = closes.fold(f64::MAX, f64::min);
        let total_volume: u128 = records.iter().map(|r| r.volume as u128).sum();
        let avg_volume = (total_volume / records.len() as u128) as u64;

        let one_year_return_pct = last
            .date
            .checked_sub_months(Months::new(12))
            .filter(|cutoff| first.date <= *cutoff)
            .and_then(|cutoff| records.iter().rev().find(|r| r.date <= cutoff))
            .map(|base| (last.adjusted_close / base.adjusted_close - 1.0) * 100.0)
            .map(|pct| round_dp(pct, 2));

        Self {
            first_date: Some(first.date),
            last_date: Some(last.date),
            latest_close: Some(last.close),
            max_close: Some(max_close),
            min_close: Some(min_close),
            avg_volume: Some(avg_volume),
            one_year_return_pct,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
