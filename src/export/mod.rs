//! Writes a finished run to disk.
//!
//! The primary artifact is a workbook next to the run directory:
//!
//! ```text
//! <output_file>_<YYYYmmdd_HHMMSS>.xlsx
//!   Summary               one row per requested input, request order
//!   <TICKER>              one sheet per input, dated rows and a close chart
//! ```
//!
//! The run directory holds the same data as plain files:
//!
//! ```text
//! <output_file>_<YYYYmmdd_HHMMSS>/
//!   summary.csv           one row per requested input, request order
//!   <TICKER>_history.csv  one per input; header only when it failed
//!   run.json              the RunResult as-is
//! ```

use crate::config::AppConfig;
use crate::models::{DailyRecord, RunResult, TickerResult, TickerSummary};
use crate::utils::sheet_name;
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local, NaiveDate};
use rust_xlsxwriter::{Chart, ChartType, ExcelDateTime, Format, Workbook, Worksheet};
use serde::Serialize;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const ABSENT: &str = "N/A";

const SUMMARY_SHEET: &str = "Summary";

const SUMMARY_HEADER: [&str; 13] = [
    "Ticker",
    "Company Name",
    "Status",
    "Records",
    "First Date",
    "Last Date",
    "Latest Close",
    "Max Close",
    "Min Close",
    "Avg Volume",
    "1Y Return (%)",
    "EV/EBITDA",
    "Error",
];

const HISTORY_HEADER: [&str; 8] = [
    "Date",
    "Open",
    "High",
    "Low",
    "Close",
    "Adj Close",
    "Volume",
    "Daily Return",
];

#[derive(Debug, Serialize)]
struct HistoryRow {
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Open")]
    open: f64,
    #[serde(rename = "High")]
    high: f64,
    #[serde(rename = "Low")]
    low: f64,
    #[serde(rename = "Close")]
    close: f64,
    #[serde(rename = "Adj Close")]
    adj_close: f64,
    #[serde(rename = "Volume")]
    volume: u64,
    #[serde(rename = "Daily Return")]
    daily_return: f64,
}

impl From<&DailyRecord> for HistoryRow {
    fn from(r: &DailyRecord) -> Self {
        Self {
            date: r.date,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            adj_close: r.adjusted_close,
            volume: r.volume,
            daily_return: r.daily_return,
        }
    }
}

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    #[serde(rename = "Ticker")]
    ticker: &'a str,
    #[serde(rename = "Company Name")]
    company: &'a str,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Records")]
    records: usize,
    #[serde(rename = "First Date")]
    first_date: String,
    #[serde(rename = "Last Date")]
    last_date: String,
    #[serde(rename = "Latest Close")]
    latest_close: String,
    #[serde(rename = "Max Close")]
    max_close: String,
    #[serde(rename = "Min Close")]
    min_close: String,
    #[serde(rename = "Avg Volume")]
    avg_volume: String,
    #[serde(rename = "1Y Return (%)")]
    one_year_return: String,
    #[serde(rename = "EV/EBITDA")]
    ev_ebitda: String,
    #[serde(rename = "Error")]
    error: &'a str,
}

fn or_absent<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| ABSENT.to_string())
}

impl<'a> SummaryRow<'a> {
    fn new(t: &'a TickerResult, config: &'a AppConfig) -> Self {
        let s = TickerSummary::from_records(&t.records);
        Self {
            ticker: &t.ticker,
            company: config.display_name(&t.ticker),
            status: t.status.to_string(),
            records: t.records.len(),
            first_date: or_absent(s.first_date),
            last_date: or_absent(s.last_date),
            latest_close: or_absent(s.latest_close),
            max_close: or_absent(s.max_close),
            min_close: or_absent(s.min_close),
            avg_volume: or_absent(s.avg_volume),
            one_year_return: or_absent(s.one_year_return_pct),
            ev_ebitda: or_absent(t.ev_ebitda),
            error: t.error_detail.as_deref().unwrap_or(""),
        }
    }
}

/// `<base>/<stem>_<YYYYmmdd_HHMMSS>`
pub fn run_dir(base: &Path, stem: &str, now: DateTime<Local>) -> PathBuf {
    base.join(format!("{}_{}", stem, now.format("%Y%m%d_%H%M%S")))
}

/// Write every artifact of `run` into `dir`, creating it if needed.
pub fn export_run(run: &RunResult, config: &AppConfig, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("Cannot create {:?}", dir))?;
    let mut written = Vec::new();

    let summary = dir.join("summary.csv");
    write_summary(run, config, &summary)?;
    written.push(summary);

    let mut used = HashSet::new();
    for (i, ticker) in run.tickers.iter().enumerate() {
        let mut stem = sheet_name(&ticker.ticker, "_history");
        if !used.insert(stem.clone()) {
            stem = sheet_name(&format!("{}_{}", ticker.ticker, i + 1), "_history");
            used.insert(stem.clone());
        }
        let path = dir.join(format!("{}.csv", stem));
        write_history(&ticker.records, &path)?;
        debug!("{}: {} rows -> {:?}", ticker.ticker, ticker.records.len(), path);
        written.push(path);
    }

    let json = dir.join("run.json");
    let body = serde_json::to_string_pretty(run).context("Failed to serialise run")?;
    std::fs::write(&json, body).with_context(|| format!("Cannot write {:?}", json))?;
    written.push(json);

    info!("Exported {} tickers to {:?}", run.tickers.len(), dir);
    Ok(written)
}

fn write_summary(run: &RunResult, config: &AppConfig, path: &Path) -> Result<()> {
    let mut w = csv::Writer::from_path(path).with_context(|| format!("Cannot write {:?}", path))?;
    for t in &run.tickers {
        w.serialize(SummaryRow::new(t, config))?;
    }
    w.flush()?;
    Ok(())
}

fn write_history(records: &[DailyRecord], path: &Path) -> Result<()> {
    let mut w = csv::Writer::from_path(path).with_context(|| format!("Cannot write {:?}", path))?;
    if records.is_empty() {
        // serialize() only emits headers alongside the first row
        w.write_record(HISTORY_HEADER)?;
    }
    for r in records {
        w.serialize(HistoryRow::from(r))?;
    }
    w.flush()?;
    Ok(())
}

/// `<dir>.xlsx`, kept beside the run directory of the same name.
pub fn workbook_path(dir: &Path) -> PathBuf {
    let mut name = OsString::from(dir.as_os_str());
    name.push(".xlsx");
    PathBuf::from(name)
}

/// One sheet name per ticker, unique ignoring case and never "Summary".
fn workbook_sheet_names(run: &RunResult) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::from([SUMMARY_SHEET.to_lowercase()]);
    run.tickers
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let mut name = sheet_name(&t.ticker, "");
            let mut n = i + 1;
            while !used.insert(name.to_lowercase()) {
                name = sheet_name(&t.ticker, &format!("_{}", n));
                n += 1;
            }
            name
        })
        .collect()
}

fn excel_date(date: NaiveDate) -> Result<ExcelDateTime> {
    ExcelDateTime::from_ymd(date.year() as u16, date.month() as u8, date.day() as u8)
        .with_context(|| format!("Date {} out of spreadsheet range", date))
}

fn write_header(sheet: &mut Worksheet, header: &[&str], bold: &Format) -> Result<()> {
    for (col, title) in header.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, bold)?;
    }
    sheet.set_freeze_panes(1, 0)?;
    Ok(())
}

fn write_opt_number(sheet: &mut Worksheet, row: u32, col: u16, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) => sheet.write_number(row, col, v)?,
        None => sheet.write_string(row, col, ABSENT)?,
    };
    Ok(())
}

fn write_opt_date(sheet: &mut Worksheet, row: u32, col: u16, value: Option<NaiveDate>, fmt: &Format) -> Result<()> {
    match value {
        Some(d) => sheet.write_datetime_with_format(row, col, &excel_date(d)?, fmt)?,
        None => sheet.write_string(row, col, ABSENT)?,
    };
    Ok(())
}

fn write_summary_sheet(sheet: &mut Worksheet, run: &RunResult, config: &AppConfig, bold: &Format, dates: &Format) -> Result<()> {
    sheet.set_name(SUMMARY_SHEET)?;
    write_header(sheet, &SUMMARY_HEADER, bold)?;
    for (i, t) in run.tickers.iter().enumerate() {
        let row = i as u32 + 1;
        let s = TickerSummary::from_records(&t.records);
        sheet.write_string(row, 0, t.ticker.as_str())?;
        sheet.write_string(row, 1, config.display_name(&t.ticker))?;
        sheet.write_string(row, 2, t.status.to_string())?;
        sheet.write_number(row, 3, t.records.len() as f64)?;
        write_opt_date(sheet, row, 4, s.first_date, dates)?;
        write_opt_date(sheet, row, 5, s.last_date, dates)?;
        write_opt_number(sheet, row, 6, s.latest_close)?;
        write_opt_number(sheet, row, 7, s.max_close)?;
        write_opt_number(sheet, row, 8, s.min_close)?;
        write_opt_number(sheet, row, 9, s.avg_volume.map(|v| v as f64))?;
        write_opt_number(sheet, row, 10, s.one_year_return_pct)?;
        write_opt_number(sheet, row, 11, t.ev_ebitda)?;
        sheet.write_string(row, 12, t.error_detail.as_deref().unwrap_or(""))?;
    }
    sheet.set_column_width(0, 12)?;
    sheet.set_column_width(1, 28)?;
    sheet.set_column_width(4, 12)?;
    sheet.set_column_width(5, 12)?;
    sheet.set_column_width(12, 60)?;
    Ok(())
}

fn write_history_sheet(sheet: &mut Worksheet, name: &str, records: &[DailyRecord], bold: &Format, dates: &Format) -> Result<()> {
    sheet.set_name(name)?;
    write_header(sheet, &HISTORY_HEADER, bold)?;
    for (i, r) in records.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_datetime_with_format(row, 0, &excel_date(r.date)?, dates)?;
        sheet.write_number(row, 1, r.open)?;
        sheet.write_number(row, 2, r.high)?;
        sheet.write_number(row, 3, r.low)?;
        sheet.write_number(row, 4, r.close)?;
        sheet.write_number(row, 5, r.adjusted_close)?;
        sheet.write_number(row, 6, r.volume as f64)?;
        sheet.write_number(row, 7, r.daily_return)?;
    }
    sheet.set_column_width(0, 12)?;

    if !records.is_empty() {
        let last = records.len() as u32;
        let mut chart = Chart::new(ChartType::Line);
        chart
            .add_series()
            .set_categories((name, 1, 0, last, 0))
            .set_values((name, 1, 4, last, 4))
            .set_name("Close");
        let title = format!("{} close", name);
        chart.title().set_name(title.as_str());
        sheet.insert_chart(1, HISTORY_HEADER.len() as u16 + 1, &chart)?;
    }
    Ok(())
}

/// Write `run` as a workbook: a summary sheet, then one sheet per input in
/// request order. Failed inputs get a header-only sheet.
pub fn export_workbook(run: &RunResult, config: &AppConfig, path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let dates = Format::new().set_num_format("yyyy-mm-dd");

    write_summary_sheet(workbook.add_worksheet(), run, config, &bold, &dates)?;
    for (ticker, name) in run.tickers.iter().zip(workbook_sheet_names(run)) {
        write_history_sheet(workbook.add_worksheet(), &name, &ticker.records, &bold, &dates)?;
        debug!("{}: {} rows -> sheet {}", ticker.ticker, ticker.records.len(), name);
    }

    workbook.save(path).with_context(|| format!("Cannot write {:?}", path))?;
    info!("Wrote workbook {:?}", path);
    Ok(())
}
