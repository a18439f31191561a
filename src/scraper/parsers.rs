use crate::error::ScrapeError;
use crate::models::{DailyRecord, RawHistoricalRow};
use crate::scraper::cleaner::row_to_record;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

/// Words that mark an interleaved corporate-action row.
const ANNOTATION_MARKERS: [&str; 4] = ["dividend", "split", "capital gain", "distribution"];

const HEADER_KEYWORDS: [&str; 6] = ["date", "open", "high", "low", "close", "volume"];

fn selector(css: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(css)
        .map_err(|e| ScrapeError::NoDataFound(format!("invalid selector {}: {:?}", css, e)))
}

// ── Column layout ─────────────────────────────────────────────────────────────

/// Cell positions of each field within a row.
#[derive(Debug, Clone, PartialEq)]
struct Columns {
    date: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    adj_close: Option<usize>,
    volume: Option<usize>,
}

impl Columns {
    /// Date | Open | High | Low | Close | Adj close | Volume
    const POSITIONAL: Columns = Columns {
        date: 0,
        open: 1,
        high: 2,
        low: 3,
        close: 4,
        adj_close: Some(5),
        volume: Some(6),
    };

    fn from_headers(headers: &[String]) -> Self {
        let find = |pred: &dyn Fn(&str) -> bool| headers.iter().position(|h| pred(h));

        let (Some(date), Some(open), Some(high), Some(low), Some(close)) = (
            find(&|h| h.contains("date")),
            find(&|h| h.contains("open")),
            find(&|h| h.contains("high")),
            find(&|h| h.contains("low")),
            find(&|h| h.contains("close") && !h.contains("adj")),
        ) else {
            return Self::POSITIONAL;
        };

        Self {
            date,
            open,
            high,
            low,
            close,
            adj_close: find(&|h| h.contains("adj")),
            volume: find(&|h| h.contains("volume")),
        }
    }

    /// Cells a genuine trading-day row must have.
    fn width(&self) -> usize {
        [
            Some(self.date),
            Some(self.open),
            Some(self.high),
            Some(self.low),
            Some(self.close),
            self.adj_close,
            self.volume,
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0)
            + 1
    }

    fn raw_row(&self, cells: &[String]) -> RawHistoricalRow {
        let cell = |i: usize| cells.get(i).cloned();
        RawHistoricalRow {
            date: cell(self.date),
            open: cell(self.open),
            high: cell(self.high),
            low: cell(self.low),
            close: cell(self.close),
            adj_close: self.adj_close.and_then(cell),
            volume: self.volume.and_then(cell),
        }
    }
}

// ── Extraction result ─────────────────────────────────────────────────────────

/// Output of the table extractor.
#[derive(Debug, Default)]
pub struct Extraction {
    /// Strictly ascending by date, no duplicates.
    pub records: Vec<DailyRecord>,
    /// Dividend / split rows.
    pub annotations: usize,
    /// Rows rejected during coercion; each is a `ScrapeError::MalformedRow`.
    pub malformed: Vec<ScrapeError>,
    /// Rows dropped because their date was already present.
    pub duplicates: usize,
}

impl Extraction {
    pub fn skipped(&self) -> usize {
        self.annotations + self.malformed.len() + self.duplicates
    }
}

// ── Historical table ──────────────────────────────────────────────────────────

/// Parse the loaded history page into ascending daily records.
pub fn parse_history_page(html: &str) -> Result<Extraction, ScrapeError> {
    let doc = Html::parse_document(html);

    let Some(table) = find_history_table(&doc)? else {
        return Err(ScrapeError::NoDataFound(
            "historical data table not found".to_string(),
        ));
    };

    let th_sel = selector("thead th")?;
    let tr_sel = selector("tbody tr")?;
    let td_sel = selector("td")?;

    let headers: Vec<String> = table
        .select(&th_sel)
        .map(|th| normalise_ws(&th.text().collect::<String>()).to_lowercase())
        .collect();
    let columns = Columns::from_headers(&headers);
    let width = columns.width();
    debug!("History columns: {:?}", columns);

    let mut out = Extraction::default();

    for (index, tr) in table.select(&tr_sel).enumerate() {
        let tds: Vec<ElementRef> = tr.select(&td_sel).collect();
        if tds.is_empty() {
            continue;
        }

        let cells: Vec<String> = tds
            .iter()
            .enumerate()
            .map(|(i, td)| {
                if i == columns.date {
                    own_text(*td)
                } else {
                    normalise_ws(&td.text().collect::<String>())
                }
            })
            .collect();

        let has_colspan = tds.iter().any(|td| td.value().attr("colspan").is_some());
        if has_colspan || cells.len() < width || is_annotation(&cells, columns.date) {
            debug!("Skipping annotation row {}: {:?}", index, cells);
            out.annotations += 1;
            continue;
        }

        match row_to_record(&columns.raw_row(&cells)) {
            Ok(record) => out.records.push(record),
            Err(reason) => {
                let err = ScrapeError::MalformedRow { index, reason };
                warn!("{}", err);
                out.malformed.push(err);
            }
        }
    }

    // Source is most-recent-first; stable sort keeps the first-seen duplicate.
    out.records.sort_by_key(|r| r.date);
    let before = out.records.len();
    out.records.dedup_by_key(|r| r.date);
    out.duplicates = before - out.records.len();

    if out.records.is_empty() {
        return Err(ScrapeError::NoDataFound(format!(
            "0 valid rows ({} annotation, {} malformed)",
            out.annotations,
            out.malformed.len()
        )));
    }

    Ok(out)
}

fn find_history_table(doc: &Html) -> Result<Option<ElementRef<'_>>, ScrapeError> {
    let tagged = selector(r#"table[data-test="historical-prices"]"#)?;
    if let Some(table) = doc.select(&tagged).next() {
        return Ok(Some(table));
    }

    let table_sel = selector("table")?;
    let thead_sel = selector("thead")?;
    for table in doc.select(&table_sel) {
        let Some(thead) = table.select(&thead_sel).next() else {
            continue;
        };
        let header = normalise_ws(&thead.text().collect::<Vec<_>>().join(" ")).to_lowercase();
        if HEADER_KEYWORDS.iter().all(|k| header.contains(k)) {
            return Ok(Some(table));
        }
    }

    let wrapped = selector("#main-content-wrapper table")?;
    Ok(doc.select(&wrapped).next())
}

fn is_annotation(cells: &[String], date_col: usize) -> bool {
    cells.iter().enumerate().any(|(i, c)| {
        let c = c.to_lowercase();
        i != date_col && ANNOTATION_MARKERS.iter().any(|m| c.contains(m))
    })
}

/// Direct text children only; tooltip spans inside the date cell are ignored.
fn own_text(el: ElementRef<'_>) -> String {
    let direct: Vec<&str> = el
        .children()
        .filter_map(|n| n.value().as_text())
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if direct.is_empty() {
        normalise_ws(&el.text().collect::<String>())
    } else {
        normalise_ws(&direct.join(" "))
    }
}

pub(crate) fn normalise_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
