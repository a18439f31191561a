use crate::models::{DailyRecord, RawHistoricalRow};
use crate::utils::round_dp;
use chrono::NaiveDate;

// ── Cell parsers ──────────────────────────────────────────────────────────────

/// Placeholders the history and statistics pages use for "no value".
fn is_missing(s: &str) -> bool {
    matches!(s, "" | "-" | "--" | "—" | "N/A" | "NA" | "n/a")
}

/// Parse a price: thousands separators dropped, dash means missing.
/// "1,234.56" → 1234.56 | "-" → None
pub fn parse_price(s: &str) -> Option<f64> {
    let s = s.trim();
    if is_missing(s) {
        return None;
    }
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse volume with optional K/M/B suffixes.
/// "1,234,567" → 1234567 | "1.2M" → 1,200,000 | "-" → None
pub fn parse_volume(s: &str) -> Option<u64> {
    let s = s.trim().to_uppercase().replace(',', "");
    if is_missing(&s) {
        return None;
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('B') {
        (n, 1_000_000_000.0)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1_000_000.0)
    } else if let Some(n) = s.strip_suffix('K') {
        (n, 1_000.0)
    } else {
        return s.parse::<u64>().ok();
    };

    let num: f64 = num_str.trim().parse().ok()?;
    if !num.is_finite() || num < 0.0 {
        return None;
    }
    Some((num * multiplier).round() as u64)
}

/// Parse a calendar date. Yahoo SG renders "3 Sept 2025"; the US site
/// renders "Sep 3, 2025".
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim().replace("Sept ", "Sep ");
    let s = s.as_str();

    const FORMATS: [&str; 5] = ["%d %b %Y", "%b %d, %Y", "%Y-%m-%d", "%d/%m/%Y", "%d %B %Y"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

// ── Raw row → DailyRecord ─────────────────────────────────────────────────────

/// Coerce one raw row. `Err` carries the reason the row was rejected.
pub fn row_to_record(row: &RawHistoricalRow) -> Result<DailyRecord, String> {
    let date_str = row.date.as_deref().ok_or("no date cell")?;
    let date = parse_date(date_str).ok_or_else(|| format!("unparseable date {:?}", date_str))?;

    let price = |cell: &Option<String>, name: &str| -> Result<f64, String> {
        let text = cell.as_deref().ok_or_else(|| format!("no {} cell", name))?;
        parse_price(text).ok_or_else(|| format!("{} {:?} is not a price", name, text))
    };

    let open = price(&row.open, "open")?;
    let high = price(&row.high, "high")?;
    let low = price(&row.low, "low")?;
    let close = price(&row.close, "close")?;
    // Older layouts have no adjusted column
    let adjusted_close = match &row.adj_close {
        Some(_) => price(&row.adj_close, "adj close")?,
        None => close,
    };
    // Index rows show "-" for volume; anything else must parse
    let volume = match row.volume.as_deref().map(str::trim) {
        None => 0,
        Some(text) if is_missing(text) => 0,
        Some(text) => parse_volume(text).ok_or_else(|| format!("volume {:?} is not a number", text))?,
    };

    let record = DailyRecord {
        date,
        open,
        high,
        low,
        close,
        adjusted_close,
        volume,
        daily_return: round_dp(close - open, 4),
    };

    if !record.is_consistent() {
        return Err(format!(
            "inconsistent prices on {}: o={} h={} l={} c={} adj={}",
            date, open, high, low, close, adjusted_close
        ));
    }
    Ok(record)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(cells: [&str; 7]) -> RawHistoricalRow {
        RawHistoricalRow {
            date: Some(cells[0].to_string()),
            open: Some(cells[1].to_string()),
            high: Some(cells[2].to_string()),
            low: Some(cells[3].to_string()),
            close: Some(cells[4].to_string()),
            adj_close: Some(cells[5].to_string()),
            volume: Some(cells[6].to_string()),
        }
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("1,234.56"), Some(1234.56));
        assert_eq!(parse_price(" 38.10 "), Some(38.1));
        assert_eq!(parse_price("-"), None);
        assert_eq!(parse_price("N/A"), None);
        assert_eq!(parse_price("Dividend"), None);
    }

    #[test]
    fn test_parse_volume() {
        assert_eq!(parse_volume("4,455,300"), Some(4_455_300));
        assert_eq!(parse_volume("1.2M"), Some(1_200_000));
        assert_eq!(parse_volume("345K"), Some(345_000));
        assert_eq!(parse_volume("-"), None);
    }

    #[test]
    fn test_parse_date_variants() {
        let d = NaiveDate::from_ymd_opt(2025, 9, 3).unwrap();
        assert_eq!(parse_date("3 Sept 2025"), Some(d));
        assert_eq!(parse_date("03 Sep 2025"), Some(d));
        assert_eq!(parse_date("Sep 3, 2025"), Some(d));
        assert_eq!(parse_date("2025-09-03"), Some(d));
        assert_eq!(parse_date("03/09/2025"), Some(d));
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_row_to_record_computes_return() {
        let r = row_to_record(&raw([
            "3 Sept 2025", "38.10", "38.50", "37.90", "38.40", "37.95", "4,455,300",
        ]))
        .unwrap();
        assert_eq!(r.date, NaiveDate::from_ymd_opt(2025, 9, 3).unwrap());
        assert_eq!(r.volume, 4_455_300);
        assert_eq!(r.daily_return, 0.3);
        assert_eq!(r.adjusted_close, 37.95);
    }

    #[test]
    fn test_row_to_record_rejects_close_outside_range() {
        let err = row_to_record(&raw([
            "3 Sept 2025", "38.10", "38.50", "37.90", "39.00", "39.00", "100",
        ]))
        .unwrap_err();
        assert!(err.contains("inconsistent"));
    }

    #[test]
    fn test_row_to_record_rejects_missing_price() {
        let err = row_to_record(&raw(["3 Sept 2025", "-", "38.50", "37.90", "38.0", "38.0", "1"]))
            .unwrap_err();
        assert!(err.contains("open"));
    }

    #[test]
    fn test_missing_volume_and_adj_close() {
        let mut row = raw(["3 Sept 2025", "10", "11", "9", "10.5", "", "-"]);
        row.adj_close = None;
        let r = row_to_record(&row).unwrap();
        assert_eq!(r.volume, 0);
        assert_eq!(r.adjusted_close, 10.5);
    }

    #[test]
    fn test_unparseable_volume_rejects_row() {
        let err = row_to_record(&raw(["3 Sept 2025", "10", "11", "9", "10.5", "10.5", "12.5x"]))
            .unwrap_err();
        assert!(err.contains("volume"));
        assert!(err.contains("12.5x"));
    }
}
