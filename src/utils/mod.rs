use std::time::Instant;
use tracing::info;

/// Spreadsheet tools truncate sheet names past this length.
pub const MAX_SHEET_NAME: usize = 31;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            "⏱  Finished: {} (took {:.2?})",
            self.label,
            self.start.elapsed()
        );
    }
}

/// `name` with every non-alphanumeric char replaced by '_', cut so that
/// `name + suffix` fits in [`MAX_SHEET_NAME`].
pub fn sheet_name(name: &str, suffix: &str) -> String {
    let room = MAX_SHEET_NAME.saturating_sub(suffix.chars().count());
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(room)
        .collect();
    if out.is_empty() {
        out.push_str("sheet");
    }
    out.push_str(suffix);
    out
}

pub fn round_dp(value: f64, dp: i32) -> f64 {
    let factor = 10f64.powi(dp);
    (value * factor).round() / factor
}

/// Format a large integer with thousands separators.
pub fn fmt_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_number() {
        assert_eq!(fmt_number(1_234_567), "1,234,567");
        assert_eq!(fmt_number(0), "0");
        assert_eq!(fmt_number(999), "999");
    }

    #[test]
    fn test_sheet_name() {
        assert_eq!(sheet_name("D05.SI", "_history"), "D05_SI_history");
        assert_eq!(sheet_name("", ""), "sheet");

        let long = sheet_name("custom_url_1756881590_with_a_long_tail", "_history");
        assert_eq!(long.chars().count(), MAX_SHEET_NAME);
        assert!(long.ends_with("_history"));
    }

    #[test]
    fn test_round_dp() {
        assert_eq!(round_dp(0.123456, 4), 0.1235);
        assert_eq!(round_dp(33.3333, 2), 33.33);
    }
}
