//! Input resolution: which tickers/URLs a run processes.
//!
//! Precedence is CLI arguments, then a tickers file, then the configured
//! list. A tickers file holds one input per line with an optional company
//! name in a second comma-separated column; `#` starts a comment line.

use crate::config::AppConfig;
use anyhow::{Context, Result, bail};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    Cli,
    File(PathBuf),
    Config,
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Cli => f.write_str("command line"),
            InputSource::File(p) => write!(f, "{}", p.display()),
            InputSource::Config => f.write_str("configuration"),
        }
    }
}

/// One line of a tickers file.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerEntry {
    pub input: String,
    pub name: Option<String>,
}

pub fn load_tickers_file(path: &Path) -> Result<Vec<TickerEntry>> {
    debug!("Loading inputs from {:?}", path);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Cannot open tickers file {:?}", path))?;

    let mut entries = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Line {} in {:?}: {}", i + 1, path, e);
                continue;
            }
        };

        // indented comments are not caught by the reader
        let Some(input) = record
            .get(0)
            .filter(|s| !s.is_empty() && !s.starts_with('#'))
        else {
            continue;
        };
        entries.push(TickerEntry {
            input: input.to_string(),
            name: record
                .get(1)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        });
    }

    info!("{:?}: {} inputs loaded", path, entries.len());
    Ok(entries)
}

/// Pick the input list for this run. Names from a tickers file are merged
/// into `config.ticker_names`.
pub fn resolve_inputs(
    cli: &[String],
    tickers_file: Option<&Path>,
    config: &mut AppConfig,
) -> Result<(Vec<String>, InputSource)> {
    let (inputs, source) = if !cli.is_empty() {
        (cli.to_vec(), InputSource::Cli)
    } else if let Some(path) = tickers_file {
        let entries = load_tickers_file(path)?;
        let mut inputs = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(name) = entry.name {
                config.ticker_names.insert(entry.input.to_uppercase(), name);
            }
            inputs.push(entry.input);
        }
        (inputs, InputSource::File(path.to_path_buf()))
    } else {
        (config.tickers.clone(), InputSource::Config)
    };

    let inputs = dedup_inputs(inputs);
    if inputs.is_empty() {
        bail!("No tickers to process (source: {})", source);
    }
    info!("{} inputs from {}", inputs.len(), source);
    Ok((inputs, source))
}

/// Trim, drop blanks and repeated inputs, keep first-seen order.
fn dedup_inputs(inputs: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    inputs
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .filter(|s| {
            let fresh = seen.insert(s.to_uppercase());
            if !fresh {
                warn!("Ignoring repeated input {}", s);
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("sgx_history_{}_{}", std::process::id(), name));
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_tickers_file_with_comments_and_names() {
        let path = temp_file(
            "tickers.txt",
            "# banks\nD05.SI, DBS Group Holdings\n\nO39.SI\n  # trailing comment\nhttps://sg.finance.yahoo.com/quote/U11.SI/history/\n",
        );
        let entries = load_tickers_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].input, "D05.SI");
        assert_eq!(entries[0].name.as_deref(), Some("DBS Group Holdings"));
        assert_eq!(entries[1].name, None);
        assert!(entries[2].input.starts_with("https://"));
    }

    #[test]
    fn test_cli_wins_over_file_and_config() {
        let mut cfg = AppConfig::default();
        let cli = vec!["z74.si".to_string()];
        let (inputs, source) =
            resolve_inputs(&cli, Some(Path::new("/does/not/exist")), &mut cfg).unwrap();
        assert_eq!(inputs, vec!["z74.si"]);
        assert_eq!(source, InputSource::Cli);
    }

    #[test]
    fn test_file_names_are_merged_into_config() {
        let path = temp_file("names.txt", "c6l.si,Singapore Airlines\nC6L.SI\n");
        let mut cfg = AppConfig::default();
        let (inputs, source) = resolve_inputs(&[], Some(&path), &mut cfg).unwrap();
        std::fs::remove_file(&path).ok();

        // repeated input dropped, first spelling kept
        assert_eq!(inputs, vec!["c6l.si"]);
        assert!(matches!(source, InputSource::File(_)));
        assert_eq!(cfg.display_name("C6L.SI"), "Singapore Airlines");
    }

    #[test]
    fn test_config_list_is_the_fallback() {
        let mut cfg = AppConfig::default();
        let (inputs, source) = resolve_inputs(&[], None, &mut cfg).unwrap();
        assert_eq!(inputs, vec!["D05.SI", "O39.SI", "U11.SI"]);
        assert_eq!(source, InputSource::Config);

        cfg.tickers.clear();
        assert!(resolve_inputs(&[], None, &mut cfg).is_err());
    }
}
