mod browser;
mod config;
mod error;
mod export;
mod loader;
mod models;
mod pipeline;
mod scraper;
mod utils;

use anyhow::{Context, Result, bail};
use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;
use crate::export::{export_run, export_workbook, run_dir, workbook_path};
use crate::loader::resolve_inputs;
use crate::models::{RunResult, TickerStatus};
use crate::pipeline::Pipeline;
use crate::scraper::navigator::{Target, statistics_url};
use crate::scraper::parsers::parse_history_page;
use crate::scraper::ratio::{LabelMatcher, find_ratio};

#[derive(Parser)]
#[command(name = "sgx-history", about = "SGX daily price history and EV/EBITDA scraper", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape history (and EV/EBITDA) for tickers or history URLs
    Scrape(ScrapeArgs),

    /// Parse a saved history page and print its records
    ParseHistory {
        file: PathBuf,
    },

    /// Look up EV/EBITDA in a saved statistics page
    ParseRatio {
        file: PathBuf,
    },

    /// Print the history and statistics URLs for a ticker
    Url {
        ticker: String,

        #[arg(short, long, env = "SGX_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ScrapeArgs {
    /// Ticker symbols (e.g. D05.SI) or full history URLs
    inputs: Vec<String>,

    /// Extra configuration file layered over config.json
    #[arg(short, long, env = "SGX_CONFIG")]
    config: Option<PathBuf>,

    /// File with one ticker or URL per line
    #[arg(short, long)]
    tickers_file: Option<PathBuf>,

    /// Output name stem; a timestamp is appended
    #[arg(short, long)]
    output: Option<String>,

    /// Years of history to request
    #[arg(long)]
    years: Option<u32>,

    /// Parallel browser sessions
    #[arg(long)]
    concurrency: Option<usize>,

    /// Stop starting new tickers after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Skip the EV/EBITDA lookup
    #[arg(long)]
    no_ratio: bool,

    /// Run Chrome with a visible window
    #[arg(long)]
    show_browser: bool,
}

impl ScrapeArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(output) = &self.output {
            config.output_file = output.clone();
        }
        if let Some(years) = self.years {
            config.lookback_years = years;
        }
        if let Some(n) = self.concurrency {
            config.pipeline.concurrency = n;
        }
        if self.deadline_secs.is_some() {
            config.pipeline.deadline_secs = self.deadline_secs;
        }
        if self.no_ratio {
            config.pipeline.fetch_ratio = false;
        }
        if self.show_browser {
            config.scraper.headless = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "sgx_history=info,warn",
        1 => "sgx_history=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Command::Scrape(args) => scrape(args).await?,

        Command::ParseHistory { file } => {
            let html = read_page(&file)?;
            let extraction = parse_history_page(&html)?;
            println!("Date        Open      High      Low       Close     Adj Close Volume        Return");
            for r in &extraction.records {
                println!(
                    "{}  {:<9} {:<9} {:<9} {:<9} {:<9} {:>13} {:>8}",
                    r.date,
                    r.open,
                    r.high,
                    r.low,
                    r.close,
                    r.adjusted_close,
                    utils::fmt_number(r.volume),
                    r.daily_return
                );
            }
            println!(
                "{} records | {} annotation | {} malformed | {} duplicate",
                extraction.records.len(),
                extraction.annotations,
                extraction.malformed.len(),
                extraction.duplicates
            );
        }

        Command::ParseRatio { file } => {
            let html = read_page(&file)?;
            match find_ratio(&html, &LabelMatcher::ev_ebitda()) {
                Some(v) => println!("EV/EBITDA: {}", v),
                None => println!("EV/EBITDA: not found"),
            }
        }

        Command::Url { ticker, config } => {
            let config = AppConfig::load(config.as_deref())?;
            let target = Target::parse(&ticker);
            println!(
                "history:    {}",
                target.history_url(&config.scraper.history_url_template, config.lookback_years, Utc::now())
            );
            match target.symbol() {
                Some(symbol) => println!(
                    "statistics: {}",
                    statistics_url(&config.scraper.statistics_url_template, symbol)
                ),
                None => println!("statistics: (no symbol in input)"),
            }
        }
    }

    Ok(())
}

async fn scrape(args: ScrapeArgs) -> Result<()> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let (inputs, _source) = resolve_inputs(&args.inputs, args.tickers_file.as_deref(), &mut config)?;

    let run = {
        let _t = utils::Timer::start(format!("Scrape of {} inputs", inputs.len()));
        Pipeline::new(config.clone()).run(&inputs).await
    };

    let dir = run_dir(Path::new("."), &config.output_file, Local::now());
    let workbook = workbook_path(&dir);
    export_workbook(&run, &config, &workbook)?;
    export_run(&run, &config, &dir)?;
    print_summary(&run, &workbook, &dir);

    if !run.any_data() {
        bail!("No data was scraped for any ticker");
    }
    Ok(())
}

fn read_page(file: &Path) -> Result<String> {
    info!("Reading {:?}", file);
    std::fs::read_to_string(file).with_context(|| format!("Cannot read {:?}", file))
}

fn print_summary(run: &RunResult, workbook: &Path, dir: &Path) {
    println!("─────────────────────────────────");
    println!("  SGX History - Run Summary");
    println!("─────────────────────────────────");
    for t in &run.tickers {
        let ratio = t.ev_ebitda.map(|v| v.to_string()).unwrap_or_else(|| "N/A".into());
        println!(
            "  {:<12} {:<10} {:>6} rows  EV/EBITDA {}",
            t.ticker,
            t.status.to_string(),
            utils::fmt_number(t.records.len() as u64),
            ratio
        );
    }
    println!("─────────────────────────────────");
    println!(
        "  Succeeded {} | Partial {} | Failed {}",
        run.count(TickerStatus::Succeeded),
        run.count(TickerStatus::Partial),
        run.count(TickerStatus::Failed)
    );
    let failed = run.failed_inputs();
    if !failed.is_empty() {
        println!("  Failed inputs: {}", failed.join(", "));
    }
    println!("  Workbook: {}", workbook.display());
    println!("  Raw data: {}", dir.display());
    println!("─────────────────────────────────");
}
