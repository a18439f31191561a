//! Run coordinator: sequences the scraper components per ticker and collects
//! the outcomes into a request-ordered [`RunResult`].
//!
//! ## Workers
//!
//! `concurrency` blocking workers pull jobs from a shared queue. Each worker
//! owns at most one browser session at a time; the session is opened lazily
//! and discarded after a failed ticker so the next ticker starts clean.
//! Results travel back over a channel tagged with their request index, so a
//! single writer assembles the run in input order whatever order workers
//! finish in.
//!
//! ## Deadline
//!
//! `deadline_secs` is checked before a ticker starts, both before and after
//! the polite delay between tickers. Tickers still queued when it passes are
//! reported as failed with `DeadlineExceeded`; completed results are kept.

use crate::browser::{BrowserSession, ChromeFactory, Pause, SessionFactory, ThreadPause};
use crate::config::AppConfig;
use crate::error::ScrapeError;
use crate::models::{Phase, ProgressEvent, RunResult, TickerResult, TickerStatus};
use crate::scraper::SessionScraper;
use crate::scraper::navigator::Target;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

// ── Progress events ───────────────────────────────────────────────────────────

/// Receives one event per per-ticker state transition.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Emits transitions as structured `tracing` events.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: &ProgressEvent) {
        let status = event.status.map(|s| s.to_string()).unwrap_or_default();
        match (&event.phase, &event.error) {
            (Phase::Done, Some(err)) => warn!(
                ticker = %event.ticker, phase = %event.phase, status = %status, error = %err,
                "ticker finished"
            ),
            (Phase::Done, None) => info!(
                ticker = %event.ticker, phase = %event.phase, status = %status,
                "ticker finished"
            ),
            _ => debug!(ticker = %event.ticker, phase = %event.phase, "phase"),
        }
    }
}

// ── Per-ticker state machine ──────────────────────────────────────────────────

/// Forward-only phase tracking around one `TickerResult`.
struct TickerRun<'a> {
    result: TickerResult,
    phase: Phase,
    sink: &'a dyn ProgressSink,
}

impl<'a> TickerRun<'a> {
    fn new(target: &Target, source: &str, sink: &'a dyn ProgressSink) -> Self {
        Self {
            result: TickerResult::pending(target.name(), source),
            phase: Phase::Pending,
            sink,
        }
    }

    fn advance(&mut self, next: Phase) {
        if next <= self.phase {
            warn!("{}: ignoring transition {} -> {}", self.result.ticker, self.phase, next);
            return;
        }
        self.phase = next;
        self.sink.emit(&ProgressEvent {
            ticker: self.result.ticker.clone(),
            phase: next,
            status: None,
            error: None,
        });
    }

    fn fail(mut self, err: &ScrapeError) -> TickerResult {
        self.result.fail(err.to_string());
        self.finish()
    }

    fn finish(mut self) -> TickerResult {
        self.phase = Phase::Done;
        self.sink.emit(&ProgressEvent {
            ticker: self.result.ticker.clone(),
            phase: Phase::Done,
            status: Some(self.result.status),
            error: self.result.error_detail.clone(),
        });
        self.result
    }
}

/// navigating → loading → extracting → (ratio) → done
fn process_ticker<S, P>(
    scraper: &mut SessionScraper,
    session: &mut S,
    pause: &P,
    sink: &dyn ProgressSink,
    target: &Target,
    source: &str,
    fetch_ratio: bool,
) -> TickerResult
where
    S: BrowserSession + ?Sized,
    P: Pause + ?Sized,
{
    let mut run = TickerRun::new(target, source, sink);
    let mut notes: Vec<String> = Vec::new();

    run.advance(Phase::Navigating);
    if let Err(e) = scraper.open_history(session, pause, target) {
        return run.fail(&e);
    }

    run.advance(Phase::Loading);
    let load = scraper.load_rows(session, pause);
    if let Some(e) = load.as_error() {
        notes.push(e.to_string());
    }

    run.advance(Phase::Extracting);
    match scraper.extract(session, target) {
        Ok(extraction) => {
            info!(
                "{}: {} records ({} skipped rows)",
                target.name(),
                extraction.records.len(),
                extraction.skipped()
            );
            run.result.skipped_rows = extraction.skipped();
            run.result.records = extraction.records;
        }
        Err(e) => return run.fail(&e),
    }

    match target.symbol() {
        Some(symbol) if fetch_ratio => {
            run.advance(Phase::RatioExtracting);
            match scraper.fetch_ratio(session, pause, symbol) {
                Ok(value) => run.result.ev_ebitda = value,
                Err(e) if e.is_fatal_for_ticker() => return run.fail(&e),
                Err(e) => {
                    warn!("{}", e);
                    notes.push(e.to_string());
                }
            }
        }
        None if fetch_ratio => debug!("{}: no symbol, skipping EV/EBITDA", target.name()),
        _ => {}
    }

    if notes.is_empty() {
        run.result.succeed();
    } else {
        run.result.partial(notes.join("; "));
    }
    run.finish()
}

/// Failed result for a ticker that never got (or lost) a session.
fn abandoned(target: &Target, source: &str, sink: &dyn ProgressSink, err: &ScrapeError) -> TickerResult {
    TickerRun::new(target, source, sink).fail(err)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// ── Workers ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Job {
    index: usize,
    input: String,
    target: Target,
}

struct Worker<F: SessionFactory> {
    id: usize,
    config: Arc<AppConfig>,
    factory: Arc<F>,
    pause: Arc<dyn Pause>,
    sink: Arc<dyn ProgressSink>,
    queue: Arc<Mutex<VecDeque<Job>>>,
    deadline: Option<Instant>,
    results: mpsc::UnboundedSender<(usize, TickerResult)>,
}

impl<F: SessionFactory> Worker<F> {
    fn next_job(&self) -> Option<Job> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn run(self) {
        let mut scraper = SessionScraper::new(&self.config);
        let mut session: Option<F::Session> = None;
        let mut started_any = false;

        while let Some(job) = self.next_job() {
            if self.deadline_passed() {
                self.skip(&job);
                continue;
            }

            if started_any {
                self.polite_delay();
                // the delay itself may run past the deadline
                if self.deadline_passed() {
                    self.skip(&job);
                    continue;
                }
            }
            started_any = true;

            let mut current = match session.take() {
                Some(s) => s,
                None => match self.factory.open() {
                    Ok(s) => {
                        debug!("Worker {}: opened browser session", self.id);
                        scraper.reset_session();
                        s
                    }
                    Err(e) => {
                        error!("Worker {}: browser launch failed: {:#}", self.id, e);
                        let err = ScrapeError::browser(e);
                        self.send(job.index, abandoned(&job.target, &job.input, &*self.sink, &err));
                        continue;
                    }
                },
            };

            let outcome = catch_unwind(AssertUnwindSafe(|| {
                process_ticker(
                    &mut scraper,
                    &mut current,
                    &*self.pause,
                    &*self.sink,
                    &job.target,
                    &job.input,
                    self.config.pipeline.fetch_ratio,
                )
            }));

            let result = match outcome {
                Ok(result) => {
                    if result.status == TickerStatus::Failed {
                        debug!("Worker {}: discarding session after failed ticker", self.id);
                    } else {
                        session = Some(current);
                    }
                    result
                }
                Err(payload) => {
                    let msg = panic_message(&*payload);
                    error!("Worker {} panicked on {}: {}", self.id, job.input, msg);
                    let err = ScrapeError::Browser(format!("worker panicked: {}", msg));
                    abandoned(&job.target, &job.input, &*self.sink, &err)
                }
            };
            self.send(job.index, result);
        }

        debug!("Worker {} finished", self.id);
    }

    fn skip(&self, job: &Job) {
        let result = abandoned(&job.target, &job.input, &*self.sink, &ScrapeError::DeadlineExceeded);
        self.send(job.index, result);
    }

    fn send(&self, index: usize, result: TickerResult) {
        if self.results.send((index, result)).is_err() {
            warn!("Worker {}: result receiver closed", self.id);
        }
    }

    fn polite_delay(&self) {
        let cfg = &self.config.pipeline;
        let jitter = rand::random_range(0..=cfg.jitter_ms);
        let delay = Duration::from_millis(cfg.request_delay_ms + jitter);
        debug!("Worker {}: waiting {:?} before next ticker", self.id, delay);
        self.pause.pause(delay);
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline<F: SessionFactory = ChromeFactory> {
    config: Arc<AppConfig>,
    factory: Arc<F>,
    pause: Arc<dyn Pause>,
    sink: Arc<dyn ProgressSink>,
}

impl Pipeline<ChromeFactory> {
    /// Real Chrome sessions, real waits, progress to `tracing`.
    pub fn new(config: AppConfig) -> Self {
        let factory = ChromeFactory::new(&config.scraper);
        Self::with_parts(config, factory, Arc::new(ThreadPause), Arc::new(TracingSink))
    }
}

impl<F: SessionFactory> Pipeline<F> {
    pub fn with_parts(
        config: AppConfig,
        factory: F,
        pause: Arc<dyn Pause>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            factory: Arc::new(factory),
            pause,
            sink,
        }
    }

    /// Process every input. Never fails: each input appears in the result,
    /// in request order, with its outcome.
    pub async fn run(&self, inputs: &[String]) -> RunResult {
        let targets: Vec<Target> = inputs.iter().map(|i| Target::parse(i)).collect();
        let total = targets.len();
        if total == 0 {
            warn!("No inputs to process");
            return RunResult::default();
        }

        let deadline = self
            .config
            .pipeline
            .deadline_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let workers = self.config.pipeline.concurrency.clamp(1, total);
        info!("=== Processing {} inputs with {} worker(s) ===", total, workers);

        let queue: VecDeque<Job> = targets
            .iter()
            .zip(inputs)
            .enumerate()
            .map(|(index, (target, input))| Job {
                index,
                input: input.clone(),
                target: target.clone(),
            })
            .collect();
        let queue = Arc::new(Mutex::new(queue));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let worker = Worker {
                id,
                config: Arc::clone(&self.config),
                factory: Arc::clone(&self.factory),
                pause: Arc::clone(&self.pause),
                sink: Arc::clone(&self.sink),
                queue: Arc::clone(&queue),
                deadline,
                results: tx.clone(),
            };
            handles.push(tokio::task::spawn_blocking(move || worker.run()));
        }
        drop(tx);

        let mut slots: Vec<Option<TickerResult>> = (0..total).map(|_| None).collect();
        while let Some((index, result)) = rx.recv().await {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(result);
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker task failed: {}", e);
            }
        }

        // A worker that died outside a ticker leaves holes; report them.
        let tickers: Vec<TickerResult> = slots
            .into_iter()
            .zip(targets.iter().zip(inputs))
            .map(|(slot, (target, input))| {
                slot.unwrap_or_else(|| {
                    let mut r = TickerResult::pending(target.name(), input.as_str());
                    r.fail("worker terminated before reporting a result");
                    r
                })
            })
            .collect();

        let run = RunResult { tickers };
        info!(
            "=== Done: {} succeeded | {} partial | {} failed | {} records ===",
            run.count(TickerStatus::Succeeded),
            run.count(TickerStatus::Partial),
            run.count(TickerStatus::Failed),
            run.total_records(),
        );
        run
    }
}
