//! Scroll-until-stable loading of lazily populated history rows.

use crate::browser::{BrowserSession, Pause, PRICE_ROW_MIN_CELLS};
use crate::config::LoaderConfig;
use crate::error::ScrapeError;
use std::time::Duration;
use tracing::{debug, info, warn};

/// polling → stable | incomplete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Polling { last: usize, stable_rounds: u32 },
    Stable(usize),
    Incomplete(usize),
}

impl LoadState {
    /// Fold one row-count observation into the state.
    pub fn observe(self, current: usize, threshold: u32) -> Self {
        match self {
            LoadState::Polling { last, stable_rounds } => {
                let stable_rounds = if current == last { stable_rounds + 1 } else { 0 };
                if stable_rounds >= threshold {
                    LoadState::Stable(current)
                } else {
                    LoadState::Polling {
                        last: current,
                        stable_rounds,
                    }
                }
            }
            done => done,
        }
    }

    pub fn rows(&self) -> usize {
        match *self {
            LoadState::Polling { last, .. } => last,
            LoadState::Stable(n) | LoadState::Incomplete(n) => n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOutcome {
    pub rows: usize,
    pub iterations: u32,
    pub incomplete: bool,
}

impl LoadOutcome {
    /// `LoadIncomplete` when the cap was hit, for status annotation.
    pub fn as_error(&self) -> Option<ScrapeError> {
        self.incomplete.then(|| ScrapeError::LoadIncomplete {
            rows: self.rows,
            iterations: self.iterations as usize,
        })
    }
}

pub struct LazyLoader {
    stable_threshold: u32,
    max_iterations: u32,
    pause: Duration,
}

impl LazyLoader {
    pub fn new(config: &LoaderConfig) -> Self {
        Self {
            stable_threshold: config.stable_threshold.max(1),
            max_iterations: config.max_iterations.max(1),
            pause: config.pause(),
        }
    }

    /// Scroll until the row count holds for `stable_threshold` consecutive
    /// iterations or the cap is reached. Never discards loaded rows: a
    /// session fault mid-loop ends loading as incomplete.
    pub fn load_all<S, P>(&self, session: &mut S, pause: &P) -> LoadOutcome
    where
        S: BrowserSession + ?Sized,
        P: Pause + ?Sized,
    {
        let initial = match session.count_rows(PRICE_ROW_MIN_CELLS) {
            Ok(n) => n,
            Err(e) => {
                warn!("Initial row count failed: {:#}", e);
                0
            }
        };
        info!("Scrolling to load all rows (initial: {})", initial);

        let mut state = LoadState::Polling {
            last: initial,
            stable_rounds: 0,
        };
        let mut iterations = 0u32;

        while iterations < self.max_iterations {
            iterations += 1;

            let current = session
                .scroll_to_bottom()
                .map(|_| pause.pause(self.pause))
                .and_then(|_| session.count_rows(PRICE_ROW_MIN_CELLS));

            let current = match current {
                Ok(n) => n,
                Err(e) => {
                    warn!("Loading interrupted after {} iterations: {:#}", iterations, e);
                    state = LoadState::Incomplete(state.rows());
                    break;
                }
            };

            debug!("Scroll {}: {} rows", iterations, current);
            state = state.observe(current, self.stable_threshold);
            if let LoadState::Stable(n) = state {
                info!("Rows stabilised at {} after {} iterations", n, iterations);
                break;
            }
        }

        if let LoadState::Polling { last, .. } = state {
            warn!("Reached max scroll iterations ({}) with {} rows", self.max_iterations, last);
            state = LoadState::Incomplete(last);
        }

        LoadOutcome {
            rows: state.rows(),
            iterations,
            incomplete: matches!(state, LoadState::Incomplete(_)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakePage, FakeSession, FakeSite, NoPause};
    use std::sync::atomic::Ordering;

    fn loader(threshold: u32, cap: u32) -> LazyLoader {
        LazyLoader::new(&LoaderConfig {
            stable_threshold: threshold,
            max_iterations: cap,
            pause_ms: 1500,
        })
    }

    fn session(row_counts: Vec<usize>) -> FakeSession {
        let site = FakeSite::new().page("/history", FakePage::history(String::new(), row_counts));
        let mut s = FakeSession::new(site);
        s.navigate("https://example.test/quote/A/history").unwrap();
        s
    }

    #[test]
    fn test_converges_after_threshold_extra_iterations() {
        // 25 rows per scroll until 200
        let counts: Vec<usize> = (1..=8).map(|i| i * 25).collect();
        let mut s = session(counts);
        let pause = NoPause::default();

        let out = loader(3, 100).load_all(&mut s, &pause);

        assert_eq!(out.rows, 200);
        assert!(!out.incomplete);
        // 7 scrolls to reach 200, then exactly 3 unchanged observations
        assert_eq!(out.iterations, 7 + 3);
        assert_eq!(s.scrolls(), 10);
        assert_eq!(pause.calls.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_cap_yields_incomplete_with_partial_rows() {
        // Never settles
        let counts: Vec<usize> = (0..100).map(|i| i * 10).collect();
        let mut s = session(counts);
        let out = loader(2, 5).load_all(&mut s, &NoPause::default());

        assert!(out.incomplete);
        assert_eq!(out.iterations, 5);
        assert_eq!(out.rows, 50);
        assert!(matches!(
            out.as_error(),
            Some(ScrapeError::LoadIncomplete { rows: 50, iterations: 5 })
        ));
    }

    #[test]
    fn test_static_page_stops_at_threshold() {
        let mut s = session(vec![100]);
        let out = loader(2, 50).load_all(&mut s, &NoPause::default());
        assert_eq!(out, LoadOutcome { rows: 100, iterations: 2, incomplete: false });
        assert!(out.as_error().is_none());
    }

    #[test]
    fn test_state_machine_resets_on_growth() {
        let s = LoadState::Polling { last: 10, stable_rounds: 0 };
        let s = s.observe(10, 2);
        assert_eq!(s, LoadState::Polling { last: 10, stable_rounds: 1 });
        let s = s.observe(20, 2);
        assert_eq!(s, LoadState::Polling { last: 20, stable_rounds: 0 });
        let s = s.observe(20, 2).observe(20, 2);
        assert_eq!(s, LoadState::Stable(20));
        // terminal states absorb further observations
        assert_eq!(s.observe(99, 2), LoadState::Stable(20));
    }
}
