use crate::config::{GlobalWaitEntry, PacingConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// What the controller should do before its next fetch
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PacingDecision {
    /// Fetch immediately
    Proceed,

    /// Sleep a short, randomized interval
    ShortWait(Duration),

    /// Sleep a long pause from the global wait schedule
    LongWait(Duration),

    /// Switch identity, then sleep a short interval
    RotateIdentity(Duration),

    /// Switch identity, then sleep a long failure pause
    RotateAndLongWait(Duration),
}

impl PacingDecision {
    /// Time to sleep before the next fetch
    pub fn delay(&self) -> Duration {
        match self {
            Self::Proceed => Duration::ZERO,
            Self::ShortWait(d)
            | Self::LongWait(d)
            | Self::RotateIdentity(d)
            | Self::RotateAndLongWait(d) => *d,
        }
    }

    /// Whether the identity must change before the next fetch
    pub fn rotates_identity(&self) -> bool {
        matches!(self, Self::RotateIdentity(_) | Self::RotateAndLongWait(_))
    }
}

/// Pages a resource pause needs behind it before it is considered
const MIN_PAGES_BEFORE_RESOURCE_PAUSE: u32 = 2;

/// Randomized pacing and escalating backoff
///
/// The policy owns the failure state (consecutive failures and pages since
/// the last long pause) and a seeded random source. Given the same seed and
/// the same sequence of calls it yields the same sequence of decisions.
///
/// Long pauses come from the global wait schedule. When the page gap (drawn
/// in `[min-page-gap, max-page-gap]`) or the front entry's own page
/// threshold is reached, the front entry's wait is taken and the entry moves
/// to the back, so entries cycle.
#[derive(Debug)]
pub struct BackoffPolicy {
    config: PacingConfig,
    rng: StdRng,
    schedule: VecDeque<GlobalWaitEntry>,
    consecutive_failures: u32,
    pages_since_pause: u32,
    gap_threshold: u32,
}

impl BackoffPolicy {
    /// Creates a policy seeded from `config.seed`, or from entropy when unset
    pub fn new(config: &PacingConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config, rng)
    }

    /// Creates a policy with an explicit seed
    pub fn with_seed(config: &PacingConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &PacingConfig, mut rng: StdRng) -> Self {
        let gap_threshold = draw_gap(&mut rng, config);
        Self {
            config: config.clone(),
            rng,
            schedule: config.global_wait.iter().copied().collect(),
            consecutive_failures: 0,
            pages_since_pause: 0,
            gap_threshold,
        }
    }

    /// Decides whether to pause before a new resource is crawled
    ///
    /// # Arguments
    ///
    /// * `upcoming_pages` - Pages the resource is expected to take
    ///
    /// # Returns
    ///
    /// * `LongWait` - The resource would push the crawl past the front
    ///   entry's page threshold; the wait is the entry's wait scaled by the
    ///   share of that threshold already used
    /// * `Proceed` - Otherwise
    pub fn begin_resource(&mut self, upcoming_pages: u32) -> PacingDecision {
        let Some(entry) = self.schedule.front().copied() else {
            return PacingDecision::Proceed;
        };

        let done = self.pages_since_pause;
        if done < MIN_PAGES_BEFORE_RESOURCE_PAUSE
            || done.saturating_add(upcoming_pages) <= entry.pages
        {
            return PacingDecision::Proceed;
        }

        let share = (done as f64 / entry.pages.max(1) as f64).min(1.0);
        let wait = Duration::from_secs_f64(entry.wait as f64 * share);
        debug!(
            pages = done,
            upcoming = upcoming_pages,
            entry_pages = entry.pages,
            wait_secs = wait.as_secs_f64(),
            "Pausing before resource"
        );
        self.finish_long_wait();
        PacingDecision::LongWait(wait)
    }

    /// Resets the consecutive-failure counter for a new stream
    ///
    /// The page-gap counter carries over: it tracks load on the host across
    /// the whole crawl.
    pub fn begin_stream(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Decides the pause after a successfully delivered page
    pub fn on_success(&mut self) -> PacingDecision {
        self.consecutive_failures = 0;
        self.pages_since_pause += 1;

        if let Some(entry) = self.schedule.front().copied() {
            if self.pages_since_pause >= self.gap_threshold
                || self.pages_since_pause >= entry.pages
            {
                let wait = Duration::from_secs(entry.wait);
                debug!(
                    pages = self.pages_since_pause,
                    threshold = self.gap_threshold,
                    entry_pages = entry.pages,
                    wait_secs = entry.wait,
                    "Long pause"
                );
                self.finish_long_wait();
                return PacingDecision::LongWait(wait);
            }
        }

        let wait = self.short_wait();
        if wait.is_zero() {
            PacingDecision::Proceed
        } else {
            PacingDecision::ShortWait(wait)
        }
    }

    /// Decides the reaction to a failed fetch
    pub fn on_failure(&mut self) -> PacingDecision {
        self.consecutive_failures += 1;

        if self.consecutive_failures >= self.config.max_consecutive_failures {
            debug!(
                failures = self.consecutive_failures,
                "Consecutive failure threshold reached"
            );
            self.consecutive_failures = 0;
            let secs = self.uniform(self.config.min_failure_wait, self.config.max_failure_wait);
            return PacingDecision::RotateAndLongWait(Duration::from_secs_f64(secs));
        }

        PacingDecision::RotateIdentity(self.short_wait())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn pages_since_pause(&self) -> u32 {
        self.pages_since_pause
    }

    /// Current order of the global wait schedule
    pub fn schedule(&self) -> impl Iterator<Item = &GlobalWaitEntry> {
        self.schedule.iter()
    }

    /// Moves the used entry to the back and starts a new page gap
    fn finish_long_wait(&mut self) {
        self.schedule.rotate_left(1);
        self.pages_since_pause = 0;
        self.gap_threshold = draw_gap(&mut self.rng, &self.config);
    }

    fn short_wait(&mut self) -> Duration {
        let secs = self.uniform(self.config.min_wait, self.config.max_wait);
        Duration::from_secs_f64(secs)
    }

    fn uniform(&mut self, min: f64, max: f64) -> f64 {
        if min >= max {
            min
        } else {
            self.rng.gen_range(min..=max)
        }
    }
}

fn draw_gap(rng: &mut StdRng, config: &PacingConfig) -> u32 {
    if config.min_page_gap >= config.max_page_gap {
        config.min_page_gap
    } else {
        rng.gen_range(config.min_page_gap..=config.max_page_gap)
    }
}
