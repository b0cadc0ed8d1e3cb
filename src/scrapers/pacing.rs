//! Human-like request pacing and rotating client identities.

use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "es-UY,es;q=0.9,en;q=0.8",
    "es-419,es;q=0.9",
    "es-ES,es;q=0.9,en-US;q=0.7",
];

/// Browser fingerprint presented to a source for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub user_agent: &'static str,
    pub accept_language: &'static str,
}

impl ClientIdentity {
    /// Pick a fresh identity; called once per attempt
    pub fn random() -> Self {
        let mut rng = rand::rng();
        Self {
            user_agent: USER_AGENTS[rng.random_range(0..USER_AGENTS.len())],
            accept_language: ACCEPT_LANGUAGES[rng.random_range(0..ACCEPT_LANGUAGES.len())],
        }
    }
}

/// Delay bounds between consecutive requests to one source
#[derive(Debug, Clone, PartialEq)]
pub struct PacingConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Probability of an extra long pause before a request
    pub long_pause_chance: f64,
    pub long_pause_min: Duration,
    pub long_pause_max: Duration,
}

impl PacingConfig {
    /// No waiting at all, for fixtures and tests
    pub fn none() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            long_pause_chance: 0.0,
            long_pause_min: Duration::ZERO,
            long_pause_max: Duration::ZERO,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(8),
            long_pause_chance: 0.1,
            long_pause_min: Duration::from_secs(3),
            long_pause_max: Duration::from_secs(8),
        }
    }
}

/// Spaces out requests with randomized delays. The first request is not delayed.
#[derive(Debug)]
pub struct Pacer {
    config: PacingConfig,
    started: AtomicBool,
}

impl Pacer {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            started: AtomicBool::new(false),
        }
    }

    pub async fn wait(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let delay = self.next_delay();
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "Pacing before next request");
            tokio::time::sleep(delay).await;
        }
    }

    fn next_delay(&self) -> Duration {
        let mut rng = rand::rng();
        let mut delay = random_between(&mut rng, self.config.min_delay, self.config.max_delay);
        if self.config.long_pause_chance > 0.0
            && rng.random_bool(self.config.long_pause_chance.min(1.0))
        {
            delay += random_between(
                &mut rng,
                self.config.long_pause_min,
                self.config.long_pause_max,
            );
        }
        delay
    }
}

fn random_between(rng: &mut impl Rng, min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_millis() as u64;
    min + Duration::from_millis(rng.random_range(0..=span))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_stays_within_bounds() {
        let pacer = Pacer::new(PacingConfig {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(200),
            long_pause_chance: 0.0,
            long_pause_min: Duration::ZERO,
            long_pause_max: Duration::ZERO,
        });
        for _ in 0..50 {
            let delay = pacer.next_delay();
            assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(200));
        }
    }

    #[test]
    fn identity_comes_from_pool() {
        let identity = ClientIdentity::random();
        assert!(USER_AGENTS.contains(&identity.user_agent));
        assert!(ACCEPT_LANGUAGES.contains(&identity.accept_language));
    }

    #[tokio::test]
    async fn zero_pacing_never_sleeps() {
        let pacer = Pacer::new(PacingConfig::none());
        let started = std::time::Instant::now();
        for _ in 0..5 {
            pacer.wait().await;
        }
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
