//! Experiment clock.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// The start of an experiment, captured once and copied into every component
/// that reports experiment-relative time.
#[derive(Debug, Clone, Copy)]
pub struct ExperimentClock {
    start: Instant,
    epoch: SystemTime,
}

impl ExperimentClock {
    /// Start the clock now.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            epoch: SystemTime::now(),
        }
    }

    /// Monotonic instant the experiment started at.
    pub fn started_at(&self) -> Instant {
        self.start
    }

    /// Time elapsed since the experiment started.
    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.start)
    }

    /// Wall-clock start of the experiment as fractional Unix seconds.
    pub fn unix_start(&self) -> f64 {
        self.epoch
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapsed_follows_time() {
        let clock = ExperimentClock::start();
        assert_eq!(clock.elapsed(), Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(clock.elapsed(), Duration::from_millis(1500));
    }

    #[test]
    fn unix_start_is_recent() {
        let clock = ExperimentClock::start();
        assert!(clock.unix_start() > 1_600_000_000.0);
    }
}
