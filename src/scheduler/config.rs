//! Scheduler timing and pool sizing.

use std::time::Duration;

/// Default period between scheduler ticks (5 minutes).
const DEFAULT_PERIOD_SECS: u64 = 300;

/// Default number of task bodies allowed to run at once.
const DEFAULT_POOL_WIDTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between ticks.
    ///
    /// Default: 5 minutes. Configure via `REVIEWER_JOB_POLL_INTERVAL_SECS`.
    pub period: Duration,

    /// Worker pool width. Always at least 1.
    ///
    /// Default: 4. Configure via `REVIEWER_JOB_POOL_WIDTH`.
    pub pool_width: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        SchedulerConfig {
            period: Duration::from_secs(DEFAULT_PERIOD_SECS),
            pool_width: DEFAULT_POOL_WIDTH,
        }
    }

    /// Reads the configuration from the environment. Missing or unparsable
    /// values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let period_secs = lookup("REVIEWER_JOB_POLL_INTERVAL_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|&secs| secs > 0)
            .unwrap_or(DEFAULT_PERIOD_SECS);

        let pool_width = lookup("REVIEWER_JOB_POOL_WIDTH")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_POOL_WIDTH)
            .max(1);

        SchedulerConfig {
            period: Duration::from_secs(period_secs),
            pool_width,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_pool_width(mut self, width: usize) -> Self {
        self.pool_width = width.max(1);
        self
    }
}
