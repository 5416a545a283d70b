//! Runtime configuration shared by server bootstrap code.

/// Bootstrap configuration used by `coral-server` during process startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Main RESP listener port.
    pub port: u16,
    /// How many times per second the housekeeping time event runs.
    pub cron_frequency_hz: u32,
    /// Upper bound of expiring keys inspected per housekeeping run.
    pub max_expire_lookups_per_cron: usize,
    /// Budget in milliseconds for one incremental-rehash step of each dict.
    pub rehash_budget_millis: u64,
    /// Readiness event buffer capacity for the reactor poller.
    pub max_poll_events: usize,
}

impl RuntimeConfig {
    /// Clamps the event capacity so a zeroed config still polls.
    #[must_use]
    pub fn normalized_max_poll_events(&self) -> usize {
        self.max_poll_events.max(64)
    }

    /// Delay between two housekeeping runs.
    #[must_use]
    pub fn cron_period_millis(&self) -> u64 {
        1000 / u64::from(self.cron_frequency_hz.max(1))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            port: 6379,
            cron_frequency_hz: 10,
            max_expire_lookups_per_cron: 20,
            rehash_budget_millis: 1,
            max_poll_events: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RuntimeConfig;
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    fn default_config_runs_cron_every_100ms() {
        let config = RuntimeConfig::default();
        assert_that!(config.cron_period_millis(), eq(100_u64));
    }

    #[rstest]
    fn zeroed_cron_frequency_does_not_divide_by_zero() {
        let config = RuntimeConfig {
            cron_frequency_hz: 0,
            ..RuntimeConfig::default()
        };
        assert_that!(config.cron_period_millis(), eq(1000_u64));
    }

    #[rstest]
    fn zeroed_poll_capacity_is_clamped() {
        let config = RuntimeConfig {
            max_poll_events: 0,
            ..RuntimeConfig::default()
        };
        assert_that!(config.normalized_max_poll_events(), eq(64_usize));
    }
}
