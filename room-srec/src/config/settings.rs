//! Typed scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::provider::{ConfigProvider, ConfigProviderExt};
use crate::domain::Tier;
use crate::scheduler::TierCadence;
use crate::{Error, Result};

/// Upper bound on every configured period, jitter and timeout.
pub const MAX_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Configuration key names.
pub mod keys {
    pub const DEBUG: &str = "debug";
    pub const CHECK_PERIOD: &str = "check_period";
    pub const CHECK_PERIOD_RANDOM_OFFSET: &str = "check_period_random_offset";
    pub const IMPORTANT_CHECK_PERIOD: &str = "important_check_period";
    pub const IMPORTANT_CHECK_PERIOD_RANDOM_OFFSET: &str = "important_check_period_random_offset";
    pub const CHECK_THREADS: &str = "check_threads";
    pub const CHECK_WAIT: &str = "check_wait";
    pub const TICK_INTERVAL: &str = "tick_interval";
    pub const PROBE_TIMEOUT: &str = "probe_timeout";
    pub const RECORDER_START_TIMEOUT: &str = "recorder_start_timeout";
    pub const RECORDER_STOP_TIMEOUT: &str = "recorder_stop_timeout";
    pub const PROBE_COMMAND: &str = "probe_command";
    pub const RECORDER_COMMAND: &str = "recorder_command";
    pub const RECORDER_SIDE_CHANNEL_ARGS: &str = "recorder_side_channel_args";
    pub const OUTPUT_DIR: &str = "output_dir";
}

/// Tunables for the scheduling core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cadence of normal rooms.
    pub normal: TierCadence,
    /// Cadence of important rooms.
    pub important: TierCadence,
    /// Maximum concurrent probes.
    pub max_workers: usize,
    /// Pause a worker takes after each probe.
    pub check_wait: Duration,
    /// Base interval of the clock driving the scheduler.
    pub tick_interval: Duration,
    /// Timeout applied to every probe call.
    pub probe_timeout: Duration,
    /// Timeout applied to `Recorder::start`.
    pub start_timeout: Duration,
    /// Grace period applied to `Recorder::stop`.
    pub stop_timeout: Duration,
    /// Verbose logging.
    pub debug: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            normal: TierCadence::from_secs(30, 10),
            important: TierCadence::from_secs(3, 3),
            max_workers: 1,
            check_wait: Duration::from_millis(500),
            tick_interval: Duration::from_millis(500),
            probe_timeout: Duration::from_secs(10),
            start_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(10),
            debug: false,
        }
    }
}

impl SchedulerConfig {
    /// Build the configuration from a provider.
    ///
    /// Every tunable is required; a missing key is fatal.
    pub fn from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Result<Self> {
        let config = Self {
            normal: TierCadence::new(
                provider.require_secs(keys::CHECK_PERIOD)?,
                provider.require_secs(keys::CHECK_PERIOD_RANDOM_OFFSET)?,
            ),
            important: TierCadence::new(
                provider.require_secs(keys::IMPORTANT_CHECK_PERIOD)?,
                provider.require_secs(keys::IMPORTANT_CHECK_PERIOD_RANDOM_OFFSET)?,
            ),
            max_workers: provider.require(keys::CHECK_THREADS)?,
            check_wait: provider.require_secs(keys::CHECK_WAIT)?,
            tick_interval: provider.require_secs(keys::TICK_INTERVAL)?,
            probe_timeout: provider.require_secs(keys::PROBE_TIMEOUT)?,
            start_timeout: provider.require_secs(keys::RECORDER_START_TIMEOUT)?,
            stop_timeout: provider.require_secs(keys::RECORDER_STOP_TIMEOUT)?,
            debug: provider.require_bool(keys::DEBUG)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::config("check_threads must be at least 1"));
        }
        if self.normal.period.is_zero() || self.important.period.is_zero() {
            return Err(Error::config("check periods must be greater than zero"));
        }
        if self.tick_interval.is_zero() {
            return Err(Error::config("tick_interval must be greater than zero"));
        }
        if self.probe_timeout.is_zero() {
            return Err(Error::config("probe_timeout must be greater than zero"));
        }

        let bounded = [
            (keys::CHECK_PERIOD, self.normal.period),
            (keys::CHECK_PERIOD_RANDOM_OFFSET, self.normal.jitter),
            (keys::IMPORTANT_CHECK_PERIOD, self.important.period),
            (keys::IMPORTANT_CHECK_PERIOD_RANDOM_OFFSET, self.important.jitter),
            (keys::CHECK_WAIT, self.check_wait),
            (keys::TICK_INTERVAL, self.tick_interval),
            (keys::PROBE_TIMEOUT, self.probe_timeout),
            (keys::RECORDER_START_TIMEOUT, self.start_timeout),
            (keys::RECORDER_STOP_TIMEOUT, self.stop_timeout),
        ];
        if let Some((key, value)) = bounded.iter().find(|(_, value)| *value > MAX_DURATION) {
            return Err(Error::config(format!(
                "{} must be at most {}s, got {}s",
                key,
                MAX_DURATION.as_secs(),
                value.as_secs()
            )));
        }
        Ok(())
    }

    /// Cadence for a tier.
    pub fn cadence(&self, tier: Tier) -> TierCadence {
        match tier {
            Tier::Important => self.important,
            Tier::Normal => self.normal,
        }
    }
}
