use crate::runtime::telemetry;
use anyhow::{bail, Result};
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_CYCLE_TIMEOUT_SECS: u64 = 5 * 60;
const DEFAULT_FLUSH_MAX_FAILURES: usize = 4;
const DEFAULT_FLUSH_FAILURE_DELAY_MS: u64 = 6_900;
const DEFAULT_BLOCK_SEARCH_DELTA_SECS: u64 = 60 * 60;
const DEFAULT_MAX_BLOCK_SEARCH_STEP: u64 = 10_000;
const DEFAULT_EVENT_LOOKBACK_BLOCKS: u64 = 4_000;
const DEFAULT_UPDATE_TIMEOUT_SECS: u64 = 5 * 60;

/// Runtime configuration for the sync controller.
///
/// All instances must be constructed via [`SyncConfig::builder`] or [`SyncConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    poll_interval: Duration,
    cycle_timeout: Duration,
    flush_max_failures: usize,
    flush_failure_delay: Duration,
    block_search_delta: Duration,
    max_block_search_step: u64,
    event_lookback_blocks: u64,
    default_update_timeout: Duration,
    metrics_interval: Duration,
}

pub struct SyncConfigParams {
    pub poll_interval: Duration,
    pub cycle_timeout: Duration,
    pub flush_max_failures: usize,
    pub flush_failure_delay: Duration,
    pub block_search_delta: Duration,
    pub max_block_search_step: u64,
    pub event_lookback_blocks: u64,
    pub default_update_timeout: Duration,
    pub metrics_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            cycle_timeout: Duration::from_secs(DEFAULT_CYCLE_TIMEOUT_SECS),
            flush_max_failures: DEFAULT_FLUSH_MAX_FAILURES,
            flush_failure_delay: Duration::from_millis(DEFAULT_FLUSH_FAILURE_DELAY_MS),
            block_search_delta: Duration::from_secs(DEFAULT_BLOCK_SEARCH_DELTA_SECS),
            max_block_search_step: DEFAULT_MAX_BLOCK_SEARCH_STEP,
            event_lookback_blocks: DEFAULT_EVENT_LOOKBACK_BLOCKS,
            default_update_timeout: Duration::from_secs(DEFAULT_UPDATE_TIMEOUT_SECS),
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
        }
    }
}

impl SyncConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: SyncConfigParams) -> Result<Self> {
        let SyncConfigParams {
            poll_interval,
            cycle_timeout,
            flush_max_failures,
            flush_failure_delay,
            block_search_delta,
            max_block_search_step,
            event_lookback_blocks,
            default_update_timeout,
            metrics_interval,
        } = params;

        let config = Self {
            poll_interval,
            cycle_timeout,
            flush_max_failures,
            flush_failure_delay,
            block_search_delta,
            max_block_search_step,
            event_lookback_blocks,
            default_update_timeout,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Delay between the end of one sync cycle and the start of the next.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Soft limit after which a running cycle is reported and the next one scheduled.
    pub fn cycle_timeout(&self) -> Duration {
        self.cycle_timeout
    }

    /// Consecutive flush failures after which queued updates are dropped.
    pub fn flush_max_failures(&self) -> usize {
        self.flush_max_failures
    }

    /// Pause applied after every failed flush.
    pub fn flush_failure_delay(&self) -> Duration {
        self.flush_failure_delay
    }

    /// Window past a timeout within which a block counts as "near" it.
    pub fn block_search_delta(&self) -> Duration {
        self.block_search_delta
    }

    pub fn max_block_search_step(&self) -> u64 {
        self.max_block_search_step
    }

    /// Blocks before the located timeout block scanned for update events.
    pub fn event_lookback_blocks(&self) -> u64 {
        self.event_lookback_blocks
    }

    /// Expiry assumed for a pending state whose channel carries no timeout.
    pub fn default_update_timeout(&self) -> Duration {
        self.default_update_timeout
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if self.cycle_timeout.is_zero() {
            bail!("cycle_timeout must be greater than 0");
        }

        if self.flush_max_failures == 0 {
            bail!("flush_max_failures must be greater than 0");
        }

        if self.block_search_delta.as_secs() == 0 {
            bail!("block_search_delta must be at least one second");
        }

        if self.max_block_search_step <= 2 {
            bail!("max_block_search_step must be greater than 2");
        }

        if self.default_update_timeout.as_secs() == 0 {
            bail!("default_update_timeout must be at least one second");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct SyncConfigBuilder {
    poll_interval: Option<Duration>,
    cycle_timeout: Option<Duration>,
    flush_max_failures: Option<usize>,
    flush_failure_delay: Option<Duration>,
    block_search_delta: Option<Duration>,
    max_block_search_step: Option<u64>,
    event_lookback_blocks: Option<u64>,
    default_update_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
}

impl SyncConfigBuilder {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn cycle_timeout(mut self, timeout: Duration) -> Self {
        self.cycle_timeout = Some(timeout);
        self
    }

    pub fn flush_max_failures(mut self, failures: usize) -> Self {
        self.flush_max_failures = Some(failures);
        self
    }

    pub fn flush_failure_delay(mut self, delay: Duration) -> Self {
        self.flush_failure_delay = Some(delay);
        self
    }

    pub fn block_search_delta(mut self, delta: Duration) -> Self {
        self.block_search_delta = Some(delta);
        self
    }

    pub fn max_block_search_step(mut self, step: u64) -> Self {
        self.max_block_search_step = Some(step);
        self
    }

    pub fn event_lookback_blocks(mut self, blocks: u64) -> Self {
        self.event_lookback_blocks = Some(blocks);
        self
    }

    pub fn default_update_timeout(mut self, timeout: Duration) -> Self {
        self.default_update_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<SyncConfig> {
        let defaults = SyncConfig::default();
        let params = SyncConfigParams {
            poll_interval: self.poll_interval.unwrap_or(defaults.poll_interval),
            cycle_timeout: self.cycle_timeout.unwrap_or(defaults.cycle_timeout),
            flush_max_failures: self
                .flush_max_failures
                .unwrap_or(defaults.flush_max_failures),
            flush_failure_delay: self
                .flush_failure_delay
                .unwrap_or(defaults.flush_failure_delay),
            block_search_delta: self
                .block_search_delta
                .unwrap_or(defaults.block_search_delta),
            max_block_search_step: self
                .max_block_search_step
                .unwrap_or(defaults.max_block_search_step),
            event_lookback_blocks: self
                .event_lookback_blocks
                .unwrap_or(defaults.event_lookback_blocks),
            default_update_timeout: self
                .default_update_timeout
                .unwrap_or(defaults.default_update_timeout),
            metrics_interval: self.metrics_interval.unwrap_or(defaults.metrics_interval),
        };

        SyncConfig::new(params)
    }
}
