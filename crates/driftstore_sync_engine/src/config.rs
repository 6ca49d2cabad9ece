//! Configuration for the sync engine.

use driftstore_predicate::PredicateGroup;
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum items requested per sync page.
    pub sync_page_size: usize,
    /// Cap on total items pulled per model in one sync pass.
    pub max_records_to_sync: usize,
    /// How often a base sync must be repeated per model.
    pub full_sync_interval: Duration,
    /// Server-side sync filters, keyed by model name.
    pub sync_predicates: HashMap<String, PredicateGroup>,
    /// Retry configuration for mutation delivery.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            sync_page_size: 1000,
            max_records_to_sync: 10_000,
            full_sync_interval: Duration::from_secs(24 * 60 * 60),
            sync_predicates: HashMap::new(),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the sync page size.
    pub fn with_sync_page_size(mut self, size: usize) -> Self {
        self.sync_page_size = size;
        self
    }

    /// Sets the per-model total record cap.
    pub fn with_max_records_to_sync(mut self, max: usize) -> Self {
        self.max_records_to_sync = max;
        self
    }

    /// Sets the base-sync repetition interval.
    pub fn with_full_sync_interval(mut self, interval: Duration) -> Self {
        self.full_sync_interval = interval;
        self
    }

    /// Attaches a server-side sync filter for a model.
    pub fn with_sync_predicate(
        mut self,
        model: impl Into<String>,
        predicate: PredicateGroup,
    ) -> Self {
        self.sync_predicates.insert(model.into(), predicate);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Canonical JSON of the sync predicate for a model, if one is set.
    pub fn predicate_json(&self, model: &str) -> Option<String> {
        self.sync_predicates
            .get(model)
            .map(PredicateGroup::to_canonical_json)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of delivery attempts.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the given attempt cap.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter.
            let jitter = delay_secs * 0.25 * pseudo_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(8)
    }
}

/// Cheap time-derived jitter, avoids pulling in an RNG dependency.
fn pseudo_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
